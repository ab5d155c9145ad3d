//! Chromium implementation of the browser capability
//!
//! One [`ChromeBrowser`] owns one browser process and one page. Sessions are
//! never pooled or shared: [`ChromeSessionFactory`] launches a new one per run.

mod control;
mod wrapper;

pub use control::{ChromeBrowser, ChromeSessionFactory};
pub use wrapper::BrowserWrapper;
