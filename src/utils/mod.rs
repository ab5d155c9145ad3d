pub mod constants;
mod timeout;
mod wait_for_element;

pub use timeout::{bounded, clamp_interaction_timeout, clamp_navigation_timeout};
pub use wait_for_element::wait_for_element;
