//! Browser process lifecycle for one session
//!
//! Launches a chromiumoxide browser with stealth configuration and a
//! throw-away profile directory, and tears both down on shutdown.

use anyhow::{Context, Result};
use chromiumoxide::browser::Browser;
use chromiumoxide::page::Page;
use std::path::PathBuf;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::BrowserConfig;
use crate::utils::constants::PROFILE_DIR_PREFIX;

/// Wrapper for Browser and its event handler task
///
/// Handler MUST be aborted to prevent it running indefinitely after
/// browser is closed.
pub struct BrowserWrapper {
    browser: Browser,
    handler: JoinHandle<()>,
    user_data_dir: Option<PathBuf>,
}

impl BrowserWrapper {
    /// Launch a fresh browser with its own profile directory
    pub async fn launch(config: &BrowserConfig) -> Result<Self> {
        let user_data_dir = std::env::temp_dir().join(format!(
            "{}_{}",
            PROFILE_DIR_PREFIX,
            uuid::Uuid::new_v4().simple()
        ));

        info!("Launching session browser with profile {}", user_data_dir.display());
        let (browser, handler) =
            crate::browser_setup::launch_browser(config, user_data_dir.clone()).await?;

        Ok(Self {
            browser,
            handler,
            user_data_dir: Some(user_data_dir),
        })
    }

    /// Open a blank page; navigation to the target happens afterwards
    pub async fn open_blank_page(&self) -> Result<Page> {
        self.browser
            .new_page("about:blank")
            .await
            .context("Failed to create blank page")
    }

    /// Close the browser, wait for the process to exit, then remove the profile
    ///
    /// Both `close()` and `wait()` are required: dropping only aborts the
    /// handler and would leave a zombie Chrome process. Safe to call twice.
    pub async fn shutdown(&mut self) {
        if self.user_data_dir.is_none() {
            return;
        }

        info!("Shutting down session browser");
        if let Err(e) = self.browser.close().await {
            warn!("Failed to close browser cleanly: {}", e);
        }
        if let Err(e) = self.browser.wait().await {
            warn!("Failed to wait for browser exit: {}", e);
        }
        self.cleanup_temp_dir();
    }

    /// Remove the profile directory (blocking)
    ///
    /// MUST run after `browser.wait()` so Chrome has released its file handles.
    fn cleanup_temp_dir(&mut self) {
        if let Some(path) = self.user_data_dir.take() {
            info!("Cleaning up temp directory: {}", path.display());
            if let Err(e) = std::fs::remove_dir_all(&path) {
                warn!(
                    "Failed to clean up temp directory {}: {}. Manual cleanup may be required.",
                    path.display(),
                    e
                );
            }
        }
    }
}

impl Drop for BrowserWrapper {
    fn drop(&mut self) {
        self.handler.abort();

        if let Some(path) = &self.user_data_dir {
            warn!(
                "BrowserWrapper dropped without shutdown(). Temp directory will be orphaned: {}",
                path.display()
            );
        }
    }
}
