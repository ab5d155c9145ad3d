use anyhow::{Context, Result};
use chromiumoxide::browser::{Browser, BrowserConfigBuilder, HeadlessMode};
use chromiumoxide::error::CdpError;
use chromiumoxide::fetcher::{BrowserFetcher, BrowserFetcherOptions};
use chromiumoxide::handler::Handler;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use tokio::task::{self, JoinHandle};
use tracing::{debug, error, info, trace, warn};

use crate::BrowserConfig;
use crate::utils::clamp_navigation_timeout;
use crate::utils::constants::CHROME_USER_AGENT;

/// Overrides executable discovery when it points at an existing file
const CHROMIUM_PATH_ENV: &str = "CHROMIUM_PATH";

/// Flags that hide the usual automation fingerprints from the job site
const STEALTH_ARGS: &[&str] = &[
    "--disable-blink-features=AutomationControlled",
    "--disable-infobars",
    "--disable-notifications",
    "--disable-print-preview",
    "--no-first-run",
    "--no-default-browser-check",
    "--disable-extensions",
    "--disable-popup-blocking",
    "--disable-background-timer-throttling",
    "--disable-backgrounding-occluded-windows",
    "--disable-breakpad",
    "--disable-features=TranslateUI",
    "--disable-hang-monitor",
    "--password-store=basic",
    "--use-mock-keychain",
    "--lang=en-US",
    "--mute-audio",
];

const INSECURE_ARGS: &[&str] = &[
    "--disable-web-security",
    "--disable-features=IsolateOrigins,site-per-process",
    "--ignore-certificate-errors",
];

const NO_SANDBOX_ARGS: &[&str] = &["--no-sandbox", "--disable-setuid-sandbox"];

/// Removes a session's profile directory unless the launch succeeded
struct ProfileDir {
    path: PathBuf,
    armed: bool,
}

impl ProfileDir {
    fn create(path: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&path)
            .with_context(|| format!("Failed to create profile directory {}", path.display()))?;
        Ok(Self { path, armed: true })
    }

    fn disarm(mut self) -> PathBuf {
        self.armed = false;
        std::mem::take(&mut self.path)
    }
}

impl Drop for ProfileDir {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => debug!("Removed profile dir after failed launch: {}", self.path.display()),
            Err(e) => warn!("Failed to remove profile dir {}: {}", self.path.display(), e),
        }
    }
}

fn installed_browser_paths() -> Vec<PathBuf> {
    let raw: &[&str] = if cfg!(target_os = "windows") {
        &[
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files\Chromium\Application\chrome.exe",
        ]
    } else if cfg!(target_os = "macos") {
        &[
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "~/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/opt/homebrew/bin/chromium",
        ]
    } else {
        &[
            "/usr/bin/google-chrome",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/snap/bin/chromium",
            "/usr/local/bin/chromium",
            "/opt/google/chrome/chrome",
        ]
    };

    raw.iter()
        .filter_map(|candidate| match candidate.strip_prefix("~/") {
            Some(rest) => dirs::home_dir().map(|home| home.join(rest)),
            None => Some(PathBuf::from(candidate)),
        })
        .collect()
}

fn browser_on_path() -> Option<PathBuf> {
    if cfg!(target_os = "windows") {
        return None;
    }
    ["chromium", "chromium-browser", "google-chrome", "chrome"]
        .into_iter()
        .filter_map(|cmd| Command::new("which").arg(cmd).output().ok())
        .filter(|output| output.status.success())
        .map(|output| String::from_utf8_lossy(&output.stdout).trim().to_string())
        .find(|found| !found.is_empty())
        .map(PathBuf::from)
}

/// Locate a local Chrome or Chromium
pub fn find_browser_executable() -> Option<PathBuf> {
    if let Ok(raw) = std::env::var(CHROMIUM_PATH_ENV) {
        let path = PathBuf::from(raw);
        if path.exists() {
            return Some(path);
        }
        warn!("{} points to a missing file: {}", CHROMIUM_PATH_ENV, path.display());
    }

    installed_browser_paths()
        .into_iter()
        .find(|path| path.exists())
        .or_else(browser_on_path)
}

/// Fetch a managed Chromium into the user cache and return its executable
pub async fn download_managed_browser() -> Result<PathBuf> {
    let cache_dir = dirs::cache_dir()
        .unwrap_or_else(|| std::env::temp_dir().join(".cache"))
        .join("resume_job_search/chromium");
    info!("No local browser found, fetching Chromium into {}", cache_dir.display());

    std::fs::create_dir_all(&cache_dir).context("Failed to create browser cache directory")?;
    let options = BrowserFetcherOptions::builder()
        .with_path(&cache_dir)
        .build()
        .context("Failed to build fetcher options")?;

    let revision = BrowserFetcher::new(options)
        .fetch()
        .await
        .context("Failed to download Chromium")?;
    Ok(revision.executable_path)
}

/// chromiumoxide cannot decode some newer CDP messages; those errors are noise
fn is_benign_cdp_error(error: &CdpError) -> bool {
    let message = error.to_string();
    message.contains("data did not match any variant of untagged enum Message")
        || message.contains("Failed to deserialize WS response")
}

fn drive_handler(mut handler: Handler) -> JoinHandle<()> {
    task::spawn(async move {
        while let Some(event) = handler.next().await {
            match event {
                Err(e) if is_benign_cdp_error(&e) => trace!("Ignored CDP decode error: {}", e),
                Err(e) => error!("Browser handler error: {:?}", e),
                Ok(()) => {}
            }
        }
        debug!("Browser handler finished");
    })
}

/// Launch a stealth-configured Chromium bound to `user_data_dir`
///
/// On success the caller owns the directory and removes it after the
/// browser exits; on failure it is removed here.
pub async fn launch_browser(
    config: &BrowserConfig,
    user_data_dir: PathBuf,
) -> Result<(Browser, JoinHandle<()>)> {
    let executable = match find_browser_executable() {
        Some(path) => {
            info!("Using browser at {}", path.display());
            path
        }
        None => download_managed_browser().await?,
    };

    let profile = ProfileDir::create(user_data_dir)?;

    let mut args: Vec<String> = vec![format!("--user-agent={CHROME_USER_AGENT}")];
    args.extend(STEALTH_ARGS.iter().map(|a| a.to_string()));
    if config.disable_security {
        warn!("Browser security features disabled by configuration");
        args.extend(INSECURE_ARGS.iter().map(|a| a.to_string()));
    }
    if config.disable_security || running_in_container(Path::new("/.dockerenv")) {
        debug!("Chrome sandbox disabled");
        args.extend(NO_SANDBOX_ARGS.iter().map(|a| a.to_string()));
    }

    let builder = BrowserConfigBuilder::default()
        .request_timeout(clamp_navigation_timeout(config.navigation_timeout()))
        .window_size(config.window.width, config.window.height)
        .user_data_dir(profile.path.clone())
        .chrome_executable(executable)
        .args(args);
    let builder = if config.headless {
        builder.headless_mode(HeadlessMode::default())
    } else {
        builder.with_head()
    };
    let browser_config = builder
        .build()
        .map_err(|e| anyhow::anyhow!("Invalid browser configuration: {e}"))?;

    let (browser, handler) = Browser::launch(browser_config)
        .await
        .context("Failed to launch browser")?;

    profile.disarm();
    Ok((browser, drive_handler(handler)))
}

/// The setuid sandbox does not work inside containers
fn running_in_container(dockerenv: &Path) -> bool {
    dockerenv.exists()
        || std::env::var("container").is_ok()
        || std::env::var("KUBERNETES_SERVICE_HOST").is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("profile-dir-test-{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn armed_profile_dir_is_removed() {
        let dir = scratch_dir();
        {
            let _profile = ProfileDir::create(dir.clone()).unwrap();
            assert!(dir.exists());
        }
        assert!(!dir.exists());
    }

    #[test]
    fn disarmed_profile_dir_survives() {
        let dir = scratch_dir();
        let kept = ProfileDir::create(dir.clone()).unwrap().disarm();
        assert_eq!(kept, dir);
        assert!(kept.exists());
        std::fs::remove_dir_all(kept).unwrap();
    }

    #[test]
    fn stealth_args_hide_automation() {
        assert!(STEALTH_ARGS.contains(&"--disable-blink-features=AutomationControlled"));
        assert!(!STEALTH_ARGS.iter().any(|a| NO_SANDBOX_ARGS.contains(a)));
    }
}
