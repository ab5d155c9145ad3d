//! Browser session constants

/// User agent presented by every session
///
/// Keep within a few releases of current Chrome stable; a stale version is
/// itself a bot signal. Schedule: https://chromiumdash.appspot.com/schedule
pub const CHROME_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.6834.160 Safari/537.36";

/// Prefix for per-session Chrome profile directories under the temp dir
pub const PROFILE_DIR_PREFIX: &str = "resume_job_search_profile";

/// Quiet window used when deciding the network has gone idle
pub const NETWORK_QUIET_WINDOW_MS: u64 = 500;
