//! PageScope CDP bridge.
//!
//! Owns the low-level DevTools connection to one browser and the lifecycle of
//! the per-page debug sessions layered on top of it. Higher layers (the tree
//! perceiver, the CLI) never talk to the wire directly: everything goes
//! through the [`transport::DebugTransport`] trait, and session attach/detach
//! policy lives in [`session::SessionManager`].

use std::{env, path::PathBuf};

use which::which;

pub mod metrics;
pub mod session;
pub mod transport;
pub mod util;

pub use config::BridgeConfig;
pub use error::TransportError;
pub use session::{SessionManager, SessionPhase};
pub use transport::{ChromiumTransport, CommandTarget, DebugTransport, ListenerId};

pub mod error {
    use thiserror::Error;

    /// Failure categories surfaced by the bridge.
    ///
    /// Every variant is fatal to the single call that produced it and never
    /// to the session as a whole; reattachment is the session manager's job.
    #[derive(Clone, Debug, Error)]
    pub enum TransportError {
        /// The browser rejected a protocol command; carries its message.
        #[error("protocol error: {message}")]
        Protocol { message: String },
        /// A command was issued for a target with no live debug session.
        #[error("not attached to target {0}")]
        NotAttached(String),
        /// The command did not resolve within the configured deadline.
        #[error("command timed out: {method}")]
        Timeout { method: String },
        /// The connection's command loop is gone.
        #[error("transport channel closed")]
        ChannelClosed,
        /// Launching or connecting to the browser failed.
        #[error("browser launch failed: {0}")]
        Launch(String),
        /// Websocket or process level i/o failure.
        #[error("cdp i/o failure: {0}")]
        Io(String),
    }

    impl TransportError {
        pub fn protocol(message: impl Into<String>) -> Self {
            Self::Protocol {
                message: message.into(),
            }
        }

        pub fn io(message: impl Into<String>) -> Self {
            Self::Io(message.into())
        }

        /// `Target.detachFromTarget` on an already-dead session reports a
        /// protocol error; callers that want idempotent detach match on this.
        pub fn is_not_attached(&self) -> bool {
            match self {
                Self::NotAttached(_) => true,
                Self::Protocol { message } => {
                    let lower = message.to_ascii_lowercase();
                    lower.contains("no session") || lower.contains("not attached")
                }
                _ => false,
            }
        }
    }
}

pub mod config {
    use std::{
        env,
        path::{Path, PathBuf},
    };

    use serde::{Deserialize, Serialize};

    use crate::detect_chrome_executable;

    /// Tuning knobs for the bridge.
    #[derive(Clone, Debug, Serialize, Deserialize)]
    pub struct BridgeConfig {
        pub executable: PathBuf,
        pub user_data_dir: PathBuf,
        pub headless: bool,
        /// Per-command deadline.
        pub default_deadline_ms: u64,
        /// Connect to an already-running browser instead of launching one.
        pub websocket_url: Option<String>,
        /// Inactivity window after which an attached session is auto-released.
        pub idle_release_ms: u64,
    }

    impl Default for BridgeConfig {
        fn default() -> Self {
            Self {
                executable: default_chrome_path(),
                user_data_dir: default_profile_dir(),
                headless: resolve_headless_default(),
                default_deadline_ms: 30_000,
                websocket_url: resolve_ws_url(),
                idle_release_ms: 30_000,
            }
        }
    }

    fn resolve_headless_default() -> bool {
        // PAGESCOPE_HEADLESS: "0", "false", "no", "off" means headful.
        match env::var("PAGESCOPE_HEADLESS") {
            Ok(value) => {
                let lower = value.to_ascii_lowercase();
                !matches!(lower.as_str(), "0" | "false" | "no" | "off")
            }
            Err(_) => true,
        }
    }

    fn resolve_ws_url() -> Option<String> {
        match env::var("PAGESCOPE_WS_URL") {
            Ok(value) => {
                let trimmed = value.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            Err(_) => None,
        }
    }

    fn default_chrome_path() -> PathBuf {
        detect_chrome_executable().unwrap_or_default()
    }

    fn default_profile_dir() -> PathBuf {
        if let Ok(path) = env::var("PAGESCOPE_CHROME_PROFILE") {
            return PathBuf::from(path);
        }

        Path::new("./.pagescope-profile").into()
    }
}

fn detect_chrome_executable() -> Option<PathBuf> {
    if let Ok(raw) = env::var("PAGESCOPE_CHROME") {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            let candidate = PathBuf::from(trimmed);
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }

    for name in chrome_executable_names() {
        if let Ok(path) = which(name) {
            return Some(path);
        }
    }

    let skip_defaults = env::var("PAGESCOPE_SKIP_OS_PATHS")
        .map(|value| !value.trim().is_empty())
        .unwrap_or(false);

    if !skip_defaults {
        for candidate in os_specific_chrome_paths() {
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }

    None
}

fn chrome_executable_names() -> &'static [&'static str] {
    #[cfg(target_os = "windows")]
    {
        &["chrome.exe", "chromium.exe", "msedge.exe"]
    }

    #[cfg(any(target_os = "macos", target_os = "linux", target_os = "freebsd"))]
    {
        &[
            "google-chrome-stable",
            "google-chrome",
            "chromium",
            "chromium-browser",
        ]
    }

    #[cfg(not(any(
        target_os = "windows",
        target_os = "macos",
        target_os = "linux",
        target_os = "freebsd"
    )))]
    {
        &["chrome"]
    }
}

fn os_specific_chrome_paths() -> Vec<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        let mut paths = Vec::new();
        for root in windows_search_roots() {
            paths.push(root.join("Google/Chrome/Application/chrome.exe"));
            paths.push(root.join("Chromium/Application/chrome.exe"));
            paths.push(root.join("Microsoft/Edge/Application/msedge.exe"));
        }
        paths
    }

    #[cfg(target_os = "macos")]
    {
        vec![
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"),
            PathBuf::from("/Applications/Chromium.app/Contents/MacOS/Chromium"),
        ]
    }

    #[cfg(any(target_os = "linux", target_os = "freebsd"))]
    {
        vec![
            PathBuf::from("/usr/bin/google-chrome-stable"),
            PathBuf::from("/usr/bin/google-chrome"),
            PathBuf::from("/usr/bin/chromium-browser"),
            PathBuf::from("/usr/bin/chromium"),
        ]
    }

    #[cfg(not(any(
        target_os = "windows",
        target_os = "macos",
        target_os = "linux",
        target_os = "freebsd"
    )))]
    {
        Vec::new()
    }
}

#[cfg(target_os = "windows")]
fn windows_search_roots() -> Vec<PathBuf> {
    let mut roots = Vec::new();
    for key in ["PROGRAMFILES", "PROGRAMFILES(X86)", "LOCALAPPDATA"] {
        if let Ok(value) = env::var(key) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                roots.push(PathBuf::from(trimmed));
            }
        }
    }
    roots
}

#[cfg(test)]
mod tests {
    use super::{chrome_executable_names, detect_chrome_executable};
    use std::{env, fs};
    use tempfile::tempdir;

    #[test]
    fn detects_from_env_var() {
        let dir = tempdir().unwrap();
        let exe_path = dir.path().join("my-chrome");
        fs::write(&exe_path, b"").unwrap();
        let original = env::var("PAGESCOPE_CHROME").ok();
        env::set_var("PAGESCOPE_CHROME", exe_path.to_string_lossy().to_string());
        let detected = detect_chrome_executable();
        if let Some(value) = original {
            env::set_var("PAGESCOPE_CHROME", value);
        } else {
            env::remove_var("PAGESCOPE_CHROME");
        }
        assert_eq!(detected, Some(exe_path));
    }

    #[test]
    fn executable_names_not_empty() {
        assert!(!chrome_executable_names().is_empty());
    }
}
