//! Browser launch settings.

use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Overrides executable discovery when set to an existing file.
pub const CHROME_ENV: &str = "WEBUI_PROBE_CHROME";
/// `0`, `false`, `no` or `off` launch a visible window.
pub const HEADLESS_ENV: &str = "WEBUI_PROBE_HEADLESS";

/// Binary names looked up on `PATH`, in preference order.
const CHROME_BINARIES: &[&str] = &[
    "google-chrome-stable",
    "google-chrome",
    "chromium",
    "chromium-browser",
    "chrome",
    "msedge",
];

#[cfg(target_os = "macos")]
const INSTALL_PATHS: &[&str] = &[
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
];

#[cfg(target_os = "windows")]
const INSTALL_PATHS: &[&str] = &[
    r"C:\Program Files\Google\Chrome\Application\chrome.exe",
    r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
    r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
];

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
const INSTALL_PATHS: &[&str] = &[
    "/usr/bin/google-chrome-stable",
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
    "/snap/bin/chromium",
];

/// Configuration for launching and tuning the browser session.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CdpConfig {
    /// Browser binary. Left empty, one is discovered at launch.
    pub executable: PathBuf,
    pub user_data_dir: Option<PathBuf>,
    pub headless: bool,
    pub sandbox: bool,
    pub window_width: u32,
    pub window_height: u32,
    pub request_timeout_ms: u64,
    pub network_quiet_window_ms: u64,
    pub network_max_inflight: usize,
    pub extra_args: Vec<String>,
}

impl Default for CdpConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::new(),
            user_data_dir: None,
            headless: headless_from(env::var(HEADLESS_ENV).ok().as_deref()),
            sandbox: false,
            window_width: 1280,
            window_height: 720,
            request_timeout_ms: 30_000,
            network_quiet_window_ms: 500,
            network_max_inflight: 0,
            extra_args: vec![
                "--disable-gpu".to_string(),
                "--disable-dev-shm-usage".to_string(),
            ],
        }
    }
}

impl CdpConfig {
    /// The browser to launch: the configured path, then `WEBUI_PROBE_CHROME`,
    /// then `PATH`, then the platform's usual install locations. `None`
    /// leaves the choice to chromiumoxide.
    pub fn resolve_executable(&self) -> Option<PathBuf> {
        let from_env = env::var_os(CHROME_ENV).map(PathBuf::from);
        self.resolve_with(from_env, |name| which::which(name).ok(), INSTALL_PATHS)
    }

    fn resolve_with(
        &self,
        from_env: Option<PathBuf>,
        search_path: impl Fn(&str) -> Option<PathBuf>,
        install_paths: &[&str],
    ) -> Option<PathBuf> {
        [Some(self.executable.clone()), from_env]
            .into_iter()
            .flatten()
            .find(|candidate| is_file(candidate))
            .or_else(|| CHROME_BINARIES.iter().find_map(|name| search_path(name)))
            .or_else(|| {
                install_paths
                    .iter()
                    .map(PathBuf::from)
                    .find(|candidate| is_file(candidate))
            })
    }
}

fn is_file(path: &Path) -> bool {
    !path.as_os_str().is_empty() && path.is_file()
}

fn headless_from(value: Option<&str>) -> bool {
    match value.map(|raw| raw.trim().to_ascii_lowercase()) {
        Some(flag) => !matches!(flag.as_str(), "0" | "false" | "no" | "off"),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn no_path(_: &str) -> Option<PathBuf> {
        None
    }

    #[test]
    fn configured_binary_beats_env_and_path() {
        let dir = tempdir().unwrap();
        let configured = dir.path().join("my-chrome");
        let from_env = dir.path().join("env-chrome");
        fs::write(&configured, b"").unwrap();
        fs::write(&from_env, b"").unwrap();

        let cfg = CdpConfig {
            executable: configured.clone(),
            ..CdpConfig::default()
        };
        let found = cfg.resolve_with(Some(from_env), |_| Some(PathBuf::from("/on/path")), &[]);
        assert_eq!(found, Some(configured));
    }

    #[test]
    fn missing_configured_binary_falls_through_in_order() {
        let dir = tempdir().unwrap();
        let from_env = dir.path().join("env-chrome");
        let installed = dir.path().join("installed-chrome");
        fs::write(&from_env, b"").unwrap();
        fs::write(&installed, b"").unwrap();
        let installed_str = installed.to_string_lossy().to_string();

        let cfg = CdpConfig {
            executable: dir.path().join("gone"),
            ..CdpConfig::default()
        };
        assert_eq!(
            cfg.resolve_with(Some(from_env.clone()), no_path, &[]),
            Some(from_env)
        );

        let on_path = cfg.resolve_with(None, |name| {
            (name == "chromium").then(|| PathBuf::from("/opt/bin/chromium"))
        }, &[]);
        assert_eq!(on_path, Some(PathBuf::from("/opt/bin/chromium")));

        let fallback = cfg.resolve_with(
            Some(dir.path().join("also-gone")),
            no_path,
            &["/definitely/not/here", installed_str.as_str()],
        );
        assert_eq!(fallback, Some(installed));

        assert_eq!(cfg.resolve_with(None, no_path, &[]), None);
    }

    #[test]
    fn headless_flag_parsing() {
        assert!(headless_from(None));
        assert!(headless_from(Some("1")));
        assert!(!headless_from(Some(" Off ")));
        assert!(!headless_from(Some("false")));
    }
}
