//! Persisted settings (`milliongrid_settings.cfg`, one `key=value` per line).

use std::path::{Path, PathBuf};

use log::LevelFilter;

use crate::claim::DEFAULT_MAX_CLAIM_CELLS;
use crate::logger;

const SETTINGS_FILE: &str = "milliongrid_settings.cfg";

#[derive(Clone, Debug, PartialEq)]
pub struct GridSettings {
    /// SQLite database backing the grid.
    pub db_path: PathBuf,
    /// Address `serve` binds to.
    pub listen_addr: String,
    /// Base URL the `claim` and `render --server` commands talk to.
    pub server_url: String,
    pub max_claim_cells: usize,
    pub request_timeout_secs: u64,
    pub log_level: LevelFilter,
    pub log_to_stderr: bool,
    /// Browser origin allowed to call the API. Empty disables CORS headers.
    pub cors_origin: String,
}

impl Default for GridSettings {
    fn default() -> Self {
        Self {
            db_path: logger::data_dir().join("MillionGrid").join("milliongrid.db"),
            listen_addr: "127.0.0.1:4000".to_string(),
            server_url: "http://127.0.0.1:4000".to_string(),
            max_claim_cells: DEFAULT_MAX_CLAIM_CELLS,
            request_timeout_secs: 30,
            log_level: LevelFilter::Info,
            log_to_stderr: false,
            cors_origin: "http://localhost:3000".to_string(),
        }
    }
}

impl GridSettings {
    /// Path to the settings file.
    /// On Linux:   ~/.config/milliongrid/milliongrid_settings.cfg  (XDG_CONFIG_HOME respected)
    /// On Windows: %APPDATA%\MillionGrid\milliongrid_settings.cfg
    /// On macOS:   ~/Library/Application Support/MillionGrid/milliongrid_settings.cfg
    /// Fallback:   same directory as the executable.
    pub fn settings_path() -> Option<PathBuf> {
        #[cfg(target_os = "linux")]
        {
            let config_dir = std::env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| {
                    let home = std::env::var("HOME").unwrap_or_else(|_| "~".to_string());
                    PathBuf::from(home).join(".config")
                })
                .join("milliongrid");
            Some(config_dir.join(SETTINGS_FILE))
        }
        #[cfg(target_os = "windows")]
        {
            let appdata = std::env::var("APPDATA")
                .or_else(|_| std::env::var("USERPROFILE"))
                .ok()?;
            Some(PathBuf::from(appdata).join("MillionGrid").join(SETTINGS_FILE))
        }
        #[cfg(target_os = "macos")]
        {
            let home = std::env::var("HOME").unwrap_or_else(|_| "~".to_string());
            Some(
                PathBuf::from(home)
                    .join("Library")
                    .join("Application Support")
                    .join("MillionGrid")
                    .join(SETTINGS_FILE),
            )
        }
        #[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
        {
            std::env::current_exe()
                .ok()
                .and_then(|p| p.parent().map(|d| d.join(SETTINGS_FILE)))
        }
    }

    /// Load from the platform location (defaults if missing or unreadable).
    pub fn load() -> Self {
        match Self::settings_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content),
            Err(_) => Self::default(),
        }
    }

    /// Unknown keys are ignored; bad values keep their default.
    pub fn parse(content: &str) -> Self {
        let mut s = Self::default();
        for line in content.lines() {
            let line = line.trim();
            if line.starts_with('#') {
                continue;
            }
            let Some((key, val)) = line.split_once('=') else { continue };
            let key = key.trim();
            let val = val.trim();
            match key {
                "db_path" => {
                    if !val.is_empty() {
                        s.db_path = PathBuf::from(val);
                    }
                }
                "listen_addr" => {
                    if !val.is_empty() {
                        s.listen_addr = val.to_string();
                    }
                }
                "server_url" => {
                    if !val.is_empty() {
                        s.server_url = val.to_string();
                    }
                }
                "max_claim_cells" => {
                    if let Ok(n) = val.parse::<usize>()
                        && n > 0
                    {
                        s.max_claim_cells = n;
                    }
                }
                "request_timeout_secs" => {
                    if let Ok(n) = val.parse::<u64>()
                        && n > 0
                    {
                        s.request_timeout_secs = n;
                    }
                }
                "log_level" => {
                    if let Ok(level) = val.parse() {
                        s.log_level = level;
                    }
                }
                "log_to_stderr" => {
                    s.log_to_stderr = val == "true";
                }
                "cors_origin" => {
                    s.cors_origin = val.to_string();
                }
                _ => {}
            }
        }
        s
    }

    pub fn to_config_string(&self) -> String {
        format!(
            "db_path={}\n\
             listen_addr={}\n\
             server_url={}\n\
             max_claim_cells={}\n\
             request_timeout_secs={}\n\
             log_level={}\n\
             log_to_stderr={}\n\
             cors_origin={}\n",
            self.db_path.display(),
            self.listen_addr,
            self.server_url,
            self.max_claim_cells,
            self.request_timeout_secs,
            self.log_level.to_string().to_lowercase(),
            self.log_to_stderr,
            self.cors_origin,
        )
    }

    /// Write to `path`, creating its directory.
    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_config_string())
    }
}
