use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::live::ReconnectPolicy;

fn default_per_page() -> u32 {
    25
}

fn default_reconnect_initial_ms() -> u64 {
    1_000
}

fn default_reconnect_max_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub ws_url: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
    #[serde(default = "default_reconnect_initial_ms")]
    pub reconnect_initial_ms: u64,
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
    #[serde(default)]
    pub cache_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            ws_url: None,
            token: None,
            per_page: default_per_page(),
            reconnect_initial_ms: default_reconnect_initial_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
            cache_path: None,
        }
    }
}

impl Settings {
    pub fn default_path() -> Option<PathBuf> {
        let proj = ProjectDirs::from("com", "example", "EngageLive")?;
        Some(proj.config_dir().join("engage-live.toml"))
    }

    /// Load settings from `path`, or from the platform config dir when `None`.
    /// A missing file yields defaults; a file that does not parse is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::default_path() {
                Some(p) => p,
                None => return Ok(Self::default()),
            },
        };
        match fs::read_to_string(&path) {
            Ok(text) => toml::from_str::<Settings>(&text)
                .map_err(|e| Error::Config(format!("{}: {e}", path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("config file {} not found; using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, path: Option<&Path>) -> Result<()> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path().ok_or_else(|| Error::Config("no config dir".into()))?,
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let text = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        fs::write(path, text)?;
        Ok(())
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            initial: Duration::from_millis(self.reconnect_initial_ms.max(1)),
            max: Duration::from_millis(self.reconnect_max_ms.max(self.reconnect_initial_ms)),
        }
    }

    pub fn websocket_url(&self) -> Result<url::Url> {
        match self.ws_url.as_deref().filter(|u| !u.is_empty()) {
            Some(ws) => Ok(crate::utils::with_token(url::Url::parse(ws)?, self.token.as_deref())),
            None => {
                if self.base_url.is_empty() {
                    return Err(Error::Config("base_url is not set".into()));
                }
                crate::utils::websocket_url(&self.base_url, self.token.as_deref())
            }
        }
    }
}
