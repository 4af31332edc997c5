// Raybridge Configuration
// raybridge.json: where to find the native library and what to do at initialization

use crate::callback::TraceLogLevel;
use crate::error::{BridgeError, BridgeResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "raybridge.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Library name handed to the platform loader ("raylib" -> libraylib.so)
    #[serde(default = "default_library")]
    pub library: String,
    /// Explicit file to open instead of searching by name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library_path: Option<PathBuf>,
    /// Versioned Linux file suffixes tried after the plain name
    #[serde(default = "default_soname_versions")]
    pub soname_versions: Vec<String>,
    #[serde(default = "default_true")]
    pub verify_layouts: bool,
    /// Install a trampoline that forwards raylib's log into tracing
    #[serde(default)]
    pub route_native_log: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub native_log_level: Option<TraceLogLevel>,
}

fn default_library() -> String {
    "raylib".to_string()
}

fn default_soname_versions() -> Vec<String> {
    vec!["550".to_string(), "5.5.0".to_string()]
}

fn default_true() -> bool {
    true
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            library: default_library(),
            library_path: None,
            soname_versions: default_soname_versions(),
            verify_layouts: true,
            route_native_log: false,
            native_log_level: None,
        }
    }
}

impl BridgeConfig {
    pub fn from_json(json: &str) -> BridgeResult<Self> {
        serde_json::from_str(json).map_err(|e| BridgeError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> BridgeResult<Self> {
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| BridgeError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn to_json_pretty(&self) -> BridgeResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| BridgeError::Config(e.to_string()))
    }

    pub fn save(&self, path: &Path) -> BridgeResult<()> {
        fs::write(path, self.to_json_pretty()?)?;
        Ok(())
    }

    /// Walk up from `dir` looking for raybridge.json
    pub fn find(dir: &Path) -> Option<PathBuf> {
        let mut current = dir.to_path_buf();
        loop {
            let candidate = current.join(CONFIG_FILE);
            if candidate.exists() {
                return Some(candidate);
            }
            if !current.pop() {
                return None;
            }
        }
    }

    /// The nearest raybridge.json above `dir`, or defaults when there is none
    pub fn discover(dir: &Path) -> BridgeResult<Self> {
        match Self::find(dir) {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }
}
