//! XDG paths and the optional model-tier config file.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::Deserialize;

use crate::llm::ModelConfig;

/// Resolve the default saved-set database path using the XDG data directory.
pub fn default_db_path() -> PathBuf {
    if let Some(dirs) = ProjectDirs::from("", "", crate::APP_NAME) {
        let data_dir = dirs.data_dir();
        std::fs::create_dir_all(data_dir).ok();
        data_dir.join("setweaver.db")
    } else {
        // Fallback: current directory
        PathBuf::from("setweaver.db")
    }
}

/// Default location of the TOML config file.
pub fn default_config_path() -> PathBuf {
    if let Some(dirs) = ProjectDirs::from("", "", crate::APP_NAME) {
        dirs.config_dir().join("config.toml")
    } else {
        PathBuf::from("setweaver.toml")
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    models: RawModels,
}

#[derive(Debug, Default, Deserialize)]
struct RawModels {
    creative: Option<String>,
    mechanical: Option<String>,
}

/// Load tier model names from a TOML file, falling back to defaults for
/// anything missing. A missing or unreadable file just means defaults.
///
/// ```toml
/// [models]
/// creative = "claude-sonnet-4-5-20250929"
/// mechanical = "claude-3-5-haiku-20241022"
/// ```
pub fn load_model_config(path: &Path) -> ModelConfig {
    let mut config = ModelConfig::default();
    let Ok(text) = std::fs::read_to_string(path) else {
        return config;
    };
    match toml::from_str::<RawConfig>(&text) {
        Ok(raw) => {
            if let Some(creative) = raw.models.creative {
                config.creative = creative;
            }
            if let Some(mechanical) = raw.models.mechanical {
                config.mechanical = mechanical;
            }
        }
        Err(e) => log::warn!("Ignoring malformed config {}: {e}", path.display()),
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_config(tag: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "setweaver-test-{tag}-{}.toml",
            std::process::id()
        ));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = load_model_config(Path::new("/nonexistent/config.toml"));
        assert_eq!(config.creative, ModelConfig::default().creative);
    }

    #[test]
    fn test_partial_override() {
        let path = temp_config("partial", "[models]\nmechanical = \"some-small-model\"\n");
        let config = load_model_config(&path);
        assert_eq!(config.mechanical, "some-small-model");
        assert_eq!(config.creative, ModelConfig::default().creative);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_malformed_file_yields_defaults() {
        let path = temp_config("malformed", "not [valid toml\n");
        let config = load_model_config(&path);
        assert_eq!(config.creative, ModelConfig::default().creative);
        std::fs::remove_file(&path).ok();
    }
}
