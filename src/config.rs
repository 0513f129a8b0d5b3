use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use anyhow::{Context, Result, anyhow};

pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl Config {
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config = serde_json::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Write `key` into the config file at `path`, keeping its other fields.
    ///
    /// A file that exists but can't be parsed is left alone and reported as an
    /// error instead of being replaced.
    pub fn store_api_key(path: &Path, key: &str) -> Result<Self> {
        let mut config = Self::load_from(path)
            .with_context(|| format!("refusing to overwrite unreadable {}", path.display()))?;
        config.api_key = Some(key.to_string());
        config.save_to(path)?;
        Ok(config)
    }

    /// `GEMINI_API_KEY`, if set to something non-blank.
    pub fn env_api_key() -> Option<String> {
        std::env::var(API_KEY_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
    }

    /// `env` first, then the config file. Blank values don't count.
    pub fn resolve_api_key(&self, env: Option<&str>) -> Option<String> {
        pick_api_key(env, self.api_key.as_deref())
    }

    /// Where the resolved key comes from, for the status line.
    pub fn api_key_source(&self, env: Option<&str>) -> Option<&'static str> {
        if env.is_some_and(|k| !k.trim().is_empty()) {
            Some("env")
        } else if self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty()) {
            Some("config")
        } else {
            None
        }
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("gemini-chat").join("config.json"))
    }
}

fn pick_api_key(env: Option<&str>, stored: Option<&str>) -> Option<String> {
    env.map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .or_else(|| {
            stored
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("nope.json")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn save_creates_directories_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = Config {
            api_key: Some("abc".to_string()),
            model: Some("gemini-1.5-pro".to_string()),
            base_url: None,
        };

        config.save_to(&path).unwrap();
        let written = fs::read_to_string(&path).unwrap();
        assert!(!written.contains("base_url"));

        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn partial_file_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "model": "gemini-pro" }"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.model.as_deref(), Some("gemini-pro"));
        assert!(config.api_key.is_none());
    }

    #[test]
    fn broken_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "not json").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn storing_a_key_keeps_other_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "model": "gemini-pro", "api_key": "old" }"#).unwrap();

        let config = Config::store_api_key(&path, "new-key").unwrap();

        assert_eq!(config.api_key.as_deref(), Some("new-key"));
        assert_eq!(config.model.as_deref(), Some("gemini-pro"));
        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn storing_a_key_never_clobbers_a_broken_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "not json").unwrap();

        let err = Config::store_api_key(&path, "new-key").unwrap_err();

        assert!(format!("{err:#}").contains("refusing to overwrite"));
        assert_eq!(fs::read_to_string(&path).unwrap(), "not json");
    }

    #[test]
    fn environment_wins_over_file() {
        assert_eq!(
            pick_api_key(Some("from-env"), Some("from-file")),
            Some("from-env".to_string())
        );
        assert_eq!(
            pick_api_key(Some("   "), Some(" from-file ")),
            Some("from-file".to_string())
        );
        assert_eq!(pick_api_key(None, Some("")), None);
        assert_eq!(pick_api_key(None, None), None);

        let config = Config {
            api_key: Some("from-file".to_string()),
            ..Config::default()
        };
        assert_eq!(config.api_key_source(Some("from-env")), Some("env"));
        assert_eq!(config.api_key_source(Some(" ")), Some("config"));
        assert_eq!(Config::default().api_key_source(None), None);
    }
}
