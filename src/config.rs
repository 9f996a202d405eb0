use crate::error::{Result, TranslateError};
use crate::keys::mask_key;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

/// Gemini model settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub name: String,
    pub system_instruction: String,
    pub temperature: f32,
    /// `None` leaves thinking at the model default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_budget: Option<u32>,
    pub request_timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "gemini-2.0-flash".to_string(),
            system_instruction: String::new(),
            temperature: 0.1,
            thinking_budget: Some(0),
            request_timeout_secs: 120,
        }
    }
}

impl ModelConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_keys: Vec<String>,
    pub target_lang: String,
    pub max_workers: usize,
    /// Minimum spacing between request starts, in seconds.
    pub min_request_interval: f64,
    pub max_retries: u32,
    pub backoff_factor: f64,
    pub max_chunk_chars: usize,
    pub keep_original_filename: bool,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub projects_dir: PathBuf,
    pub model: ModelConfig,
}

impl Default for Config {
    fn default() -> Self {
        let root = PathBuf::from("translator_projects");
        Self {
            api_keys: Vec::new(),
            target_lang: "vi".to_string(),
            max_workers: 4,
            min_request_interval: 0.5,
            max_retries: 5,
            backoff_factor: 2.0,
            max_chunk_chars: 1800,
            keep_original_filename: false,
            input_dir: root.join("input_files"),
            output_dir: root.join("translated_files"),
            projects_dir: root.join("projects"),
            model: ModelConfig::default(),
        }
    }
}

/// Longest accepted spacing between requests.
const MAX_REQUEST_INTERVAL_SECS: f64 = 3600.0;

impl Config {
    /// Defaults overlaid with the config file, then `.env` and the environment.
    ///
    /// A config file that fails to parse is skipped with a warning.
    pub fn load() -> Result<Self> {
        let mut config = match Self::load_file() {
            Ok(config) => config,
            Err(TranslateError::Toml(e)) => {
                warn!("Ignoring unreadable config file: {}", e);
                Self::default()
            }
            Err(e) => return Err(e),
        };

        // A local .env may carry the keys
        let _ = dotenvy::dotenv();

        config.apply_env();
        Ok(config)
    }

    /// Defaults overlaid with the config file only. Used when the result
    /// will be saved back, so environment keys never end up on disk.
    /// Fails on a file that does not parse so it is never overwritten.
    pub fn load_file() -> Result<Self> {
        match Self::config_file_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    /// Defaults overlaid with the TOML file at `path`, if it exists.
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let config = toml::from_str::<Config>(&contents)?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Apply environment variable overrides on top of the current values.
    pub fn apply_env(&mut self) {
        if let Some(raw) = std::env::var("GEMINI_API_KEYS")
            .ok()
            .or_else(|| std::env::var("GEMINI_API_KEY").ok())
        {
            let keys = parse_api_keys(&raw);
            if !keys.is_empty() {
                self.api_keys = keys;
            }
        }
        if let Ok(lang) = std::env::var("GEMTRANSLATE_TARGET_LANG") {
            if !lang.trim().is_empty() {
                self.target_lang = lang.trim().to_string();
            }
        }
        if let Ok(workers) = std::env::var("GEMTRANSLATE_MAX_WORKERS") {
            match workers.parse() {
                Ok(w) => self.max_workers = w,
                Err(_) => warn!("Ignoring GEMTRANSLATE_MAX_WORKERS={:?}", workers),
            }
        }
        if let Ok(model) = std::env::var("GEMTRANSLATE_MODEL") {
            if !model.trim().is_empty() {
                self.model.name = model.trim().to_string();
            }
        }
        if let Ok(dir) = std::env::var("GEMTRANSLATE_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(dir);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.api_keys.is_empty() {
            return Err(TranslateError::NoApiKeys);
        }
        if self.max_workers == 0 {
            return Err(TranslateError::Config(
                "max_workers must be greater than 0".to_string(),
            ));
        }
        if self.max_retries == 0 {
            return Err(TranslateError::Config(
                "max_retries must be greater than 0".to_string(),
            ));
        }
        if self.max_chunk_chars == 0 {
            return Err(TranslateError::Config(
                "max_chunk_chars must be greater than 0".to_string(),
            ));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(TranslateError::Config(
                "backoff_factor must be at least 1.0".to_string(),
            ));
        }
        if !self.min_request_interval.is_finite()
            || !(0.0..=MAX_REQUEST_INTERVAL_SECS).contains(&self.min_request_interval)
        {
            return Err(TranslateError::Config(format!(
                "min_request_interval must be between 0 and {} seconds",
                MAX_REQUEST_INTERVAL_SECS
            )));
        }
        Ok(())
    }

    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::config_file_path().ok_or_else(|| {
            TranslateError::Config("No config directory on this platform".to_string())
        })?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn config_file_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("gemtranslate").join("config.toml"))
    }

    pub fn min_request_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.min_request_interval.clamp(0.0, MAX_REQUEST_INTERVAL_SECS))
            .unwrap_or(Duration::ZERO)
    }

    /// Append keys from a comma-separated string, skipping ones already present.
    pub fn add_api_keys(&mut self, raw: &str) -> usize {
        let mut added = 0;
        for key in parse_api_keys(raw) {
            if !self.api_keys.contains(&key) {
                debug!("Adding API key {}", mask_key(&key));
                self.api_keys.push(key);
                added += 1;
            }
        }
        added
    }

    /// Remove keys by zero-based index. Out-of-range indices are ignored.
    pub fn remove_api_keys(&mut self, indices: &[usize]) -> Vec<String> {
        let mut sorted: Vec<usize> = indices
            .iter()
            .copied()
            .filter(|&i| i < self.api_keys.len())
            .collect();
        sorted.sort_unstable();
        sorted.dedup();

        sorted
            .into_iter()
            .rev()
            .map(|i| self.api_keys.remove(i))
            .collect()
    }

    /// Move the key at `index` to the front of the list.
    pub fn set_primary_key(&mut self, index: usize) -> Result<()> {
        if index >= self.api_keys.len() {
            return Err(TranslateError::Config(format!(
                "No API key #{} (have {})",
                index + 1,
                self.api_keys.len()
            )));
        }
        let key = self.api_keys.remove(index);
        self.api_keys.insert(0, key);
        Ok(())
    }
}

/// Split a comma-separated key list, trimming blanks and dropping duplicates.
pub fn parse_api_keys(raw: &str) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for key in raw.split(',').map(str::trim).filter(|k| !k.is_empty()) {
        if !keys.iter().any(|k| k == key) {
            keys.push(key.to_string());
        }
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_api_keys() {
        assert_eq!(
            parse_api_keys(" key1, key2 ,,key1,key3 "),
            vec!["key1", "key2", "key3"]
        );
        assert!(parse_api_keys(" , ").is_empty());
        assert_eq!(parse_api_keys("single"), vec!["single"]);
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.target_lang, "vi");
        assert_eq!(config.max_workers, 4);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.max_chunk_chars, 1800);
        assert_eq!(config.model.name, "gemini-2.0-flash");
        assert_eq!(config.min_request_interval(), Duration::from_millis(500));
    }

    #[test]
    fn test_validate_missing_api_key() {
        let config = Config::default();
        assert!(matches!(config.validate(), Err(TranslateError::NoApiKeys)));
    }

    #[test]
    fn test_validate_with_api_key() {
        let mut config = Config::default();
        config.api_keys = vec!["test-key".to_string()];
        assert!(config.validate().is_ok());

        config.max_workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_request_interval() {
        let mut config = Config::default();
        config.api_keys = vec!["test-key".to_string()];

        for bad in [f64::INFINITY, f64::NAN, -1.0, 1e12] {
            config.min_request_interval = bad;
            assert!(
                matches!(config.validate(), Err(TranslateError::Config(_))),
                "{} should be rejected",
                bad
            );
            // Never panics even when unvalidated
            let _ = config.min_request_interval();
        }

        config.min_request_interval = 0.0;
        assert!(config.validate().is_ok());
        assert_eq!(config.min_request_interval(), Duration::ZERO);
    }

    #[test]
    fn test_broken_config_file_is_an_error_and_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let broken = "api_keys = [\"k1\"\ntarget_lang = \"ja\"\n";
        std::fs::write(&path, broken).unwrap();

        let result = Config::load_from(&path);
        assert!(matches!(result, Err(TranslateError::Toml(_))));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), broken);
    }

    #[test]
    fn test_load_from_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.target_lang, "vi");
        assert!(config.api_keys.is_empty());
    }

    #[test]
    fn test_key_management() {
        let mut config = Config::default();
        assert_eq!(config.add_api_keys("a,b"), 2);
        assert_eq!(config.add_api_keys("b,c"), 1);
        assert_eq!(config.api_keys, vec!["a", "b", "c"]);

        config.set_primary_key(2).unwrap();
        assert_eq!(config.api_keys, vec!["c", "a", "b"]);
        assert!(config.set_primary_key(9).is_err());

        let removed = config.remove_api_keys(&[0, 2, 7, 0]);
        assert_eq!(removed, vec!["b", "c"]);
        assert_eq!(config.api_keys, vec!["a"]);
    }

    #[test]
    fn test_toml_roundtrip_with_partial_file() {
        let config: Config = toml::from_str(
            r#"
            api_keys = ["k1"]
            target_lang = "ja"

            [model]
            name = "gemini-1.5-pro"
            "#,
        )
        .unwrap();
        assert_eq!(config.target_lang, "ja");
        assert_eq!(config.model.name, "gemini-1.5-pro");
        assert_eq!(config.model.temperature, 0.1);
        assert_eq!(config.max_workers, 4);
    }

    #[test]
    fn test_save_to() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.api_keys = vec!["k1".to_string()];
        config.save_to(&path).unwrap();

        let loaded: Config = toml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded.api_keys, vec!["k1"]);
    }
}
