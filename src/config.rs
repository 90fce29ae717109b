// Configuration module for episode-organizer
// Layers the TOML config file, environment variables and built-in defaults

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::models::TransferMode;
use crate::scanner::VIDEO_EXTENSIONS;

const APP_NAME: &str = "episode-organizer";
const CONFIG_FILENAME: &str = "config.toml";

pub const DEFAULT_OUTPUT_FOLDER: &str = "_Organized_Output";
pub const DEFAULT_LANGUAGE: &str = "es-ES";
pub const TMDB_API_BASE: &str = "https://api.themoviedb.org/3";
pub const OMDB_API_BASE: &str = "https://www.omdbapi.com/";
pub const WIKIDATA_SPARQL_URL: &str = "https://query.wikidata.org/sparql";

/// Which metadata service answers searches and episode lists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Tmdb,
    Omdb,
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tmdb" => Ok(ProviderKind::Tmdb),
            "omdb" => Ok(ProviderKind::Omdb),
            other => Err(format!("unknown provider '{}'", other)),
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::Tmdb => write!(f, "tmdb"),
            ProviderKind::Omdb => write!(f, "omdb"),
        }
    }
}

/// TOML configuration file structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub metadata: MetadataConfig,
    pub output: OutputConfig,
    pub scanner: ScannerConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    /// "tmdb" (default) or "omdb"
    pub provider: Option<String>,

    /// Target language tag for titles, e.g. "es-ES"
    pub language: Option<String>,

    pub tmdb_api_key: Option<String>,
    pub omdb_api_key: Option<String>,

    /// Endpoint overrides (self-hosted mirrors, tests)
    pub tmdb_base_url: Option<String>,
    pub omdb_base_url: Option<String>,
    pub wikidata_endpoint: Option<String>,

    /// Translate titles through Wikidata when the provider's language differs
    pub localize: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// "copy" or "hardlink"
    pub mode: Option<String>,

    /// Absolute destination root; defaults to `<source>/<folder_name>`
    pub destination: Option<PathBuf>,

    pub folder_name: Option<String>,
}

/// Scanner configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Video file extensions to scan (lowercase, without dots)
    pub video_extensions: Vec<String>,

    /// Folders that are never descended into
    pub excluded_dirs: Vec<PathBuf>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            video_extensions: VIDEO_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            excluded_dirs: Vec::new(),
        }
    }
}

/// Application configuration - combines TOML file with environment overrides
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Where config.toml was looked up
    pub config_dir: PathBuf,

    pub provider: ProviderKind,
    pub language: String,
    pub tmdb_api_key: Option<String>,
    pub omdb_api_key: Option<String>,
    pub tmdb_base_url: String,
    pub omdb_base_url: String,
    pub wikidata_endpoint: String,
    pub localize: bool,

    pub mode: TransferMode,
    pub destination: Option<PathBuf>,
    pub output_folder_name: String,

    pub scanner: ScannerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            config_dir: PathBuf::from("."),
            provider: ProviderKind::Tmdb,
            language: DEFAULT_LANGUAGE.to_string(),
            tmdb_api_key: None,
            omdb_api_key: None,
            tmdb_base_url: TMDB_API_BASE.to_string(),
            omdb_base_url: OMDB_API_BASE.to_string(),
            wikidata_endpoint: WIKIDATA_SPARQL_URL.to_string(),
            localize: true,
            mode: TransferMode::Copy,
            destination: None,
            output_folder_name: DEFAULT_OUTPUT_FOLDER.to_string(),
            scanner: ScannerConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from TOML file and environment
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. TOML config file
    /// 3. Default values
    pub fn load() -> Result<Self, ConfigError> {
        let config_dir = Self::find_config_dir();
        let config_file = Self::load_config_file(&config_dir);

        let mut config = Self::build(config_file, |key| std::env::var(key).ok())?;
        config.config_dir = config_dir;
        Ok(config)
    }

    /// Find the config directory (for locating config.toml)
    fn find_config_dir() -> PathBuf {
        if let Ok(path) = std::env::var("EPISODE_ORGANIZER_CONFIG_DIR") {
            return PathBuf::from(path);
        }

        if let Some(dir) = dirs::config_dir() {
            return dir.join(APP_NAME);
        }

        std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
    }

    /// Load and parse the TOML config file
    ///
    /// A missing or unreadable file falls back to defaults.
    fn load_config_file(config_dir: &Path) -> ConfigFile {
        let config_path = config_dir.join(CONFIG_FILENAME);

        if !config_path.exists() {
            tracing::debug!(
                "No config file found at {}, using defaults",
                config_path.display()
            );
            return ConfigFile::default();
        }

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded configuration from {}", config_path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to parse config file {}: {}. Using defaults.",
                        config_path.display(),
                        e
                    );
                    ConfigFile::default()
                }
            },
            Err(e) => {
                tracing::warn!(
                    "Failed to read config file {}: {}. Using defaults.",
                    config_path.display(),
                    e
                );
                ConfigFile::default()
            }
        }
    }

    /// Build configuration from a config file, with `env` supplying overrides
    pub fn build(
        config_file: ConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let metadata = config_file.metadata;
        let output = config_file.output;

        // Provider: env > config > default
        let provider = match env("EPISODE_ORGANIZER_PROVIDER").or(metadata.provider) {
            Some(value) => value.parse::<ProviderKind>().map_err(|_| ConfigError::InvalidValue {
                key: "provider",
                value,
            })?,
            None => defaults.provider,
        };

        let language = env("EPISODE_ORGANIZER_LANGUAGE")
            .or(metadata.language)
            .filter(|l| !l.trim().is_empty())
            .unwrap_or(defaults.language);

        let mode = match env("EPISODE_ORGANIZER_MODE").or(output.mode) {
            Some(value) => value.parse::<TransferMode>().map_err(|_| ConfigError::InvalidValue {
                key: "mode",
                value,
            })?,
            None => defaults.mode,
        };

        // API keys: env > config; blank keys count as missing
        let tmdb_api_key = env("TMDB_API_KEY")
            .or(metadata.tmdb_api_key)
            .filter(|k| !k.trim().is_empty());
        let omdb_api_key = env("OMDB_API_KEY")
            .or(metadata.omdb_api_key)
            .filter(|k| !k.trim().is_empty());

        let mut scanner = config_file.scanner;
        scanner.video_extensions = scanner
            .video_extensions
            .into_iter()
            .map(|e| e.trim_start_matches('.').to_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        if scanner.video_extensions.is_empty() {
            scanner.video_extensions = defaults.scanner.video_extensions;
        }

        Ok(Self {
            config_dir: defaults.config_dir,
            provider,
            language,
            tmdb_api_key,
            omdb_api_key,
            tmdb_base_url: metadata.tmdb_base_url.unwrap_or(defaults.tmdb_base_url),
            omdb_base_url: metadata.omdb_base_url.unwrap_or(defaults.omdb_base_url),
            wikidata_endpoint: metadata
                .wikidata_endpoint
                .unwrap_or(defaults.wikidata_endpoint),
            localize: metadata.localize.unwrap_or(true),
            mode,
            destination: output.destination,
            output_folder_name: output
                .folder_name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or(defaults.output_folder_name),
            scanner,
        })
    }

    /// Destination root for a given source directory
    pub fn destination_for(&self, source: &Path) -> PathBuf {
        self.destination
            .clone()
            .unwrap_or_else(|| source.join(&self.output_folder_name))
    }

    /// Log configuration status
    pub fn log_config(&self) {
        tracing::info!("Configuration directory: {}", self.config_dir.display());
        tracing::info!(
            "Metadata provider: {} (target language {})",
            self.provider,
            self.language
        );

        let key_present = match self.provider {
            ProviderKind::Tmdb => self.tmdb_api_key.is_some(),
            ProviderKind::Omdb => self.omdb_api_key.is_some(),
        };
        if !key_present {
            tracing::warn!(
                "No API key configured for {}. Hint: add it to config.toml or set {}",
                self.provider,
                match self.provider {
                    ProviderKind::Tmdb => "TMDB_API_KEY",
                    ProviderKind::Omdb => "OMDB_API_KEY",
                }
            );
        }

        if self.localize {
            tracing::debug!("Wikidata localization: {}", self.wikidata_endpoint);
        } else {
            tracing::info!("Wikidata localization: disabled");
        }
        tracing::debug!("Transfer mode: {}", self.mode);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_default_config_file() {
        let config = AppConfig::build(ConfigFile::default(), no_env).unwrap();
        assert_eq!(config.provider, ProviderKind::Tmdb);
        assert_eq!(config.language, "es-ES");
        assert_eq!(config.mode, TransferMode::Copy);
        assert!(config.tmdb_api_key.is_none());
        assert!(config.localize);
        assert!(config.scanner.video_extensions.contains(&"mkv".to_string()));
    }

    #[test]
    fn test_parse_config_toml() {
        let toml_str = r#"
[metadata]
provider = "omdb"
language = "pt-BR"
omdb_api_key = "test_key"
localize = false

[output]
mode = "hardlink"
folder_name = "Sorted"

[scanner]
video_extensions = [".MKV", "mp4"]
excluded_dirs = ["/media/junk"]
"#;
        let file: ConfigFile = toml::from_str(toml_str).unwrap();
        let config = AppConfig::build(file, no_env).unwrap();
        assert_eq!(config.provider, ProviderKind::Omdb);
        assert_eq!(config.language, "pt-BR");
        assert_eq!(config.omdb_api_key, Some("test_key".to_string()));
        assert!(!config.localize);
        assert_eq!(config.mode, TransferMode::HardLink);
        assert_eq!(config.scanner.video_extensions, vec!["mkv", "mp4"]);
        assert_eq!(
            config.scanner.excluded_dirs,
            vec![PathBuf::from("/media/junk")]
        );
        assert_eq!(
            config.destination_for(Path::new("/media/show")),
            PathBuf::from("/media/show/Sorted")
        );
    }

    #[test]
    fn test_env_overrides_file() {
        let file: ConfigFile = toml::from_str(
            r#"
[metadata]
provider = "omdb"
tmdb_api_key = "from_file"
"#,
        )
        .unwrap();

        let env: HashMap<&str, &str> = [
            ("EPISODE_ORGANIZER_PROVIDER", "tmdb"),
            ("TMDB_API_KEY", "from_env"),
            ("EPISODE_ORGANIZER_MODE", "link"),
        ]
        .into_iter()
        .collect();

        let config =
            AppConfig::build(file, |key| env.get(key).map(|v| v.to_string())).unwrap();
        assert_eq!(config.provider, ProviderKind::Tmdb);
        assert_eq!(config.tmdb_api_key, Some("from_env".to_string()));
        assert_eq!(config.mode, TransferMode::HardLink);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let file: ConfigFile = toml::from_str("[metadata]\nprovider = \"imdb\"\n").unwrap();
        let err = AppConfig::build(file, no_env).unwrap_err();
        assert!(err.to_string().contains("provider"));

        let blank: ConfigFile = toml::from_str("[metadata]\ntmdb_api_key = \"  \"\n").unwrap();
        let config = AppConfig::build(blank, no_env).unwrap();
        assert!(config.tmdb_api_key.is_none());
    }

    #[test]
    fn test_default_destination() {
        let config = AppConfig::default();
        assert_eq!(
            config.destination_for(Path::new("/downloads/show")),
            PathBuf::from("/downloads/show/_Organized_Output")
        );
    }
}
