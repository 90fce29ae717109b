// Metadata provider capability shared by TMDB and OMDb

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{AppConfig, ProviderKind};
use crate::error::ProviderError;
use crate::models::{EpisodeMap, SeriesCandidate};

use super::omdb::OmdbClient;
use super::tmdb::TmdbClient;

/// Per-request timeout for provider calls
pub const PROVIDER_TIMEOUT: Duration = Duration::from_secs(15);

/// Namespace of the ids a provider hands out, used to find the matching
/// Wikidata item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalIdKind {
    /// `tt0903747`
    Imdb,
    /// Numeric TMDB TV id
    TmdbTv,
}

impl ExternalIdKind {
    /// Wikidata property holding this kind of id
    pub fn wikidata_property(&self) -> &'static str {
        match self {
            ExternalIdKind::Imdb => "P345",
            ExternalIdKind::TmdbTv => "P4983",
        }
    }
}

#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Short display name ("TMDB", "OMDb")
    fn name(&self) -> &'static str;

    /// Language tag the returned titles are written in
    fn native_language(&self) -> &str;

    fn id_kind(&self) -> ExternalIdKind;

    /// Series matching `query`, in the provider's relevance order
    ///
    /// No matches is an empty vector, not an error.
    async fn search(&self, query: &str) -> Result<Vec<SeriesCandidate>, ProviderError>;

    /// Every known episode of a series keyed by (season, episode)
    async fn fetch_episodes(&self, series_id: &str) -> Result<EpisodeMap, ProviderError>;
}

/// Construct the provider selected in the configuration
pub fn build_provider(config: &AppConfig) -> Result<Arc<dyn MetadataProvider>, ProviderError> {
    match config.provider {
        ProviderKind::Tmdb => {
            let key = config
                .tmdb_api_key
                .clone()
                .ok_or(ProviderError::MissingApiKey { provider: "TMDB" })?;
            Ok(Arc::new(
                TmdbClient::new(key, config.language.clone())
                    .with_base_url(config.tmdb_base_url.clone()),
            ))
        }
        ProviderKind::Omdb => {
            let key = config
                .omdb_api_key
                .clone()
                .ok_or(ProviderError::MissingApiKey { provider: "OMDb" })?;
            Ok(Arc::new(
                OmdbClient::new(key).with_base_url(config.omdb_base_url.clone()),
            ))
        }
    }
}

/// Primary subtag of a language tag, lowercased ("es-ES" -> "es")
pub fn language_base(tag: &str) -> String {
    tag.split(['-', '_'])
        .next()
        .unwrap_or(tag)
        .trim()
        .to_lowercase()
}

/// Build the shared HTTP client with the provider timeout
pub(crate) fn http_client(timeout: Duration) -> reqwest::Client {
    let builder = reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!(
            env!("CARGO_PKG_NAME"),
            "/",
            env!("CARGO_PKG_VERSION"),
            " (TV episode organizer)"
        ));
    // Tests talk to local responders only
    let builder = if cfg!(test) { builder.no_proxy() } else { builder };

    builder.build().unwrap_or_else(|_| reqwest::Client::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_provider_requires_key() {
        let config = AppConfig::default();
        let err = build_provider(&config).err().unwrap();
        assert!(err.is_configuration());

        let config = AppConfig {
            provider: ProviderKind::Omdb,
            omdb_api_key: Some("key".to_string()),
            ..AppConfig::default()
        };
        let provider = build_provider(&config).unwrap();
        assert_eq!(provider.name(), "OMDb");
        assert_eq!(provider.native_language(), "en");
        assert_eq!(provider.id_kind(), ExternalIdKind::Imdb);
    }

    #[test]
    fn test_tmdb_titles_follow_configured_language() {
        let config = AppConfig {
            tmdb_api_key: Some("key".to_string()),
            language: "pt-BR".to_string(),
            ..AppConfig::default()
        };
        let provider = build_provider(&config).unwrap();
        assert_eq!(provider.native_language(), "pt-BR");
        assert_eq!(provider.id_kind().wikidata_property(), "P4983");
    }

    #[test]
    fn test_language_base() {
        assert_eq!(language_base("es-ES"), "es");
        assert_eq!(language_base("EN"), "en");
        assert_eq!(language_base("pt_BR"), "pt");
    }
}
