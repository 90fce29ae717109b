// OMDb metadata provider service
// API Documentation: https://www.omdbapi.com/
//
// OMDb only publishes English titles and reports errors inside a 200 body.

use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::LazyLock;

use crate::config::OMDB_API_BASE;
use crate::error::ProviderError;
use crate::models::{EpisodeMap, EpisodeRecord, SeriesCandidate};

use super::provider::{http_client, ExternalIdKind, MetadataProvider, PROVIDER_TIMEOUT};

const PROVIDER: &str = "OMDb";

static RE_TRAILING_YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*?)\s*\((\d{4})\)\s*$").unwrap());
static RE_LEADING_YEAR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d{4})").unwrap());

/// OMDb API client
pub struct OmdbClient {
    client: Client,
    api_key: String,
    base_url: String,
}

/// Fields shared by every OMDb response
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "Response")]
    response: Option<String>,
    #[serde(rename = "Error")]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    #[serde(rename = "Search", default)]
    pub search: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
pub struct SearchItem {
    #[serde(rename = "Title")]
    pub title: String,
    #[serde(rename = "Year")]
    pub year: Option<String>,
    #[serde(rename = "imdbID")]
    pub imdb_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SeriesDetails {
    #[serde(rename = "Title")]
    pub title: Option<String>,
    #[serde(rename = "totalSeasons")]
    pub total_seasons: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SeasonResponse {
    #[serde(rename = "Episodes", default)]
    pub episodes: Vec<SeasonEpisode>,
}

#[derive(Debug, Deserialize)]
pub struct SeasonEpisode {
    #[serde(rename = "Title")]
    pub title: Option<String>,
    #[serde(rename = "Episode")]
    pub episode: String,
    #[serde(rename = "imdbID")]
    pub imdb_id: Option<String>,
}

/// What an OMDb `Response:"False"` body means
enum OmdbFailure {
    NotFound,
    /// Search term too broad; OMDb returns no list at all
    TooManyResults,
    Unauthorized(String),
    BadId(String),
    Other(String),
}

fn classify_error(message: &str) -> OmdbFailure {
    let lower = message.to_lowercase();
    if lower.contains("not found") {
        OmdbFailure::NotFound
    } else if lower.contains("too many results") {
        OmdbFailure::TooManyResults
    } else if lower.contains("api key") {
        OmdbFailure::Unauthorized(message.to_string())
    } else if lower.contains("incorrect imdb id") {
        OmdbFailure::BadId(message.to_string())
    } else {
        OmdbFailure::Other(message.to_string())
    }
}

/// Split "Title (2008)" into ("Title", Some(2008))
fn split_query_year(query: &str) -> (&str, Option<i32>) {
    match RE_TRAILING_YEAR.captures(query) {
        Some(caps) => {
            let title = caps.get(1).map(|m| m.as_str()).unwrap_or(query);
            let year = caps.get(2).and_then(|m| m.as_str().parse().ok());
            (title, year)
        }
        None => (query, None),
    }
}

/// "N/A" and blank values count as absent
fn present(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && v != "N/A")
}

impl OmdbClient {
    pub fn new(api_key: String) -> Self {
        Self {
            client: http_client(PROVIDER_TIMEOUT),
            api_key,
            base_url: OMDB_API_BASE.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    /// Issue one request and decode the body, surfacing in-body errors
    async fn request<T: DeserializeOwned>(&self, params: &str) -> Result<Result<T, OmdbFailure>, ProviderError> {
        let separator = if self.base_url.contains('?') { '&' } else { '?' };
        let url = format!(
            "{}{}apikey={}&{}",
            self.base_url,
            separator,
            urlencoding::encode(&self.api_key),
            params
        );

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| ProviderError::from_transport(PROVIDER, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::from_transport(PROVIDER, e))?;

        // OMDb answers a bad key with 401 and the same JSON error body
        let envelope: Option<Envelope> = serde_json::from_str(&body).ok();
        if let Some(Envelope {
            response: Some(flag),
            error,
        }) = &envelope
        {
            if flag.eq_ignore_ascii_case("false") {
                let message = error.clone().unwrap_or_else(|| "Unknown OMDb error".to_string());
                tracing::debug!("OMDb error response: {}", message);
                return Ok(Err(classify_error(&message)));
            }
        }

        if status == StatusCode::UNAUTHORIZED {
            return Err(ProviderError::Unauthorized {
                provider: PROVIDER,
                message: status.to_string(),
            });
        }
        if !status.is_success() {
            tracing::warn!("OMDb request failed: {}", status);
            return Err(ProviderError::unavailable(PROVIDER, format!("HTTP {}", status)));
        }

        serde_json::from_str(&body)
            .map(Ok)
            .map_err(|e| ProviderError::unavailable(PROVIDER, format!("bad response: {}", e)))
    }

    async fn season_episodes(
        &self,
        imdb_id: &str,
        season: u32,
    ) -> Result<Option<SeasonResponse>, ProviderError> {
        let params = format!("i={}&Season={}", urlencoding::encode(imdb_id), season);
        match self.request::<SeasonResponse>(&params).await? {
            Ok(data) => Ok(Some(data)),
            Err(OmdbFailure::NotFound) => Ok(None),
            Err(OmdbFailure::Unauthorized(message)) => Err(ProviderError::Unauthorized {
                provider: PROVIDER,
                message,
            }),
            Err(OmdbFailure::BadId(_)) => Err(ProviderError::SeriesNotFound {
                provider: PROVIDER,
                series_id: imdb_id.to_string(),
            }),
            Err(OmdbFailure::TooManyResults) => Err(ProviderError::unavailable(
                PROVIDER,
                "unexpected search response for a season request",
            )),
            Err(OmdbFailure::Other(message)) => {
                tracing::warn!("OMDb season {} of {} failed: {}", season, imdb_id, message);
                Err(ProviderError::unavailable(PROVIDER, message))
            }
        }
    }
}

#[async_trait]
impl MetadataProvider for OmdbClient {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn native_language(&self) -> &str {
        "en"
    }

    fn id_kind(&self) -> ExternalIdKind {
        ExternalIdKind::Imdb
    }

    async fn search(&self, query: &str) -> Result<Vec<SeriesCandidate>, ProviderError> {
        let (title, year) = split_query_year(query.trim());
        let mut params = format!("s={}&type=series", urlencoding::encode(title));
        if let Some(y) = year {
            params.push_str(&format!("&y={}", y));
        }

        tracing::debug!("OMDb search: {}", query);
        match self.request::<SearchResponse>(&params).await? {
            Ok(data) => Ok(data
                .search
                .into_iter()
                .filter(|item| !item.imdb_id.is_empty())
                .map(|item| SeriesCandidate {
                    external_id: item.imdb_id,
                    first_air_year: item
                        .year
                        .as_deref()
                        .and_then(|y| RE_LEADING_YEAR.captures(y))
                        .and_then(|c| c[1].parse().ok()),
                    display_title: item.title,
                    original_title: None,
                    overview: None,
                })
                .collect()),
            Err(OmdbFailure::NotFound) => Ok(Vec::new()),
            Err(OmdbFailure::TooManyResults) => {
                tracing::info!("OMDb search for '{}' is too broad", query);
                Ok(Vec::new())
            }
            Err(OmdbFailure::Unauthorized(message)) => Err(ProviderError::Unauthorized {
                provider: PROVIDER,
                message,
            }),
            Err(OmdbFailure::BadId(message)) | Err(OmdbFailure::Other(message)) => {
                tracing::warn!("OMDb search for '{}' failed: {}", query, message);
                Err(ProviderError::unavailable(PROVIDER, message))
            }
        }
    }

    async fn fetch_episodes(&self, series_id: &str) -> Result<EpisodeMap, ProviderError> {
        let params = format!("i={}&type=series", urlencoding::encode(series_id));
        let details = match self.request::<SeriesDetails>(&params).await? {
            Ok(details) => details,
            Err(OmdbFailure::Unauthorized(message)) => {
                return Err(ProviderError::Unauthorized {
                    provider: PROVIDER,
                    message,
                })
            }
            Err(OmdbFailure::NotFound) | Err(OmdbFailure::BadId(_)) => {
                return Err(ProviderError::SeriesNotFound {
                    provider: PROVIDER,
                    series_id: series_id.to_string(),
                })
            }
            Err(OmdbFailure::TooManyResults) => {
                return Err(ProviderError::unavailable(
                    PROVIDER,
                    "unexpected search response for a series request",
                ))
            }
            Err(OmdbFailure::Other(message)) => {
                return Err(ProviderError::unavailable(PROVIDER, message))
            }
        };

        let total_seasons: u32 = present(details.total_seasons)
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        tracing::info!(
            "Fetching {} season(s) of '{}' from OMDb",
            total_seasons,
            present(details.title).unwrap_or_else(|| series_id.to_string())
        );

        let mut episodes = EpisodeMap::new();
        for season in 1..=total_seasons {
            let Some(data) = self.season_episodes(series_id, season).await? else {
                tracing::debug!("OMDb season {} not available, skipping", season);
                continue;
            };

            for item in data.episodes {
                let Ok(episode) = item.episode.trim().parse::<u32>() else {
                    continue;
                };
                episodes.insert(
                    (season, episode),
                    EpisodeRecord {
                        season,
                        episode,
                        title: present(item.title).unwrap_or_default(),
                        source_language: "en".to_string(),
                        external_id: present(item.imdb_id),
                    },
                );
            }
        }

        Ok(episodes)
    }
}
