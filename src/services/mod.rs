// Services module - remote metadata and title localization

pub mod provider;

// Metadata providers
pub mod omdb;
pub mod tmdb;

// Title localization
pub mod wikidata;

pub use provider::{build_provider, MetadataProvider};
pub use wikidata::{LocalizationReport, Localizer};
