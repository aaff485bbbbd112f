use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use serde_aux::field_attributes::deserialize_number_from_string;

use crate::{
    domain::source_spec::{validate_sources, SourceSpec},
    error::ConfigError,
};

#[derive(Deserialize, Clone, Debug)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub crawl: CrawlSettings,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ApplicationSettings {
    pub sources_file: PathBuf,
    pub output_dir: PathBuf,
}

/// Run-level limits. Every number may come from the environment as a string.
#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CrawlSettings {
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub time_budget_secs: u64,
    /// 0 means no cap.
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub max_items: usize,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub concurrent_requests: usize,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub download_delay_ms: u64,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub download_timeout_secs: u64,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub min_per_source: usize,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        CrawlSettings {
            time_budget_secs: 300,
            max_items: 0,
            concurrent_requests: 8,
            download_delay_ms: 500,
            download_timeout_secs: 30,
            min_per_source: 0,
        }
    }
}

impl CrawlSettings {
    pub fn time_budget(&self) -> Duration {
        Duration::from_secs(self.time_budget_secs)
    }

    pub fn item_cap(&self) -> Option<usize> {
        match self.max_items {
            0 => None,
            cap => Some(cap),
        }
    }

    pub fn download_delay(&self) -> Duration {
        Duration::from_millis(self.download_delay_ms)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn concurrency(&self) -> usize {
        self.concurrent_requests.max(1)
    }
}

/// Reads `configuration/base.yaml`, then `configuration/{APP_ENVIRONMENT}.yaml`
/// if present, then `APP_` environment variables (`APP_CRAWL__MAX_ITEMS=200`).
pub fn get_configuration() -> Result<Settings, ConfigError> {
    let defaults = CrawlSettings::default();
    let mut builder = Config::builder()
        .set_default("application.sources_file", "configuration/sources.yaml")?
        .set_default("application.output_dir", "output")?
        .set_default("crawl.time_budget_secs", defaults.time_budget_secs)?
        .set_default("crawl.max_items", defaults.max_items as u64)?
        .set_default("crawl.concurrent_requests", defaults.concurrent_requests as u64)?
        .set_default("crawl.download_delay_ms", defaults.download_delay_ms)?
        .set_default("crawl.download_timeout_secs", defaults.download_timeout_secs)?
        .set_default("crawl.min_per_source", defaults.min_per_source as u64)?
        .add_source(File::with_name("configuration/base").required(false));

    if let Ok(environment) = std::env::var("APP_ENVIRONMENT") {
        builder = builder.add_source(
            File::with_name(&format!("configuration/{}", environment.to_lowercase()))
                .required(false),
        );
    }

    let settings = builder
        .add_source(
            Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    Ok(settings.try_deserialize::<Settings>()?)
}

#[derive(Deserialize)]
struct SourcesFile {
    #[serde(default)]
    sources: Vec<SourceSpec>,
}

/// Loads and validates the sources file. Selector chains are compiled here,
/// so a bad selector stops the run before anything is fetched.
pub fn load_sources(path: &Path) -> Result<Vec<SourceSpec>, ConfigError> {
    let file = Config::builder().add_source(File::from(path)).build()?;
    into_sources(file)
}

/// Same as [`load_sources`] for YAML already in memory.
pub fn parse_sources(yaml: &str) -> Result<Vec<SourceSpec>, ConfigError> {
    let file = Config::builder()
        .add_source(File::from_str(yaml, FileFormat::Yaml))
        .build()?;
    into_sources(file)
}

fn into_sources(file: Config) -> Result<Vec<SourceSpec>, ConfigError> {
    let SourcesFile { sources } = file.try_deserialize()?;
    if sources.is_empty() {
        return Err(ConfigError::NoSources);
    }
    validate_sources(&sources)?;
    Ok(sources)
}
