//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{num::NonZeroU32, path::PathBuf, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

mod cli;

pub use cli::{CliArgs, Command, LikeArgs, Overrides, SearchArgs};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "shelfsync";
const ENV_PREFIX: &str = "SHELFSYNC";
pub(crate) const DEFAULT_SEARCH_DEBOUNCE_MS: u64 = 300;
pub(crate) const DEFAULT_STALE_TIME_MS: u64 = 30_000;
pub(crate) const DEFAULT_COMMENT_PAGE_SIZE: u32 = 20;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub sync: SyncSettings,
    pub fixture: FixtureSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub search_debounce: Duration,
    pub stale_time: Duration,
    pub comment_page_size: NonZeroU32,
}

#[derive(Debug, Clone, Default)]
pub struct FixtureSettings {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    sync: RawSyncSettings,
    fixture: RawFixtureSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(millis) = overrides.search_debounce_ms {
            self.sync.search_debounce_ms = Some(millis);
        }
        if let Some(millis) = overrides.stale_time_ms {
            self.sync.stale_time_ms = Some(millis);
        }
        if let Some(size) = overrides.comment_page_size {
            self.sync.comment_page_size = Some(size);
        }
        if let Some(path) = overrides.fixture.as_ref() {
            self.fixture.path = Some(path.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            sync,
            fixture,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            sync: build_sync_settings(sync)?,
            fixture: FixtureSettings { path: fixture.path },
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_sync_settings(sync: RawSyncSettings) -> Result<SyncSettings, LoadError> {
    let debounce_ms = sync.search_debounce_ms.unwrap_or(DEFAULT_SEARCH_DEBOUNCE_MS);
    if debounce_ms == 0 {
        return Err(LoadError::invalid(
            "sync.search_debounce_ms",
            "must be greater than zero",
        ));
    }

    let stale_time_ms = sync.stale_time_ms.unwrap_or(DEFAULT_STALE_TIME_MS);

    let page_size = sync
        .comment_page_size
        .unwrap_or(DEFAULT_COMMENT_PAGE_SIZE);
    let comment_page_size = NonZeroU32::new(page_size).ok_or_else(|| {
        LoadError::invalid("sync.comment_page_size", "must be greater than zero")
    })?;

    Ok(SyncSettings {
        search_debounce: Duration::from_millis(debounce_ms),
        stale_time: Duration::from_millis(stale_time_ms),
        comment_page_size,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSyncSettings {
    search_debounce_ms: Option<u64>,
    stale_time_ms: Option<u64>,
    comment_page_size: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawFixtureSettings {
    path: Option<PathBuf>,
}

#[cfg(test)]
mod tests;
