//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    num::{NonZeroU32, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "pagecache";
const ENV_PREFIX: &str = "PAGECACHE";
const DEFAULT_CACHE_DIR: &str = "cache";
const DEFAULT_MAX_DEPTH: u64 = 7;
const DEFAULT_MAX_VARIANTS: u64 = 50;
const DEFAULT_LIFETIME_MINUTES: u64 = 7 * 24 * 60;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60 * 60;

/// Command-line arguments for the pagecache binary.
#[derive(Debug, Parser)]
#[command(
    name = "pagecache",
    version,
    about = "Inspect and maintain a filesystem page cache"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "PAGECACHE_CONFIG_FILE",
        value_name = "PATH",
        value_hint = ValueHint::FilePath,
        global = true
    )]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: GlobalOverrides,

    #[command(subcommand)]
    pub command: Command,
}

/// Overrides accepted by every subcommand.
#[derive(Debug, Args, Default, Clone)]
pub struct GlobalOverrides {
    /// Override the cache root directory.
    #[arg(
        long = "cache-dir",
        value_name = "PATH",
        value_hint = ValueHint::DirPath,
        global = true
    )]
    pub cache_dir: Option<PathBuf>,

    /// Override the maximum slug path depth.
    #[arg(long = "max-depth", value_name = "COUNT", global = true)]
    pub max_depth: Option<u64>,

    /// Override the maximum number of variants per slug path.
    #[arg(long = "max-variants", value_name = "COUNT", global = true)]
    pub max_variants: Option<u64>,

    /// Override the lifetime used when none is given.
    #[arg(long = "default-lifetime-minutes", value_name = "MINUTES", global = true)]
    pub default_lifetime_minutes: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Print the cached page for a URL; exits with status 1 on a miss.
    Get(GetArgs),
    /// Store a rendered page for a URL.
    Store(StoreArgs),
    /// Invalidate every cached page under one or more route patterns.
    Invalidate(InvalidateArgs),
    /// Delete the entry for exactly one URL.
    #[command(name = "clear-url")]
    ClearUrl(UrlArgs),
    /// Delete the whole cache.
    #[command(name = "clear-all")]
    ClearAll,
    /// Print where a URL is stored.
    Path(UrlArgs),
    /// Purge expired entries.
    Sweep(SweepArgs),
}

#[derive(Debug, Args, Clone)]
pub struct UrlArgs {
    /// Relative URL, query string included.
    #[arg(value_name = "URL")]
    pub url: String,
}

#[derive(Debug, Args, Clone)]
pub struct GetArgs {
    #[command(flatten)]
    pub target: UrlArgs,

    /// Treat the request as a fragment request; no skeleton fallback.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub fragment: bool,

    /// Disable the skeleton fallback.
    #[arg(long = "no-skeletons", action = clap::ArgAction::SetTrue)]
    pub no_skeletons: bool,
}

#[derive(Debug, Args, Clone)]
pub struct StoreArgs {
    #[command(flatten)]
    pub target: UrlArgs,

    /// Read the page from this file instead of stdin.
    #[arg(long, value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub file: Option<PathBuf>,

    /// Lifetime in minutes; zero or less skips caching.
    #[arg(long = "lifetime-minutes", value_name = "MINUTES", allow_negative_numbers = true)]
    pub lifetime_minutes: Option<i64>,
}

#[derive(Debug, Args, Clone)]
pub struct InvalidateArgs {
    /// Route patterns such as `/blog/*` or `/blog/{slug}`.
    #[arg(value_name = "ROUTE", required = true)]
    pub routes: Vec<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct SweepArgs {
    /// Keep running and sweep on every interval tick.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub watch: bool,

    /// Override the sweep interval used with --watch.
    #[arg(long = "interval-seconds", value_name = "SECONDS")]
    pub interval_seconds: Option<u64>,
}

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub cache: CacheSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub directory: PathBuf,
    pub max_depth: NonZeroUsize,
    pub max_variants: NonZeroUsize,
    pub default_lifetime_minutes: NonZeroU32,
    pub sweep_interval: Duration,
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

    raw.apply_global_overrides(&cli.overrides);
    if let Command::Sweep(args) = &cli.command {
        raw.apply_sweep_overrides(args);
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    cache: RawCacheSettings,
    logging: RawLoggingSettings,
}

impl RawSettings {
    fn apply_global_overrides(&mut self, overrides: &GlobalOverrides) {
        if let Some(dir) = overrides.cache_dir.as_ref() {
            self.cache.directory = Some(dir.clone());
        }
        if let Some(depth) = overrides.max_depth {
            self.cache.max_depth = Some(depth);
        }
        if let Some(variants) = overrides.max_variants {
            self.cache.max_variants = Some(variants);
        }
        if let Some(minutes) = overrides.default_lifetime_minutes {
            self.cache.default_lifetime_minutes = Some(minutes);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }

    fn apply_sweep_overrides(&mut self, args: &SweepArgs) {
        if let Some(seconds) = args.interval_seconds {
            self.cache.sweep_interval_seconds = Some(seconds);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings { cache, logging } = raw;

        let cache = build_cache_settings(cache)?;
        let logging = build_logging_settings(logging)?;

        Ok(Self { cache, logging })
    }
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let directory = cache
        .directory
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR));
    let directory = std::path::absolute(&directory).map_err(|err| {
        LoadError::invalid("cache.directory", format!("cannot resolve path: {err}"))
    })?;

    let max_depth = non_zero_usize(
        cache.max_depth.unwrap_or(DEFAULT_MAX_DEPTH),
        "cache.max_depth",
    )?;
    let max_variants = non_zero_usize(
        cache.max_variants.unwrap_or(DEFAULT_MAX_VARIANTS),
        "cache.max_variants",
    )?;
    let default_lifetime_minutes = non_zero_u32(
        cache
            .default_lifetime_minutes
            .unwrap_or(DEFAULT_LIFETIME_MINUTES),
        "cache.default_lifetime_minutes",
    )?;

    let sweep_secs = cache
        .sweep_interval_seconds
        .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS);
    if sweep_secs == 0 {
        return Err(LoadError::invalid(
            "cache.sweep_interval_seconds",
            "must be greater than zero",
        ));
    }

    Ok(CacheSettings {
        directory,
        max_depth,
        max_variants,
        default_lifetime_minutes,
        sweep_interval: Duration::from_secs(sweep_secs),
    })
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

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    directory: Option<PathBuf>,
    max_depth: Option<u64>,
    max_variants: Option<u64>,
    default_lifetime_minutes: Option<u64>,
    sweep_interval_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    let value: usize = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))?;
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
