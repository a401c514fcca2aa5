//! Configuration for the load generator.
//!
//! Configuration can be loaded from multiple sources with the following precedence (highest to
//! lowest):
//!
//! 1. Environment variables (prefixed with `BMT__`)
//! 2. YAML configuration file (specified via `-c` or `--config` flag)
//! 3. Defaults
//!
//! The number of workers to ramp up to is not part of the configuration. It is a required
//! argument on the command line.
//!
//! # Environment Variables
//!
//! Environment variables use `BMT__` as a prefix and double underscores (`__`) to denote nested
//! configuration structures. For example:
//!
//! - `BMT__COLLECTOR__HOST=127.0.0.1` sets the collector host
//! - `BMT__RAMP__INTERVAL=30s` starts a new batch of workers every 30 seconds
//! - `BMT__EMITTER__LOGS_PER_BATCH=100` sends 100 records per call
//!
//! # YAML Configuration File
//!
//! The above configuration in YAML format would look like this:
//!
//! ```yaml
//! collector:
//!   host: 127.0.0.1
//!
//! ramp:
//!   interval: 30s
//!
//! emitter:
//!   logs_per_batch: 100
//! ```

use std::borrow::Cow;
use std::path::Path;
use std::thread::available_parallelism;
use std::time::Duration;

use anyhow::Result;
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

/// Environment variable prefix for all configuration options.
const ENV_PREFIX: &str = "BMT__";

/// A realistic mail delivery log line, used as the body of every synthetic record.
pub const DEFAULT_PAYLOAD: &str = r#"SUCCESS iiiiiiioiii 5/466 Rule=Subject(7) - 114.207.112.51 WHITE kjnkjsd@oekrj.erg "glR" kjnkjsd@oekrj.erg SpamRate=NO(SR:8.33) spf=none UT=N MSz=1792 AC=0 IC=0 VOL=nasm1904,tix24-2.nm.nhnsystem.com RESTORE=- Subject="subjectaaaa  sdfsfasdfasfd sdfasdfa sadfasdf" mtaip=trcvmail16-1.nm.naver.com rcptto=iiiiiiioiii@naver.com"#;

/// Address of the collector under test.
///
/// Used in: [`Config::collector`]
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Collector {
    /// Host name or IP address of the collector.
    ///
    /// # Environment Variable
    ///
    /// `BMT__COLLECTOR__HOST`
    pub host: String,

    /// TCP port of the collector.
    ///
    /// # Default
    ///
    /// `1463`, the conventional Scribe port.
    ///
    /// # Environment Variable
    ///
    /// `BMT__COLLECTOR__PORT`
    pub port: u16,

    /// Maximum time a worker waits for its connection to be established.
    ///
    /// A worker that cannot connect in time fails and is not replaced.
    ///
    /// # Default
    ///
    /// `5s`
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
}

impl Collector {
    /// Returns the `host:port` address of the collector.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Collector {
    fn default() -> Self {
        Self {
            host: "10.25.84.67".to_owned(),
            port: 1463,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Pacing of the ramp-up.
///
/// Used in: [`Config::ramp`]
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Ramp {
    /// Number of workers started per ramp iteration.
    ///
    /// The last iteration starts fewer workers if the target is not a multiple of the step.
    ///
    /// # Default
    ///
    /// `1`
    ///
    /// # Environment Variable
    ///
    /// `BMT__RAMP__STEP`
    pub step: usize,

    /// Delay between two ramp iterations.
    ///
    /// The controller keeps sleeping for this long after the target has been reached, so a
    /// shutdown signal may take up to one interval to be observed.
    ///
    /// # Default
    ///
    /// `3m`
    ///
    /// # Environment Variable
    ///
    /// `BMT__RAMP__INTERVAL`
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// Time granted to all workers to finish their current cycle during shutdown.
    ///
    /// Workers still running afterwards are aborted, possibly in the middle of a send.
    ///
    /// # Default
    ///
    /// `10s`
    #[serde(with = "humantime_serde")]
    pub shutdown_grace: Duration,
}

impl Default for Ramp {
    fn default() -> Self {
        Self {
            step: 1,
            interval: Duration::from_secs(180),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

/// Shape and pace of the records each worker emits.
///
/// Used in: [`Config::emitter`]
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Emitter {
    /// Number of records sent per call.
    ///
    /// # Default
    ///
    /// `50`
    ///
    /// # Environment Variable
    ///
    /// `BMT__EMITTER__LOGS_PER_BATCH`
    pub logs_per_batch: usize,

    /// Delay between two batches of the same worker.
    ///
    /// This is the only throttle on the load; the collector gives no flow-control feedback.
    /// A zero interval sends batches back to back.
    ///
    /// # Default
    ///
    /// `3ms`
    ///
    /// # Environment Variable
    ///
    /// `BMT__EMITTER__PACING_INTERVAL`
    #[serde(with = "humantime_serde")]
    pub pacing_interval: Duration,

    /// Prefix of the category each worker writes to. The worker index is appended.
    ///
    /// # Default
    ///
    /// `bmt_`
    pub category_prefix: String,

    /// Body of every synthetic record.
    ///
    /// # Default
    ///
    /// [`DEFAULT_PAYLOAD`]
    pub payload: String,
}

impl Default for Emitter {
    fn default() -> Self {
        Self {
            logs_per_batch: 50,
            pacing_interval: Duration::from_millis(3),
            category_prefix: "bmt_".to_owned(),
            payload: DEFAULT_PAYLOAD.to_owned(),
        }
    }
}

/// Runtime configuration for the Tokio async runtime.
///
/// Used in: [`Config::runtime`]
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Runtime {
    /// Number of worker threads driving all emission loops.
    ///
    /// # Default
    ///
    /// Defaults to the number of CPU cores on the host machine.
    ///
    /// # Environment Variable
    ///
    /// `BMT__RUNTIME__WORKER_THREADS`
    pub worker_threads: usize,
}

impl Default for Runtime {
    fn default() -> Self {
        Self {
            worker_threads: available_parallelism().map_or(1, |n| n.get()),
        }
    }
}

/// [Sentry](https://sentry.io/) error tracking configuration.
///
/// Sentry is disabled by default and only enabled when a DSN is provided.
///
/// Used in: [`Config::sentry`]
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Sentry {
    /// Sentry DSN (Data Source Name).
    ///
    /// # Environment Variable
    ///
    /// `BMT__SENTRY__DSN`
    pub dsn: Option<String>,

    /// Environment name for this run, e.g. "staging".
    pub environment: Option<Cow<'static, str>>,

    /// Error event sampling rate.
    ///
    /// # Default
    ///
    /// `1.0` (send all errors)
    pub sample_rate: f32,
}

impl Sentry {
    /// Returns whether Sentry integration is enabled.
    pub fn is_enabled(&self) -> bool {
        self.dsn.is_some()
    }
}

impl Default for Sentry {
    fn default() -> Self {
        Self {
            dsn: None,
            environment: None,
            sample_rate: 1.0,
        }
    }
}

/// Log output format.
///
/// Controls how log messages are formatted. The format can be explicitly specified or
/// auto-detected based on whether output is to a TTY.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect the best format.
    ///
    /// This chooses [`LogFormat::Pretty`] for TTY, otherwise [`LogFormat::Simplified`].
    Auto,

    /// Pretty printing with colors.
    Pretty,

    /// Simplified plain text output.
    ///
    /// ```text
    /// 2020-12-04T12:10:32Z  WARN bmt::ramp: rampup 3/10
    /// ```
    Simplified,

    /// Dump out JSON lines.
    Json,
}

mod display_fromstr {
    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
        T: std::fmt::Display,
    {
        serializer.collect_str(&value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        D: serde::Deserializer<'de>,
        T: std::str::FromStr,
        <T as std::str::FromStr>::Err: std::fmt::Display,
    {
        use serde::Deserialize;
        let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Logging configuration.
///
/// Logs are always written to stderr, the final summary goes to stdout.
///
/// Used in: [`Config::logging`]
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Logging {
    /// Minimum log level to output.
    ///
    /// Every batch is logged at `INFO` with its latency, which gets verbose with many workers.
    /// Use `WARN` to only see the ramp progress.
    ///
    /// # Default
    ///
    /// `INFO`
    ///
    /// # Environment Variable
    ///
    /// `BMT__LOGGING__LEVEL`
    #[serde(with = "display_fromstr")]
    pub level: LevelFilter,

    /// Log output format.
    ///
    /// # Default
    ///
    /// `Auto` (pretty for TTY, simplified otherwise)
    ///
    /// # Environment Variable
    ///
    /// `BMT__LOGGING__FORMAT`
    pub format: LogFormat,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
        }
    }
}

/// Load generator configuration.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Address of the collector under test.
    pub collector: Collector,

    /// Pacing of the ramp-up.
    pub ramp: Ramp,

    /// Shape and pace of the emitted records.
    pub emitter: Emitter,

    /// Configuration of the async runtime.
    pub runtime: Runtime,

    /// Logging configuration.
    pub logging: Logging,

    /// Optional error reporting to Sentry.
    pub sentry: Sentry,
}

impl Config {
    /// Loads configuration from the provided arguments.
    ///
    /// Configuration is merged in the following order (later sources override earlier ones):
    /// 1. Default values
    /// 2. YAML configuration file (if provided)
    /// 3. Environment variables (prefixed with `BMT__`)
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML configuration file cannot be read or parsed, or if
    /// environment variables contain invalid values.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = figment::Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        Ok(config)
    }
}
