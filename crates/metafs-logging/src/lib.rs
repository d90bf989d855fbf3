//! Tracing subscriber setup shared by metafs processes and tests.
//!
//! Builds an `EnvFilter`-driven registry with an optional console layer and
//! an optional rolling file layer. `init` uses `try_init` under the hood, so
//! calling it more than once (e.g. from several tests) is harmless: the
//! first subscriber wins.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Re-export the event macros so dependents need no direct tracing dep.
pub use tracing::{debug, error, info, trace, warn};

/// Log file rotation cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Rotation {
    Hourly,
    #[default]
    Daily,
    Never,
}

impl From<Rotation> for rolling::Rotation {
    fn from(r: Rotation) -> Self {
        match r {
            Rotation::Hourly => rolling::Rotation::HOURLY,
            Rotation::Daily => rolling::Rotation::DAILY,
            Rotation::Never => rolling::Rotation::NEVER,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default level filter when `RUST_LOG` is not set.
    #[serde(default = "default_level")]
    pub level: String,

    /// Directory for log files; `None` disables file output.
    #[serde(default)]
    pub dir: Option<PathBuf>,

    /// Log file name prefix.
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,

    /// File rotation cadence.
    #[serde(default)]
    pub rotation: Rotation,

    /// Emit JSON records instead of the human-readable format.
    #[serde(default)]
    pub json: bool,

    /// Also write to stdout.
    #[serde(default = "default_console")]
    pub console: bool,
}

fn default_level() -> String {
    "info".into()
}

fn default_file_prefix() -> String {
    "metafs".into()
}

fn default_console() -> bool {
    true
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            dir: None,
            file_prefix: default_file_prefix(),
            rotation: Rotation::default(),
            json: false,
            console: default_console(),
        }
    }
}

fn fmt_layer<S, W>(json: bool, writer: W) -> Box<dyn tracing_subscriber::Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    W: for<'a> fmt::MakeWriter<'a> + Send + Sync + 'static,
{
    if json {
        Box::new(fmt::layer().json().with_writer(writer))
    } else {
        Box::new(fmt::layer().with_writer(writer))
    }
}

/// Install the global subscriber described by `config`.
///
/// Returns the file appender's guard when file logging is enabled; hold it
/// for the process lifetime or buffered records are lost on exit.
pub fn init(config: &LogConfig) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let registry = tracing_subscriber::registry().with(filter);

    let console_layer = config
        .console
        .then(|| fmt_layer(config.json, std::io::stdout));

    let (file_layer, guard) = match &config.dir {
        Some(dir) => {
            let appender = rolling::RollingFileAppender::builder()
                .rotation(config.rotation.into())
                .filename_prefix(&config.file_prefix)
                .filename_suffix("log")
                .build(dir);
            match appender {
                Ok(appender) => {
                    let (writer, guard) = tracing_appender::non_blocking(appender);
                    (Some(fmt_layer(config.json, writer)), Some(guard))
                }
                Err(e) => {
                    eprintln!("metafs-logging: file appender disabled: {}", e);
                    (None, None)
                }
            }
        }
        None => (None, None),
    };

    let _ = registry.with(console_layer).with(file_layer).try_init();

    guard
}
