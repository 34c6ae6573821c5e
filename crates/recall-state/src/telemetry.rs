//! Tracing initialisation for recall binaries and embedding services.
//!
//! Call [`init_tracing`] once at program start. Later calls are ignored
//! because the global subscriber can only be set once per process.

use tracing::{Level, Subscriber};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Output format of log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable single-line output
    #[default]
    Text,
    /// Newline-delimited JSON for log aggregation
    Json,
}

impl LogFormat {
    /// `RECALL_LOG_FORMAT=json` selects JSON, anything else text.
    pub fn from_env() -> Self {
        match std::env::var("RECALL_LOG_FORMAT") {
            Ok(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        }
    }
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise `level` is the default verbosity.
/// Log lines go to stderr in both formats, leaving stdout to the program.
pub fn init_tracing(format: LogFormat, level: Level) {
    subscriber(format, level, std::io::stderr).try_init().ok();
}

fn subscriber<W>(format: LogFormat, level: Level, writer: W) -> Box<dyn Subscriber + Send + Sync>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Json => Box::new(
            registry.with(fmt::layer().with_target(false).json().with_writer(writer)),
        ),
        LogFormat::Text => {
            Box::new(registry.with(fmt::layer().with_target(false).with_writer(writer)))
        }
    }
}
