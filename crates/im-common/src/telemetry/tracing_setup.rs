//! Tracing and logging setup
//!
//! `RUST_LOG` wins when set. Otherwise the gateway logs at the preset level
//! with transport and pool internals held at `warn`, since a busy node emits
//! a frame-level event per WebSocket message.

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

use crate::config::Environment;

/// Crates quieted to `warn` unless `RUST_LOG` says otherwise
const NOISY_TARGETS: &[&str] = &["hyper", "tungstenite", "tokio_tungstenite", "deadpool", "reqwest"];

#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Level for the gateway's own targets
    pub level: Level,
    pub json: bool,
    /// Emit span open/close events (connection lifetimes show up as spans)
    pub span_events: bool,
    pub file_line: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            json: false,
            span_events: false,
            file_line: true,
        }
    }
}

impl TracingConfig {
    /// Pick the preset matching the deployment environment
    ///
    /// Production logs one JSON object per line for the log shipper.
    #[must_use]
    pub fn for_environment(env: Environment) -> Self {
        match env {
            Environment::Production => Self {
                json: true,
                file_line: false,
                ..Self::default()
            },
            Environment::Staging => Self::default(),
            Environment::Development => Self {
                level: Level::DEBUG,
                span_events: true,
                ..Self::default()
            },
        }
    }

    fn fmt_layer(&self) -> Box<dyn Layer<Registry> + Send + Sync> {
        let span_events = if self.span_events {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };
        let layer = fmt::layer()
            .with_target(true)
            .with_file(self.file_line)
            .with_line_number(self.file_line)
            .with_span_events(span_events);

        if self.json {
            layer.json().flatten_event(true).boxed()
        } else {
            layer.boxed()
        }
    }

    /// Directive string used when `RUST_LOG` is unset
    fn default_directives(&self) -> String {
        let mut directives = self.level.to_string().to_lowercase();
        for target in NOISY_TARGETS {
            directives.push_str(&format!(",{target}=warn"));
        }
        directives
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.default_directives()))
    }
}

/// Install the global subscriber
///
/// Fails instead of panicking when a subscriber is already installed, which
/// happens in test binaries that initialise tracing more than once.
pub fn try_init_tracing(config: TracingConfig) -> Result<(), TracingError> {
    tracing_subscriber::registry()
        .with(config.fmt_layer())
        .with(config.env_filter())
        .try_init()
        .map_err(|_| TracingError::AlreadyInitialized)
}

#[derive(Debug, thiserror::Error)]
pub enum TracingError {
    #[error("Tracing subscriber already initialized")]
    AlreadyInitialized,
}
