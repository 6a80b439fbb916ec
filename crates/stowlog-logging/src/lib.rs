//! Diagnostic output for stowlog
//!
//! The storage and control crates report what they do through `tracing`.
//! This crate installs the subscriber that turns those events into console
//! or JSONL file output, and hands back a [`DebugSwitch`] so verbose
//! diagnostics can be toggled at runtime.
//!
//! # Quick Start
//!
//! ```ignore
//! use stowlog_logging::{DiagnosticsBuilder, LogConfig};
//!
//! let diagnostics = DiagnosticsBuilder::new()
//!     .with_config(LogConfig::development())
//!     .try_init()?;
//!
//! // Later, from the control center
//! diagnostics.switch().set_debug(true)?;
//! ```

pub mod config;

pub use config::{ConsoleConfig, FileConfig, JsonlConfig, LogConfig, RotationStrategy};

use std::fs::{self, File};

use thiserror::Error;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry, reload};

/// Errors from diagnostics setup
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("A global subscriber is already installed")]
    AlreadyInitialized,

    #[error("Invalid filter directive {directive:?}: {reason}")]
    InvalidDirective { directive: String, reason: String },

    #[error("Diagnostic file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Filter reload failed: {0}")]
    Reload(String),
}

type FilterHandle = reload::Handle<EnvFilter, Registry>;
type Base = tracing_subscriber::layer::Layered<reload::Layer<EnvFilter, Registry>, Registry>;
type BoxedLayer = Box<dyn Layer<Base> + Send + Sync + 'static>;

/// Runtime toggle between the configured level and `debug`
#[derive(Clone, Debug)]
pub struct DebugSwitch {
    handle: FilterHandle,
    base: String,
}

impl DebugSwitch {
    pub fn set_debug(&self, enabled: bool) -> Result<(), LoggingError> {
        let directive = if enabled { "debug" } else { self.base.as_str() };
        let filter = parse_filter(directive)?;
        self.handle
            .reload(filter)
            .map_err(|e| LoggingError::Reload(e.to_string()))
    }

    /// Directive the switch returns to when debug is turned off
    pub fn base_directive(&self) -> &str {
        &self.base
    }
}

/// Installed diagnostics
///
/// Keep this alive for the life of the program: dropping it flushes and
/// stops the diagnostic file writer.
#[derive(Debug)]
pub struct Diagnostics {
    switch: DebugSwitch,
    _guard: Option<WorkerGuard>,
}

impl Diagnostics {
    pub fn switch(&self) -> DebugSwitch {
        self.switch.clone()
    }
}

/// Builder for the global diagnostics subscriber
///
/// Console output is JSONL unless the config asks for pretty output. File
/// output is always JSONL.
pub struct DiagnosticsBuilder {
    config: LogConfig,
    env_override: bool,
}

impl DiagnosticsBuilder {
    pub fn new() -> Self {
        Self {
            config: LogConfig::default(),
            env_override: true,
        }
    }

    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.config.default_level = level.into();
        self
    }

    pub fn with_console(mut self, enabled: bool) -> Self {
        self.config.console.enabled = enabled;
        self
    }

    /// Send console output to stderr, keeping stdout for program output
    pub fn with_stderr(mut self, enabled: bool) -> Self {
        self.config.console.stderr = enabled;
        self
    }

    pub fn with_file_output(mut self, config: FileConfig) -> Self {
        self.config.file = Some(config);
        self
    }

    /// Whether RUST_LOG replaces the configured level (default: yes)
    pub fn with_env_override(mut self, enabled: bool) -> Self {
        self.env_override = enabled;
        self
    }

    /// Install the subscriber globally
    pub fn try_init(self) -> Result<Diagnostics, LoggingError> {
        let base = self.base_directive();
        let (filter, handle) = reload::Layer::new(parse_filter(&base)?);

        let mut layers: Vec<BoxedLayer> = Vec::new();
        let mut guard = None;

        if self.config.console.enabled {
            layers.push(self.console_layer());
        }
        if let Some(file_config) = &self.config.file {
            let (writer, file_guard) = file_writer(file_config)?;
            guard = Some(file_guard);
            layers.push(self.jsonl_layer(writer));
        }

        Registry::default()
            .with(filter)
            .with(layers)
            .try_init()
            .map_err(|_| LoggingError::AlreadyInitialized)?;

        Ok(Diagnostics {
            switch: DebugSwitch { handle, base },
            _guard: guard,
        })
    }

    /// Install the subscriber globally, reporting failure on stderr
    pub fn init(self) -> Option<Diagnostics> {
        match self.try_init() {
            Ok(diagnostics) => Some(diagnostics),
            Err(e) => {
                eprintln!("stowlog: diagnostics not installed: {e}");
                None
            }
        }
    }

    fn base_directive(&self) -> String {
        if self.env_override {
            if let Ok(env) = std::env::var(EnvFilter::DEFAULT_ENV) {
                if !env.trim().is_empty() {
                    return env;
                }
            }
        }
        self.config.default_level.clone()
    }

    fn console_layer(&self) -> BoxedLayer {
        let jsonl = &self.config.jsonl;
        let writer = if self.config.console.stderr {
            BoxMakeWriter::new(std::io::stderr)
        } else {
            BoxMakeWriter::new(std::io::stdout)
        };
        if self.config.console.pretty {
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(self.config.console.ansi)
                .with_target(true)
                .with_thread_names(jsonl.include_thread_info)
                .boxed()
        } else {
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(jsonl.include_spans)
                .flatten_event(jsonl.flatten_events)
                .with_thread_names(jsonl.include_thread_info)
                .with_file(jsonl.include_location)
                .with_line_number(jsonl.include_location)
                .with_writer(writer)
                .boxed()
        }
    }

    fn jsonl_layer(&self, writer: NonBlocking) -> BoxedLayer {
        let jsonl = &self.config.jsonl;
        tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(jsonl.include_spans)
            .flatten_event(jsonl.flatten_events)
            .with_thread_names(jsonl.include_thread_info)
            .with_file(jsonl.include_location)
            .with_line_number(jsonl.include_location)
            .with_writer(writer)
            .boxed()
    }
}

impl Default for DiagnosticsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Truncates for `Never`, appends through a rolling appender otherwise
fn file_writer(config: &FileConfig) -> Result<(NonBlocking, WorkerGuard), LoggingError> {
    fs::create_dir_all(&config.directory)?;
    let writer = match config.rotation {
        RotationStrategy::Never => {
            let path = config.directory.join(format!("{}.log", config.prefix));
            tracing_appender::non_blocking(File::create(path)?)
        }
        RotationStrategy::Daily => tracing_appender::non_blocking(RollingFileAppender::new(
            Rotation::DAILY,
            &config.directory,
            &config.prefix,
        )),
        RotationStrategy::Hourly => tracing_appender::non_blocking(RollingFileAppender::new(
            Rotation::HOURLY,
            &config.directory,
            &config.prefix,
        )),
    };
    Ok(writer)
}

fn parse_filter(directive: &str) -> Result<EnvFilter, LoggingError> {
    EnvFilter::try_new(directive).map_err(|e| LoggingError::InvalidDirective {
        directive: directive.to_string(),
        reason: e.to_string(),
    })
}

/// Quiet diagnostics for tests; ignores an already-installed subscriber
pub fn init_testing() {
    let _ = DiagnosticsBuilder::new()
        .with_config(LogConfig::testing())
        .try_init();
}
