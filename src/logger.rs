//! Injected logging capability.
//!
//! Every component receives a [`Logger`] when it is constructed. The default
//! adapter forwards to the `log` facade; the other adapters exist for callers
//! that want to route messages themselves.

use std::fmt;
use std::sync::Arc;

use log::Level;

/// Log target used by the facade adapter.
pub const LOG_TARGET: &str = "sofabed";

/// A destination for log messages.
pub trait LogSink: Send + Sync {
    fn log(&self, level: Level, args: fmt::Arguments<'_>);
}

type LevelFn = Box<dyn Fn(&str) + Send + Sync>;

/// Per-level handlers. Levels left as `None` are dropped.
#[derive(Default)]
pub struct PartialLogger {
    pub error: Option<LevelFn>,
    pub warn: Option<LevelFn>,
    pub info: Option<LevelFn>,
    pub debug: Option<LevelFn>,
}

impl LogSink for PartialLogger {
    fn log(&self, level: Level, args: fmt::Arguments<'_>) {
        let handler = match level {
            Level::Error => &self.error,
            Level::Warn => &self.warn,
            Level::Info => &self.info,
            Level::Debug | Level::Trace => &self.debug,
        };
        if let Some(handler) = handler {
            handler(&args.to_string());
        }
    }
}

struct Facade;

impl LogSink for Facade {
    fn log(&self, level: Level, args: fmt::Arguments<'_>) {
        log::log!(target: LOG_TARGET, level, "{}", args);
    }
}

struct Noop;

impl LogSink for Noop {
    fn log(&self, _level: Level, _args: fmt::Arguments<'_>) {}
}

struct Console;

impl LogSink for Console {
    fn log(&self, level: Level, args: fmt::Arguments<'_>) {
        eprintln!("[{}] {}", level.as_str().to_lowercase(), args);
    }
}

struct FnSink<F>(F);

impl<F> LogSink for FnSink<F>
where
    F: Fn(Level, &str) + Send + Sync,
{
    fn log(&self, level: Level, args: fmt::Arguments<'_>) {
        (self.0)(level, &args.to_string());
    }
}

/// Cheaply clonable handle to a [`LogSink`].
#[derive(Clone)]
pub struct Logger {
    sink: Arc<dyn LogSink>,
}

impl Logger {
    /// Forwards to the `log` crate under the [`LOG_TARGET`] target.
    pub fn facade() -> Self {
        Self::from_sink(Facade)
    }

    /// Discards every message.
    pub fn noop() -> Self {
        Self::from_sink(Noop)
    }

    /// Writes `[level] message` lines to stderr.
    pub fn console() -> Self {
        Self::from_sink(Console)
    }

    /// Sends every message, with its level, to `f`.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(Level, &str) + Send + Sync + 'static,
    {
        Self::from_sink(FnSink(f))
    }

    pub fn from_partial(partial: PartialLogger) -> Self {
        Self::from_sink(partial)
    }

    pub fn from_sink(sink: impl LogSink + 'static) -> Self {
        Self { sink: Arc::new(sink) }
    }

    pub fn error(&self, args: fmt::Arguments<'_>) {
        self.sink.log(Level::Error, args);
    }

    pub fn warn(&self, args: fmt::Arguments<'_>) {
        self.sink.log(Level::Warn, args);
    }

    pub fn info(&self, args: fmt::Arguments<'_>) {
        self.sink.log(Level::Info, args);
    }

    pub fn debug(&self, args: fmt::Arguments<'_>) {
        self.sink.log(Level::Debug, args);
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::facade()
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger").finish_non_exhaustive()
    }
}
