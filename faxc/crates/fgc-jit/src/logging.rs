//! Barrier Logging and Tracing
//!
//! Structured events for stub generation, stub emission and the runtime
//! routines. Every event is forwarded to the `log` facade; the
//! `BarrierLogger` additionally keeps a history of compile-time events and
//! can print them as human-readable lines or JSON.
//!
//! Runtime routine events (healing, retries, escalations) go through
//! [`log_runtime_event`] instead: the routines run inside compiled code and
//! must not wait on the logger's locks.
//!
//! Log Levels:
//! - ERROR: Compilation units aborted by barrier invariant violations
//! - WARN: Slow path escalations
//! - INFO: Stub routine generation
//! - DEBUG: Atomic retries
//! - TRACE: Per-stub emission, per-reference healing

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Log level for barrier events
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl From<LogLevel> for log::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => log::Level::Error,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Trace => log::Level::Trace,
        }
    }
}

/// Barrier event types
#[derive(Debug, Clone, PartialEq)]
pub enum BarrierEvent {
    /// The four stub routines were installed
    StubsGenerated {
        load_strong: usize,
        load_weak: usize,
        store_with_healing: usize,
        store_without_healing: usize,
    },

    /// A barrier stub was attached to a compilation unit
    StubEmitted {
        unit: String,
        stub: &'static str,
        decorators: u64,
    },

    /// A runtime routine replaced a stale reference
    Healed {
        routine: &'static str,
        slot: usize,
        from: usize,
        to: usize,
    },

    /// An atomic or healing CAS lost to concurrent re-coloring
    AtomicRetry {
        slot: usize,
        attempt: u32,
    },

    /// Retry limit exhausted; the collector slow path took over
    SlowPathEscalation {
        slot: usize,
        operation: &'static str,
        attempts: u32,
    },

    /// Barrier emission failed and the unit was abandoned
    CompilationAborted {
        unit: String,
        reason: String,
    },
}

impl BarrierEvent {
    pub fn level(&self) -> LogLevel {
        match self {
            BarrierEvent::CompilationAborted { .. } => LogLevel::Error,
            BarrierEvent::SlowPathEscalation { .. } => LogLevel::Warn,
            BarrierEvent::StubsGenerated { .. } => LogLevel::Info,
            BarrierEvent::AtomicRetry { .. } => LogLevel::Debug,
            BarrierEvent::StubEmitted { .. } | BarrierEvent::Healed { .. } => LogLevel::Trace,
        }
    }

    /// Human-readable form
    pub fn describe(&self) -> String {
        self.to_string()
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            BarrierEvent::StubsGenerated {
                load_strong,
                load_weak,
                store_with_healing,
                store_without_healing,
            } => serde_json::json!({
                "type": "stubs_generated",
                "load_strong": load_strong,
                "load_weak": load_weak,
                "store_with_healing": store_with_healing,
                "store_without_healing": store_without_healing
            }),
            BarrierEvent::StubEmitted {
                unit,
                stub,
                decorators,
            } => serde_json::json!({
                "type": "stub_emitted",
                "unit": unit,
                "stub": stub,
                "decorators": decorators
            }),
            BarrierEvent::Healed {
                routine,
                slot,
                from,
                to,
            } => serde_json::json!({
                "type": "healed",
                "routine": routine,
                "slot": slot,
                "from": from,
                "to": to
            }),
            BarrierEvent::AtomicRetry { slot, attempt } => serde_json::json!({
                "type": "atomic_retry",
                "slot": slot,
                "attempt": attempt
            }),
            BarrierEvent::SlowPathEscalation {
                slot,
                operation,
                attempts,
            } => serde_json::json!({
                "type": "slow_path_escalation",
                "slot": slot,
                "operation": operation,
                "attempts": attempts
            }),
            BarrierEvent::CompilationAborted { unit, reason } => serde_json::json!({
                "type": "compilation_aborted",
                "unit": unit,
                "reason": reason
            }),
        }
    }
}

impl fmt::Display for BarrierEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BarrierEvent::StubsGenerated {
                load_strong,
                load_weak,
                store_with_healing,
                store_without_healing,
            } => write!(
                f,
                "[Barrier] Stubs generated: load {:#x}, weak load {:#x}, \
                 store {:#x}, store (no healing) {:#x}",
                load_strong, load_weak, store_with_healing, store_without_healing
            ),
            BarrierEvent::StubEmitted {
                unit,
                stub,
                decorators,
            } => write!(
                f,
                "[Barrier] {}: {} emitted (decorators {:#x})",
                unit, stub, decorators
            ),
            BarrierEvent::Healed {
                routine,
                slot,
                from,
                to,
            } => write!(
                f,
                "[Barrier] {} healed slot {:#x}: {:#x} -> {:#x}",
                routine, slot, from, to
            ),
            BarrierEvent::AtomicRetry { slot, attempt } => {
                write!(f, "[Barrier] Retry {} on slot {:#x}", attempt, slot)
            }
            BarrierEvent::SlowPathEscalation {
                slot,
                operation,
                attempts,
            } => write!(
                f,
                "[Barrier] {} on slot {:#x} escalated to slow path after {} attempts",
                operation, slot, attempts
            ),
            BarrierEvent::CompilationAborted { unit, reason } => {
                write!(f, "[Barrier] Compilation of {} aborted: {}", unit, reason)
            }
        }
    }
}

/// Barrier logger configuration
#[derive(Debug, Clone)]
pub struct BarrierLoggerConfig {
    /// Minimum log level kept in history
    pub level: LogLevel,

    /// Print events to stdout
    pub console: bool,

    /// Print JSON instead of human-readable lines
    pub json: bool,

    /// Prefix console lines with a timestamp
    pub timestamps: bool,
}

impl Default for BarrierLoggerConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            console: false,
            json: false,
            timestamps: true,
        }
    }
}

/// Barrier Logger - event history plus console output
pub struct BarrierLogger {
    config: BarrierLoggerConfig,
    events: Mutex<Vec<(Instant, BarrierEvent)>>,
    enabled: AtomicBool,
}

impl BarrierLogger {
    pub fn new(config: BarrierLoggerConfig) -> Self {
        Self {
            config,
            events: Mutex::new(Vec::new()),
            enabled: AtomicBool::new(true),
        }
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Relaxed);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn config(&self) -> &BarrierLoggerConfig {
        &self.config
    }

    /// Log a barrier event
    pub fn log(&self, event: BarrierEvent) {
        let level = event.level();
        log::log!(log::Level::from(level), "{}", event);

        if !self.is_enabled() || level > self.config.level {
            return;
        }

        if self.config.console {
            self.output_console(&event);
        }

        self.events.lock().push((Instant::now(), event));
    }

    fn output_console(&self, event: &BarrierEvent) {
        let line = if self.config.json {
            event.to_json().to_string()
        } else {
            event.describe()
        };
        if self.config.timestamps {
            let now = chrono::Local::now();
            println!("[{}] {}", now.format("%Y-%m-%d %H:%M:%S%.3f"), line);
        } else {
            println!("{}", line);
        }
    }

    pub fn get_events(&self) -> Vec<BarrierEvent> {
        self.events.lock().iter().map(|(_, e)| e.clone()).collect()
    }

    pub fn clear_events(&self) {
        self.events.lock().clear();
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().len()
    }
}

impl Default for BarrierLogger {
    fn default() -> Self {
        Self::new(BarrierLoggerConfig::default())
    }
}

lazy_static::lazy_static! {
    pub(crate) static ref GLOBAL_LOGGER: parking_lot::RwLock<BarrierLogger> =
        parking_lot::RwLock::new(BarrierLogger::default());
}

/// Log an event through the global logger
pub fn log_event(event: BarrierEvent) {
    GLOBAL_LOGGER.read().log(event);
}

/// Forward an event to the `log` facade only
///
/// Takes no lock and formats nothing unless the facade accepts the level.
pub fn log_runtime_event(event: &BarrierEvent) {
    log::log!(log::Level::from(event.level()), "{}", event);
}

/// Replace the global logger configuration; history is discarded
pub fn configure_logger(config: BarrierLoggerConfig) {
    *GLOBAL_LOGGER.write() = BarrierLogger::new(config);
}

/// Number of events in the global history
pub fn get_event_count() -> usize {
    GLOBAL_LOGGER.read().event_count()
}

/// Snapshot of the global history
pub fn get_events() -> Vec<BarrierEvent> {
    GLOBAL_LOGGER.read().get_events()
}
