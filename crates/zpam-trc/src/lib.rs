//! Structured event and error taxonomy for the zpam core.
//!
//! A `Level` enum and a catalogue of `EventType` variants that every
//! logged event carries: a small typed event table rather than ad hoc
//! string messages (see DESIGN.md for the rationale and scope). This
//! crate lowers onto the standard `tracing` ecosystem, so any
//! `tracing_subscriber::Layer` — JSON, OTEL, fmt — can consume the
//! events it emits.

mod error;
mod event;

pub use error::{Error, Result};
pub use event::{EventType, Level};

/// Emit an error-level structured event. Usage:
/// `trc::error!(EventType::DnsTimeout, qname = %qname, elapsed_ms = elapsed.as_millis());`
#[macro_export]
macro_rules! error {
    ($ty:expr $(, $($field:tt)*)?) => {
        tracing::error!(event = ?$ty $(, $($field)*)?)
    };
}

/// Emit an info-level structured event.
#[macro_export]
macro_rules! info {
    ($ty:expr $(, $($field:tt)*)?) => {
        tracing::info!(event = ?$ty $(, $($field)*)?)
    };
}

/// Emit a warn-level structured event.
#[macro_export]
macro_rules! warn {
    ($ty:expr $(, $($field:tt)*)?) => {
        tracing::warn!(event = ?$ty $(, $($field)*)?)
    };
}

/// Emit a debug-level structured event.
#[macro_export]
macro_rules! event {
    ($ty:expr $(, $($field:tt)*)?) => {
        tracing::debug!(event = ?$ty $(, $($field)*)?)
    };
}

/// Install the process-wide subscriber. Called once from `zpam`'s
/// `main.rs`. Level filtering is driven by `RUST_LOG` the way the rest
/// of the `tracing` ecosystem expects; `default_level` is the fallback
/// when `RUST_LOG` is unset.
pub fn init(default_level: Level) {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.as_tracing_directive()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}
