//! Structured logging init.
//!
//! The teacher's `telemetry.rs` wires OpenTelemetry OTLP export behind an
//! env-detected protocol; nothing in this core's scope names a metrics
//! backend or trace collector, so that exporter chain is dropped (see
//! DESIGN.md). What's kept is the `tracing` + `tracing-subscriber` init
//! itself, since every I/O-boundary function in this crate is instrumented
//! regardless of whether a collector is attached.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Initializes the global `tracing` subscriber.
///
/// Respects `RUST_LOG` via `EnvFilter`; defaults to `info` when unset.
pub struct Telemetry;

impl Telemetry {
    pub fn new() -> Self {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
        tracing::info!("tracing initialized");
        Self
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}
