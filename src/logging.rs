//! Structured logging setup. Follows the teacher's `tracing`/`EnvFilter`
//! initialization in `main.rs`, with the OpenTelemetry/Jaeger export layer
//! dropped (see DESIGN.md — it was never wired into the teacher's own code
//! either).

use tracing_subscriber::{fmt, EnvFilter};

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(true).init();
}
