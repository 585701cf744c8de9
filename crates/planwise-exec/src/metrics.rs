//! Metrics hooks.
//!
//! Counters are emitted as structured `tracing` events; wire a subscriber
//! (or an exporter layer) up in the binary.

pub fn emit(event: &str, key_values: &[(&str, String)]) {
    let _span = tracing::span!(tracing::Level::TRACE, "planwise", event).entered();
    for (k, v) in key_values {
        tracing::debug!(%event, %k, %v, "metric");
    }
}
