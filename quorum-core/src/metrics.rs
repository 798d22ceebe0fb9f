// ABOUTME: Metric recording helpers used across the dispatcher and adapters.
// ABOUTME: Thin wrappers over the metrics crate so call sites stay one-liners.

/// An inbound message was received from an adapter.
pub fn record_message_seen(service: &str) {
    metrics::counter!("quorum_messages_seen_total", "service" => service.to_string()).increment(1);
}

/// A dispatch pass completed (regardless of outcome).
pub fn record_dispatch() {
    metrics::counter!("quorum_dispatches_total").increment(1);
}

/// A module won arbitration and a reply was produced.
pub fn record_response(module: &str) {
    metrics::counter!("quorum_responses_total", "module" => module.to_string()).increment(1);
}

/// A module's evaluate or callback faulted and was isolated.
pub fn record_module_fault(module: &str) {
    metrics::counter!("quorum_module_faults_total", "module" => module.to_string()).increment(1);
}

/// A module's evaluate exceeded the per-evaluation timeout.
pub fn record_evaluation_timeout(module: &str) {
    metrics::counter!("quorum_evaluation_timeouts_total", "module" => module.to_string())
        .increment(1);
}

/// An outbound send failed at the adapter boundary.
pub fn record_delivery_failure(service: &str) {
    metrics::counter!("quorum_delivery_failures_total", "service" => service.to_string())
        .increment(1);
}

/// Wall-clock duration of one full dispatch pass, in seconds.
pub fn record_dispatch_duration(seconds: f64) {
    metrics::histogram!("quorum_dispatch_duration_seconds").record(seconds);
}

/// A self-test run finished with the given pass ratio.
pub fn record_self_test_score(score: f64) {
    metrics::gauge!("quorum_self_test_score").set(score);
}
