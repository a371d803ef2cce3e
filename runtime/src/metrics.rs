//! Metric descriptions for the admission runtime.
//!
//! The runtime only emits metrics through the `metrics` facade. Installing a
//! recorder (Prometheus, statsd, ...) is up to the application; call
//! [`describe_metrics`] once after installing it so the exporter knows the
//! help text of every series.
//!
//! | Metric | Labels | Meaning |
//! |---|---|---|
//! | `flashsale.admission.decisions` | `status` | queue-path admission outcomes |
//! | `flashsale.admission.rejected` | `status` | requests with a tampered token |
//! | `flashsale.worker.started` | | workers spawned |
//! | `flashsale.worker.outcomes` | `status` | durable outcomes written by workers |
//! | `flashsale.worker.malformed` | | undecodable wait-queue entries |
//! | `flashsale.worker.tickets_withheld` | | unused tickets kept out of a draining sale |
//! | `flashsale.fallback.executions` | `status` | transactional fallback outcomes |
//! | `flashsale.breaker.opened` | `breaker` | circuit breaker trips |
//! | `flashsale.breaker.rejected` | `breaker` | calls bypassed while open |
//! | `flashsale.retry.exhausted` | `operation` | queue writes given up on |
//! | `flashsale.cache.hits` / `flashsale.cache.misses` | | item cache lookups |

use metrics::describe_counter;

/// Register help text for every metric the runtime emits.
pub fn describe_metrics() {
    describe_counter!(
        "flashsale.admission.decisions",
        "Queue-path admission outcomes by status"
    );
    describe_counter!(
        "flashsale.admission.rejected",
        "Purchase requests rejected before admission"
    );
    describe_counter!("flashsale.worker.started", "Admission workers spawned");
    describe_counter!(
        "flashsale.worker.outcomes",
        "Durable purchase outcomes written by admission workers"
    );
    describe_counter!(
        "flashsale.worker.malformed",
        "Wait-queue entries that could not be decoded"
    );
    describe_counter!(
        "flashsale.worker.tickets_withheld",
        "Unused tickets not returned because the worker was draining"
    );
    describe_counter!(
        "flashsale.fallback.executions",
        "Transactional fallback purchases by status"
    );
    describe_counter!("flashsale.breaker.opened", "Circuit breaker transitions to open");
    describe_counter!(
        "flashsale.breaker.rejected",
        "Calls that bypassed the guarded path while the breaker was open"
    );
    describe_counter!(
        "flashsale.retry.exhausted",
        "Queue writes abandoned after the retry policy ran out"
    );
    describe_counter!("flashsale.cache.hits", "Item cache hits");
    describe_counter!("flashsale.cache.misses", "Item cache misses");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describing_without_a_recorder_is_a_no_op() {
        describe_metrics();
        describe_metrics();
    }
}
