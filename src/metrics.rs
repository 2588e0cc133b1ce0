use metrics::{counter, describe_counter};

/// Register metric descriptions (safe to call multiple times).
pub fn init_metric_descriptions() {
    describe_counter!(
        "telemetry_entries_recorded_total",
        "Total telemetry entries appended to the log"
    );
    describe_counter!(
        "telemetry_append_failures_total",
        "Appends that failed and were swallowed by the recorder"
    );
    describe_counter!(
        "telemetry_entries_pruned_total",
        "Entries removed by the retention task"
    );
    describe_counter!(
        "telemetry_entries_cleared_total",
        "Entries removed by explicit clear operations"
    );
}

/// Record a successful append.
pub fn record_entry_appended(kind: &str) {
    counter!(
        "telemetry_entries_recorded_total",
        "kind" => kind.to_string(),
    )
    .increment(1);
}

/// Record a swallowed append failure.
pub fn record_append_failure(kind: &str) {
    counter!(
        "telemetry_append_failures_total",
        "kind" => kind.to_string(),
    )
    .increment(1);
}

/// Record entries removed by retention pruning.
pub fn record_pruned(count: u64) {
    counter!("telemetry_entries_pruned_total").increment(count);
}

/// Record entries removed by an explicit clear.
pub fn record_cleared(count: u64) {
    counter!("telemetry_entries_cleared_total").increment(count);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_metrics() {
        init_metric_descriptions();

        record_entry_appended("batch");
        record_append_failure("cache");
        record_pruned(12);
        record_cleared(3);

        // No recorder installed in tests; calls must simply not panic.
    }
}
