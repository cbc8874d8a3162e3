/// Records read off the input topic.
pub const EVENTS_CONSUMED_COUNTER: &str = "events_consumed_total";

/// Payloads that failed to decode. Any increment here precedes a restart.
pub const DECODE_FAILURES_COUNTER: &str = "decode_failures_total";

/// Events counted into key state.
pub const EVENTS_PROCESSED_COUNTER: &str = "events_processed_total";

/// Output records acknowledged by the output topic.
pub const RECORDS_EMITTED_COUNTER: &str = "records_emitted_total";

/// Completed checkpoints.
pub const CHECKPOINTS_COMPLETED_COUNTER: &str = "checkpoints_completed_total";

/// One barrier round end to end, including persistence.
pub const CHECKPOINT_DURATION_HISTOGRAM: &str = "checkpoint_duration_seconds";

/// Keys tracked per worker shard, refreshed at every barrier.
pub const KEYS_TRACKED_GAUGE: &str = "keys_tracked";

/// Consumer-group commits that followed a durable checkpoint.
pub const OFFSET_COMMITS_COUNTER: &str = "offset_commits_total";

/// Lineage facts accepted by the collector.
pub const LINEAGE_EMITTED_COUNTER: &str = "lineage_emitted_total";

/// Lineage facts dropped after a sink failure or timeout.
pub const LINEAGE_DROPPED_COUNTER: &str = "lineage_dropped_total";
