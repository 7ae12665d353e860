//! Named timing constants shared by the scheduler and the per-window queue.

use std::time::Duration;

/// Default wall-clock budget for a compute job when the caller does not specify one.
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(30);

/// Grace period between a cooperative cancel signal and a hard task abort.
pub const CANCEL_GRACE: Duration = Duration::from_millis(250);

/// How long an idempotency key is remembered before it can be reused.
pub const IDEMPOTENCY_TTL: Duration = Duration::from_secs(15 * 60);

/// Idempotency map compaction runs once this many entries have accumulated.
pub const IDEMPOTENCY_COMPACT_THRESHOLD: usize = 1_000;
