use std::time::Duration;

/// How often the scheduler looks for due jobs.
pub const SCHEDULER_TICK: Duration = Duration::from_secs(30);

/// How many jobs one scheduler tick may enqueue.
pub const SCHEDULER_BATCH: i64 = 10;

/// How often the reaper sweeps for stuck tasks.
pub const REAPER_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// A running task whose heartbeat is older than this is considered stuck.
/// One threshold for both recurring tasks and scheduled tasks.
pub const STUCK_AFTER: Duration = Duration::from_secs(10 * 60);

/// Maximum times a failed task is re-claimed.
pub const MAX_RETRY_COUNT: i32 = 3;

/// Concurrent per-item fetch/upload operations inside one processor run.
pub const FAN_OUT_LIMIT: usize = 10;

/// Timeout for a single HTTP call to a source adapter.
pub const SOURCE_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Largest accepted webhook envelope.
pub const MAX_WEBHOOK_BODY: usize = 5 * 1024 * 1024;

/// Fixed set of destination buckets, one per backup source family.
pub const BUCKETS: [&str; 11] = [
    "gmail",
    "outlook",
    "google-drive",
    "google-cloud",
    "google-photos",
    "dropbox",
    "aws-s3",
    "github",
    "shopify",
    "quickbooks",
    "database",
];
