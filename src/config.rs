use std::time::Duration;

/// Tuning knobs applied to the default embedded sink at session start
/// (spec §6 Environment / sink interface).
#[derive(Clone, Copy, Debug)]
pub struct SinkTuning {
    pub cache_size_kb: i64,
    pub busy_timeout: Duration,
}

impl Default for SinkTuning {
    fn default() -> Self {
        Self { cache_size_kb: 64_000, busy_timeout: Duration::from_secs(30) }
    }
}

/// User-facing ingestion options with sensible defaults and builder chaining.
#[derive(Clone, Debug)]
pub struct IngestOptions {
    pub batch_size: usize,
    pub checkpoint_interval: Duration,
    pub retry_budget: u32,
    pub backoff_base: Duration,
    pub retention_window: Duration,
    pub xml_suffix: String,
    pub hoist_known_tags: bool,
    pub stats_only: bool,
    pub connect_timeout: Duration,
    pub read_idle_timeout: Duration,
    pub sink_tuning: SinkTuning,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            batch_size: crate::batcher::DEFAULT_BATCH_SIZE,
            checkpoint_interval: Duration::from_secs(30),
            retry_budget: 3,
            backoff_base: Duration::from_secs(5),
            retention_window: Duration::from_secs(7 * 24 * 60 * 60),
            xml_suffix: ".xml".to_string(),
            hoist_known_tags: true,
            stats_only: false,
            connect_timeout: Duration::from_secs(30),
            read_idle_timeout: Duration::from_secs(60),
            sink_tuning: SinkTuning::default(),
        }
    }
}

impl IngestOptions {
    pub fn with_batch_size(mut self, n: usize) -> Self {
        self.batch_size = n.max(1);
        self
    }
    pub fn with_checkpoint_interval(mut self, interval: Duration) -> Self {
        self.checkpoint_interval = interval;
        self
    }
    pub fn with_retry_budget(mut self, attempts: u32) -> Self {
        self.retry_budget = attempts;
        self
    }
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }
    pub fn with_retention_window(mut self, window: Duration) -> Self {
        self.retention_window = window;
        self
    }
    pub fn with_xml_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.xml_suffix = suffix.into();
        self
    }
    pub fn with_hoist_known_tags(mut self, yes: bool) -> Self {
        self.hoist_known_tags = yes;
        self
    }
    pub fn with_stats_only(mut self, yes: bool) -> Self {
        self.stats_only = yes;
        self
    }
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
    pub fn with_read_idle_timeout(mut self, timeout: Duration) -> Self {
        self.read_idle_timeout = timeout;
        self
    }
    pub fn with_sink_tuning(mut self, tuning: SinkTuning) -> Self {
        self.sink_tuning = tuning;
        self
    }

    /// Merge `INGEST_BATCH_SIZE`/`INGEST_CHECKPOINT_SECS` env overrides into
    /// an explicit config, mirroring the teacher's `ETL_EXCLUDE_AUTHORS`
    /// merge-not-replace pattern. Malformed values are ignored.
    pub fn from_env_overrides(mut self) -> Self {
        if let Ok(raw) = std::env::var("INGEST_BATCH_SIZE") {
            if let Ok(n) = raw.trim().parse::<usize>() {
                self.batch_size = n.max(1);
            }
        }
        if let Ok(raw) = std::env::var("INGEST_CHECKPOINT_SECS") {
            if let Ok(secs) = raw.trim().parse::<u64>() {
                self.checkpoint_interval = Duration::from_secs(secs);
            }
        }
        self
    }
}
