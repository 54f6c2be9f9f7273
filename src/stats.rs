//! The printable statistics report (spec §6 Outputs): returned as a value at
//! the end of a session. Printing it is the caller's concern, not the
//! library's — no `println!`/`eprintln!` here.

use crate::batcher::BatcherCounts;
use crate::extract::ExtractWarnings;
use crate::filters::FilterStats;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Stats {
    pub elapsed: Duration,
    pub bytes_processed: u64,
    pub records_processed: u64,
    pub records_malformed: u64,
    pub warnings: ExtractWarnings,
    pub filter: FilterStats,
    pub batcher: BatcherCounts,
}

impl Stats {
    pub fn new(
        elapsed: Duration,
        bytes_processed: u64,
        records_processed: u64,
        records_malformed: u64,
        warnings: ExtractWarnings,
        filter: FilterStats,
        batcher: BatcherCounts,
    ) -> Self {
        Self { elapsed, bytes_processed, records_processed, records_malformed, warnings, filter, batcher }
    }

    pub fn bytes_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 {
            0.0
        } else {
            self.bytes_processed as f64 / secs
        }
    }

    pub fn records_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 {
            0.0
        } else {
            self.records_processed as f64 / secs
        }
    }
}

impl std::fmt::Display for Stats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:.1}s elapsed, {} bytes ({:.1} B/s), {} records ({:.1} rec/s); \
             malformed={} unparseable_dates={} pool_rejected={} unknown_enum={} missing_platform={}; \
             studies={} experiments={} samples={} runs={} analyses={} submissions={}",
            self.elapsed.as_secs_f64(),
            self.bytes_processed,
            self.bytes_per_sec(),
            self.records_processed,
            self.records_per_sec(),
            self.records_malformed,
            self.warnings.unparseable_date,
            self.warnings.pool_proportion_rejected,
            self.warnings.unknown_enum_value,
            self.warnings.missing_platform,
            self.batcher.studies_inserted,
            self.batcher.experiments_inserted,
            self.batcher.samples_inserted,
            self.batcher.runs_inserted,
            self.batcher.analyses_inserted,
            self.batcher.submissions_inserted,
        )
    }
}
