//! Batcher / Sink Adapter (C6): accumulates rows per kind, flushes
//! atomically via the Sink's bulk-insert operations, and falls back to
//! individual inserts (losing at most one malformed row) on batch failure.

use crate::rows::{ExtractedRows, IdentifierRow, LinkRow, Row, SamplePoolRow};
use crate::sink::Sink;
use anyhow::Result;
use tracing::warn;

pub const DEFAULT_BATCH_SIZE: usize = 5_000;

#[derive(Debug, Default, Clone, Copy)]
pub struct BatcherCounts {
    pub studies_inserted: u64,
    pub experiments_inserted: u64,
    pub samples_inserted: u64,
    pub runs_inserted: u64,
    pub analyses_inserted: u64,
    pub submissions_inserted: u64,
    pub pool_rows_inserted: u64,
    pub identifier_rows_inserted: u64,
    pub link_rows_inserted: u64,
    pub rows_lost_to_batch_failure: u64,
}

#[derive(Default)]
struct Buffers {
    studies: Vec<crate::rows::StudyRow>,
    experiments: Vec<crate::rows::ExperimentRow>,
    samples: Vec<crate::rows::SampleRow>,
    runs: Vec<crate::rows::RunRow>,
    analyses: Vec<crate::rows::AnalysisRow>,
    submissions: Vec<crate::rows::SubmissionRow>,
    pools: Vec<SamplePoolRow>,
    identifiers: Vec<IdentifierRow>,
    links: Vec<LinkRow>,
}

pub struct Batcher<S: Sink> {
    sink: S,
    batch_size: usize,
    buffers: Buffers,
    counts: BatcherCounts,
}

impl<S: Sink> Batcher<S> {
    pub fn new(sink: S, batch_size: usize) -> Self {
        Self {
            sink,
            batch_size: batch_size.max(1),
            buffers: Buffers::default(),
            counts: BatcherCounts::default(),
        }
    }

    pub fn counts(&self) -> BatcherCounts {
        self.counts
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Buffer one extraction result (the normalized row plus its satellite
    /// pool/identifier/link rows), flushing any buffer that has reached
    /// capacity.
    pub fn push(&mut self, extracted: ExtractedRows) -> Result<()> {
        if let Some(row) = extracted.row {
            match row {
                Row::Study(r) => {
                    self.buffers.studies.push(r);
                    if self.buffers.studies.len() >= self.batch_size {
                        self.flush_studies()?;
                    }
                }
                Row::Experiment(r) => {
                    self.buffers.experiments.push(r);
                    if self.buffers.experiments.len() >= self.batch_size {
                        self.flush_experiments()?;
                    }
                }
                Row::Sample(r) => {
                    self.buffers.samples.push(r);
                    if self.buffers.samples.len() >= self.batch_size {
                        self.flush_samples()?;
                    }
                }
                Row::Run(r) => {
                    self.buffers.runs.push(r);
                    if self.buffers.runs.len() >= self.batch_size {
                        self.flush_runs()?;
                    }
                }
                Row::Analysis(r) => {
                    self.buffers.analyses.push(r);
                    if self.buffers.analyses.len() >= self.batch_size {
                        self.flush_analyses()?;
                    }
                }
                Row::Submission(r) => {
                    self.buffers.submissions.push(r);
                    if self.buffers.submissions.len() >= self.batch_size {
                        self.flush_submissions()?;
                    }
                }
            }
        }

        self.buffers.pools.extend(extracted.pool);
        self.buffers.identifiers.extend(extracted.identifiers);
        self.buffers.links.extend(extracted.links);

        if self.buffers.pools.len() >= self.batch_size {
            self.flush_pools()?;
        }
        if self.buffers.identifiers.len() >= self.batch_size {
            self.flush_identifiers()?;
        }
        if self.buffers.links.len() >= self.batch_size {
            self.flush_links()?;
        }
        Ok(())
    }

    /// Flush every non-empty buffer. Called at member boundaries and at
    /// session end so a partially-filled batch still becomes durable.
    pub fn flush_all(&mut self) -> Result<()> {
        self.flush_studies()?;
        self.flush_experiments()?;
        self.flush_samples()?;
        self.flush_runs()?;
        self.flush_analyses()?;
        self.flush_submissions()?;
        self.flush_pools()?;
        self.flush_identifiers()?;
        self.flush_links()?;
        Ok(())
    }

    fn flush_studies(&mut self) -> Result<()> {
        if self.buffers.studies.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(&mut self.buffers.studies);
        match self.sink.bulk_insert_study(&batch) {
            Ok(n) => self.counts.studies_inserted += n as u64,
            Err(e) => {
                warn!(kind = "study", count = batch.len(), error = %e, "bulk insert failed, retrying as individual inserts");
                for row in &batch {
                    match self.sink.insert_study(row) {
                        Ok(()) => self.counts.studies_inserted += 1,
                        Err(_) => self.counts.rows_lost_to_batch_failure += 1,
                    }
                }
            }
        }
        Ok(())
    }

    fn flush_experiments(&mut self) -> Result<()> {
        if self.buffers.experiments.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(&mut self.buffers.experiments);
        match self.sink.bulk_insert_experiment(&batch) {
            Ok(n) => self.counts.experiments_inserted += n as u64,
            Err(e) => {
                warn!(kind = "experiment", count = batch.len(), error = %e, "bulk insert failed, retrying as individual inserts");
                for row in &batch {
                    match self.sink.insert_experiment(row) {
                        Ok(()) => self.counts.experiments_inserted += 1,
                        Err(_) => self.counts.rows_lost_to_batch_failure += 1,
                    }
                }
            }
        }
        Ok(())
    }

    fn flush_samples(&mut self) -> Result<()> {
        if self.buffers.samples.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(&mut self.buffers.samples);
        match self.sink.bulk_insert_sample(&batch) {
            Ok(n) => self.counts.samples_inserted += n as u64,
            Err(e) => {
                warn!(kind = "sample", count = batch.len(), error = %e, "bulk insert failed, retrying as individual inserts");
                for row in &batch {
                    match self.sink.insert_sample(row) {
                        Ok(()) => self.counts.samples_inserted += 1,
                        Err(_) => self.counts.rows_lost_to_batch_failure += 1,
                    }
                }
            }
        }
        Ok(())
    }

    fn flush_runs(&mut self) -> Result<()> {
        if self.buffers.runs.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(&mut self.buffers.runs);
        match self.sink.bulk_insert_run(&batch) {
            Ok(n) => self.counts.runs_inserted += n as u64,
            Err(e) => {
                warn!(kind = "run", count = batch.len(), error = %e, "bulk insert failed, retrying as individual inserts");
                for row in &batch {
                    match self.sink.insert_run(row) {
                        Ok(()) => self.counts.runs_inserted += 1,
                        Err(_) => self.counts.rows_lost_to_batch_failure += 1,
                    }
                }
            }
        }
        Ok(())
    }

    fn flush_analyses(&mut self) -> Result<()> {
        if self.buffers.analyses.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(&mut self.buffers.analyses);
        match self.sink.bulk_insert_analysis(&batch) {
            Ok(n) => self.counts.analyses_inserted += n as u64,
            Err(e) => {
                warn!(kind = "analysis", count = batch.len(), error = %e, "bulk insert failed, retrying as individual inserts");
                for row in &batch {
                    match self.sink.insert_analysis(row) {
                        Ok(()) => self.counts.analyses_inserted += 1,
                        Err(_) => self.counts.rows_lost_to_batch_failure += 1,
                    }
                }
            }
        }
        Ok(())
    }

    fn flush_submissions(&mut self) -> Result<()> {
        if self.buffers.submissions.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(&mut self.buffers.submissions);
        match self.sink.bulk_insert_submission(&batch) {
            Ok(n) => self.counts.submissions_inserted += n as u64,
            Err(e) => {
                warn!(kind = "submission", count = batch.len(), error = %e, "bulk insert failed, retrying as individual inserts");
                for row in &batch {
                    match self.sink.insert_submission(row) {
                        Ok(()) => self.counts.submissions_inserted += 1,
                        Err(_) => self.counts.rows_lost_to_batch_failure += 1,
                    }
                }
            }
        }
        Ok(())
    }

    fn flush_pools(&mut self) -> Result<()> {
        let batch = std::mem::take(&mut self.buffers.pools);
        for row in &batch {
            match self.sink.insert_sample_pool(row) {
                Ok(()) => self.counts.pool_rows_inserted += 1,
                Err(_) => self.counts.rows_lost_to_batch_failure += 1,
            }
        }
        Ok(())
    }

    fn flush_identifiers(&mut self) -> Result<()> {
        let batch = std::mem::take(&mut self.buffers.identifiers);
        for row in &batch {
            match self.sink.insert_identifier(row) {
                Ok(()) => self.counts.identifier_rows_inserted += 1,
                Err(_) => self.counts.rows_lost_to_batch_failure += 1,
            }
        }
        Ok(())
    }

    fn flush_links(&mut self) -> Result<()> {
        let batch = std::mem::take(&mut self.buffers.links);
        for row in &batch {
            match self.sink.insert_link(row) {
                Ok(()) => self.counts.link_rows_inserted += 1,
                Err(_) => self.counts.rows_lost_to_batch_failure += 1,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rows::{HoistedAttributes, StudyRow};
    use crate::sink::SqliteSink;

    fn study_row(accession: &str) -> ExtractedRows {
        ExtractedRows {
            row: Some(Row::Study(StudyRow {
                accession: accession.to_string(),
                title: Some("Title".to_string()),
                center: None,
                study_type: None,
                hoisted: HoistedAttributes::default(),
                metadata_json: "{}".to_string(),
            })),
            pool: vec![],
            identifiers: vec![],
            links: vec![],
        }
    }

    #[test]
    fn flushes_on_batch_size() {
        let sink = SqliteSink::open_in_memory().unwrap();
        let mut batcher = Batcher::new(sink, 2);
        batcher.push(study_row("SRP001")).unwrap();
        assert_eq!(batcher.counts().studies_inserted, 0);
        batcher.push(study_row("SRP002")).unwrap();
        assert_eq!(batcher.counts().studies_inserted, 2);
    }

    #[test]
    fn flush_all_drains_partial_batch() {
        let sink = SqliteSink::open_in_memory().unwrap();
        let mut batcher = Batcher::new(sink, 5_000);
        batcher.push(study_row("SRP001")).unwrap();
        assert_eq!(batcher.counts().studies_inserted, 0);
        batcher.flush_all().unwrap();
        assert_eq!(batcher.counts().studies_inserted, 1);
    }

    #[test]
    fn upsert_on_duplicate_accession_does_not_double_count_row() {
        let sink = SqliteSink::open_in_memory().unwrap();
        let mut batcher = Batcher::new(sink, 5_000);
        batcher.push(study_row("SRP001")).unwrap();
        batcher.push(study_row("SRP001")).unwrap();
        batcher.flush_all().unwrap();
        let stats = batcher.sink_mut().stats().unwrap();
        assert_eq!(stats.studies, 1);
    }
}
