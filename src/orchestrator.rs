//! Orchestrator (C8): the single struct that owns one ingestion session,
//! wiring the Counting Reader through the Archive Traverser and Record
//! Decoder to the Extractor, Filter, and Batcher, consulting the Progress
//! Tracker at every member boundary (spec §4.8).
//!
//! The Record Decoder (C3) runs on its own scoped thread per member, handing
//! typed records to this thread over a bounded channel; the Tracker's writes
//! all happen here, never while the channel's send side is held open.

use crate::archive::{drain, ArchiveTraverser};
use crate::batcher::Batcher;
use crate::cancellation::CancellationToken;
use crate::config::IngestOptions;
use crate::counting::CountingReader;
use crate::error::IngestError;
use crate::extract::{extract, ExtractWarnings};
use crate::filters::{self, FilterStats};
use crate::progress::ProgressTracker;
use crate::query::FilterSpec;
use crate::record::Record;
use crate::sink::Sink;
use crate::stats::Stats;
use crate::xml_decoder::{decode_member, CHANNEL_CAPACITY};
use anyhow::{Context, Result};
use std::io::{BufReader, Read};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::mpsc::sync_channel;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Where the tar.gz archive comes from for a given session.
#[derive(Clone, Debug)]
pub enum Source {
    LocalFile(PathBuf),
    Url(String),
}

impl Source {
    /// The stable identifier fingerprinted into `ingest_progress.source_hash`
    /// (spec §3) — not necessarily a valid URL for local files.
    pub fn identifier(&self) -> String {
        match self {
            Source::LocalFile(path) => format!("file://{}", path.display()),
            Source::Url(url) => url.clone(),
        }
    }
}

/// Owns one ingestion session end to end: opening the source, resuming
/// prior progress, and driving every member through the pipeline to the
/// sink. Mirrors the teacher's single-struct-owns-the-session shape, with
/// the per-member decode work pushed onto a scoped thread instead of a
/// rayon pool (the work here is one ordered stream, not an embarrassingly
/// parallel file set).
pub struct Orchestrator<S: Sink> {
    options: IngestOptions,
    tracker: Arc<ProgressTracker>,
    batcher: Batcher<S>,
    filter: Option<FilterSpec>,
    cancel: CancellationToken,
}

impl<S: Sink> Orchestrator<S> {
    pub fn new(
        options: IngestOptions,
        tracker: Arc<ProgressTracker>,
        sink: S,
        filter: Option<FilterSpec>,
    ) -> Self {
        let batch_size = options.batch_size;
        Self { options, tracker, batcher: Batcher::new(sink, batch_size), filter, cancel: CancellationToken::new() }
    }

    /// A clonable handle callers can use to request cooperative cancellation
    /// from another thread (e.g. a signal handler).
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn sink_mut(&mut self) -> &mut S {
        self.batcher.sink_mut()
    }

    /// Run one session to completion, retrying transient and protocol
    /// failures with exponential backoff up to the configured retry budget
    /// (spec §4.8 step 6 / §7). `force` discards any prior progress for this
    /// source before the first attempt; retries within the same call never
    /// force, so a retry resumes from wherever the failed attempt left off.
    pub fn run(&mut self, source: Source, force: bool) -> Result<Stats> {
        let mut attempt = 0u32;
        let mut force = force;
        loop {
            match self.run_once(&source, force) {
                Ok(stats) => return Ok(stats),
                Err(err) => {
                    if let Some(ingest_err) = err.downcast_ref::<IngestError>() {
                        if matches!(ingest_err, IngestError::Cancelled) {
                            if let Err(e) = self.batcher.flush_all() {
                                warn!(error = %e, "failed to flush batcher after cancellation");
                            }
                            info!("ingestion cancelled; progress left at its last checkpoint");
                            return Err(err);
                        }
                        if ingest_err.retryable() && attempt < self.options.retry_budget {
                            attempt += 1;
                            let backoff = self.options.backoff_base * 2u32.pow(attempt - 1);
                            warn!(attempt, ?backoff, error = %ingest_err, "retrying after transient failure");
                            std::thread::sleep(backoff);
                            force = false;
                            continue;
                        }
                    }
                    let _ = self.tracker.mark_failed(&err.to_string());
                    return Err(err);
                }
            }
        }
    }

    fn run_once(&mut self, source: &Source, force: bool) -> Result<Stats> {
        if let Ok(retention) = time::Duration::try_from(self.options.retention_window) {
            if let Err(e) = self.tracker.purge_expired(retention, time::OffsetDateTime::now_utc()) {
                warn!(error = %e, "failed to purge expired progress rows; continuing");
            }
        }

        let identifier = source.identifier();
        self.tracker.start_or_resume(&identifier, force)?;
        let resume = self.tracker.get_resume_info()?;
        let start_time = Instant::now();

        let (body, total_bytes, resumed_from): (Box<dyn Read + Send>, u64, u64) = match source {
            Source::LocalFile(path) => {
                let file = crate::util::open_with_backoff(path, 5, 50)
                    .with_context(|| format!("opening {}", path.display()))?;
                let total = file.metadata().map(|m| m.len()).unwrap_or(0);
                (Box::new(file), total, 0)
            }
            Source::Url(url) => open_url_body(url, resume.downloaded_bytes, &self.options)?,
        };

        if resumed_from != resume.downloaded_bytes {
            // The server ignored our range request (or there was nothing to
            // resume): start the download counter over from zero.
            self.tracker.update_download(0, total_bytes)?;
        } else if resumed_from > 0 {
            self.tracker.update_download(resumed_from, total_bytes)?;
        }

        let counting = CountingReader::new(body);
        let byte_counter = counting.counter();
        let mut traverser = ArchiveTraverser::new(counting);

        let xml_suffix = self.options.xml_suffix.to_ascii_lowercase();
        let checkpoint_interval = self.options.checkpoint_interval;
        let filter_spec = self.filter.clone();
        let stats_only = filter_spec.as_ref().map(|s| s.stats_only).unwrap_or(false);
        let hoist_known_tags = self.options.hoist_known_tags;

        let mut tar_position = resume.tar_position;
        let mut processed_bytes = resume.processed_bytes;
        let mut records_processed = resume.records_processed;
        let mut records_malformed = 0u64;
        let mut warnings = ExtractWarnings::default();
        let mut filter_stats = FilterStats::default();
        let mut last_checkpoint = Instant::now();

        let tracker = Arc::clone(&self.tracker);
        let cancel = self.cancel.clone();
        let batcher = &mut self.batcher;

        // Not a `move` closure: every captured variable above is mutated
        // here and read back afterward to build the final `Stats`, so the
        // closure borrows them rather than taking its own copies.
        traverser.for_each_member(&cancel, |mut frame| -> Result<(), IngestError> {
            tar_position += 1;
            let is_xml = frame.is_regular_file && frame.name.to_ascii_lowercase().ends_with(&xml_suffix);

            if !is_xml {
                let _ = drain(&mut frame.body);
                processed_bytes += frame.size;
                let checkpoint_due = due(&mut last_checkpoint, checkpoint_interval);
                tracker
                    .update_processing(tar_position, processed_bytes, &frame.name, records_processed, checkpoint_due)
                    .map_err(IngestError::SinkFatal)?;
                return Ok(());
            }

            if tracker.is_member_processed(&frame.name).map_err(IngestError::SinkFatal)? {
                let _ = drain(&mut frame.body);
                processed_bytes += frame.size;
                let checkpoint_due = due(&mut last_checkpoint, checkpoint_interval);
                tracker
                    .update_processing(tar_position, processed_bytes, &frame.name, records_processed, checkpoint_due)
                    .map_err(IngestError::SinkFatal)?;
                return Ok(());
            }

            let member_name = frame.name.clone();
            let member_size = frame.size;
            let body = BufReader::new(frame.body);
            let (tx, rx) = sync_channel::<Record>(CHANNEL_CAPACITY);
            let decode_cancel = cancel.clone();
            let decode_label = member_name.clone();

            let mut collected = Vec::new();
            let decode_stats = std::thread::scope(|scope| {
                let handle = scope.spawn(move || decode_member(body, &decode_label, &tx, &decode_cancel));
                for record in rx.iter() {
                    collected.push(record);
                }
                match handle.join() {
                    Ok(result) => result,
                    Err(_) => Err(IngestError::SinkFatal(anyhow::anyhow!("decoder thread panicked on {member_name}"))),
                }
            })?;

            for record in collected {
                let extracted = extract(record, hoist_known_tags, &mut warnings);
                let keep = match (&filter_spec, &extracted.row) {
                    (Some(spec), Some(row)) => filters::matches(row, spec, &mut filter_stats),
                    _ => true,
                };
                if keep && !stats_only {
                    batcher.push(extracted).map_err(IngestError::SinkFatal)?;
                }
            }

            records_processed += decode_stats.records_emitted;
            records_malformed += decode_stats.records_malformed;
            processed_bytes += member_size;

            // The member must not be marked processed until its rows are
            // durable: otherwise a crash between this flush and the next
            // full-batch flush would leave `processed_files` claiming rows
            // that were never written (spec §4.8 step 5, §8.1).
            batcher.flush_all().map_err(IngestError::SinkFatal)?;

            let checksum = member_checksum(&member_name);
            tracker
                .record_member_processed(&member_name, member_size, decode_stats.records_emitted, &checksum)
                .map_err(IngestError::SinkFatal)?;
            let checkpoint_due = due(&mut last_checkpoint, checkpoint_interval);
            tracker
                .update_processing(tar_position, processed_bytes, &member_name, records_processed, checkpoint_due)
                .map_err(IngestError::SinkFatal)?;
            Ok(())
        })?;

        self.batcher.flush_all()?;
        self.tracker.mark_completed()?;

        Ok(Stats::new(
            start_time.elapsed(),
            byte_counter.load(Ordering::Relaxed),
            records_processed,
            records_malformed,
            warnings,
            filter_stats,
            self.batcher.counts(),
        ))
    }
}

fn due(last: &mut Instant, interval: std::time::Duration) -> bool {
    if last.elapsed() >= interval {
        *last = Instant::now();
        true
    } else {
        false
    }
}

fn member_checksum(name: &str) -> String {
    use md5::{Digest, Md5};
    let mut hasher = Md5::new();
    hasher.update(name.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

/// Open an HTTP(S) source, issuing a `Range: bytes=N-` request when resuming
/// a prior download. Honors only a genuine `206 Partial Content` response as
/// proof the server actually resumed; any other success status restarts the
/// download from byte 0, per spec §4.8 step 2 (adapted from the range-resume
/// pattern in the reqwest-based downloader this module is grounded on).
///
/// reqwest's blocking client has no dedicated idle-read timeout distinct
/// from its overall request timeout, so `options.read_idle_timeout` is not
/// wired in here; only `connect_timeout` is applied.
fn open_url_body(
    url: &str,
    resume_downloaded: u64,
    options: &IngestOptions,
) -> Result<(Box<dyn Read + Send>, u64, u64), IngestError> {
    let client = reqwest::blocking::Client::builder()
        .connect_timeout(options.connect_timeout)
        .build()
        .map_err(|e| IngestError::Protocol(format!("building http client: {e}")))?;

    let mut request = client.get(url);
    if resume_downloaded > 0 {
        request = request.header(reqwest::header::RANGE, format!("bytes={resume_downloaded}-"));
    }

    let response = request
        .send()
        .map_err(|e| IngestError::Transient(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;

    let status = response.status();
    if resume_downloaded > 0 && status == reqwest::StatusCode::PARTIAL_CONTENT {
        let total = content_range_total(&response)
            .or_else(|| response.content_length().map(|n| n + resume_downloaded))
            .unwrap_or(0);
        Ok((Box::new(response), total, resume_downloaded))
    } else if status.is_success() {
        let total = response.content_length().unwrap_or(0);
        Ok((Box::new(response), total, 0))
    } else {
        Err(IngestError::Protocol(format!("unexpected status {status} opening {url}")))
    }
}

fn content_range_total(response: &reqwest::blocking::Response) -> Option<u64> {
    let header = response.headers().get(reqwest::header::CONTENT_RANGE)?;
    let value = header.to_str().ok()?;
    value.rsplit('/').next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::SqliteSink;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tar::Header;
    use tempfile::NamedTempFile;

    fn build_tar_gz(members: &[(&str, &[u8])]) -> Vec<u8> {
        let gz = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(gz);
        for (name, data) in members {
            let mut header = Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    const STUDY_XML: &[u8] = br#"<STUDY_SET>
        <STUDY accession="SRP000001">
            <DESCRIPTOR><STUDY_TITLE>A study</STUDY_TITLE></DESCRIPTOR>
        </STUDY>
    </STUDY_SET>"#;

    const EXPERIMENT_XML: &[u8] = br#"<EXPERIMENT_SET>
        <EXPERIMENT accession="SRX000001">
            <STUDY_REF accession="SRP000001"/>
            <PLATFORM><ILLUMINA><INSTRUMENT_MODEL>Illumina HiSeq 2000</INSTRUMENT_MODEL></ILLUMINA></PLATFORM>
            <LIBRARY_DESCRIPTOR><LIBRARY_STRATEGY>RNA-Seq</LIBRARY_STRATEGY></LIBRARY_DESCRIPTOR>
        </EXPERIMENT>
    </EXPERIMENT_SET>"#;

    fn write_archive(path: &std::path::Path, members: &[(&str, &[u8])]) {
        let bytes = build_tar_gz(members);
        std::fs::File::create(path).unwrap().write_all(&bytes).unwrap();
    }

    #[test]
    fn fresh_ingest_processes_every_member_and_marks_completed() {
        let archive = NamedTempFile::new().unwrap();
        write_archive(archive.path(), &[("study.xml", STUDY_XML), ("experiment.xml", EXPERIMENT_XML)]);

        let tracker = Arc::new(ProgressTracker::open_in_memory().unwrap());
        let sink = SqliteSink::open_in_memory().unwrap();
        let options = IngestOptions::default();
        let mut orchestrator = Orchestrator::new(options, Arc::clone(&tracker), sink, None);

        let stats = orchestrator.run(Source::LocalFile(archive.path().to_path_buf()), false).unwrap();
        assert_eq!(stats.records_processed, 2);
        assert_eq!(stats.batcher.studies_inserted, 1);
        assert_eq!(stats.batcher.experiments_inserted, 1);

        let resume = tracker.get_resume_info().unwrap();
        assert_eq!(resume.processed_members.len(), 2);
    }

    #[test]
    fn processed_bytes_sums_record_bearing_and_skipped_member_sizes() {
        let archive = NamedTempFile::new().unwrap();
        write_archive(
            archive.path(),
            &[("README.txt", b"not xml"), ("study.xml", STUDY_XML), ("experiment.xml", EXPERIMENT_XML)],
        );

        let tracker = Arc::new(ProgressTracker::open_in_memory().unwrap());
        let sink = SqliteSink::open_in_memory().unwrap();
        let mut orchestrator = Orchestrator::new(IngestOptions::default(), Arc::clone(&tracker), sink, None);
        orchestrator.run(Source::LocalFile(archive.path().to_path_buf()), false).unwrap();

        let resume = tracker.get_resume_info().unwrap();
        let expected = b"not xml".len() as u64 + STUDY_XML.len() as u64 + EXPERIMENT_XML.len() as u64;
        assert_eq!(resume.processed_bytes, expected);
    }

    #[test]
    fn resume_skips_already_processed_members() {
        let archive = NamedTempFile::new().unwrap();
        write_archive(archive.path(), &[("study.xml", STUDY_XML), ("experiment.xml", EXPERIMENT_XML)]);

        let tracker = Arc::new(ProgressTracker::open_in_memory().unwrap());
        let sink = SqliteSink::open_in_memory().unwrap();

        tracker.start_or_resume(&Source::LocalFile(archive.path().to_path_buf()).identifier(), false).unwrap();
        tracker.record_member_processed("study.xml", STUDY_XML.len() as u64, 1, "deadbeef").unwrap();
        tracker.update_processing(1, 0, "study.xml", 1, false).unwrap();

        let mut orchestrator = Orchestrator::new(IngestOptions::default(), Arc::clone(&tracker), sink, None);
        let stats = orchestrator.run(Source::LocalFile(archive.path().to_path_buf()), false).unwrap();

        // study.xml was already processed; only experiment.xml's record is new.
        assert_eq!(stats.batcher.studies_inserted, 0);
        assert_eq!(stats.batcher.experiments_inserted, 1);
    }

    #[test]
    fn force_restart_reprocesses_everything() {
        let archive = NamedTempFile::new().unwrap();
        write_archive(archive.path(), &[("study.xml", STUDY_XML)]);

        let tracker = Arc::new(ProgressTracker::open_in_memory().unwrap());
        let sink = SqliteSink::open_in_memory().unwrap();
        let mut orchestrator = Orchestrator::new(IngestOptions::default(), Arc::clone(&tracker), sink, None);

        orchestrator.run(Source::LocalFile(archive.path().to_path_buf()), false).unwrap();
        orchestrator.run(Source::LocalFile(archive.path().to_path_buf()), true).unwrap();
        let sink_stats = orchestrator.sink_mut().stats().unwrap();
        assert_eq!(sink_stats.studies, 1);
    }

    #[test]
    fn filtered_ingest_drops_non_matching_rows_but_counts_them() {
        let archive = NamedTempFile::new().unwrap();
        write_archive(archive.path(), &[("study.xml", STUDY_XML), ("experiment.xml", EXPERIMENT_XML)]);

        let tracker = Arc::new(ProgressTracker::open_in_memory().unwrap());
        let sink = SqliteSink::open_in_memory().unwrap();
        let mut spec = FilterSpec::default();
        spec.strategy = Some(["wgs".to_string()].into_iter().collect());
        let spec = spec.normalize();

        let mut orchestrator = Orchestrator::new(IngestOptions::default(), Arc::clone(&tracker), sink, Some(spec));
        let stats = orchestrator.run(Source::LocalFile(archive.path().to_path_buf()), false).unwrap();

        assert_eq!(stats.batcher.studies_inserted, 1);
        assert_eq!(stats.batcher.experiments_inserted, 0);
        assert_eq!(stats.filter.skipped_by_strategy, 1);
    }

    #[test]
    fn cancellation_before_run_leaves_progress_in_processing_state() {
        let archive = NamedTempFile::new().unwrap();
        write_archive(archive.path(), &[("study.xml", STUDY_XML), ("experiment.xml", EXPERIMENT_XML)]);

        let tracker = Arc::new(ProgressTracker::open_in_memory().unwrap());
        let sink = SqliteSink::open_in_memory().unwrap();
        let mut orchestrator = Orchestrator::new(IngestOptions::default(), Arc::clone(&tracker), sink, None);
        orchestrator.cancellation_token().cancel();

        let result = orchestrator.run(Source::LocalFile(archive.path().to_path_buf()), false);
        assert!(result.is_err());
        let resume = tracker.get_resume_info().unwrap();
        assert_eq!(resume.processed_members.len(), 0);
    }

    /// Delegates to a real `SqliteSink`, cancelling the shared token right
    /// after the first member's rows land — simulating a process that dies
    /// between two members, rather than seeding tables by hand.
    struct CancelAfterFirstFlushSink {
        inner: SqliteSink,
        cancel: CancellationToken,
    }

    impl crate::sink::Sink for CancelAfterFirstFlushSink {
        fn insert_study(&mut self, row: &crate::rows::StudyRow) -> Result<()> {
            self.inner.insert_study(row)
        }
        fn bulk_insert_study(&mut self, rows: &[crate::rows::StudyRow]) -> Result<usize> {
            let n = self.inner.bulk_insert_study(rows)?;
            self.cancel.cancel();
            Ok(n)
        }
        fn insert_experiment(&mut self, row: &crate::rows::ExperimentRow) -> Result<()> {
            self.inner.insert_experiment(row)
        }
        fn bulk_insert_experiment(&mut self, rows: &[crate::rows::ExperimentRow]) -> Result<usize> {
            self.inner.bulk_insert_experiment(rows)
        }
        fn insert_sample(&mut self, row: &crate::rows::SampleRow) -> Result<()> {
            self.inner.insert_sample(row)
        }
        fn bulk_insert_sample(&mut self, rows: &[crate::rows::SampleRow]) -> Result<usize> {
            self.inner.bulk_insert_sample(rows)
        }
        fn insert_run(&mut self, row: &crate::rows::RunRow) -> Result<()> {
            self.inner.insert_run(row)
        }
        fn bulk_insert_run(&mut self, rows: &[crate::rows::RunRow]) -> Result<usize> {
            self.inner.bulk_insert_run(rows)
        }
        fn insert_analysis(&mut self, row: &crate::rows::AnalysisRow) -> Result<()> {
            self.inner.insert_analysis(row)
        }
        fn bulk_insert_analysis(&mut self, rows: &[crate::rows::AnalysisRow]) -> Result<usize> {
            self.inner.bulk_insert_analysis(rows)
        }
        fn insert_submission(&mut self, row: &crate::rows::SubmissionRow) -> Result<()> {
            self.inner.insert_submission(row)
        }
        fn bulk_insert_submission(&mut self, rows: &[crate::rows::SubmissionRow]) -> Result<usize> {
            self.inner.bulk_insert_submission(rows)
        }
        fn insert_sample_pool(&mut self, row: &crate::rows::SamplePoolRow) -> Result<()> {
            self.inner.insert_sample_pool(row)
        }
        fn insert_identifier(&mut self, row: &crate::rows::IdentifierRow) -> Result<()> {
            self.inner.insert_identifier(row)
        }
        fn insert_link(&mut self, row: &crate::rows::LinkRow) -> Result<()> {
            self.inner.insert_link(row)
        }
        fn stats(&self) -> Result<crate::sink::SinkStats> {
            self.inner.stats()
        }
        fn update_statistics(&self) -> Result<()> {
            self.inner.update_statistics()
        }
    }

    #[test]
    fn cancellation_mid_archive_flushes_the_completed_member_before_propagating() {
        let archive = NamedTempFile::new().unwrap();
        write_archive(archive.path(), &[("study.xml", STUDY_XML), ("experiment.xml", EXPERIMENT_XML)]);

        let tracker = Arc::new(ProgressTracker::open_in_memory().unwrap());
        // Placeholder token at construction time; swapped below for the
        // Orchestrator's real one so the sink can flip the same flag the
        // Orchestrator actually checks at the next member boundary.
        let sink =
            CancelAfterFirstFlushSink { inner: SqliteSink::open_in_memory().unwrap(), cancel: CancellationToken::new() };

        let mut orchestrator = Orchestrator::new(IngestOptions::default(), Arc::clone(&tracker), sink, None);
        let real_token = orchestrator.cancellation_token();
        orchestrator.sink_mut().cancel = real_token;

        let result = orchestrator.run(Source::LocalFile(archive.path().to_path_buf()), false);
        assert!(result.is_err(), "cancellation should surface as an error");

        let sink_stats = orchestrator.sink_mut().inner.stats().unwrap();
        assert_eq!(sink_stats.studies, 1, "the already-completed member's row must be durable");
        assert_eq!(sink_stats.experiments, 0, "the interrupted member's row must not be inserted");

        let resume = tracker.get_resume_info().unwrap();
        assert_eq!(resume.processed_members, vec!["study.xml".to_string()]);
    }
}
