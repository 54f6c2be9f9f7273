//! End-to-end ingestion scenarios driven through the public `Orchestrator`
//! API, exercising resume-across-restart semantics against real SQLite
//! files on disk (not `:memory:`) so a fresh `ProgressTracker`/`SqliteSink`
//! pair genuinely stands in for a new process attaching to prior state.

mod common;

use common::{member, write_archive, EXPERIMENT_SRX1, RUN_SRR1, SAMPLE_SRS1, STUDY_SRP1};
use sra_ingest::{IngestOptions, Orchestrator, ProgressTracker, Sink, Source, SqliteSink, State};
use std::sync::Arc;
use tempfile::NamedTempFile;

struct Paths {
    progress_db: NamedTempFile,
    sink_db: NamedTempFile,
}

impl Paths {
    fn new() -> Self {
        Self { progress_db: NamedTempFile::new().unwrap(), sink_db: NamedTempFile::new().unwrap() }
    }

    fn open(&self) -> (Arc<ProgressTracker>, SqliteSink) {
        let tracker = Arc::new(ProgressTracker::open(self.progress_db.path()).unwrap());
        let sink = SqliteSink::open(self.sink_db.path()).unwrap();
        (tracker, sink)
    }
}

#[test]
fn fresh_ingest_loads_all_four_kinds() {
    let archive = write_archive(&[
        member("study.xml", STUDY_SRP1),
        member("experiment.xml", EXPERIMENT_SRX1),
        member("sample.xml", SAMPLE_SRS1),
        member("run.xml", RUN_SRR1),
    ]);
    let paths = Paths::new();
    let (tracker, sink) = paths.open();

    let mut orchestrator = Orchestrator::new(IngestOptions::default(), Arc::clone(&tracker), sink, None);
    let stats = orchestrator.run(Source::LocalFile(archive), false).unwrap();

    assert_eq!(stats.records_processed, 4);
    assert_eq!(stats.batcher.studies_inserted, 1);
    assert_eq!(stats.batcher.experiments_inserted, 1);

    let sink_stats = orchestrator.sink_mut().stats().unwrap();
    assert_eq!(sink_stats.studies, 1);
    assert_eq!(sink_stats.experiments, 1);
    assert_eq!(sink_stats.samples, 1);
    assert_eq!(sink_stats.runs, 1);
}

#[test]
fn interrupted_ingest_resumes_from_the_next_unprocessed_member_on_restart() {
    let archive = write_archive(&[
        member("study.xml", STUDY_SRP1),
        member("experiment.xml", EXPERIMENT_SRX1),
    ]);
    let paths = Paths::new();
    let identifier = Source::LocalFile(archive.clone()).identifier();

    // First "process": study.xml completes, then the process dies before
    // experiment.xml is reached. Seed exactly that state directly against
    // the durable tables, the same shape a crash mid-archive would leave.
    {
        let (tracker, _sink) = paths.open();
        tracker.start_or_resume(&identifier, false).unwrap();
        tracker.record_member_processed("study.xml", STUDY_SRP1.len() as u64, 1, "deadbeef").unwrap();
        tracker.update_processing(1, STUDY_SRP1.len() as u64, "study.xml", 1, false).unwrap();
    }

    // A brand new process attaches to the same on-disk state.
    let (tracker, sink) = paths.open();
    let resumed = tracker.start_or_resume(&identifier, false).unwrap();
    assert_eq!(resumed.state, State::Processing);

    let mut orchestrator = Orchestrator::new(IngestOptions::default(), Arc::clone(&tracker), sink, None);
    let stats = orchestrator.run(Source::LocalFile(archive), false).unwrap();

    // study.xml's record was never re-emitted; only experiment.xml's was.
    assert_eq!(stats.batcher.studies_inserted, 0);
    assert_eq!(stats.batcher.experiments_inserted, 1);

    let resume_info = tracker.get_resume_info().unwrap();
    assert_eq!(resume_info.processed_members.len(), 2);
}

#[test]
fn force_restart_discards_prior_progress_and_reprocesses_everything() {
    let archive = write_archive(&[member("study.xml", STUDY_SRP1)]);
    let paths = Paths::new();

    {
        let (tracker, sink) = paths.open();
        let mut orchestrator = Orchestrator::new(IngestOptions::default(), tracker, sink, None);
        orchestrator.run(Source::LocalFile(archive.clone()), false).unwrap();
    }

    // Simulate a fresh process, then force-restart the same source.
    let (tracker, sink) = paths.open();
    let mut orchestrator = Orchestrator::new(IngestOptions::default(), Arc::clone(&tracker), sink, None);
    let stats = orchestrator.run(Source::LocalFile(archive), true).unwrap();

    assert_eq!(stats.batcher.studies_inserted, 1);
    let sink_stats = orchestrator.sink_mut().stats().unwrap();
    assert_eq!(sink_stats.studies, 1, "upsert on restart must not double the row count");
}

#[test]
fn filtered_ingest_in_stats_only_mode_counts_without_inserting() {
    let archive = write_archive(&[
        member("study.xml", STUDY_SRP1),
        member("experiment.xml", EXPERIMENT_SRX1),
    ]);
    let paths = Paths::new();
    let (tracker, sink) = paths.open();

    let mut spec = sra_ingest::FilterSpec::default();
    spec.stats_only = true;
    let spec = spec.normalize();

    let mut orchestrator = Orchestrator::new(IngestOptions::default(), tracker, sink, Some(spec));
    let stats = orchestrator.run(Source::LocalFile(archive), false).unwrap();

    assert_eq!(stats.filter.total_matched, 2);
    assert_eq!(stats.batcher.studies_inserted, 0);
    assert_eq!(stats.batcher.experiments_inserted, 0);
}

#[test]
fn non_xml_and_directory_members_are_drained_without_breaking_the_stream() {
    let archive = write_archive(&[
        member("README.txt", b"not xml"),
        member("study.xml", STUDY_SRP1),
        member("nested/", b""),
    ]);
    let paths = Paths::new();
    let (tracker, sink) = paths.open();

    let mut orchestrator = Orchestrator::new(IngestOptions::default(), Arc::clone(&tracker), sink, None);
    let stats = orchestrator.run(Source::LocalFile(archive), false).unwrap();

    assert_eq!(stats.records_processed, 1);
    assert_eq!(stats.batcher.studies_inserted, 1);

    let resume_info = tracker.get_resume_info().unwrap();
    assert_eq!(resume_info.processed_members.len(), 1, "only the XML member is ever recorded as processed");
}
