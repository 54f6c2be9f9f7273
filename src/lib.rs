//! Streaming ingestion of SRA-style XML metadata archives into an embedded
//! SQLite store, resumable across process restarts. See the module-level
//! docs on `orchestrator` for the session entry point.

mod archive;
mod batcher;
mod cancellation;
mod config;
mod counting;
mod date;
mod error;
mod extract;
mod filters;
mod fingerprint;
mod orchestrator;
mod progress;
mod progress_ui;
mod query;
mod record;
mod rows;
mod sink;
mod stats;
mod util;
mod xml_decoder;

pub use crate::archive::{drain, ArchiveTraverser, MemberFrame};
pub use crate::batcher::{Batcher, BatcherCounts, DEFAULT_BATCH_SIZE};
pub use crate::cancellation::CancellationToken;
pub use crate::config::{IngestOptions, SinkTuning};
pub use crate::counting::CountingReader;
pub use crate::date::parse_utc;
pub use crate::error::IngestError;
pub use crate::extract::{extract, ExtractWarnings};
pub use crate::filters::{matches as filter_matches, FilterStats};
pub use crate::fingerprint::fingerprint;
pub use crate::orchestrator::{Orchestrator, Source};
pub use crate::progress::{Progress, ProgressTracker, ResumeInfo, State};
pub use crate::progress_ui::{
    make_count_progress, make_progress_bar_labeled, set_global_multiprogress, ProgressScope,
};
pub use crate::query::{canonicalize_strategy, DateField, FilterSpec};
pub use crate::record::{
    AnalysisRecord, Attribute, ExperimentRecord, FileEntry, Identifier, IdentifierKind, LinkKind,
    PoolMember, Record, RecordKind, RunRecord, SampleRecord, StudyRecord, SubmissionRecord, XrefLink,
};
pub use crate::rows::{
    AnalysisRow, ExperimentRow, ExtractedRows, HoistedAttributes, IdentifierRow, IdentifierRowKind,
    LinkRow, LinkRowKind, Row, RunRow, SamplePoolRow, SampleRow, StudyRow, SubmissionRow,
};
pub use crate::sink::{Sink, SinkStats, SqliteSink};
pub use crate::stats::Stats;
pub use crate::util::{init_tracing_once, open_with_backoff};
