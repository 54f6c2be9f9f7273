//! The typed record model (spec §3): a tagged sum over six kinds, sharing
//! nested sub-structures. Parent references are accession strings, never
//! in-memory pointers — this is what lets a child arrive before its parent
//! without the model admitting a cycle.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordKind {
    Study,
    Experiment,
    Sample,
    Run,
    Analysis,
    Submission,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Study => "study",
            RecordKind::Experiment => "experiment",
            RecordKind::Sample => "sample",
            RecordKind::Run => "run",
            RecordKind::Analysis => "analysis",
            RecordKind::Submission => "submission",
        }
    }
}

#[derive(Debug, Clone)]
pub enum Record {
    Study(StudyRecord),
    Experiment(ExperimentRecord),
    Sample(SampleRecord),
    Run(RunRecord),
    Analysis(AnalysisRecord),
    Submission(SubmissionRecord),
}

impl Record {
    pub fn kind(&self) -> RecordKind {
        match self {
            Record::Study(_) => RecordKind::Study,
            Record::Experiment(_) => RecordKind::Experiment,
            Record::Sample(_) => RecordKind::Sample,
            Record::Run(_) => RecordKind::Run,
            Record::Analysis(_) => RecordKind::Analysis,
            Record::Submission(_) => RecordKind::Submission,
        }
    }

    /// The record's accession, if present — absent accessions are the one
    /// condition under which a decoded record must still be dropped
    /// (spec §3 invariant: "records without one are dropped").
    pub fn accession(&self) -> Option<&str> {
        let a = match self {
            Record::Study(r) => &r.accession,
            Record::Experiment(r) => &r.accession,
            Record::Sample(r) => &r.accession,
            Record::Run(r) => &r.accession,
            Record::Analysis(r) => &r.accession,
            Record::Submission(r) => &r.accession,
        };
        if a.is_empty() {
            None
        } else {
            Some(a.as_str())
        }
    }
}

/// A tag/value/units tuple from a record's generic attributes collection.
#[derive(Debug, Clone, Default)]
pub struct Attribute {
    pub tag: String,
    pub value: String,
    pub units: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierKind {
    Primary,
    Secondary,
    External,
    Submitter,
    Uuid,
}

#[derive(Debug, Clone)]
pub struct Identifier {
    pub kind: IdentifierKind,
    pub namespace: Option<String>,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Url,
    Xref,
}

#[derive(Debug, Clone)]
pub struct XrefLink {
    pub kind: LinkKind,
    pub label: Option<String>,
    pub target: String,
}

/// One member of an experiment's sample pool, in source order (order is
/// semantically meaningful — spec §4.3).
#[derive(Debug, Clone)]
pub struct PoolMember {
    pub member_accession: String,
    pub member_name: Option<String>,
    pub proportion: Option<f64>,
    pub read_label: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FileEntry {
    pub filename: String,
    pub file_type: Option<String>,
    pub checksum: Option<String>,
    pub checksum_method: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct StudyRecord {
    pub accession: String,
    pub title: Option<String>,
    pub center: Option<String>,
    pub study_type: Option<String>,
    pub attributes: Vec<Attribute>,
    pub identifiers: Vec<Identifier>,
    pub links: Vec<XrefLink>,
    pub extras: Value,
}

#[derive(Debug, Clone, Default)]
pub struct ExperimentRecord {
    pub accession: String,
    pub title: Option<String>,
    pub center: Option<String>,
    pub study_accession: Option<String>,
    pub platform: Option<String>,
    pub instrument_model: Option<String>,
    pub library_strategy: Option<String>,
    pub library_source: Option<String>,
    pub library_selection: Option<String>,
    pub pool: Vec<PoolMember>,
    pub attributes: Vec<Attribute>,
    pub identifiers: Vec<Identifier>,
    pub links: Vec<XrefLink>,
    pub extras: Value,
}

#[derive(Debug, Clone, Default)]
pub struct SampleRecord {
    pub accession: String,
    pub title: Option<String>,
    pub center: Option<String>,
    pub taxon_id: Option<String>,
    pub attributes: Vec<Attribute>,
    pub identifiers: Vec<Identifier>,
    pub links: Vec<XrefLink>,
    pub extras: Value,
}

#[derive(Debug, Clone, Default)]
pub struct RunRecord {
    pub accession: String,
    pub title: Option<String>,
    pub experiment_accession: Option<String>,
    /// Raw text, one of the recognized formats — parsed to UTC by the
    /// Extractor (spec §4.4), not here.
    pub run_date: Option<String>,
    pub files: Vec<FileEntry>,
    pub read_count: Option<u64>,
    pub base_count: Option<u64>,
    pub attributes: Vec<Attribute>,
    pub identifiers: Vec<Identifier>,
    pub links: Vec<XrefLink>,
    pub extras: Value,
}

#[derive(Debug, Clone, Default)]
pub struct AnalysisRecord {
    pub accession: String,
    pub title: Option<String>,
    pub study_accession: Option<String>,
    pub analysis_type: Option<String>,
    pub files: Vec<FileEntry>,
    pub attributes: Vec<Attribute>,
    pub identifiers: Vec<Identifier>,
    pub links: Vec<XrefLink>,
    pub extras: Value,
}

#[derive(Debug, Clone, Default)]
pub struct SubmissionRecord {
    pub accession: String,
    pub title: Option<String>,
    pub center: Option<String>,
    /// Raw text; parsed to UTC by the Extractor (spec §4.4).
    pub submission_date: Option<String>,
    pub attributes: Vec<Attribute>,
    pub identifiers: Vec<Identifier>,
    pub links: Vec<XrefLink>,
    pub extras: Value,
}
