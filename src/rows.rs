//! Sink-ready row types produced by the Extractor (C4) and consumed by the
//! Batcher/Sink (C6). Parent references are accession strings, never
//! pointers, so a child row can be constructed and inserted before its
//! parent exists in the sink (spec §3 invariant).

use time::OffsetDateTime;

/// The small, fixed set of attribute tags hoisted out of a record's generic
/// attributes collection into first-class columns (spec §4.4 hoist table).
/// Present on every row kind uniformly — which tags actually show up
/// depends on what that kind's upstream XML carries.
#[derive(Debug, Clone, Default)]
pub struct HoistedAttributes {
    pub organism: Option<String>,
    pub tissue: Option<String>,
    pub cell_type: Option<String>,
    pub cell_line: Option<String>,
    pub sex: Option<String>,
    pub age: Option<String>,
    pub disease: Option<String>,
    pub treatment: Option<String>,
    pub geo_loc_name: Option<String>,
    pub lat_lon: Option<String>,
    pub collection_date: Option<String>,
    pub env_biome: Option<String>,
    pub env_feature: Option<String>,
    pub env_material: Option<String>,
    pub biosample_accession: Option<String>,
    pub bioproject_accession: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StudyRow {
    pub accession: String,
    pub title: Option<String>,
    pub center: Option<String>,
    pub study_type: Option<String>,
    pub hoisted: HoistedAttributes,
    pub metadata_json: String,
}

#[derive(Debug, Clone)]
pub struct ExperimentRow {
    pub accession: String,
    pub title: Option<String>,
    pub center: Option<String>,
    pub study_accession: Option<String>,
    pub platform: Option<String>,
    pub instrument_model: Option<String>,
    pub library_strategy: Option<String>,
    pub library_source: Option<String>,
    pub library_selection: Option<String>,
    pub hoisted: HoistedAttributes,
    pub metadata_json: String,
}

#[derive(Debug, Clone)]
pub struct SampleRow {
    pub accession: String,
    pub title: Option<String>,
    pub center: Option<String>,
    pub taxon_id: Option<String>,
    pub hoisted: HoistedAttributes,
    pub metadata_json: String,
}

#[derive(Debug, Clone)]
pub struct RunRow {
    pub accession: String,
    pub title: Option<String>,
    pub experiment_accession: Option<String>,
    pub run_date: Option<OffsetDateTime>,
    pub read_count: Option<u64>,
    pub base_count: Option<u64>,
    pub hoisted: HoistedAttributes,
    pub metadata_json: String,
}

#[derive(Debug, Clone)]
pub struct AnalysisRow {
    pub accession: String,
    pub title: Option<String>,
    pub study_accession: Option<String>,
    pub analysis_type: Option<String>,
    pub hoisted: HoistedAttributes,
    pub metadata_json: String,
}

#[derive(Debug, Clone)]
pub struct SubmissionRow {
    pub accession: String,
    pub title: Option<String>,
    pub center: Option<String>,
    pub submission_date: Option<OffsetDateTime>,
    pub hoisted: HoistedAttributes,
    pub metadata_json: String,
}

#[derive(Debug, Clone)]
pub struct SamplePoolRow {
    pub parent_accession: String,
    pub member_accession: String,
    pub member_name: Option<String>,
    pub proportion: Option<f64>,
    pub read_label: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierRowKind {
    Primary,
    Secondary,
    External,
    Submitter,
    Uuid,
}

#[derive(Debug, Clone)]
pub struct IdentifierRow {
    pub owner_kind: &'static str,
    pub owner_accession: String,
    pub kind: IdentifierRowKind,
    pub namespace: Option<String>,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRowKind {
    Url,
    Xref,
}

#[derive(Debug, Clone)]
pub struct LinkRow {
    pub owner_kind: &'static str,
    pub owner_accession: String,
    pub kind: LinkRowKind,
    pub label: Option<String>,
    pub target: String,
}

/// A normalized row plus the identifier/link/pool rows the extractor spun
/// off from the same record.
#[derive(Debug, Clone)]
pub enum Row {
    Study(StudyRow),
    Experiment(ExperimentRow),
    Sample(SampleRow),
    Run(RunRow),
    Analysis(AnalysisRow),
    Submission(SubmissionRow),
}

impl Row {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Row::Study(_) => "study",
            Row::Experiment(_) => "experiment",
            Row::Sample(_) => "sample",
            Row::Run(_) => "run",
            Row::Analysis(_) => "analysis",
            Row::Submission(_) => "submission",
        }
    }

    pub fn accession(&self) -> &str {
        match self {
            Row::Study(r) => &r.accession,
            Row::Experiment(r) => &r.accession,
            Row::Sample(r) => &r.accession,
            Row::Run(r) => &r.accession,
            Row::Analysis(r) => &r.accession,
            Row::Submission(r) => &r.accession,
        }
    }
}

/// The full extraction result for one record: the normalized row plus its
/// satellite rows (spec §4.4: pools, identifiers, links are separate rows).
#[derive(Debug, Clone, Default)]
pub struct ExtractedRows {
    pub row: Option<Row>,
    pub pool: Vec<SamplePoolRow>,
    pub identifiers: Vec<IdentifierRow>,
    pub links: Vec<LinkRow>,
}
