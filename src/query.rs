//! Filter specification (C5 config): a conjunction of independent axes over
//! normalized rows, plus `.normalize()` for case-insensitive set membership
//! tests (spec §4.5).

use std::collections::HashSet;
use time::OffsetDateTime;

#[derive(Clone, Debug, Default)]
pub struct FilterSpec {
    pub taxonomy_include: Option<HashSet<String>>,
    pub taxonomy_exclude: Option<HashSet<String>>,
    pub date_field: Option<DateField>,
    pub date_range: Option<(OffsetDateTime, OffsetDateTime)>,
    pub organism_include: Option<HashSet<String>>,
    pub organism_exclude: Option<HashSet<String>>,
    pub platform: Option<HashSet<String>>,
    pub strategy: Option<HashSet<String>>,
    pub study_type: Option<HashSet<String>>,
    pub instrument_model: Option<HashSet<String>>,
    pub read_count_min: Option<u64>,
    pub read_count_max: Option<u64>,
    pub base_count_min: Option<u64>,
    pub base_count_max: Option<u64>,
    pub center: Option<HashSet<String>>,
    /// Participate in filtering and accrue statistics, but skip the
    /// downstream Batcher entirely (spec §4.5).
    pub stats_only: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DateField {
    RunDate,
    SubmissionDate,
}

impl FilterSpec {
    /// Lowercase and intern every string-set axis so membership tests are
    /// simple `HashSet::contains` calls against a normalized candidate.
    pub fn normalize(mut self) -> Self {
        let lower = |set: &mut Option<HashSet<String>>| {
            if let Some(s) = set.take() {
                *set = Some(s.into_iter().map(|v| v.trim().to_lowercase()).collect());
            }
        };
        lower(&mut self.taxonomy_include);
        lower(&mut self.taxonomy_exclude);
        lower(&mut self.organism_include);
        lower(&mut self.organism_exclude);
        lower(&mut self.platform);
        lower(&mut self.study_type);
        lower(&mut self.instrument_model);
        lower(&mut self.center);
        if let Some(strategies) = self.strategy.take() {
            self.strategy = Some(strategies.into_iter().map(|s| canonicalize_strategy(&s)).collect());
        }
        self
    }

    pub fn is_noop(&self) -> bool {
        self.taxonomy_include.is_none()
            && self.taxonomy_exclude.is_none()
            && self.date_range.is_none()
            && self.organism_include.is_none()
            && self.organism_exclude.is_none()
            && self.platform.is_none()
            && self.strategy.is_none()
            && self.study_type.is_none()
            && self.instrument_model.is_none()
            && self.read_count_min.is_none()
            && self.read_count_max.is_none()
            && self.base_count_min.is_none()
            && self.base_count_max.is_none()
            && self.center.is_none()
    }
}

/// `rnaseq` → `rna-seq`, matching the Extractor's canonicalization so a
/// filter axis and a hoisted/canonicalized row field compare equal.
pub fn canonicalize_strategy(raw: &str) -> String {
    let compact: String = raw.chars().filter(|c| c.is_alphanumeric()).collect();
    match compact.to_lowercase().as_str() {
        "rnaseq" => "rna-seq".to_string(),
        "chipseq" => "chip-seq".to_string(),
        "atacseq" => "atac-seq".to_string(),
        "bisulfiteseq" => "bisulfite-seq".to_string(),
        _ => raw.trim().to_lowercase(),
    }
}
