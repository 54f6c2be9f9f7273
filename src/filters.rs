//! Filter engine (C5): a conjunction of independent axes evaluated per row,
//! with per-axis skip counters and four unique-accession sets. Axes that
//! don't apply to a given row kind never exclude it — e.g. a strategy
//! filter only ever rejects Experiment rows, never Study rows (spec §8 S6).

use crate::query::{canonicalize_strategy, DateField, FilterSpec};
use crate::rows::Row;
use std::collections::HashSet;

#[derive(Debug, Default, Clone)]
pub struct FilterStats {
    pub skipped_by_taxonomy: u64,
    pub skipped_by_date: u64,
    pub skipped_by_organism: u64,
    pub skipped_by_platform: u64,
    pub skipped_by_strategy: u64,
    pub skipped_by_study_type: u64,
    pub skipped_by_instrument_model: u64,
    pub skipped_by_read_count: u64,
    pub skipped_by_base_count: u64,
    pub skipped_by_center: u64,
    pub total_matched: u64,
    pub unique_studies: HashSet<String>,
    pub unique_experiments: HashSet<String>,
    pub unique_samples: HashSet<String>,
    pub unique_runs: HashSet<String>,
}

impl FilterStats {
    fn record_match(&mut self, row: &Row) {
        self.total_matched += 1;
        match row {
            Row::Study(r) => {
                self.unique_studies.insert(r.accession.clone());
            }
            Row::Experiment(r) => {
                self.unique_experiments.insert(r.accession.clone());
            }
            Row::Sample(r) => {
                self.unique_samples.insert(r.accession.clone());
            }
            Row::Run(r) => {
                self.unique_runs.insert(r.accession.clone());
            }
            Row::Analysis(_) | Row::Submission(_) => {}
        }
    }
}

fn set_contains(set: &HashSet<String>, candidate: &str) -> bool {
    set.contains(&candidate.trim().to_lowercase())
}

/// Evaluate `row` against `spec`, incrementing the relevant skip counter on
/// the first axis that rejects it. Returns whether the row matches (and
/// should flow to the Batcher, unless `stats_only`).
pub fn matches(row: &Row, spec: &FilterSpec, stats: &mut FilterStats) -> bool {
    if spec.is_noop() {
        stats.record_match(row);
        return true;
    }

    match row {
        Row::Study(r) => {
            if let Some(set) = &spec.study_type {
                match &r.study_type {
                    Some(t) if set_contains(set, t) => {}
                    _ => {
                        stats.skipped_by_study_type += 1;
                        return false;
                    }
                }
            }
            if let Some(set) = &spec.center {
                match &r.center {
                    Some(c) if set_contains(set, c) => {}
                    _ => {
                        stats.skipped_by_center += 1;
                        return false;
                    }
                }
            }
        }
        Row::Experiment(r) => {
            if let Some(set) = &spec.platform {
                match &r.platform {
                    Some(p) if set_contains(set, p) => {}
                    _ => {
                        stats.skipped_by_platform += 1;
                        return false;
                    }
                }
            }
            if let Some(set) = &spec.strategy {
                match &r.library_strategy {
                    Some(s) if set.contains(&canonicalize_strategy(s)) => {}
                    _ => {
                        stats.skipped_by_strategy += 1;
                        return false;
                    }
                }
            }
            if let Some(set) = &spec.instrument_model {
                match &r.instrument_model {
                    Some(m) if set_contains(set, m) => {}
                    _ => {
                        stats.skipped_by_instrument_model += 1;
                        return false;
                    }
                }
            }
            if let Some(set) = &spec.center {
                match &r.center {
                    Some(c) if set_contains(set, c) => {}
                    _ => {
                        stats.skipped_by_center += 1;
                        return false;
                    }
                }
            }
        }
        Row::Sample(r) => {
            if let Some(set) = &spec.organism_include {
                match &r.hoisted.organism {
                    Some(o) if set_contains(set, o) => {}
                    _ => {
                        stats.skipped_by_organism += 1;
                        return false;
                    }
                }
            }
            if let Some(set) = &spec.organism_exclude {
                if let Some(o) = &r.hoisted.organism {
                    if set_contains(set, o) {
                        stats.skipped_by_organism += 1;
                        return false;
                    }
                }
            }
            if let Some(set) = &spec.taxonomy_include {
                match &r.taxon_id {
                    Some(t) if set_contains(set, t) => {}
                    _ => {
                        stats.skipped_by_taxonomy += 1;
                        return false;
                    }
                }
            }
            if let Some(set) = &spec.taxonomy_exclude {
                if let Some(t) = &r.taxon_id {
                    if set_contains(set, t) {
                        stats.skipped_by_taxonomy += 1;
                        return false;
                    }
                }
            }
            if let Some(set) = &spec.center {
                match &r.center {
                    Some(c) if set_contains(set, c) => {}
                    _ => {
                        stats.skipped_by_center += 1;
                        return false;
                    }
                }
            }
        }
        Row::Run(r) => {
            if spec.date_field == Some(DateField::RunDate) {
                if let Some((lo, hi)) = spec.date_range {
                    match r.run_date {
                        Some(d) if d >= lo && d <= hi => {}
                        _ => {
                            stats.skipped_by_date += 1;
                            return false;
                        }
                    }
                }
            }
            if let Some(min) = spec.read_count_min {
                if r.read_count.unwrap_or(0) < min {
                    stats.skipped_by_read_count += 1;
                    return false;
                }
            }
            if let Some(max) = spec.read_count_max {
                if r.read_count.unwrap_or(u64::MAX) > max {
                    stats.skipped_by_read_count += 1;
                    return false;
                }
            }
            if let Some(min) = spec.base_count_min {
                if r.base_count.unwrap_or(0) < min {
                    stats.skipped_by_base_count += 1;
                    return false;
                }
            }
            if let Some(max) = spec.base_count_max {
                if r.base_count.unwrap_or(u64::MAX) > max {
                    stats.skipped_by_base_count += 1;
                    return false;
                }
            }
        }
        Row::Analysis(_) => {}
        Row::Submission(r) => {
            if spec.date_field == Some(DateField::SubmissionDate) {
                if let Some((lo, hi)) = spec.date_range {
                    match r.submission_date {
                        Some(d) if d >= lo && d <= hi => {}
                        _ => {
                            stats.skipped_by_date += 1;
                            return false;
                        }
                    }
                }
            }
            if let Some(set) = &spec.center {
                match &r.center {
                    Some(c) if set_contains(set, c) => {}
                    _ => {
                        stats.skipped_by_center += 1;
                        return false;
                    }
                }
            }
        }
    }

    stats.record_match(row);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rows::{ExperimentRow, HoistedAttributes, StudyRow};

    fn study(accession: &str) -> Row {
        Row::Study(StudyRow {
            accession: accession.to_string(),
            title: None,
            center: None,
            study_type: None,
            hoisted: HoistedAttributes::default(),
            metadata_json: "{}".to_string(),
        })
    }

    fn experiment(accession: &str, strategy: Option<&str>) -> Row {
        Row::Experiment(ExperimentRow {
            accession: accession.to_string(),
            title: None,
            center: None,
            study_accession: None,
            platform: Some("ILLUMINA".to_string()),
            instrument_model: None,
            library_strategy: strategy.map(|s| s.to_string()),
            library_source: None,
            library_selection: None,
            hoisted: HoistedAttributes::default(),
            metadata_json: "{}".to_string(),
        })
    }

    #[test]
    fn strategy_filter_does_not_reject_study_rows() {
        let mut spec = FilterSpec::default();
        spec.strategy = Some(["rna-seq".to_string()].into_iter().collect());
        let spec = spec.normalize();
        let mut stats = FilterStats::default();

        assert!(matches(&study("SRP001"), &spec, &mut stats));
        assert!(matches(&experiment("SRX001", Some("RNA-Seq")), &spec, &mut stats));

        assert_eq!(stats.skipped_by_strategy, 0);
        assert_eq!(stats.total_matched, 2);
        assert_eq!(stats.unique_studies.len(), 1);
        assert_eq!(stats.unique_experiments.len(), 1);
    }

    #[test]
    fn strategy_filter_rejects_non_matching_experiment() {
        let mut spec = FilterSpec::default();
        spec.strategy = Some(["rna-seq".to_string()].into_iter().collect());
        let spec = spec.normalize();
        let mut stats = FilterStats::default();

        assert!(!matches(&experiment("SRX002", Some("WGS")), &spec, &mut stats));
        assert_eq!(stats.skipped_by_strategy, 1);
        assert_eq!(stats.total_matched, 0);
    }
}
