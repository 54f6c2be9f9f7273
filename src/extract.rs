//! Extractor (C4): normalizes a typed `Record` into sink-ready `Row`s,
//! hoisting well-known attribute tags, validating closed enumerations,
//! checking pool proportions, and encoding leftover collections as a
//! deterministic JSON metadata blob.

use crate::date::parse_utc;
use crate::record::{Attribute, IdentifierKind, LinkKind, Record};
use crate::rows::{
    AnalysisRow, ExperimentRow, ExtractedRows, HoistedAttributes, IdentifierRow, IdentifierRowKind,
    LinkRow, LinkRowKind, Row, RunRow, SamplePoolRow, SampleRow, StudyRow, SubmissionRow,
};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// Counters for conditions the Extractor absorbs rather than fails on —
/// feeds the printable statistics report (SPEC_FULL.md §3 supplement).
#[derive(Debug, Default, Clone)]
pub struct ExtractWarnings {
    pub missing_platform: u64,
    pub unknown_enum_value: u64,
    pub pool_proportion_rejected: u64,
    pub unparseable_date: u64,
}

const LIBRARY_STRATEGIES: &[&str] = &[
    "WGS", "WGA", "WXS", "RNA-SEQ", "CHIP-SEQ", "MNASE-SEQ", "DNASE-HYPERSENSITIVITY",
    "BISULFITE-SEQ", "ATAC-SEQ", "MIRNA-SEQ", "NCRNA-SEQ", "FAIRE-SEQ", "SELEX", "RIP-SEQ",
    "CLONE", "POOLCLONE", "AMPLICON", "CLONEEND", "FINISHING", "CTS", "MRE-SEQ", "MEDIP-SEQ",
    "MBD-SEQ", "TN-SEQ", "VALIDATION", "FL-CDNA", "GBS", "SYNTHETIC-LONG-READ",
    "TARGETED-CAPTURE", "OTHER",
];

const LIBRARY_SOURCES: &[&str] = &[
    "GENOMIC", "TRANSCRIPTOMIC", "METAGENOMIC", "METATRANSCRIPTOMIC", "SYNTHETIC", "VIRAL RNA",
    "GENOMIC SINGLE CELL", "TRANSCRIPTOMIC SINGLE CELL", "OTHER",
];

const LIBRARY_SELECTIONS: &[&str] = &[
    "RANDOM", "PCR", "RANDOM PCR", "RT-PCR", "HMPR", "MF", "CF-S", "CF-M", "CF-H", "CF-T", "MDA",
    "MSLL", "CDNA", "CHIP", "MNASE", "DNASE", "HYBRID SELECTION", "REDUCED REPRESENTATION",
    "RESTRICTION DIGEST", "CAGE", "RACE", "SIZE FRACTIONATION", "OTHER", "UNSPECIFIED",
];

/// Closed, non-learned lookup from common names/synonyms (lower-cased) to
/// the canonical binomial (spec §3: "the table is closed, not learned").
/// Anything not in this table passes through untouched beyond trimming.
const ORGANISM_TABLE: &[(&str, &str)] = &[
    ("human", "Homo sapiens"),
    ("mouse", "Mus musculus"),
    ("house mouse", "Mus musculus"),
    ("rat", "Rattus norvegicus"),
    ("brown rat", "Rattus norvegicus"),
    ("zebrafish", "Danio rerio"),
    ("fruit fly", "Drosophila melanogaster"),
    ("fly", "Drosophila melanogaster"),
    ("baker's yeast", "Saccharomyces cerevisiae"),
    ("brewer's yeast", "Saccharomyces cerevisiae"),
    ("yeast", "Saccharomyces cerevisiae"),
    ("thale cress", "Arabidopsis thaliana"),
    ("chicken", "Gallus gallus"),
    ("cow", "Bos taurus"),
    ("cattle", "Bos taurus"),
    ("pig", "Sus scrofa"),
    ("domestic pig", "Sus scrofa"),
    ("dog", "Canis lupus familiaris"),
    ("nematode", "Caenorhabditis elegans"),
    ("roundworm", "Caenorhabditis elegans"),
    ("e. coli", "Escherichia coli"),
    ("ecoli", "Escherichia coli"),
];

/// Optionally canonicalizes an organism string via `ORGANISM_TABLE`,
/// matched case-insensitively; an unrecognized value (including a value
/// that is already a canonical binomial) passes through trimmed.
fn canonicalize_organism(raw: &str) -> String {
    let trimmed = raw.trim();
    let lower = trimmed.to_ascii_lowercase();
    ORGANISM_TABLE
        .iter()
        .find(|(name, _)| *name == lower)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or_else(|| trimmed.to_string())
}

/// `rnaseq` → `RNA-Seq` style aliasing before canonicalization, mirroring
/// the strategy alias table the Filter (C5) also canonicalizes against.
fn alias_strategy(raw: &str) -> String {
    let compact: String = raw.chars().filter(|c| c.is_alphanumeric()).collect();
    let compact = compact.to_ascii_uppercase();
    match compact.as_str() {
        "RNASEQ" => "RNA-SEQ".to_string(),
        "CHIPSEQ" => "CHIP-SEQ".to_string(),
        "ATACSEQ" => "ATAC-SEQ".to_string(),
        "BISULFITESEQ" => "BISULFITE-SEQ".to_string(),
        _ => raw.trim().to_ascii_uppercase(),
    }
}

/// Normalize against a closed set: returns the canonical form if a mapping
/// exists, else the uppercased value verbatim with a warning flag
/// (spec §3 invariant on enumerations).
fn canonicalize(raw: &str, closed_set: &[&str], alias: impl Fn(&str) -> String) -> (String, bool) {
    let aliased = alias(raw);
    if closed_set.contains(&aliased.as_str()) {
        (aliased, false)
    } else {
        (aliased, true)
    }
}

fn identity_alias(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

fn hoist_attributes(attrs: &[Attribute]) -> (HoistedAttributes, HashSet<usize>) {
    let mut hoisted = HoistedAttributes::default();
    let mut consumed = HashSet::new();
    let mut age_value: Option<String> = None;
    let mut age_units: Option<String> = None;

    for (idx, attr) in attrs.iter().enumerate() {
        let tag = attr.tag.to_ascii_lowercase();
        let mut used = true;
        match tag.as_str() {
            "organism" => hoisted.organism = Some(canonicalize_organism(&attr.value)),
            "tissue" => hoisted.tissue = Some(attr.value.clone()),
            "cell_type" => hoisted.cell_type = Some(attr.value.clone()),
            "cell_line" => hoisted.cell_line = Some(attr.value.clone()),
            "sex" | "gender" => hoisted.sex = Some(attr.value.clone()),
            "age" => {
                age_value = Some(attr.value.clone());
                age_units = attr.units.clone();
            }
            "disease" | "disease_state" => hoisted.disease = Some(attr.value.clone()),
            "treatment" => hoisted.treatment = Some(attr.value.clone()),
            "geo_loc_name" | "geographic_location" => hoisted.geo_loc_name = Some(attr.value.clone()),
            "lat_lon" => hoisted.lat_lon = Some(attr.value.clone()),
            "collection_date" => hoisted.collection_date = Some(attr.value.clone()),
            "env_biome" => hoisted.env_biome = Some(attr.value.clone()),
            "env_feature" => hoisted.env_feature = Some(attr.value.clone()),
            "env_material" => hoisted.env_material = Some(attr.value.clone()),
            "biosample" => hoisted.biosample_accession = Some(attr.value.clone()),
            "bioproject" => hoisted.bioproject_accession = Some(attr.value.clone()),
            _ => used = false,
        }
        if used {
            consumed.insert(idx);
        }
    }

    if let Some(value) = age_value {
        hoisted.age = Some(match age_units {
            Some(units) => format!("{value} {units}"),
            None => value,
        });
    }

    (hoisted, consumed)
}

fn attributes_json(attrs: &[Attribute], consumed: &HashSet<usize>) -> Value {
    let arr: Vec<Value> = attrs
        .iter()
        .enumerate()
        .filter(|(idx, _)| !consumed.contains(idx))
        .map(|(_, a)| {
            let mut obj = Map::new();
            obj.insert("tag".to_string(), Value::String(a.tag.clone()));
            obj.insert("value".to_string(), Value::String(a.value.clone()));
            if let Some(units) = &a.units {
                obj.insert("units".to_string(), Value::String(units.clone()));
            }
            Value::Object(obj)
        })
        .collect();
    Value::Array(arr)
}

fn build_metadata_json(attrs: &[Attribute], consumed: &HashSet<usize>, extras: &Value) -> String {
    let mut obj = Map::new();
    let leftover = attributes_json(attrs, consumed);
    if let Value::Array(a) = &leftover {
        if !a.is_empty() {
            obj.insert("attributes".to_string(), leftover);
        }
    }
    if let Value::Object(extra_map) = extras {
        for (k, v) in extra_map {
            obj.insert(k.clone(), v.clone());
        }
    }
    // serde_json::Map is a BTreeMap by default (no `preserve_order`
    // feature), so keys come out sorted without extra work; arrays above
    // were built in source order already.
    serde_json::to_string(&Value::Object(obj)).unwrap_or_else(|_| "{}".to_string())
}

fn identifier_rows(owner_kind: &'static str, owner_accession: &str, ids: &[crate::record::Identifier]) -> Vec<IdentifierRow> {
    ids.iter()
        .map(|id| IdentifierRow {
            owner_kind,
            owner_accession: owner_accession.to_string(),
            kind: match id.kind {
                IdentifierKind::Primary => IdentifierRowKind::Primary,
                IdentifierKind::Secondary => IdentifierRowKind::Secondary,
                IdentifierKind::External => IdentifierRowKind::External,
                IdentifierKind::Submitter => IdentifierRowKind::Submitter,
                IdentifierKind::Uuid => IdentifierRowKind::Uuid,
            },
            namespace: id.namespace.clone(),
            value: id.value.clone(),
        })
        .collect()
}

fn link_rows(owner_kind: &'static str, owner_accession: &str, links: &[crate::record::XrefLink]) -> Vec<LinkRow> {
    links
        .iter()
        .map(|l| LinkRow {
            owner_kind,
            owner_accession: owner_accession.to_string(),
            kind: match l.kind {
                LinkKind::Url => LinkRowKind::Url,
                LinkKind::Xref => LinkRowKind::Xref,
            },
            label: l.label.clone(),
            target: l.target.clone(),
        })
        .collect()
}

/// Reject a pool whose proportions are all specified but sum outside
/// [0.99, 1.01]; the Experiment itself still flows (spec §4.4).
fn validate_pool(pool: &[crate::record::PoolMember], warnings: &mut ExtractWarnings) -> bool {
    if pool.is_empty() {
        return true;
    }
    let proportions: Vec<f64> = pool.iter().filter_map(|m| m.proportion).collect();
    if proportions.len() != pool.len() {
        // Not every member declares a proportion: nothing to sum-check.
        return true;
    }
    let sum: f64 = proportions.iter().sum();
    let ok = (0.99..=1.01).contains(&sum);
    if !ok {
        warnings.pool_proportion_rejected += 1;
    }
    ok
}

/// Normalize one typed record into its sink-ready row plus satellite rows.
/// Always succeeds (a record with no accession never reaches here — the
/// decoder already dropped it).
pub fn extract(record: Record, hoist_known_tags: bool, warnings: &mut ExtractWarnings) -> ExtractedRows {
    match record {
        Record::Study(r) => {
            let (hoisted, consumed) = if hoist_known_tags {
                hoist_attributes(&r.attributes)
            } else {
                (HoistedAttributes::default(), HashSet::new())
            };
            let metadata_json = build_metadata_json(&r.attributes, &consumed, &r.extras);
            ExtractedRows {
                row: Some(Row::Study(StudyRow {
                    accession: r.accession.clone(),
                    title: r.title,
                    center: r.center,
                    study_type: r.study_type,
                    hoisted,
                    metadata_json,
                })),
                identifiers: identifier_rows("study", &r.accession, &r.identifiers),
                links: link_rows("study", &r.accession, &r.links),
                pool: Vec::new(),
            }
        }
        Record::Experiment(r) => {
            let (hoisted, consumed) = if hoist_known_tags {
                hoist_attributes(&r.attributes)
            } else {
                (HoistedAttributes::default(), HashSet::new())
            };
            let metadata_json = build_metadata_json(&r.attributes, &consumed, &r.extras);
            if r.platform.is_none() {
                warnings.missing_platform += 1;
            }
            let library_strategy = r.library_strategy.map(|s| {
                let (canon, unknown) = canonicalize(&s, LIBRARY_STRATEGIES, alias_strategy);
                if unknown {
                    warnings.unknown_enum_value += 1;
                    tracing::warn!(value = %s, "unrecognized library strategy");
                }
                canon
            });
            let library_source = r.library_source.map(|s| {
                let (canon, unknown) = canonicalize(&s, LIBRARY_SOURCES, identity_alias);
                if unknown {
                    warnings.unknown_enum_value += 1;
                    tracing::warn!(value = %s, "unrecognized library source");
                }
                canon
            });
            let library_selection = r.library_selection.map(|s| {
                let (canon, unknown) = canonicalize(&s, LIBRARY_SELECTIONS, identity_alias);
                if unknown {
                    warnings.unknown_enum_value += 1;
                    tracing::warn!(value = %s, "unrecognized library selection");
                }
                canon
            });

            let pool_ok = validate_pool(&r.pool, warnings);
            let pool = if pool_ok {
                r.pool
                    .iter()
                    .map(|m| SamplePoolRow {
                        parent_accession: r.accession.clone(),
                        member_accession: m.member_accession.clone(),
                        member_name: m.member_name.clone(),
                        proportion: m.proportion,
                        read_label: m.read_label.clone(),
                    })
                    .collect()
            } else {
                Vec::new()
            };

            ExtractedRows {
                row: Some(Row::Experiment(ExperimentRow {
                    accession: r.accession.clone(),
                    title: r.title,
                    center: r.center,
                    study_accession: r.study_accession,
                    platform: r.platform,
                    instrument_model: r.instrument_model,
                    library_strategy,
                    library_source,
                    library_selection,
                    hoisted,
                    metadata_json,
                })),
                identifiers: identifier_rows("experiment", &r.accession, &r.identifiers),
                links: link_rows("experiment", &r.accession, &r.links),
                pool,
            }
        }
        Record::Sample(r) => {
            let (hoisted, consumed) = if hoist_known_tags {
                hoist_attributes(&r.attributes)
            } else {
                (HoistedAttributes::default(), HashSet::new())
            };
            let metadata_json = build_metadata_json(&r.attributes, &consumed, &r.extras);
            ExtractedRows {
                row: Some(Row::Sample(SampleRow {
                    accession: r.accession.clone(),
                    title: r.title,
                    center: r.center,
                    taxon_id: r.taxon_id,
                    hoisted,
                    metadata_json,
                })),
                identifiers: identifier_rows("sample", &r.accession, &r.identifiers),
                links: link_rows("sample", &r.accession, &r.links),
                pool: Vec::new(),
            }
        }
        Record::Run(r) => {
            let (hoisted, consumed) = if hoist_known_tags {
                hoist_attributes(&r.attributes)
            } else {
                (HoistedAttributes::default(), HashSet::new())
            };
            let mut extras = r.extras.clone();
            if !r.files.is_empty() {
                if let Value::Object(ref mut obj) = extras {
                    let files_json: Vec<Value> = r
                        .files
                        .iter()
                        .map(|f| {
                            let mut o = Map::new();
                            o.insert("filename".to_string(), Value::String(f.filename.clone()));
                            if let Some(t) = &f.file_type {
                                o.insert("file_type".to_string(), Value::String(t.to_ascii_lowercase()));
                            }
                            if let Some(c) = &f.checksum {
                                o.insert("checksum".to_string(), Value::String(c.clone()));
                            }
                            if let Some(m) = &f.checksum_method {
                                o.insert("checksum_method".to_string(), Value::String(m.clone()));
                            }
                            Value::Object(o)
                        })
                        .collect();
                    obj.insert("files".to_string(), Value::Array(files_json));
                }
            }
            let metadata_json = build_metadata_json(&r.attributes, &consumed, &extras);
            let run_date = r.run_date.as_deref().and_then(|raw| {
                let parsed = parse_utc(raw);
                if parsed.is_none() {
                    warnings.unparseable_date += 1;
                }
                parsed
            });
            ExtractedRows {
                row: Some(Row::Run(RunRow {
                    accession: r.accession.clone(),
                    title: r.title,
                    experiment_accession: r.experiment_accession,
                    run_date,
                    read_count: r.read_count,
                    base_count: r.base_count,
                    hoisted,
                    metadata_json,
                })),
                identifiers: identifier_rows("run", &r.accession, &r.identifiers),
                links: link_rows("run", &r.accession, &r.links),
                pool: Vec::new(),
            }
        }
        Record::Analysis(r) => {
            let (hoisted, consumed) = if hoist_known_tags {
                hoist_attributes(&r.attributes)
            } else {
                (HoistedAttributes::default(), HashSet::new())
            };
            let metadata_json = build_metadata_json(&r.attributes, &consumed, &r.extras);
            let analysis_type = r.analysis_type.map(|t| t.trim().to_ascii_uppercase());
            ExtractedRows {
                row: Some(Row::Analysis(AnalysisRow {
                    accession: r.accession.clone(),
                    title: r.title,
                    study_accession: r.study_accession,
                    analysis_type,
                    hoisted,
                    metadata_json,
                })),
                identifiers: identifier_rows("analysis", &r.accession, &r.identifiers),
                links: link_rows("analysis", &r.accession, &r.links),
                pool: Vec::new(),
            }
        }
        Record::Submission(r) => {
            let (hoisted, consumed) = if hoist_known_tags {
                hoist_attributes(&r.attributes)
            } else {
                (HoistedAttributes::default(), HashSet::new())
            };
            let metadata_json = build_metadata_json(&r.attributes, &consumed, &r.extras);
            let submission_date = r.submission_date.as_deref().and_then(|raw| {
                let parsed = parse_utc(raw);
                if parsed.is_none() {
                    warnings.unparseable_date += 1;
                }
                parsed
            });
            ExtractedRows {
                row: Some(Row::Submission(SubmissionRow {
                    accession: r.accession.clone(),
                    title: r.title,
                    center: r.center,
                    submission_date,
                    hoisted,
                    metadata_json,
                })),
                identifiers: identifier_rows("submission", &r.accession, &r.identifiers),
                links: link_rows("submission", &r.accession, &r.links),
                pool: Vec::new(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Attribute, ExperimentRecord, PoolMember, StudyRecord};
    use serde_json::json;

    #[test]
    fn hoists_organism_and_leaves_rest_in_metadata() {
        let mut r = StudyRecord::default();
        r.accession = "SRP001".to_string();
        r.attributes = vec![
            Attribute { tag: "organism".to_string(), value: "Homo sapiens".to_string(), units: None },
            Attribute { tag: "custom_tag".to_string(), value: "x".to_string(), units: None },
        ];
        r.extras = json!({});
        let mut warnings = ExtractWarnings::default();
        let extracted = extract(Record::Study(r), true, &mut warnings);
        let Some(Row::Study(row)) = extracted.row else { panic!("expected study row") };
        assert_eq!(row.hoisted.organism.as_deref(), Some("Homo sapiens"));
        assert!(row.metadata_json.contains("custom_tag"));
        assert!(!row.metadata_json.contains("\"organism\""));
    }

    #[test]
    fn rejects_pool_outside_tolerance() {
        let mut r = ExperimentRecord::default();
        r.accession = "SRX001".to_string();
        r.pool = vec![
            PoolMember { member_accession: "SRS001".to_string(), member_name: None, proportion: Some(0.5), read_label: None },
            PoolMember { member_accession: "SRS002".to_string(), member_name: None, proportion: Some(0.3), read_label: None },
        ];
        let mut warnings = ExtractWarnings::default();
        let extracted = extract(Record::Experiment(r), true, &mut warnings);
        assert!(extracted.pool.is_empty());
        assert_eq!(warnings.pool_proportion_rejected, 1);
        assert!(extracted.row.is_some(), "experiment itself still flows");
    }

    #[test]
    fn accepts_pool_within_tolerance() {
        let mut r = ExperimentRecord::default();
        r.accession = "SRX002".to_string();
        r.pool = vec![
            PoolMember { member_accession: "SRS003".to_string(), member_name: None, proportion: Some(0.6), read_label: None },
            PoolMember { member_accession: "SRS004".to_string(), member_name: None, proportion: Some(0.4), read_label: None },
        ];
        let mut warnings = ExtractWarnings::default();
        let extracted = extract(Record::Experiment(r), true, &mut warnings);
        assert_eq!(extracted.pool.len(), 2);
        assert_eq!(warnings.pool_proportion_rejected, 0);
    }

    #[test]
    fn unknown_strategy_passes_through_uppercased() {
        let mut r = ExperimentRecord::default();
        r.accession = "SRX003".to_string();
        r.library_strategy = Some("some-future-strategy".to_string());
        let mut warnings = ExtractWarnings::default();
        let extracted = extract(Record::Experiment(r), true, &mut warnings);
        let Some(Row::Experiment(row)) = extracted.row else { panic!("expected experiment row") };
        assert_eq!(row.library_strategy.as_deref(), Some("SOME-FUTURE-STRATEGY"));
        assert_eq!(warnings.unknown_enum_value, 1);
    }

    #[test]
    fn canonicalizes_known_organism_synonym() {
        let mut r = StudyRecord::default();
        r.accession = "SRP002".to_string();
        r.attributes = vec![Attribute { tag: "organism".to_string(), value: "Human".to_string(), units: None }];
        let mut warnings = ExtractWarnings::default();
        let extracted = extract(Record::Study(r), true, &mut warnings);
        let Some(Row::Study(row)) = extracted.row else { panic!("expected study row") };
        assert_eq!(row.hoisted.organism.as_deref(), Some("Homo sapiens"));
    }

    #[test]
    fn unrecognized_organism_passes_through_trimmed() {
        let mut r = StudyRecord::default();
        r.accession = "SRP003".to_string();
        r.attributes = vec![Attribute { tag: "organism".to_string(), value: "  Gallus gallus  ".to_string(), units: None }];
        let mut warnings = ExtractWarnings::default();
        let extracted = extract(Record::Study(r), true, &mut warnings);
        let Some(Row::Study(row)) = extracted.row else { panic!("expected study row") };
        assert_eq!(row.hoisted.organism.as_deref(), Some("Gallus gallus"));
    }

    #[test]
    fn canonicalizes_rnaseq_alias() {
        let mut r = ExperimentRecord::default();
        r.accession = "SRX004".to_string();
        r.library_strategy = Some("rnaseq".to_string());
        let mut warnings = ExtractWarnings::default();
        let extracted = extract(Record::Experiment(r), true, &mut warnings);
        let Some(Row::Experiment(row)) = extracted.row else { panic!("expected experiment row") };
        assert_eq!(row.library_strategy.as_deref(), Some("RNA-SEQ"));
        assert_eq!(warnings.unknown_enum_value, 0);
    }
}
