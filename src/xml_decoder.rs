//! Record Decoder (C3): a pull-based, tolerant XML reader turning one
//! member's byte stream into typed records on a bounded channel.
//!
//! The decoder does not hand-roll a state machine per record kind. Instead
//! it reads each top-level child into a generic, order-preserving element
//! tree (`XmlNode`) and hands that to `crate::extract`'s record builders —
//! this is what lets it "tolerate unknown children (ignored)" uniformly
//! across all six kinds instead of six bespoke parsers.

use crate::cancellation::CancellationToken;
use crate::error::IngestError;
use crate::record::{
    AnalysisRecord, Attribute, ExperimentRecord, FileEntry, Identifier, IdentifierKind, LinkKind,
    PoolMember, Record, RecordKind, RunRecord, SampleRecord, StudyRecord, SubmissionRecord, XrefLink,
};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde_json::Value;
use std::io::BufRead;
use std::sync::mpsc::SyncSender;

/// Channel capacity bounding how far the decoder can run ahead of the
/// consumer thread (spec §4.3).
pub const CHANNEL_CAPACITY: usize = 100;

/// A generic, order-preserving XML element: tag name as written in the
/// source (matching against it is always case-insensitive), attributes,
/// direct text content, and child elements in source order.
#[derive(Debug, Clone, Default)]
pub struct XmlNode {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlNode> {
        self.children.iter().filter(move |c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).map(|c| c.text.as_str()).filter(|s| !s.is_empty())
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
    }
}

const SET_WRAPPERS: &[(&str, &str, RecordKind)] = &[
    ("STUDY_SET", "STUDY", RecordKind::Study),
    ("EXPERIMENT_SET", "EXPERIMENT", RecordKind::Experiment),
    ("SAMPLE_SET", "SAMPLE", RecordKind::Sample),
    ("RUN_SET", "RUN", RecordKind::Run),
    ("ANALYSIS_SET", "ANALYSIS", RecordKind::Analysis),
    ("SUBMISSION_SET", "SUBMISSION", RecordKind::Submission),
];

fn singular_kind(name: &str) -> Option<RecordKind> {
    SET_WRAPPERS.iter().find(|(_, singular, _)| name.eq_ignore_ascii_case(singular)).map(|(_, _, k)| k.clone())
}

fn set_entry(name: &str) -> Option<(&'static str, RecordKind)> {
    SET_WRAPPERS
        .iter()
        .find(|(wrapper, _, _)| name.eq_ignore_ascii_case(wrapper))
        .map(|(_, singular, kind)| (*singular, kind.clone()))
}

fn is_set_wrapper(name: &str) -> bool {
    SET_WRAPPERS.iter().any(|(wrapper, _, _)| name.eq_ignore_ascii_case(wrapper))
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DecodeStats {
    pub records_emitted: u64,
    pub records_malformed: u64,
}

fn start_attrs(start: &BytesStart) -> Vec<(String, String)> {
    start
        .attributes()
        .flatten()
        .map(|a| {
            let key = String::from_utf8_lossy(a.key.as_ref()).into_owned();
            let val = a.unescape_value().unwrap_or_default().into_owned();
            (key, val)
        })
        .collect()
}

fn local_name(start: &BytesStart) -> String {
    String::from_utf8_lossy(start.name().as_ref()).into_owned()
}

/// Read one element's full subtree given its opening `BytesStart`.
fn read_node_body<R: BufRead>(
    reader: &mut Reader<R>,
    start: &BytesStart,
) -> Result<XmlNode, quick_xml::Error> {
    let mut node = XmlNode { name: local_name(start), attrs: start_attrs(start), text: String::new(), children: Vec::new() };
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Eof => break,
            Event::Start(child_start) => {
                let child = read_node_body(reader, &child_start)?;
                node.children.push(child);
            }
            Event::Empty(child_start) => {
                node.children.push(XmlNode {
                    name: local_name(&child_start),
                    attrs: start_attrs(&child_start),
                    text: String::new(),
                    children: Vec::new(),
                });
            }
            Event::Text(t) => {
                node.text.push_str(&t.unescape().unwrap_or_default());
            }
            Event::CData(t) => {
                node.text.push_str(&String::from_utf8_lossy(t.as_ref()));
            }
            Event::End(_) => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(node)
}

fn skip_element<R: BufRead>(reader: &mut Reader<R>) {
    let mut buf = Vec::new();
    let mut depth = 1u32;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Eof) => break,
            Ok(Event::Start(_)) => depth += 1,
            Ok(Event::End(_)) => {
                depth -= 1;
                if depth == 0 {
                    break;
                }
            }
            Ok(_) => {}
            Err(_) => break,
        }
        buf.clear();
    }
}

fn emit_or_count(
    node: XmlNode,
    kind: RecordKind,
    member_name: &str,
    tx: &SyncSender<Record>,
    stats: &mut DecodeStats,
) {
    match build_record(&node, kind) {
        Some(record) => {
            stats.records_emitted += 1;
            // A full channel applies backpressure here, which is the
            // intended bound on how far the decoder runs ahead.
            let _ = tx.send(record);
        }
        None => {
            tracing::debug!(member = member_name, "dropping record with no accession");
            stats.records_malformed += 1;
        }
    }
}

/// Decode one member's body, emitting typed records onto `tx` as they are
/// recognized. A single malformed record never fails the whole member: it
/// is counted and the decoder advances to the next top-level element
/// (spec §4.3).
pub fn decode_member<R: BufRead>(
    body: R,
    member_name: &str,
    tx: &SyncSender<Record>,
    cancel: &CancellationToken,
) -> Result<DecodeStats, IngestError> {
    let mut reader = Reader::from_reader(body);
    reader.trim_text(true);
    reader.check_end_names(false);
    reader.check_comments(false);

    let mut stats = DecodeStats::default();
    let mut buf = Vec::new();

    loop {
        if cancel.is_cancelled() {
            return Err(IngestError::Cancelled);
        }
        match reader.read_event_into(&mut buf) {
            Ok(Event::Eof) => break,
            Ok(Event::Start(start)) => {
                let top_name = local_name(&start);
                if let Some((singular, kind)) = set_entry(&top_name) {
                    decode_set_body(&mut reader, singular, kind, tx, cancel, &mut stats, member_name)?;
                } else if let Some(kind) = singular_kind(&top_name) {
                    // Bare single record, no *_SET wrapper (spec §4.3 fallback).
                    match read_node_body(&mut reader, &start) {
                        Ok(node) => emit_or_count(node, kind, member_name, tx, &mut stats),
                        Err(_) => stats.records_malformed += 1,
                    }
                } else {
                    skip_element(&mut reader);
                }
            }
            Ok(Event::Empty(_)) | Ok(Event::Text(_)) | Ok(Event::Comment(_)) | Ok(Event::End(_)) => {}
            Ok(_) => {}
            Err(_) => {
                // Malformed UTF-8 / unclosed elements are tolerated by
                // non-strict mode; a hard parser error drops the remainder
                // of this top-level record and we try to keep scanning.
                stats.records_malformed += 1;
            }
        }
        buf.clear();
    }

    Ok(stats)
}

fn decode_set_body<R: BufRead>(
    reader: &mut Reader<R>,
    singular: &str,
    kind: RecordKind,
    tx: &SyncSender<Record>,
    cancel: &CancellationToken,
    stats: &mut DecodeStats,
    member_name: &str,
) -> Result<(), IngestError> {
    let mut buf = Vec::new();
    loop {
        if cancel.is_cancelled() {
            return Err(IngestError::Cancelled);
        }
        match reader.read_event_into(&mut buf) {
            Ok(Event::Eof) => break,
            Ok(Event::Start(start)) => {
                let name = local_name(&start);
                if name.eq_ignore_ascii_case(singular) {
                    match read_node_body(reader, &start) {
                        Ok(node) => emit_or_count(node, kind.clone(), member_name, tx, stats),
                        Err(_) => stats.records_malformed += 1,
                    }
                } else {
                    skip_element(reader);
                }
            }
            Ok(Event::End(end)) => {
                let name = String::from_utf8_lossy(end.name().as_ref()).into_owned();
                if is_set_wrapper(&name) {
                    break;
                }
            }
            Ok(_) => {}
            Err(_) => stats.records_malformed += 1,
        }
        buf.clear();
    }
    Ok(())
}

/// Known platform sub-elements of `<PLATFORM>`, in no particular order —
/// whichever is present names the platform (spec §4.4).
const PLATFORM_CHILDREN: &[&str] = &[
    "ILLUMINA",
    "LS454",
    "ION_TORRENT",
    "PACBIO_SMRT",
    "OXFORD_NANOPORE",
    "BGISEQ",
    "CAPILLARY",
    "COMPLETE_GENOMICS",
    "HELICOS",
    "ABI_SOLID",
];

fn parse_platform(node: &XmlNode) -> (Option<String>, Option<String>) {
    let Some(platform) = node.child("PLATFORM") else { return (None, None) };
    for candidate in PLATFORM_CHILDREN {
        if let Some(sub) = platform.child(candidate) {
            let model = sub.child_text("INSTRUMENT_MODEL").map(str::to_string);
            return (Some((*candidate).to_string()), model);
        }
    }
    // Ambiguity (i), resolved in DESIGN.md: accept the element's own text as
    // a fallback when no recognized child is present.
    let text = platform.text.trim();
    if text.is_empty() {
        (None, None)
    } else {
        (Some(text.to_string()), None)
    }
}

fn parse_attributes(node: &XmlNode, wrapper: &str) -> Vec<Attribute> {
    let Some(wrapper_node) = node.child(wrapper) else { return Vec::new() };
    wrapper_node
        .children
        .iter()
        .filter_map(|attr_node| {
            let tag = attr_node.child_text("TAG")?.to_string();
            let value = attr_node.child_text("VALUE").unwrap_or_default().to_string();
            let units = attr_node.child_text("UNITS").map(str::to_string);
            Some(Attribute { tag, value, units })
        })
        .collect()
}

fn parse_identifiers(node: &XmlNode) -> Vec<Identifier> {
    let Some(ids) = node.child("IDENTIFIERS") else { return Vec::new() };
    let mut out = Vec::new();
    for child in &ids.children {
        let kind = if child.name.eq_ignore_ascii_case("PRIMARY_ID") {
            IdentifierKind::Primary
        } else if child.name.eq_ignore_ascii_case("SECONDARY_ID") {
            IdentifierKind::Secondary
        } else if child.name.eq_ignore_ascii_case("EXTERNAL_ID") {
            IdentifierKind::External
        } else if child.name.eq_ignore_ascii_case("SUBMITTER_ID") {
            IdentifierKind::Submitter
        } else if child.name.eq_ignore_ascii_case("UUID") {
            IdentifierKind::Uuid
        } else {
            continue;
        };
        let namespace = child.attr("namespace").map(str::to_string);
        let value = child.text.trim().to_string();
        if value.is_empty() {
            continue;
        }
        out.push(Identifier { kind, namespace, value });
    }
    out
}

fn parse_links(node: &XmlNode) -> Vec<XrefLink> {
    let mut out = Vec::new();
    for wrapper in node.children.iter().filter(|c| c.name.to_ascii_uppercase().ends_with("_LINKS")) {
        for link in &wrapper.children {
            if let Some(url_link) = link.child("URL_LINK") {
                if let Some(url) = url_link.child_text("URL") {
                    out.push(XrefLink {
                        kind: LinkKind::Url,
                        label: url_link.child_text("LABEL").map(str::to_string),
                        target: url.to_string(),
                    });
                }
            } else if let Some(xref) = link.child("XREF_LINK").or_else(|| link.child("ENTREZ_LINK")) {
                if let Some(id) = xref.child_text("ID") {
                    out.push(XrefLink {
                        kind: LinkKind::Xref,
                        label: xref.child_text("DB").map(str::to_string),
                        target: id.to_string(),
                    });
                }
            }
        }
    }
    out
}

fn parse_files(node: &XmlNode) -> Vec<FileEntry> {
    let Some(files) = node.child("FILES") else { return Vec::new() };
    files
        .children_named("FILE")
        .filter_map(|f| {
            let filename = f.attr("filename")?.to_string();
            Some(FileEntry {
                filename,
                file_type: f.attr("filetype").map(str::to_string),
                checksum: f.attr("checksum").map(str::to_string),
                checksum_method: f.attr("checksum_method").map(str::to_string),
            })
        })
        .collect()
}

fn parse_pool(node: &XmlNode) -> Vec<PoolMember> {
    let pool = node
        .child("DESIGN")
        .and_then(|d| d.child("SAMPLE_DESCRIPTOR"))
        .and_then(|s| s.child("POOL"));
    let Some(pool) = pool else { return Vec::new() };
    pool.children_named("MEMBER")
        .filter_map(|m| {
            let member_accession = m.attr("accession")?.to_string();
            Some(PoolMember {
                member_accession,
                member_name: m.attr("member_name").map(str::to_string),
                proportion: m.attr("proportion").and_then(|p| p.parse::<f64>().ok()),
                read_label: m.child_text("READ_LABEL").map(str::to_string),
            })
        })
        .collect()
}

fn attr_opt(node: &XmlNode, name: &str) -> Option<String> {
    node.attr(name).map(str::to_string)
}

fn node_to_json(node: &XmlNode) -> Value {
    let mut obj = serde_json::Map::new();
    if !node.text.trim().is_empty() {
        obj.insert("#text".to_string(), Value::String(node.text.trim().to_string()));
    }
    for (k, v) in &node.attrs {
        obj.insert(format!("@{k}"), Value::String(v.clone()));
    }
    for child in &node.children {
        let entry = obj.entry(child.name.clone()).or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(arr) = entry {
            arr.push(node_to_json(child));
        }
    }
    Value::Object(obj)
}

/// Anything under the record element not already modeled as a typed field
/// is preserved here verbatim, so the round-trip property (spec §8.7) holds
/// even for schema corners this decoder doesn't know about.
fn collect_extras(node: &XmlNode, handled: &[&str]) -> Value {
    let mut obj = serde_json::Map::new();
    for child in &node.children {
        if handled.iter().any(|h| child.name.eq_ignore_ascii_case(h)) {
            continue;
        }
        obj.insert(child.name.clone(), node_to_json(child));
    }
    Value::Object(obj)
}

fn build_record(node: &XmlNode, kind: RecordKind) -> Option<Record> {
    let accession = attr_opt(node, "accession").unwrap_or_default();
    if accession.is_empty() {
        return None;
    }
    let title = node.child_text("TITLE").map(str::to_string);
    let center = attr_opt(node, "center_name");

    Some(match kind {
        RecordKind::Study => Record::Study(StudyRecord {
            accession,
            title: node
                .child("DESCRIPTOR")
                .and_then(|d| d.child_text("STUDY_TITLE"))
                .map(str::to_string)
                .or(title),
            center,
            study_type: node
                .child("DESCRIPTOR")
                .and_then(|d| d.child("STUDY_TYPE"))
                .and_then(|t| t.attr("existing_study_type"))
                .map(str::to_string),
            attributes: parse_attributes(node, "STUDY_ATTRIBUTES"),
            identifiers: parse_identifiers(node),
            links: parse_links(node),
            extras: collect_extras(
                node,
                &["DESCRIPTOR", "STUDY_ATTRIBUTES", "IDENTIFIERS", "STUDY_LINKS", "TITLE"],
            ),
        }),
        RecordKind::Experiment => {
            let (platform, instrument_model) = parse_platform(node);
            Record::Experiment(ExperimentRecord {
                accession,
                title,
                center,
                study_accession: node
                    .child("STUDY_REF")
                    .and_then(|r| r.attr("accession").map(str::to_string).or_else(|| {
                        r.child("IDENTIFIERS").and_then(|i| i.child_text("PRIMARY_ID")).map(str::to_string)
                    })),
                platform,
                instrument_model,
                library_strategy: node
                    .child("DESIGN")
                    .and_then(|d| d.child("LIBRARY_DESCRIPTOR"))
                    .and_then(|l| l.child_text("LIBRARY_STRATEGY"))
                    .map(str::to_string),
                library_source: node
                    .child("DESIGN")
                    .and_then(|d| d.child("LIBRARY_DESCRIPTOR"))
                    .and_then(|l| l.child_text("LIBRARY_SOURCE"))
                    .map(str::to_string),
                library_selection: node
                    .child("DESIGN")
                    .and_then(|d| d.child("LIBRARY_DESCRIPTOR"))
                    .and_then(|l| l.child_text("LIBRARY_SELECTION"))
                    .map(str::to_string),
                pool: parse_pool(node),
                attributes: parse_attributes(node, "EXPERIMENT_ATTRIBUTES"),
                identifiers: parse_identifiers(node),
                links: parse_links(node),
                extras: collect_extras(
                    node,
                    &[
                        "TITLE",
                        "STUDY_REF",
                        "PLATFORM",
                        "DESIGN",
                        "EXPERIMENT_ATTRIBUTES",
                        "IDENTIFIERS",
                        "EXPERIMENT_LINKS",
                    ],
                ),
            })
        }
        RecordKind::Sample => Record::Sample(SampleRecord {
            accession,
            title,
            center,
            taxon_id: node.child("SAMPLE_NAME").and_then(|n| n.child_text("TAXON_ID")).map(str::to_string),
            attributes: parse_attributes(node, "SAMPLE_ATTRIBUTES"),
            identifiers: parse_identifiers(node),
            links: parse_links(node),
            extras: collect_extras(
                node,
                &["TITLE", "SAMPLE_NAME", "SAMPLE_ATTRIBUTES", "IDENTIFIERS", "SAMPLE_LINKS"],
            ),
        }),
        RecordKind::Run => Record::Run(RunRecord {
            accession,
            title,
            experiment_accession: node.child("EXPERIMENT_REF").and_then(|r| r.attr("accession")).map(str::to_string),
            run_date: attr_opt(node, "run_date"),
            files: parse_files(node),
            read_count: attr_opt(node, "total_spots").and_then(|v| v.parse().ok()),
            base_count: attr_opt(node, "total_bases").and_then(|v| v.parse().ok()),
            attributes: parse_attributes(node, "RUN_ATTRIBUTES"),
            identifiers: parse_identifiers(node),
            links: parse_links(node),
            extras: collect_extras(
                node,
                &["TITLE", "EXPERIMENT_REF", "FILES", "RUN_ATTRIBUTES", "IDENTIFIERS", "RUN_LINKS"],
            ),
        }),
        RecordKind::Analysis => Record::Analysis(AnalysisRecord {
            accession,
            title,
            study_accession: node.child("STUDY_REF").and_then(|r| r.attr("accession")).map(str::to_string),
            analysis_type: node
                .child("ANALYSIS_TYPE")
                .and_then(|t| t.children.first())
                .map(|c| c.name.clone()),
            files: parse_files(node),
            attributes: parse_attributes(node, "ANALYSIS_ATTRIBUTES"),
            identifiers: parse_identifiers(node),
            links: parse_links(node),
            extras: collect_extras(
                node,
                &[
                    "TITLE",
                    "STUDY_REF",
                    "ANALYSIS_TYPE",
                    "FILES",
                    "ANALYSIS_ATTRIBUTES",
                    "IDENTIFIERS",
                    "ANALYSIS_LINKS",
                ],
            ),
        }),
        RecordKind::Submission => Record::Submission(SubmissionRecord {
            accession,
            title,
            center,
            submission_date: attr_opt(node, "submission_date"),
            attributes: parse_attributes(node, "SUBMISSION_ATTRIBUTES"),
            identifiers: parse_identifiers(node),
            links: parse_links(node),
            extras: collect_extras(
                node,
                &["TITLE", "SUBMISSION_ATTRIBUTES", "IDENTIFIERS", "SUBMISSION_LINKS"],
            ),
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::mpsc::sync_channel;

    #[test]
    fn decodes_set_wrapped_records() {
        let xml = br#"<STUDY_SET><STUDY accession="SRP001"><TITLE>Test Study</TITLE></STUDY></STUDY_SET>"#;
        let (tx, rx) = sync_channel(CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let stats = decode_member(Cursor::new(&xml[..]), "study.xml", &tx, &cancel).unwrap();
        drop(tx);
        let records: Vec<_> = rx.iter().collect();
        assert_eq!(stats.records_emitted, 1);
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn decodes_bare_singular_record() {
        let xml = br#"<EXPERIMENT accession="SRX001"><TITLE>bare</TITLE></EXPERIMENT>"#;
        let (tx, rx) = sync_channel(CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let stats = decode_member(Cursor::new(&xml[..]), "exp.xml", &tx, &cancel).unwrap();
        drop(tx);
        assert_eq!(stats.records_emitted, 1);
        assert_eq!(rx.iter().count(), 1);
    }

    #[test]
    fn missing_accession_is_counted_malformed() {
        let xml = br#"<STUDY_SET><STUDY><TITLE>No accession</TITLE></STUDY></STUDY_SET>"#;
        let (tx, rx) = sync_channel(CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let stats = decode_member(Cursor::new(&xml[..]), "study.xml", &tx, &cancel).unwrap();
        drop(tx);
        assert_eq!(stats.records_emitted, 0);
        assert_eq!(stats.records_malformed, 1);
        assert_eq!(rx.iter().count(), 0);
    }

    #[test]
    fn unknown_top_level_elements_are_skipped() {
        let xml = br#"<STUDY_SET><UNKNOWN_WRAPPER/><STUDY accession="SRP002"/></STUDY_SET>"#;
        let (tx, rx) = sync_channel(CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let stats = decode_member(Cursor::new(&xml[..]), "study.xml", &tx, &cancel).unwrap();
        drop(tx);
        assert_eq!(stats.records_emitted, 1);
        assert_eq!(rx.iter().count(), 1);
    }

    #[test]
    fn case_insensitive_set_and_element_names() {
        let xml = br#"<study_Set><Study accession="SRP003"/></study_Set>"#;
        let (tx, rx) = sync_channel(CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let stats = decode_member(Cursor::new(&xml[..]), "study.xml", &tx, &cancel).unwrap();
        drop(tx);
        assert_eq!(stats.records_emitted, 1);
        assert_eq!(rx.iter().count(), 1);
    }
}
