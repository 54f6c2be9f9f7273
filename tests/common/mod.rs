//! Synthetic gzip+tar XML archive builder shared by the integration tests,
//! mirroring the pattern in `archive.rs`'s own in-process test fixtures but
//! writing to a real temp file so an `Orchestrator` can open it by path.

use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use tar::Header;

/// One XML member to place in a synthetic archive.
pub struct Member<'a> {
    pub name: &'a str,
    pub body: &'a [u8],
}

pub fn member<'a>(name: &'a str, body: &'a [u8]) -> Member<'a> {
    Member { name, body }
}

/// Build a gzip+tar archive with the given members and write it to a fresh
/// temp file, returning the path. The temp directory is leaked for the
/// duration of the process (acceptable for short-lived test binaries) so the
/// returned path stays valid for the whole test.
pub fn write_archive(members: &[Member<'_>]) -> PathBuf {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("archive.tar.gz");
    std::mem::forget(dir);

    let gz = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(gz);
    for m in members {
        let mut header = Header::new_gnu();
        header.set_size(m.body.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, m.name, m.body).unwrap();
    }
    let bytes = builder.into_inner().unwrap().finish().unwrap();

    File::create(&path).unwrap().write_all(&bytes).unwrap();
    path
}

pub const STUDY_SRP1: &[u8] = br#"<STUDY_SET>
  <STUDY accession="SRP000001" center_name="CENTER_A">
    <DESCRIPTOR>
      <STUDY_TITLE>An example RNA-seq study</STUDY_TITLE>
      <STUDY_TYPE existing_study_type="Transcriptome Analysis"/>
    </DESCRIPTOR>
  </STUDY>
</STUDY_SET>"#;

pub const EXPERIMENT_SRX1: &[u8] = br#"<EXPERIMENT_SET>
  <EXPERIMENT accession="SRX000001" center_name="CENTER_A">
    <TITLE>Example experiment</TITLE>
    <STUDY_REF accession="SRP000001"/>
    <PLATFORM>
      <ILLUMINA><INSTRUMENT_MODEL>Illumina HiSeq 2000</INSTRUMENT_MODEL></ILLUMINA>
    </PLATFORM>
    <DESIGN>
      <LIBRARY_DESCRIPTOR>
        <LIBRARY_STRATEGY>RNA-Seq</LIBRARY_STRATEGY>
        <LIBRARY_SOURCE>TRANSCRIPTOMIC</LIBRARY_SOURCE>
        <LIBRARY_SELECTION>cDNA</LIBRARY_SELECTION>
      </LIBRARY_DESCRIPTOR>
    </DESIGN>
  </EXPERIMENT>
</EXPERIMENT_SET>"#;

pub const SAMPLE_SRS1: &[u8] = br#"<SAMPLE_SET>
  <SAMPLE accession="SRS000001">
    <TITLE>Example sample</TITLE>
    <SAMPLE_NAME>
      <TAXON_ID>9606</TAXON_ID>
      <SCIENTIFIC_NAME>Homo sapiens</SCIENTIFIC_NAME>
    </SAMPLE_NAME>
  </SAMPLE>
</SAMPLE_SET>"#;

pub const RUN_SRR1: &[u8] = br#"<RUN_SET>
  <RUN accession="SRR000001" total_spots="1000000" total_bases="200000000">
    <EXPERIMENT_REF accession="SRX000001"/>
  </RUN>
</RUN_SET>"#;
