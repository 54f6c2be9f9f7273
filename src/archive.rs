//! Archive Traverser (C2): a gzip+tar decode stack presenting a lazy,
//! non-seeking sequence of member frames. Never materializes the archive on
//! disk — the counting reader feeds the gzip decoder directly.

use crate::cancellation::CancellationToken;
use crate::error::IngestError;
use flate2::read::GzDecoder;
use std::io::Read;
use tar::{Archive, EntryType};

pub struct ArchiveTraverser<R: Read> {
    archive: Archive<GzDecoder<R>>,
}

/// One member's metadata, paired with its (not-yet-drained) body.
pub struct MemberFrame<'a, R: Read> {
    pub name: String,
    pub size: u64,
    pub is_regular_file: bool,
    pub body: tar::Entry<'a, GzDecoder<R>>,
}

impl<R: Read> ArchiveTraverser<R> {
    pub fn new(reader: R) -> Self {
        Self { archive: Archive::new(GzDecoder::new(reader)) }
    }

    /// Drive the whole member sequence, invoking `on_member` for each frame
    /// in tar order. The tar crate's iterator borrows `self.archive` for its
    /// own lifetime, so the whole traversal happens inside one call rather
    /// than through a separately-stored cursor.
    ///
    /// An invalid gzip header or a tar error mid-stream is fatal for this
    /// source (spec §4.2); a clean tar-boundary EOF ends the loop normally.
    pub fn for_each_member(
        &mut self,
        cancel: &CancellationToken,
        mut on_member: impl FnMut(MemberFrame<'_, R>) -> Result<(), IngestError>,
    ) -> Result<(), IngestError> {
        let entries = self.archive.entries().map_err(IngestError::Decompression)?;
        for entry in entries {
            if cancel.is_cancelled() {
                return Err(IngestError::Cancelled);
            }
            let entry = entry.map_err(IngestError::Decompression)?;
            let header = entry.header();
            let size = header.size().unwrap_or(0);
            let is_regular_file =
                matches!(header.entry_type(), EntryType::Regular | EntryType::Continuous);
            let name = entry.path().map(|p| p.to_string_lossy().into_owned()).unwrap_or_default();
            on_member(MemberFrame { name, size, is_regular_file, body: entry })?;
        }
        Ok(())
    }
}

/// Drain a member's body without decoding it — used for non-XML entries and
/// for members already recorded as processed (spec §4.8 step 4).
pub fn drain<R: Read>(body: &mut R) -> std::io::Result<u64> {
    std::io::copy(body, &mut std::io::sink())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Cursor;
    use tar::Header;

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
        let gz = builder.into_inner().unwrap();
        gz.finish().unwrap()
    }

    #[test]
    fn iterates_members_in_order() {
        let bytes = build_tar_gz(&[("a.xml", b"<a/>"), ("b.xml", b"<b/>")]);
        let mut trav = ArchiveTraverser::new(Cursor::new(bytes));
        let mut names = Vec::new();
        let cancel = CancellationToken::new();
        trav.for_each_member(&cancel, |mut frame| {
            names.push(frame.name.clone());
            let _ = drain(&mut frame.body);
            Ok(())
        })
        .unwrap();
        assert_eq!(names, vec!["a.xml", "b.xml"]);
    }

    #[test]
    fn cancellation_stops_traversal() {
        let bytes = build_tar_gz(&[("a.xml", b"<a/>"), ("b.xml", b"<b/>"), ("c.xml", b"<c/>")]);
        let mut trav = ArchiveTraverser::new(Cursor::new(bytes));
        let cancel = CancellationToken::new();
        let mut seen = 0;
        let result = trav.for_each_member(&cancel, |mut frame| {
            seen += 1;
            let _ = drain(&mut frame.body);
            if seen == 1 {
                cancel.cancel();
            }
            Ok(())
        });
        assert!(matches!(result, Err(IngestError::Cancelled)));
        assert_eq!(seen, 1);
    }
}
