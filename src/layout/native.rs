use camino::{Utf8Path, Utf8PathBuf};

use crate::domain::{RecordSpec, SubjectId};
use crate::error::IngestError;
use crate::fetch::raw_file_stem;
use crate::fs_util::read_zip_members;
use crate::layout::{LayoutEntry, SnapshotFile};

pub fn expand_native(
    raw: &SnapshotFile,
    record: &RecordSpec,
) -> Result<Vec<LayoutEntry>, IngestError> {
    let layout_error = |message: String| IngestError::Layout {
        record: record.to_string(),
        message,
    };
    let ext = record
        .forced_extension()
        .or_else(|| raw.path.extension())
        .ok_or_else(|| layout_error(format!("{} has no file extension", raw.path)))?
        .to_ascii_lowercase();
    let stem = record.stem();

    if ext == "zip" {
        let members = read_zip_members(&raw.content)
            .map_err(|err| layout_error(format!("{}: {err}", raw.path)))?;
        if members.is_empty() {
            return Err(layout_error(format!("{} is an empty archive", raw.path)));
        }
        let base = Utf8PathBuf::from(&stem);
        return Ok(members
            .into_iter()
            .map(|(member, content)| LayoutEntry {
                source: raw.path.clone(),
                destination: base.join(member),
                content,
            })
            .collect());
    }

    Ok(vec![LayoutEntry {
        source: raw.path.clone(),
        destination: Utf8PathBuf::from(format!("{stem}.{ext}")),
        content: raw.content.clone(),
    }])
}

#[derive(Debug, Default)]
pub struct NativeExpansion {
    pub entries: Vec<LayoutEntry>,
    pub missing: Vec<RecordSpec>,
    pub errors: Vec<IngestError>,
}

pub fn expand_native_tree(
    raw_files: &[SnapshotFile],
    subject: &SubjectId,
    records: &[RecordSpec],
) -> NativeExpansion {
    let mut expansion = NativeExpansion::default();
    for record in records {
        let stem = raw_file_stem(subject, record);
        let downloads: Vec<&SnapshotFile> = raw_files
            .iter()
            .filter(|file| is_download_of(&file.path, &stem, record))
            .collect();
        if downloads.is_empty() {
            expansion.missing.push(record.clone());
            continue;
        }
        for download in downloads {
            match expand_native(download, record) {
                Ok(entries) => expansion.entries.extend(entries),
                Err(err) => {
                    tracing::warn!(record = %record, error = %err, "skipping record in native layout");
                    expansion.errors.push(err);
                }
            }
        }
    }
    expansion
        .entries
        .sort_by(|a, b| a.destination.cmp(&b.destination));
    expansion
}

fn is_download_of(path: &Utf8Path, stem: &str, record: &RecordSpec) -> bool {
    if path.parent().is_some_and(|parent| !parent.as_str().is_empty()) {
        return false;
    }
    path.file_name()
        .and_then(|name| name.strip_prefix(stem))
        .and_then(|rest| rest.strip_prefix('.'))
        .is_some_and(|ext| !ext.contains('.') && record.accepts_extension(ext))
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Write};

    use assert_matches::assert_matches;
    use zip::ZipWriter;
    use zip::write::SimpleFileOptions;

    use super::*;

    fn raw(path: &str, content: &[u8]) -> SnapshotFile {
        SnapshotFile {
            path: Utf8PathBuf::from(path),
            content: content.to_vec(),
        }
    }

    fn zip_bytes(members: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, content) in members {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(content).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn destinations(entries: &[LayoutEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.destination.as_str()).collect()
    }

    #[test]
    fn zip_expands_into_record_directory() {
        let record: RecordSpec = "20227_2_0".parse().unwrap();
        let archive = raw(
            "12345_20227_2_0.zip",
            &zip_bytes(&[("fMRI/rfMRI.nii.gz", b"bold"), ("fMRI/rfMRI.json", b"{}")]),
        );
        let entries = expand_native(&archive, &record).unwrap();
        assert_eq!(
            destinations(&entries),
            ["20227_2_0/fMRI/rfMRI.json", "20227_2_0/fMRI/rfMRI.nii.gz"]
        );
        assert!(entries.iter().all(|e| e.source == "12345_20227_2_0.zip"));
    }

    #[test]
    fn text_record_is_a_flat_file() {
        let record: RecordSpec = "25748_2_0".parse().unwrap();
        let entries = expand_native(&raw("12345_25748_2_0.txt", b"eprime"), &record).unwrap();
        assert_eq!(destinations(&entries), ["25748_2_0.txt"]);
        assert_eq!(entries[0].content, b"eprime");
    }

    #[test]
    fn corrupt_archive_fails_only_its_record() {
        let subject: SubjectId = "12345".parse().unwrap();
        let records: Vec<RecordSpec> = ["20227_2_0", "25748_2_0", "25748_3_0"]
            .iter()
            .map(|r| r.parse().unwrap())
            .collect();
        let raw_files = vec![
            raw("12345_20227_2_0.zip", b"garbage"),
            raw("12345_25748_2_0.txt", b"a"),
        ];
        let expansion = expand_native_tree(&raw_files, &subject, &records);
        assert_eq!(destinations(&expansion.entries), ["25748_2_0.txt"]);
        assert_eq!(expansion.missing, vec![records[2].clone()]);
        assert_eq!(expansion.errors.len(), 1);
        assert_matches!(&expansion.errors[0], IngestError::Layout { record, .. } if record == "20227_2_0");
    }

    #[test]
    fn forced_extension_selects_matching_download() {
        let subject: SubjectId = "12345".parse().unwrap();
        let records: Vec<RecordSpec> = vec!["25747_2_0.adv".parse().unwrap()];
        let raw_files = vec![
            raw("12345_25747_2_0.zip", &zip_bytes(&[("x.txt", b"x")])),
            raw("12345_25747_2_0.adv", b"adv"),
            raw("12345_25747_2_00.adv", b"other record"),
        ];
        let expansion = expand_native_tree(&raw_files, &subject, &records);
        assert_eq!(destinations(&expansion.entries), ["25747_2_0.adv"]);
        assert!(expansion.errors.is_empty());
    }

    #[test]
    fn records_outside_the_set_are_ignored() {
        let subject: SubjectId = "12345".parse().unwrap();
        let records: Vec<RecordSpec> = vec!["25748_3_0".parse().unwrap()];
        let raw_files = vec![
            raw("12345_25748_2_0.txt", b"a"),
            raw("12345_25748_3_0.txt", b"b"),
        ];
        let expansion = expand_native_tree(&raw_files, &subject, &records);
        assert_eq!(destinations(&expansion.entries), ["25748_3_0.txt"]);
    }
}
