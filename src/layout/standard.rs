use std::collections::BTreeSet;

use camino::{Utf8Path, Utf8PathBuf};

use crate::domain::{RecordSpec, SubjectId};
use crate::fs_util::compound_extension;
use crate::layout::catalog::{self, Category, Member};
use crate::layout::{LayoutEntry, SnapshotFile};

pub const DEFAULT_NON_BIDS_DIR: &str = "non-bids";

/// Every input file appears in the output exactly once, at a distinct
/// destination. Files without a free catalog placement keep their native
/// relative path below `ses-<n>/<non_bids_dir>/<field>_<instance>/`.
pub fn expand_standardized(
    native: &[SnapshotFile],
    subject: &SubjectId,
    non_bids_dir: &str,
) -> Vec<LayoutEntry> {
    let mut ordered: Vec<&SnapshotFile> = native.iter().collect();
    ordered.sort_by(|a, b| a.path.cmp(&b.path));

    let mut taken = BTreeSet::new();
    let mut entries = Vec::with_capacity(ordered.len());
    for file in ordered {
        let mut destination = placed_path(&file.path, subject, non_bids_dir);
        if taken.contains(&destination) {
            destination = fallback_path(&file.path, subject, non_bids_dir);
            tracing::debug!(source = %file.path, destination = %destination, "placement taken, using fallback");
        }
        let destination = numbered_if_taken(&taken, destination);
        taken.insert(destination.clone());
        entries.push(LayoutEntry {
            source: file.path.clone(),
            destination,
            content: file.content.clone(),
        });
    }
    entries.sort_by(|a, b| a.destination.cmp(&b.destination));
    entries
}

fn numbered_if_taken(taken: &BTreeSet<Utf8PathBuf>, path: Utf8PathBuf) -> Utf8PathBuf {
    if !taken.contains(&path) {
        return path;
    }
    let file_name = path.file_name().unwrap_or_default().to_string();
    let (stem, ext) = match file_name.split_once('.') {
        Some((stem, ext)) => (stem, Some(ext)),
        None => (file_name.as_str(), None),
    };
    (2..)
        .map(|n| match ext {
            Some(ext) => path.with_file_name(format!("{stem}-{n}.{ext}")),
            None => path.with_file_name(format!("{stem}-{n}")),
        })
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or(path)
}

fn attribute(path: &Utf8Path) -> Option<(RecordSpec, Option<Utf8PathBuf>)> {
    let mut components = path.components();
    let head = components.next()?.as_str();
    let rest = components.as_path();
    if rest.as_str().is_empty() {
        // flat file: `<field>_<instance>.<ext>`
        let record: RecordSpec = head.parse().ok()?;
        record.forced_extension()?;
        return Some((record, None));
    }
    let record: RecordSpec = head.parse().ok()?;
    if record.forced_extension().is_some() {
        return None;
    }
    Some((record, Some(rest.to_path_buf())))
}

fn subject_prefix(subject: &SubjectId, record: &RecordSpec) -> String {
    format!("sub-{subject}_ses-{}", record.session())
}

fn placed_path(path: &Utf8Path, subject: &SubjectId, non_bids_dir: &str) -> Utf8PathBuf {
    let Some((record, member)) = attribute(path) else {
        return Utf8PathBuf::from(non_bids_dir).join(path);
    };
    if record.array_index() != "0" {
        return fallback_path(path, subject, non_bids_dir);
    }
    let placement = catalog::lookup(record.field_code()).and_then(|entry| match &member {
        None => entry.placement(Member::Flat),
        Some(inner) => entry
            .members
            .iter()
            .find(|(candidate, _)| matches!(candidate, Member::Inner(p) if *p == inner.as_str()))
            .map(|(_, placement)| *placement),
    });
    let Some(placement) = placement else {
        return fallback_path(path, subject, non_bids_dir);
    };

    let ext = match &member {
        None => record.forced_extension(),
        Some(inner) => inner.file_name().and_then(compound_extension),
    };
    let mut name = format!("{}_{}", subject_prefix(subject, &record), placement.descriptor);
    if let Some(ext) = ext {
        name.push('.');
        name.push_str(ext);
    }
    let session = Utf8PathBuf::from(format!("ses-{}", record.session()));
    match placement.category {
        Category::NonBids(subdir) => session.join(non_bids_dir).join(subdir).join(name),
        category => session.join(category.to_string()).join(name),
    }
}

fn fallback_path(path: &Utf8Path, subject: &SubjectId, non_bids_dir: &str) -> Utf8PathBuf {
    let Some((record, member)) = attribute(path) else {
        return Utf8PathBuf::from(non_bids_dir).join(path);
    };
    let base = Utf8PathBuf::from(format!("ses-{}", record.session()))
        .join(non_bids_dir)
        .join(record.stem());
    let prefix = subject_prefix(subject, &record);
    match member {
        None => base.join(format!("{prefix}_{path}")),
        Some(inner) => {
            let file_name = inner.file_name().unwrap_or(inner.as_str());
            let dir = inner.parent().unwrap_or(Utf8Path::new(""));
            base.join(dir).join(format!("{prefix}_{file_name}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn native(paths: &[&str]) -> Vec<SnapshotFile> {
        paths
            .iter()
            .map(|path| SnapshotFile {
                path: Utf8PathBuf::from(*path),
                content: path.as_bytes().to_vec(),
            })
            .collect()
    }

    fn destinations(entries: &[LayoutEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.destination.as_str()).collect()
    }

    #[test]
    fn known_records_are_placed_by_catalog() {
        let subject: SubjectId = "12345".parse().unwrap();
        let entries = expand_standardized(
            &native(&[
                "20227_2_0/fMRI/rfMRI.nii.gz",
                "25748_2_0.txt",
                "25748_3_0.txt",
            ]),
            &subject,
            DEFAULT_NON_BIDS_DIR,
        );
        assert_eq!(
            destinations(&entries),
            [
                "ses-2/func/sub-12345_ses-2_task-rest_bold.nii.gz",
                "ses-2/non-bids/fMRI/sub-12345_ses-2_task-hariri_eprime.txt",
                "ses-3/non-bids/fMRI/sub-12345_ses-3_task-hariri_eprime.txt",
            ]
        );
        assert_eq!(entries[0].source, "20227_2_0/fMRI/rfMRI.nii.gz");
        assert_eq!(entries[0].content, b"20227_2_0/fMRI/rfMRI.nii.gz");
    }

    #[test]
    fn unmapped_members_keep_their_native_path() {
        let subject: SubjectId = "12345".parse().unwrap();
        let entries = expand_standardized(
            &native(&[
                "20227_2_0/fMRI/rfMRI.ica/mask.nii.gz",
                "31_0_0.txt",
                "20227_2_1/fMRI/rfMRI.nii.gz",
                "README",
            ]),
            &subject,
            "extra",
        );
        assert_eq!(
            destinations(&entries),
            [
                "extra/README",
                "ses-0/extra/31_0_0/sub-12345_ses-0_31_0_0.txt",
                "ses-2/extra/20227_2_0/fMRI/rfMRI.ica/sub-12345_ses-2_mask.nii.gz",
                "ses-2/extra/20227_2_1/fMRI/sub-12345_ses-2_rfMRI.nii.gz",
            ]
        );
    }

    #[test]
    fn colliding_placements_fall_back_deterministically() {
        let subject: SubjectId = "12345".parse().unwrap();
        let files = native(&["25748_2_0.txt", "25747_2_0.txt"]);
        let entries = expand_standardized(&files, &subject, DEFAULT_NON_BIDS_DIR);
        assert_eq!(
            destinations(&entries),
            [
                "ses-2/non-bids/25748_2_0/sub-12345_ses-2_25748_2_0.txt",
                "ses-2/non-bids/fMRI/sub-12345_ses-2_task-hariri_eprime.txt",
            ]
        );

        let mut reversed = files.clone();
        reversed.reverse();
        assert_eq!(expand_standardized(&reversed, &subject, DEFAULT_NON_BIDS_DIR), entries);
    }

    #[test]
    fn colliding_fallbacks_get_numbered() {
        let subject: SubjectId = "12345".parse().unwrap();
        let files = native(&["31_0_0.txt", "31_0_0/31_0_0.txt"]);
        let entries = expand_standardized(&files, &subject, DEFAULT_NON_BIDS_DIR);
        assert_eq!(
            destinations(&entries),
            [
                "ses-0/non-bids/31_0_0/sub-12345_ses-0_31_0_0-2.txt",
                "ses-0/non-bids/31_0_0/sub-12345_ses-0_31_0_0.txt",
            ]
        );
        assert_eq!(entries[0].content, b"31_0_0.txt");
        assert_eq!(entries[1].content, b"31_0_0/31_0_0.txt");
    }
}
