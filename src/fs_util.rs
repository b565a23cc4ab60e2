use std::fs;
use std::io::{Cursor, Read};
use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};
use zip::ZipArchive;

use crate::error::IngestError;

pub const MAX_MEMBER_BYTES: u64 = 4 << 30;

pub fn read_zip_members(bytes: &[u8]) -> Result<Vec<(Utf8PathBuf, Vec<u8>)>, String> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(|err| err.to_string())?;
    let mut members = Vec::with_capacity(archive.len());

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|err| err.to_string())?;
        if entry.is_dir() {
            continue;
        }
        let path = entry
            .enclosed_name()
            .ok_or_else(|| "zip entry path traversal detected".to_string())?;
        let path = Utf8PathBuf::from_path_buf(path)
            .map_err(|path| format!("non-utf8 zip entry: {}", path.display()))?;
        let declared = entry.size();
        if declared > MAX_MEMBER_BYTES {
            return Err(format!(
                "{path}: declared size {declared} exceeds {MAX_MEMBER_BYTES} bytes"
            ));
        }
        let mut content = Vec::new();
        (&mut entry)
            .take(MAX_MEMBER_BYTES + 1)
            .read_to_end(&mut content)
            .map_err(|err| format!("{path}: {err}"))?;
        if content.len() as u64 > MAX_MEMBER_BYTES {
            return Err(format!("{path}: member exceeds {MAX_MEMBER_BYTES} bytes"));
        }
        members.push((path, content));
    }
    members.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(members)
}

pub fn compound_extension(file_name: &str) -> Option<&str> {
    file_name
        .split_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty())
}

pub fn write_file(root: &Utf8Path, relative: &Utf8Path, content: &[u8]) -> Result<(), IngestError> {
    let target = root.join(relative);
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| IngestError::Filesystem(format!("create {parent}: {err}")))?;
    }
    fs::write(target.as_std_path(), content)
        .map_err(|err| IngestError::Filesystem(format!("write {target}: {err}")))
}

pub fn read_file(root: &Utf8Path, relative: &Utf8Path) -> Result<Vec<u8>, IngestError> {
    let target = root.join(relative);
    fs::read(target.as_std_path())
        .map_err(|err| IngestError::Filesystem(format!("read {target}: {err}")))
}

pub fn remove_file_pruning(root: &Utf8Path, relative: &Utf8Path) -> Result<(), IngestError> {
    let target = root.join(relative);
    match fs::remove_file(target.as_std_path()) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(IngestError::Filesystem(format!("remove {target}: {err}"))),
    }
    let mut dir = target.parent();
    while let Some(current) = dir {
        if current == root || !is_empty_dir(current.as_std_path()) {
            break;
        }
        fs::remove_dir(current.as_std_path())
            .map_err(|err| IngestError::Filesystem(format!("remove {current}: {err}")))?;
        dir = current.parent();
    }
    Ok(())
}

fn is_empty_dir(path: &Path) -> bool {
    fs::read_dir(path)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use zip::ZipWriter;
    use zip::write::SimpleFileOptions;

    use super::*;

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

    #[test]
    fn zip_members_are_sorted_and_skip_directories() {
        let bytes = zip_bytes(&[("fMRI/rfMRI.nii.gz", b"bold"), ("fMRI/a.json", b"{}")]);
        let members = read_zip_members(&bytes).unwrap();
        let names: Vec<_> = members.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(names, ["fMRI/a.json", "fMRI/rfMRI.nii.gz"]);
        assert_eq!(members[1].1, b"bold");
    }

    #[test]
    fn corrupt_zip_is_an_error() {
        assert!(read_zip_members(b"not a zip").is_err());
    }

    /// One stored member `a.txt` whose zip64 central record claims 2^63 bytes.
    fn oversized_zip64_bytes() -> Vec<u8> {
        let name = b"a.txt";
        let data = b"hello";
        let crc: u32 = 0x3610_a686;
        let mut out = Vec::new();

        out.extend_from_slice(&0x0403_4b50u32.to_le_bytes());
        out.extend_from_slice(&45u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0x5021u16.to_le_bytes());
        out.extend_from_slice(&crc.to_le_bytes());
        out.extend_from_slice(&5u32.to_le_bytes());
        out.extend_from_slice(&5u32.to_le_bytes());
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(name);
        out.extend_from_slice(data);

        let central_offset = out.len() as u32;
        out.extend_from_slice(&0x0201_4b50u32.to_le_bytes());
        out.extend_from_slice(&45u16.to_le_bytes());
        out.extend_from_slice(&45u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0x5021u16.to_le_bytes());
        out.extend_from_slice(&crc.to_le_bytes());
        out.extend_from_slice(&5u32.to_le_bytes());
        out.extend_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(&12u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(name);
        out.extend_from_slice(&0x0001u16.to_le_bytes());
        out.extend_from_slice(&8u16.to_le_bytes());
        out.extend_from_slice(&(1u64 << 63).to_le_bytes());
        let central_size = out.len() as u32 - central_offset;

        out.extend_from_slice(&0x0605_4b50u32.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&central_size.to_le_bytes());
        out.extend_from_slice(&central_offset.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out
    }

    #[test]
    fn huge_declared_member_size_is_an_error() {
        assert!(read_zip_members(&oversized_zip64_bytes()).is_err());
    }

    #[test]
    fn compound_extension_keeps_all_suffixes() {
        assert_eq!(compound_extension("rfMRI.nii.gz"), Some("nii.gz"));
        assert_eq!(compound_extension("25748_2_0.txt"), Some("txt"));
        assert_eq!(compound_extension("README"), None);
    }

    #[test]
    fn removing_last_file_prunes_directories() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        write_file(&root, Utf8Path::new("a/b/c.txt"), b"x").unwrap();
        write_file(&root, Utf8Path::new("a/keep.txt"), b"y").unwrap();

        remove_file_pruning(&root, Utf8Path::new("a/b/c.txt")).unwrap();
        assert!(!root.join("a/b").exists());
        assert!(root.join("a/keep.txt").exists());
    }
}
