use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempDir;

use crate::domain::{RecordSpec, SubjectId};
use crate::error::IngestError;

pub const DEFAULT_FETCH_TOOL: &str = "ukbfetch";
pub const BATCH_FILE_NAME: &str = ".ukbbatch";
pub const FETCH_EXTENSIONS: [&str; 3] = ["zip", "adv", "txt"];

#[derive(Debug)]
pub struct FetchBatch {
    subject: SubjectId,
    records: Vec<RecordSpec>,
    workdir: TempDir,
}

impl FetchBatch {
    pub fn new(subject: &SubjectId, records: &[RecordSpec]) -> Result<Self, IngestError> {
        let workdir = tempfile::Builder::new()
            .prefix("kira-ingest-fetch")
            .tempdir()
            .map_err(|err| IngestError::Filesystem(err.to_string()))?;
        Ok(Self {
            subject: subject.clone(),
            records: records.to_vec(),
            workdir,
        })
    }

    pub fn subject(&self) -> &SubjectId {
        &self.subject
    }

    pub fn records(&self) -> &[RecordSpec] {
        &self.records
    }

    pub fn workdir(&self) -> &Path {
        self.workdir.path()
    }

    pub fn batch_lines(&self) -> Vec<String> {
        self.records
            .iter()
            .map(|record| format!("{} {}", self.subject, record.stem()))
            .collect()
    }

    pub fn expected_names(&self, record: &RecordSpec) -> Vec<String> {
        let stem = raw_file_stem(&self.subject, record);
        FETCH_EXTENSIONS
            .iter()
            .filter(|ext| record.accepts_extension(ext))
            .map(|ext| format!("{stem}.{ext}"))
            .collect()
    }

    pub fn write_batch_file(&self) -> Result<PathBuf, IngestError> {
        let path = self.workdir().join(BATCH_FILE_NAME);
        let mut content = self.batch_lines().join("\n");
        content.push('\n');
        fs::write(&path, content).map_err(|err| IngestError::Filesystem(err.to_string()))?;
        Ok(path)
    }

    pub fn collect(&self) -> (Vec<RetrievedFile>, Vec<RecordSpec>) {
        let mut files = Vec::new();
        let mut missing = Vec::new();
        for record in &self.records {
            let mut found = false;
            for name in self.expected_names(record) {
                let path = self.workdir().join(&name);
                if path.is_file() {
                    found = true;
                    files.push(RetrievedFile {
                        record: record.clone(),
                        path,
                        file_name: name,
                    });
                }
            }
            if !found {
                missing.push(record.clone());
            }
        }
        files.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        (files, missing)
    }
}

pub fn raw_file_stem(subject: &SubjectId, record: &RecordSpec) -> String {
    format!("{subject}_{}", record.stem())
}

#[derive(Debug, Clone)]
pub struct RetrievedFile {
    pub record: RecordSpec,
    pub path: PathBuf,
    pub file_name: String,
}

#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub files: Vec<RetrievedFile>,
    pub missing: Vec<RecordSpec>,
    pub warning: Option<String>,
}

pub trait Fetcher {
    fn locate(&self) -> Result<PathBuf, IngestError>;
    fn fetch(&self, batch: &FetchBatch) -> Result<FetchOutcome, IngestError>;
}

#[derive(Debug, Clone)]
pub struct FetchInvoker {
    program: String,
    search_path: Option<OsString>,
    keyfile: Option<PathBuf>,
}

impl FetchInvoker {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            search_path: None,
            keyfile: None,
        }
    }

    pub fn with_search_path(mut self, search_path: impl Into<OsString>) -> Self {
        self.search_path = Some(search_path.into());
        self
    }

    pub fn with_keyfile(mut self, keyfile: Option<PathBuf>) -> Self {
        self.keyfile = keyfile;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl Default for FetchInvoker {
    fn default() -> Self {
        Self::new(DEFAULT_FETCH_TOOL)
    }
}

impl Fetcher for FetchInvoker {
    fn locate(&self) -> Result<PathBuf, IngestError> {
        let direct = Path::new(&self.program);
        if direct.components().count() > 1 {
            return direct
                .is_file()
                .then(|| direct.to_path_buf())
                .ok_or_else(|| IngestError::FetchToolMissing(self.program.clone()));
        }
        let search_path = self
            .search_path
            .clone()
            .or_else(|| std::env::var_os("PATH"))
            .unwrap_or_default();
        find_in_path(&self.program, &search_path)
            .ok_or_else(|| IngestError::FetchToolMissing(self.program.clone()))
    }

    fn fetch(&self, batch: &FetchBatch) -> Result<FetchOutcome, IngestError> {
        let tool = self.locate()?;
        batch.write_batch_file()?;

        let mut cmd = Command::new(&tool);
        if let Some(keyfile) = &self.keyfile {
            cmd.arg(format!("-a{}", keyfile.display()));
        }
        cmd.arg(format!("-b{BATCH_FILE_NAME}"));
        cmd.current_dir(batch.workdir());
        tracing::debug!(tool = %tool.display(), records = batch.records().len(), "invoking fetch tool");
        let output = cmd
            .output()
            .map_err(|err| IngestError::FetchFailed(format!("{}: {err}", tool.display())))?;

        let (files, missing) = batch.collect();
        let mut warning = None;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                format!("{} exited with {}", tool.display(), output.status)
            } else {
                stderr
            };
            if files.is_empty() {
                return Err(IngestError::FetchFailed(message));
            }
            warning = Some(message);
        }
        if files.is_empty() && !batch.records().is_empty() {
            return Err(IngestError::FetchIncomplete {
                requested: batch.records().len(),
            });
        }
        Ok(FetchOutcome {
            files,
            missing,
            warning,
        })
    }
}

fn find_in_path(name: &str, search_path: &OsString) -> Option<PathBuf> {
    for path in std::env::split_paths(search_path) {
        let exe = path.join(format!("{name}.exe"));
        if exe.is_file() {
            return Some(exe);
        }
        let plain = path.join(name);
        if plain.is_file() {
            return Some(plain);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn batch(records: &[&str]) -> FetchBatch {
        let subject: SubjectId = "12345".parse().unwrap();
        let records: Vec<RecordSpec> = records.iter().map(|r| r.parse().unwrap()).collect();
        FetchBatch::new(&subject, &records).unwrap()
    }

    #[test]
    fn batch_file_lists_subject_and_record() {
        let batch = batch(&["25748_2_0", "25747_2_0.adv"]);
        let path = batch.write_batch_file().unwrap();
        let content = fs::read_to_string(path).unwrap();
        assert_eq!(content, "12345 25748_2_0\n12345 25747_2_0\n");
    }

    #[test]
    fn forced_extension_narrows_expected_names() {
        let batch = batch(&["25747_2_0.adv"]);
        let record = batch.records()[0].clone();
        assert_eq!(batch.expected_names(&record), ["12345_25747_2_0.adv"]);
    }

    #[test]
    fn collect_matches_deposited_files() {
        let batch = batch(&["25748_2_0", "25747_2_0.adv", "20227_2_0"]);
        fs::write(batch.workdir().join("12345_25748_2_0.txt"), b"t").unwrap();
        fs::write(batch.workdir().join("12345_25747_2_0.zip"), b"z").unwrap();
        fs::write(batch.workdir().join("unrelated.txt"), b"u").unwrap();

        let (files, missing) = batch.collect();
        let names: Vec<_> = files.iter().map(|f| f.file_name.as_str()).collect();
        assert_eq!(names, ["12345_25748_2_0.txt"]);
        let missing: Vec<_> = missing.iter().map(ToString::to_string).collect();
        assert_eq!(missing, ["25747_2_0.adv", "20227_2_0"]);
    }

    #[test]
    fn missing_tool_is_reported() {
        let temp = tempfile::tempdir().unwrap();
        let invoker = FetchInvoker::new("ukbfetch").with_search_path(temp.path());
        assert_matches!(invoker.locate().unwrap_err(), IngestError::FetchToolMissing(_));
    }

    #[test]
    fn tool_found_on_search_path() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("ukbfetch"), b"#!/bin/sh\n").unwrap();
        let invoker = FetchInvoker::new("ukbfetch").with_search_path(temp.path());
        assert_eq!(invoker.locate().unwrap(), temp.path().join("ukbfetch"));
    }
}
