use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::{RecordSpec, SubjectId};
use crate::error::IngestError;

pub const CONFIG_FILE_NAME: &str = "kira-ingest.json";
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub schema_version: Option<u32>,
    pub subject_id: String,
    #[serde(default)]
    pub records: Vec<String>,
    #[serde(default)]
    pub use_standard_layout: bool,
    #[serde(default)]
    pub initialized_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSetConfig {
    pub subject_id: SubjectId,
    records: Vec<RecordSpec>,
    pub use_standard_layout: bool,
}

impl RecordSetConfig {
    pub fn new(
        subject_id: SubjectId,
        records: impl IntoIterator<Item = RecordSpec>,
        use_standard_layout: bool,
    ) -> Self {
        let mut deduped: Vec<RecordSpec> = Vec::new();
        for record in records {
            match deduped.iter_mut().find(|known| known.same_record(&record)) {
                Some(known) => *known = record,
                None => deduped.push(record),
            }
        }
        Self {
            subject_id,
            records: deduped,
            use_standard_layout,
        }
    }

    pub fn records(&self) -> &[RecordSpec] {
        &self.records
    }

    pub fn to_file(&self) -> ConfigFile {
        ConfigFile {
            schema_version: Some(CURRENT_SCHEMA_VERSION),
            subject_id: self.subject_id.to_string(),
            records: self.records.iter().map(ToString::to_string).collect(),
            use_standard_layout: self.use_standard_layout,
            initialized_at: Some(chrono::Utc::now().to_rfc3339()),
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn load(path: &Path) -> Result<RecordSetConfig, IngestError> {
        if !path.exists() {
            return Err(IngestError::MissingConfig(path.to_path_buf()));
        }
        let content =
            fs::read_to_string(path).map_err(|_| IngestError::ConfigRead(path.to_path_buf()))?;
        let config: ConfigFile = serde_json::from_str(&content)
            .map_err(|err| IngestError::ConfigParse(err.to_string()))?;
        Self::resolve_config(config)
    }

    pub fn resolve_config(config: ConfigFile) -> Result<RecordSetConfig, IngestError> {
        let schema_version = config.schema_version.unwrap_or(CURRENT_SCHEMA_VERSION);
        if schema_version > CURRENT_SCHEMA_VERSION {
            return Err(IngestError::ConfigParse(format!(
                "unsupported schema_version {schema_version}"
            )));
        }
        let subject_id = config.subject_id.parse()?;
        let records = config
            .records
            .iter()
            .map(|raw| raw.parse())
            .collect::<Result<Vec<RecordSpec>, IngestError>>()?;
        if records.is_empty() {
            return Err(IngestError::EmptyRecordSet);
        }
        Ok(RecordSetConfig::new(
            subject_id,
            records,
            config.use_standard_layout,
        ))
    }
}

/// Location of the persisted record set, kept inside the git directory so that
/// it never shows up as working tree dirt.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn in_git_dir(git_dir: &Path) -> Self {
        Self::new(git_dir.join(CONFIG_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn load(&self) -> Result<RecordSetConfig, IngestError> {
        ConfigLoader::load(&self.path)
    }

    pub fn init(&self, config: &RecordSetConfig, force: bool) -> Result<(), IngestError> {
        if config.records().is_empty() {
            return Err(IngestError::EmptyRecordSet);
        }
        if self.exists() && !force {
            return Err(IngestError::ConfigExists(self.path.clone()));
        }
        let content = serde_json::to_vec_pretty(&config.to_file())
            .map_err(|err| IngestError::Filesystem(err.to_string()))?;
        write_bytes_atomic(&self.path, &content)
    }
}

fn write_bytes_atomic(path: &Path, content: &[u8]) -> Result<(), IngestError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| IngestError::Filesystem(err.to_string()))?;
    }
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, content).map_err(|err| IngestError::Filesystem(err.to_string()))?;
    fs::rename(&tmp_path, path).map_err(|err| IngestError::Filesystem(err.to_string()))?;
    Ok(())
}
