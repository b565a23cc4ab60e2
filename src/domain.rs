use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::IngestError;

static RECORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<field>[0-9]+)_(?P<visit>[0-9]+)_(?P<array>[0-9]+)(?:\.(?P<ext>[A-Za-z0-9]+))?$")
        .expect("record regex is valid")
});

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordSpec {
    field_code: String,
    instance_code: String,
    forced_extension: Option<String>,
}

impl RecordSpec {
    pub fn field_code(&self) -> &str {
        &self.field_code
    }

    pub fn instance_code(&self) -> &str {
        &self.instance_code
    }

    pub fn forced_extension(&self) -> Option<&str> {
        self.forced_extension.as_deref()
    }

    pub fn stem(&self) -> String {
        format!("{}_{}", self.field_code, self.instance_code)
    }

    pub fn session(&self) -> &str {
        self.instance_code
            .split_once('_')
            .map(|(visit, _)| visit)
            .unwrap_or(&self.instance_code)
    }

    pub fn array_index(&self) -> &str {
        self.instance_code
            .split_once('_')
            .map(|(_, array)| array)
            .unwrap_or("0")
    }

    pub fn same_record(&self, other: &RecordSpec) -> bool {
        self.field_code == other.field_code && self.instance_code == other.instance_code
    }

    pub fn accepts_extension(&self, ext: &str) -> bool {
        match &self.forced_extension {
            Some(forced) => forced.eq_ignore_ascii_case(ext),
            None => true,
        }
    }
}

impl fmt::Display for RecordSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.forced_extension {
            Some(ext) => write!(f, "{}_{}.{ext}", self.field_code, self.instance_code),
            None => write!(f, "{}_{}", self.field_code, self.instance_code),
        }
    }
}

impl FromStr for RecordSpec {
    type Err = IngestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let caps = RECORD_RE
            .captures(trimmed)
            .ok_or_else(|| IngestError::InvalidRecord(value.to_string()))?;
        Ok(Self {
            field_code: caps["field"].to_string(),
            instance_code: format!("{}_{}", &caps["visit"], &caps["array"]),
            forced_extension: caps.name("ext").map(|ext| ext.as_str().to_ascii_lowercase()),
        })
    }
}

impl Serialize for RecordSpec {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RecordSpec {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubjectId(String);

impl SubjectId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SubjectId {
    type Err = IngestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_string();
        let is_valid =
            !normalized.is_empty() && normalized.chars().all(|ch| ch.is_ascii_alphanumeric());
        if !is_valid {
            return Err(IngestError::InvalidSubject(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotBranch {
    Raw,
    Native,
    Standardized,
}

pub const SNAPSHOT_PREFIX: &str = "incoming";

impl SnapshotBranch {
    pub const ALL: [SnapshotBranch; 3] = [
        SnapshotBranch::Raw,
        SnapshotBranch::Native,
        SnapshotBranch::Standardized,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SnapshotBranch::Raw => "incoming",
            SnapshotBranch::Native => "incoming-native",
            SnapshotBranch::Standardized => "incoming-bids",
        }
    }

    pub fn upstream(self) -> Option<SnapshotBranch> {
        match self {
            SnapshotBranch::Raw => None,
            SnapshotBranch::Native => Some(SnapshotBranch::Raw),
            SnapshotBranch::Standardized => Some(SnapshotBranch::Native),
        }
    }

    pub fn is_snapshot_name(branch: &str) -> bool {
        branch.starts_with(SNAPSHOT_PREFIX)
    }
}

impl fmt::Display for SnapshotBranch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
