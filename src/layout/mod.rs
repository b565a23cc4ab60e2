pub mod catalog;
pub mod native;
pub mod standard;

use camino::Utf8PathBuf;

pub use native::{NativeExpansion, expand_native, expand_native_tree};
pub use standard::{DEFAULT_NON_BIDS_DIR, expand_standardized};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotFile {
    pub path: Utf8PathBuf,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutEntry {
    pub source: Utf8PathBuf,
    pub destination: Utf8PathBuf,
    pub content: Vec<u8>,
}
