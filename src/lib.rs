pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod fetch;
pub mod fs_util;
pub mod layout;
pub mod output;
pub mod snapshot;
pub mod vcs;
