//! CLI command implementations

pub mod hash;
pub mod init;
pub mod prune;
pub mod run;
pub mod status;
