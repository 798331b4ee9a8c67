//! keepsake CLI library - exports modules for testing

pub mod cmd;
pub mod config;
pub mod daemon;
pub mod locks;
pub mod util;
