//! Process-wide diagnostics output.

pub mod logging;
