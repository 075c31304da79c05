//! Process wiring: configuration, logging, job spawning and app assembly.
pub mod app;
pub mod jobs;
pub mod logging;
