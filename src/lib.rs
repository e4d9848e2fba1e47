//! Document generation worker: claims generation jobs from a shared store,
//! renders their template documents and writes PDF output.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
pub mod util;
