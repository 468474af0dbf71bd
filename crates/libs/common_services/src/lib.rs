#![deny(clippy::unwrap_used)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::cast_sign_loss,
    clippy::module_inception,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_possible_wrap
)]

pub mod catalog;
pub mod discovery;
pub mod job_store;
pub mod log_parser;
pub mod orchestrator;
pub mod reconcile;
pub mod runner;
pub mod server_jobs;
pub mod utils;
