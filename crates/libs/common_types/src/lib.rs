#![deny(clippy::unwrap_used)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::struct_excessive_bools
)]
mod file_entry;
mod job_record;
mod log_event;
mod result_summary;

pub use file_entry::*;
pub use job_record::*;
pub use log_event::*;
pub use result_summary::*;
