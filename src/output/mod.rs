//! Output formatting
//!
//! - `text`: human-readable report on stdout
//! - `json`: machine-readable report file

pub mod json;
pub mod text;

pub use json::write_json_output;
pub use text::print_report;
