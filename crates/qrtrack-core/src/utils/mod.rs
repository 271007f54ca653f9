//! Small helpers shared by the HTTP clients.

pub mod format;

pub use format::truncate_body;
