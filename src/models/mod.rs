//! Core data models for the file-data service.
//!
//! The replication record maps to the `file_data` table; the contract types
//! serialize as the public JSON API via `serde`.

pub mod contracts;
pub mod file_data;
pub mod keys;
pub mod object_type;
