//! Core data models for the blob repository.
//!
//! Containers and blobs map to database rows of the local backend via
//! `sqlx::FromRow`; headers, requests and SAS types serialize as JSON via
//! `serde` for the HTTP surface.

pub mod blob;
pub mod container;
pub mod headers;
pub mod requests;
pub mod sas;
