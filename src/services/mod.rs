//! Repository core and storage backends.

pub mod address;
pub mod archive;
pub mod backend;
pub mod error;
pub mod local_backend;
pub mod memory_backend;
pub mod options;
pub mod projector;
pub mod registry;
pub mod repository;
pub mod sas;
pub mod storage_service;

#[cfg(test)]
pub mod test_support;
