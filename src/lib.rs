//! Training location photo ingestion and equipment detection.
//!
//! Photos are validated, compressed and stored with retry and compensating
//! cleanup, then analysed concurrently by a vision model while a shared
//! status board tracks per-photo progress.

pub mod analysis;
pub mod config;
pub mod db;
pub mod detect;
pub mod error;
pub mod ingest;
pub mod location;
pub mod logging;
pub mod retry;
pub mod storage;

#[cfg(test)]
mod test_support;
