//! Use cases - application services orchestrating domain entities through
//! port interfaces

pub mod exchange;
pub mod ingest;
pub mod manifest;
pub mod query;

pub use exchange::{ExchangeError, ExchangeUseCase};
pub use ingest::{clone_into_store, IngestError, IngestOutcome, IngestUseCase, UploadRequest};
pub use manifest::{ManifestExportOptions, ManifestIngestOutcome, ManifestUseCase};
pub use query::{FileLocation, QueryUseCase, ValidationRow};
