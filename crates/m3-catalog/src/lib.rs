//! # m3-catalog
//!
//! Dataset lifecycle management.
//!
//! ```text
//! raw_files/<ds>/<module>/*.csv.gz
//!        │  convert (worker pool, one in-memory DuckDB per file)
//!        ▼
//! parquet/<ds>/<module>/*.parquet
//!        │  CREATE VIEW <module>_<table> AS SELECT * FROM read_parquet(...)
//!        ▼
//! databases/<ds>.duckdb  ──verify primary table──▶  config.json (active pointer)
//! ```
//!
//! [`DatasetCatalog`] drives `init`, `use`, `status` and `list_datasets`.
//! The pointer is only ever rewritten after the new catalog has been
//! verified, so a failed or interrupted `init` never changes what the
//! gateway serves.

pub mod catalog;
pub mod convert;
pub mod error;
pub mod fetch;
pub mod locks;
pub mod manager;
pub mod naming;
pub mod pointer;
pub mod state;
pub mod status;

pub use convert::{ConvertJob, FileOutcome};
pub use error::CatalogError;
pub use fetch::{Fetcher, HttpFetcher};
pub use locks::CatalogLocks;
pub use manager::{ActiveDataset, ActiveSource, DatasetCatalog, InitReport};
pub use naming::view_name;
pub use pointer::{ActivePointer, PointerStore};
pub use state::{DatasetState, InitRun};
pub use status::{DatasetAvailability, DatasetStatus, StatusReport, ViewStatus};
