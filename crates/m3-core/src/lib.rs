//! # m3-core
//!
//! Types shared by every m3 crate:
//!
//! - [`config`]: the `m3.yaml` configuration and its environment overrides
//! - [`dataset`]: dataset definitions (built-in and user supplied) and the registry
//! - [`layout`]: the on-disk layout of the data directory
//! - [`ErrorKind`]: the stable, machine readable error taxonomy surfaced to agents
//!
//! ## Data directory
//!
//! ```text
//! $M3_DATA_DIR/
//! ├── config.json              active dataset pointer
//! ├── m3.yaml                  optional configuration
//! ├── datasets/*.{json,yaml}   user dataset definitions
//! ├── raw_files/<dataset>/     downloaded CSV dumps
//! ├── parquet/<dataset>/       converted tables
//! ├── databases/*.duckdb       catalogs of views
//! └── audit/audit.log          JSON Lines audit trail
//! ```

pub mod config;
pub mod dataset;
pub mod error;
pub mod layout;

pub use config::auth::StaticToken;
pub use config::{
    AuditConfig, AuthConfig, BackendConfig, BackendKind, ConfigError, EtlConfig, GatewayConfig,
    M3Config,
};
pub use dataset::{DatasetDefinition, DatasetRegistry};
pub use error::ErrorKind;
pub use layout::DataLayout;
