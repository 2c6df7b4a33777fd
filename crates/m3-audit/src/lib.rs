//! # m3-audit
//!
//! Audit trail for the m3 gateway and CLI.
//!
//! - Every tool call, with its outcome (executed / rejected / failed)
//! - Auth gate refusals
//! - Dataset lifecycle changes (`init`, `use`)
//!
//! ## Event Format
//!
//! - **File output**: JSON Lines in `<data_dir>/audit/audit.log`
//! - **Console output**: human readable lines on stderr
//!
//! ## Event Types
//!
//! | Event Type | Description |
//! |------------|-------------|
//! | `ToolCalled` | A tool was invoked |
//! | `QueryExecuted` | SQL ran and returned rows |
//! | `QueryRejected` | Validator or parameter checks refused the call |
//! | `QueryFailed` | The backend reported an error |
//! | `AuthDenied` | The auth gate refused the call |
//! | `DatasetInitialized` | `init` activated a dataset |
//! | `DatasetActivated` | `use` switched the active dataset |
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use m3_audit::{AuditEvent, AuditEventType, AuditLogger};
//! use m3_core::{AuditConfig, DataLayout};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let layout = DataLayout::new("/tmp/m3_data");
//! let logger = AuditLogger::new(AuditConfig::default(), &layout)?;
//!
//! let event = AuditEvent::builder(AuditEventType::QueryExecuted, "local", "get_race_distribution")
//!     .backend("duckdb (mimic-iv-demo)")
//!     .row_count(10)
//!     .build();
//! logger.log(event).await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod event;
pub mod logger;
pub mod storage;

pub use error::AuditError;
pub use event::{AuditEvent, AuditEventBuilder, AuditEventType};
pub use logger::{AuditFilter, AuditLogger};
pub use storage::{
    AuditStorage, ConsoleStorage, DualStorage, FileStorage, MemoryStorage, NullStorage,
};
