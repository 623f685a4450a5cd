//! Purpose: Define the stable public Rust API boundary for emstore.
//! Exports: Core types and operations needed by the CLI and downstream tools.
//! Role: Public, additive-only surface; hides internal storage modules.
//! Invariants: This module is the only public path to storage primitives.
//! Invariants: Frames cross this boundary as Arrow `RecordBatch` values.

#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::config::{Namespace, StoreConfig};
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::reader::{Reader, TableScan};
pub use crate::core::store::TableStore;
pub use crate::core::writer::Writer;
pub use arrow::record_batch::RecordBatch;
