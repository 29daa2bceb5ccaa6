//! Session data.
//!
//! This module contains the session state owned by the processing worker,
//! the per-device attribute schema and store, and CSV export.

pub mod attributes;
pub mod export;
pub mod session;

pub use attributes::{Attribute, AttributeStore, InMemoryAttributeStore, SessionAttributes};
pub use export::CsvExporter;
pub use session::{Session, SessionStats};
