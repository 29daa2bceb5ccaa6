//! Spreadsheet export of attribute snapshots.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::config::DeviceIdentity;
use crate::data::attributes::{AttributeStore, SessionAttributes};
use crate::error::{Error, Result};

/// Appends attribute snapshots as CSV rows.
pub struct CsvExporter {
    path: PathBuf,
    store: Arc<dyn AttributeStore>,
}

impl CsvExporter {
    /// Create an exporter writing to `path`.
    pub fn new(path: impl Into<PathBuf>, store: Arc<dyn AttributeStore>) -> Self {
        Self {
            path: path.into(),
            store,
        }
    }

    /// Target file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append the current snapshot of `identity` as one row.
    ///
    /// The header is written only when the file is new or empty.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownIdentity`] if the store has no record for
    /// `identity`, [`Error::Io`] if the file cannot be written.
    pub fn append(&self, identity: &DeviceIdentity) -> Result<()> {
        let attributes = self
            .store
            .get_all(identity)
            .ok_or_else(|| Error::UnknownIdentity {
                identity: identity.to_string(),
            })?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let mut csv = String::new();
        if file.metadata()?.len() == 0 {
            csv.push_str(&header());
            csv.push('\n');
        }
        csv.push_str(&row(&attributes));
        csv.push('\n');

        file.write_all(csv.as_bytes())?;
        info!("Exported {} to {}", identity, self.path.display());
        Ok(())
    }
}

/// CSV header line.
pub fn header() -> String {
    SessionAttributes::LABELS
        .iter()
        .map(|label| escape(label))
        .collect::<Vec<_>>()
        .join(",")
}

/// One CSV row for a snapshot.
pub fn row(attributes: &SessionAttributes) -> String {
    attributes
        .display_values()
        .iter()
        .map(|value| escape(value))
        .collect::<Vec<_>>()
        .join(",")
}

fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
