//! Error types for the capsync-ble crate.

use thiserror::Error;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Reading the raw dump stream failed. Fatal to the frame source.
    #[error("Stream read error: {0}")]
    StreamRead(#[source] std::io::Error),

    /// A single HCI frame could not be parsed. The frame is dropped.
    #[error("Frame parse error: {context}")]
    FrameParse {
        /// Description of what was wrong with the frame.
        context: String,
    },

    /// A reassembled message did not match the telemetry layout.
    #[error("Invalid data received: {context}")]
    InvalidData {
        /// Description of what was invalid about the data.
        context: String,
    },

    /// An invalid parameter was provided.
    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter {
        /// The name of the parameter.
        name: String,
        /// The invalid value that was provided.
        value: String,
    },

    /// Starting or stopping the external capture processes failed.
    #[error("Capture control failed: {reason}")]
    CaptureControl {
        /// Description of why the capture collaborator failed.
        reason: String,
    },

    /// The trigger source failed before firing.
    #[error("Trigger failed: {reason}")]
    Trigger {
        /// Description of the trigger failure.
        reason: String,
    },

    /// A capture session is already running on this pipeline.
    #[error("Capture session already running")]
    AlreadyRunning,

    /// No attribute record exists for the identity.
    #[error("No data found for device id {identity}")]
    UnknownIdentity {
        /// The identity that was looked up.
        identity: String,
    },

    /// File I/O error (export).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub(crate) fn frame_parse(context: impl Into<String>) -> Self {
        Self::FrameParse {
            context: context.into(),
        }
    }

    pub(crate) fn invalid_data(context: impl Into<String>) -> Self {
        Self::InvalidData {
            context: context.into(),
        }
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::frame_parse("need at least 17 tokens, got 4");
        assert_eq!(
            err.to_string(),
            "Frame parse error: need at least 17 tokens, got 4"
        );

        let err = Error::InvalidParameter {
            name: "device_id".to_string(),
            value: "xyz".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid parameter: device_id = xyz");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
