//! Record store error type

use std::io::{Error as IoError, ErrorKind};

/// Error type for record store operations
#[derive(Debug)]
pub enum StoreError {
    /// I/O error from the file backend
    Io(IoError),
    /// Corruption detected (CRC mismatch, undecodable record or batch)
    Corruption(String),
    /// Backend file not found
    NotFound(String),
    /// Namespace does not exist
    BucketNotFound(String),
    /// Namespace already exists
    BucketExists(String),
    /// Disk full
    DiskFull,
    /// Fsync failed
    FsyncFailed(String),
    /// Partial write detected
    PartialWrite { expected: usize, actual: usize },
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "store I/O error: {}", e),
            StoreError::Corruption(msg) => write!(f, "store corruption: {}", msg),
            StoreError::NotFound(name) => write!(f, "store file not found: {}", name),
            StoreError::BucketNotFound(path) => write!(f, "bucket not found: {}", path),
            StoreError::BucketExists(path) => write!(f, "bucket already exists: {}", path),
            StoreError::DiskFull => write!(f, "store disk full"),
            StoreError::FsyncFailed(msg) => write!(f, "store fsync failed: {}", msg),
            StoreError::PartialWrite { expected, actual } => {
                write!(
                    f,
                    "store partial write: expected {} bytes, wrote {}",
                    expected, actual
                )
            }
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<IoError> for StoreError {
    fn from(e: IoError) -> Self {
        match e.kind() {
            ErrorKind::NotFound => StoreError::NotFound(e.to_string()),
            _ if e.to_string().contains("No space left") => StoreError::DiskFull,
            _ => StoreError::Io(e),
        }
    }
}

impl From<bincode::Error> for StoreError {
    fn from(e: bincode::Error) -> Self {
        StoreError::Corruption(format!("bincode: {}", e))
    }
}

impl StoreError {
    /// True for errors that indicate damaged data rather than a failed operation
    pub fn is_corruption(&self) -> bool {
        matches!(self, StoreError::Corruption(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_not_found_maps_to_not_found() {
        let err: StoreError = IoError::new(ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn test_display() {
        let err = StoreError::BucketNotFound("fragments/7".to_string());
        assert_eq!(err.to_string(), "bucket not found: fragments/7");
        assert!(StoreError::Corruption("x".into()).is_corruption());
    }
}
