//! Repository error type

use crate::store::StoreError;

#[derive(Debug)]
pub enum Error {
    /// Book, fragment or version does not exist or is not linked where referenced
    NotFound,
    /// Pagination offset past the end of the book
    InvalidOffset,
    /// Malformed caller input (filter arguments, import payload)
    InvalidInput(String),
    /// Store failure, including undecodable records
    Store(StoreError),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::NotFound => write!(f, "not found"),
            Error::InvalidOffset => write!(f, "invalid offset"),
            Error::InvalidInput(msg) => write!(f, "invalid input: {}", msg),
            Error::Store(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        Error::Store(e)
    }
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound)
    }

    /// Errors caused by the request rather than by the server
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::NotFound | Error::InvalidOffset | Error::InvalidInput(_)
        )
    }

    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Store(e) if e.is_corruption())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(Error::NotFound.is_not_found());
        assert!(Error::InvalidOffset.is_client_error());
        assert!(Error::InvalidInput("x".into()).is_client_error());

        let corrupt: Error = StoreError::Corruption("bad json".into()).into();
        assert!(!corrupt.is_client_error());
        assert!(corrupt.is_corruption());
        assert_eq!(corrupt.to_string(), "store corruption: bad json");
    }
}
