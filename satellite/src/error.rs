/// Errors from the satellite gateway and the crypto paths around it.
#[derive(thiserror::Error, Debug)]
pub enum SatelliteError {
    /// The access grant did not parse or is missing a component.
    #[error("invalid access grant: {0}")]
    InvalidAccessGrant(String),

    /// The requested object does not exist.
    #[error("object not found: {0}")]
    NotFound(String),

    /// The satellite rejected or failed the operation.
    #[error("satellite operation failed: {0}")]
    Storage(String),

    /// Envelope or path decryption failed.
    #[error("decryption failed: {0}")]
    Crypto(String),
}

pub type SatelliteResult<T> = Result<T, SatelliteError>;
