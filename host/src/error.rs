use axum::http::StatusCode;
use axum::response::IntoResponse;
use storx_backup_store::StoreError;
use utoipa::ToSchema;

/// The standardized error returned by the backup host.
#[derive(thiserror::Error, Debug, ToSchema)]
pub enum HostError {
    /// For invalid backup method names in the path.
    #[error("Unknown backup method: {0}")]
    InvalidMethod(String),

    /// For request bodies or query parameters that fail validation.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// For a missing or unusable `ACCESS_TOKEN` header.
    #[error("Missing access token")]
    MissingAccessToken,

    /// For credentials the source or the satellite rejected.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// For rows that do not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// For invalid bind addresses.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// For store failures.
    #[error("There was an error with the store: {0}")]
    #[schema(value_type = Value)]
    Store(StoreError),

    /// For Serde errors.
    #[error("There was a deserialization error: {0}")]
    #[schema(value_type = Value)]
    Serde(#[from] serde_json::Error),

    /// A catch-all for any other error type.
    #[error("There was an unexpected error: {0}")]
    #[schema(value_type = Value)]
    Anyhow(#[from] anyhow::Error),
}

impl From<StoreError> for HostError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => HostError::NotFound(what),
            StoreError::Validation(why) => HostError::InvalidRequest(why),
            StoreError::DuplicateKey(what) => {
                HostError::InvalidRequest(format!("already exists: {what}"))
            }
            StoreError::Conflict(why) => HostError::InvalidRequest(why),
            other => HostError::Store(other),
        }
    }
}

impl HostError {
    fn status(&self) -> StatusCode {
        match self {
            HostError::InvalidMethod(_)
            | HostError::InvalidRequest(_)
            | HostError::Serde(_) => StatusCode::BAD_REQUEST,
            HostError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            HostError::MissingAccessToken => StatusCode::FORBIDDEN,
            HostError::NotFound(_) => StatusCode::NOT_FOUND,
            HostError::InvalidAddress(_) | HostError::Store(_) | HostError::Anyhow(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for HostError {
    fn into_response(self) -> axum::response::Response {
        let (error, message) = match &self {
            HostError::InvalidMethod(e) => ("invalid_method", e.clone()),
            HostError::InvalidRequest(e) => ("invalid_request", e.clone()),
            HostError::MissingAccessToken => {
                ("missing_access_token", self.to_string())
            }
            HostError::Unauthorized(e) => ("unauthorized", e.clone()),
            HostError::NotFound(e) => ("not_found", e.clone()),
            HostError::InvalidAddress(e) => ("invalid_address", e.clone()),
            HostError::Store(e) => ("store_error", e.to_string()),
            HostError::Serde(e) => ("serde_error", e.to_string()),
            HostError::Anyhow(e) => ("unexpected_error", e.to_string()),
        };
        (
            self.status(),
            axum::Json(
                serde_json::json!({ "status": "error", "error": error, "message": message }),
            ),
        )
            .into_response()
    }
}

/// A type alias for the standardized result type returned by the host.
pub type HostResult<T> = Result<T, HostError>;
