/// Terminal error categories a processor run can surface to the
/// dispatcher. Per-item failures never appear here: they accumulate in the
/// task memory and the run still returns `Ok` as long as the
/// infrastructure held up.
#[derive(thiserror::Error, Debug)]
pub enum ProcessorError {
    /// The source rejected the refresh token. Not transient: the job needs
    /// the user to re-authorize.
    #[error("token expired")]
    AuthExpired,

    /// Credentials missing or malformed.
    #[error("invalid credentials: {0}")]
    AuthConfig(String),

    /// Could not enumerate prior state in the destination.
    #[error("failed to list destination: {0}")]
    DestinationList(String),

    /// A satellite write failed at the run level (placeholder upload,
    /// dump streaming). Item-level upload failures go into memory instead.
    #[error("satellite error: {0}")]
    Storage(String),

    /// The heartbeat found the task row no longer `running`; an external
    /// actor (reaper, operator) took the task away.
    #[error("task was cancelled: {0}")]
    Cancelled(String),

    /// Anything unexpected. Recovered at the dispatcher boundary.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ProcessorError {
    /// Whether another run could plausibly heal this failure. The
    /// dispatcher keeps retryable failures off the job row until the
    /// retry budget is spent; auth failures surface immediately because
    /// only the user can fix them.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ProcessorError::AuthExpired | ProcessorError::AuthConfig(_))
    }
}

pub type ProcessorResult<T> = Result<T, ProcessorError>;
