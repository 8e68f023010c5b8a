/// The six error kinds of spec §7. These are kinds, not exception
/// types: every fallible call in the workspace resolves to one of
/// these at the point it crosses a component boundary.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("configuration error: {0}")]
    ConfigurationError(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn is_fatal_to_startup(&self) -> bool {
        matches!(self, Error::ConfigurationError(_))
    }

    /// Per §7: timeouts and dependency failures degrade to a zero/neutral
    /// contribution rather than aborting the message.
    pub fn is_recoverable_at_component_boundary(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_) | Error::DependencyUnavailable(_) | Error::Internal(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
