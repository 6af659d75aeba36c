use host_bridge::FetchError;
use thiserror::Error;

/// A candidate URL was not allowed by any source of a directive.
///
/// This is an expected outcome of validation, not a fault.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("`{candidate}` refused by {directive} `{rule}`")]
pub struct CspViolation {
    pub directive: String,
    /// The source list that was exhausted, space separated.
    pub rule: String,
    pub candidate: String,
}

#[derive(Debug, Error)]
pub enum CspError {
    #[error("content security policy already loaded for this context")]
    AlreadyLoaded,

    #[error(transparent)]
    Violation(#[from] CspViolation),

    #[error("fetching `{url}` for hash check failed")]
    Fetch {
        url: String,
        #[source]
        source: FetchError,
    },
}
