//! Crate-wide error type.
//!
//! One enum for the whole crate rather than per-module error types, tagged by
//! the categories the refresh/failover engine actually branches on (see
//! `failover::is_failoverable`). `?` plus `derive_more::From` does the
//! plumbing from library errors (`reqwest`, `serde_json`, channel closes).

use derive_more::From;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, From)]
pub enum Error {
    /// Fail-overable: 408/429/5xx, socket/DNS/I-O errors, request timeouts.
    Transient(String),

    /// 401/403 from the remote service. Not fail-overable.
    Auth(String),

    /// Conditional fetch reported 404 for a key that used to exist.
    NotFound { key: String, label: Option<String> },

    /// Programmer/configuration error: bad snapshot composition, malformed
    /// push notification, null client manager, unknown replica host.
    InvalidConfig(String),

    /// A suspension point observed cancellation.
    Cancelled,

    /// Startup exhausted its deadline; carries every attempt's error.
    Aggregate(Vec<Error>),

    /// An adapter's `process`/`invalidate` step failed (e.g. secret-store
    /// lookup). `needs_refresh()` staying true is what drives the retry.
    AdapterFailure(String),

    #[from]
    Json(serde_json::Error),

    #[from]
    Http(reqwest::Error),
}

impl core::fmt::Display for Error {
    fn fmt(&self, fmt: &mut core::fmt::Formatter<'_>) -> core::result::Result<(), core::fmt::Error> {
        write!(fmt, "{self:?}")
    }
}

impl std::error::Error for Error {}

impl Error {
    /// §7 category 1: transient/fail-overable errors advance to the next replica.
    #[must_use]
    pub const fn is_failoverable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Http(_))
    }

    /// §7 category 3: conditional-fetch 404 is benign, not a hard failure.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// The error classes `tryRefresh` swallows into `false` rather than propagating.
    #[must_use]
    pub const fn is_try_refresh_expected(&self) -> bool {
        matches!(
            self,
            Self::Transient(_)
                | Self::Http(_)
                | Self::Auth(_)
                | Self::Cancelled
                | Self::AdapterFailure(_)
        )
    }

    /// Classifies an HTTP response status per §7's taxonomy: 401/403 become
    /// the non-fail-overable `Auth` variant, everything else (408/429/5xx and
    /// any other non-success status) is `Transient`. `RemoteClient`
    /// implementations over HTTP should inspect `status()` and call this
    /// instead of routing every non-2xx response through
    /// `reqwest::Response::error_for_status`, which would otherwise collapse
    /// 401/403 into the generically fail-overable `Http` variant.
    #[must_use]
    pub fn from_status(status: reqwest::StatusCode, context: impl Into<String>) -> Self {
        let context = context.into();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            Self::Auth(format!("{context}: {status}"))
        } else {
            Self::Transient(format!("{context}: {status}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_status_classifies_auth_as_not_failoverable() {
        let err = Error::from_status(reqwest::StatusCode::UNAUTHORIZED, "get");
        assert!(matches!(err, Error::Auth(_)));
        assert!(!err.is_failoverable());

        let err = Error::from_status(reqwest::StatusCode::FORBIDDEN, "get");
        assert!(matches!(err, Error::Auth(_)));
        assert!(!err.is_failoverable());
    }

    #[test]
    fn from_status_classifies_5xx_as_failoverable() {
        let err = Error::from_status(reqwest::StatusCode::SERVICE_UNAVAILABLE, "get");
        assert!(matches!(err, Error::Transient(_)));
        assert!(err.is_failoverable());
    }
}
