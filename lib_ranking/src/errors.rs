//! # Ranking Errors
//!
//! A small closed set of error kinds shared by every layer of the engine.
//! Callers branch on [`ErrorKind`], never on the rendered message.
//!
//! - `NotFound`: a game, user or ranking entry is absent.
//! - `StoreUnavailable`: the ranking backend is unreachable or timed out.
//!   Kept apart from `Internal` so that a transport can report the ranking
//!   subsystem as degraded while catalog, history and authentication stay up.
//! - `PermissionDenied`: a privileged action without the required role.
//! - `Internal`: anything unexpected or unclassified.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors surfaced by the ranking engine and its collaborators.
#[derive(Debug, Error)]
pub enum RankingError {
    #[error("not found: {what}")]
    NotFound { what: String },

    #[error("ranking store unavailable: {reason}")]
    StoreUnavailable {
        reason: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("permission denied: {reason}")]
    PermissionDenied { reason: String },

    #[error("internal error: {reason}")]
    Internal {
        reason: String,
        #[source]
        source: Option<BoxError>,
    },
}

/// Discriminant of [`RankingError`], used for matching at boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    StoreUnavailable,
    PermissionDenied,
    Internal,
}

pub type Result<T> = std::result::Result<T, RankingError>;

impl RankingError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn store_unavailable(reason: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            reason: reason.into(),
            source: None,
        }
    }

    pub fn store_unavailable_from(
        reason: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::StoreUnavailable {
            reason: reason.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn permission_denied(reason: impl Into<String>) -> Self {
        Self::PermissionDenied {
            reason: reason.into(),
        }
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
            source: None,
        }
    }

    pub fn internal_from(
        reason: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Internal {
            reason: reason.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            RankingError::NotFound { .. } => ErrorKind::NotFound,
            RankingError::StoreUnavailable { .. } => ErrorKind::StoreUnavailable,
            RankingError::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            RankingError::Internal { .. } => ErrorKind::Internal,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_store_unavailable(&self) -> bool {
        self.kind() == ErrorKind::StoreUnavailable
    }
}

/// Runs a ranking-store call under a deadline.
///
/// Expiry yields `StoreUnavailable`, the same condition a dropped connection
/// produces.
pub async fn store_deadline<T, F>(limit: Duration, operation: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(elapsed) => Err(RankingError::store_unavailable_from(
            format!("{operation} exceeded {}ms", limit.as_millis()),
            elapsed,
        )),
    }
}

/// Runs a catalog, directory or history call under a deadline.
///
/// Expiry yields `Internal`: these services are not the ranking backend and
/// their outage must not be reported as a degraded ranking subsystem.
pub async fn service_deadline<T, F>(limit: Duration, operation: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(elapsed) => Err(RankingError::internal_from(
            format!("{operation} exceeded {}ms", limit.as_millis()),
            elapsed,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let err = RankingError::not_found("game chess");
        assert_eq!(err.to_string(), "not found: game chess");

        let err = RankingError::store_unavailable("connection refused");
        assert_eq!(
            err.to_string(),
            "ranking store unavailable: connection refused"
        );
    }

    #[test]
    fn kinds_are_distinct() {
        assert_eq!(RankingError::not_found("x").kind(), ErrorKind::NotFound);
        assert_eq!(
            RankingError::store_unavailable("x").kind(),
            ErrorKind::StoreUnavailable
        );
        assert_eq!(
            RankingError::permission_denied("x").kind(),
            ErrorKind::PermissionDenied
        );
        assert_eq!(RankingError::internal("x").kind(), ErrorKind::Internal);
    }

    #[test]
    fn errors_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RankingError>();
    }

    #[tokio::test(start_paused = true)]
    async fn store_deadline_expiry_is_store_unavailable() {
        let err = store_deadline(Duration::from_millis(50), "zadd", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(err.is_store_unavailable());
    }

    #[tokio::test(start_paused = true)]
    async fn service_deadline_expiry_is_internal() {
        let err = service_deadline(Duration::from_millis(50), "history append", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[tokio::test]
    async fn deadline_passes_inner_result_through() {
        let err = store_deadline(Duration::from_secs(1), "rank", async {
            Err::<(), _>(RankingError::not_found("member 7"))
        })
        .await
        .unwrap_err();
        assert!(err.is_not_found());
    }
}
