use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use lib_ranking::{ErrorKind, RankingError};
use serde_json::json;
use tracing::{error, warn};

/// # API Error
///
/// Everything a handler can fail with, rendered as a JSON body with an
/// `error_type` tag and a matching HTTP status.
#[derive(Debug)]
pub enum ApiError {
    /// Error returned by the ranking engine, mapped by its kind.
    Ranking(RankingError),
    /// Missing or malformed caller identity headers.
    Unauthenticated(String),
    /// Request parameters that cannot be interpreted.
    BadRequest(String),
}

impl From<RankingError> for ApiError {
    fn from(e: RankingError) -> Self {
        ApiError::Ranking(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Ranking(e) => match e.kind() {
                ErrorKind::NotFound => (
                    StatusCode::NOT_FOUND,
                    json!({ "error_type": "NotFound", "message": e.to_string() }),
                ),
                // Ranking is degraded; history and health stay up.
                ErrorKind::StoreUnavailable => {
                    warn!("ranking store unavailable: {}", e);
                    (
                        StatusCode::SERVICE_UNAVAILABLE,
                        json!({
                            "error_type": "RankingUnavailable",
                            "message": "Ranking is temporarily unavailable. Please retry shortly."
                        }),
                    )
                }
                ErrorKind::PermissionDenied => (
                    StatusCode::FORBIDDEN,
                    json!({ "error_type": "PermissionDenied", "message": e.to_string() }),
                ),
                ErrorKind::Internal => {
                    error!("internal error: {:?}", e);
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        json!({ "error_type": "Internal", "message": "Internal server error." }),
                    )
                }
            },
            ApiError::Unauthenticated(reason) => (
                StatusCode::UNAUTHORIZED,
                json!({ "error_type": "Unauthenticated", "message": reason }),
            ),
            ApiError::BadRequest(reason) => (
                StatusCode::BAD_REQUEST,
                json!({ "error_type": "InvalidRequest", "message": reason }),
            ),
        };
        (status, Json(body)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Ranking(e) => write!(f, "{}", e),
            ApiError::Unauthenticated(s) => write!(f, "Unauthenticated: {}", s),
            ApiError::BadRequest(s) => write!(f, "Bad request: {}", s),
        }
    }
}

impl std::error::Error for ApiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ApiError::Ranking(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_kinds_to_status_codes() {
        let cases = [
            (RankingError::not_found("game chess"), StatusCode::NOT_FOUND),
            (RankingError::store_unavailable("redis down"), StatusCode::SERVICE_UNAVAILABLE),
            (RankingError::permission_denied("not admin"), StatusCode::FORBIDDEN),
            (RankingError::internal("boom"), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), status);
        }
        assert_eq!(
            ApiError::BadRequest("x".into()).into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Unauthenticated("x".into()).into_response().status(),
            StatusCode::UNAUTHORIZED
        );
    }
}
