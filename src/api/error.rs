use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use crate::props::PropError;

const INTERNAL_ERROR_MESSAGE: &str = "internal error";

/// Handler error. Bad input becomes 422, everything else 500; both carry a
/// JSON `{"error": ...}` body. Internal details are logged, not returned.
#[derive(Debug)]
pub enum ApiError {
    Invalid(String),
    Internal(anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Invalid(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<PropError> for ApiError {
    fn from(e: PropError) -> Self {
        ApiError::Invalid(e.to_string())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        match e.downcast_ref::<PropError>() {
            Some(prop) => ApiError::Invalid(prop.to_string()),
            None => ApiError::Internal(e),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Invalid(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            ApiError::Invalid(msg) => msg,
            ApiError::Internal(e) => {
                error!("request failed: {:#}", e);
                INTERNAL_ERROR_MESSAGE.to_string()
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prop_errors_map_to_422_through_anyhow() {
        let err: ApiError = anyhow::Error::from(PropError::NoLegs).into();
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.into_response().status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn other_errors_map_to_500_without_details() {
        let err: ApiError = anyhow::anyhow!("no such table: player_games").into();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body, json!({ "error": "internal error" }));
    }
}
