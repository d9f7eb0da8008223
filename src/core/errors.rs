use http::StatusCode;
use spin_sdk::http::Response;
use std::fmt;

use crate::core::store::StoreError;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    InternalError(String),
}

impl ApiError {
    pub fn not_authenticated() -> Self {
        ApiError::Unauthorized("Not authenticated".to_string())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::BadRequest(msg) => write!(f, "Bad Request: {}", msg),
            ApiError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            ApiError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            ApiError::NotFound(msg) => write!(f, "Not Found: {}", msg),
            ApiError::InternalError(msg) => write!(f, "Internal Error: {}", msg),
        }
    }
}

impl From<ApiError> for Response {
    fn from(err: ApiError) -> Self {
        let status = err.status().as_u16();
        let message = match err {
            ApiError::InternalError(detail) => {
                tracing::error!(%detail, "request failed");
                "Server error".to_string()
            }
            ApiError::BadRequest(msg)
            | ApiError::Unauthorized(msg)
            | ApiError::Forbidden(msg)
            | ApiError::NotFound(msg) => msg,
        };

        Response::builder()
            .status(status)
            .header("content-type", "application/json")
            .body(serde_json::to_vec(&serde_json::json!({ "message": message })).unwrap_or_default())
            .build()
    }
}

impl std::error::Error for ApiError {}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::InternalError(format!("{:#}", err))
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::InternalError(err.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::InternalError(format!("serialization: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_errors_hide_their_detail() {
        let resp: Response = ApiError::InternalError("db exploded at user:7".to_string()).into();
        assert_eq!(*resp.status(), 500);
        let body: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(body["message"], "Server error");
    }

    #[test]
    fn client_errors_carry_their_message() {
        let resp: Response = ApiError::BadRequest("Username already taken".to_string()).into();
        assert_eq!(*resp.status(), 400);
        let body: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(body["message"], "Username already taken");
    }

    #[test]
    fn variants_map_to_their_status() {
        assert_eq!(ApiError::BadRequest(String::new()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::not_authenticated().status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::Forbidden(String::new()).status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::NotFound(String::new()).status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::InternalError(String::new()).status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
