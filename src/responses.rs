use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
pub struct JsonResponse {
    pub status: String,
    pub success: bool,
    pub message: String,
    pub code: Option<String>,
}

impl JsonResponse {
    pub fn success(msg: &str) -> impl IntoResponse {
        (
            StatusCode::OK,
            Json(JsonResponse {
                status: "success".to_string(),
                success: true,
                message: msg.to_string(),
                code: None,
            }),
        )
    }

    pub fn not_found(msg: &str) -> impl IntoResponse {
        (
            StatusCode::NOT_FOUND,
            Json(JsonResponse {
                status: "error".to_string(),
                success: false,
                message: msg.to_string(),
                code: None,
            }),
        )
    }

    pub fn conflict(msg: &str) -> impl IntoResponse {
        (
            StatusCode::CONFLICT,
            Json(JsonResponse {
                status: "error".to_string(),
                success: false,
                message: msg.to_string(),
                code: None,
            }),
        )
    }

    pub fn server_error(msg: &str) -> impl IntoResponse {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(JsonResponse {
                status: "error".to_string(),
                success: false,
                message: msg.to_string(),
                code: None,
            }),
        )
    }

    pub fn unauthorized(msg: &str) -> impl IntoResponse {
        (
            StatusCode::UNAUTHORIZED,
            Json(JsonResponse {
                status: "error".to_string(),
                success: false,
                message: msg.to_string(),
                code: None,
            }),
        )
    }

    pub fn bad_request(msg: &str) -> impl IntoResponse {
        (
            StatusCode::BAD_REQUEST,
            Json(JsonResponse {
                status: "error".to_string(),
                success: false,
                message: msg.to_string(),
                code: None,
            }),
        )
    }

    pub fn too_many_requests(msg: &str) -> impl IntoResponse {
        (
            StatusCode::TOO_MANY_REQUESTS,
            Json(JsonResponse {
                status: "error".to_string(),
                success: false,
                message: msg.to_string(),
                code: None,
            }),
        )
    }

    pub fn unprocessable_with_code(msg: &str, code: &str) -> impl IntoResponse {
        (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(JsonResponse {
                status: "error".to_string(),
                success: false,
                message: msg.to_string(),
                code: Some(code.to_string()),
            }),
        )
    }
}
