//! JSON envelope and error-to-status mapping shared by all handlers.

use std::fmt::Display;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use fragbench_core::ParseError;
use fragbench_device::DeviceError;
use fragbench_occupancy::OccupancyError;
use fragbench_store::StoreError;
use fragbench_sweep::SweepError;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize, serde::Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

pub fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

/// HTTP status an error maps to.
pub trait HttpStatus {
    fn status(&self) -> StatusCode;
}

impl HttpStatus for ParseError {
    fn status(&self) -> StatusCode {
        match self {
            ParseError::InvalidId(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::BAD_GATEWAY,
        }
    }
}

impl HttpStatus for DeviceError {
    fn status(&self) -> StatusCode {
        match self {
            DeviceError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            DeviceError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            DeviceError::Command { .. } | DeviceError::Parse(_) => StatusCode::BAD_GATEWAY,
            DeviceError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            DeviceError::Spawn { .. } | DeviceError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl HttpStatus for StoreError {
    fn status(&self) -> StatusCode {
        match self {
            StoreError::RunNotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl HttpStatus for OccupancyError {
    fn status(&self) -> StatusCode {
        match self {
            OccupancyError::InvalidTarget(_) => StatusCode::BAD_REQUEST,
            OccupancyError::Cancelled => StatusCode::CONFLICT,
            OccupancyError::Stalled { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            OccupancyError::Device(e) => e.status(),
        }
    }
}

impl HttpStatus for SweepError {
    fn status(&self) -> StatusCode {
        match self {
            SweepError::InvalidPlan(_) | SweepError::UnknownQuery(_) => StatusCode::BAD_REQUEST,
            SweepError::Cancelled => StatusCode::CONFLICT,
            SweepError::Occupancy(e) => e.status(),
            SweepError::Device(e) => e.status(),
            SweepError::Store(e) => e.status(),
            SweepError::Parse(e) => e.status(),
            SweepError::MissingProfile(_) | SweepError::Catalog { .. } | SweepError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Error response carrying the error's own status.
pub fn failure<E: HttpStatus + Display>(e: E) -> Response {
    error_response(&e.to_string(), e.status()).into_response()
}

/// `200` envelope on success, [`failure`] otherwise.
pub fn reply<T, E>(result: Result<T, E>) -> Response
where
    T: serde::Serialize,
    E: HttpStatus + Display,
{
    match result {
        Ok(data) => ApiResponse::ok(data).into_response(),
        Err(e) => failure(e),
    }
}

pub fn busy() -> Response {
    error_response("device is busy with another job", StatusCode::CONFLICT).into_response()
}
