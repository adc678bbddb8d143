// Store errors. Application glue (config, checkpoints, main) stays on anyhow.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Queries must carry at least one filter; unfiltered reads would scan whole tables.
    #[error("no filter criteria specified")]
    EmptyCondition,
    #[error("cluster aggregate has zero hosts; per-host mean is undefined")]
    ZeroHostCount,
    #[error("store operation {operation} timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },
    #[error("{failed} of {total} rows failed to write to {table}")]
    RowFailures {
        table: &'static str,
        failed: usize,
        total: usize,
    },
    #[error("metric values codec: {0}")]
    Codec(String),
    #[error("sql: {0}")]
    Sql(#[from] sqlx::Error),
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for StoreError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::EmptyCondition => StatusCode::BAD_REQUEST,
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(ErrorBody {
                message: self.to_string(),
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(
            StoreError::EmptyCondition.into_response().status(),
            StatusCode::BAD_REQUEST
        );
        let timeout = StoreError::Timeout {
            operation: "get_metric_records",
            timeout_ms: 1,
        };
        assert_eq!(timeout.into_response().status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            StoreError::ZeroHostCount.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
