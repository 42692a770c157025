//! Error taxonomy shared by every component.
//!
//! The kinds split along the lines the routing layer cares about:
//! `NotMaster`/`PreconditionFailed` are deterministic (the caller routed
//! badly), while `Syncing` and the `*Unavailable` kinds are transient and
//! retriable. Transport failures are wrapped as `Internal`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("ring has no virtual nodes")]
    RingEmpty,

    #[error("partition {0} not found")]
    PartitionNotFound(String),

    #[error("key {0} not found")]
    KeyNotFound(String),

    #[error("operation {0} not found")]
    OperationNotFound(i64),

    #[error("operation {0} is out of bound")]
    OperationOutOfBound(i64),

    #[error("operation {0} conflicts with an existing log entry")]
    OperationConflict(i64),

    #[error("malformed operation: {0}")]
    MalformedOperation(String),

    #[error("partition {0} is not the master on this node")]
    NotMaster(String),

    #[error("partition {0} is the master on this node, refusing replicated operation")]
    NotFollower(String),

    #[error("partition {0} is syncing")]
    Syncing(String),

    #[error("node {0} not found")]
    NodeNotFound(String),

    #[error("a node with address {0} is already registered")]
    NodeExists(String),

    #[error("migration range {0} not found")]
    MigrationRangeNotFound(uuid::Uuid),

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("no healthy master for partition {0}")]
    PartitionUnavailable(String),

    #[error("no healthy replica for partition {0}")]
    ReplicaUnavailable(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, KvError>;

/// Error body used on every wire surface: `{"error": "..."}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl KvError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            KvError::RingEmpty
            | KvError::PartitionNotFound(_)
            | KvError::KeyNotFound(_)
            | KvError::OperationNotFound(_)
            | KvError::OperationOutOfBound(_)
            | KvError::NodeNotFound(_)
            | KvError::MigrationRangeNotFound(_) => StatusCode::NOT_FOUND,

            KvError::MalformedOperation(_)
            | KvError::NotMaster(_)
            | KvError::NotFollower(_)
            | KvError::PreconditionFailed(_)
            | KvError::InvalidArgument(_) => StatusCode::BAD_REQUEST,

            KvError::OperationConflict(_) | KvError::NodeExists(_) => StatusCode::CONFLICT,

            KvError::Syncing(_)
            | KvError::PartitionUnavailable(_)
            | KvError::ReplicaUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,

            KvError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for KvError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}
