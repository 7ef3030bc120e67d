use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    routing::{get, post},
};
use serde::{Serialize, de::DeserializeOwned};
use std::sync::Arc;

use super::protocol::{
    CompareExchangeRequest, ENDPOINT_COMPARE_EXCHANGE, ENDPOINT_LOAD, ENDPOINT_READ,
    ENDPOINT_SHARD_INFO, ENDPOINT_WRITE, ReadResponse, ShardInfoResponse, WordResponse,
    WriteRequest, WriteResponse,
};
use super::shard::Shard;

/// The local shard as seen by the HTTP layer.
pub struct ShardService<R> {
    pub rank: u32,
    pub shard: Arc<Shard<R>>,
}

/// Routes servicing the fabric primitives against `service`'s shard.
pub fn shard_router<R>(service: Arc<ShardService<R>>) -> Router
where
    R: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    Router::new()
        .route(ENDPOINT_COMPARE_EXCHANGE, post(handle_compare_exchange::<R>))
        .route(&format!("{}/:offset", ENDPOINT_LOAD), get(handle_load::<R>))
        .route(&format!("{}/:offset", ENDPOINT_READ), get(handle_read::<R>))
        .route(ENDPOINT_WRITE, post(handle_write::<R>))
        .route(ENDPOINT_SHARD_INFO, get(handle_shard_info::<R>))
        .layer(Extension(service))
}

pub async fn handle_compare_exchange<R>(
    Extension(service): Extension<Arc<ShardService<R>>>,
    Json(req): Json<CompareExchangeRequest>,
) -> (StatusCode, Json<Option<WordResponse>>)
where
    R: Send + Sync + 'static,
{
    match service.shard.compare_exchange(req.offset, req.current, req.new) {
        Ok(value) => {
            tracing::trace!(
                "CAS at offset {}: {} -> {} observed {}",
                req.offset,
                req.current,
                req.new,
                value
            );
            (StatusCode::OK, Json(Some(WordResponse { value })))
        }
        Err(e) => {
            tracing::error!("Rejected compare_exchange: {}", e);
            (StatusCode::BAD_REQUEST, Json(None))
        }
    }
}

pub async fn handle_load<R>(
    Extension(service): Extension<Arc<ShardService<R>>>,
    Path(offset): Path<u64>,
) -> (StatusCode, Json<Option<WordResponse>>)
where
    R: Send + Sync + 'static,
{
    match service.shard.load(offset) {
        Ok(value) => (StatusCode::OK, Json(Some(WordResponse { value }))),
        Err(e) => {
            tracing::error!("Rejected load: {}", e);
            (StatusCode::BAD_REQUEST, Json(None))
        }
    }
}

pub async fn handle_read<R>(
    Extension(service): Extension<Arc<ShardService<R>>>,
    Path(offset): Path<u64>,
) -> (StatusCode, Json<ReadResponse>)
where
    R: Clone + Serialize + Send + Sync + 'static,
{
    let record = match service.shard.read(offset) {
        Ok(record) => record,
        Err(e) => {
            tracing::error!("Rejected read: {}", e);
            return (
                StatusCode::BAD_REQUEST,
                Json(ReadResponse { record_json: None }),
            );
        }
    };

    match record.map(|r| serde_json::to_string(&r)).transpose() {
        Ok(record_json) => (StatusCode::OK, Json(ReadResponse { record_json })),
        Err(e) => {
            tracing::error!("Failed to serialize record at offset {}: {}", offset, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ReadResponse { record_json: None }),
            )
        }
    }
}

pub async fn handle_write<R>(
    Extension(service): Extension<Arc<ShardService<R>>>,
    Json(req): Json<WriteRequest>,
) -> (StatusCode, Json<WriteResponse>)
where
    R: DeserializeOwned + Send + Sync + 'static,
{
    if req.offset >= service.shard.len() {
        tracing::error!(
            "Write to offset {} outside of shard of {} slots",
            req.offset,
            service.shard.len()
        );
        return (
            StatusCode::BAD_REQUEST,
            Json(WriteResponse { success: false }),
        );
    }

    let record: R = match serde_json::from_str(&req.record_json) {
        Ok(r) => r,
        Err(e) => {
            tracing::error!("Failed to deserialize record: {}", e);
            return (
                StatusCode::BAD_REQUEST,
                Json(WriteResponse { success: false }),
            );
        }
    };

    match service.shard.write(req.offset, record) {
        Ok(()) => (StatusCode::OK, Json(WriteResponse { success: true })),
        Err(e) => {
            tracing::error!("Ownership violation on rank {}: {}", service.rank, e);
            (StatusCode::CONFLICT, Json(WriteResponse { success: false }))
        }
    }
}

pub async fn handle_shard_info<R>(
    Extension(service): Extension<Arc<ShardService<R>>>,
) -> (StatusCode, Json<ShardInfoResponse>)
where
    R: Send + Sync + 'static,
{
    (
        StatusCode::OK,
        Json(ShardInfoResponse {
            rank: service.rank,
            len: service.shard.len(),
            occupied: service.shard.occupied(),
        }),
    )
}
