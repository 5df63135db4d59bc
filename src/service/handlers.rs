use axum::{Router, body::Bytes, extract::Extension, http::StatusCode, routing::post};
use std::sync::Arc;

use super::protocol::{self, ENDPOINT_RPC, RpcError, RpcRequest, RpcResponse};
use super::service::BurstBufferService;

pub fn router(service: Arc<BurstBufferService>) -> Router {
    Router::new()
        .route(ENDPOINT_RPC, post(handle_rpc))
        .layer(Extension(service))
}

pub async fn handle_rpc(
    Extension(service): Extension<Arc<BurstBufferService>>,
    body: Bytes,
) -> (StatusCode, Vec<u8>) {
    let response: RpcResponse = match protocol::decode::<RpcRequest>(&body) {
        Ok(request) => {
            match tokio::task::spawn_blocking(move || service.dispatch(&request)).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::error!("RPC worker failed: {}", e);
                    return (StatusCode::INTERNAL_SERVER_ERROR, Vec::new());
                }
            }
        }
        Err(e) => {
            tracing::warn!("Failed to decode RPC request: {}", e);
            Err(RpcError::BadArguments(format!("undecodable request: {}", e)))
        }
    };

    if let Err(e) = &response {
        tracing::warn!("RPC rejected: {}", e);
    }

    match protocol::encode(&response) {
        Ok(bytes) => (StatusCode::OK, bytes),
        Err(e) => {
            tracing::error!("Failed to encode RPC response: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, Vec::new())
        }
    }
}
