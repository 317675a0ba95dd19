//! Binary RPC transport.
//!
//! A thin adapter: decode the request message, call the core operation
//! tagged `Transport::Rpc`, encode the response, map error kinds to
//! statuses. No business logic. Message-size limits are raised to the
//! configured frame cap when the services are assembled in `lib.rs`
//! (`GetPublicKey` responses carry the multi-megabyte evaluation key).
//!
//! Deadlines are the caller's: when a client deadline expires or the
//! caller disconnects, the handler future is dropped and no status is
//! transmitted; the core's drop guard accounts the cancellation.

use std::sync::Arc;
use tonic::{Request, Response, Status};

use vault_core::{ServiceState, Transport, VaultError, VaultService};

use crate::proto::health_server::Health;
use crate::proto::vault_server::Vault;
use crate::proto::{
    health_check_response::ServingStatus, DecryptMetadataRequest, DecryptMetadataResponse,
    DecryptScoresRequest, DecryptScoresResponse, GetPublicKeyRequest, GetPublicKeyResponse,
    HealthCheckRequest, HealthCheckResponse, ScoreEntry,
};

fn status_for(err: VaultError) -> Status {
    let message = err.to_string();
    match err {
        VaultError::Unauthorized => Status::unauthenticated(message),
        VaultError::InvalidInput => Status::invalid_argument(message),
        VaultError::RateLimited => Status::resource_exhausted(message),
        VaultError::Overloaded => Status::unavailable(message),
        VaultError::NotReady => Status::unavailable(message),
        VaultError::Cancelled => Status::deadline_exceeded(message),
        VaultError::Internal { .. } => Status::internal(message),
    }
}

pub struct VaultRpc {
    service: Arc<VaultService>,
}

impl VaultRpc {
    pub fn new(service: Arc<VaultService>) -> Self {
        Self { service }
    }
}

#[tonic::async_trait]
impl Vault for VaultRpc {
    async fn get_public_key(
        &self,
        request: Request<GetPublicKeyRequest>,
    ) -> Result<Response<GetPublicKeyResponse>, Status> {
        let msg = request.into_inner();
        let bundle = self
            .service
            .get_public_key(Transport::Rpc, &msg.token)
            .await
            .map_err(status_for)?;
        Ok(Response::new(GetPublicKeyResponse {
            enc_key: bundle.enc_key,
            eval_key: bundle.eval_key,
            index_name: bundle.index_name,
            dim: bundle.dim,
        }))
    }

    async fn decrypt_scores(
        &self,
        request: Request<DecryptScoresRequest>,
    ) -> Result<Response<DecryptScoresResponse>, Status> {
        let msg = request.into_inner();
        let entries = self
            .service
            .decrypt_scores(Transport::Rpc, &msg.token, &msg.ciphertext, msg.top_k)
            .await
            .map_err(status_for)?;
        Ok(Response::new(DecryptScoresResponse {
            entries: entries
                .into_iter()
                .map(|e| ScoreEntry {
                    shard_idx: e.shard_idx,
                    row_idx: e.row_idx,
                    score: e.score,
                })
                .collect(),
        }))
    }

    async fn decrypt_metadata(
        &self,
        request: Request<DecryptMetadataRequest>,
    ) -> Result<Response<DecryptMetadataResponse>, Status> {
        let msg = request.into_inner();
        let items = self
            .service
            .decrypt_metadata(Transport::Rpc, &msg.token, msg.items)
            .await
            .map_err(status_for)?;
        Ok(Response::new(DecryptMetadataResponse { items }))
    }
}

pub struct HealthService {
    service: Arc<VaultService>,
}

impl HealthService {
    pub fn new(service: Arc<VaultService>) -> Self {
        Self { service }
    }
}

#[tonic::async_trait]
impl Health for HealthService {
    async fn check(
        &self,
        _request: Request<HealthCheckRequest>,
    ) -> Result<Response<HealthCheckResponse>, Status> {
        let status = if self.service.state() == ServiceState::Ready {
            ServingStatus::Serving
        } else {
            ServingStatus::NotServing
        };
        Ok(Response::new(HealthCheckResponse { status: status as i32 }))
    }
}
