//! The vault's business core: three operations behind one
//! authorization, resource and accounting pipeline.
//!
//! Transports stay thin: they decode, call one of the three public
//! operations with their transport tag, and encode. Everything
//! request-shaped happens here, identically for both transports: state
//! gate, token check, rate limit, deadline, metrics and the one
//! structured log record per request.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use vault_keystore::KeyStore;

use crate::adapter::FheAdapter;
use crate::auth::{token_digest, Authorizer};
use crate::config::{Config, ConfigError};
use crate::error::VaultError;
use crate::metrics::Metrics;
use crate::ratelimit::RateLimiter;
use crate::topk::{select_top_k, ScoreEntry};

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// Process-wide lifecycle: INITIALIZING → READY → STOPPING → STOPPED.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceState {
    Initializing,
    Ready,
    Stopping,
    Stopped,
}

impl ServiceState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Ready,
            2 => Self::Stopping,
            3 => Self::Stopped,
            _ => Self::Initializing,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Initializing => 0,
            Self::Ready => 1,
            Self::Stopping => 2,
            Self::Stopped => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        }
    }
}

/// Which surface a request arrived on. Used only for metrics and log
/// tagging; semantics are identical across transports.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transport {
    Rpc,
    Tool,
}

impl Transport {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rpc => "rpc",
            Self::Tool => "tool",
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum Op {
    GetPublicKey,
    DecryptScores,
    DecryptMetadata,
}

impl Op {
    fn as_str(self) -> &'static str {
        match self {
            Self::GetPublicKey => "get_public_key",
            Self::DecryptScores => "decrypt_scores",
            Self::DecryptMetadata => "decrypt_metadata",
        }
    }
}

// ---------------------------------------------------------------------------
// Response data
// ---------------------------------------------------------------------------

/// Owned copy of the public bundle as served to workers. The metadata
/// key is deliberately absent: it decrypts on the vault side only.
#[derive(Clone, Debug)]
pub struct PublicKeyBundle {
    pub enc_key: Vec<u8>,
    pub eval_key: Vec<u8>,
    pub index_name: Option<String>,
    pub dim: u32,
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct ReadyParts {
    store: Arc<KeyStore>,
    adapter: FheAdapter,
}

#[derive(Debug)]
pub struct VaultService {
    authorizer: Authorizer,
    limiter: RateLimiter,
    metrics: Arc<Metrics>,
    k_max: u32,
    m_max: u32,
    deadline: Duration,
    executor_width: usize,
    state: AtomicU8,
    inflight: AtomicU64,
    ready: OnceLock<ReadyParts>,
}

impl VaultService {
    pub fn new(config: &Config, metrics: Arc<Metrics>) -> Result<Self, ConfigError> {
        Ok(Self {
            authorizer: Authorizer::new(&config.tokens)?,
            limiter: RateLimiter::new(config.rate_limit_rps, config.rate_limit_burst),
            metrics,
            k_max: config.k_max,
            m_max: config.m_max(),
            deadline: config.deadline(),
            executor_width: config.executor_width,
            state: AtomicU8::new(ServiceState::Initializing.as_u8()),
            inflight: AtomicU64::new(0),
            ready: OnceLock::new(),
        })
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    pub fn state(&self) -> ServiceState {
        ServiceState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn transition(&self, to: ServiceState) {
        let from = self.state();
        self.state.store(to.as_u8(), Ordering::SeqCst);
        tracing::info!(from = from.as_str(), to = to.as_str(), "state transition");
    }

    /// Install the loaded key material. Call once, before
    /// [`Self::mark_ready`].
    pub fn install_keys(&self, store: Arc<KeyStore>) -> Result<(), VaultError> {
        let adapter = FheAdapter::new(store.clone(), self.executor_width);
        self.ready
            .set(ReadyParts { store, adapter })
            .map_err(|_| VaultError::internal("install_keys", "key bundle installed twice"))
    }

    /// Decrypt a freshly encrypted reference vector through the full
    /// adapter path. The READY transition is gated on this passing.
    pub async fn self_test(&self) -> Result<(), VaultError> {
        let parts = self.ready_parts()?;
        let reference = [(0u32, 0u32, 0.25f32), (0, 1, -0.5), (1, 0, 0.875)];
        let ciphertext = vault_fhe::encrypt_scores(parts.store.encryption_key(), &reference);
        let decrypted = parts.adapter.decrypt_scores(ciphertext).await?;
        if decrypted.len() != reference.len() {
            return Err(VaultError::internal("self-test", "slot count mismatch"));
        }
        for ((shard, row, want), (got_shard, got_row, got)) in reference.iter().zip(&decrypted) {
            if shard != got_shard || row != got_row || (want - got).abs() > 1e-3 {
                return Err(VaultError::internal("self-test", "decrypted values diverge"));
            }
        }
        tracing::info!("self-test decrypt verified");
        Ok(())
    }

    /// Flip to READY. Keys must be installed and self-tested first.
    pub fn mark_ready(&self) {
        self.metrics.set_keys_loaded(true);
        self.transition(ServiceState::Ready);
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn inflight(&self) -> u64 {
        self.inflight.load(Ordering::SeqCst)
    }

    /// Wait for in-flight requests to finish, up to `grace`.
    pub async fn drain(&self, grace: Duration) {
        let deadline = Instant::now() + grace;
        while self.inflight() > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Periodic bucket cleanup; the server spawns this.
    pub async fn sweep_rate_limiter(&self) {
        self.limiter.sweep().await;
    }

    fn ready_parts(&self) -> Result<&ReadyParts, VaultError> {
        self.ready.get().ok_or(VaultError::NotReady)
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    pub async fn get_public_key(
        &self,
        transport: Transport,
        token: &str,
    ) -> Result<PublicKeyBundle, VaultError> {
        self.run(Op::GetPublicKey, transport, token, async {
            let parts = self.ready_parts()?;
            let bundle = parts.store.public_bundle();
            Ok(PublicKeyBundle {
                enc_key: bundle.enc_key.to_vec(),
                eval_key: bundle.eval_key.to_vec(),
                index_name: bundle.info.index_name.clone(),
                dim: bundle.info.dim,
            })
        })
        .await
    }

    pub async fn decrypt_scores(
        &self,
        transport: Transport,
        token: &str,
        ciphertext: &[u8],
        top_k: u32,
    ) -> Result<Vec<ScoreEntry>, VaultError> {
        self.run(Op::DecryptScores, transport, token, async {
            let parts = self.ready_parts()?;
            let k = if top_k > self.k_max {
                self.metrics.record_clamp();
                self.k_max
            } else {
                top_k
            };
            let parsed = parts.adapter.deserialize_scores(ciphertext)?;
            let decrypted = parts.adapter.decrypt_scores(parsed).await?;
            Ok(select_top_k(decrypted, k as usize))
        })
        .await
    }

    pub async fn decrypt_metadata(
        &self,
        transport: Transport,
        token: &str,
        items: Vec<Vec<u8>>,
    ) -> Result<Vec<String>, VaultError> {
        self.run(Op::DecryptMetadata, transport, token, async {
            let parts = self.ready_parts()?;
            if items.len() > self.m_max as usize {
                return Err(VaultError::InvalidInput);
            }
            parts.adapter.decrypt_metadata(&items)
        })
        .await
    }

    // -----------------------------------------------------------------------
    // Shared request pipeline
    // -----------------------------------------------------------------------

    async fn run<T, F>(
        &self,
        op: Op,
        transport: Transport,
        token: &str,
        work: F,
    ) -> Result<T, VaultError>
    where
        F: std::future::Future<Output = Result<T, VaultError>>,
    {
        let mut guard = OpGuard::new(self, op, transport);
        let result = async {
            if self.state() != ServiceState::Ready {
                return Err(VaultError::NotReady);
            }
            self.authorizer.check(token)?;
            if !self.limiter.check(token_digest(token)).await {
                return Err(VaultError::RateLimited);
            }
            match transport {
                // An HTTP exchange has to be answered, so the deadline
                // is enforced here and surfaces as a timeout body.
                Transport::Tool => match tokio::time::timeout(self.deadline, work).await {
                    Ok(result) => result,
                    Err(_) => Err(VaultError::Cancelled),
                },
                // The RPC layer propagates client deadlines natively:
                // at expiry (or disconnect) this future is dropped,
                // any running decrypt finishes unobserved, and the
                // guard records the cancellation. No status is
                // fabricated server-side.
                Transport::Rpc => work.await,
            }
        }
        .await;
        guard.complete(&result);
        result
    }
}

// ---------------------------------------------------------------------------
// Per-request accounting
// ---------------------------------------------------------------------------

/// Emits exactly one counter increment, one histogram sample and one
/// structured log record per request. If the request future is dropped
/// before completing (caller went away), Drop records `cancelled`.
struct OpGuard<'a> {
    service: &'a VaultService,
    op: Op,
    transport: Transport,
    request_id: String,
    started: Instant,
    done: bool,
}

impl<'a> OpGuard<'a> {
    fn new(service: &'a VaultService, op: Op, transport: Transport) -> Self {
        service.inflight.fetch_add(1, Ordering::SeqCst);
        let mut raw = [0u8; 8];
        let _ = getrandom::getrandom(&mut raw);
        Self {
            service,
            op,
            transport,
            request_id: hex::encode(raw),
            started: Instant::now(),
            done: false,
        }
    }

    fn complete<T>(&mut self, result: &Result<T, VaultError>) {
        let status = match result {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        self.record(status);
    }

    fn record(&mut self, status: &'static str) {
        if self.done {
            return;
        }
        self.done = true;
        let seconds = self.started.elapsed().as_secs_f64();
        self.service.metrics.observe_request(
            self.op.as_str(),
            self.transport.as_str(),
            status,
            seconds,
        );
        tracing::info!(
            op = self.op.as_str(),
            transport = self.transport.as_str(),
            status,
            duration_ms = seconds * 1000.0,
            correlation_id = %self.request_id,
            "request"
        );
        self.service.inflight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Drop for OpGuard<'_> {
    fn drop(&mut self) {
        self.record("cancelled");
    }
}
