//! The FHE adapter: the only code that touches the secret handles.
//!
//! Deserialization is bounded, in-line work. Decryption is CPU-bound
//! (tens to hundreds of milliseconds) and runs on the blocking pool,
//! gated by a semaphore sized `2 × executor_width`: up to `width`
//! decryptions execute concurrently (one per pooled context) while up
//! to `width` more wait on a context mutex. Past that, requests fail
//! fast with `Overloaded` instead of queueing unboundedly.
//!
//! Nothing in this module logs ciphertext contents or key bytes, and
//! no error value carries either.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

use vault_fhe::{DecryptContext, ScoreCiphertext};
use vault_keystore::KeyStore;

use crate::error::VaultError;

pub struct FheAdapter {
    store: Arc<KeyStore>,
    contexts: Vec<Arc<Mutex<DecryptContext>>>,
    next: AtomicUsize,
    permits: Arc<Semaphore>,
}

impl FheAdapter {
    pub fn new(store: Arc<KeyStore>, width: usize) -> Self {
        let width = width.max(1);
        Self {
            store,
            contexts: (0..width)
                .map(|_| Arc::new(Mutex::new(DecryptContext::new())))
                .collect(),
            next: AtomicUsize::new(0),
            permits: Arc::new(Semaphore::new(width * 2)),
        }
    }

    /// Parse a score ciphertext and check it against the served key
    /// dimension. Any failure is `InvalidInput`.
    pub fn deserialize_scores(&self, bytes: &[u8]) -> Result<ScoreCiphertext, VaultError> {
        let ciphertext =
            ScoreCiphertext::from_bytes(bytes).map_err(|_| VaultError::InvalidInput)?;
        if ciphertext.dim() != self.store.dim() {
            return Err(VaultError::InvalidInput);
        }
        Ok(ciphertext)
    }

    /// Decrypt every slot on the blocking pool. Slot order is the
    /// ciphertext's natural order.
    pub async fn decrypt_scores(
        &self,
        ciphertext: ScoreCiphertext,
    ) -> Result<Vec<(u32, u32, f32)>, VaultError> {
        let permit = match self.permits.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => return Err(VaultError::Overloaded),
        };
        let store = self.store.clone();
        let slot = self.next.fetch_add(1, Ordering::Relaxed) % self.contexts.len();
        let context = self.contexts[slot].clone();

        let joined = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let mut guard = match context.lock() {
                Ok(guard) => guard,
                // A panicked decrypt must not wedge the context pool.
                Err(poisoned) => poisoned.into_inner(),
            };
            store.secret_handle().decrypt_scores(&mut guard, &ciphertext)
        })
        .await;

        match joined {
            Ok(Ok(scores)) => Ok(scores),
            Ok(Err(_)) => Err(VaultError::InvalidInput),
            Err(join_err) => Err(VaultError::internal("score decryption task failed", join_err)),
        }
    }

    /// Unwrap a batch of metadata blobs. All-or-nothing: the first
    /// failure discards everything already unwrapped, and the caller
    /// sees one `InvalidInput` regardless of whether framing or
    /// authentication rejected the blob.
    pub fn decrypt_metadata(&self, items: &[Vec<u8>]) -> Result<Vec<String>, VaultError> {
        let handle = self.store.metadata_key_handle();
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            match handle.unwrap(item) {
                Ok(plaintext) => out.push(plaintext),
                Err(_) => return Err(VaultError::InvalidInput),
            }
        }
        Ok(out)
    }
}

impl std::fmt::Debug for FheAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FheAdapter {{ contexts: {} }}", self.contexts.len())
    }
}
