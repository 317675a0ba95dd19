//! LWE score encryption.
//!
//! Regev-style encryption over `Z_{2^64}` (wrapping `u64` arithmetic).
//! A score is encoded as a fixed-point integer at scale `2^40` and
//! hidden behind an LWE sample; encryption under the public key adds a
//! random subset of the key's encryptions of zero. Decryption recovers
//! the score to within the accumulated noise, orders of magnitude
//! below the `1e-3` tolerance the service guarantees.
//!
//! The evaluation key is digit-decomposed key-switching material: an
//! encryption of `s_i * 2^(16*d)` for every coefficient `i` and digit
//! `d`. The vault never evaluates with it; it only generates, stores
//! and distributes it to workers, which is why its size (tens of
//! megabytes at dimension 1024) drives the transport frame limits.

use rand_core::{OsRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{DecodeError, KeyGenError};
use crate::wire::{self, Reader};

/// Fixed-point scale: scores are encoded as multiples of `2^-40`.
pub const SCALE_BITS: u32 = 40;

/// Noise magnitude: fresh samples carry uniform noise in `[-2^10, 2^10)`.
pub const NOISE_BITS: u32 = 10;

/// Number of encryptions of zero in the public encryption key.
pub const ENC_SAMPLES: usize = 128;

/// Key-switch digit decomposition: 4 digits of 16 bits.
pub const KS_BASE_LOG: u32 = 16;
pub const KS_DIGITS: u32 = 4;

const SCALE: f64 = (1u64 << SCALE_BITS) as f64;

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

fn encode_score(score: f32) -> u64 {
    ((score as f64) * SCALE).round() as i64 as u64
}

fn decode_score(phase: u64) -> f32 {
    ((phase as i64) as f64 / SCALE) as f32
}

fn noise(rng: &mut OsRng) -> u64 {
    let span = 1u64 << (NOISE_BITS + 1);
    let e = (rng.next_u64() % span) as i64 - (1i64 << NOISE_BITS);
    e as u64
}

/// Draw `n` uniform words in one bulk fill; per-word `next_u64` is a
/// syscall each and key generation needs millions of words at the
/// production dimension.
fn random_u64s(rng: &mut OsRng, n: usize) -> Vec<u64> {
    let mut bytes = vec![0u8; n * 8];
    rng.fill_bytes(&mut bytes);
    let mut out = Vec::with_capacity(n);
    for chunk in bytes.chunks_exact(8) {
        let mut word = [0u8; 8];
        word.copy_from_slice(chunk);
        out.push(u64::from_be_bytes(word));
    }
    bytes.zeroize();
    out
}

// ---------------------------------------------------------------------------
// LWE sample
// ---------------------------------------------------------------------------

/// One sample `(a, b)` with `b = <a, s> + e + value`.
#[derive(Clone)]
pub(crate) struct LweRow {
    pub a: Vec<u64>,
    pub b: u64,
}

fn dot(a: &[u64], s: &[u64]) -> u64 {
    a.iter()
        .zip(s)
        .fold(0u64, |acc, (ai, si)| acc.wrapping_add(ai.wrapping_mul(*si)))
}

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// The decryption key. Not cloneable, no serde impls; the only byte
/// escape hatch is [`SecretKey::to_bytes`], which the key store uses
/// for at-rest persistence and nothing else calls.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SecretKey {
    dim: u32,
    s: Vec<u64>,
}

impl core::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "SecretKey {{ dim: {}, .. }}", self.dim)
    }
}

impl SecretKey {
    pub fn dim(&self) -> u32 {
        self.dim
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let n = self.dim as usize;
        let mut out = Vec::with_capacity(wire::HEADER_BYTES + n * 8);
        wire::encode_header(&mut out, wire::KIND_SECRET_KEY, self.dim);
        for v in &self.s {
            wire::put_u64(&mut out, *v);
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(bytes);
        let dim = r.header(wire::KIND_SECRET_KEY)?;
        let n = dim as usize;
        if r.remaining() != n * 8 {
            return Err(DecodeError);
        }
        let mut s = Vec::with_capacity(n);
        for _ in 0..n {
            s.push(r.take_u64()?);
        }
        r.finish()?;
        Ok(Self { dim, s })
    }
}

/// Public encryption key: `ENC_SAMPLES` encryptions of zero.
#[derive(Clone)]
pub struct EncryptionKey {
    dim: u32,
    rows: Vec<LweRow>,
}

impl core::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "EncryptionKey {{ dim: {} }}", self.dim)
    }
}

impl EncryptionKey {
    pub fn dim(&self) -> u32 {
        self.dim
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let n = self.dim as usize;
        let mut out =
            Vec::with_capacity(wire::HEADER_BYTES + 4 + self.rows.len() * (8 + n * 8));
        wire::encode_header(&mut out, wire::KIND_ENCRYPTION_KEY, self.dim);
        wire::put_u32(&mut out, self.rows.len() as u32);
        for row in &self.rows {
            wire::put_u64(&mut out, row.b);
            for v in &row.a {
                wire::put_u64(&mut out, *v);
            }
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(bytes);
        let dim = r.header(wire::KIND_ENCRYPTION_KEY)?;
        let count = r.take_u32()? as usize;
        let rows = read_rows(&mut r, dim, count)?;
        r.finish()?;
        Ok(Self { dim, rows })
    }
}

/// Evaluation (key-switching) key. Opaque to the vault: generated,
/// persisted and served, never used locally.
#[derive(Clone)]
pub struct EvaluationKey {
    dim: u32,
    digits: u32,
    base_log: u32,
    rows: Vec<LweRow>,
}

impl core::fmt::Debug for EvaluationKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "EvaluationKey {{ dim: {} }}", self.dim)
    }
}

impl EvaluationKey {
    pub fn dim(&self) -> u32 {
        self.dim
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let n = self.dim as usize;
        let mut out =
            Vec::with_capacity(wire::HEADER_BYTES + 12 + self.rows.len() * (8 + n * 8));
        wire::encode_header(&mut out, wire::KIND_EVALUATION_KEY, self.dim);
        wire::put_u32(&mut out, self.digits);
        wire::put_u32(&mut out, self.base_log);
        wire::put_u32(&mut out, self.rows.len() as u32);
        for row in &self.rows {
            wire::put_u64(&mut out, row.b);
            for v in &row.a {
                wire::put_u64(&mut out, *v);
            }
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(bytes);
        let dim = r.header(wire::KIND_EVALUATION_KEY)?;
        let digits = r.take_u32()?;
        let base_log = r.take_u32()?;
        if digits == 0 || digits > 8 || base_log == 0 || base_log > 32 {
            return Err(DecodeError);
        }
        let count = r.take_u32()? as usize;
        if count != dim as usize * digits as usize {
            return Err(DecodeError);
        }
        let rows = read_rows(&mut r, dim, count)?;
        r.finish()?;
        Ok(Self { dim, digits, base_log, rows })
    }
}

fn read_rows(r: &mut Reader<'_>, dim: u32, count: usize) -> Result<Vec<LweRow>, DecodeError> {
    let n = dim as usize;
    let row_bytes = 8 + n * 8;
    let expected = count.checked_mul(row_bytes).ok_or(DecodeError)?;
    if r.remaining() != expected {
        return Err(DecodeError);
    }
    let mut rows = Vec::with_capacity(count);
    for _ in 0..count {
        let b = r.take_u64()?;
        let mut a = Vec::with_capacity(n);
        for _ in 0..n {
            a.push(r.take_u64()?);
        }
        rows.push(LweRow { a, b });
    }
    Ok(rows)
}

/// Output of key generation.
pub struct KeySet {
    pub encryption: EncryptionKey,
    pub evaluation: EvaluationKey,
    pub secret: SecretKey,
}

/// Generate a fresh key set at the given lattice dimension. Entropy
/// comes from the OS pool via `OsRng`.
pub fn generate(dim: u32) -> Result<KeySet, KeyGenError> {
    if dim == 0 || dim > wire::MAX_DIM {
        return Err(KeyGenError::InvalidDimension);
    }
    let mut rng = OsRng;
    let n = dim as usize;
    let s = random_u64s(&mut rng, n);

    let sample = |rng: &mut OsRng, value: u64| -> LweRow {
        let a = random_u64s(rng, n);
        let b = dot(&a, &s).wrapping_add(noise(rng)).wrapping_add(value);
        LweRow { a, b }
    };

    let enc_rows: Vec<LweRow> = (0..ENC_SAMPLES).map(|_| sample(&mut rng, 0)).collect();

    let mut ks_rows = Vec::with_capacity(n * KS_DIGITS as usize);
    for si in &s {
        for d in 0..KS_DIGITS {
            ks_rows.push(sample(&mut rng, si << (d * KS_BASE_LOG)));
        }
    }

    Ok(KeySet {
        encryption: EncryptionKey { dim, rows: enc_rows },
        evaluation: EvaluationKey {
            dim,
            digits: KS_DIGITS,
            base_log: KS_BASE_LOG,
            rows: ks_rows,
        },
        secret: SecretKey { dim, s },
    })
}

// ---------------------------------------------------------------------------
// Score ciphertext
// ---------------------------------------------------------------------------

/// One encrypted score, addressed by its shard/row coordinates.
#[derive(Clone)]
pub(crate) struct ScoreSlot {
    pub shard_idx: u32,
    pub row_idx: u32,
    pub row: LweRow,
}

/// A deserialized vector of encrypted scores. Slot order is the order
/// the producer emitted; nothing here is sorted.
#[derive(Clone)]
pub struct ScoreCiphertext {
    dim: u32,
    slots: Vec<ScoreSlot>,
}

impl core::fmt::Debug for ScoreCiphertext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "ScoreCiphertext {{ dim: {}, slots: {} }}", self.dim, self.slots.len())
    }
}

impl ScoreCiphertext {
    pub fn dim(&self) -> u32 {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let n = self.dim as usize;
        let mut out =
            Vec::with_capacity(wire::HEADER_BYTES + 4 + self.slots.len() * (16 + n * 8));
        wire::encode_header(&mut out, wire::KIND_SCORES, self.dim);
        wire::put_u32(&mut out, self.slots.len() as u32);
        for slot in &self.slots {
            wire::put_u32(&mut out, slot.shard_idx);
            wire::put_u32(&mut out, slot.row_idx);
            wire::put_u64(&mut out, slot.row.b);
            for v in &slot.row.a {
                wire::put_u64(&mut out, *v);
            }
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(bytes);
        let dim = r.header(wire::KIND_SCORES)?;
        let n = dim as usize;
        let count = r.take_u32()? as usize;
        let slot_bytes = 16 + n * 8;
        let expected = count.checked_mul(slot_bytes).ok_or(DecodeError)?;
        if r.remaining() != expected {
            return Err(DecodeError);
        }
        let mut slots = Vec::with_capacity(count);
        for _ in 0..count {
            let shard_idx = r.take_u32()?;
            let row_idx = r.take_u32()?;
            let b = r.take_u64()?;
            let mut a = Vec::with_capacity(n);
            for _ in 0..n {
                a.push(r.take_u64()?);
            }
            slots.push(ScoreSlot { shard_idx, row_idx, row: LweRow { a, b } });
        }
        r.finish()?;
        Ok(Self { dim, slots })
    }
}

/// Encrypt `(shard_idx, row_idx, score)` entries under the public key.
/// Producer-side helper: workers and tests use it; the vault itself
/// only decrypts.
pub fn encrypt_scores(key: &EncryptionKey, entries: &[(u32, u32, f32)]) -> ScoreCiphertext {
    let mut rng = OsRng;
    let n = key.dim as usize;
    let mut slots = Vec::with_capacity(entries.len());
    for &(shard_idx, row_idx, score) in entries {
        let mut a = vec![0u64; n];
        let mut b = noise(&mut rng);
        let sel = [rng.next_u64(), rng.next_u64()];
        for (i, row) in key.rows.iter().enumerate() {
            if (sel[i / 64] >> (i % 64)) & 1 == 1 {
                for (aj, rj) in a.iter_mut().zip(&row.a) {
                    *aj = aj.wrapping_add(*rj);
                }
                b = b.wrapping_add(row.b);
            }
        }
        b = b.wrapping_add(encode_score(score));
        slots.push(ScoreSlot { shard_idx, row_idx, row: LweRow { a, b } });
    }
    ScoreCiphertext { dim: key.dim, slots }
}

// ---------------------------------------------------------------------------
// Decryption context
// ---------------------------------------------------------------------------

/// Reusable decryption state. The scratch buffer holds per-slot phases
/// (values correlated with the secret key's noise) and is zeroized
/// after every call; callers serialize access to one context at a time.
pub struct DecryptContext {
    scratch: Vec<u64>,
}

impl DecryptContext {
    pub fn new() -> Self {
        Self { scratch: Vec::new() }
    }

    /// Decrypt every slot, returning `(shard_idx, row_idx, score)` in
    /// the ciphertext's natural order.
    pub fn decrypt(
        &mut self,
        secret: &SecretKey,
        ciphertext: &ScoreCiphertext,
    ) -> Result<Vec<(u32, u32, f32)>, DecodeError> {
        if ciphertext.dim != secret.dim {
            return Err(DecodeError);
        }
        self.scratch.clear();
        for slot in &ciphertext.slots {
            let phase = slot.row.b.wrapping_sub(dot(&slot.row.a, &secret.s));
            self.scratch.push(phase);
        }
        let out = ciphertext
            .slots
            .iter()
            .zip(&self.scratch)
            .map(|(slot, phase)| (slot.shard_idx, slot.row_idx, decode_score(*phase)))
            .collect();
        self.scratch.zeroize();
        Ok(out)
    }
}

impl Default for DecryptContext {
    fn default() -> Self {
        Self::new()
    }
}
