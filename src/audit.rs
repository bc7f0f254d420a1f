//! C9 — Audit Record Builder.
//!
//! A single digest computed over canonicalized records, then claims, rather
//! than a per-entry hash chain. Ed25519 signs the digest; the digest
//! algorithm is a runtime choice between a hand-rolled `fnv1a32` (cheap,
//! synchronous) and `sha256` (via `sha2`, verified off the async executor
//! through `spawn_blocking`).

use crate::config::DigestAlgo;
use crate::types::error::AuditError;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest as Sha2Digest, Sha256};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Artifact schema version (§6). Bumped when the persisted shape changes
/// in a way that isn't backward-readable by `verify`.
pub const ARTIFACT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: String,
    pub success: bool,
    pub value: serde_json::Value,
    pub error: Option<String>,
}

impl AuditRecord {
    fn canonical(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.id,
            self.success,
            self.value,
            self.error.as_deref().unwrap_or("")
        )
    }
}

pub const REQUIRED_CLAIM_TOTAL_TASKS: &str = "core.totalTasks";

/// An open, not-yet-finalized audit session.
pub struct AuditSession {
    seed: String,
    execution_hash: String,
    records: Vec<AuditRecord>,
    claims: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditArtifact {
    pub id: Uuid,
    pub version: u32,
    pub seed: String,
    pub execution_hash: String,
    pub claims: BTreeMap<String, serde_json::Value>,
    pub digest_algo: DigestAlgo,
    pub digest: String,
    pub timestamp: DateTime<Utc>,
    pub records: Vec<AuditRecord>,
    pub signature: Option<String>,
    pub signer_id: Option<String>,
}

impl AuditSession {
    pub fn open(seed: impl Into<String>, execution_hash: impl Into<String>, records: Vec<AuditRecord>) -> Self {
        Self {
            seed: seed.into(),
            execution_hash: execution_hash.into(),
            records,
            claims: BTreeMap::new(),
        }
    }

    /// Claim keys are namespaced (`core.*`, caller-defined prefixes for the rest).
    pub fn add_claim(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.claims.insert(key.into(), value);
    }

    fn digest_input(&self) -> String {
        let records_part = self
            .records
            .iter()
            .map(|r| r.canonical())
            .collect::<Vec<_>>()
            .join("\n");
        let claims_part = serde_json::to_string(&self.claims).unwrap_or_default();
        format!("{records_part}\n--claims--\n{claims_part}")
    }

    pub fn finalize(
        self,
        digest_algo: DigestAlgo,
        signer: Option<&Ed25519Signer>,
    ) -> Result<AuditArtifact, AuditError> {
        if !self.claims.contains_key(REQUIRED_CLAIM_TOTAL_TASKS) {
            return Err(AuditError::MissingClaim(REQUIRED_CLAIM_TOTAL_TASKS.to_string()));
        }
        let input = self.digest_input();
        let digest = compute_digest(&input, digest_algo);
        let (signer_id, signature) = match signer {
            Some(s) => (Some(s.id.clone()), Some(s.sign(&digest))),
            None => (None, None),
        };
        Ok(AuditArtifact {
            id: Uuid::new_v4(),
            version: ARTIFACT_VERSION,
            seed: self.seed,
            execution_hash: self.execution_hash,
            records: self.records,
            claims: self.claims,
            digest_algo,
            digest,
            timestamp: Utc::now(),
            signer_id,
            signature,
        })
    }
}

fn compute_digest(input: &str, algo: DigestAlgo) -> String {
    match algo {
        DigestAlgo::Fnv1a32 => format!("{:08x}", fnv1a32(input.as_bytes())),
        DigestAlgo::Sha256 => {
            let mut hasher = Sha256::new();
            hasher.update(input.as_bytes());
            hex::encode(hasher.finalize())
        }
    }
}

fn fnv1a32(bytes: &[u8]) -> u32 {
    const OFFSET_BASIS: u32 = 0x811c9dc5;
    const PRIME: u32 = 0x01000193;
    let mut hash = OFFSET_BASIS;
    for &b in bytes {
        hash ^= b as u32;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// Reference Ed25519 signer for audit digests.
pub struct Ed25519Signer {
    id: String,
    key: SigningKey,
}

impl Ed25519Signer {
    pub fn new(id: impl Into<String>, key: SigningKey) -> Self {
        Self { id: id.into(), key }
    }

    pub fn generate(id: impl Into<String>) -> Self {
        let mut rng = rand::rngs::OsRng;
        Self {
            id: id.into(),
            key: SigningKey::generate(&mut rng),
        }
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }

    fn sign(&self, digest: &str) -> String {
        let signature: Signature = self.key.sign(digest.as_bytes());
        hex::encode(signature.to_bytes())
    }
}

/// Recompute the digest and, optionally, verify the signature. `sha256`
/// verification is pushed onto `spawn_blocking` to keep the digest
/// recomputation off the async executor; `fnv1a32` is cheap enough to stay
/// synchronous (`verify_blocking` is the matching convenience wrapper).
pub async fn verify(
    artifact: &AuditArtifact,
    verifying_key: Option<&VerifyingKey>,
) -> Result<(), AuditError> {
    match artifact.digest_algo {
        DigestAlgo::Fnv1a32 => verify_blocking(artifact, verifying_key),
        DigestAlgo::Sha256 => {
            let artifact = artifact.clone();
            let key = verifying_key.copied();
            tokio::task::spawn_blocking(move || verify_blocking(&artifact, key.as_ref()))
                .await
                .map_err(|_| AuditError::SignatureInvalid)?
        }
    }
}

pub fn verify_blocking(
    artifact: &AuditArtifact,
    verifying_key: Option<&VerifyingKey>,
) -> Result<(), AuditError> {
    if !artifact.claims.contains_key(REQUIRED_CLAIM_TOTAL_TASKS) {
        return Err(AuditError::MissingClaim(REQUIRED_CLAIM_TOTAL_TASKS.to_string()));
    }

    let records_part = artifact
        .records
        .iter()
        .map(|r| r.canonical())
        .collect::<Vec<_>>()
        .join("\n");
    let claims_part = serde_json::to_string(&artifact.claims).unwrap_or_default();
    let input = format!("{records_part}\n--claims--\n{claims_part}");
    let recomputed = compute_digest(&input, artifact.digest_algo);

    if recomputed != artifact.digest {
        return Err(AuditError::DigestMismatch);
    }

    if let (Some(key), Some(signature_hex)) = (verifying_key, &artifact.signature) {
        let bytes = hex::decode(signature_hex).map_err(|_| AuditError::SignatureInvalid)?;
        let signature = Signature::from_slice(&bytes).map_err(|_| AuditError::SignatureInvalid)?;
        key.verify(artifact.digest.as_bytes(), &signature)
            .map_err(|_| AuditError::SignatureInvalid)?;
    }

    Ok(())
}
