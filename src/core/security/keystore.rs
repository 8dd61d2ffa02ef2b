// Copyright (c) 2026 Phinet Contributors
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Secret-key storage with rate limiting and an audit trail.
//!
//! ## Production hardening
//! - **Atomic writes** for private key material.
//! - **Key-at-rest encryption** (optional) via `PHINET_KEY_PASSPHRASE`.
//! - **Audit log rotation** (best-effort).
//! - **Best-effort zeroization** of sensitive buffers.
//!
//! ### Key encryption format
//! If `PHINET_KEY_PASSPHRASE` is set, `validator.key` is stored as:
//! `MAGIC(8) || SALT(16) || NONCE(12) || CIPHERTEXT+TAG(..)`
//! where the ciphertext is AES-256-GCM over the Ed25519 PKCS#8 bytes.

use crate::core::crypto::{CryptoError, Keypair};
use crate::core::types::{PublicKey, Signature};
use ring::{
    aead,
    pbkdf2,
    rand::{SecureRandom, SystemRandom},
};
use std::{
    fs,
    io::Write,
    num::NonZeroU32,
    path::{Path, PathBuf},
    sync::Mutex,
    time::{Duration, Instant},
};
use thiserror::Error;
use zeroize::Zeroize;

/// Errors from signing, loading, or persisting secret key material.
#[derive(Debug, Error)]
pub enum SecretStoreError {
    /// Filesystem operation failed.
    #[error("io")]
    Io,
    /// Stored key bytes did not decode to a valid Ed25519 keypair.
    #[error("invalid key encoding")]
    InvalidKey,
    /// Key file is encrypted but no passphrase was supplied.
    #[error("missing passphrase (set PHINET_KEY_PASSPHRASE)")]
    MissingPassphrase,
    /// AEAD encryption/decryption failed.
    #[error("crypto")]
    Crypto,
    /// Caller exceeded the local sign-rate limit.
    #[error("rate limited")]
    RateLimited,
}

impl From<CryptoError> for SecretStoreError {
    fn from(_: CryptoError) -> Self {
        SecretStoreError::InvalidKey
    }
}

/// An external key store: something that can report a public identity and
/// sign on its behalf, without exposing the secret key material itself.
/// The core consensus/networking code depends only on this trait, never on
/// a concrete backend, matching the data model's "secret key persisted
/// separately by an external key store" boundary.
pub trait SecretStore: Send + Sync {
    /// The public identity this store signs for.
    fn public_key(&self) -> PublicKey;
    /// Sign `msg`, subject to the store's own rate limiting.
    fn sign(&self, msg: &[u8]) -> Result<Signature, SecretStoreError>;
    /// Reconstruct an independent `Keypair` handle, for callers (namely
    /// `NetworkNode::start`) that need to hand a concrete signing key to an
    /// in-process component such as `ConsensusEngine` rather than routing
    /// every signature through `sign`.
    fn export_keypair(&self) -> Result<Keypair, SecretStoreError>;
}

/// An in-memory key store, for tests and short-lived tooling. No rate
/// limiting, no audit trail, nothing written to disk.
pub struct InMemorySecretStore {
    keypair: Keypair,
}

impl InMemorySecretStore {
    /// Wrap an existing keypair.
    pub fn new(keypair: Keypair) -> Self {
        Self { keypair }
    }

    /// Generate a fresh keypair and wrap it.
    pub fn generate() -> Result<Self, SecretStoreError> {
        Ok(Self::new(Keypair::generate()?))
    }
}

impl SecretStore for InMemorySecretStore {
    fn public_key(&self) -> PublicKey {
        self.keypair.public_key()
    }

    fn sign(&self, msg: &[u8]) -> Result<Signature, SecretStoreError> {
        Ok(self.keypair.sign(msg))
    }

    fn export_keypair(&self) -> Result<Keypair, SecretStoreError> {
        Keypair::from_pkcs8(self.keypair.pkcs8_bytes()).map_err(Into::into)
    }
}

fn env_first(keys: &[&str]) -> Option<String> {
    for &k in keys {
        if let Ok(v) = std::env::var(k) {
            if !v.trim().is_empty() {
                return Some(v);
            }
        }
    }
    None
}

const KEY_FILE_MAGIC: &[u8] = b"PHINKEY1";
const KEY_SALT_LEN: usize = 16;
const KEY_NONCE_LEN: usize = 12;

const MAX_AUDIT_BYTES: u64 = 32 * 1024 * 1024;
const AUDIT_ROTATE_KEEP: usize = 3;

const PBKDF2_ITERS_DEFAULT: u32 = 100_000;

fn pbkdf2_iters() -> NonZeroU32 {
    let iters = env_first(&["PHINET_PBKDF2_ITERS"])
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(PBKDF2_ITERS_DEFAULT);
    let iters = iters.clamp(10_000, 10_000_000);
    NonZeroU32::new(iters).unwrap_or_else(|| NonZeroU32::new(PBKDF2_ITERS_DEFAULT).expect("nonzero"))
}

fn rotate_audit_if_needed(path: &Path) {
    let Ok(md) = fs::metadata(path) else { return };
    if md.len() <= MAX_AUDIT_BYTES {
        return;
    }
    for i in (1..=AUDIT_ROTATE_KEEP).rev() {
        let dst = PathBuf::from(format!("{}.{}", path.display(), i));
        let src = if i == 1 {
            path.to_path_buf()
        } else {
            PathBuf::from(format!("{}.{}", path.display(), i - 1))
        };
        if src.exists() {
            let _ = fs::rename(&src, &dst);
        }
    }
}

fn set_private_perms_best_effort(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o600));
    }
}

fn atomic_write_private(path: &Path, bytes: &[u8]) -> Result<(), SecretStoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|_| SecretStoreError::Io)?;
    }
    let mut tmp = path.to_path_buf();
    tmp.set_extension("tmp");
    {
        let mut f = fs::OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&tmp)
            .map_err(|_| SecretStoreError::Io)?;
        f.write_all(bytes).map_err(|_| SecretStoreError::Io)?;
        let _ = f.sync_all();
    }
    set_private_perms_best_effort(&tmp);
    fs::rename(&tmp, path).map_err(|_| SecretStoreError::Io)?;
    set_private_perms_best_effort(path);
    Ok(())
}

fn derive_aes256gcm_key(passphrase: &[u8], salt: &[u8; KEY_SALT_LEN]) -> [u8; 32] {
    let mut out = [0u8; 32];
    pbkdf2::derive(pbkdf2::PBKDF2_HMAC_SHA256, pbkdf2_iters(), salt, passphrase, &mut out);
    out
}

fn encrypt_pkcs8(passphrase: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, SecretStoreError> {
    let rng = SystemRandom::new();
    let mut salt = [0u8; KEY_SALT_LEN];
    rng.fill(&mut salt).map_err(|_| SecretStoreError::Crypto)?;
    let mut nonce_bytes = [0u8; KEY_NONCE_LEN];
    rng.fill(&mut nonce_bytes).map_err(|_| SecretStoreError::Crypto)?;
    let nonce = aead::Nonce::assume_unique_for_key(nonce_bytes);

    let mut key = derive_aes256gcm_key(passphrase, &salt);
    let unbound = aead::UnboundKey::new(&aead::AES_256_GCM, &key).map_err(|_| SecretStoreError::Crypto)?;
    let less_safe = aead::LessSafeKey::new(unbound);

    let mut in_out = plaintext.to_vec();
    less_safe
        .seal_in_place_append_tag(nonce, aead::Aad::empty(), &mut in_out)
        .map_err(|_| SecretStoreError::Crypto)?;
    key.zeroize();

    let mut out = Vec::with_capacity(KEY_FILE_MAGIC.len() + KEY_SALT_LEN + KEY_NONCE_LEN + in_out.len());
    out.extend_from_slice(KEY_FILE_MAGIC);
    out.extend_from_slice(&salt);
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&in_out);
    Ok(out)
}

fn decrypt_pkcs8(passphrase: &[u8], bytes: &[u8]) -> Result<Vec<u8>, SecretStoreError> {
    if bytes.len() < KEY_FILE_MAGIC.len() + KEY_SALT_LEN + KEY_NONCE_LEN + 16 {
        return Err(SecretStoreError::InvalidKey);
    }
    if &bytes[..KEY_FILE_MAGIC.len()] != KEY_FILE_MAGIC {
        return Ok(bytes.to_vec());
    }
    let mut salt = [0u8; KEY_SALT_LEN];
    salt.copy_from_slice(&bytes[KEY_FILE_MAGIC.len()..KEY_FILE_MAGIC.len() + KEY_SALT_LEN]);
    let mut nonce_bytes = [0u8; KEY_NONCE_LEN];
    nonce_bytes.copy_from_slice(
        &bytes[KEY_FILE_MAGIC.len() + KEY_SALT_LEN..KEY_FILE_MAGIC.len() + KEY_SALT_LEN + KEY_NONCE_LEN],
    );
    let nonce = aead::Nonce::assume_unique_for_key(nonce_bytes);

    let mut key = derive_aes256gcm_key(passphrase, &salt);
    let unbound = aead::UnboundKey::new(&aead::AES_256_GCM, &key).map_err(|_| SecretStoreError::Crypto)?;
    let less_safe = aead::LessSafeKey::new(unbound);

    let mut in_out = bytes[KEY_FILE_MAGIC.len() + KEY_SALT_LEN + KEY_NONCE_LEN..].to_vec();
    let plain = less_safe
        .open_in_place(nonce, aead::Aad::empty(), &mut in_out)
        .map_err(|_| SecretStoreError::Crypto)?;
    key.zeroize();
    Ok(plain.to_vec())
}

/// Token-bucket rate limiter, reset once per second.
#[derive(Debug)]
struct RateLimiter {
    window_start: Instant,
    count: u32,
    limit_per_sec: u32,
}

impl RateLimiter {
    fn new(limit_per_sec: u32) -> Self {
        Self {
            window_start: Instant::now(),
            count: 0,
            limit_per_sec,
        }
    }

    fn allow(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.window_start) >= Duration::from_secs(1) {
            self.window_start = now;
            self.count = 0;
        }
        if self.count >= self.limit_per_sec {
            return false;
        }
        self.count = self.count.saturating_add(1);
        true
    }
}

fn append_audit(path: &Path, action: &str, msg: &[u8]) -> Result<(), SecretStoreError> {
    rotate_audit_if_needed(path);
    let digest = crate::core::crypto::sha256(msg);
    let line = format!("{{\"action\":\"{}\",\"msg_sha256\":\"{}\"}}\n", action, digest.to_hex());
    let mut f = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|_| SecretStoreError::Io)?;
    set_private_perms_best_effort(path);
    f.write_all(line.as_bytes()).map_err(|_| SecretStoreError::Io)?;
    Ok(())
}

/// File-backed key store: `data_dir/validator.key` (optionally encrypted
/// with `PHINET_KEY_PASSPHRASE`) plus `data_dir/audit.log`.
pub struct FileSecretStore {
    keypair: Keypair,
    limiter: Mutex<RateLimiter>,
    audit_path: PathBuf,
}

impl FileSecretStore {
    /// Load or create the key file and open (or start) the audit log in
    /// `data_dir`.
    pub fn open(data_dir: &str) -> Result<Self, SecretStoreError> {
        let mut key_path = PathBuf::from(data_dir);
        key_path.push("validator.key");
        let mut audit_path = PathBuf::from(data_dir);
        audit_path.push("audit.log");

        let keypair = Self::load_or_create_key(&key_path)?;
        Ok(Self {
            keypair,
            limiter: Mutex::new(RateLimiter::new(10_000)),
            audit_path,
        })
    }

    fn load_or_create_key(path: &Path) -> Result<Keypair, SecretStoreError> {
        let pass = env_first(&["PHINET_KEY_PASSPHRASE"]);

        if path.exists() {
            let bytes = fs::read(path).map_err(|_| SecretStoreError::Io)?;
            let pkcs8 = if bytes.starts_with(KEY_FILE_MAGIC) {
                let Some(p) = pass.as_deref() else {
                    return Err(SecretStoreError::MissingPassphrase);
                };
                decrypt_pkcs8(p.as_bytes(), &bytes)?
            } else {
                bytes
            };
            return Ok(Keypair::from_pkcs8(&pkcs8)?);
        }

        let keypair = Keypair::generate()?;
        let mut buf = keypair.pkcs8_bytes().to_vec();
        let on_disk = if let Some(p) = pass.as_deref() {
            let enc = encrypt_pkcs8(p.as_bytes(), &buf)?;
            buf.zeroize();
            enc
        } else {
            buf.clone()
        };
        atomic_write_private(path, &on_disk)?;
        buf.zeroize();
        Ok(keypair)
    }

}

impl SecretStore for FileSecretStore {
    fn public_key(&self) -> PublicKey {
        self.keypair.public_key()
    }

    fn sign(&self, msg: &[u8]) -> Result<Signature, SecretStoreError> {
        let mut guard = self.limiter.lock().map_err(|_| SecretStoreError::RateLimited)?;
        if !guard.allow() {
            return Err(SecretStoreError::RateLimited);
        }
        let _ = append_audit(&self.audit_path, "sign", msg);
        Ok(self.keypair.sign(msg))
    }

    /// Reconstruct an independent `Keypair` handle from the loaded PKCS#8
    /// bytes, for callers that need a concrete signing key rather than
    /// going through `sign` on every call.
    fn export_keypair(&self) -> Result<Keypair, SecretStoreError> {
        Keypair::from_pkcs8(self.keypair.pkcs8_bytes()).map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn in_memory_store_signs_and_verifies() {
        let store = InMemorySecretStore::generate().unwrap();
        let sig = store.sign(b"hello").unwrap();
        assert!(crate::core::crypto::verify(&store.public_key(), b"hello", &sig).is_ok());
    }

    #[test]
    fn file_store_persists_key_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().to_str().unwrap();
        let first = FileSecretStore::open(path).unwrap();
        let pk1 = first.public_key();
        drop(first);
        let second = FileSecretStore::open(path).unwrap();
        assert_eq!(pk1, second.public_key());
    }

    #[test]
    fn file_store_encrypts_when_passphrase_set() {
        let dir = tempdir().unwrap();
        let path = dir.path().to_str().unwrap();
        std::env::set_var("PHINET_KEY_PASSPHRASE", "correct horse battery staple");
        let store = FileSecretStore::open(path).unwrap();
        let pk = store.public_key();
        drop(store);

        let mut key_path = PathBuf::from(path);
        key_path.push("validator.key");
        let bytes = fs::read(&key_path).unwrap();
        assert!(bytes.starts_with(KEY_FILE_MAGIC));

        let reopened = FileSecretStore::open(path).unwrap();
        assert_eq!(pk, reopened.public_key());
        std::env::remove_var("PHINET_KEY_PASSPHRASE");
    }

    #[test]
    fn rate_limiter_blocks_after_limit() {
        let mut limiter = RateLimiter::new(2);
        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(!limiter.allow());
    }
}
