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

//! Pure Ed25519/SHA-256 primitives. No I/O: key *persistence* lives behind
//! `core::security::SecretStore`, not here.

use crate::core::types::{H256, PublicKey, Signature};
use ring::rand::SystemRandom;
use ring::signature::{Ed25519KeyPair, KeyPair, UnparsedPublicKey, ED25519};
use thiserror::Error;

/// Crypto errors. Never panics on malformed input; everything is a value.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Key generation failed.
    #[error("keygen")]
    KeyGen,
    /// PKCS#8 bytes did not decode to a valid Ed25519 keypair.
    #[error("invalid key encoding")]
    InvalidKey,
}

/// An in-process Ed25519 keypair. The secret half never implements
/// `Debug`/`Display`/`Clone` beyond what is required to sign; see
/// `core::security` for how it is stored at rest.
pub struct Keypair {
    inner: Ed25519KeyPair,
    pkcs8: Vec<u8>,
}

impl Keypair {
    /// Generate a fresh keypair. Pure with respect to persistence (the
    /// PKCS#8 bytes are returned so a `SecretStore` can persist them), but
    /// necessarily draws from the system RNG.
    pub fn generate() -> Result<Self, CryptoError> {
        let rng = SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng)
            .map_err(|_| CryptoError::KeyGen)?
            .as_ref()
            .to_vec();
        Self::from_pkcs8(&pkcs8)
    }

    /// Reconstruct from PKCS#8 bytes (as produced by `generate` or loaded
    /// from a `SecretStore`).
    pub fn from_pkcs8(pkcs8: &[u8]) -> Result<Self, CryptoError> {
        let inner = Ed25519KeyPair::from_pkcs8(pkcs8).map_err(|_| CryptoError::InvalidKey)?;
        Ok(Self {
            inner,
            pkcs8: pkcs8.to_vec(),
        })
    }

    /// Raw PKCS#8 bytes, for persistence by a `SecretStore`.
    pub fn pkcs8_bytes(&self) -> &[u8] {
        &self.pkcs8
    }

    /// The public half, the canonical node identity.
    pub fn public_key(&self) -> PublicKey {
        let mut out = [0u8; 32];
        out.copy_from_slice(self.inner.public_key().as_ref());
        PublicKey(out)
    }

    /// Sign a message.
    pub fn sign(&self, msg: &[u8]) -> Signature {
        Signature(self.inner.sign(msg).as_ref().to_vec())
    }
}

/// Verify a signature made with `sign`/`Keypair::sign`. Returns `Ok(())`
/// on a valid signature, `Err(CryptoError)` otherwise -- never panics.
pub fn verify(public: &PublicKey, msg: &[u8], sig: &Signature) -> Result<(), CryptoError> {
    if sig.0.len() != 64 {
        return Err(CryptoError::InvalidKey);
    }
    let pk = UnparsedPublicKey::new(&ED25519, &public.0);
    pk.verify(msg, &sig.0).map_err(|_| CryptoError::InvalidKey)
}

/// SHA-256 over arbitrary bytes.
pub fn sha256(bytes: &[u8]) -> H256 {
    let digest = ring::digest::digest(&ring::digest::SHA256, bytes);
    let mut out = [0u8; 32];
    out.copy_from_slice(digest.as_ref());
    H256(out)
}

/// Domain salt for node-id derivation; fixed so every node derives the
/// same id for the same public key.
const NODE_ID_SALT: &[u8] = b"phinet-node-id-v1";

/// Derive the canonical node id: `hex(H(salt || pubkey))`.
pub fn id_from_pubkey(public: &PublicKey) -> String {
    let mut buf = Vec::with_capacity(NODE_ID_SALT.len() + 32);
    buf.extend_from_slice(NODE_ID_SALT);
    buf.extend_from_slice(&public.0);
    sha256(&buf).to_hex()
}

/// `"ed25519:<hex>"` display form used on the wire and in logs.
pub fn format_pubkey(public: &PublicKey) -> String {
    public.format()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_roundtrips() {
        let kp = Keypair::generate().unwrap();
        let msg = b"hello judgment log";
        let sig = kp.sign(msg);
        assert!(verify(&kp.public_key(), msg, &sig).is_ok());
    }

    #[test]
    fn verify_rejects_tampered_message() {
        let kp = Keypair::generate().unwrap();
        let sig = kp.sign(b"original");
        assert!(verify(&kp.public_key(), b"tampered", &sig).is_err());
    }

    #[test]
    fn verify_rejects_wrong_key() {
        let kp1 = Keypair::generate().unwrap();
        let kp2 = Keypair::generate().unwrap();
        let sig = kp1.sign(b"msg");
        assert!(verify(&kp2.public_key(), b"msg", &sig).is_err());
    }

    #[test]
    fn id_from_pubkey_is_deterministic() {
        let kp = Keypair::generate().unwrap();
        let a = id_from_pubkey(&kp.public_key());
        let b = id_from_pubkey(&kp.public_key());
        assert_eq!(a, b);
    }

    #[test]
    fn format_pubkey_has_expected_prefix() {
        let kp = Keypair::generate().unwrap();
        assert!(format_pubkey(&kp.public_key()).starts_with("ed25519:"));
    }

    #[test]
    fn from_pkcs8_rejects_garbage() {
        assert!(Keypair::from_pkcs8(&[0u8; 4]).is_err());
    }
}
