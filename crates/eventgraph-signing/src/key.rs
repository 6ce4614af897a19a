//! Ed25519 signing keys, identified the way Matrix-style federation keys
//! are: an algorithm name and a version, joined as `ed25519:<version>`.

use ed25519_dalek::{Signer, SigningKey as DalekSigningKey, Verifier, VerifyingKey};
use eventgraph_common::ServerName;
use pkcs8::DecodePrivateKey;
use rand::rngs::OsRng;

/// A server's signing key, tagged with the version used to build its key
/// identifier.
pub struct SigningKey {
    version: String,
    inner: DalekSigningKey,
}

impl SigningKey {
    /// Generates a fresh signing key with the given version tag. Intended
    /// for tests and local development; production deployments load a key
    /// from durable storage via [`SigningKey::from_pkcs8_der`].
    pub fn generate(version: impl Into<String>) -> Self {
        let inner = DalekSigningKey::generate(&mut OsRng);
        Self { version: version.into(), inner }
    }

    /// Loads a signing key from a PKCS#8 DER-encoded private key.
    pub fn from_pkcs8_der(der: &[u8], version: impl Into<String>) -> Result<Self, pkcs8::Error> {
        let inner = DalekSigningKey::from_pkcs8_der(der)?;
        Ok(Self { version: version.into(), inner })
    }

    /// The key identifier this key signs under, e.g. `ed25519:1`.
    pub fn key_id(&self) -> String {
        format!("ed25519:{}", self.version)
    }

    /// The version tag alone, without the `ed25519:` algorithm prefix.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Signs `message` and returns the raw signature bytes.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.inner.sign(message).to_bytes()
    }

    /// The public half of this key.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.inner.verifying_key()
    }
}

/// Verifies a raw Ed25519 signature against a public key and message.
pub fn verify(public_key: &VerifyingKey, message: &[u8], signature: &[u8]) -> bool {
    let Ok(bytes) = <[u8; 64]>::try_from(signature) else {
        return false;
    };
    let signature = ed25519_dalek::Signature::from_bytes(&bytes);
    public_key.verify(message, &signature).is_ok()
}

/// A source of local signing keys, the collaborator interface `seal`'s
/// callers use to look up which key a server signs under.
///
/// Implementations typically hold one active key per server name plus
/// whatever retired keys are still needed to verify old signatures; this
/// trait only exposes the currently active one.
pub trait SigningKeySource {
    /// Returns the active signing key for `server_name`, if this source
    /// holds one.
    fn signing_key(&self, server_name: &ServerName) -> Option<&SigningKey>;
}
