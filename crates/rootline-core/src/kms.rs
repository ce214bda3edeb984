//! KMS-hosted signing keys
//!
//! Speaks the Cloud KMS REST surface directly: fetch the PEM public key at
//! open time, then submit SHA-256 digests for asymmetric signing. The
//! access token comes from the environment; token acquisition is the
//! operator's concern, not this tool's.

use crate::error::{CeremonyError, Result};
use crate::keys::public_key_from_pem;
use crate::signer::KeySigner;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use p256::ecdsa::VerifyingKey;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::debug;

/// Scheme prefix for Cloud KMS key references
pub const KMS_SCHEME: &str = "gcpkms://";

const KMS_API_BASE: &str = "https://cloudkms.googleapis.com/v1";

/// Environment variable holding the bearer token for KMS calls
pub const KMS_TOKEN_ENV: &str = "GCP_ACCESS_TOKEN";

#[derive(Deserialize)]
struct PublicKeyResponse {
    pem: String,
}

#[derive(Deserialize)]
struct SignResponse {
    signature: String,
}

/// A signer backed by a Cloud KMS asymmetric key version
#[derive(Debug)]
pub struct KmsSigner {
    resource: String,
    token: String,
    public_key: VerifyingKey,
}

impl KmsSigner {
    /// Open a KMS signer from a `gcpkms://projects/...` reference.
    ///
    /// Fetches the key version's public key so that signing failures
    /// surface before any metadata is touched.
    pub fn open(key_ref: &str) -> Result<Self> {
        let resource = key_ref
            .strip_prefix(KMS_SCHEME)
            .ok_or_else(|| {
                CeremonyError::Remote(format!("key reference lacks {KMS_SCHEME} scheme"))
            })?
            .to_string();
        let token = std::env::var(KMS_TOKEN_ENV)
            .map_err(|_| CeremonyError::Remote(format!("{KMS_TOKEN_ENV} is not set")))?;

        let url = format!("{KMS_API_BASE}/{resource}/publicKey");
        debug!(resource = %resource, "fetching KMS public key");
        let response: PublicKeyResponse = ureq::get(&url)
            .set("Authorization", &format!("Bearer {token}"))
            .call()
            .map_err(|e| CeremonyError::Remote(format!("KMS public key fetch failed: {e}")))?
            .into_json()
            .map_err(|e| CeremonyError::Remote(format!("KMS public key response: {e}")))?;

        let public_key = public_key_from_pem(&response.pem)?;
        Ok(Self {
            resource,
            token,
            public_key,
        })
    }
}

impl KeySigner for KmsSigner {
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        let digest = Sha256::digest(message);
        let url = format!("{KMS_API_BASE}/{}:asymmetricSign", self.resource);
        let response: SignResponse = ureq::post(&url)
            .set("Authorization", &format!("Bearer {}", self.token))
            .send_json(serde_json::json!({
                "digest": { "sha256": BASE64.encode(digest) }
            }))
            .map_err(|e| CeremonyError::Remote(format!("KMS sign failed: {e}")))?
            .into_json()
            .map_err(|e| CeremonyError::Remote(format!("KMS sign response: {e}")))?;
        Ok(BASE64.decode(response.signature)?)
    }

    fn public_key(&self) -> VerifyingKey {
        self.public_key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_required() {
        let err = KmsSigner::open("projects/p/locations/l").unwrap_err();
        assert!(err.to_string().contains("gcpkms://"));
    }
}
