//! Proof-of-possession encoding
//!
//! A delegate proves control of its signing key by signing a challenge
//! (its role name) and an out-of-band nonce. The two strings are combined
//! with a length-prefixed pre-authentication encoding so that no pair of
//! distinct inputs can produce the same signed bytes.

use crate::error::Result;
use crate::signer::{verify_signature, KeySigner};
use p256::ecdsa::VerifyingKey;

/// Format tag for the key proof-of-possession encoding, version 1
const PAE_TAG: &str = "key-kop-v1";

/// Length-prefixed pre-authentication encoding of a challenge and nonce.
///
/// `PAE(c, n) = "key-kop-v1 " len(c) " " c " " len(n) " " n` in ASCII.
pub fn pre_auth_encode(challenge: &str, nonce: &str) -> Vec<u8> {
    format!(
        "{PAE_TAG} {} {} {} {}",
        challenge.len(),
        challenge,
        nonce.len(),
        nonce
    )
    .into_bytes()
}

/// Sign the PAE of `challenge` and `nonce`.
pub fn sign_key_pop(signer: &dyn KeySigner, challenge: &str, nonce: &str) -> Result<Vec<u8>> {
    signer.sign(&pre_auth_encode(challenge, nonce))
}

/// Verify a proof-of-possession signature under `key`.
pub fn verify_key_pop(
    key: &VerifyingKey,
    challenge: &str,
    nonce: &str,
    signature: &[u8],
) -> Result<()> {
    verify_signature(key, &pre_auth_encode(challenge, nonce), signature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::PemSigner;
    use p256::ecdsa::SigningKey;
    use rand::rngs::OsRng;

    #[test]
    fn test_encoding_shape() {
        assert_eq!(
            pre_auth_encode("delegate", "abc"),
            b"key-kop-v1 8 delegate 3 abc".to_vec()
        );
    }

    #[test]
    fn test_sign_and_verify() {
        let signer = PemSigner::from_signing_key(SigningKey::random(&mut OsRng));
        let sig = sign_key_pop(&signer, "delegate", "abc").unwrap();
        verify_key_pop(&signer.public_key(), "delegate", "abc", &sig).unwrap();
    }

    #[test]
    fn test_shifted_boundaries_do_not_verify() {
        let signer = PemSigner::from_signing_key(SigningKey::random(&mut OsRng));
        let sig = sign_key_pop(&signer, "delegate", "abc").unwrap();
        // Same concatenation, different split.
        assert!(verify_key_pop(&signer.public_key(), "delegat", "eabc", &sig).is_err());
    }
}
