//! Hardware-token signing over PIV
//!
//! Uses the digital-signature slot (9c) of a locally attached YubiKey.
//! Slot 9c requires PIN entry for every signature; the PIN is taken from
//! the `PIV_PIN` environment variable when present, otherwise the device
//! policy decides whether the operation proceeds.

use crate::error::{CeremonyError, Result};
use crate::signer::KeySigner;
use p256::ecdsa::VerifyingKey;
use sha2::{Digest, Sha256};
use std::sync::Mutex;
use tracing::info;
use yubikey::certificate::Certificate;
use yubikey::piv::{self, AlgorithmId, SlotId};
use yubikey::YubiKey;

/// Environment variable holding the PIV PIN
pub const PIV_PIN_ENV: &str = "PIV_PIN";

/// A signer backed by PIV slot 9c of a locally attached token
pub struct PivSigner {
    device: Mutex<YubiKey>,
    public_key: VerifyingKey,
}

impl PivSigner {
    /// Open the first attached token and read the slot 9c certificate.
    pub fn open() -> Result<Self> {
        let mut device = YubiKey::open()
            .map_err(|e| CeremonyError::Crypto(format!("no PIV device found: {e}")))?;
        info!(serial = %device.serial(), "opened PIV device");

        let certificate = Certificate::read(&mut device, SlotId::Signature)
            .map_err(|e| CeremonyError::Crypto(format!("reading slot 9c certificate: {e}")))?;
        let spki = &certificate.cert.tbs_certificate.subject_public_key_info;
        let point = spki
            .subject_public_key
            .as_bytes()
            .ok_or_else(|| CeremonyError::UnsupportedKey("unaligned public key".to_string()))?;
        let public_key = VerifyingKey::from_sec1_bytes(point)
            .map_err(|_| CeremonyError::UnsupportedKey("slot 9c key is not P-256".to_string()))?;

        Ok(Self {
            device: Mutex::new(device),
            public_key,
        })
    }
}

impl KeySigner for PivSigner {
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        let digest = Sha256::digest(message);
        let mut device = self.device.lock().expect("piv device lock poisoned");

        if let Ok(pin) = std::env::var(PIV_PIN_ENV) {
            device
                .verify_pin(pin.as_bytes())
                .map_err(|e| CeremonyError::Crypto(format!("PIN verification failed: {e}")))?;
        }

        let signature = piv::sign_data(
            &mut device,
            digest.as_slice(),
            AlgorithmId::EccP256,
            SlotId::Signature,
        )
        .map_err(|e| CeremonyError::Crypto(format!("PIV signing failed: {e}")))?;
        Ok(signature.to_vec())
    }

    fn public_key(&self) -> VerifyingKey {
        self.public_key
    }
}
