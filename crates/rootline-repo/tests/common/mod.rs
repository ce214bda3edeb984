//! Shared ceremony-test harness.
//!
//! Builds throwaway repositories with generated offline keys. The
//! attestation certificates come from a real production token — init only
//! parses them, so they can sit alongside any generated public key; chain
//! verification against the matching key is exercised in the attestation
//! unit tests.

use p256::ecdsa::SigningKey;
use p256::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use rand::rngs::OsRng;
use rootline_core::keys::KeyFormat;
use rootline_core::metadata::SignedDocument;
use rootline_core::signer::{KeySigner, PemSigner};
use rootline_repo::config::TargetsConfig;
use rootline_repo::engine::{InitOptions, Repository};
use rootline_repo::signing::sign_roles;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const KEY_CERT: &str = "-----BEGIN CERTIFICATE-----
MIICRDCCASygAwIBAgIQadj3MkImEj+VDi7jru0/5TANBgkqhkiG9w0BAQsFADAh
MR8wHQYDVQQDDBZZdWJpY28gUElWIEF0dGVzdGF0aW9uMCAXDTE2MDMxNDAwMDAw
MFoYDzIwNTIwNDE3MDAwMDAwWjAlMSMwIQYDVQQDDBpZdWJpS2V5IFBJViBBdHRl
c3RhdGlvbiA5YzBZMBMGByqGSM49AgEGCCqGSM49AwEHA0IABDLC73RDNUp1nHV1
zWuTXMLKxuzKXw9bo5m9Mjyy8pIc6YtRsxIkmE+AXwQdxl9PBt/q1sWQIvCJYbut
i/LOCaSjPTA7MBEGCisGAQQBgsQKAwMEAwQEBTAUBgorBgEEAYLECgMHBAYCBACg
/EUwEAYKKwYBBAGCxAoDCAQCAwIwDQYJKoZIhvcNAQELBQADggEBAD0pDMAg6LME
AW3vPN//0beH7EP+yCIgeXLBAcMnUK02XhoXHs5vGQzcrfgl2izcV7QcZznYv1Ou
sladMoIUOhuNojPZWNCP301EpiNFTMywpndxjSyIrtVPCwOM6yqIc8A0lrRkTyse
hkEYQqGeJa1Vz5VGid/7fjUSaTaZDWT1oNqSNjnV0SkUr/nA6q9RJ8WCBu8adIfz
FMI8CX/DV8OpF5SlLXXzLcfyNL4dyRrrpH5zS665JQT72ZWA3yuLP1R3o9cWiyZi
eXccKEXYp90X5WxWKam6mwkNrgoOWaTDUPpeveMJwHu2D+e38U3F6KLJhXsREuXP
y7FIbzkFc0g=
-----END CERTIFICATE-----";

pub const DEVICE_CERT: &str = "-----BEGIN CERTIFICATE-----
MIIDDTCCAfWgAwIBAgIJAMHMibcEuZYWMA0GCSqGSIb3DQEBCwUAMCsxKTAnBgNV
BAMMIFl1YmljbyBQSVYgUm9vdCBDQSBTZXJpYWwgMjYzNzUxMCAXDTE2MDMxNDAw
MDAwMFoYDzIwNTIwNDE3MDAwMDAwWjAhMR8wHQYDVQQDDBZZdWJpY28gUElWIEF0
dGVzdGF0aW9uMIIBIjANBgkqhkiG9w0BAQEFAAOCAQ8AMIIBCgKCAQEA43jxRyx5
M5h7uTFmU/MKus77xCT50usFB9NuWa7RrCdEPWSU8+zrUmfwxphdDgarwVD6lvWn
FRUBpRvcnX26copHHWHe9iprAoGCL6iqmqXXcz49Xg9DmcxNlUtomlbCQRYZzHEa
k3W2vUE9Tci00e4q3rxWZZD/S5CuCLssJMXYxFwERedIZUhDmtMk46RP3R6qn4/Z
lF53Ck2IIfuNqb3SNAiTWmwNYtyZt3V5xIvZAjyMfkcvNJW4F19SsGHb+dnwhLBA
dXyUzl3brJN1XFHaGFAfmgBKTh2Cibz622fTj00ICezOEMnh67+1jfEr8EbuLTzF
L6fkCZMZQ3iVNQIDAQABozwwOjARBgorBgEEAYLECgMDBAMEBAUwEQYKKwYBBAGC
xAoDCgQDAgEDMBIGA1UdEwEB/wQIMAYBAf8CAQAwDQYJKoZIhvcNAQELBQADggEB
AKuBRRECT6KrYH1/vjVpCP1A1JdIU0zM5DWhQ5lXaXFXknYK+OAfrwCGs/c0yPXU
jfjXlcpPZq1jWjzLTP5MEDJ/RCoZPNB9UH4Zh5KfqKPlBZ9VQ0eFjGmA3ny1vLFk
RljMj2nctsUaOHXBrD2c2xBSN0/Jwo8IQRnCBNG4ZTcrvIkkx2LZ5xxTkX1r6c8V
UzuhD3NM97M8WzT/PmZOwRSK8iiWDRgD2VxWddg4RlL32gsE+/L9+j3sr0jhzKQf
62DGzb04kO2+4zqMVNH83Ho+9PnvtUPC7VTId2UBc8D1JBZCN7gBwRp934NfQlBP
gUPpyzra1/D3eME/ixhdtcw=
-----END CERTIFICATE-----";

/// One generated offline key with its on-disk `keys/<serial>/` directory.
pub struct HsmKey {
    pub serial: u64,
    pub key: SigningKey,
}

impl HsmKey {
    pub fn signer(&self) -> PemSigner {
        PemSigner::from_signing_key(self.key.clone())
    }

    pub fn key_id(&self, format: KeyFormat) -> String {
        self.signer()
            .key_doc(format)
            .unwrap()
            .key_id()
            .unwrap()
    }
}

/// A throwaway ceremony repository plus working directory.
pub struct Harness {
    pub dir: TempDir,
    pub work: TempDir,
    pub snapshot_ref: String,
    pub timestamp_ref: String,
    next_serial: u64,
}

impl Harness {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let snapshot_ref = write_signer(work.path(), "snapshot.pem");
        let timestamp_ref = write_signer(work.path(), "timestamp.pem");
        Self {
            dir,
            work,
            snapshot_ref,
            timestamp_ref,
            next_serial: 10550341,
        }
    }

    pub fn repo(&self) -> Repository {
        Repository::open(self.dir.path()).unwrap()
    }

    /// Generate an offline key and provision its keys/<serial>/ directory.
    pub fn add_hsm_key(&mut self) -> HsmKey {
        let serial = self.next_serial;
        self.next_serial += 1;

        let key = SigningKey::random(&mut OsRng);
        let pubkey_pem = key
            .verifying_key()
            .to_public_key_pem(LineEnding::LF)
            .unwrap();

        let key_dir = self.dir.path().join("keys").join(serial.to_string());
        std::fs::create_dir_all(&key_dir).unwrap();
        std::fs::write(key_dir.join(format!("{serial}_pubkey.pem")), pubkey_pem).unwrap();
        std::fs::write(key_dir.join(format!("{serial}_key_cert.pem")), KEY_CERT).unwrap();
        std::fs::write(key_dir.join(format!("{serial}_device_cert.pem")), DEVICE_CERT).unwrap();

        HsmKey { serial, key }
    }

    pub fn remove_hsm_key(&self, key: &HsmKey) {
        std::fs::remove_dir_all(self.dir.path().join("keys").join(key.serial.to_string()))
            .unwrap();
    }

    /// Write target files into the working directory and return the
    /// matching all-adds configuration.
    pub fn target_config(&self, files: &[(&str, &str)]) -> TargetsConfig {
        let mut add = BTreeMap::new();
        for (name, content) in files {
            std::fs::write(self.work.path().join(name), content).unwrap();
            add.insert(name.to_string(), None);
        }
        TargetsConfig {
            add,
            delete: BTreeMap::new(),
        }
    }

    pub fn init_opts(&self, threshold: usize, files: &[(&str, &str)]) -> InitOptions {
        InitOptions {
            previous: None,
            threshold,
            targets_config: self.target_config(files),
            targets_dir: self.work.path().to_path_buf(),
            snapshot_ref: self.snapshot_ref.clone(),
            timestamp_ref: self.timestamp_ref.clone(),
            consistent_snapshot: true,
            format: KeyFormat::Pem,
        }
    }

    pub fn init(&self, opts: &InitOptions) {
        self.repo().init(opts).unwrap();
    }

    pub fn sign(&self, roles: &[&str], signer: &dyn KeySigner, format: KeyFormat) {
        let roles: Vec<String> = roles.iter().map(|r| r.to_string()).collect();
        sign_roles(&mut self.repo(), &roles, signer, format, false).unwrap();
    }

    /// Snapshot, timestamp, sign both with the online keys, and publish.
    pub fn snapshot_timestamp_publish(&self) {
        let mut repo = self.repo();
        repo.snapshot().unwrap();
        let snapshot_signer = PemSigner::from_file(&self.snapshot_ref).unwrap();
        self.sign(&["snapshot"], &snapshot_signer, KeyFormat::Pem);

        repo.timestamp().unwrap();
        let timestamp_signer = PemSigner::from_file(&self.timestamp_ref).unwrap();
        self.sign(&["timestamp"], &timestamp_signer, KeyFormat::Pem);

        self.repo().publish().unwrap();
    }

    pub fn signed_doc(&self, name: &str) -> SignedDocument {
        self.repo().signed_meta(name).unwrap()
    }

    pub fn committed_bytes(&self, name: &str) -> Vec<u8> {
        std::fs::read(self.dir.path().join("repository").join(name)).unwrap()
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Write a fresh PKCS#8 signing key and return its path.
pub fn write_signer(dir: &Path, name: &str) -> String {
    let key = SigningKey::random(&mut OsRng);
    let pem = key.to_pkcs8_pem(LineEnding::LF).unwrap();
    let path: PathBuf = dir.join(name);
    std::fs::write(&path, pem.as_bytes()).unwrap();
    path.to_string_lossy().into_owned()
}

/// Write a fresh key pair, returning (private path, public path).
pub fn write_key_pair(dir: &Path, name: &str) -> (String, String) {
    let key = SigningKey::random(&mut OsRng);
    let private = dir.join(format!("{name}.pem"));
    let public = dir.join(format!("{name}.pub.pem"));
    std::fs::write(&private, key.to_pkcs8_pem(LineEnding::LF).unwrap().as_bytes()).unwrap();
    std::fs::write(
        &public,
        key.verifying_key().to_public_key_pem(LineEnding::LF).unwrap(),
    )
    .unwrap();
    (
        private.to_string_lossy().into_owned(),
        public.to_string_lossy().into_owned(),
    )
}
