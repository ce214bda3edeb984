//! Verification database
//!
//! Builds the role/key database from stored metadata — root's key table
//! and role list, plus every delegation found in targets-chain documents —
//! and validates signed documents against per-role thresholds. During a
//! rollover the previous root's database is consulted as well, so the old
//! key-holders' countersignatures are visible.

use crate::store::FileSystemStore;
use chrono::Utc;
use p256::ecdsa::VerifyingKey;
use rootline_core::error::{CeremonyError, Result};
use rootline_core::keys::KeyDoc;
use rootline_core::metadata::{
    is_versioned_manifest, Root, RoleKeys, SignedDocument, SignedHeader, Targets,
};
use rootline_core::signer::verify_signature;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

/// Role/key database for signature verification
#[derive(Debug, Default)]
pub struct KeyDb {
    keys: BTreeMap<String, VerifyingKey>,
    roles: BTreeMap<String, RoleKeys>,
}

impl KeyDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a public key under its key ID.
    pub fn add_key(&mut self, keyid: &str, key: &KeyDoc) -> Result<()> {
        self.keys.insert(keyid.to_string(), key.verifying_key()?);
        Ok(())
    }

    /// Register a role with its authorized key IDs and threshold.
    pub fn add_role(&mut self, name: &str, role: RoleKeys) {
        self.roles.insert(name.to_string(), role);
    }

    /// The threshold recorded for a role.
    pub fn threshold(&self, role: &str) -> Option<usize> {
        self.roles.get(role).map(|r| r.threshold)
    }

    /// Build the database from a root document.
    pub fn from_root(root: &Root) -> Result<Self> {
        let mut db = Self::new();
        for (keyid, key) in &root.keys {
            db.add_key(keyid, key)?;
        }
        for (name, role) in &root.roles {
            db.add_role(name, role.clone());
        }
        Ok(db)
    }

    /// Build the database from stored metadata: the current root plus the
    /// delegations of every targets-chain document.
    pub fn from_store(store: &FileSystemStore) -> Result<Self> {
        let root_doc = SignedDocument::from_bytes(&store.meta("root.json")?)?;
        let root: Root = root_doc.parse_payload()?;
        let mut db = Self::from_root(&root)?;

        for (name, bytes) in store.get_meta()? {
            if is_versioned_manifest(&name) {
                continue;
            }
            let doc = SignedDocument::from_bytes(&bytes)?;
            let header: SignedHeader = doc.parse_payload().map_err(|e| {
                CeremonyError::Serialization(format!("unreadable metadata {name}: {e}"))
            })?;
            if header.type_name != "targets" {
                continue;
            }
            let targets: Targets = doc.parse_payload()?;
            let Some(delegations) = targets.delegations else {
                continue;
            };
            for (keyid, key) in &delegations.keys {
                db.add_key(keyid, key)?;
            }
            for role in &delegations.roles {
                db.add_role(
                    &role.name,
                    RoleKeys {
                        keyids: role.keyids.clone(),
                        threshold: role.threshold,
                    },
                );
            }
        }
        Ok(db)
    }

    /// Build the database of the root one version behind the current one.
    /// `Ok(None)` when the current root is the first version.
    pub fn from_previous_root(store: &FileSystemStore) -> Result<Option<Self>> {
        let root: Root =
            SignedDocument::from_bytes(&store.meta("root.json")?)?.parse_payload()?;
        if root.version < 2 {
            return Ok(None);
        }
        let name = format!("{}.root.json", root.version - 1);
        let previous: Root = SignedDocument::from_bytes(&store.meta(&name)?)?.parse_payload()?;
        info!(version = previous.version, "loaded previous root for rollover checks");
        Ok(Some(Self::from_root(&previous)?))
    }

    /// Verify a signed document against `role`'s keys and threshold.
    ///
    /// Placeholder slots are ignored; a signature only counts when its key
    /// ID is authorized for the role and the bytes verify over the
    /// canonical payload. Distinct valid key IDs must reach the threshold.
    pub fn verify_role(&self, doc: &SignedDocument, role: &str) -> Result<()> {
        let role_keys = self
            .roles
            .get(role)
            .ok_or_else(|| CeremonyError::UnknownDelegation(role.to_string()))?;

        let header: SignedHeader = doc.parse_payload()?;
        if header.expires < Utc::now() {
            return Err(CeremonyError::SignatureInvalid(format!(
                "{role} metadata expired on {}",
                header.expires.format("%Y/%m/%d")
            )));
        }

        let payload = doc.canonical_payload()?;
        let mut valid = BTreeSet::new();
        for sig in &doc.signatures {
            if sig.is_placeholder() || !role_keys.keyids.contains(&sig.keyid) {
                continue;
            }
            let Some(key) = self.keys.get(&sig.keyid) else {
                continue;
            };
            let Ok(raw) = hex::decode(&sig.sig) else {
                warn!(keyid = %sig.keyid, "undecodable signature bytes");
                continue;
            };
            if verify_signature(key, &payload, &raw).is_ok() {
                valid.insert(sig.keyid.clone());
            }
        }

        if valid.len() < role_keys.threshold {
            return Err(CeremonyError::ThresholdNotMet {
                role: role.to_string(),
                valid: valid.len(),
                threshold: role_keys.threshold,
            });
        }
        Ok(())
    }
}

/// Verification status of one staged manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleStatus {
    /// Signatures valid and threshold achieved
    Verified,
    /// Some valid signatures, below threshold (normal mid-ceremony)
    Partial { valid: usize, threshold: usize },
    /// No valid signatures yet
    Unsigned { threshold: usize },
}

/// Per-manifest outcome of a staged verification pass
#[derive(Debug, Clone)]
pub struct StagedReport {
    pub name: String,
    pub version: u64,
    pub expires: chrono::DateTime<Utc>,
    pub status: RoleStatus,
    /// For root during a rollover: the outcome against the previous root
    pub previous_root: Option<RoleStatus>,
}

fn status_of(db: &KeyDb, doc: &SignedDocument, role: &str) -> Result<RoleStatus> {
    match db.verify_role(doc, role) {
        Ok(()) => Ok(RoleStatus::Verified),
        Err(CeremonyError::ThresholdNotMet {
            valid, threshold, ..
        }) => {
            if valid == 0 {
                Ok(RoleStatus::Unsigned { threshold })
            } else {
                Ok(RoleStatus::Partial { valid, threshold })
            }
        }
        Err(other) => Err(other),
    }
}

/// Verify every staged manifest, logging the signature state of each.
///
/// Below-threshold counts are informational: partially signed metadata is
/// the normal state of a ceremony in progress. Any error other than a
/// missed threshold is fatal.
pub fn verify_staged(store: &FileSystemStore) -> Result<Vec<StagedReport>> {
    let db = KeyDb::from_store(store)?;
    let previous_db = KeyDb::from_previous_root(store)?;

    let mut reports = Vec::new();
    for (name, bytes) in store.get_meta()? {
        if is_versioned_manifest(&name) || !store.file_is_staged(&name) {
            continue;
        }
        let role = name.trim_end_matches(".json");
        let doc = SignedDocument::from_bytes(&bytes)?;
        let header: SignedHeader = doc.parse_payload()?;

        let status = status_of(&db, &doc, role)?;
        let previous_root = match (&previous_db, role) {
            (Some(prev), "root") => Some(status_of(prev, &doc, "root")?),
            _ => None,
        };

        match &status {
            RoleStatus::Verified => {
                info!(manifest = %name, version = header.version, "signatures valid and threshold achieved")
            }
            RoleStatus::Partial { valid, threshold } => {
                info!(manifest = %name, "contains {valid}/{threshold} valid signatures")
            }
            RoleStatus::Unsigned { threshold } => {
                info!(manifest = %name, "contains 0/{threshold} valid signatures")
            }
        }

        reports.push(StagedReport {
            name,
            version: header.version,
            expires: header.expires,
            status,
            previous_root,
        });
    }
    Ok(reports)
}
