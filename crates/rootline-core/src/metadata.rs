//! TUF metadata model
//!
//! The four top-level role documents plus delegated targets, as stored on
//! disk and exchanged between ceremony participants. Every document is a
//! [`SignedDocument`]: an opaque `signed` payload alongside a signature
//! list. The payload is kept as raw JSON so that re-writing a document
//! never disturbs bytes another party has already signed; typed views are
//! parsed on demand.
//!
//! Wire format notes:
//! - signatures are hex-encoded ASN.1 DER ECDSA; an empty `sig` string is a
//!   placeholder reserving the slot for an offline signer
//! - `expires` is RFC 3339 UTC
//! - object keys are emitted sorted, so stored documents differ from their
//!   canonical form only by whitespace

use crate::canonical::{to_canonical_json, to_pretty_json};
use crate::error::{CeremonyError, Result};
use crate::keys::KeyDoc;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// TUF specification version emitted in every role document
pub const SPEC_VERSION: &str = "1.0";

/// The four top-level role names, in signing order
pub const TOP_LEVEL_ROLES: [&str; 4] = ["root", "targets", "snapshot", "timestamp"];

/// A top-level metadata role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopRole {
    /// Delegates trust to the keys of all other top-level roles
    Root,
    /// Lists the target files trusted by clients
    Targets,
    /// Pins the current version and hashes of every targets manifest
    Snapshot,
    /// Pins the current snapshot, limiting replay windows
    Timestamp,
}

impl TopRole {
    /// The role name as it appears in `root.roles`
    pub fn name(self) -> &'static str {
        match self {
            TopRole::Root => "root",
            TopRole::Targets => "targets",
            TopRole::Snapshot => "snapshot",
            TopRole::Timestamp => "timestamp",
        }
    }

    /// The manifest file name for this role
    pub fn manifest(self) -> String {
        format!("{}.json", self.name())
    }
}

impl fmt::Display for TopRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TopRole {
    type Err = CeremonyError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "root" => Ok(TopRole::Root),
            "targets" => Ok(TopRole::Targets),
            "snapshot" => Ok(TopRole::Snapshot),
            "timestamp" => Ok(TopRole::Timestamp),
            other => Err(CeremonyError::UnknownDelegation(other.to_string())),
        }
    }
}

/// Returns true when `name` is a top-level role name.
pub fn is_top_level_role(name: &str) -> bool {
    TOP_LEVEL_ROLES.contains(&name)
}

/// Returns true for versioned manifest copies of the form `N.role.json`.
pub fn is_versioned_manifest(name: &str) -> bool {
    let mut parts = name.split('.');
    match parts.next() {
        Some(first) => first.parse::<u64>().is_ok() && parts.count() >= 2,
        None => false,
    }
}

/// A single signature slot in a role document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Key ID of the (possibly future) signer
    pub keyid: String,

    /// Hex-encoded ASN.1 DER ECDSA signature; empty until collected
    pub sig: String,
}

impl Signature {
    /// A placeholder entry reserving a slot for an offline signer
    pub fn placeholder(keyid: impl Into<String>) -> Self {
        Self {
            keyid: keyid.into(),
            sig: String::new(),
        }
    }

    /// True when this slot has not yet received a real signature
    pub fn is_placeholder(&self) -> bool {
        self.sig.is_empty()
    }
}

/// A signed role document: raw payload plus signature list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedDocument {
    /// Collected and placeholder signatures, in slot order
    pub signatures: Vec<Signature>,

    /// The signed payload, kept as raw JSON
    pub signed: serde_json::Value,
}

impl SignedDocument {
    /// Wrap a payload value with the given signature slots.
    pub fn new(signed: serde_json::Value, signatures: Vec<Signature>) -> Self {
        Self { signatures, signed }
    }

    /// Parse a stored role document.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Serialize for storage (pretty-printed, tab-indented).
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        to_pretty_json(self)
    }

    /// Deserialize the payload into a typed role.
    pub fn parse_payload<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.signed.clone())?)
    }

    /// The canonical bytes of the payload, i.e. what signers actually sign.
    pub fn canonical_payload(&self) -> Result<Vec<u8>> {
        to_canonical_json(&self.signed)
    }

    /// True when at least one placeholder slot is present.
    pub fn has_pre_entries(&self) -> bool {
        self.signatures
            .iter()
            .any(|s| !s.keyid.is_empty() && s.is_placeholder())
    }

    /// Signatures with the placeholders stripped.
    pub fn collected_signatures(&self) -> Vec<Signature> {
        self.signatures
            .iter()
            .filter(|s| !s.is_placeholder())
            .cloned()
            .collect()
    }
}

/// Build a signed document from a typed payload, installing one placeholder
/// per key ID.
pub fn with_placeholders<T: Serialize>(payload: &T, key_ids: &[String]) -> Result<SignedDocument> {
    let signed = serde_json::to_value(payload)?;
    let signatures = key_ids
        .iter()
        .map(|id| Signature::placeholder(id.clone()))
        .collect();
    Ok(SignedDocument::new(signed, signatures))
}

/// Key IDs and threshold for one role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleKeys {
    /// Key IDs authorized to sign this role
    pub keyids: Vec<String>,

    /// Number of valid signatures required
    pub threshold: usize,
}

impl RoleKeys {
    pub fn new(threshold: usize) -> Self {
        Self {
            keyids: Vec::new(),
            threshold,
        }
    }

    /// Append a key ID; inserting an ID already on the role is a no-op.
    pub fn add_key_id(&mut self, keyid: &str) -> bool {
        if self.keyids.iter().any(|id| id == keyid) {
            return false;
        }
        self.keyids.push(keyid.to_string());
        true
    }

    /// Remove a key ID; returns whether it was present.
    pub fn remove_key_id(&mut self, keyid: &str) -> bool {
        let before = self.keyids.len();
        self.keyids.retain(|id| id != keyid);
        self.keyids.len() != before
    }
}

/// The root role document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "_type", rename = "root")]
pub struct Root {
    pub spec_version: String,
    pub consistent_snapshot: bool,
    pub version: u64,
    pub expires: DateTime<Utc>,
    pub keys: BTreeMap<String, KeyDoc>,
    pub roles: BTreeMap<String, RoleKeys>,
}

impl Root {
    /// A fresh, keyless root at version 0; `init` bumps it to its first
    /// published version.
    pub fn empty(consistent_snapshot: bool, expires: DateTime<Utc>) -> Self {
        let mut roles = BTreeMap::new();
        for name in TOP_LEVEL_ROLES {
            roles.insert(name.to_string(), RoleKeys::new(1));
        }
        Self {
            spec_version: SPEC_VERSION.to_string(),
            consistent_snapshot,
            version: 0,
            expires,
            keys: BTreeMap::new(),
            roles,
        }
    }

    pub fn role(&self, name: &str) -> Option<&RoleKeys> {
        self.roles.get(name)
    }

    pub fn role_mut(&mut self, name: &str) -> Option<&mut RoleKeys> {
        self.roles.get_mut(name)
    }

    /// Insert a key into the key table, returning its primary key ID.
    /// Re-inserting an identical key is a no-op.
    pub fn add_key(&mut self, key: &KeyDoc) -> Result<String> {
        let id = key.key_id()?;
        self.keys.entry(id.clone()).or_insert_with(|| key.clone());
        Ok(id)
    }

    /// True when any role still references `keyid`.
    pub fn key_in_use(&self, keyid: &str) -> bool {
        self.roles
            .values()
            .any(|role| role.keyids.iter().any(|id| id == keyid))
    }
}

/// One entry in the targets map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetFile {
    pub length: u64,
    pub hashes: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom: Option<serde_json::Value>,
}

impl TargetFile {
    /// Describe a payload: length plus sha256/sha512 digests.
    pub fn from_bytes(bytes: &[u8], custom: Option<serde_json::Value>) -> Self {
        use sha2::{Digest, Sha256, Sha512};
        let mut hashes = BTreeMap::new();
        hashes.insert("sha256".to_string(), hex::encode(Sha256::digest(bytes)));
        hashes.insert("sha512".to_string(), hex::encode(Sha512::digest(bytes)));
        Self {
            length: bytes.len() as u64,
            hashes,
            custom,
        }
    }
}

/// The delegations block of a targets document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delegations {
    pub keys: BTreeMap<String, KeyDoc>,
    pub roles: Vec<DelegatedRole>,
}

impl Delegations {
    pub fn new() -> Self {
        Self {
            keys: BTreeMap::new(),
            roles: Vec::new(),
        }
    }

    pub fn role(&self, name: &str) -> Option<&DelegatedRole> {
        self.roles.iter().find(|r| r.name == name)
    }

    pub fn role_mut(&mut self, name: &str) -> Option<&mut DelegatedRole> {
        self.roles.iter_mut().find(|r| r.name == name)
    }
}

impl Default for Delegations {
    fn default() -> Self {
        Self::new()
    }
}

/// A delegated targets role under the top-level targets document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegatedRole {
    pub name: String,
    pub keyids: Vec<String>,
    pub paths: Vec<String>,
    pub threshold: usize,
    pub terminating: bool,
}

/// The targets role document (top-level or delegated)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "_type", rename = "targets")]
pub struct Targets {
    pub spec_version: String,
    pub version: u64,
    pub expires: DateTime<Utc>,
    pub targets: BTreeMap<String, TargetFile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delegations: Option<Delegations>,
}

impl Targets {
    pub fn empty(expires: DateTime<Utc>) -> Self {
        Self {
            spec_version: SPEC_VERSION.to_string(),
            version: 0,
            expires,
            targets: BTreeMap::new(),
            delegations: None,
        }
    }
}

/// Length, hashes, and version of one tracked manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestMeta {
    pub length: u64,
    pub hashes: BTreeMap<String, String>,
    pub version: u64,
}

/// The snapshot role document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "_type", rename = "snapshot")]
pub struct Snapshot {
    pub spec_version: String,
    pub version: u64,
    pub expires: DateTime<Utc>,
    pub meta: BTreeMap<String, ManifestMeta>,
}

/// The timestamp role document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "_type", rename = "timestamp")]
pub struct Timestamp {
    pub spec_version: String,
    pub version: u64,
    pub expires: DateTime<Utc>,
    pub meta: BTreeMap<String, ManifestMeta>,
}

/// The version/expiration header shared by every signed payload, used when
/// reporting metadata state without caring which role it is.
#[derive(Debug, Clone, Deserialize)]
pub struct SignedHeader {
    #[serde(rename = "_type")]
    pub type_name: String,
    pub version: u64,
    pub expires: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn expires() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2027, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_role_keys_duplicate_insert_is_noop() {
        let mut role = RoleKeys::new(1);
        assert!(role.add_key_id("abc"));
        assert!(!role.add_key_id("abc"));
        assert_eq!(role.keyids.len(), 1);
    }

    #[test]
    fn test_versioned_manifest_detection() {
        assert!(is_versioned_manifest("1.root.json"));
        assert!(is_versioned_manifest("12.snapshot.json"));
        assert!(!is_versioned_manifest("root.json"));
        assert!(!is_versioned_manifest("registry.npmjs.org.json"));
    }

    #[test]
    fn test_signed_document_roundtrip() {
        let root = Root::empty(true, expires());
        let doc = with_placeholders(&root, &["id1".into(), "id2".into()]).unwrap();
        let bytes = doc.to_bytes().unwrap();
        let parsed = SignedDocument::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.signatures.len(), 2);
        assert!(parsed.has_pre_entries());
        let root2: Root = parsed.parse_payload().unwrap();
        assert_eq!(root2, root);
    }

    #[test]
    fn test_root_type_tag_on_wire() {
        let root = Root::empty(false, expires());
        let value = serde_json::to_value(&root).unwrap();
        assert_eq!(value["_type"], "root");
        assert_eq!(value["spec_version"], SPEC_VERSION);
    }

    #[test]
    fn test_collected_signatures_strip_placeholders() {
        let mut doc = with_placeholders(
            &Timestamp {
                spec_version: SPEC_VERSION.into(),
                version: 1,
                expires: expires(),
                meta: BTreeMap::new(),
            },
            &["a".into(), "b".into()],
        )
        .unwrap();
        doc.signatures[1].sig = "abcd".into();
        let collected = doc.collected_signatures();
        assert_eq!(collected.len(), 1);
        assert_eq!(collected[0].keyid, "b");
    }

    #[test]
    fn test_canonical_payload_stable_under_key_reordering() {
        let a: SignedDocument = serde_json::from_str(
            r#"{"signatures":[],"signed":{"version":1,"_type":"snapshot"}}"#,
        )
        .unwrap();
        let b: SignedDocument = serde_json::from_str(
            r#"{"signatures":[],"signed":{"_type":"snapshot","version":1}}"#,
        )
        .unwrap();
        assert_eq!(
            a.canonical_payload().unwrap(),
            b.canonical_payload().unwrap()
        );
    }
}
