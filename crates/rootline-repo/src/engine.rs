//! Metadata engine
//!
//! A [`Repository`] owns the repository directory for the lifetime of a
//! subcommand and performs every mutation of the four top-level role
//! documents: initialization and key rotation, target management, snapshot
//! and timestamp generation, and the final commit. Role-key manipulation
//! is expressed over the in-memory [`Root`] document and written back with
//! signature placeholders installed for every authorized offline key.

use crate::attest::load_keys_dir;
use crate::config::TargetsConfig;
use crate::store::{hashed_target_name, FileSystemStore};
use crate::verify::KeyDb;
use chrono::{DateTime, Duration, Months, Utc};
use rootline_core::error::{CeremonyError, Result};
use rootline_core::keys::{KeyDoc, KeyFormat};
use rootline_core::metadata::{
    is_top_level_role, is_versioned_manifest, with_placeholders, ManifestMeta, Root, RoleKeys,
    SignedDocument, SignedHeader, Snapshot, TargetFile, Targets, Timestamp, TopRole,
    SPEC_VERSION, TOP_LEVEL_ROLES,
};
use rootline_core::signer::resolve_signer;
use sha2::{Digest, Sha256, Sha512};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Default signing threshold for the root and targets roles
pub const DEFAULT_THRESHOLD: usize = 3;

/// Expiration assigned to a role's metadata at init time.
///
/// Offline roles get six months; the online snapshot and timestamp roles
/// get 21 and 14 days. Delegated roles inherit the targets expiration.
pub fn default_expiration(role: &str) -> DateTime<Utc> {
    let now = Utc::now();
    let expires = match role.parse::<TopRole>() {
        Ok(TopRole::Root) | Ok(TopRole::Targets) => now + Months::new(6),
        Ok(TopRole::Snapshot) => now + Duration::days(21),
        Ok(TopRole::Timestamp) => now + Duration::days(14),
        Err(_) => {
            warn!(role, "no explicit expiration for role, using targets default");
            now + Months::new(6)
        }
    };
    // Whole-second timestamps keep the documents byte-stable across
    // serialize/parse cycles.
    DateTime::from_timestamp(expires.timestamp(), 0).expect("expiration in representable range")
}

/// Insert `key` into the root key table (if absent) and onto `role`'s key
/// list (if absent); extends the document expiration when `expires` is
/// later. Returns whether the role changed.
pub fn add_verification_key(
    root: &mut Root,
    role: &str,
    key: &KeyDoc,
    expires: DateTime<Utc>,
) -> Result<bool> {
    let id = root.add_key(key)?;
    let role_keys = root
        .roles
        .entry(role.to_string())
        .or_insert_with(|| RoleKeys::new(1));
    let changed = role_keys.add_key_id(&id);
    if expires > root.expires {
        root.expires = expires;
    }
    Ok(changed)
}

/// Remove `keyid` from `role`; the key leaves the root key table only once
/// no role references it.
pub fn revoke_key(root: &mut Root, role: &str, keyid: &str) -> bool {
    let removed = match root.role_mut(role) {
        Some(role_keys) => role_keys.remove_key_id(keyid),
        None => false,
    };
    if removed && !root.key_in_use(keyid) {
        root.keys.remove(keyid);
        info!(keyid, "revoked key removed from root key table");
    }
    removed
}

/// Rotate `role` to exactly `keys`: the symmetric difference against the
/// current key set decides what is added and what is revoked.
pub fn update_role_keys(
    root: &mut Root,
    role: &str,
    keys: &[KeyDoc],
    expires: DateTime<Utc>,
) -> Result<()> {
    let mut target = BTreeSet::new();
    for key in keys {
        target.insert(key.key_id()?);
    }
    let existing: Vec<String> = root
        .role(role)
        .map(|r| r.keyids.clone())
        .unwrap_or_default();

    for key in keys {
        add_verification_key(root, role, key, expires)?;
    }
    for old in existing {
        if !target.contains(&old) {
            revoke_key(root, role, &old);
        }
    }
    Ok(())
}

/// Set `role`'s signing threshold; fails when the role has fewer keys.
pub fn set_threshold(root: &mut Root, role: &str, threshold: usize) -> Result<()> {
    let role_keys = root
        .role_mut(role)
        .ok_or_else(|| CeremonyError::UnknownDelegation(role.to_string()))?;
    if threshold > role_keys.keyids.len() {
        return Err(CeremonyError::InvalidThreshold {
            role: role.to_string(),
            threshold,
            count: role_keys.keyids.len(),
        });
    }
    role_keys.threshold = threshold;
    Ok(())
}

/// Length, hashes, and version entry for a manifest or target payload.
pub fn manifest_meta(bytes: &[u8], version: u64) -> ManifestMeta {
    ManifestMeta {
        length: bytes.len() as u64,
        hashes: payload_hashes(bytes),
        version,
    }
}

fn payload_hashes(bytes: &[u8]) -> BTreeMap<String, String> {
    let mut hashes = BTreeMap::new();
    hashes.insert("sha256".to_string(), hex::encode(Sha256::digest(bytes)));
    hashes.insert("sha512".to_string(), hex::encode(Sha512::digest(bytes)));
    hashes
}

/// Options for [`Repository::init`]
pub struct InitOptions {
    /// Previous repository to chain from when rotating
    pub previous: Option<PathBuf>,
    /// Signing threshold for root and targets
    pub threshold: usize,
    /// Targets to stage into the top-level targets role
    pub targets_config: TargetsConfig,
    /// Directory against which the configured target paths are resolved
    pub targets_dir: PathBuf,
    /// Signer reference for the online snapshot role
    pub snapshot_ref: String,
    /// Signer reference for the online timestamp role
    pub timestamp_ref: String,
    /// Whether the published repository uses consistent snapshots
    pub consistent_snapshot: bool,
    /// On-wire format for the offline keys' documents
    pub format: KeyFormat,
}

/// Exclusive handle over one ceremony repository directory
#[derive(Debug)]
pub struct Repository {
    store: FileSystemStore,
}

impl Repository {
    /// Open a repository directory, laying out the staged tree if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            store: FileSystemStore::open(dir)?,
        })
    }

    /// The underlying store.
    pub fn store(&self) -> &FileSystemStore {
        &self.store
    }

    /// Read a manifest as a signed document, staged over committed.
    pub fn signed_meta(&self, name: &str) -> Result<SignedDocument> {
        SignedDocument::from_bytes(&self.store.meta(name)?)
    }

    /// The current root document.
    pub fn root(&self) -> Result<Root> {
        self.signed_meta("root.json")?.parse_payload()
    }

    /// The current top-level targets document.
    pub fn targets(&self) -> Result<Targets> {
        self.signed_meta("targets.json")?.parse_payload()
    }

    /// The root document one version behind the current one, for rollover
    /// validation.
    pub fn previous_root(&self) -> Result<Root> {
        let root = self.root()?;
        if root.version < 2 {
            return Err(CeremonyError::NoPreviousRoot);
        }
        self.signed_meta(&format!("{}.root.json", root.version - 1))?
            .parse_payload()
    }

    fn coalesced_version(&self, name: &str) -> u64 {
        self.version_of(self.store.meta(name).ok())
    }

    fn committed_version(&self, name: &str) -> u64 {
        self.version_of(self.store.committed_meta(name).ok())
    }

    fn version_of(&self, bytes: Option<Vec<u8>>) -> u64 {
        bytes
            .and_then(|b| SignedDocument::from_bytes(&b).ok())
            .and_then(|doc| doc.parse_payload::<SignedHeader>().ok())
            .map(|h| h.version)
            .unwrap_or(0)
    }

    /// Create or rotate the staged root and targets documents.
    ///
    /// Offline keys are read from `keys/`, online snapshot/timestamp keys
    /// from their signer references. Keys no longer provisioned are
    /// revoked; root.version is bumped by exactly one; placeholder
    /// signature slots are installed for every authorized offline key —
    /// on root, the union of previous and current root keys, so holders of
    /// rotated-out keys can still countersign the rollover.
    pub fn init(&mut self, opts: &InitOptions) -> Result<()> {
        if let Some(previous) = &opts.previous {
            self.seed_from_previous(previous)?;
            if self.store.meta("root.json").is_err() {
                return Err(CeremonyError::NoPreviousRoot);
            }
        }
        let cur_root_version = self.coalesced_version("root.json");

        let mut root = match self.signed_meta("root.json") {
            Ok(doc) => doc.parse_payload::<Root>()?,
            Err(CeremonyError::MissingMetadata(_)) => {
                info!(directory = %self.store.base_dir().display(), "initializing repository");
                Root::empty(opts.consistent_snapshot, default_expiration("root"))
            }
            Err(e) => return Err(e),
        };

        // A re-init starts the targets role over: stale delegations from a
        // prior ceremony must not survive silently.
        let mut targets = match self.signed_meta("targets.json") {
            Ok(doc) => doc.parse_payload::<Targets>()?,
            Err(CeremonyError::MissingMetadata(_)) => {
                Targets::empty(default_expiration("targets"))
            }
            Err(e) => return Err(e),
        };
        targets.delegations = None;
        targets.version = self.committed_version("targets.json") + 1;
        targets.expires = default_expiration("targets");

        let hsm_keys = load_keys_dir(&self.store.keys_dir())?;
        let mut key_docs = Vec::with_capacity(hsm_keys.len());
        for key in &hsm_keys {
            key_docs.push(key.key_doc(opts.format)?);
        }
        let mut current_ids = Vec::with_capacity(key_docs.len());
        for doc in &key_docs {
            current_ids.push(doc.key_id()?);
        }

        // Root placeholders span the union of the outgoing and incoming
        // key sets; targets placeholders use only the incoming set.
        let mut root_placeholder_ids: BTreeSet<String> = root
            .role("root")
            .map(|r| r.keyids.iter().cloned().collect())
            .unwrap_or_default();
        root_placeholder_ids.extend(current_ids.iter().cloned());

        for role in ["root", "targets"] {
            update_role_keys(&mut root, role, &key_docs, default_expiration(role))?;
            set_threshold(&mut root, role, opts.threshold)?;
        }

        for (role, key_ref) in [
            ("snapshot", &opts.snapshot_ref),
            ("timestamp", &opts.timestamp_ref),
        ] {
            let signer = resolve_signer(false, key_ref)?;
            let doc = signer.key_doc(KeyFormat::Pem)?;
            update_role_keys(&mut root, role, &[doc], default_expiration(role))?;
            set_threshold(&mut root, role, 1)?;
        }

        let mut expected = BTreeSet::new();
        for (path, custom) in &opts.targets_config.add {
            let base = Path::new(path)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| CeremonyError::Config(format!("invalid target path {path}")))?;
            self.store.stage_target(&base, &opts.targets_dir.join(path))?;
            let bytes = fs::read(self.store.staged_target_path(&base))?;
            targets
                .targets
                .insert(base.clone(), TargetFile::from_bytes(&bytes, custom.clone()));
            expected.insert(base);
        }
        targets.targets.retain(|name, _| expected.contains(name));

        let targets_doc = with_placeholders(&targets, &current_ids)?;
        self.store.set_meta("targets.json", &targets_doc.to_bytes()?)?;

        root.version = cur_root_version + 1;
        root.expires = default_expiration("root");
        root.consistent_snapshot = opts.consistent_snapshot;
        let root_ids: Vec<String> = root_placeholder_ids.into_iter().collect();
        let root_doc = with_placeholders(&root, &root_ids)?;
        self.store.set_meta("root.json", &root_doc.to_bytes()?)?;

        info!(
            version = root.version,
            keys = current_ids.len(),
            threshold = opts.threshold,
            "staged root and targets"
        );
        Ok(())
    }

    /// Copy the previous repository's committed tree when rotating into a
    /// fresh ceremony directory.
    fn seed_from_previous(&self, previous: &Path) -> Result<()> {
        let src = previous.join("repository");
        let dest = self.store.base_dir().join("repository");
        if src == dest || dest.join("root.json").is_file() || !src.is_dir() {
            return Ok(());
        }
        copy_tree(&src, &dest)
    }

    /// Copy a payload into `staged/targets/` and upsert it into the
    /// preferred role's targets map, preserving the manifest's signature
    /// slots. The role's expiration is extended when `expires` is later.
    pub fn add_target(
        &mut self,
        path: &str,
        source: &Path,
        custom: Option<serde_json::Value>,
        expires: DateTime<Utc>,
        preferred_role: &str,
    ) -> Result<()> {
        let manifest = format!("{preferred_role}.json");
        let doc = self.signed_meta(&manifest)?;
        let mut targets: Targets = doc.parse_payload()?;

        self.store.stage_target(path, source)?;
        let bytes = fs::read(self.store.staged_target_path(path))?;
        targets
            .targets
            .insert(path.to_string(), TargetFile::from_bytes(&bytes, custom));
        if expires > targets.expires {
            targets.expires = expires;
        }

        let rewritten = SignedDocument::new(serde_json::to_value(&targets)?, doc.signatures);
        self.store.set_meta(&manifest, &rewritten.to_bytes()?)
    }

    /// Drop an entry from the top-level targets map. Delegated roles keep
    /// their entries; removing across roles risks corrupting a delegation
    /// another party is signing.
    pub fn remove_target(&mut self, path: &str) -> Result<()> {
        let doc = self.signed_meta("targets.json")?;
        let mut targets: Targets = doc.parse_payload()?;
        if targets.targets.remove(path).is_none() {
            warn!(path, "remove-target: no such entry");
        }
        let rewritten = SignedDocument::new(serde_json::to_value(&targets)?, doc.signatures);
        self.store.set_meta("targets.json", &rewritten.to_bytes()?)
    }

    /// Strip placeholder signature slots from a staged manifest.
    pub fn clear_empty_signatures(&mut self, name: &str) -> Result<()> {
        let doc = self.signed_meta(name)?;
        let collected = doc.collected_signatures();
        let cleared = SignedDocument::new(doc.signed, collected);
        self.store.set_meta(name, &cleared.to_bytes()?)
    }

    /// Generate the snapshot document over the current bytes of every
    /// targets-chain manifest plus root, clearing placeholder slots on
    /// root and targets.
    ///
    /// Root and targets must verify against the current key DB first; on
    /// any failure the touched staged manifests are restored.
    pub fn snapshot(&mut self) -> Result<()> {
        let touched = [
            TopRole::Root.manifest(),
            TopRole::Targets.manifest(),
            TopRole::Snapshot.manifest(),
        ];
        let saved: Vec<(String, Option<Vec<u8>>)> = touched
            .iter()
            .map(|name| {
                let staged = self
                    .store
                    .file_is_staged(name)
                    .then(|| self.store.meta(name))
                    .transpose()?;
                Ok((name.to_string(), staged))
            })
            .collect::<Result<_>>()?;

        let result = self.snapshot_inner();
        if result.is_err() {
            for (name, bytes) in saved {
                match bytes {
                    Some(bytes) => self.store.set_meta(&name, &bytes)?,
                    None => self.store.remove_staged(&name)?,
                }
            }
        }
        result
    }

    fn snapshot_inner(&mut self) -> Result<()> {
        let db = KeyDb::from_store(&self.store)?;
        for role in ["root", "targets"] {
            let doc = self.signed_meta(&format!("{role}.json"))?;
            db.verify_role(&doc, role)
                .map_err(|e| CeremonyError::PreRequisiteFailed {
                    role: "snapshot".to_string(),
                    source: Box::new(e),
                })?;
        }

        for name in ["root.json", "targets.json"] {
            self.clear_empty_signatures(name)?;
        }

        let mut meta = BTreeMap::new();
        for (name, bytes) in self.store.get_meta()? {
            if is_versioned_manifest(&name) || name == "snapshot.json" || name == "timestamp.json" {
                continue;
            }
            let doc = SignedDocument::from_bytes(&bytes)?;
            let header: SignedHeader = doc.parse_payload()?;
            meta.insert(name, manifest_meta(&bytes, header.version));
        }

        let snapshot = Snapshot {
            spec_version: SPEC_VERSION.to_string(),
            version: self.coalesced_version("snapshot.json") + 1,
            expires: default_expiration("snapshot"),
            meta,
        };
        let doc = with_placeholders(&snapshot, &[])?;
        self.store.set_meta("snapshot.json", &doc.to_bytes()?)?;
        info!(version = snapshot.version, "staged snapshot");
        Ok(())
    }

    /// Generate the timestamp document over the current snapshot bytes.
    /// The snapshot must verify first.
    pub fn timestamp(&mut self) -> Result<()> {
        let db = KeyDb::from_store(&self.store)?;
        let doc = self.signed_meta("snapshot.json")?;
        db.verify_role(&doc, "snapshot")
            .map_err(|e| CeremonyError::PreRequisiteFailed {
                role: "timestamp".to_string(),
                source: Box::new(e),
            })?;

        let bytes = self.store.meta("snapshot.json")?;
        let header: SignedHeader = SignedDocument::from_bytes(&bytes)?.parse_payload()?;
        let mut meta = BTreeMap::new();
        meta.insert("snapshot.json".to_string(), manifest_meta(&bytes, header.version));

        let timestamp = Timestamp {
            spec_version: SPEC_VERSION.to_string(),
            version: self.coalesced_version("timestamp.json") + 1,
            expires: default_expiration("timestamp"),
            meta,
        };
        let doc = with_placeholders(&timestamp, &[])?;
        self.store.set_meta("timestamp.json", &doc.to_bytes()?)?;
        info!(version = timestamp.version, "staged timestamp");
        Ok(())
    }

    /// Bump a delegated role's version ahead of re-signing. Top-level
    /// roles are refused; their versions move through init/snapshot/
    /// timestamp. Existing signatures are dropped — they no longer match
    /// the payload.
    pub fn bump_delegated_version(&mut self, role: &str) -> Result<()> {
        if is_top_level_role(role) {
            return Err(CeremonyError::UnsupportedVersionBump(role.to_string()));
        }
        let manifest = format!("{role}.json");
        let doc = self.signed_meta(&manifest)?;
        let mut targets: Targets = doc.parse_payload()?;
        targets.version += 1;
        let bumped = SignedDocument::new(serde_json::to_value(&targets)?, Vec::new());
        self.store.set_meta(&manifest, &bumped.to_bytes()?)
    }

    /// Validate every staged role against its threshold and the recorded
    /// snapshot/timestamp hashes, then promote the staged tree.
    pub fn publish(&mut self) -> Result<()> {
        for role in TOP_LEVEL_ROLES {
            self.store.meta(&format!("{role}.json"))?;
        }

        let db = KeyDb::from_store(&self.store)?;
        for name in self.store.staged_meta_names()? {
            if is_versioned_manifest(&name) {
                continue;
            }
            let role = name.trim_end_matches(".json");
            let doc = self.signed_meta(&name)?;
            db.verify_role(&doc, role)?;
        }

        if let Ok(doc) = self.signed_meta("snapshot.json") {
            let snapshot: Snapshot = doc.parse_payload()?;
            self.check_recorded_meta(&snapshot.meta)?;
        }
        if let Ok(doc) = self.signed_meta("timestamp.json") {
            let timestamp: Timestamp = doc.parse_payload()?;
            self.check_recorded_meta(&timestamp.meta)?;
        }

        let root = self.root()?;
        let referenced = self.referenced_target_names(root.consistent_snapshot)?;
        self.store.commit(root.consistent_snapshot, &referenced)?;
        info!("metadata validated and committed");
        Ok(())
    }

    fn check_recorded_meta(&self, meta: &BTreeMap<String, ManifestMeta>) -> Result<()> {
        for (name, recorded) in meta {
            let bytes = self.store.meta(name)?;
            let actual = manifest_meta(&bytes, recorded.version);
            if actual.length != recorded.length || actual.hashes != recorded.hashes {
                return Err(CeremonyError::HashMismatch(name.clone()));
            }
        }
        Ok(())
    }

    /// Repository-relative target file names referenced by any targets
    /// manifest, under the naming scheme the commit will use.
    fn referenced_target_names(&self, consistent_snapshot: bool) -> Result<BTreeSet<String>> {
        let mut referenced = BTreeSet::new();
        for (name, bytes) in self.store.get_meta()? {
            if is_versioned_manifest(&name) {
                continue;
            }
            let doc = SignedDocument::from_bytes(&bytes)?;
            let header: SignedHeader = doc.parse_payload()?;
            if header.type_name != "targets" {
                continue;
            }
            let targets: Targets = doc.parse_payload()?;
            for (path, target) in &targets.targets {
                if consistent_snapshot {
                    if let Some(sha256) = target.hashes.get("sha256") {
                        referenced.insert(hashed_target_name(path, sha256));
                    }
                } else {
                    referenced.insert(path.clone());
                }
            }
        }
        Ok(referenced)
    }
}

fn copy_tree(src: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let to = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &to)?;
        } else {
            fs::copy(entry.path(), &to)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use p256::ecdsa::SigningKey;
    use rand::rngs::OsRng;

    fn key_doc() -> KeyDoc {
        let key = SigningKey::random(&mut OsRng);
        KeyDoc::from_verifying_key(key.verifying_key(), KeyFormat::Pem).unwrap()
    }

    fn test_root() -> Root {
        Root::empty(true, Utc.with_ymd_and_hms(2027, 1, 1, 0, 0, 0).unwrap())
    }

    #[test]
    fn test_add_verification_key_is_idempotent() {
        let mut root = test_root();
        let key = key_doc();
        let expires = default_expiration("root");

        assert!(add_verification_key(&mut root, "root", &key, expires).unwrap());
        assert!(!add_verification_key(&mut root, "root", &key, expires).unwrap());
        assert_eq!(root.role("root").unwrap().keyids.len(), 1);
        assert_eq!(root.keys.len(), 1);
    }

    #[test]
    fn test_revoke_keeps_key_shared_with_other_role() {
        let mut root = test_root();
        let key = key_doc();
        let expires = default_expiration("root");
        add_verification_key(&mut root, "root", &key, expires).unwrap();
        add_verification_key(&mut root, "targets", &key, expires).unwrap();
        let id = key.key_id().unwrap();

        assert!(revoke_key(&mut root, "root", &id));
        // Still referenced by targets, so the key table keeps it.
        assert!(root.keys.contains_key(&id));

        assert!(revoke_key(&mut root, "targets", &id));
        assert!(!root.keys.contains_key(&id));
    }

    #[test]
    fn test_update_role_keys_applies_symmetric_difference() {
        let mut root = test_root();
        let kept = key_doc();
        let revoked = key_doc();
        let added = key_doc();
        let expires = default_expiration("root");

        update_role_keys(&mut root, "root", &[kept.clone(), revoked.clone()], expires).unwrap();
        update_role_keys(&mut root, "root", &[kept.clone(), added.clone()], expires).unwrap();

        let ids = &root.role("root").unwrap().keyids;
        assert!(ids.contains(&kept.key_id().unwrap()));
        assert!(ids.contains(&added.key_id().unwrap()));
        assert!(!ids.contains(&revoked.key_id().unwrap()));
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn test_set_threshold_rejects_more_than_keys() {
        let mut root = test_root();
        add_verification_key(&mut root, "root", &key_doc(), default_expiration("root")).unwrap();
        assert!(set_threshold(&mut root, "root", 1).is_ok());
        assert!(matches!(
            set_threshold(&mut root, "root", 2),
            Err(CeremonyError::InvalidThreshold { .. })
        ));
    }

    #[test]
    fn test_expirations_follow_the_role_table() {
        let now = Utc::now().timestamp();
        let snapshot = default_expiration("snapshot").timestamp() - now;
        let timestamp = default_expiration("timestamp").timestamp() - now;
        assert!((21 * 86400 - 2..=21 * 86400).contains(&snapshot));
        assert!((14 * 86400 - 2..=14 * 86400).contains(&timestamp));
        assert!(default_expiration("root") > default_expiration("snapshot"));
    }

    #[test]
    fn test_bump_refuses_top_level_roles() {
        let td = tempfile::TempDir::new().unwrap();
        let mut repo = Repository::open(td.path()).unwrap();
        assert!(matches!(
            repo.bump_delegated_version("root"),
            Err(CeremonyError::UnsupportedVersionBump(_))
        ));
    }
}
