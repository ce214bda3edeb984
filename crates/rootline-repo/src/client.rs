//! Client-style repository verification
//!
//! Replays the standard TUF update flow against a published repository:
//! seed trust from a caller-supplied root, walk the root version chain,
//! then verify timestamp → snapshot → targets (and delegations) with hash
//! and length checks before downloading every target. This is the
//! cross-check that a ceremony actually produced a repository clients can
//! consume.

use crate::store::hashed_target_name;
use crate::verify::KeyDb;
use rootline_core::error::{CeremonyError, Result};
use rootline_core::metadata::{
    ManifestMeta, Root, SignedDocument, SignedHeader, Snapshot, TargetFile, Targets, Timestamp,
};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::PathBuf;
use tracing::{debug, info};

/// Remote side of the TUF update: metadata by name, targets by path.
pub trait RemoteStore {
    /// Fetch a metadata file; `Ok(None)` when the file does not exist.
    fn fetch_meta(&self, name: &str) -> Result<Option<Vec<u8>>>;

    /// Fetch a target payload by repository-relative path.
    fn fetch_target(&self, path: &str) -> Result<Vec<u8>>;
}

/// Remote store over a local repository directory
pub struct FileRemote {
    base: PathBuf,
}

impl FileRemote {
    /// `repo_dir` is the ceremony directory; only its committed
    /// `repository/` subtree is visible to the client.
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            base: repo_dir.into().join("repository"),
        }
    }
}

impl RemoteStore for FileRemote {
    fn fetch_meta(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let path = self.base.join(name);
        if !path.is_file() {
            return Ok(None);
        }
        Ok(Some(std::fs::read(path)?))
    }

    fn fetch_target(&self, path: &str) -> Result<Vec<u8>> {
        std::fs::read(self.base.join("targets").join(path))
            .map_err(|e| CeremonyError::Remote(format!("target {path}: {e}")))
    }
}

/// Remote store over the standard TUF HTTP layout
pub struct HttpRemote {
    base: String,
}

impl HttpRemote {
    pub fn new(base: impl Into<String>) -> Self {
        let mut base = base.into();
        while base.ends_with('/') {
            base.pop();
        }
        Self { base }
    }

    fn get(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let url = format!("{}/{path}", self.base);
        debug!(url = %url, "fetching");
        match ureq::get(&url).call() {
            Ok(response) => {
                let mut bytes = Vec::new();
                response
                    .into_reader()
                    .read_to_end(&mut bytes)
                    .map_err(|e| CeremonyError::Remote(format!("reading {url}: {e}")))?;
                Ok(Some(bytes))
            }
            Err(ureq::Error::Status(404, _)) => Ok(None),
            Err(e) => Err(CeremonyError::Remote(format!("fetching {url}: {e}"))),
        }
    }
}

impl RemoteStore for HttpRemote {
    fn fetch_meta(&self, name: &str) -> Result<Option<Vec<u8>>> {
        self.get(name)
    }

    fn fetch_target(&self, path: &str) -> Result<Vec<u8>> {
        self.get(&format!("targets/{path}"))?
            .ok_or_else(|| CeremonyError::Remote(format!("target {path} not found")))
    }
}

/// Pick the remote backend for a repository location: an HTTP(S) base URL
/// or a local directory path.
pub fn remote_for(location: &str) -> Box<dyn RemoteStore> {
    if location.starts_with("http://") || location.starts_with("https://") {
        Box::new(HttpRemote::new(location))
    } else {
        Box::new(FileRemote::new(location))
    }
}

/// Result of a successful client update
pub struct ClientState {
    /// Version/expiration header per verified role
    pub versions: BTreeMap<String, SignedHeader>,
    /// Every trusted target (top-level and delegated)
    pub targets: BTreeMap<String, TargetFile>,
    /// Downloaded and hash-checked target payloads
    pub downloaded: BTreeMap<String, Vec<u8>>,
}

fn check_recorded(name: &str, bytes: &[u8], recorded: &ManifestMeta) -> Result<()> {
    if bytes.len() as u64 != recorded.length {
        return Err(CeremonyError::HashMismatch(name.to_string()));
    }
    if let Some(sha256) = recorded.hashes.get("sha256") {
        if hex::encode(Sha256::digest(bytes)) != *sha256 {
            return Err(CeremonyError::HashMismatch(name.to_string()));
        }
    }
    Ok(())
}

/// Run the full update flow from a trusted root against `remote`.
pub fn update_from_trusted_root(
    trusted_root: &[u8],
    remote: &dyn RemoteStore,
) -> Result<ClientState> {
    let mut root_doc = SignedDocument::from_bytes(trusted_root)?;
    let mut root: Root = root_doc.parse_payload()?;
    let mut db = KeyDb::from_root(&root)?;
    db.verify_role(&root_doc, "root")?;
    info!(version = root.version, "client initialized from trusted root");

    // Walk the root version chain; each step must satisfy both the
    // previous and the new root role.
    loop {
        let next_version = root.version + 1;
        let Some(bytes) = remote.fetch_meta(&format!("{next_version}.root.json"))? else {
            break;
        };
        let next_doc = SignedDocument::from_bytes(&bytes)?;
        let next_root: Root = next_doc.parse_payload()?;
        if next_root.version != next_version {
            return Err(CeremonyError::SignatureInvalid(format!(
                "root chain: expected version {next_version}, got {}",
                next_root.version
            )));
        }
        let next_db = KeyDb::from_root(&next_root)?;
        db.verify_role(&next_doc, "root")?;
        next_db.verify_role(&next_doc, "root")?;
        info!(version = next_root.version, "root rolled forward");
        root = next_root;
        root_doc = next_doc;
        db = next_db;
    }

    let consistent = root.consistent_snapshot;
    let mut versions = BTreeMap::new();
    versions.insert("root".to_string(), root_doc.parse_payload::<SignedHeader>()?);

    let timestamp_doc = SignedDocument::from_bytes(
        &remote
            .fetch_meta("timestamp.json")?
            .ok_or_else(|| CeremonyError::MissingMetadata("timestamp.json".to_string()))?,
    )?;
    db.verify_role(&timestamp_doc, "timestamp")?;
    let timestamp: Timestamp = timestamp_doc.parse_payload()?;
    versions.insert("timestamp".to_string(), timestamp_doc.parse_payload()?);

    let snapshot_meta = timestamp
        .meta
        .get("snapshot.json")
        .ok_or_else(|| CeremonyError::MissingMetadata("snapshot meta entry".to_string()))?;
    let snapshot_doc = fetch_tracked(remote, "snapshot.json", snapshot_meta, consistent)?;
    db.verify_role(&snapshot_doc, "snapshot")?;
    let snapshot: Snapshot = snapshot_doc.parse_payload()?;
    versions.insert("snapshot".to_string(), snapshot_doc.parse_payload()?);

    let targets_meta = snapshot
        .meta
        .get("targets.json")
        .ok_or_else(|| CeremonyError::MissingMetadata("targets meta entry".to_string()))?;
    let targets_doc = fetch_tracked(remote, "targets.json", targets_meta, consistent)?;
    db.verify_role(&targets_doc, "targets")?;
    let targets: Targets = targets_doc.parse_payload()?;
    versions.insert("targets".to_string(), targets_doc.parse_payload()?);

    let mut all_targets = targets.targets.clone();
    if let Some(delegations) = &targets.delegations {
        let mut delegated_db = KeyDb::new();
        for (keyid, key) in &delegations.keys {
            delegated_db.add_key(keyid, key)?;
        }
        for role in &delegations.roles {
            delegated_db.add_role(
                &role.name,
                rootline_core::metadata::RoleKeys {
                    keyids: role.keyids.clone(),
                    threshold: role.threshold,
                },
            );
        }
        for role in &delegations.roles {
            let manifest = format!("{}.json", role.name);
            let Some(meta) = snapshot.meta.get(&manifest) else {
                // Delegation declared but no manifest published yet.
                continue;
            };
            let doc = fetch_tracked(remote, &manifest, meta, consistent)?;
            delegated_db.verify_role(&doc, &role.name)?;
            let delegated: Targets = doc.parse_payload()?;
            versions.insert(role.name.clone(), doc.parse_payload()?);
            all_targets.extend(delegated.targets);
        }
    }

    let mut downloaded = BTreeMap::new();
    for (path, target) in &all_targets {
        let fetch_path = if consistent {
            let sha256 = target
                .hashes
                .get("sha256")
                .ok_or_else(|| CeremonyError::HashMismatch(path.clone()))?;
            hashed_target_name(path, sha256)
        } else {
            path.clone()
        };
        let bytes = remote.fetch_target(&fetch_path)?;
        if bytes.len() as u64 != target.length
            || target.hashes.get("sha256").map(String::as_str)
                != Some(hex::encode(Sha256::digest(&bytes)).as_str())
        {
            return Err(CeremonyError::HashMismatch(path.clone()));
        }
        info!(path = %path, bytes = bytes.len(), "retrieved target");
        downloaded.insert(path.clone(), bytes);
    }

    Ok(ClientState {
        versions,
        targets: all_targets,
        downloaded,
    })
}

fn fetch_tracked(
    remote: &dyn RemoteStore,
    name: &str,
    recorded: &ManifestMeta,
    consistent: bool,
) -> Result<SignedDocument> {
    let fetch_name = if consistent {
        format!("{}.{name}", recorded.version)
    } else {
        name.to_string()
    };
    let bytes = remote
        .fetch_meta(&fetch_name)?
        .ok_or_else(|| CeremonyError::MissingMetadata(fetch_name.clone()))?;
    check_recorded(name, &bytes, recorded)?;

    let doc = SignedDocument::from_bytes(&bytes)?;
    let header: SignedHeader = doc.parse_payload()?;
    if header.version != recorded.version {
        return Err(CeremonyError::SignatureInvalid(format!(
            "{name}: tracked version {} but document says {}",
            recorded.version, header.version
        )));
    }
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_remote_reads_committed_tree_only() {
        let td = TempDir::new().unwrap();
        std::fs::create_dir_all(td.path().join("repository/targets")).unwrap();
        std::fs::write(td.path().join("repository/root.json"), b"{}").unwrap();
        std::fs::write(td.path().join("repository/targets/foo.txt"), b"abc").unwrap();

        let remote = FileRemote::new(td.path());
        assert_eq!(remote.fetch_meta("root.json").unwrap().unwrap(), b"{}");
        assert!(remote.fetch_meta("timestamp.json").unwrap().is_none());
        assert_eq!(remote.fetch_target("foo.txt").unwrap(), b"abc");
    }

    #[test]
    fn test_http_base_trailing_slash_trimmed() {
        let remote = HttpRemote::new("https://tuf.example.org/repo///");
        assert_eq!(remote.base, "https://tuf.example.org/repo");
    }

    #[test]
    fn test_check_recorded_rejects_length_and_hash_drift() {
        let bytes = b"payload";
        let good = crate::engine::manifest_meta(bytes, 1);
        check_recorded("x.json", bytes, &good).unwrap();

        let mut short = good.clone();
        short.length = 1;
        assert!(check_recorded("x.json", bytes, &short).is_err());

        let mut wrong = good.clone();
        wrong
            .hashes
            .insert("sha256".to_string(), hex::encode([0u8; 32]));
        assert!(check_recorded("x.json", bytes, &wrong).is_err());
    }
}
