//! Content-addressed repository store
//!
//! A ceremony repository is a directory with three lives: `keys/` holds the
//! per-serial hardware-key material (read-only after provisioning),
//! `staged/` holds in-progress role documents and target payloads, and
//! `repository/` holds the committed tree that clients consume. Reads
//! coalesce `staged/` over `repository/`; every mutation is a whole-file
//! write into `staged/`; `commit` promotes the staged tree.

use rootline_core::error::{CeremonyError, Result};
use rootline_core::metadata::{SignedDocument, SignedHeader};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Filesystem store for one ceremony repository
#[derive(Debug)]
pub struct FileSystemStore {
    root: PathBuf,
}

impl FileSystemStore {
    /// Open (or lay out) a store at `dir`. The staged directories are
    /// created eagerly so a fresh ceremony directory is ready for key
    /// provisioning and hand-off through source control.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let root = dir.into();
        fs::create_dir_all(root.join("keys"))?;
        fs::create_dir_all(root.join("staged").join("targets"))?;
        Ok(Self { root })
    }

    /// The repository directory this store owns.
    pub fn base_dir(&self) -> &Path {
        &self.root
    }

    /// Directory of per-serial hardware key material.
    pub fn keys_dir(&self) -> PathBuf {
        self.root.join("keys")
    }

    fn staged_dir(&self) -> PathBuf {
        self.root.join("staged")
    }

    fn committed_dir(&self) -> PathBuf {
        self.root.join("repository")
    }

    /// All metadata by manifest name, staged entries shadowing committed
    /// ones. Versioned copies (`N.role.json`) are included.
    pub fn get_meta(&self) -> Result<BTreeMap<String, Vec<u8>>> {
        let mut meta = BTreeMap::new();
        for dir in [self.committed_dir(), self.staged_dir()] {
            if !dir.is_dir() {
                continue;
            }
            for entry in fs::read_dir(&dir)? {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().into_owned();
                if !name.ends_with(".json") || !entry.file_type()?.is_file() {
                    continue;
                }
                meta.insert(name, fs::read(entry.path())?);
            }
        }
        Ok(meta)
    }

    /// Read one manifest, staged over committed.
    pub fn meta(&self, name: &str) -> Result<Vec<u8>> {
        let staged = self.staged_dir().join(name);
        let path = if staged.is_file() {
            staged
        } else {
            self.committed_dir().join(name)
        };
        fs::read(&path).map_err(|_| CeremonyError::MissingMetadata(name.to_string()))
    }

    /// Read one manifest from the committed tree only.
    pub fn committed_meta(&self, name: &str) -> Result<Vec<u8>> {
        fs::read(self.committed_dir().join(name))
            .map_err(|_| CeremonyError::MissingMetadata(name.to_string()))
    }

    /// Write a manifest into `staged/`. The write is whole-file: a temp
    /// file in the same directory renamed over the destination.
    pub fn set_meta(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let dir = self.staged_dir();
        fs::create_dir_all(&dir)?;
        let tmp = dir.join(format!(".{name}.tmp"));
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, dir.join(name))?;
        debug!(manifest = name, "staged metadata");
        Ok(())
    }

    /// True when a manifest exists in `staged/`.
    pub fn file_is_staged(&self, name: &str) -> bool {
        self.staged_dir().join(name).is_file()
    }

    /// Remove a staged manifest if present.
    pub fn remove_staged(&self, name: &str) -> Result<()> {
        let path = self.staged_dir().join(name);
        if path.is_file() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    /// Names of all staged manifests.
    pub fn staged_meta_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let dir = self.staged_dir();
        if dir.is_dir() {
            for entry in fs::read_dir(dir)? {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().into_owned();
                if name.ends_with(".json") && entry.file_type()?.is_file() {
                    names.push(name);
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Copy a payload into `staged/targets/<rel>`, creating parent
    /// directories. Returns the number of bytes staged.
    pub fn stage_target(&self, rel: &str, source: &Path) -> Result<u64> {
        let dest = self.staged_dir().join("targets").join(rel);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        let n = fs::copy(source, &dest)?;
        info!(path = rel, bytes = n, "staged target payload");
        Ok(n)
    }

    /// Path of a staged target payload.
    pub fn staged_target_path(&self, rel: &str) -> PathBuf {
        self.staged_dir().join("targets").join(rel)
    }

    /// Relative paths of every staged target payload.
    pub fn staged_target_names(&self) -> Result<Vec<String>> {
        let base = self.staged_dir().join("targets");
        let mut names = Vec::new();
        collect_files(&base, &base, &mut names)?;
        names.sort();
        Ok(names)
    }

    /// Promote the staged tree into `repository/`.
    ///
    /// Role manifests move under their plain names; the root manifest is
    /// always also written as `<N>.root.json` (rollover verification needs
    /// the version chain), and with consistent snapshots enabled every
    /// role gets a versioned copy and target payloads move under
    /// `<sha256>.<name>` names. `referenced` lists the repository-relative
    /// target file names that remain live; anything else under
    /// `repository/targets/` is pruned.
    pub fn commit(&self, consistent_snapshot: bool, referenced: &BTreeSet<String>) -> Result<()> {
        let committed = self.committed_dir();
        fs::create_dir_all(committed.join("targets"))?;

        for name in self.staged_meta_names()? {
            let bytes = fs::read(self.staged_dir().join(&name))?;
            let doc = SignedDocument::from_bytes(&bytes)?;
            let header: SignedHeader = doc.parse_payload()?;

            fs::write(committed.join(&name), &bytes)?;
            // Root always keeps its version chain for rollover; other
            // roles get versioned copies under consistent snapshots,
            // except timestamp which clients always fetch unversioned.
            if name == "root.json" || (consistent_snapshot && name != "timestamp.json") {
                fs::write(committed.join(format!("{}.{name}", header.version)), &bytes)?;
            }
            fs::remove_file(self.staged_dir().join(&name))?;
            info!(manifest = %name, version = header.version, "committed metadata");
        }

        for rel in self.staged_target_names()? {
            let src = self.staged_target_path(&rel);
            let bytes = fs::read(&src)?;
            let dest_rel = if consistent_snapshot {
                let digest = hex::encode(Sha256::digest(&bytes));
                hashed_target_name(&rel, &digest)
            } else {
                rel.clone()
            };
            let dest = committed.join("targets").join(&dest_rel);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&dest, &bytes)?;
            fs::remove_file(&src)?;
            info!(path = %dest_rel, "committed target payload");
        }

        self.prune_targets(referenced)?;
        Ok(())
    }

    fn prune_targets(&self, referenced: &BTreeSet<String>) -> Result<()> {
        let base = self.committed_dir().join("targets");
        let mut names = Vec::new();
        collect_files(&base, &base, &mut names)?;
        for rel in names {
            if !referenced.contains(&rel) {
                debug!(path = %rel, "pruning unreferenced target payload");
                fs::remove_file(base.join(&rel))?;
            }
        }
        Ok(())
    }
}

/// The consistent-snapshot name of a target payload: the basename gains a
/// sha256 prefix, directories are preserved.
pub fn hashed_target_name(rel: &str, sha256_hex: &str) -> String {
    match rel.rsplit_once('/') {
        Some((dir, base)) => format!("{dir}/{sha256_hex}.{base}"),
        None => format!("{sha256_hex}.{rel}"),
    }
}

fn collect_files(base: &Path, dir: &Path, out: &mut Vec<String>) -> Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_files(base, &path, out)?;
        } else if let Ok(rel) = path.strip_prefix(base) {
            out.push(rel.to_string_lossy().replace('\\', "/"));
        }
    }
    Ok(())
}
