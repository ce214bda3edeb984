//! Delegation manager
//!
//! Installs and refreshes delegated-targets roles under the top-level
//! targets document. The targets signatures collected so far are preserved
//! across the rewrite, and the targets version is left unchanged so a
//! mid-ceremony delegation update does not invalidate the staged chain.

use crate::config::TargetsConfig;
use crate::engine::{default_expiration, Repository};
use rootline_core::error::{CeremonyError, Result};
use rootline_core::keys::{KeyDoc, KeyFormat};
use rootline_core::metadata::{
    DelegatedRole, Delegations, SignedDocument, TargetFile, Targets,
};
use rootline_core::signer::resolve_verifier;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Options for [`add_delegation`]
pub struct DelegationOptions {
    /// Name of the delegated role
    pub name: String,
    /// Path pattern the role is trusted for (defaults to `<name>/*`)
    pub path: String,
    /// Whether the delegation terminates the search
    pub terminating: bool,
    /// Public-key references (PEM files) for the delegatee
    pub key_refs: Vec<String>,
    /// Signing threshold of the delegated role
    pub threshold: usize,
    /// Targets to add to / delete from the delegation
    pub targets_config: Option<TargetsConfig>,
    /// Directory against which the configured target paths are resolved
    pub targets_dir: PathBuf,
}

impl DelegationOptions {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            path: format!("{name}/*"),
            name,
            terminating: true,
            key_refs: Vec::new(),
            threshold: 1,
            targets_config: None,
            targets_dir: PathBuf::from("."),
        }
    }
}

/// Install or refresh a delegation under the top-level targets role.
///
/// Idempotent on the delegation name: an existing role is updated in place
/// rather than duplicated. Target payloads named by the configuration are
/// staged under their relative paths and recorded in the delegated role's
/// own manifest.
pub fn add_delegation(repo: &mut Repository, opts: &DelegationOptions) -> Result<()> {
    if opts.key_refs.len() < opts.threshold {
        return Err(CeremonyError::InvalidThreshold {
            role: opts.name.clone(),
            threshold: opts.threshold,
            count: opts.key_refs.len(),
        });
    }
    if opts.path.is_empty() {
        return Err(CeremonyError::Config("empty delegation path".to_string()));
    }

    let targets_doc = repo.signed_meta("targets.json")?;
    let saved_signatures = targets_doc.signatures.clone();
    let mut targets: Targets = targets_doc.parse_payload()?;
    let saved_version = targets.version;

    let mut keys = Vec::new();
    let mut ids = Vec::new();
    for key_ref in &opts.key_refs {
        let verifier = resolve_verifier(key_ref)?;
        let doc = KeyDoc::from_verifying_key(&verifier, KeyFormat::Pem)?;
        ids.push(doc.key_id()?);
        keys.push(doc);
    }

    let delegations = targets.delegations.get_or_insert_with(Delegations::new);
    for (id, doc) in ids.iter().zip(&keys) {
        delegations.keys.insert(id.clone(), doc.clone());
    }
    match delegations.role_mut(&opts.name) {
        Some(existing) => {
            info!(name = %opts.name, "delegation already present, refreshing");
            existing.keyids = ids;
            existing.paths = vec![opts.path.clone()];
            existing.threshold = opts.threshold;
            existing.terminating = opts.terminating;
        }
        None => {
            info!(name = %opts.name, path = %opts.path, "adding targets delegation");
            delegations.roles.push(DelegatedRole {
                name: opts.name.clone(),
                keyids: ids,
                paths: vec![opts.path.clone()],
                threshold: opts.threshold,
                terminating: opts.terminating,
            });
        }
    }
    targets.expires = default_expiration("targets");

    if let Some(config) = &opts.targets_config {
        for path in config.delete.keys() {
            targets.targets.remove(path);
        }
        if !config.add.is_empty() {
            apply_delegated_targets(repo, &opts.name, config, &opts.targets_dir)?;
        }
    }

    // The staged signatures still match nothing after this rewrite, but
    // the slots themselves must survive for the signing session.
    targets.version = saved_version;
    let restored = SignedDocument::new(serde_json::to_value(&targets)?, saved_signatures);
    repo.store().set_meta("targets.json", &restored.to_bytes()?)
}

/// Stage the configured payloads and record them in the delegated role's
/// own targets manifest.
fn apply_delegated_targets(
    repo: &mut Repository,
    role: &str,
    config: &TargetsConfig,
    targets_dir: &Path,
) -> Result<()> {
    let manifest = format!("{role}.json");
    let (mut delegated, saved_signatures) = match repo.signed_meta(&manifest) {
        Ok(doc) => (doc.parse_payload::<Targets>()?, doc.signatures),
        Err(CeremonyError::MissingMetadata(_)) => {
            let mut fresh = Targets::empty(default_expiration(role));
            fresh.version = 1;
            (fresh, Vec::new())
        }
        Err(e) => return Err(e),
    };

    for (path, custom) in &config.add {
        repo.store().stage_target(path, &targets_dir.join(path))?;
        let bytes = fs::read(repo.store().staged_target_path(path))?;
        delegated
            .targets
            .insert(path.clone(), TargetFile::from_bytes(&bytes, custom.clone()));
    }
    delegated.expires = default_expiration(role);

    let doc = SignedDocument::new(serde_json::to_value(&delegated)?, saved_signatures);
    repo.store().set_meta(&manifest, &doc.to_bytes()?)
}

/// Resolve a delegation's single key ID from the staged targets document,
/// for proof-of-possession verification.
pub fn key_id_for_role(repo: &Repository, role: &str) -> Result<String> {
    let targets = repo.targets()?;
    let delegations = targets
        .delegations
        .ok_or_else(|| CeremonyError::UnknownDelegation(role.to_string()))?;
    let delegated = delegations
        .role(role)
        .ok_or_else(|| CeremonyError::UnknownDelegation(role.to_string()))?;
    if delegated.keyids.len() != 1 {
        return Err(CeremonyError::UnknownKey(format!(
            "found {} keys for role {role}, expected 1",
            delegated.keyids.len()
        )));
    }
    Ok(delegated.keyids[0].clone())
}

/// Resolve a delegate public key by its key ID from the staged targets
/// document.
pub fn public_key_for_id(repo: &Repository, keyid: &str) -> Result<p256::ecdsa::VerifyingKey> {
    let targets = repo.targets()?;
    let delegations = targets
        .delegations
        .ok_or_else(|| CeremonyError::UnknownKey(keyid.to_string()))?;
    let key = delegations
        .keys
        .get(keyid)
        .ok_or_else(|| CeremonyError::UnknownKey(keyid.to_string()))?;
    key.verifying_key()
}
