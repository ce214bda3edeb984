//! Signing protocol
//!
//! Implements the placeholder-preserving signing session: a signer's key
//! IDs are intersected with the role's authorized set, matching slots are
//! replaced in place (re-signing by the same key is idempotent), foreign
//! slots are preserved untouched, and fresh entries are appended only when
//! the document carries no pre-entries at all.

use crate::engine::Repository;
use crate::verify::KeyDb;
use rootline_core::error::{CeremonyError, Result};
use rootline_core::keys::KeyFormat;
use rootline_core::metadata::{is_versioned_manifest, Signature, SignedDocument, Targets};
use rootline_core::signer::KeySigner;
use std::collections::BTreeSet;
use tracing::info;

/// Key IDs valid for signing `role`.
///
/// For root this is the union of the previous root's and the current
/// root's key IDs, so a rollover can be countersigned by the outgoing key
/// holders. Other top-level roles use only their current keys. Delegated
/// roles resolve through the delegations of the targets chain.
pub fn signing_key_ids_for_role(repo: &Repository, role: &str) -> Result<BTreeSet<String>> {
    let root = repo.root()?;
    if let Some(role_keys) = root.role(role) {
        let mut ids: BTreeSet<String> = role_keys.keyids.iter().cloned().collect();
        if role == "root" {
            match repo.previous_root() {
                Ok(previous) => {
                    info!(
                        version = previous.version,
                        "adding previous root keys to the authorized set"
                    );
                    let previous_role = previous.role("root").ok_or_else(|| {
                        CeremonyError::MissingMetadata("root role on previous root".to_string())
                    })?;
                    ids.extend(previous_role.keyids.iter().cloned());
                }
                Err(CeremonyError::NoPreviousRoot) => {}
                Err(e) => return Err(e),
            }
        }
        return Ok(ids);
    }

    // Not a top-level role: look it up in the delegations.
    for (name, bytes) in repo.store().get_meta()? {
        if is_versioned_manifest(&name) {
            continue;
        }
        let Ok(doc) = SignedDocument::from_bytes(&bytes) else {
            continue;
        };
        let Ok(targets) = doc.parse_payload::<Targets>() else {
            continue;
        };
        let Some(delegations) = targets.delegations else {
            continue;
        };
        if let Some(delegated) = delegations.role(role) {
            return Ok(delegated.keyids.iter().cloned().collect());
        }
    }
    Err(CeremonyError::UnknownDelegation(role.to_string()))
}

/// Verify the pre-requisites of the requested roles: snapshot requires a
/// valid root and targets, timestamp requires a valid snapshot. Root and
/// targets have none.
pub fn check_prerequisites(repo: &Repository, roles: &[String]) -> Result<()> {
    let db = KeyDb::from_store(repo.store())?;
    for role in roles {
        let required: &[&str] = match role.as_str() {
            "snapshot" => &["root", "targets"],
            "timestamp" => &["snapshot"],
            _ => &[],
        };
        for manifest in required {
            let doc = repo.signed_meta(&format!("{manifest}.json"))?;
            db.verify_role(&doc, manifest)
                .map_err(|e| CeremonyError::PreRequisiteFailed {
                    role: role.clone(),
                    source: Box::new(e),
                })?;
        }
    }
    Ok(())
}

/// Sign the listed roles with `signer`, whose key documents are derived in
/// `format`. With `bump_version`, each (delegated) role's version is
/// incremented before signing.
pub fn sign_roles(
    repo: &mut Repository,
    roles: &[String],
    signer: &dyn KeySigner,
    format: KeyFormat,
    bump_version: bool,
) -> Result<()> {
    check_prerequisites(repo, roles)?;
    for role in roles {
        if bump_version {
            repo.bump_delegated_version(role)?;
        }
        sign_meta(repo, &format!("{role}.json"), signer, format)?;
    }
    Ok(())
}

/// Sign one manifest, preserving every slot the signer does not own.
pub fn sign_meta(
    repo: &mut Repository,
    name: &str,
    signer: &dyn KeySigner,
    format: KeyFormat,
) -> Result<()> {
    info!(manifest = name, "signing metadata");
    let doc = repo.signed_meta(name)?;

    // init installs the placeholders on root and targets; losing them
    // would silently drop other parties' signing slots.
    if (name == "root.json" || name == "targets.json") && !doc.has_pre_entries() {
        return Err(CeremonyError::MissingPreEntries(name.to_string()));
    }

    let payload = doc.canonical_payload()?;
    let sig_hex = hex::encode(signer.sign(&payload)?);

    let signer_id = signer.key_doc(format)?.key_id()?;
    let role = name.trim_end_matches(".json");
    let authorized = signing_key_ids_for_role(repo, role)?;
    if !authorized.contains(&signer_id) {
        return Err(CeremonyError::NotAnAuthorizedSigner {
            role: role.to_string(),
            key_ids: vec![signer_id],
        });
    }

    let mut signatures = Vec::with_capacity(doc.signatures.len() + 1);
    let mut added = false;
    for entry in &doc.signatures {
        if entry.keyid == signer_id {
            signatures.push(Signature {
                keyid: signer_id.clone(),
                sig: sig_hex.clone(),
            });
            added = true;
        } else {
            signatures.push(entry.clone());
        }
    }
    if !added {
        if doc.has_pre_entries() {
            // Placeholders exist but none belongs to this signer.
            return Err(CeremonyError::NotAnAuthorizedSigner {
                role: role.to_string(),
                key_ids: vec![signer_id],
            });
        }
        signatures.push(Signature {
            keyid: signer_id,
            sig: sig_hex,
        });
    }

    let signed = SignedDocument::new(doc.signed, signatures);
    repo.store().set_meta(name, &signed.to_bytes()?)
}
