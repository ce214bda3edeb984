//! Ceremony driver: stage, sign, and publish a TUF repository.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use clap::{ArgGroup, Parser, Subcommand};
use rootline_core::error::Result;
use rootline_core::keys::KeyFormat;
use rootline_core::pae::{sign_key_pop, verify_key_pop};
use rootline_core::signer::resolve_signer;
use rootline_repo::delegation::{add_delegation, key_id_for_role, public_key_for_id};
use rootline_repo::engine::{InitOptions, Repository, DEFAULT_THRESHOLD};
use rootline_repo::signing::sign_roles;
use rootline_repo::{DelegationOptions, TargetsConfig};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tuf", version, about = "Stage, sign, and publish a TUF repository ceremony")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Initialize or rotate a staged repository.
    ///
    /// Reads offline keys from keys/, installs the online snapshot and
    /// timestamp keys, copies the configured targets, and bumps
    /// root.version by one. Signature placeholders are installed for
    /// every offline key holder.
    Init {
        /// Path to the staged repository
        #[arg(long)]
        repository: PathBuf,
        /// Path to the previous repository when rotating
        #[arg(long)]
        previous: Option<PathBuf>,
        /// Root and targets signer threshold
        #[arg(long, default_value_t = DEFAULT_THRESHOLD)]
        threshold: usize,
        /// Reference to the online snapshot signer
        #[arg(long)]
        snapshot: String,
        /// Reference to the online timestamp signer
        #[arg(long)]
        timestamp: String,
        /// Path to the target configuration file
        #[arg(long = "target-meta")]
        target_meta: PathBuf,
        /// Directory the configured target paths are relative to
        #[arg(long, default_value = ".")]
        targets: PathBuf,
        /// Publish with consistent snapshots
        #[arg(long, action = clap::ArgAction::Set, default_value_t = true)]
        consistent_snapshot: bool,
        /// Emit offline key documents in the deprecated hex format
        #[arg(long)]
        deprecated_key_format: bool,
    },

    /// Install or update a named delegation under top-level targets.
    AddDelegation {
        /// Path to the staged repository
        #[arg(long)]
        repository: PathBuf,
        /// Name of the delegatee
        #[arg(long)]
        name: String,
        /// Public key reference for the delegatee (repeatable)
        #[arg(long = "public-key", required = true)]
        public_keys: Vec<String>,
        /// Delegation signer threshold
        #[arg(long, default_value_t = 1)]
        threshold: usize,
        /// Path to a target configuration file
        #[arg(long = "target-meta")]
        target_meta: Option<PathBuf>,
    },

    /// Sign the metadata for the listed roles.
    ///
    /// Signing snapshot or timestamp requires the higher roles to verify
    /// first. One of --sk or --key must be provided.
    #[command(group = ArgGroup::new("signer").required(true).args(["sk", "key"]))]
    Sign {
        /// Path to the staged repository
        #[arg(long)]
        repository: PathBuf,
        /// Role(s) to sign (repeatable)
        #[arg(long = "roles", required = true)]
        roles: Vec<String>,
        /// Use a hardware key for signing
        #[arg(long)]
        sk: bool,
        /// Reference to a signer (PEM file or KMS URI)
        #[arg(long)]
        key: Option<String>,
        /// Bump the delegated role's version before signing
        #[arg(long)]
        bump_version: bool,
        /// Derive the signer's key ID in the deprecated hex format
        #[arg(long)]
        deprecated_key_format: bool,
    },

    /// Write the snapshot document over the current root and targets,
    /// clearing their placeholder signature slots.
    Snapshot {
        /// Path to the staged repository
        #[arg(long)]
        repository: PathBuf,
    },

    /// Write the timestamp document over the current snapshot.
    Timestamp {
        /// Path to the staged repository
        #[arg(long)]
        repository: PathBuf,
    },

    /// Validate all staged roles and commit them to repository/.
    Publish {
        /// Path to the staged repository
        #[arg(long)]
        repository: PathBuf,
    },

    /// Sign a proof of possession of a key; the base64 signature is
    /// printed to stdout.
    #[command(group = ArgGroup::new("signer").required(true).args(["sk", "key"]))]
    KeyPopSign {
        /// The challenge to sign; for a delegate this is the role name
        #[arg(long)]
        challenge: String,
        /// The nonce delivered out of band to the key holder
        #[arg(long)]
        nonce: String,
        /// Use a hardware key for signing
        #[arg(long)]
        sk: bool,
        /// Reference to a signer (PEM file or KMS URI)
        #[arg(long)]
        key: Option<String>,
    },

    /// Verify a proof of possession of a delegate key.
    #[command(group = ArgGroup::new("delegate").required(true).args(["keyid", "role"]))]
    KeyPopVerify {
        /// The challenge that was signed
        #[arg(long)]
        challenge: String,
        /// The nonce delivered out of band
        #[arg(long)]
        nonce: String,
        /// Base64 encoded signature to verify
        #[arg(long)]
        sig: String,
        /// Path to the staged repository
        #[arg(long)]
        repository: PathBuf,
        /// Key ID of the delegation
        #[arg(long)]
        keyid: Option<String>,
        /// Delegation name to resolve the key from
        #[arg(long)]
        role: Option<String>,
    },
}

fn main() {
    rootline_cli::init_logging();
    let cli = Cli::parse();
    if let Err(err) = run(cli.command) {
        rootline_cli::fail(err);
    }
}

fn run(command: Command) -> Result<()> {
    match command {
        Command::Init {
            repository,
            previous,
            threshold,
            snapshot,
            timestamp,
            target_meta,
            targets,
            consistent_snapshot,
            deprecated_key_format,
        } => {
            let mut repo = Repository::open(repository)?;
            repo.init(&InitOptions {
                previous,
                threshold,
                targets_config: TargetsConfig::from_file(target_meta)?,
                targets_dir: targets,
                snapshot_ref: snapshot,
                timestamp_ref: timestamp,
                consistent_snapshot,
                format: key_format(deprecated_key_format),
            })
        }

        Command::AddDelegation {
            repository,
            name,
            public_keys,
            threshold,
            target_meta,
        } => {
            let mut repo = Repository::open(repository)?;
            let mut opts = DelegationOptions::new(name);
            opts.key_refs = public_keys;
            opts.threshold = threshold;
            opts.targets_config = target_meta.map(TargetsConfig::from_file).transpose()?;
            add_delegation(&mut repo, &opts)
        }

        Command::Sign {
            repository,
            roles,
            sk,
            key,
            bump_version,
            deprecated_key_format,
        } => {
            let signer = resolve_signer(sk, key.as_deref().unwrap_or_default())?;
            let mut repo = Repository::open(repository)?;
            sign_roles(
                &mut repo,
                &roles,
                signer.as_ref(),
                key_format(deprecated_key_format),
                bump_version,
            )
        }

        Command::Snapshot { repository } => Repository::open(repository)?.snapshot(),

        Command::Timestamp { repository } => Repository::open(repository)?.timestamp(),

        Command::Publish { repository } => {
            let mut repo = Repository::open(repository)?;
            repo.publish()?;
            println!("Metadata successfully validated and committed!");
            Ok(())
        }

        Command::KeyPopSign {
            challenge,
            nonce,
            sk,
            key,
        } => {
            let signer = resolve_signer(sk, key.as_deref().unwrap_or_default())?;
            let sig = sign_key_pop(signer.as_ref(), &challenge, &nonce)?;
            println!("{}", BASE64.encode(sig));
            Ok(())
        }

        Command::KeyPopVerify {
            challenge,
            nonce,
            sig,
            repository,
            keyid,
            role,
        } => {
            let repo = Repository::open(repository)?;
            let keyid = match (keyid, role) {
                (Some(keyid), _) => keyid,
                (None, Some(role)) => {
                    let inferred = key_id_for_role(&repo, &role)?;
                    eprintln!("Verifying using keyid {inferred}");
                    inferred
                }
                (None, None) => unreachable!("clap enforces the delegate group"),
            };
            let public_key = public_key_for_id(&repo, &keyid)?;
            let sig = BASE64.decode(sig)?;
            verify_key_pop(&public_key, &challenge, &nonce, &sig)?;
            println!("Signature verified ok");
            Ok(())
        }
    }
}

fn key_format(deprecated: bool) -> KeyFormat {
    if deprecated {
        KeyFormat::Legacy
    } else {
        KeyFormat::Pem
    }
}
