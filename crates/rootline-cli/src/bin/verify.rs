//! Auditor tooling: verify hardware-key attestations and repository state.

use chrono::{NaiveDate, TimeZone, Utc};
use clap::{Parser, Subcommand};
use rootline_core::error::{CeremonyError, Result};
use rootline_core::keys::KeyFormat;
use rootline_repo::attest::{cert_pem_to_der, load_keys_dir};
use rootline_repo::client::{remote_for, update_from_trusted_root};
use rootline_repo::store::FileSystemStore;
use rootline_repo::verify::{verify_staged, RoleStatus};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "verify", version, about = "Verify ceremony keys and repository metadata")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate the attestation chain of every key under keys/.
    Keys {
        /// Vendor root CA certificate (PEM)
        #[arg(long)]
        root: PathBuf,
        /// Path to the keys/ directory
        #[arg(long = "key-directory")]
        key_directory: PathBuf,
    },

    /// Verify repository metadata.
    ///
    /// With --staged, partially verifies the staged metadata in a local
    /// repository, reporting signature counts per role. Otherwise runs a
    /// full client update from a trusted root against a local directory
    /// or HTTP remote.
    Repository {
        /// Path or URL of the repository
        #[arg(long)]
        repository: String,
        /// Verify staged metadata only (partial signatures allowed)
        #[arg(long)]
        staged: bool,
        /// Trusted root.json, required unless --staged
        #[arg(long)]
        root: Option<PathBuf>,
        /// Require role expirations at or after this date (YYYY/MM/DD)
        #[arg(long = "valid-until")]
        valid_until: Option<String>,
        /// Restrict the expiration check to these roles (repeatable)
        #[arg(long = "role")]
        roles: Vec<String>,
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
        Command::Keys {
            root,
            key_directory,
        } => verify_keys(&root, &key_directory),
        Command::Repository {
            repository,
            staged,
            root,
            valid_until,
            roles,
        } => {
            if staged {
                verify_staged_repository(&repository)
            } else {
                verify_full_repository(&repository, root, valid_until, &roles)
            }
        }
    }
}

fn verify_keys(root: &PathBuf, key_directory: &PathBuf) -> Result<()> {
    let ca_der = cert_pem_to_der(&std::fs::read(root)?)?;
    let keys = load_keys_dir(key_directory)?;

    for key in &keys {
        key.verify(&ca_der)?;
        let keyid = key.key_doc(KeyFormat::Pem)?.key_id()?;
        println!("VERIFIED KEY WITH SERIAL NUMBER {}", key.serial);
        println!("\tTUF key id: {keyid}");
    }

    let dir = key_directory.display();
    println!();
    println!("# To manually verify the chain for any serial number");
    println!("\texport SERIAL_NUMBER=<serial>");
    println!(
        "\topenssl verify -verbose -x509_strict -CAfile <(cat {root} {dir}/${{SERIAL_NUMBER}}/${{SERIAL_NUMBER}}_device_cert.pem) {dir}/${{SERIAL_NUMBER}}/${{SERIAL_NUMBER}}_key_cert.pem",
        root = root.display()
    );
    println!();
    println!("# To manually extract the public key for any serial number and match with published");
    println!("\topenssl x509 -in {dir}/${{SERIAL_NUMBER}}/${{SERIAL_NUMBER}}_key_cert.pem -pubkey -noout");
    println!("\tcat {dir}/${{SERIAL_NUMBER}}/${{SERIAL_NUMBER}}_pubkey.pem");
    Ok(())
}

fn describe(status: &RoleStatus) -> String {
    match status {
        RoleStatus::Verified => "signatures valid and threshold achieved".to_string(),
        RoleStatus::Partial { valid, threshold } => {
            format!("contains {valid}/{threshold} valid signatures")
        }
        RoleStatus::Unsigned { threshold } => format!("contains 0/{threshold} valid signatures"),
    }
}

fn verify_staged_repository(repository: &str) -> Result<()> {
    println!("STAGED METADATA at {repository}");
    let store = FileSystemStore::open(repository)?;
    for report in verify_staged(&store)? {
        println!(
            "{}: version {}, expires {} — {}",
            report.name,
            report.version,
            report.expires.format("%Y/%m/%d"),
            describe(&report.status),
        );
        if let Some(previous) = &report.previous_root {
            println!("\tagainst previous root: {}", describe(previous));
        }
    }
    Ok(())
}

fn verify_full_repository(
    repository: &str,
    root: Option<PathBuf>,
    valid_until: Option<String>,
    roles: &[String],
) -> Result<()> {
    let root = root.ok_or_else(|| {
        CeremonyError::Config("a trusted root is required for full verification".to_string())
    })?;
    let trusted_root = std::fs::read(root)?;

    println!("VERIFYING TUF CLIENT UPDATE");
    let remote = remote_for(repository);
    let state = update_from_trusted_root(&trusted_root, remote.as_ref())?;

    println!("Client updated to:");
    for (role, header) in &state.versions {
        println!(
            "\t{role} version {}, expires {}",
            header.version,
            header.expires.format("%Y/%m/%d")
        );
    }
    for (name, bytes) in &state.downloaded {
        println!("Retrieved target {name} ({} bytes)", bytes.len());
        println!("{}", String::from_utf8_lossy(bytes));
    }

    if let Some(valid_until) = valid_until {
        let date = NaiveDate::parse_from_str(&valid_until, "%Y/%m/%d")
            .map_err(|e| CeremonyError::Config(format!("invalid --valid-until date: {e}")))?;
        let deadline = Utc
            .from_utc_datetime(&date.and_hms_opt(0, 0, 0).expect("midnight is valid"));
        for (role, header) in &state.versions {
            if !roles.is_empty() && !roles.contains(role) {
                continue;
            }
            if header.expires < deadline {
                return Err(CeremonyError::Config(format!(
                    "{role} will expire on {}",
                    header.expires.format("%Y/%m/%d")
                )));
            }
        }
    }
    Ok(())
}
