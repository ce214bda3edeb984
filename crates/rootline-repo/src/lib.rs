//! # Rootline Repo
//!
//! Repository-side machinery of the rootline ceremony toolkit: the
//! filesystem store with its staged/committed split, the hardware-key
//! attestation layer, the metadata engine that drives init → sign →
//! snapshot → timestamp → publish, the delegation manager, and the
//! verification pipeline (staged partial verification plus a full
//! client-style update).

pub mod attest;
pub mod client;
pub mod config;
pub mod delegation;
pub mod engine;
pub mod signing;
pub mod store;
pub mod verify;

pub use attest::{load_keys_dir, AttestedKey};
pub use client::{remote_for, update_from_trusted_root, ClientState, FileRemote, HttpRemote};
pub use config::TargetsConfig;
pub use delegation::{add_delegation, DelegationOptions};
pub use engine::{default_expiration, InitOptions, Repository, DEFAULT_THRESHOLD};
pub use signing::{sign_meta, sign_roles};
pub use store::FileSystemStore;
pub use verify::{verify_staged, KeyDb, RoleStatus, StagedReport};
