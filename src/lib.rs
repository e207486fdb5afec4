//! Vault Config Sync Library
//!
//! Converges a Vault server onto a declared configuration tree: ACL policies under
//! `sys/policy`, auth mounts under `sys/auth`, and every other directory as generic
//! JSON documents written to the mirroring API path.
//! Tests are included in the module files (e.g., reconciler/walker.rs).

pub mod config;
pub mod constants;
pub mod document;
pub mod reconciler;
pub mod sync;
pub mod template;
pub mod vault;
