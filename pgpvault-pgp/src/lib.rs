//! OpenPGP key normalization: decode, generate and import entities, and keep
//! them in a [`pgpvault_core::Storage`] under caller-assigned names.

pub mod codec;
mod gateway;
mod generate;
mod import;
mod service;

pub use codec::{Entity, Identity, Subkey};
pub use gateway::KeyStore;
pub use generate::generate;
pub use import::{import, import_for_storage};
pub use service::{KeyService, ServiceConfig};
