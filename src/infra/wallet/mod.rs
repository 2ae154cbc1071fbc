//! Custody primitives: HD derivation of child keys and their encryption at rest.

pub mod derivation;
pub mod secret_store;

pub use derivation::{
    DEFAULT_DERIVATION_PATH_PREFIX, DerivedKey, HdWallet, address_from_private_key,
};
pub use secret_store::SecretStore;
