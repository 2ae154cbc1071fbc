//! BIP-39/BIP-32 derivation of per-user deposit keys.
//!
//! Every user owns one child key at `{prefix}{index}`, by default
//! `m/44'/60'/0'/0/{index}`, so addresses match standard Ethereum wallets.
//! The index comes from the ledger's sequence and is never reused.

use std::str::FromStr;

use alloy::primitives::{Address, hex};
use alloy::signers::local::{MnemonicBuilder, PrivateKeySigner, coins_bip39::English};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use secrecy::{ExposeSecret, SecretString};

use crate::domain::{AppError, WalletError};

/// Standard Ethereum external chain path, index appended
pub const DEFAULT_DERIVATION_PATH_PREFIX: &str = "m/44'/60'/0'/0/";

/// Highest non-hardened child index
const MAX_CHILD_INDEX: u32 = 0x7FFF_FFFF;

/// Keypair derived for a single index
#[derive(Debug)]
pub struct DerivedKey {
    pub index: u32,
    pub address: Address,
    /// Uncompressed SEC1 public key, 0x-prefixed hex
    pub public_key: String,
    /// 0x-prefixed hex secret scalar
    pub private_key: SecretString,
}

/// Hierarchical deterministic wallet rooted at an operator mnemonic
pub struct HdWallet {
    phrase: SecretString,
    path_prefix: String,
}

impl std::fmt::Debug for HdWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HdWallet")
            .field("path_prefix", &self.path_prefix)
            .finish_non_exhaustive()
    }
}

impl HdWallet {
    /// Build a wallet from a mnemonic phrase and path prefix.
    ///
    /// The phrase is validated by deriving index 0, so a bad mnemonic fails
    /// here at startup rather than on the first user provisioning.
    pub fn from_mnemonic(
        phrase: &SecretString,
        path_prefix: impl Into<String>,
    ) -> Result<Self, AppError> {
        let trimmed = phrase.expose_secret().trim();
        if trimmed.is_empty() {
            return Err(WalletError::InvalidMnemonic("mnemonic is empty".to_string()).into());
        }

        let mut path_prefix = path_prefix.into();
        if !path_prefix.starts_with("m/") {
            return Err(WalletError::InvalidMnemonic(format!(
                "derivation path '{}' must start with m/",
                path_prefix
            ))
            .into());
        }
        if !path_prefix.ends_with('/') {
            path_prefix.push('/');
        }

        let wallet = Self {
            phrase: SecretString::from(trimmed.to_string()),
            path_prefix,
        };
        wallet
            .signer_at(0)
            .map_err(|e| WalletError::InvalidMnemonic(e.to_string()))?;
        Ok(wallet)
    }

    /// Full derivation path for an index
    #[must_use]
    pub fn path_for(&self, index: u32) -> String {
        format!("{}{}", self.path_prefix, index)
    }

    /// Derive the address and keypair at `index`
    pub fn derive(&self, index: u32) -> Result<DerivedKey, AppError> {
        let signer = self.signer_at(index)?;
        let public_key = k256::PublicKey::from(signer.credential().verifying_key());

        Ok(DerivedKey {
            index,
            address: signer.address(),
            public_key: hex::encode_prefixed(public_key.to_encoded_point(false).as_bytes()),
            private_key: SecretString::from(hex::encode_prefixed(signer.to_bytes())),
        })
    }

    fn signer_at(&self, index: u32) -> Result<PrivateKeySigner, WalletError> {
        if index > MAX_CHILD_INDEX {
            return Err(WalletError::Derivation {
                index,
                message: "index exceeds the non-hardened range".to_string(),
            });
        }

        MnemonicBuilder::<English>::default()
            .phrase(self.phrase.expose_secret())
            .derivation_path(self.path_for(index))
            .map_err(|e| WalletError::Derivation {
                index,
                message: e.to_string(),
            })?
            .build()
            .map_err(|e| WalletError::Derivation {
                index,
                message: e.to_string(),
            })
    }
}

/// Address controlled by a hex private key
pub fn address_from_private_key(private_key: &SecretString) -> Result<Address, AppError> {
    let signer = PrivateKeySigner::from_str(private_key.expose_secret().trim())
        .map_err(|e| WalletError::InvalidKey(e.to_string()))?;
    Ok(signer.address())
}
