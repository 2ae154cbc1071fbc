//! Derive Address: print the deposit address at a derivation index.
//!
//! Reads `MNEMONIC` and the optional `DERIVATION_PATH` from the environment
//! (or `.env`) and prints addresses only. Private keys are never printed.
//!
//! Usage:
//!   cargo run --bin derive-address -- <index> [count]

use std::env;

use anyhow::{Context, Result};
use secrecy::SecretString;

use deposit_sweeper::infra::{DEFAULT_DERIVATION_PATH_PREFIX, HdWallet};

fn usage() -> ! {
    eprintln!("usage: derive-address <index> [count]");
    std::process::exit(2);
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let mut args = env::args().skip(1);
    let Some(start) = args.next() else { usage() };
    let start: u32 = start.parse().context("index must be a non-negative integer")?;
    let count: u32 = match args.next() {
        Some(c) => c.parse().context("count must be a positive integer")?,
        None => 1,
    };
    if count == 0 {
        usage();
    }

    let mnemonic = env::var("MNEMONIC").context("MNEMONIC not set")?;
    let prefix = env::var("DERIVATION_PATH")
        .ok()
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| DEFAULT_DERIVATION_PATH_PREFIX.to_string());
    let wallet = HdWallet::from_mnemonic(&SecretString::from(mnemonic), prefix)
        .context("Failed to load MNEMONIC")?;

    for index in start..start.saturating_add(count) {
        let key = wallet.derive(index)?;
        println!("{}\t{}\t{}", index, wallet.path_for(index), key.address);
    }
    Ok(())
}
