//! Seed derivation.
//!
//! One master seed fans out into independent sub-streams per concern
//! (`returns`, `regime`, `inflation`) and per path. Adding a concern never
//! changes the streams of existing ones.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use sha2::{Digest, Sha256};

pub const DERIVATION_VERSION: &str = "v1";

pub const RETURNS_LABEL: &str = "returns";
pub const REGIME_LABEL: &str = "regime";
pub const INFLATION_LABEL: &str = "inflation";

/// First 8 bytes (big-endian) of SHA-256 over `master|label|[path|]version`.
pub fn derive_seed(master_seed: i64, label: &str, path_index: Option<u64>) -> i64 {
    let payload = match path_index {
        Some(path) => format!("{master_seed}|{label}|{path}|{DERIVATION_VERSION}"),
        None => format!("{master_seed}|{label}|{DERIVATION_VERSION}"),
    };
    let digest = Sha256::digest(payload.as_bytes());
    let mut head = [0_u8; 8];
    head.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(head)
}

/// Negative master seeds mean "fresh entropy, no reproducibility".
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SeedPolicy {
    Deterministic(i64),
    Entropy,
}

impl SeedPolicy {
    pub fn from_master(master_seed: i64) -> Self {
        if master_seed < 0 {
            SeedPolicy::Entropy
        } else {
            SeedPolicy::Deterministic(master_seed)
        }
    }

    pub fn is_deterministic(self) -> bool {
        matches!(self, SeedPolicy::Deterministic(_))
    }

    pub fn stream(self, label: &str, path_index: Option<u64>) -> ChaCha8Rng {
        match self {
            SeedPolicy::Deterministic(master) => {
                ChaCha8Rng::seed_from_u64(derive_seed(master, label, path_index) as u64)
            }
            SeedPolicy::Entropy => ChaCha8Rng::from_entropy(),
        }
    }
}
