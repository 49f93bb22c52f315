use std::collections::HashMap;

use colsieve_base::{err_kind, ErrorKind, Result};
use colsieve_common::{default_str_hash, StrHashFn};
use serde::{Deserialize, Serialize};

/// String collations the index can hash string attributes under. Equal
/// strings under a collation hash equally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Collation {
    LibcCi,
    LibcCs,
    Utf8GeneralCi,
    Binary,
}

fn ascii_ci_hash(s: &[u8], seed: u64) -> u64 {
    default_str_hash(&s.to_ascii_lowercase(), seed)
}

fn utf8_ci_hash(s: &[u8], seed: u64) -> u64 {
    default_str_hash(String::from_utf8_lossy(s).to_lowercase().as_bytes(), seed)
}

/// Maps collations to string hash functions. Passed to every index open
/// and build; the default holds all built-in collations.
#[derive(Clone, Debug)]
pub struct CollationRegistry {
    hashes: HashMap<Collation, StrHashFn>,
}

impl Default for CollationRegistry {
    fn default() -> Self {
        let mut reg = CollationRegistry::empty();
        reg.register(Collation::LibcCi, ascii_ci_hash);
        reg.register(Collation::LibcCs, default_str_hash);
        reg.register(Collation::Utf8GeneralCi, utf8_ci_hash);
        reg.register(Collation::Binary, default_str_hash);
        reg
    }
}

impl CollationRegistry {
    pub fn empty() -> Self {
        CollationRegistry {
            hashes: HashMap::new(),
        }
    }

    pub fn register(&mut self, collation: Collation, hash: StrHashFn) {
        self.hashes.insert(collation, hash);
    }

    pub fn get(&self, collation: Collation) -> Result<StrHashFn> {
        self.hashes.get(&collation).copied().ok_or_else(|| {
            err_kind(
                ErrorKind::UnknownName,
                format!("collation {:?} is not registered", collation),
            )
        })
    }
}
