//! Path hashing functions for the placement ring.

use md5::Md5;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

/// Hashes a path into the ring's key space.
pub trait PathHasher: Send + Sync {
    /// Width `B` of the key space `[0, 2^B)`.
    fn key_bits(&self) -> u32;

    fn hash(&self, path: &str) -> BigUint;
}

/// 128-bit MD5 digest, read big-endian.
#[derive(Debug, Clone, Copy, Default)]
pub struct Md5Hasher;

impl PathHasher for Md5Hasher {
    fn key_bits(&self) -> u32 {
        128
    }

    fn hash(&self, path: &str) -> BigUint {
        BigUint::from_bytes_be(&Md5::digest(path.as_bytes()))
    }
}

/// 160-bit SHA-1 digest, read big-endian.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha1Hasher;

impl PathHasher for Sha1Hasher {
    fn key_bits(&self) -> u32 {
        160
    }

    fn hash(&self, path: &str) -> BigUint {
        BigUint::from_bytes_be(&Sha1::digest(path.as_bytes()))
    }
}

/// Hash function selection as it appears in configuration files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum HashKind {
    #[default]
    Md5,
    Sha1,
}

impl HashKind {
    pub fn hasher(self) -> Box<dyn PathHasher> {
        match self {
            HashKind::Md5 => Box::new(Md5Hasher),
            HashKind::Sha1 => Box::new(Sha1Hasher),
        }
    }
}
