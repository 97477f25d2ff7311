//! Block digest strategies.
//!
//! The diff engine only relies on the contract "same bytes give the same
//! digest, different bytes give a different digest with overwhelming
//! probability". The strategy is picked once from [`DigestKind`] and kept for
//! the lifetime of an engine, so the digest width never changes mid-run.

use crate::error::{CoreError, CoreResult};
use md5::Md5;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Width of a SHA-256 digest in bytes.
pub const SHA256_DIGEST_WIDTH: usize = 32;

/// Width of an MD5 digest in bytes.
pub const MD5_DIGEST_WIDTH: usize = 16;

/// Width of a CRC-32 digest in bytes.
pub const CRC32_DIGEST_WIDTH: usize = 4;

/// Computes fixed-width digests of data blocks.
pub trait BlockDigester: Send + Sync + fmt::Debug {
    /// Human-readable name of the strategy.
    fn name(&self) -> &'static str;

    /// Number of bytes produced per block.
    fn width(&self) -> usize;

    /// Appends exactly [`BlockDigester::width`] digest bytes of `block` to `out`.
    fn digest_into(&self, block: &[u8], out: &mut Vec<u8>);
}

/// Cryptographic block digests (SHA-256).
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha256Digester;

impl BlockDigester for Sha256Digester {
    fn name(&self) -> &'static str {
        "SHA256"
    }

    fn width(&self) -> usize {
        SHA256_DIGEST_WIDTH
    }

    fn digest_into(&self, block: &[u8], out: &mut Vec<u8>) {
        out.extend_from_slice(&Sha256::digest(block));
    }
}

/// MD5 block digests, for runs configured with `DCP_HASH_METHOD=MD5`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Md5Digester;

impl BlockDigester for Md5Digester {
    fn name(&self) -> &'static str {
        "MD5"
    }

    fn width(&self) -> usize {
        MD5_DIGEST_WIDTH
    }

    fn digest_into(&self, block: &[u8], out: &mut Vec<u8>) {
        out.extend_from_slice(&Md5::digest(block));
    }
}

/// Fast block checksums (CRC-32, IEEE polynomial).
#[derive(Debug, Default, Clone, Copy)]
pub struct Crc32Digester;

impl BlockDigester for Crc32Digester {
    fn name(&self) -> &'static str {
        "CRC32"
    }

    fn width(&self) -> usize {
        CRC32_DIGEST_WIDTH
    }

    fn digest_into(&self, block: &[u8], out: &mut Vec<u8>) {
        out.extend_from_slice(&crc32fast::hash(block).to_le_bytes());
    }
}

/// Digest strategy selection, resolved once at initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DigestKind {
    /// SHA-256.
    #[default]
    Sha256,
    /// MD5.
    Md5,
    /// CRC-32.
    Crc32,
}

impl DigestKind {
    /// Builds the digester for this strategy.
    #[must_use]
    pub fn digester(self) -> Box<dyn BlockDigester> {
        match self {
            Self::Sha256 => Box::new(Sha256Digester),
            Self::Md5 => Box::new(Md5Digester),
            Self::Crc32 => Box::new(Crc32Digester),
        }
    }

    /// Digest width in bytes.
    #[must_use]
    pub const fn width(self) -> usize {
        match self {
            Self::Sha256 => SHA256_DIGEST_WIDTH,
            Self::Md5 => MD5_DIGEST_WIDTH,
            Self::Crc32 => CRC32_DIGEST_WIDTH,
        }
    }
}

impl fmt::Display for DigestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sha256 => f.write_str("SHA256"),
            Self::Md5 => f.write_str("MD5"),
            Self::Crc32 => f.write_str("CRC32"),
        }
    }
}

impl FromStr for DigestKind {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s.to_ascii_uppercase().as_str() {
            "SHA256" | "SHA-256" => Ok(Self::Sha256),
            "MD5" => Ok(Self::Md5),
            "CRC32" | "CRC-32" => Ok(Self::Crc32),
            _ => Err(CoreError::invalid_argument(format!(
                "digest method has to be one of 'SHA256', 'MD5' or 'CRC32', got '{s}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest(kind: DigestKind, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        kind.digester().digest_into(data, &mut out);
        out
    }

    #[test]
    fn widths_match_output() {
        for kind in [DigestKind::Sha256, DigestKind::Md5, DigestKind::Crc32] {
            let digester = kind.digester();
            assert_eq!(digester.width(), kind.width());
            assert_eq!(digest(kind, &[7u8; 128]).len(), kind.width());
        }
    }

    #[test]
    fn crc32_known_value() {
        assert_eq!(
            digest(DigestKind::Crc32, b"123456789"),
            0xCBF4_3926u32.to_le_bytes()
        );
    }

    #[test]
    fn sha256_known_prefix() {
        let out = digest(DigestKind::Sha256, b"abc");
        assert_eq!(&out[..4], &[0xba, 0x78, 0x16, 0xbf]);
    }

    #[test]
    fn md5_known_prefix() {
        let out = digest(DigestKind::Md5, b"abc");
        assert_eq!(&out[..4], &[0x90, 0x01, 0x50, 0x98]);
    }

    #[test]
    fn single_byte_change_changes_digest() {
        let mut block = vec![0u8; 128];
        for kind in [DigestKind::Sha256, DigestKind::Md5, DigestKind::Crc32] {
            let before = digest(kind, &block);
            block[100] ^= 1;
            assert_ne!(before, digest(kind, &block));
        }
    }

    #[test]
    fn parse_digest_kind() {
        assert_eq!("crc32".parse::<DigestKind>().unwrap(), DigestKind::Crc32);
        assert_eq!("SHA256".parse::<DigestKind>().unwrap(), DigestKind::Sha256);
        assert_eq!("MD5".parse::<DigestKind>().unwrap(), DigestKind::Md5);
        assert_eq!("md5".parse::<DigestKind>().unwrap(), DigestKind::Md5);
        assert!(matches!(
            "MD4".parse::<DigestKind>(),
            Err(CoreError::InvalidArgument { .. })
        ));
    }
}
