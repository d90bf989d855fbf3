//! Block checksums for the I/O paths.
//!
//! Checksums are computed over strictly sequential, non-overlapping writes:
//! every [`Checksum::add`] must start exactly where the previous one ended.
//! A write at any other offset cannot be folded into a running digest, so
//! the object flags itself as needing recalculation and rejects the block.
//!
//! The supported algorithms are a closed set ([`ChecksumKind`]) chosen at
//! configuration time.

use std::str::FromStr;

use adler32::RollingAdler32;
use md5::{Digest as _, Md5};
use sha1::Sha1;

/// The supported checksum algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumKind {
    Crc32,
    Adler32,
    Md5,
    Sha1,
}

impl ChecksumKind {
    /// Canonical lower-case name, as it appears in configuration.
    pub fn name(self) -> &'static str {
        match self {
            ChecksumKind::Crc32 => "crc32",
            ChecksumKind::Adler32 => "adler32",
            ChecksumKind::Md5 => "md5",
            ChecksumKind::Sha1 => "sha1",
        }
    }

    /// Digest length in bytes.
    pub fn digest_len(self) -> usize {
        match self {
            ChecksumKind::Crc32 | ChecksumKind::Adler32 => 4,
            ChecksumKind::Md5 => 16,
            ChecksumKind::Sha1 => 20,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown checksum kind: {0}")]
pub struct UnknownChecksumKind(String);

impl FromStr for ChecksumKind {
    type Err = UnknownChecksumKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "crc32" => Ok(ChecksumKind::Crc32),
            "adler" | "adler32" => Ok(ChecksumKind::Adler32),
            "md5" => Ok(ChecksumKind::Md5),
            "sha" | "sha1" => Ok(ChecksumKind::Sha1),
            other => Err(UnknownChecksumKind(other.to_string())),
        }
    }
}

enum State {
    Crc32(crc32fast::Hasher),
    Adler32(RollingAdler32),
    Md5(Md5),
    Sha1(Sha1),
}

impl State {
    fn fresh(kind: ChecksumKind) -> State {
        match kind {
            ChecksumKind::Crc32 => State::Crc32(crc32fast::Hasher::new()),
            ChecksumKind::Adler32 => State::Adler32(RollingAdler32::new()),
            ChecksumKind::Md5 => State::Md5(Md5::new()),
            ChecksumKind::Sha1 => State::Sha1(Sha1::new()),
        }
    }

    fn update(&mut self, buf: &[u8]) {
        match self {
            State::Crc32(h) => h.update(buf),
            State::Adler32(h) => h.update_buffer(buf),
            State::Md5(h) => h.update(buf),
            State::Sha1(h) => h.update(buf),
        }
    }

    fn digest(&self) -> Vec<u8> {
        match self {
            State::Crc32(h) => h.clone().finalize().to_be_bytes().to_vec(),
            State::Adler32(h) => h.hash().to_be_bytes().to_vec(),
            State::Md5(h) => h.clone().finalize().to_vec(),
            State::Sha1(h) => h.clone().finalize().to_vec(),
        }
    }
}

/// A running checksum over sequential block writes.
pub struct Checksum {
    kind: ChecksumKind,
    state: State,
    cursor: u64,
    digest: Vec<u8>,
    finalized: bool,
    needs_recalc: bool,
}

impl Checksum {
    pub fn new(kind: ChecksumKind) -> Self {
        Self {
            kind,
            state: State::fresh(kind),
            cursor: 0,
            digest: Vec::new(),
            finalized: false,
            needs_recalc: false,
        }
    }

    pub fn kind(&self) -> ChecksumKind {
        self.kind
    }

    /// Byte offset the next `add` must start at.
    pub fn offset(&self) -> u64 {
        self.cursor
    }

    /// Fold `buf`, which starts at `offset` in the stream, into the digest.
    ///
    /// Returns `false` (and flags the checksum for recalculation) when
    /// `offset` does not match the running cursor, or when the digest has
    /// already been finalized. The block is not folded in either case.
    pub fn add(&mut self, buf: &[u8], offset: u64) -> bool {
        if self.finalized || offset != self.cursor {
            self.needs_recalc = true;
            return false;
        }
        self.state.update(buf);
        self.cursor += buf.len() as u64;
        true
    }

    /// Whether an out-of-order write has invalidated the running digest.
    pub fn needs_recalculation(&self) -> bool {
        self.needs_recalc
    }

    /// Seal the digest. Idempotent.
    pub fn finalize(&mut self) {
        if !self.finalized {
            self.digest = self.state.digest();
            self.finalized = true;
        }
    }

    /// Discard all state and start a fresh digest of the same kind.
    pub fn reset(&mut self) {
        self.state = State::fresh(self.kind);
        self.cursor = 0;
        self.digest.clear();
        self.finalized = false;
        self.needs_recalc = false;
    }

    /// Finalized digest as lower-case hex. Empty before `finalize`.
    pub fn hex_digest(&self) -> String {
        hex::encode(&self.digest)
    }

    /// Finalized digest bytes. Empty before `finalize`.
    pub fn bin_digest(&self) -> &[u8] {
        &self.digest
    }
}

impl std::fmt::Debug for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Checksum")
            .field("kind", &self.kind.name())
            .field("offset", &self.cursor)
            .field("finalized", &self.finalized)
            .field("needs_recalc", &self.needs_recalc)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest_of(kind: ChecksumKind, data: &[u8]) -> String {
        let mut ck = Checksum::new(kind);
        assert!(ck.add(data, 0));
        ck.finalize();
        ck.hex_digest()
    }

    #[test]
    fn test_known_vectors() {
        // Standard check inputs for each algorithm.
        assert_eq!(digest_of(ChecksumKind::Crc32, b"123456789"), "cbf43926");
        assert_eq!(digest_of(ChecksumKind::Adler32, b"123456789"), "091e01de");
        assert_eq!(
            digest_of(ChecksumKind::Md5, b"abc"),
            "900150983cd24fb0d6963f7d28e17f72"
        );
        assert_eq!(
            digest_of(ChecksumKind::Sha1, b"abc"),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn test_sequential_adds_match_single_add() {
        let mut ck = Checksum::new(ChecksumKind::Crc32);
        assert!(ck.add(b"1234", 0));
        assert!(ck.add(b"56789", 4));
        ck.finalize();
        assert_eq!(ck.hex_digest(), "cbf43926");
        assert_eq!(ck.bin_digest(), &[0xcb, 0xf4, 0x39, 0x26]);
    }

    #[test]
    fn test_offset_mismatch_flags_recalculation() {
        let mut ck = Checksum::new(ChecksumKind::Md5);
        assert!(ck.add(b"abcd", 0));
        assert!(!ck.needs_recalculation());
        // Overlapping write.
        assert!(!ck.add(b"cdef", 2));
        assert!(ck.needs_recalculation());
        // A gap is just as bad.
        assert!(!ck.add(b"xyz", 100));
        assert_eq!(ck.offset(), 4);
    }

    #[test]
    fn test_add_after_finalize_is_rejected() {
        let mut ck = Checksum::new(ChecksumKind::Sha1);
        assert!(ck.add(b"abc", 0));
        ck.finalize();
        assert!(!ck.add(b"more", 3));
        assert!(ck.needs_recalculation());
        // finalize is idempotent
        let before = ck.hex_digest();
        ck.finalize();
        assert_eq!(ck.hex_digest(), before);
    }

    #[test]
    fn test_reset_starts_over() {
        let mut ck = Checksum::new(ChecksumKind::Adler32);
        assert!(ck.add(b"garbage", 0));
        assert!(!ck.add(b"late", 99));
        ck.reset();
        assert!(!ck.needs_recalculation());
        assert_eq!(ck.offset(), 0);
        assert!(ck.bin_digest().is_empty());
        assert!(ck.add(b"123456789", 0));
        ck.finalize();
        assert_eq!(ck.hex_digest(), "091e01de");
    }

    #[test]
    fn test_digest_len_matches_output() {
        for kind in [
            ChecksumKind::Crc32,
            ChecksumKind::Adler32,
            ChecksumKind::Md5,
            ChecksumKind::Sha1,
        ] {
            let mut ck = Checksum::new(kind);
            ck.add(b"x", 0);
            ck.finalize();
            assert_eq!(ck.bin_digest().len(), kind.digest_len());
        }
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!("crc32".parse::<ChecksumKind>().unwrap(), ChecksumKind::Crc32);
        assert_eq!("SHA1".parse::<ChecksumKind>().unwrap(), ChecksumKind::Sha1);
        assert_eq!("adler".parse::<ChecksumKind>().unwrap(), ChecksumKind::Adler32);
        assert!("fletcher".parse::<ChecksumKind>().is_err());
        assert_eq!(ChecksumKind::Md5.name(), "md5");
    }
}
