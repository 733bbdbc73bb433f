//! Length-prefixed bit strings used to address nodes of the sparse map.
//!
//! Encoding: one length byte (0 stands for 256) followed by the bits packed
//! MSB-first into `ceil(len / 8)` bytes. The zero-length path has no length
//! byte at all, which keeps it distinct from a full 256-bit path.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Longest path we can address: one bit per map level.
pub const MAX_BITS: usize = 256;

#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BitPath(Vec<u8>);

impl BitPath {
    /// The canonical zero-length path.
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Path of the given bits, first element is bit 0.
    pub fn from_bits(bits: &[bool]) -> Self {
        pack(bits.len(), bits.iter().copied())
    }

    /// SHA-256 of `key`, taken as a full 256-bit path.
    pub fn from_key(key: &[u8]) -> Self {
        let digest = Sha256::digest(key);
        let mut rv = Vec::with_capacity(1 + digest.len());
        rv.push(0); // 256
        rv.extend_from_slice(&digest);
        Self(rv)
    }

    /// Encoded form, suitable for use inside storage keys.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        match self.0.first() {
            None => 0,
            Some(0) => MAX_BITS,
            Some(l) => *l as usize,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Value of bit `idx`. Panics if `idx` is past the end of the path.
    pub fn bit_at(&self, idx: usize) -> bool {
        assert!(idx < self.len(), "bit {} out of range for path of length {}", idx, self.len());
        (self.0[1 + idx / 8] >> (7 - (idx % 8))) & 1 == 1
    }

    /// Bits `[start, end)` as a new path.
    pub fn slice(&self, start: usize, end: usize) -> BitPath {
        assert!(
            start <= end && end <= self.len(),
            "slice {}..{} out of range for path of length {}",
            start,
            end,
            self.len()
        );
        pack(end - start, (start..end).map(|i| self.bit_at(i)))
    }

    /// `a` followed by `b`.
    pub fn join(a: &BitPath, b: &BitPath) -> BitPath {
        let (la, lb) = (a.len(), b.len());
        pack(
            la + lb,
            (0..la).map(|i| a.bit_at(i)).chain((0..lb).map(|i| b.bit_at(i))),
        )
    }

    /// Number of leading bits `a` and `b` agree on.
    pub fn common_prefix_length(a: &BitPath, b: &BitPath) -> usize {
        let limit = a.len().min(b.len());
        (0..limit).take_while(|&i| a.bit_at(i) == b.bit_at(i)).count()
    }

    pub fn bits(&self) -> impl Iterator<Item = bool> + '_ {
        (0..self.len()).map(move |i| self.bit_at(i))
    }
}

fn pack(len: usize, bits: impl Iterator<Item = bool>) -> BitPath {
    if len == 0 {
        return BitPath::empty();
    }
    assert!(len <= MAX_BITS, "path of {} bits exceeds {}", len, MAX_BITS);

    let mut rv = vec![0u8; 1 + (len + 7) / 8];
    rv[0] = (len % MAX_BITS) as u8;
    for (j, bit) in bits.enumerate() {
        if bit {
            rv[1 + j / 8] |= 1 << (7 - (j % 8));
        }
    }
    BitPath(rv)
}

impl fmt::Display for BitPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for bit in self.bits() {
            f.write_str(if bit { "1" } else { "0" })?;
        }
        Ok(())
    }
}

impl fmt::Debug for BitPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BitPath({}:{})", self.len(), self)
    }
}
