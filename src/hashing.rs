//! Content hashing and block arithmetic
//!
//! File contents are identified by the hex-encoded SHA-256 of the full byte
//! sequence. The block store works in fixed 64 KiB blocks; the constants here
//! are shared with every store implementation.

use sha2::{Digest, Sha256};

/// Fixed block size shared with the block store
pub const BLOCK_SIZE: usize = 64 * 1024;

/// Hash a buffer with SHA-256 and return the lowercase hex digest
pub fn sha256_hex(buf: &[u8]) -> String {
	let mut hasher = Sha256::new();
	hasher.update(buf);
	hex::encode(hasher.finalize())
}

/// Number of blocks needed for `len` bytes. A zero-length file stores zero
/// blocks (its hash is still well-defined).
pub fn block_count(len: u64) -> u64 {
	len.div_ceil(BLOCK_SIZE as u64)
}

/// Split a buffer into store blocks. All blocks are `BLOCK_SIZE` bytes except
/// a shorter final block; empty input yields no blocks.
pub fn split_blocks(buf: &[u8]) -> Vec<Vec<u8>> {
	buf.chunks(BLOCK_SIZE).map(|chunk| chunk.to_vec()).collect()
}

/// True for a lowercase 64-character hex string (a SHA-256 digest)
pub fn is_hash_hex(s: &str) -> bool {
	s.len() == 64 && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}


// vim: ts=4
