// Copyright 2016 The Grin Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Content hashes: 32-byte SHA-256 digests used to address immutable blobs,
//! plus the two derived forms the wire protocol relies on — a nonce-salted
//! challenge hash and a `hash:sig` pair carrying blob-reconstruction
//! material alongside the hash.

use std::fmt;
use std::str::FromStr;

use sha2::{Digest, Sha256};

use crate::error::Error;

pub const HASH_LEN: usize = 32;

/// A SHA-256 content hash, displayed as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentHash(pub [u8; HASH_LEN]);

impl ContentHash {
	/// Hashes `data` with SHA-256.
	pub fn of(data: &[u8]) -> ContentHash {
		let mut hasher = Sha256::new();
		hasher.input(data);
		let digest = hasher.result();
		let mut out = [0u8; HASH_LEN];
		out.copy_from_slice(&digest);
		ContentHash(out)
	}

	/// Computes the nonce-salted challenge hash `H(content || nonce)` used to
	/// prove possession of a file without transferring it.
	pub fn with_nonce(&self, nonce: &str) -> ContentHash {
		let mut buf = Vec::with_capacity(HASH_LEN + nonce.len());
		buf.extend_from_slice(&self.0);
		buf.extend_from_slice(nonce.as_bytes());
		ContentHash::of(&buf)
	}

	pub fn to_bytes(&self) -> [u8; HASH_LEN] {
		self.0
	}
}

impl fmt::Display for ContentHash {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{}", hex::encode(&self.0))
	}
}

impl fmt::Debug for ContentHash {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "ContentHash({})", self)
	}
}

impl FromStr for ContentHash {
	type Err = Error;

	fn from_str(s: &str) -> Result<ContentHash, Error> {
		let bytes = hex::decode(s)?;
		if bytes.len() != HASH_LEN {
			return Err(Error::ProtocolViolation(format!(
				"hash must be {} bytes, got {}",
				HASH_LEN,
				bytes.len()
			)));
		}
		let mut out = [0u8; HASH_LEN];
		out.copy_from_slice(&bytes);
		Ok(ContentHash(out))
	}
}

/// A hash paired with opaque signature/reconstruction material, as written
/// on the wire in the form `hash:sig`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HashWithSig {
	pub hash: ContentHash,
	pub sig: String,
}

impl fmt::Display for HashWithSig {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{}:{}", self.hash, self.sig)
	}
}

impl FromStr for HashWithSig {
	type Err = Error;

	fn from_str(s: &str) -> Result<HashWithSig, Error> {
		match s.find(':') {
			Some(idx) => {
				let hash = s[..idx].parse()?;
				let sig = s[idx + 1..].to_string();
				Ok(HashWithSig { hash, sig })
			}
			None => Ok(HashWithSig {
				hash: s.parse()?,
				sig: String::new(),
			}),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn hash_round_trips_through_display_and_parse() {
		let h = ContentHash::of(b"hello");
		let s = h.to_string();
		let parsed: ContentHash = s.parse().unwrap();
		assert_eq!(h, parsed);
	}

	#[test]
	fn with_nonce_is_deterministic_and_order_sensitive() {
		let h = ContentHash::of(b"payload");
		let a = h.with_nonce("abc");
		let b = h.with_nonce("abc");
		let c = h.with_nonce("xyz");
		assert_eq!(a, b);
		assert_ne!(a, c);
	}

	#[test]
	fn hash_with_sig_parses_both_forms() {
		let h = ContentHash::of(b"blob");
		let with_sig: HashWithSig = format!("{}:somesig", h).parse().unwrap();
		assert_eq!(with_sig.hash, h);
		assert_eq!(with_sig.sig, "somesig");

		let bare: HashWithSig = h.to_string().parse().unwrap();
		assert_eq!(bare.hash, h);
		assert_eq!(bare.sig, "");
	}

	#[test]
	fn rejects_wrong_length_hash() {
		let err = "abcd".parse::<ContentHash>();
		assert!(err.is_err());
	}
}
