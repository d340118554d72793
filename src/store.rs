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

//! Contract over the external content-addressed file store. The concrete
//! store, verifier and blockchain-info builder live outside this crate;
//! this trait is the seam they're plugged in through.

use crate::error::Error;
use crate::hash::ContentHash;

/// A single piece of type information about a stored hash: either a
/// non-core file (no further classification) or a core file tagged with
/// its sub-kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FileTypeInfo {
	NonCore,
	Core(CoreFileKind),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CoreFileKind {
	Block,
	Transaction,
	CheckpointInfo,
	BlockchainInfo,
}

/// An atomic side-write produced by verification, committed together with
/// the primary file it accompanies.
#[derive(Clone, Debug)]
pub struct Extra {
	pub hash: ContentHash,
	pub bytes: Vec<u8>,
}

pub trait FileStore: Send + Sync {
	fn has_file(&self, hash: &ContentHash, include_pending: bool) -> bool;

	fn create_raw_file(&self, bytes: &[u8]) -> Result<ContentHash, Error>;

	fn create_raw_file_with_extras(
		&self,
		anchor: &[u8],
		extras: &[Extra],
	) -> Result<ContentHash, Error>;

	fn extract_file(&self, hash: &ContentHash) -> Result<Vec<u8>, Error>;

	fn file_bytes(&self, hash: &ContentHash) -> Result<usize, Error>;

	fn delete_file(&self, hash: &ContentHash, for_pending: bool) -> Result<(), Error>;

	fn tag_file_hash(&self, tag: &str) -> Option<ContentHash>;

	fn has_tag(&self, tag: &str) -> bool;

	fn get_hash_tags(&self, hash: &ContentHash) -> Vec<String>;

	fn file_type_info(&self, hash: &ContentHash) -> Result<FileTypeInfo, Error>;

	/// Reconstructs full block content from the raw stored bytes and the
	/// peer-supplied signature, producing what `verify_core_file` expects.
	fn construct_blob_for_block_content(&self, bytes: &[u8], sig: &str) -> Result<Vec<u8>, Error>;

	/// Transaction analogue of `construct_blob_for_block_content`.
	fn construct_blob_for_transaction_content(&self, bytes: &[u8], sig: &str) -> Result<Vec<u8>, Error>;

	fn verify_core_file(&self, bytes: &[u8]) -> Result<Vec<Extra>, Error>;

	/// Constructs application tx scripts, runs the per-application
	/// `app_blk_txs` script, cleans up `.txs.cin`, and rebuilds chain-info
	/// for `chain`. Callers must scope this per chain themselves (see
	/// `Registry::tx_lock`).
	fn process_txs(&self, chain: &str) -> Result<(), Error>;
}

/// In-memory test double implementing the file store contract, keyed
/// purely by content hash.
#[cfg(any(test, feature = "test-support"))]
pub mod test_double {
	use super::*;
	use std::collections::HashMap;
	use std::sync::Mutex;

	#[derive(Default)]
	pub struct MemoryFileStore {
		files: Mutex<HashMap<ContentHash, Vec<u8>>>,
		tags: Mutex<HashMap<String, ContentHash>>,
		type_info: Mutex<HashMap<ContentHash, FileTypeInfo>>,
	}

	impl MemoryFileStore {
		pub fn new() -> MemoryFileStore {
			MemoryFileStore::default()
		}

		pub fn set_tag(&self, tag: &str, hash: ContentHash) {
			self.tags.lock().unwrap().insert(tag.to_string(), hash);
		}

		pub fn set_type_info(&self, hash: ContentHash, info: FileTypeInfo) {
			self.type_info.lock().unwrap().insert(hash, info);
		}
	}

	impl FileStore for MemoryFileStore {
		fn has_file(&self, hash: &ContentHash, _include_pending: bool) -> bool {
			self.files.lock().unwrap().contains_key(hash)
		}

		fn create_raw_file(&self, bytes: &[u8]) -> Result<ContentHash, Error> {
			let hash = ContentHash::of(bytes);
			self.files.lock().unwrap().insert(hash, bytes.to_vec());
			Ok(hash)
		}

		fn create_raw_file_with_extras(
			&self,
			anchor: &[u8],
			extras: &[Extra],
		) -> Result<ContentHash, Error> {
			let hash = self.create_raw_file(anchor)?;
			let mut files = self.files.lock().unwrap();
			for extra in extras {
				files.insert(extra.hash, extra.bytes.clone());
			}
			Ok(hash)
		}

		fn extract_file(&self, hash: &ContentHash) -> Result<Vec<u8>, Error> {
			self.files
				.lock()
				.unwrap()
				.get(hash)
				.cloned()
				.ok_or_else(|| Error::Store(format!("no such file: {}", hash)))
		}

		fn file_bytes(&self, hash: &ContentHash) -> Result<usize, Error> {
			self.extract_file(hash).map(|b| b.len())
		}

		fn delete_file(&self, hash: &ContentHash, _for_pending: bool) -> Result<(), Error> {
			self.files.lock().unwrap().remove(hash);
			Ok(())
		}

		fn tag_file_hash(&self, tag: &str) -> Option<ContentHash> {
			self.tags.lock().unwrap().get(tag).copied()
		}

		fn has_tag(&self, tag: &str) -> bool {
			self.tags.lock().unwrap().contains_key(tag)
		}

		fn get_hash_tags(&self, hash: &ContentHash) -> Vec<String> {
			self.tags
				.lock()
				.unwrap()
				.iter()
				.filter(|(_, h)| *h == hash)
				.map(|(t, _)| t.clone())
				.collect()
		}

		fn file_type_info(&self, hash: &ContentHash) -> Result<FileTypeInfo, Error> {
			self.type_info
				.lock()
				.unwrap()
				.get(hash)
				.cloned()
				.ok_or_else(|| Error::Store(format!("no type info for: {}", hash)))
		}

		fn construct_blob_for_block_content(&self, bytes: &[u8], sig: &str) -> Result<Vec<u8>, Error> {
			let mut blob = bytes.to_vec();
			blob.extend_from_slice(sig.as_bytes());
			Ok(blob)
		}

		fn construct_blob_for_transaction_content(&self, bytes: &[u8], sig: &str) -> Result<Vec<u8>, Error> {
			self.construct_blob_for_block_content(bytes, sig)
		}

		fn verify_core_file(&self, _bytes: &[u8]) -> Result<Vec<Extra>, Error> {
			Ok(Vec::new())
		}

		fn process_txs(&self, _chain: &str) -> Result<(), Error> {
			Ok(())
		}
	}
}

#[cfg(any(test, feature = "test-support"))]
pub use test_double::MemoryFileStore;

#[cfg(test)]
mod tests {
	use super::test_double::MemoryFileStore;
	use super::*;

	#[test]
	fn store_then_fetch_round_trips_by_hash() {
		let store = MemoryFileStore::new();
		let hash = store.create_raw_file(b"payload").unwrap();
		assert!(store.has_file(&hash, false));
		assert_eq!(store.extract_file(&hash).unwrap(), b"payload");
	}

	#[test]
	fn delete_removes_file() {
		let store = MemoryFileStore::new();
		let hash = store.create_raw_file(b"payload").unwrap();
		store.delete_file(&hash, false).unwrap();
		assert!(!store.has_file(&hash, false));
	}

	#[test]
	fn tags_resolve_to_hashes() {
		let store = MemoryFileStore::new();
		let hash = store.create_raw_file(b"chain head").unwrap();
		store.set_tag("cmain.head", hash);
		assert!(store.has_tag("cmain.head"));
		assert_eq!(store.tag_file_hash("cmain.head"), Some(hash));
	}

	#[test]
	fn construct_blob_for_block_content_folds_in_the_signature() {
		let store = MemoryFileStore::new();
		let blob = store.construct_blob_for_block_content(b"raw block", "sig123").unwrap();
		assert!(blob.ends_with(b"sig123"));
		assert!(blob.starts_with(b"raw block"));
	}
}
