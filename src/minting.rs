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

//! Per-chain candidate-block election and minting, driven once per
//! orchestrator tick for whichever session is currently elected as the
//! chain's "first session".
//!
//! Candidate block construction, weight computation, and consensus
//! verification are an external collaborator's responsibility (the same
//! verifier the file store sits in front of); this module only sequences
//! when to build, drop and store a candidate.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::Error;
use crate::registry::Registry;

/// Minimum number of minting ticks to wait (scaled by the candidate's
/// range) before re-minting and storing, giving slower peers a chance to
/// announce a better block first.
pub const MIN_BLOCK_WAIT_PASSES: u32 = 8;

#[derive(Clone, Debug)]
pub struct BlockCandidate {
	pub password_hash: String,
	pub height: u64,
	pub weight: u64,
	pub num_txs: usize,
	pub can_mint: bool,
	pub range: u32,
	/// Weight of the block this candidate builds on. A better block
	/// superseding *that* parent also supersedes this candidate, since the
	/// candidate would no longer extend the real head.
	pub previous_block_weight: u64,
}

/// The external block-construction and storage surface this engine drives.
pub trait Minter: Send + Sync {
	/// Builds a candidate for `chain` using the unlocked `password_hash`, or
	/// `None` if that password currently has nothing worth minting.
	fn construct_candidate(
		&self,
		chain: &str,
		password_hash: &str,
	) -> Result<Option<BlockCandidate>, Error>;

	/// Re-verifies, applies extras, and commits `candidate` as the new head.
	fn store_block(&self, chain: &str, candidate: &BlockCandidate) -> Result<(), Error>;

	/// Current `(height, weight)` of the chain's head, used to detect a
	/// better block having arrived from another peer while we waited.
	fn current_head_weight(&self, chain: &str) -> Result<(u64, u64), Error>;

	/// Weight at `height`, if a block has been stored there, used to detect
	/// a better block having superseded a candidate's parent block.
	fn weight_at_height(&self, chain: &str, height: u64) -> Result<Option<u64>, Error>;
}

/// A `Minter` with nothing to offer; lets code exercising session/
/// orchestrator paths construct a `MintEngine` without a real block
/// builder.
#[cfg(any(test, feature = "test-support"))]
pub struct NullMinter;

#[cfg(any(test, feature = "test-support"))]
impl Minter for NullMinter {
	fn construct_candidate(&self, _chain: &str, _password_hash: &str) -> Result<Option<BlockCandidate>, Error> {
		Ok(None)
	}

	fn store_block(&self, _chain: &str, _candidate: &BlockCandidate) -> Result<(), Error> {
		Ok(())
	}

	fn current_head_weight(&self, _chain: &str) -> Result<(u64, u64), Error> {
		Ok((0, 0))
	}

	fn weight_at_height(&self, _chain: &str, _height: u64) -> Result<Option<u64>, Error> {
		Ok(None)
	}
}

struct ChainMintState {
	candidate: Option<BlockCandidate>,
	wait: u32,
}

pub struct MintEngine {
	registry: Arc<Registry>,
	minter: Arc<dyn Minter>,
	states: Mutex<HashMap<String, ChainMintState>>,
}

impl MintEngine {
	pub fn new(registry: Arc<Registry>, minter: Arc<dyn Minter>) -> MintEngine {
		MintEngine {
			registry,
			minter,
			states: Mutex::new(HashMap::new()),
		}
	}

	/// Runs one minting tick for `chain`. Callers must only invoke this for
	/// the session currently elected the chain's first session, and must
	/// skip it entirely while that chain is synchronising.
	pub fn tick(&self, chain: &str) -> Result<(), Error> {
		let mut states = self.states.lock().unwrap();
		let state = states.entry(chain.to_string()).or_insert(ChainMintState {
			candidate: None,
			wait: 0,
		});

		// A password withdrawal invalidates exactly one generation of
		// in-flight candidates.
		if self.registry.was_released(chain) {
			state.candidate = None;
		}

		match state.candidate.take() {
			None => {
				state.candidate = self.elect_candidate(chain)?;
				if let Some(cand) = &state.candidate {
					state.wait = MIN_BLOCK_WAIT_PASSES * cand.range.max(1);
				}
			}
			Some(candidate) => self.advance_candidate(chain, state, candidate)?,
		}
		Ok(())
	}

	fn elect_candidate(&self, chain: &str) -> Result<Option<BlockCandidate>, Error> {
		let mut best: Option<BlockCandidate> = None;
		for password_hash in self.registry.unlocked_passwords(chain) {
			if let Some(candidate) = self.minter.construct_candidate(chain, &password_hash)? {
				if candidate.num_txs == 0 {
					continue;
				}
				let better = match &best {
					Some(current) => candidate.weight < current.weight,
					None => true,
				};
				if better {
					best = Some(candidate);
				}
			}
		}
		Ok(best)
	}

	fn advance_candidate(
		&self,
		chain: &str,
		state: &mut ChainMintState,
		candidate: BlockCandidate,
	) -> Result<(), Error> {
		let (head_height, head_weight) = self.minter.current_head_weight(chain)?;
		let parent_superseded = candidate.height > 0
			&& self
				.minter
				.weight_at_height(chain, candidate.height - 1)?
				.map_or(false, |w| w < candidate.previous_block_weight);
		let superseded = head_height > candidate.height
			|| (head_height == candidate.height && head_weight < candidate.weight)
			|| parent_superseded;

		if superseded || !candidate.can_mint {
			state.candidate = None;
			return Ok(());
		}

		if state.wait > 0 {
			state.wait -= 1;
			state.candidate = Some(candidate);
			return Ok(());
		}

		// Wait expired: re-mint to pick up late transactions, then store if
		// still competitive.
		if let Some(fresh) = self
			.minter
			.construct_candidate(chain, &candidate.password_hash)?
		{
			if fresh.num_txs > 0 && fresh.weight <= head_weight {
				self.minter.store_block(chain, &fresh)?;
			}
		}
		state.candidate = None;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};

	struct FixedMinter {
		candidates: Mutex<HashMap<String, BlockCandidate>>,
		head: Mutex<(u64, u64)>,
		stores: AtomicUsize,
	}

	impl Minter for FixedMinter {
		fn construct_candidate(
			&self,
			_chain: &str,
			password_hash: &str,
		) -> Result<Option<BlockCandidate>, Error> {
			Ok(self.candidates.lock().unwrap().get(password_hash).cloned())
		}

		fn store_block(&self, _chain: &str, _candidate: &BlockCandidate) -> Result<(), Error> {
			self.stores.fetch_add(1, Ordering::SeqCst);
			Ok(())
		}

		fn current_head_weight(&self, _chain: &str) -> Result<(u64, u64), Error> {
			Ok(*self.head.lock().unwrap())
		}

		fn weight_at_height(&self, _chain: &str, height: u64) -> Result<Option<u64>, Error> {
			let (head_height, head_weight) = *self.head.lock().unwrap();
			Ok(if height == head_height { Some(head_weight) } else { None })
		}
	}

	fn candidate(password_hash: &str, weight: u64) -> BlockCandidate {
		BlockCandidate {
			password_hash: password_hash.to_string(),
			height: 10,
			weight,
			num_txs: 1,
			can_mint: true,
			range: 1,
			previous_block_weight: 1000,
		}
	}

	#[test]
	fn elects_lowest_weight_candidate_with_txs() {
		let registry = Arc::new(Registry::new(8));
		registry.unlock_password("main", "pw-a");
		registry.unlock_password("main", "pw-b");

		let mut candidates = HashMap::new();
		candidates.insert("pw-a".to_string(), candidate("pw-a", 50));
		candidates.insert("pw-b".to_string(), candidate("pw-b", 10));
		let minter = Arc::new(FixedMinter {
			candidates: Mutex::new(candidates),
			head: Mutex::new((9, 1000)),
			stores: AtomicUsize::new(0),
		});

		let engine = MintEngine::new(registry, minter.clone());
		engine.tick("main").unwrap();
		let states = engine.states.lock().unwrap();
		let cand = states.get("main").unwrap().candidate.as_ref().unwrap();
		assert_eq!(cand.password_hash, "pw-b");
	}

	#[test]
	fn release_flag_drops_in_flight_candidate() {
		let registry = Arc::new(Registry::new(8));
		registry.unlock_password("main", "pw-a");
		let mut candidates = HashMap::new();
		candidates.insert("pw-a".to_string(), candidate("pw-a", 50));
		let minter = Arc::new(FixedMinter {
			candidates: Mutex::new(candidates),
			head: Mutex::new((9, 1000)),
			stores: AtomicUsize::new(0),
		});
		let engine = MintEngine::new(registry.clone(), minter);
		engine.tick("main").unwrap();
		assert!(engine.states.lock().unwrap().get("main").unwrap().candidate.is_some());

		registry.lock_password("main", "pw-a");
		engine.tick("main").unwrap();
		assert!(engine.states.lock().unwrap().get("main").unwrap().candidate.is_none());
	}

	#[test]
	fn better_block_from_peer_drops_candidate_without_storing() {
		let registry = Arc::new(Registry::new(8));
		registry.unlock_password("main", "pw-a");
		let mut candidates = HashMap::new();
		candidates.insert("pw-a".to_string(), candidate("pw-a", 50));
		let minter = Arc::new(FixedMinter {
			candidates: Mutex::new(candidates),
			head: Mutex::new((9, 1000)),
			stores: AtomicUsize::new(0),
		});
		let engine = MintEngine::new(registry, minter.clone());
		engine.tick("main").unwrap();

		// A better block arrives at our candidate's own height.
		*minter.head.lock().unwrap() = (10, 5);
		engine.tick("main").unwrap();
		assert!(engine.states.lock().unwrap().get("main").unwrap().candidate.is_none());
		assert_eq!(minter.stores.load(Ordering::SeqCst), 0);
	}
}
