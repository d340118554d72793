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

//! Process-wide peer bookkeeping shared across sessions.
//!
//! Two guarded regions mirror the two distinct locks the orchestrator
//! relies on: one covering the peer/session accounting (good peers, retry
//! queue, peer count), the other covering minting-related state (unlocked
//! passwords, release flags). Keeping them separate means a long minting
//! operation never blocks the listener's accept-time peer-count check.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

#[derive(Default)]
struct PeerState {
	good_peers: HashSet<String>,
	peers_to_retry: BTreeMap<String, VecDeque<String>>,
	num_peers: usize,
	active_ips: HashSet<String>,
}

#[derive(Default)]
struct MintState {
	passwords: BTreeMap<String, HashSet<String>>,
	release: BTreeMap<String, bool>,
	/// Live chain-peer sessions per chain, keyed by registration order.
	/// The lowest id still present is that chain's "first session" —
	/// the one allowed to drive minting on a given tick.
	chain_sessions: BTreeMap<String, BTreeSet<u64>>,
	next_session_id: u64,
}

pub struct Registry {
	max_peers: usize,
	peers: RwLock<PeerState>,
	mint: RwLock<MintState>,
	tx_locks: Mutex<BTreeMap<String, Arc<Mutex<()>>>>,
}

impl Registry {
	pub fn new(max_peers: usize) -> Registry {
		Registry {
			max_peers,
			peers: RwLock::new(PeerState::default()),
			mint: RwLock::new(MintState::default()),
			tx_locks: Mutex::new(BTreeMap::new()),
		}
	}

	/// `ip=chain` or bare `ip` key identifying a previously successful
	/// session.
	pub fn add_good_peer(&self, key: &str) {
		self.peers.write().unwrap().good_peers.insert(key.to_string());
	}

	pub fn was_good_peer(&self, key: &str) -> bool {
		self.peers.read().unwrap().good_peers.contains(key)
	}

	pub fn add_peer_to_retry(&self, chain: &str, peer: &str) {
		self.peers
			.write()
			.unwrap()
			.peers_to_retry
			.entry(chain.to_string())
			.or_insert_with(VecDeque::new)
			.push_back(peer.to_string());
	}

	/// Pops the next retry candidate for `chain`, skipping entries whose IP
	/// `is_accepted` rejects, until one is found or the queue is exhausted.
	/// Returns `None` once the queue has nothing acceptable left.
	pub fn get_peer_to_retry<F>(&self, chain: &str, is_accepted: F) -> Option<String>
	where
		F: Fn(&str) -> bool,
	{
		let mut state = self.peers.write().unwrap();
		let queue = state.peers_to_retry.get_mut(chain)?;
		while let Some(candidate) = queue.pop_front() {
			let ip = candidate.split('!').next().unwrap_or(&candidate);
			if is_accepted(ip) {
				return Some(candidate);
			}
		}
		None
	}

	pub fn has_max_peers(&self) -> bool {
		let state = self.peers.read().unwrap();
		state.num_peers >= self.max_peers
	}

	/// Attempts to reserve a session slot; returns `false` (no slot taken)
	/// once the cap is reached.
	pub fn try_acquire_slot(&self) -> bool {
		let mut state = self.peers.write().unwrap();
		if state.num_peers >= self.max_peers {
			return false;
		}
		state.num_peers += 1;
		true
	}

	pub fn release_slot(&self) {
		let mut state = self.peers.write().unwrap();
		state.num_peers = state.num_peers.saturating_sub(1);
	}

	pub fn num_peers(&self) -> usize {
		self.peers.read().unwrap().num_peers
	}

	pub fn max_peers(&self) -> usize {
		self.max_peers
	}

	/// Reserves `ip` as holding an active session, unless another session
	/// already holds it. Loopback is exempt (many distinct local peers share
	/// `127.0.0.1` in development and testing).
	pub fn try_register_ip(&self, ip: &str, is_loopback: bool) -> bool {
		if is_loopback {
			return true;
		}
		self.peers.write().unwrap().active_ips.insert(ip.to_string())
	}

	pub fn unregister_ip(&self, ip: &str, is_loopback: bool) {
		if is_loopback {
			return;
		}
		self.peers.write().unwrap().active_ips.remove(ip);
	}

	// -- minting state --

	pub fn unlock_password(&self, chain: &str, password_hash: &str) {
		self.mint
			.write()
			.unwrap()
			.passwords
			.entry(chain.to_string())
			.or_insert_with(HashSet::new)
			.insert(password_hash.to_string());
	}

	pub fn lock_password(&self, chain: &str, password_hash: &str) {
		let mut mint = self.mint.write().unwrap();
		if let Some(set) = mint.passwords.get_mut(chain) {
			set.remove(password_hash);
		}
		mint.release.insert(chain.to_string(), true);
	}

	pub fn unlocked_passwords(&self, chain: &str) -> Vec<String> {
		self.mint
			.read()
			.unwrap()
			.passwords
			.get(chain)
			.map(|set| set.iter().cloned().collect())
			.unwrap_or_default()
	}

	/// Consumes (clears) the release flag for `chain`, returning whether it
	/// had been set. A password withdrawal is only allowed to invalidate
	/// exactly one generation of minting candidates.
	pub fn was_released(&self, chain: &str) -> bool {
		let mut mint = self.mint.write().unwrap();
		match mint.release.get_mut(chain) {
			Some(flag) if *flag => {
				*flag = false;
				true
			}
			_ => false,
		}
	}

	/// Registers a chain-peer session as a candidate for `chain`'s minting
	/// election (`is_first_using_session_variable`), returning the sequence
	/// id it was assigned. Must be paired with `unregister_chain_session`
	/// on session exit.
	pub fn register_chain_session(&self, chain: &str) -> u64 {
		let mut mint = self.mint.write().unwrap();
		let id = mint.next_session_id;
		mint.next_session_id += 1;
		mint.chain_sessions
			.entry(chain.to_string())
			.or_insert_with(BTreeSet::new)
			.insert(id);
		id
	}

	pub fn unregister_chain_session(&self, chain: &str, id: u64) {
		let mut mint = self.mint.write().unwrap();
		if let Some(set) = mint.chain_sessions.get_mut(chain) {
			set.remove(&id);
		}
	}

	/// True if `id` is the earliest still-registered session for `chain`:
	/// among all sessions that set this chain's peer variable, exactly one
	/// (the earliest) is allowed to mint on a given tick.
	pub fn is_first_chain_session(&self, chain: &str, id: u64) -> bool {
		let mint = self.mint.read().unwrap();
		mint.chain_sessions
			.get(chain)
			.and_then(|set| set.iter().next())
			.map_or(false, |first| *first == id)
	}

	/// Per-chain mutex scoping `process_txs` to one chain at a time
	/// (`system_variable_lock(blockchain)`), created on first use.
	pub fn tx_lock(&self, chain: &str) -> Arc<Mutex<()>> {
		self.tx_locks
			.lock()
			.unwrap()
			.entry(chain.to_string())
			.or_insert_with(|| Arc::new(Mutex::new(())))
			.clone()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn num_peers_never_exceeds_max_peers() {
		let reg = Registry::new(2);
		assert!(reg.try_acquire_slot());
		assert!(reg.try_acquire_slot());
		assert!(!reg.try_acquire_slot());
		assert_eq!(reg.num_peers(), 2);
		reg.release_slot();
		assert!(reg.try_acquire_slot());
	}

	#[test]
	fn empty_retry_queue_returns_none() {
		let reg = Registry::new(8);
		assert_eq!(reg.get_peer_to_retry("main", |_| true), None);
	}

	#[test]
	fn rejected_retry_ips_are_skipped() {
		let reg = Registry::new(8);
		reg.add_peer_to_retry("main", "10.0.0.1");
		reg.add_peer_to_retry("main", "10.0.0.2");
		let got = reg.get_peer_to_retry("main", |ip| ip != "10.0.0.1");
		assert_eq!(got, Some("10.0.0.2".to_string()));
	}

	#[test]
	fn release_flag_is_consumed_exactly_once() {
		let reg = Registry::new(8);
		reg.unlock_password("main", "pw1");
		reg.lock_password("main", "pw1");
		assert!(reg.was_released("main"));
		assert!(!reg.was_released("main"));
	}

	#[test]
	fn good_peer_membership_round_trips() {
		let reg = Registry::new(8);
		assert!(!reg.was_good_peer("1.2.3.4=main"));
		reg.add_good_peer("1.2.3.4=main");
		assert!(reg.was_good_peer("1.2.3.4=main"));
	}

	#[test]
	fn duplicate_non_loopback_ip_is_rejected_until_unregistered() {
		let reg = Registry::new(8);
		assert!(reg.try_register_ip("10.0.0.5", false));
		assert!(!reg.try_register_ip("10.0.0.5", false));
		reg.unregister_ip("10.0.0.5", false);
		assert!(reg.try_register_ip("10.0.0.5", false));
	}

	#[test]
	fn loopback_ip_is_exempt_from_dedup() {
		let reg = Registry::new(8);
		assert!(reg.try_register_ip("127.0.0.1", true));
		assert!(reg.try_register_ip("127.0.0.1", true));
	}

	#[test]
	fn earliest_registered_chain_session_is_first() {
		let reg = Registry::new(8);
		let first = reg.register_chain_session("main");
		let second = reg.register_chain_session("main");
		assert!(reg.is_first_chain_session("main", first));
		assert!(!reg.is_first_chain_session("main", second));

		reg.unregister_chain_session("main", first);
		assert!(reg.is_first_chain_session("main", second));
	}

	#[test]
	fn tx_lock_returns_the_same_mutex_for_a_chain() {
		let reg = Registry::new(8);
		let a = reg.tx_lock("main");
		let b = reg.tx_lock("main");
		assert!(Arc::ptr_eq(&a, &b));
	}
}
