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

//! Configuration supplied by the embedding node: peer cap, acceptance
//! policy, bootstrap peers and per-chain ports. Transport timeouts and
//! other fixed behavioral constants are not configurable here; they live
//! as `const`s alongside the code that uses them.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;

/// Accept-or-reject decision for an inbound or retry-queue peer address.
/// A trait object because the acceptance policy (allow-lists, ban-lists)
/// belongs to the embedding node, not to this crate.
pub trait PeerIpPolicy: Send + Sync {
	fn is_accepted(&self, addr: &IpAddr) -> bool;
}

/// Accepts every address; the default when no policy is configured.
pub struct AcceptAll;

impl PeerIpPolicy for AcceptAll {
	fn is_accepted(&self, _addr: &IpAddr) -> bool {
		true
	}
}

#[derive(Clone, Serialize, Deserialize)]
pub struct InitialPeer {
	/// `chain[:port]`, e.g. `"main"` or `"main:13414"`.
	pub chain_and_port: String,
}

#[derive(Clone)]
pub struct P2PConfig {
	/// Hard ceiling on concurrently active sessions.
	pub max_peers: usize,
	/// Bootstrap peers: ip -> chain[:port].
	pub initial_peer_ips: BTreeMap<String, InitialPeer>,
	/// Default port used for a chain when a retry-queue or initial-peer
	/// entry omits one.
	pub chain_ports: BTreeMap<String, u16>,
	/// Acceptance policy for inbound and retry-queue peer IPs.
	pub accepted_peer_ip_addr: Arc<dyn PeerIpPolicy>,
}

impl Default for P2PConfig {
	fn default() -> P2PConfig {
		P2PConfig {
			max_peers: 32,
			initial_peer_ips: BTreeMap::new(),
			chain_ports: BTreeMap::new(),
			accepted_peer_ip_addr: Arc::new(AcceptAll),
		}
	}
}

impl P2PConfig {
	/// Resolves the port to use for `chain`, falling back to `default_port`
	/// when the chain has no explicit entry.
	pub fn port_for_chain(&self, chain: &str, default_port: u16) -> u16 {
		self.chain_ports.get(chain).copied().unwrap_or(default_port)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::net::Ipv4Addr;

	#[test]
	fn default_config_accepts_everything_and_has_no_peers() {
		let cfg = P2PConfig::default();
		assert_eq!(cfg.max_peers, 32);
		assert!(cfg.initial_peer_ips.is_empty());
		assert!(cfg
			.accepted_peer_ip_addr
			.is_accepted(&IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))));
	}

	#[test]
	fn port_for_chain_falls_back_to_default() {
		let mut cfg = P2PConfig::default();
		cfg.chain_ports.insert("main".to_string(), 13414);
		assert_eq!(cfg.port_for_chain("main", 9000), 13414);
		assert_eq!(cfg.port_for_chain("test", 9000), 9000);
	}
}
