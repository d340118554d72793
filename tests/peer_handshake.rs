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

extern crate peerlink;

use std::net::Ipv4Addr;
use std::str::FromStr;

use peerlink::hash::{ContentHash, HashWithSig};
use peerlink::wire::{Command, Response};
use peerlink::{P2PConfig, Registry};

// Registry is the process-wide bookkeeping that the listener's accept loop
// and the connector's retry loop both drive; this checks the cap and the
// retry queue behave correctly from outside the crate, with no access to
// any session internals.
#[test]
fn registry_enforces_peer_cap_and_retry_queue() {
	let registry = Registry::new(1);
	assert!(registry.try_acquire_slot());
	assert!(!registry.try_acquire_slot());
	registry.release_slot();
	assert!(registry.try_acquire_slot());

	registry.add_peer_to_retry("main", "203.0.113.9");
	let got = registry.get_peer_to_retry("main", |_| true);
	assert_eq!(got, Some("203.0.113.9".to_string()));
	assert_eq!(registry.get_peer_to_retry("main", |_| true), None);
}

#[test]
fn default_config_accepts_any_peer_and_has_no_bootstrap_list() {
	let config = P2PConfig::default();
	assert!(config.initial_peer_ips.is_empty());
	assert!(config
		.accepted_peer_ip_addr
		.is_accepted(&Ipv4Addr::new(198, 51, 100, 7).into()));
}

// The wire format is the actual interoperability contract between two
// independently built nodes, so it's worth a black-box round trip alongside
// the unit tests living next to the parser.
#[test]
fn wire_commands_and_responses_round_trip_through_text() {
	let cmd = Command::from_str("get deadbeef").unwrap();
	assert_eq!(cmd.to_string(), "get deadbeef");

	let resp: Response = "(okay)".parse().unwrap();
	assert_eq!(resp, Response::Okay);
}

#[test]
fn hash_with_sig_parses_as_exposed_publicly() {
	let hash = ContentHash::of(b"checkpoint");
	let line = format!("{}:abc", hash);
	let parsed: HashWithSig = line.parse().unwrap();
	assert_eq!(parsed.hash, hash);
	assert_eq!(parsed.sig, "abc");
}
