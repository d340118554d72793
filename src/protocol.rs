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

//! Per-connection state machine and the wire-level command preconditions.
//! The actual command handling lives on `Session` in `session.rs`; this
//! module defines the vocabulary the state machine is built from.

use crate::hash::ContentHash;
use crate::wire::Command;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
	Invalid,
	Initiator,
	Responder,
	WaitingForGet,
	WaitingForPut,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrustLevel {
	None,
	Normal,
}

/// The fixed payload exchanged during the non-chain "hello" handshake that
/// establishes trust between two peers that share no chain.
pub const HELLO_BLOB: &[u8] = b"hello";

pub fn hello_hash() -> ContentHash {
	ContentHash::of(HELLO_BLOB)
}

pub fn head_tag(chain: &str) -> String {
	format!("c{}.head", chain)
}

pub fn info_tag(chain: &str) -> String {
	format!("c{}.info", chain)
}

/// Whether `cmd` may be dispatched while the responder side of a session is
/// in `state`. Any command not in this table's allowed set for its state is
/// a protocol violation that forces the session to `Invalid`.
pub fn is_allowed(cmd: &Command, state: SessionState) -> bool {
	use SessionState::*;
	match cmd {
		Command::Bye => true,
		Command::Chk { .. } => matches!(state, Responder | WaitingForGet | WaitingForPut),
		Command::Get { .. } => matches!(state, WaitingForGet),
		Command::Put { .. } => matches!(state, WaitingForPut),
		Command::Pip { .. } => matches!(state, WaitingForGet | WaitingForPut),
		Command::Tls => matches!(state, Responder),
		Command::Help { .. } | Command::Usage => true,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::wire::Command;

	fn chk() -> Command {
		Command::Chk {
			target: "x".to_string(),
			nonce: None,
		}
	}

	#[test]
	fn get_only_allowed_while_waiting_for_get() {
		let cmd = Command::Get { target: "x".to_string() };
		assert!(is_allowed(&cmd, SessionState::WaitingForGet));
		assert!(!is_allowed(&cmd, SessionState::WaitingForPut));
		assert!(!is_allowed(&cmd, SessionState::Invalid));
	}

	#[test]
	fn put_only_allowed_while_waiting_for_put() {
		let cmd = Command::Put { hash: "x".to_string() };
		assert!(is_allowed(&cmd, SessionState::WaitingForPut));
		assert!(!is_allowed(&cmd, SessionState::WaitingForGet));
	}

	#[test]
	fn chk_allowed_in_responder_and_both_waiting_states() {
		assert!(is_allowed(&chk(), SessionState::Responder));
		assert!(is_allowed(&chk(), SessionState::WaitingForGet));
		assert!(is_allowed(&chk(), SessionState::WaitingForPut));
		assert!(!is_allowed(&chk(), SessionState::Invalid));
	}

	#[test]
	fn bye_is_always_allowed() {
		assert!(is_allowed(&Command::Bye, SessionState::Invalid));
	}

	#[test]
	fn tags_are_formatted_consistently() {
		assert_eq!(head_tag("main"), "cmain.head");
		assert_eq!(info_tag("main"), "cmain.info");
	}
}
