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

//! A single peer connection: the fields the protocol state machine and the
//! orchestrator operate on, plus the outer handshake and drive loop that
//! ties a socket to both of them. One OS thread owns exactly one `Session`
//! for its whole lifetime.

use std::collections::VecDeque;
use std::net::TcpStream;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::thread;

use tempfile::NamedTempFile;

use crate::error::Error;
use crate::hash::ContentHash;
use crate::minting::MintEngine;
use crate::orchestrator;
use crate::protocol::{self, SessionState, TrustLevel};
use crate::registry::Registry;
use crate::store::FileStore;
use crate::transport::{
	SessionTransport, GREETING_TIMEOUT, PID_TIMEOUT, REQUEST_THROTTLE_SLEEP, REQUEST_TIMEOUT,
};
use crate::wire::{Command, Response};

/// Protocol version advertised during the greeting; sessions whose peer
/// reports an incompatible major version are rejected.
pub const PROTOCOL_VERSION: &str = "1.0";

pub struct Session {
	pub transport: SessionTransport,
	pub store: Arc<dyn FileStore>,
	pub registry: Arc<Registry>,
	pub mint_engine: Arc<MintEngine>,

	pub peer_key: String,
	pub is_local: bool,
	pub is_responder: bool,

	pub last_issued_was_put: bool,
	pub needs_blockchain_info: bool,
	/// Empty for a "hello-only" peer that shares no chain with us.
	pub blockchain: String,

	/// Cached (hash, temp path) of the most recently announced
	/// blockchain-info file, served directly on a matching `get` instead of
	/// re-reading the live file.
	pub blockchain_info: Option<(ContentHash, PathBuf)>,
	pub prior_put_hash: Option<ContentHash>,

	pub state: SessionState,
	pub trust: TrustLevel,

	pub peer_is_synchronising: bool,
	pub blockchain_head_hash: Option<ContentHash>,
	pub blockchain_info_hash: Option<ContentHash>,

	/// Queue of hashes (optionally `*`-prefixed to mean "reprocess, don't
	/// fetch") still to be pulled from the peer.
	pub files_to_get: VecDeque<String>,
	pub files_to_put: VecDeque<ContentHash>,

	/// Set once the handshake succeeds for a chain peer; the sequence id
	/// this session was assigned in the chain's minting election.
	chain_session_id: Option<u64>,

	finished: bool,
}

/// Marks a queue entry as already-stored content that should be reprocessed
/// in place rather than fetched again.
pub const REPROCESS_PREFIX: char = '*';

impl Session {
	pub fn new(
		stream: TcpStream,
		store: Arc<dyn FileStore>,
		registry: Arc<Registry>,
		mint_engine: Arc<MintEngine>,
		blockchain: String,
		is_responder: bool,
	) -> Result<Session, Error> {
		let peer_addr = stream.peer_addr()?;
		let is_local = peer_addr.ip().is_loopback();
		let peer_key = peer_addr.ip().to_string();
		let transport = SessionTransport::new(stream)?;
		Ok(Session {
			transport,
			store,
			registry,
			mint_engine,
			peer_key,
			is_local,
			is_responder,
			last_issued_was_put: false,
			needs_blockchain_info: !blockchain.is_empty(),
			blockchain,
			blockchain_info: None,
			prior_put_hash: None,
			state: if is_responder {
				SessionState::Responder
			} else {
				SessionState::Initiator
			},
			trust: TrustLevel::None,
			peer_is_synchronising: false,
			blockchain_head_hash: None,
			blockchain_info_hash: None,
			files_to_get: VecDeque::new(),
			files_to_put: VecDeque::new(),
			chain_session_id: None,
			finished: false,
		})
	}

	pub fn is_chain_peer(&self) -> bool {
		!self.blockchain.is_empty()
	}

	pub fn finish(&mut self) {
		self.finished = true;
	}

	/// Greeting + PID exchange, then either the initiator's opening `chk`
	/// or waiting for the responder's first command, then the drive loop.
	/// Chain peers register for that chain's minting election and, on
	/// whichever turn they're the elected first session, drive a minting
	/// tick. On exit, records good-peer/retry-queue bookkeeping for chain
	/// peers.
	pub fn run(&mut self) {
		if let Err(e) = self.handshake() {
			warn!("peer session warning: handshake with {} failed: {}", self.peer_key, e);
			self.registry.release_slot();
			if self.is_responder {
				self.registry.unregister_ip(&self.peer_key, self.is_local);
			}
			return;
		}
		info!("started peer session with {} (responder={})", self.peer_key, self.is_responder);

		if self.is_chain_peer() {
			self.chain_session_id = Some(self.registry.register_chain_session(&self.blockchain));
		}

		let mut success = true;
		while !self.finished {
			let result = if self.is_responder {
				self.serve_one_command()
			} else {
				orchestrator::issue_cmd_for_peer(self)
			};
			match result {
				Ok(()) => {}
				Err(Error::PeerClosed) | Err(Error::TransportTimeout) => {
					self.finished = true;
				}
				Err(e) => {
					error!("peer session error: {}", e);
					success = false;
					self.finished = true;
				}
			}
			if self.state == SessionState::Invalid {
				self.finished = true;
			}
			self.mint_if_elected();
			thread::sleep(REQUEST_THROTTLE_SLEEP);
		}

		if success && self.is_chain_peer() {
			let key = format!("{}={}", self.peer_key, self.blockchain);
			self.registry.add_good_peer(&key);
			self.registry.add_peer_to_retry(&self.blockchain, &self.peer_key);
		}
		self.registry.release_slot();
		if self.is_responder {
			self.registry.unregister_ip(&self.peer_key, self.is_local);
		}
		if let Some(id) = self.chain_session_id.take() {
			self.registry.unregister_chain_session(&self.blockchain, id);
		}
		info!("ended peer session with {}", self.peer_key);
	}

	/// Runs one minting tick for this session's chain, but only if this
	/// session is the chain's currently elected first session and the
	/// chain isn't mid catch-up.
	fn mint_if_elected(&self) {
		let id = match self.chain_session_id {
			Some(id) => id,
			None => return,
		};
		if self.peer_is_synchronising || !self.registry.is_first_chain_session(&self.blockchain, id) {
			return;
		}
		if let Err(e) = self.mint_engine.tick(&self.blockchain) {
			warn!("peer session warning: minting tick failed for {}: {}", self.blockchain, e);
		}
	}

	fn handshake(&mut self) -> Result<(), Error> {
		if self.is_responder {
			self.transport.write_line(PROTOCOL_VERSION, GREETING_TIMEOUT)?;
			self.transport.write_line("okay", GREETING_TIMEOUT)?;
			let pid = self.transport.read_line(PID_TIMEOUT)?;
			let _ = pid;
			self.transport.write_line("peer", PID_TIMEOUT)?;
		} else {
			let version = self.transport.read_line(GREETING_TIMEOUT)?;
			if version.split('.').next() != PROTOCOL_VERSION.split('.').next() {
				return Err(Error::ProtocolViolation(format!(
					"incompatible protocol version: {}",
					version
				)));
			}
			let okay = self.transport.read_line(GREETING_TIMEOUT)?;
			if okay != "okay" {
				return Err(Error::ProtocolViolation("missing greeting okay".to_string()));
			}
			self.transport.write_line("peer", PID_TIMEOUT)?;
			let _pid = self.transport.read_line(PID_TIMEOUT)?;

			let target = if self.is_chain_peer() {
				protocol::head_tag(&self.blockchain)
			} else {
				protocol::hello_hash().to_string()
			};
			let response = self.issue_chk(&target, None)?;
			match response {
				Response::Hash(h) => {
					if self.is_chain_peer() {
						self.blockchain_head_hash = ContentHash::from_str(&h).ok();
					}
				}
				Response::None => {
					if !self.is_chain_peer() {
						self.complete_hello_handshake_as_initiator()?;
					}
				}
				Response::Error(msg) => return Err(Error::ProtocolViolation(msg)),
				_ => {}
			}
			self.state = SessionState::WaitingForPut;
			self.last_issued_was_put = false;
		}
		Ok(())
	}

	/// Reads and serves exactly one command as the responder side.
	fn serve_one_command(&mut self) -> Result<(), Error> {
		let line = self.transport.read_line(REQUEST_TIMEOUT)?;
		let cmd: Command = line.parse()?;

		if !protocol::is_allowed(&cmd, self.state) {
			let msg = format!("{} not allowed in current state", cmd.name());
			self.transport.set_no_delay()?;
			self.transport
				.write_line(&Response::Error(msg.clone()).to_string(), REQUEST_TIMEOUT)?;
			self.state = SessionState::Invalid;
			return Err(Error::ProtocolViolation(msg));
		}

		match cmd {
			Command::Chk { target, nonce } => self.handle_chk(&target, nonce.as_deref())?,
			Command::Get { target } => self.handle_get(&target)?,
			Command::Put { hash } => self.handle_put(&hash)?,
			Command::Pip { ip } => self.handle_pip(&ip)?,
			Command::Tls => self.handle_tls()?,
			Command::Bye => {
				self.finish();
			}
			Command::Help { .. } | Command::Usage => self.handle_help()?,
		}
		Ok(())
	}

	fn reply(&mut self, resp: &Response) -> Result<(), Error> {
		self.transport.set_delay()?;
		self.transport.write_line(&resp.to_string(), REQUEST_TIMEOUT)?;
		self.transport.set_no_delay()?;
		self.transport.write_line(&Response::Okay.to_string(), REQUEST_TIMEOUT)?;
		Ok(())
	}

	fn handle_chk(&mut self, target: &str, nonce: Option<&str>) -> Result<(), Error> {
		// Chain peers must present the exact head tag; anything else from a
		// chain peer in its initial responder turn is a protocol violation.
		if self.is_chain_peer()
			&& self.state == SessionState::Responder
			&& target != protocol::head_tag(&self.blockchain)
		{
			self.state = SessionState::Invalid;
			return Err(Error::ProtocolViolation(format!(
				"expected head tag {}, got {}",
				protocol::head_tag(&self.blockchain),
				target
			)));
		}

		let resolved = self.store.tag_file_hash(target).or_else(|| ContentHash::from_str(target).ok());

		match resolved {
			Some(hash) if self.store.has_file(&hash, true) => {
				if target == protocol::info_tag(&self.blockchain) && self.is_chain_peer() {
					self.cache_blockchain_info(hash)?;
				}
				let body = match nonce {
					Some(n) => hash.with_nonce(n).to_string(),
					None => hash.to_string(),
				};
				self.reply(&Response::Hash(body))?;
				self.state = SessionState::WaitingForGet;
			}
			_ => {
				if self.is_chain_peer() {
					if self.state == SessionState::Responder {
						self.state = SessionState::Invalid;
						return Err(Error::ProtocolViolation(format!(
							"no such chain head: {}",
							target
						)));
					}
					self.reply(&Response::None)?;
				} else {
					// Non-chain bidirectional hello handshake: we lack the
					// target, so offer our own hello blob and expect it
					// echoed back byte-identical.
					self.reply(&Response::None)?;
					self.run_hello_handshake()?;
				}
			}
		}
		Ok(())
	}

	fn cache_blockchain_info(&mut self, hash: ContentHash) -> Result<(), Error> {
		let bytes = self.store.extract_file(&hash)?;
		let tmp = NamedTempFile::new().map_err(|e| Error::Internal(e.to_string()))?;
		std::fs::write(tmp.path(), &bytes).map_err(|e| Error::Internal(e.to_string()))?;
		let (_, path) = tmp.keep().map_err(|e| Error::Internal(e.to_string()))?;
		self.blockchain_info = Some((hash, path));
		Ok(())
	}

	fn run_hello_handshake(&mut self) -> Result<(), Error> {
		let hello = protocol::HELLO_BLOB;
		let hash = protocol::hello_hash();
		self.transport.set_delay()?;
		self.transport
			.write_line(&Command::Put { hash: hash.to_string() }.to_string(), REQUEST_TIMEOUT)?;
		self.transport.send_blob(hello, REQUEST_TIMEOUT)?;

		let reply_line = self.transport.read_line(REQUEST_TIMEOUT)?;
		let put_back: Command = reply_line.parse()?;
		match put_back {
			Command::Put { hash: peer_hash } if peer_hash == hash.to_string() => {
				let body = self.transport.recv_blob(REQUEST_TIMEOUT)?;
				if body != hello {
					self.state = SessionState::Invalid;
					return Err(Error::HashMismatch);
				}
				self.transport.set_no_delay()?;
				self.transport.write_line(&Response::Okay.to_string(), REQUEST_TIMEOUT)?;
				self.trust = TrustLevel::Normal;
				self.state = SessionState::WaitingForPut;
			}
			_ => {
				self.state = SessionState::Invalid;
				return Err(Error::ProtocolViolation("expected hello put-back".to_string()));
			}
		}
		Ok(())
	}

	/// Completes the non-chain bidirectional hello handshake from the
	/// initiator's side: reads the responder's proactive `put <hello-hash>`
	/// and blob, verifies it, acknowledges, then puts the same blob back so
	/// the responder can verify byte-identity in turn.
	fn complete_hello_handshake_as_initiator(&mut self) -> Result<(), Error> {
		let hash = protocol::hello_hash();
		let line = self.transport.read_line(REQUEST_TIMEOUT)?;
		let cmd: Command = line.parse()?;
		match cmd {
			Command::Put { hash: peer_hash } if peer_hash == hash.to_string() => {
				let body = self.transport.recv_blob(REQUEST_TIMEOUT)?;
				if body != protocol::HELLO_BLOB {
					self.state = SessionState::Invalid;
					return Err(Error::HashMismatch);
				}
				// No ack here: the responder is waiting for our put-back, not
				// a standalone reply (see `run_hello_handshake`).
				self.issue_put(&hash, protocol::HELLO_BLOB)?;
				self.trust = TrustLevel::Normal;
			}
			_ => {
				self.state = SessionState::Invalid;
				return Err(Error::ProtocolViolation("expected hello put from responder".to_string()));
			}
		}
		Ok(())
	}

	fn handle_get(&mut self, target: &str) -> Result<(), Error> {
		let hash = ContentHash::from_str(target)
			.or_else(|_| self.store.tag_file_hash(target).ok_or(Error::Store("unknown target".to_string())))?;

		let bytes = if let Some((cached_hash, path)) = &self.blockchain_info {
			if *cached_hash == hash {
				let data = std::fs::read(path).map_err(|e| Error::Internal(e.to_string()))?;
				let path = path.clone();
				self.blockchain_info = None;
				let _ = std::fs::remove_file(&path);
				data
			} else {
				self.store.extract_file(&hash)?
			}
		} else {
			self.store.extract_file(&hash)?
		};

		self.transport.set_delay()?;
		self.transport.send_blob(&bytes, REQUEST_TIMEOUT)?;
		self.transport.set_no_delay()?;
		self.transport.write_line(&Response::Okay.to_string(), REQUEST_TIMEOUT)?;
		self.state = SessionState::WaitingForPut;
		Ok(())
	}

	fn handle_put(&mut self, hash_str: &str) -> Result<(), Error> {
		let announced = ContentHash::from_str(hash_str)?;
		let bytes = self.transport.recv_blob(REQUEST_TIMEOUT)?;
		let actual = ContentHash::of(&bytes);
		if actual != announced {
			self.state = SessionState::Invalid;
			return Err(Error::HashMismatch);
		}
		if !self.store.has_file(&announced, true) {
			self.store.create_raw_file(&bytes)?;
			self.files_to_get.push_back(announced.to_string());
		}
		self.transport.set_no_delay()?;
		self.transport.write_line(&Response::Okay.to_string(), REQUEST_TIMEOUT)?;
		self.state = SessionState::WaitingForGet;
		Ok(())
	}

	fn handle_pip(&mut self, _requested_ip: &str) -> Result<(), Error> {
		// Placeholder peer-address suggestion; real selection policy is an
		// external collaborator's decision (see DESIGN.md open questions).
		self.reply(&Response::Hash("127.0.0.1".to_string()))
	}

	fn handle_tls(&mut self) -> Result<(), Error> {
		// TLS upgrade itself is delegated to the transport's owner; here we
		// just acknowledge and move the state machine forward.
		self.reply(&Response::Okay)?;
		self.state = SessionState::WaitingForGet;
		Ok(())
	}

	fn handle_help(&mut self) -> Result<(), Error> {
		let usage = "chk get put pip tls bye help ?";
		self.reply(&Response::Hash(usage.to_string()))
	}

	fn read_trailing_okay(&mut self) -> Result<(), Error> {
		let line = self.transport.read_line(REQUEST_TIMEOUT)?;
		if line.trim() != Response::Okay.to_string() {
			self.state = SessionState::Invalid;
			return Err(Error::ProtocolViolation(format!(
				"expected trailing okay, got {}",
				line
			)));
		}
		Ok(())
	}

	/// Issues `chk <target> [nonce]` as the requesting side and returns the
	/// responder's payload, having already consumed the trailing okay.
	pub(crate) fn issue_chk(&mut self, target: &str, nonce: Option<&str>) -> Result<Response, Error> {
		self.transport.set_no_delay()?;
		self.transport.write_line(
			&Command::Chk {
				target: target.to_string(),
				nonce: nonce.map(|s| s.to_string()),
			}
			.to_string(),
			REQUEST_TIMEOUT,
		)?;
		let line = self.transport.read_line(REQUEST_TIMEOUT)?;
		let resp: Response = line.parse()?;
		if !matches!(resp, Response::Error(_)) {
			self.read_trailing_okay()?;
		}
		Ok(resp)
	}

	/// Issues `get <target>`, returning the fetched bytes.
	pub(crate) fn issue_get(&mut self, target: &str) -> Result<Vec<u8>, Error> {
		self.transport.set_no_delay()?;
		self.transport
			.write_line(&Command::Get { target: target.to_string() }.to_string(), REQUEST_TIMEOUT)?;
		let bytes = self.transport.recv_blob(REQUEST_TIMEOUT)?;
		self.read_trailing_okay()?;
		self.last_issued_was_put = false;
		Ok(bytes)
	}

	/// Issues `put <hash>` followed by the blob.
	pub(crate) fn issue_put(&mut self, hash: &ContentHash, bytes: &[u8]) -> Result<(), Error> {
		self.transport.set_delay()?;
		self.transport
			.write_line(&Command::Put { hash: hash.to_string() }.to_string(), REQUEST_TIMEOUT)?;
		self.transport.send_blob(bytes, REQUEST_TIMEOUT)?;
		self.read_trailing_okay()?;
		self.last_issued_was_put = true;
		Ok(())
	}

	/// Issues `pip <ip>`, returning the responder's suggestion.
	pub(crate) fn issue_pip(&mut self, ip: &str) -> Result<Response, Error> {
		self.transport.set_no_delay()?;
		self.transport
			.write_line(&Command::Pip { ip: ip.to_string() }.to_string(), REQUEST_TIMEOUT)?;
		let line = self.transport.read_line(REQUEST_TIMEOUT)?;
		let resp: Response = line.parse()?;
		self.read_trailing_okay()?;
		Ok(resp)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::minting::NullMinter;
	use crate::store::MemoryFileStore;
	use std::net::TcpListener;

	fn socket_pair() -> (TcpStream, TcpStream) {
		let listener = TcpListener::bind("127.0.0.1:0").unwrap();
		let addr = listener.local_addr().unwrap();
		let client = thread::spawn(move || TcpStream::connect(addr).unwrap());
		let (server, _) = listener.accept().unwrap();
		(server, client.join().unwrap())
	}

	fn null_mint_engine(registry: Arc<Registry>) -> Arc<MintEngine> {
		Arc::new(MintEngine::new(registry, Arc::new(NullMinter)))
	}

	#[test]
	fn chain_peer_handshake_exchanges_head_tag() {
		let concrete = Arc::new(MemoryFileStore::new());
		let head_hash = concrete.create_raw_file(b"head of main").unwrap();
		concrete.set_tag(&protocol::head_tag("main"), head_hash);
		let store: Arc<dyn FileStore> = concrete;
		let registry = Arc::new(Registry::new(8));

		let (server_sock, client_sock) = socket_pair();
		let mint_engine = null_mint_engine(registry.clone());
		let mut responder = Session::new(
			server_sock,
			store.clone(),
			registry.clone(),
			mint_engine.clone(),
			"main".to_string(),
			true,
		)
		.unwrap();
		let mut initiator =
			Session::new(client_sock, store, registry, mint_engine, "main".to_string(), false).unwrap();

		// The responder's own `handshake()` only exchanges the greeting and
		// pid; the initiator's opening `chk` is served by the same loop
		// `run()` drives afterwards, so a single `serve_one_command` call
		// stands in for that here.
		let responder_thread = thread::spawn(move || {
			responder.handshake().unwrap();
			responder.serve_one_command().unwrap();
			responder
		});
		initiator.handshake().unwrap();
		let responder = responder_thread.join().unwrap();

		assert_eq!(initiator.state, SessionState::WaitingForPut);
		assert_eq!(responder.state, SessionState::WaitingForGet);
		assert_eq!(initiator.blockchain_head_hash, Some(head_hash));
	}

	#[test]
	fn non_chain_hello_handshake_establishes_trust() {
		let store: Arc<dyn FileStore> = Arc::new(MemoryFileStore::new());
		let registry = Arc::new(Registry::new(8));

		let (server_sock, client_sock) = socket_pair();
		let mint_engine = null_mint_engine(registry.clone());
		let mut responder = Session::new(
			server_sock,
			store.clone(),
			registry.clone(),
			mint_engine.clone(),
			String::new(),
			true,
		)
		.unwrap();
		let mut initiator =
			Session::new(client_sock, store, registry, mint_engine, String::new(), false).unwrap();

		let responder_thread = thread::spawn(move || {
			responder.handshake().unwrap();
			responder.serve_one_command().unwrap();
			responder
		});
		initiator.handshake().unwrap();
		let responder = responder_thread.join().unwrap();

		assert_eq!(initiator.trust, TrustLevel::Normal);
		assert_eq!(responder.trust, TrustLevel::Normal);
	}
}
