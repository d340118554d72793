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

//! Accept loop and reconnect loop: the two entry points that create
//! sessions. Both poll a shared shutdown flag and hand ownership of each
//! accepted/connected socket to a freshly spawned `Session` thread.

use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crate::config::P2PConfig;
use crate::error::Error;
use crate::minting::MintEngine;
use crate::registry::Registry;
use crate::session::Session;
use crate::store::FileStore;
use crate::transport::{ACCEPT_TIMEOUT, CONNECT_TIMEOUT, RECONNECT_TIMEOUT};

/// Shared cooperative-shutdown flag; sessions and the listener/connector
/// poll it between blocking calls rather than being forcibly killed.
#[derive(Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
	pub fn new() -> ShutdownFlag {
		ShutdownFlag(Arc::new(AtomicBool::new(false)))
	}

	pub fn request(&self) {
		self.0.store(true, Ordering::SeqCst);
	}

	pub fn is_set(&self) -> bool {
		self.0.load(Ordering::SeqCst)
	}
}

pub struct Listener {
	chain: String,
	port: u16,
	config: Arc<P2PConfig>,
	registry: Arc<Registry>,
	store: Arc<dyn FileStore>,
	mint_engine: Arc<MintEngine>,
	shutdown: ShutdownFlag,
}

impl Listener {
	pub fn new(
		chain: String,
		port: u16,
		config: Arc<P2PConfig>,
		registry: Arc<Registry>,
		store: Arc<dyn FileStore>,
		mint_engine: Arc<MintEngine>,
		shutdown: ShutdownFlag,
	) -> Listener {
		Listener {
			chain,
			port,
			config,
			registry,
			store,
			mint_engine,
			shutdown,
		}
	}

	/// Binds and accepts in a loop with an effective 250ms accept timeout
	/// (via a non-blocking socket polled on that cadence), gated on the
	/// peer cap, IP acceptance, and no-duplicate-IP rules. Intended to run
	/// on its own thread for the lifetime of the node.
	pub fn run(&self) -> Result<(), Error> {
		let listener = TcpListener::bind(("0.0.0.0", self.port))?;
		listener.set_nonblocking(true)?;
		info!("peer listener started on port {} for chain {}", self.port, self.chain);

		while !self.shutdown.is_set() {
			match listener.accept() {
				Ok((stream, addr)) => {
					if self.registry.has_max_peers() {
						debug!("rejecting inbound peer {}: at max peers", addr);
						continue;
					}
					if !self.config.accepted_peer_ip_addr.is_accepted(&addr.ip()) {
						debug!("rejecting inbound peer {}: ip not accepted", addr);
						continue;
					}
					let ip_str = addr.ip().to_string();
					if !self.registry.try_register_ip(&ip_str, addr.ip().is_loopback()) {
						debug!("rejecting inbound peer {}: ip already has an active session", addr);
						continue;
					}
					if !self.registry.try_acquire_slot() {
						self.registry.unregister_ip(&ip_str, addr.ip().is_loopback());
						continue;
					}
					self.spawn_responder(stream, ip_str, addr.ip().is_loopback());
				}
				Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
					thread::sleep(ACCEPT_TIMEOUT);
				}
				Err(e) => {
					warn!("peer session warning: accept failed: {}", e);
					thread::sleep(ACCEPT_TIMEOUT);
				}
			}
		}
		Ok(())
	}

	fn spawn_responder(&self, stream: TcpStream, ip_str: String, is_loopback: bool) {
		let store = self.store.clone();
		let registry = self.registry.clone();
		let mint_engine = self.mint_engine.clone();
		let chain = self.chain.clone();
		thread::spawn(
			move || match Session::new(stream, store, registry.clone(), mint_engine, chain, true) {
				Ok(mut session) => session.run(),
				Err(e) => {
					warn!("peer session warning: failed to start responder session: {}", e);
					registry.release_slot();
					registry.unregister_ip(&ip_str, is_loopback);
				}
			},
		);
	}
}

pub struct Connector {
	chain: String,
	config: Arc<P2PConfig>,
	registry: Arc<Registry>,
	store: Arc<dyn FileStore>,
	mint_engine: Arc<MintEngine>,
	shutdown: ShutdownFlag,
}

impl Connector {
	pub fn new(
		chain: String,
		config: Arc<P2PConfig>,
		registry: Arc<Registry>,
		store: Arc<dyn FileStore>,
		mint_engine: Arc<MintEngine>,
		shutdown: ShutdownFlag,
	) -> Connector {
		Connector {
			chain,
			config,
			registry,
			store,
			mint_engine,
			shutdown,
		}
	}

	/// Connects to every configured initial peer for this connector's
	/// chain, spawning an initiator session for each that accepts.
	pub fn bootstrap(&self) {
		for (ip, peer) in &self.config.initial_peer_ips {
			let (chain, port) = split_chain_port(&peer.chain_and_port, &self.config, &self.chain);
			if chain != self.chain {
				continue;
			}
			if !self.config.accepted_peer_ip_addr.is_accepted(&parse_ip(ip)) {
				continue;
			}
			self.connect_and_spawn(ip, port);
		}
	}

	/// One iteration of the reconnect loop: pops a single retry-queue
	/// candidate for this chain and either reconnects it or, on failure,
	/// re-appends it for a later attempt.
	pub fn poll_retry_queue(&self) {
		let policy = self.config.accepted_peer_ip_addr.clone();
		let candidate =
			self.registry
				.get_peer_to_retry(&self.chain, |ip| policy.is_accepted(&parse_ip(ip)));
		let entry = match candidate {
			Some(e) => e,
			None => return,
		};
		let mut parts = entry.splitn(2, '!');
		let ip = parts.next().unwrap_or(&entry).to_string();
		let port = parts
			.next()
			.and_then(|p| p.parse().ok())
			.unwrap_or_else(|| self.config.port_for_chain(&self.chain, 0));

		let was_good = self.registry.was_good_peer(&format!("{}={}", ip, self.chain));
		if !self.connect_and_spawn(&ip, port) && was_good {
			self.registry.add_peer_to_retry(&self.chain, &entry);
		}
	}

	fn connect_and_spawn(&self, ip: &str, port: u16) -> bool {
		if self.shutdown.is_set() || self.registry.has_max_peers() {
			return false;
		}
		let addr: std::net::SocketAddr = match format!("{}:{}", ip, port).parse() {
			Ok(a) => a,
			Err(_) => return false,
		};
		let stream = match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
			Ok(s) => s,
			Err(_) => return false,
		};
		if !self.registry.try_acquire_slot() {
			return false;
		}
		let store = self.store.clone();
		let registry = self.registry.clone();
		let mint_engine = self.mint_engine.clone();
		let chain = self.chain.clone();
		thread::spawn(
			move || match Session::new(stream, store, registry.clone(), mint_engine, chain, false) {
				Ok(mut session) => session.run(),
				Err(e) => {
					warn!("peer session warning: failed to start initiator session: {}", e);
					registry.release_slot();
				}
			},
		);
		true
	}

	/// Drives `poll_retry_queue` on a cadence until shutdown is requested.
	pub fn run(&self) {
		while !self.shutdown.is_set() {
			self.poll_retry_queue();
			thread::sleep(RECONNECT_TIMEOUT);
		}
	}
}

fn parse_ip(ip: &str) -> std::net::IpAddr {
	ip.parse().unwrap_or(std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED))
}

fn split_chain_port(chain_and_port: &str, config: &P2PConfig, default_chain: &str) -> (String, u16) {
	match chain_and_port.split_once(':') {
		Some((chain, port)) => (
			chain.to_string(),
			port.parse().unwrap_or_else(|_| config.port_for_chain(chain, 0)),
		),
		None => {
			let chain = if chain_and_port.is_empty() {
				default_chain.to_string()
			} else {
				chain_and_port.to_string()
			};
			let port = config.port_for_chain(&chain, 0);
			(chain, port)
		}
	}
}
