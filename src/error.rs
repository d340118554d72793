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

//! Crate-wide error type.
//!
//! Mirrors the shape of a hand-written error enum rather than reaching for a
//! derive-macro error library: each external failure mode gets its own
//! variant and a manual `From` impl bridges the lower-level error types that
//! actually occur at the transport and file-store boundaries.

use std::fmt;
use std::io;

#[derive(Debug)]
pub enum Error {
	/// A socket read or write exceeded its allotted timeout.
	TransportTimeout,
	/// The peer closed its side of the connection.
	PeerClosed,
	/// A command arrived in a session state that does not permit it, or
	/// carried malformed arguments.
	ProtocolViolation(String),
	/// A received blob's content hash did not match the hash it was
	/// announced under.
	HashMismatch,
	/// The file store rejected a block or transaction during verification.
	VerificationFailed(String),
	/// The peer's address is not on the accepted list, or duplicates an
	/// already-connected peer.
	UnauthorizedPeer,
	/// The listener or connector is shutting down and will not start new
	/// sessions.
	ShutdownInProgress,
	/// A failure in the underlying file store.
	Store(String),
	/// Anything else; carries a short description for logging.
	Internal(String),
}

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			Error::TransportTimeout => write!(f, "transport timeout"),
			Error::PeerClosed => write!(f, "peer closed the connection"),
			Error::ProtocolViolation(msg) => write!(f, "protocol violation: {}", msg),
			Error::HashMismatch => write!(f, "received content does not match announced hash"),
			Error::VerificationFailed(msg) => write!(f, "verification failed: {}", msg),
			Error::UnauthorizedPeer => write!(f, "peer is not authorized"),
			Error::ShutdownInProgress => write!(f, "shutdown in progress"),
			Error::Store(msg) => write!(f, "store error: {}", msg),
			Error::Internal(msg) => write!(f, "internal error: {}", msg),
		}
	}
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
	fn from(e: io::Error) -> Error {
		match e.kind() {
			io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Error::TransportTimeout,
			io::ErrorKind::UnexpectedEof
			| io::ErrorKind::ConnectionReset
			| io::ErrorKind::ConnectionAborted
			| io::ErrorKind::BrokenPipe => Error::PeerClosed,
			_ => Error::Internal(e.to_string()),
		}
	}
}

impl From<std::num::ParseIntError> for Error {
	fn from(e: std::num::ParseIntError) -> Error {
		Error::ProtocolViolation(format!("bad integer: {}", e))
	}
}

impl From<hex::FromHexError> for Error {
	fn from(e: hex::FromHexError) -> Error {
		Error::ProtocolViolation(format!("bad hex: {}", e))
	}
}
