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

//! Line-oriented socket transport with per-call timeouts and a maximum
//! line length, plus blob transfer helpers used by `get`/`put`.

use std::io::{self, BufReader, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use net2::TcpStreamExt;

use crate::error::Error;

/// Lines longer than this are treated as a protocol violation and end the
/// session; mirrors the fixed wire-protocol line cap.
pub const MAX_LINE_LENGTH: usize = 500;

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
pub const GREETING_TIMEOUT: Duration = Duration::from_secs(10);
pub const PID_TIMEOUT: Duration = Duration::from_secs(1);
pub const CONNECT_TIMEOUT: Duration = Duration::from_millis(2500);
pub const RECONNECT_TIMEOUT: Duration = Duration::from_millis(1000);
pub const ACCEPT_TIMEOUT: Duration = Duration::from_millis(250);
pub const REQUEST_THROTTLE_SLEEP: Duration = Duration::from_millis(250);

/// A read whose source yields an error once more than `max` bytes have
/// passed through it. Used to enforce `MAX_LINE_LENGTH` without first
/// buffering an attacker-controlled amount of data.
struct LimitedRead<'a, R: Read> {
	counter: usize,
	max: usize,
	source: &'a mut R,
}

impl<'a, R: Read> Read for LimitedRead<'a, R> {
	fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
		let n = self.source.read(buf)?;
		self.counter += n;
		if self.counter > self.max {
			return Err(io::Error::new(io::ErrorKind::InvalidData, "line too long"));
		}
		Ok(n)
	}
}

pub struct SessionTransport {
	stream: TcpStream,
	reader: BufReader<TcpStream>,
}

impl SessionTransport {
	pub fn new(stream: TcpStream) -> Result<SessionTransport, Error> {
		let reader_stream = stream.try_clone()?;
		Ok(SessionTransport {
			stream,
			reader: BufReader::new(reader_stream),
		})
	}

	pub fn peer_addr(&self) -> Result<std::net::SocketAddr, Error> {
		Ok(self.stream.peer_addr()?)
	}

	/// Allows the OS to coalesce small writes; used before multi-part
	/// responses.
	pub fn set_delay(&self) -> Result<(), Error> {
		self.stream.set_nodelay(false)?;
		Ok(())
	}

	/// Forces each write straight onto the wire; used for single-line
	/// replies and terminal `okay`s.
	pub fn set_no_delay(&self) -> Result<(), Error> {
		self.stream.set_nodelay(true)?;
		Ok(())
	}

	fn set_timeout(&self, timeout: Duration) -> Result<(), Error> {
		self.stream.set_read_timeout(Some(timeout))?;
		self.stream.set_write_timeout(Some(timeout))?;
		Ok(())
	}

	/// Reads one newline-terminated line (newline stripped), enforcing
	/// `MAX_LINE_LENGTH` and `timeout`. A zero-byte read before any data is
	/// read back as `Error::PeerClosed`.
	pub fn read_line(&mut self, timeout: Duration) -> Result<String, Error> {
		self.set_timeout(timeout)?;
		let mut buf = Vec::new();
		{
			let mut limited = LimitedRead {
				counter: 0,
				max: MAX_LINE_LENGTH,
				source: &mut self.reader,
			};
			let mut byte = [0u8; 1];
			loop {
				let n = match limited.read(&mut byte) {
					Ok(n) => n,
					Err(e) if e.kind() == io::ErrorKind::InvalidData => return Err(Error::PeerClosed),
					Err(e) => return Err(e.into()),
				};
				if n == 0 {
					if buf.is_empty() {
						return Err(Error::PeerClosed);
					}
					break;
				}
				if byte[0] == b'\n' {
					break;
				}
				buf.push(byte[0]);
			}
		}
		if buf.last() == Some(&b'\r') {
			buf.pop();
		}
		String::from_utf8(buf).map_err(|e| Error::ProtocolViolation(e.to_string()))
	}

	pub fn write_line(&mut self, line: &str, timeout: Duration) -> Result<(), Error> {
		self.set_timeout(timeout)?;
		self.stream.write_all(line.as_bytes())?;
		self.stream.write_all(b"\n")?;
		self.stream.flush()?;
		Ok(())
	}

	/// Writes a blob to the peer with a one-line length header.
	pub fn send_blob(&mut self, bytes: &[u8], timeout: Duration) -> Result<(), Error> {
		self.write_line(&bytes.len().to_string(), timeout)?;
		self.set_timeout(timeout)?;
		self.stream.write_all(bytes)?;
		self.stream.flush()?;
		Ok(())
	}

	/// Reads a blob preceded by a one-line length header.
	pub fn recv_blob(&mut self, timeout: Duration) -> Result<Vec<u8>, Error> {
		let len_line = self.read_line(timeout)?;
		let len: usize = len_line
			.trim()
			.parse()
			.map_err(|_| Error::ProtocolViolation(format!("bad blob length: {}", len_line)))?;
		self.set_timeout(timeout)?;
		let mut buf = vec![0u8; len];
		self.reader.read_exact(&mut buf)?;
		Ok(buf)
	}
}
