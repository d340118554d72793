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

//! Parsing and formatting of the ASCII command/response lines exchanged
//! between sessions.

use std::fmt;

use crate::error::Error;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
	/// `chk <tag-or-hash> [nonce]`
	Chk { target: String, nonce: Option<String> },
	/// `get <tag-or-hash>`
	Get { target: String },
	/// `put <hash>`
	Put { hash: String },
	/// `pip <ip>`
	Pip { ip: String },
	Tls,
	Bye,
	Help { pattern: Option<String> },
	Usage,
}

impl Command {
	/// Name used in log lines and error messages.
	pub fn name(&self) -> &'static str {
		match self {
			Command::Chk { .. } => "chk",
			Command::Get { .. } => "get",
			Command::Put { .. } => "put",
			Command::Pip { .. } => "pip",
			Command::Tls => "tls",
			Command::Bye => "bye",
			Command::Help { .. } => "help",
			Command::Usage => "?",
		}
	}
}

impl fmt::Display for Command {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			Command::Chk { target, nonce: Some(n) } => write!(f, "chk {} {}", target, n),
			Command::Chk { target, nonce: None } => write!(f, "chk {}", target),
			Command::Get { target } => write!(f, "get {}", target),
			Command::Put { hash } => write!(f, "put {}", hash),
			Command::Pip { ip } => write!(f, "pip {}", ip),
			Command::Tls => write!(f, "tls"),
			Command::Bye => write!(f, "bye"),
			Command::Help { pattern: Some(p) } => write!(f, "help {}", p),
			Command::Help { pattern: None } => write!(f, "help"),
			Command::Usage => write!(f, "?"),
		}
	}
}

impl std::str::FromStr for Command {
	type Err = Error;

	fn from_str(line: &str) -> Result<Command, Error> {
		let mut parts = line.trim().splitn(3, ' ');
		let cmd = parts
			.next()
			.ok_or_else(|| Error::ProtocolViolation("empty command line".to_string()))?;
		match cmd {
			"chk" => {
				let target = parts
					.next()
					.ok_or_else(|| Error::ProtocolViolation("chk requires a target".to_string()))?
					.to_string();
				let nonce = parts.next().map(|s| s.to_string());
				Ok(Command::Chk { target, nonce })
			}
			"get" => Ok(Command::Get {
				target: parts
					.next()
					.ok_or_else(|| Error::ProtocolViolation("get requires a target".to_string()))?
					.to_string(),
			}),
			"put" => Ok(Command::Put {
				hash: parts
					.next()
					.ok_or_else(|| Error::ProtocolViolation("put requires a hash".to_string()))?
					.to_string(),
			}),
			"pip" => Ok(Command::Pip {
				ip: parts
					.next()
					.ok_or_else(|| Error::ProtocolViolation("pip requires an ip".to_string()))?
					.to_string(),
			}),
			"tls" => Ok(Command::Tls),
			"bye" => Ok(Command::Bye),
			"help" => Ok(Command::Help {
				pattern: parts.next().map(|s| s.to_string()),
			}),
			"?" => Ok(Command::Usage),
			other => Err(Error::ProtocolViolation(format!("unknown command: {}", other))),
		}
	}
}

/// A single-line response. Blob bodies that follow a response are framed
/// separately by the transport, not represented here.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Response {
	Okay,
	OkayMore,
	None,
	Error(String),
	Hash(String),
}

impl fmt::Display for Response {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			Response::Okay => write!(f, "(okay)"),
			Response::OkayMore => write!(f, "(okay-more)"),
			Response::None => write!(f, "(none)"),
			Response::Error(msg) => write!(f, "(error) {}", msg),
			Response::Hash(h) => write!(f, "{}", h),
		}
	}
}

impl std::str::FromStr for Response {
	type Err = Error;

	fn from_str(line: &str) -> Result<Response, Error> {
		let line = line.trim();
		if line == "(okay)" {
			Ok(Response::Okay)
		} else if line == "(okay-more)" {
			Ok(Response::OkayMore)
		} else if line == "(none)" {
			Ok(Response::None)
		} else if let Some(rest) = line.strip_prefix("(error) ") {
			Ok(Response::Error(rest.to_string()))
		} else if line == "(error)" {
			Ok(Response::Error(String::new()))
		} else {
			Ok(Response::Hash(line.to_string()))
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::str::FromStr;

	#[test]
	fn parses_chk_with_and_without_nonce() {
		let c = Command::from_str("chk cmain.head").unwrap();
		assert_eq!(
			c,
			Command::Chk {
				target: "cmain.head".to_string(),
				nonce: None
			}
		);
		let c = Command::from_str("chk abc123 noncevalue").unwrap();
		assert_eq!(
			c,
			Command::Chk {
				target: "abc123".to_string(),
				nonce: Some("noncevalue".to_string())
			}
		);
	}

	#[test]
	fn rejects_unknown_commands() {
		assert!(Command::from_str("frobnicate").is_err());
	}

	#[test]
	fn response_round_trips() {
		let r = Response::from_str("(error) bad state").unwrap();
		assert_eq!(r, Response::Error("bad state".to_string()));
		assert_eq!(r.to_string(), "(error) bad state");

		let r = Response::from_str("(none)").unwrap();
		assert_eq!(r, Response::None);

		let r = Response::from_str("deadbeef").unwrap();
		assert_eq!(r, Response::Hash("deadbeef".to_string()));
	}
}
