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

//! Peer session protocol, orchestration and minting for a content-addressed
//! blockchain node. One OS thread drives each session over a blocking,
//! line-oriented socket; a registry of mutex-guarded maps coordinates state
//! shared across sessions.

#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]

#[macro_use]
extern crate log;
extern crate env_logger;
extern crate net2;
extern crate rand;
extern crate serde;
#[macro_use]
extern crate serde_derive;
extern crate hex;
extern crate sha2;
extern crate tempfile;

pub mod config;
pub mod error;
pub mod hash;
pub mod logging;
pub mod minting;
pub mod orchestrator;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod store;
pub mod transport;
pub mod wire;

pub use config::P2PConfig;
pub use error::Error;
pub use hash::{ContentHash, HashWithSig};
pub use minting::{MintEngine, Minter};
pub use registry::Registry;
pub use server::{Connector, Listener};
pub use session::Session;
pub use store::FileStore;
