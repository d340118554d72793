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

//! Thin wrapper around the `log` facade. Kept separate from `main`/embedder
//! setup so both a production binary and the test suite can initialize
//! logging the same way.

use std::sync::Once;

static INIT: Once = Once::new();

/// Initializes the global logger once, from the `RUST_LOG` environment
/// variable, falling back to `info` for this crate's own module path.
pub fn init_logger() {
	INIT.call_once(|| {
		let mut builder = env_logger_builder();
		builder.init();
	});
}

/// Initializer for test binaries: same as `init_logger`, but never treats a
/// second call (from another test in the same binary) as an error.
#[cfg(any(test, feature = "test-support"))]
pub fn init_test_logger() {
	INIT.call_once(|| {
		env_logger_builder().init();
	});
}

fn env_logger_builder() -> env_logger::Builder {
	let mut builder = env_logger::Builder::new();
	if let Ok(filter) = std::env::var("RUST_LOG") {
		builder.parse(&filter);
	} else {
		builder.filter_level(log::LevelFilter::Info);
	}
	builder
}
