// Copyright 2022 Ryan Seipp
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

#![deny(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unused_imports
)]
// Disallow warnings in examples.
#![doc(test(attr(deny(warnings))))]

//! Readiness-driven HTTP/1.1 static file and login/registration server.
//!
//! Wires the [`parser`] crate's two-level request parser and the
//! [`dbpool`] crate's connection pool into a `mio` reactor, a self-pipe
//! signal funnel, an acceptor/dispatcher running either as a worker-thread
//! pool fed by a bounded queue or as a multi-process pool coordinated over
//! `socketpair`s, per-connection state and buffers, routing and response
//! assembly, and an idle-timeout min-heap.

pub mod config;
pub mod connection;
pub mod context;
pub mod db;
pub mod error;
pub mod listener;
pub mod logging;
pub mod multiprocess;
pub mod response;
pub mod router;
pub mod signals;
pub mod timer;
pub mod users;
pub mod workqueue;
