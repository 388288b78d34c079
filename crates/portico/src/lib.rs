// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # portico
//!
//! Server-side session framework of a database front-end. Portico accepts
//! client connections over shared memory and TCP, runs one worker per
//! session, routes decoded requests to registered services by id, and
//! offloads compute-heavy work onto a stealing-based task scheduler.
//!
//! ## Architecture
//!
//! ```text
//!  clients                 server process
//!  -------                 -------------------------------------------
//!  shm queue  --listen-->  ipc listener  --spawn-->  session worker
//!  tcp        --accept-->  stream listener --spawn-> session worker
//!  in-process ----------------------------call----> loopback endpoint
//!                                            |
//!                                            v
//!                    routing service (service_id -> handler)
//!                                            |
//!                          +-----------------+----------------+
//!                          v                 v                v
//!                    session service  datastore service   user services
//!                                            |
//!                                            v
//!                              work-stealing task scheduler
//! ```
//!
//! The [`framework::Server`] skeleton owns the component lifecycle
//! (`setup -> start -> shutdown`); sessions live in the
//! [`session::SessionRegistry`] and die with their workers.

pub mod api;
pub mod config;
pub mod diagnostics;
pub mod endpoint;
pub mod framework;
pub mod scheduler;
pub mod service;
pub mod session;
pub mod shm;

pub use config::ServerConfiguration;
pub use framework::{BootMode, Server};
