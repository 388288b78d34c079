// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Built-in compute services.

mod datastore;

pub use datastore::{DatastoreCommand, DatastoreReply, DatastoreService};
