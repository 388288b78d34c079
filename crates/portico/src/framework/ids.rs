// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Well-known component ids.
//!
//! Service ids are part of the client protocol: request frames address
//! services by these numbers. `endpoint_broker` and `routing` are reserved
//! and handled specially by endpoint workers; the rest are ordinary
//! services.

use super::ComponentId;

/// Endpoint control requests (cancel, session bye). Handled inline by the
/// endpoint worker, never dispatched to a service object.
pub const SERVICE_ID_ENDPOINT_BROKER: ComponentId = 1;

/// The routing service itself; requests addressed here carry routing meta
/// operations.
pub const SERVICE_ID_ROUTING: ComponentId = 2;

/// Datastore administration (backup/restore/tags).
pub const SERVICE_ID_DATASTORE: ComponentId = 3;

/// Session administration (list/get/shutdown/variables).
pub const SERVICE_ID_SESSION: ComponentId = 4;

/// Session registry resource.
pub const RESOURCE_ID_SESSION: ComponentId = 1;

/// Task scheduler resource.
pub const RESOURCE_ID_TASK_SCHEDULER: ComponentId = 2;
