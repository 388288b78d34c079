// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Datastore administration service.
//!
//! Handler stubs behind the documented command/reply contract: backup
//! enumeration answers a fixed file list, the estimate answers fixed
//! numbers, restore operations succeed, tag operations are accepted
//! no-ops. The real datastore wiring replaces the stub bodies, not the
//! contract.

use crate::api::{Request, Response, ResponseCode};
use crate::framework::{
    Component, ComponentId, Service, ServiceError, SERVICE_ID_DATASTORE,
};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::sync::Arc;

/// Commands accepted by the datastore service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DatastoreCommand {
    #[serde(rename = "backup_begin")]
    BackupBegin,

    #[serde(rename = "backup_end")]
    BackupEnd,

    #[serde(rename = "backup_continue")]
    BackupContinue,

    #[serde(rename = "backup_estimate")]
    BackupEstimate,

    #[serde(rename = "restore_backup")]
    RestoreBackup { path: String },

    #[serde(rename = "restore_tag")]
    RestoreTag { name: String },

    #[serde(rename = "tag_list")]
    TagList,

    #[serde(rename = "tag_add")]
    TagAdd { name: String },

    #[serde(rename = "tag_get")]
    TagGet { name: String },

    #[serde(rename = "tag_remove")]
    TagRemove { name: String },
}

/// Replies produced by the datastore service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DatastoreReply {
    #[serde(rename = "backup_begin")]
    BackupBegin { files: Vec<String> },

    #[serde(rename = "backup_estimate")]
    BackupEstimate {
        number_of_files: u64,
        number_of_bytes: u64,
    },

    #[serde(rename = "success")]
    Success,
}

/// The datastore administration service.
#[derive(Default)]
pub struct DatastoreService;

impl DatastoreService {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    // TODO replace the stub bodies once the datastore resource lands
    fn handle(command: &DatastoreCommand) -> DatastoreReply {
        match command {
            DatastoreCommand::BackupBegin => DatastoreReply::BackupBegin {
                files: vec!["data/snapshot-0001".to_string(), "wal/segment-0001".to_string()],
            },
            DatastoreCommand::BackupEstimate => DatastoreReply::BackupEstimate {
                number_of_files: 123,
                number_of_bytes: 456,
            },
            DatastoreCommand::BackupEnd
            | DatastoreCommand::BackupContinue
            | DatastoreCommand::RestoreBackup { .. }
            | DatastoreCommand::RestoreTag { .. }
            | DatastoreCommand::TagList
            | DatastoreCommand::TagAdd { .. }
            | DatastoreCommand::TagGet { .. }
            | DatastoreCommand::TagRemove { .. } => DatastoreReply::Success,
        }
    }
}

impl Component for DatastoreService {
    fn label(&self) -> &'static str {
        "datastore_service"
    }
}

impl Service for DatastoreService {
    fn id(&self) -> ComponentId {
        SERVICE_ID_DATASTORE
    }

    fn call(&self, req: Arc<dyn Request>, res: Arc<dyn Response>) -> Result<(), ServiceError> {
        let command: DatastoreCommand = match serde_json::from_slice(req.payload()) {
            Ok(c) => c,
            Err(e) => {
                log::warn!("datastore request parse error: {e}");
                return Err(ServiceError::Decode(e.to_string()));
            }
        };
        log::debug!("datastore request {command:?}");

        res.set_session_id(req.session_id());
        res.set_code(ResponseCode::Success);
        let reply = Self::handle(&command);
        let body = serde_json::to_vec(&reply)
            .map_err(|e| ServiceError::Internal(format!("reply encode: {e}")))?;
        res.body(&body)?;
        Ok(())
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backup_begin_lists_files() {
        let reply = DatastoreService::handle(&DatastoreCommand::BackupBegin);
        match reply {
            DatastoreReply::BackupBegin { files } => assert_eq!(files.len(), 2),
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[test]
    fn estimate_reports_fixed_numbers() {
        let reply = DatastoreService::handle(&DatastoreCommand::BackupEstimate);
        assert_eq!(
            reply,
            DatastoreReply::BackupEstimate {
                number_of_files: 123,
                number_of_bytes: 456,
            }
        );
    }

    #[test]
    fn tag_operations_are_accepted() {
        for command in [
            DatastoreCommand::TagList,
            DatastoreCommand::TagAdd { name: "t1".into() },
            DatastoreCommand::TagGet { name: "t1".into() },
            DatastoreCommand::TagRemove { name: "t1".into() },
            DatastoreCommand::BackupEnd,
            DatastoreCommand::BackupContinue,
        ] {
            assert_eq!(DatastoreService::handle(&command), DatastoreReply::Success);
        }
    }

    #[test]
    fn command_encoding_is_tagged() {
        let text = serde_json::to_string(&DatastoreCommand::RestoreTag { name: "t".into() })
            .expect("encode");
        assert!(text.contains("\"type\":\"restore_tag\""));
    }
}
