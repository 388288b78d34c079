// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Session administration service.
//!
//! Control-plane service (id 4) answering list/get/shutdown/variable
//! commands against the [`SessionRegistry`]. Commands and replies are
//! tagged JSON; failures are reported inside the reply body as diagnostic
//! records with the response code set to `ApplicationError`.

use super::{SessionError, SessionRegistry, ShutdownRequest, VariableValue};
use crate::api::{Request, Response, ResponseCode};
use crate::diagnostics::{DiagnosticCode, DiagnosticRecord};
use crate::framework::{
    Component, ComponentId, Environment, FrameworkError, Service, ServiceError, SERVICE_ID_SESSION,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::sync::Arc;
use std::time::UNIX_EPOCH;

/// Commands accepted by the session service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SessionCommand {
    #[serde(rename = "session_list")]
    List,

    #[serde(rename = "session_get")]
    Get { specifier: String },

    #[serde(rename = "session_shutdown")]
    Shutdown {
        specifier: String,
        request: ShutdownRequest,
    },

    #[serde(rename = "session_set_variable")]
    SetVariable {
        specifier: String,
        name: String,
        value: VariableValue,
    },

    #[serde(rename = "session_get_variable")]
    GetVariable { specifier: String, name: String },
}

/// One session as reported to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEntry {
    pub session_id: u64,
    pub label: String,
    pub application: String,
    pub user: String,
    pub connection_type: String,
    pub connection_info: String,
    pub start_at_epoch_secs: u64,
}

/// Replies produced by the session service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SessionReply {
    #[serde(rename = "session_list")]
    List { entries: Vec<SessionEntry> },

    #[serde(rename = "session_get")]
    Get { entry: SessionEntry },

    #[serde(rename = "session_shutdown")]
    Shutdown,

    #[serde(rename = "session_set_variable")]
    SetVariable,

    #[serde(rename = "session_get_variable")]
    GetVariable {
        name: String,
        value: Option<VariableValue>,
    },

    #[serde(rename = "error")]
    Error { diagnostic: DiagnosticRecord },
}

/// The session administration service.
#[derive(Default)]
pub struct SessionService {
    registry: Mutex<Option<Arc<SessionRegistry>>>,
}

impl SessionService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> Result<Arc<SessionRegistry>, ServiceError> {
        self.registry
            .lock()
            .clone()
            .ok_or_else(|| ServiceError::Internal("session registry not resolved".into()))
    }

    fn entry(context: &super::SessionContext) -> SessionEntry {
        let info = context.info();
        SessionEntry {
            session_id: info.id,
            label: info.label.clone(),
            application: info.application_name.clone(),
            user: info.user_name.clone(),
            connection_type: info.connection_kind.to_string(),
            connection_info: info.connection_info.clone(),
            start_at_epoch_secs: info
                .start_at
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default(),
        }
    }

    fn handle(
        &self,
        registry: &SessionRegistry,
        command: SessionCommand,
    ) -> Result<SessionReply, SessionError> {
        match command {
            SessionCommand::List => Ok(SessionReply::List {
                entries: registry
                    .list()
                    .iter()
                    .map(|c| Self::entry(c.as_ref()))
                    .collect(),
            }),
            SessionCommand::Get { specifier } => {
                let context = registry.find(&specifier)?;
                Ok(SessionReply::Get {
                    entry: Self::entry(&context),
                })
            }
            SessionCommand::Shutdown { specifier, request } => {
                let context = registry.find(&specifier)?;
                if context.shutdown_request() != ShutdownRequest::Nothing {
                    return Err(SessionError::AlreadyTerminated);
                }
                context.request_shutdown(request);
                Ok(SessionReply::Shutdown)
            }
            SessionCommand::SetVariable {
                specifier,
                name,
                value,
            } => {
                let context = registry.find(&specifier)?;
                context.with_variables(|vars| vars.set(&name, value))?;
                Ok(SessionReply::SetVariable)
            }
            SessionCommand::GetVariable { specifier, name } => {
                let context = registry.find(&specifier)?;
                let value = context.with_variables(|vars| vars.get(&name).map(|v| v.cloned()))?;
                Ok(SessionReply::GetVariable { name, value })
            }
        }
    }
}

fn diagnostic_for(error: &SessionError) -> DiagnosticRecord {
    let code = match error {
        SessionError::NotFound(_) => DiagnosticCode::SessionNotFound,
        SessionError::Ambiguous(_) => DiagnosticCode::SessionAmbiguous,
        SessionError::AlreadyTerminated => DiagnosticCode::SessionAlreadyTerminated,
        SessionError::VariableNotDeclared(_) => DiagnosticCode::SessionVariableNotDeclared,
        SessionError::VariableInvalidValue(_) => DiagnosticCode::SessionVariableInvalidValue,
    };
    DiagnosticRecord::new(code, error.to_string())
}

impl Component for SessionService {
    fn label(&self) -> &'static str {
        "session_service"
    }

    fn setup(&self, env: &Environment) -> Result<(), FrameworkError> {
        let registry = env
            .resource_repository()
            .find::<SessionRegistry>()
            .ok_or_else(|| {
                FrameworkError::Setup("session_service", "session registry missing".into())
            })?;
        *self.registry.lock() = Some(registry);
        Ok(())
    }
}

impl Service for SessionService {
    fn id(&self) -> ComponentId {
        SERVICE_ID_SESSION
    }

    fn call(&self, req: Arc<dyn Request>, res: Arc<dyn Response>) -> Result<(), ServiceError> {
        res.set_session_id(req.session_id());

        let command: SessionCommand = match serde_json::from_slice(req.payload()) {
            Ok(c) => c,
            Err(e) => {
                log::warn!("session service request parse error: {e}");
                return Err(ServiceError::Decode(e.to_string()));
            }
        };

        let registry = self.registry()?;
        let (code, reply) = match self.handle(&registry, command) {
            Ok(reply) => (ResponseCode::Success, reply),
            Err(e) => (
                ResponseCode::ApplicationError,
                SessionReply::Error {
                    diagnostic: diagnostic_for(&e),
                },
            ),
        };
        res.set_code(code);
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
    use crate::api::{ConnectionKind, SessionInfo};
    use crate::session::{SessionContext, SessionVariableSet, VariableDeclaration, VariableType};

    fn service_with_registry() -> (SessionService, Arc<SessionRegistry>) {
        let service = SessionService::new();
        let registry = Arc::new(SessionRegistry::new());
        *service.registry.lock() = Some(Arc::clone(&registry));
        (service, registry)
    }

    fn context(id: u64) -> Arc<SessionContext> {
        let declarations = vec![VariableDeclaration::new(
            "test_integer",
            VariableType::SignedInteger,
            Some(VariableValue::SignedInteger(123)),
        )];
        Arc::new(SessionContext::new(
            SessionInfo::new(id, ConnectionKind::Ipc, "ipc:test"),
            SessionVariableSet::new(declarations),
        ))
    }

    #[test]
    fn list_reflects_registry() {
        let (service, registry) = service_with_registry();
        let ctx = context(11);
        registry.register(&ctx);

        let reply = service
            .handle(&registry, SessionCommand::List)
            .expect("list");
        match reply {
            SessionReply::List { entries } => {
                assert_eq!(entries.len(), 1);
                assert_eq!(entries[0].session_id, 11);
            }
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[test]
    fn shutdown_marks_context_and_rejects_repeat() {
        let (service, registry) = service_with_registry();
        let ctx = context(5);
        registry.register(&ctx);

        let reply = service
            .handle(&registry, SessionCommand::Shutdown {
                specifier: ":5".into(),
                request: ShutdownRequest::Graceful,
            })
            .expect("shutdown");
        assert!(matches!(reply, SessionReply::Shutdown));
        assert_eq!(ctx.shutdown_request(), ShutdownRequest::Graceful);

        let repeat = service.handle(&registry, SessionCommand::Shutdown {
            specifier: ":5".into(),
            request: ShutdownRequest::Graceful,
        });
        assert_eq!(repeat.unwrap_err(), SessionError::AlreadyTerminated);
    }

    #[test]
    fn variable_roundtrip() {
        let (service, registry) = service_with_registry();
        let ctx = context(9);
        registry.register(&ctx);

        service
            .handle(&registry, SessionCommand::SetVariable {
                specifier: ":9".into(),
                name: "test_integer".into(),
                value: VariableValue::SignedInteger(-4),
            })
            .expect("set");

        let reply = service
            .handle(&registry, SessionCommand::GetVariable {
                specifier: ":9".into(),
                name: "test_integer".into(),
            })
            .expect("get");
        match reply {
            SessionReply::GetVariable { value, .. } => {
                assert_eq!(value, Some(VariableValue::SignedInteger(-4)));
            }
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[test]
    fn variable_type_mismatch_is_reported() {
        let (service, registry) = service_with_registry();
        let ctx = context(2);
        registry.register(&ctx);

        let result = service.handle(&registry, SessionCommand::SetVariable {
            specifier: ":2".into(),
            name: "test_integer".into(),
            value: VariableValue::Boolean(true),
        });
        assert_eq!(
            result.unwrap_err(),
            SessionError::VariableInvalidValue("test_integer".into())
        );
    }

    #[test]
    fn unknown_session_is_not_found() {
        let (service, registry) = service_with_registry();
        let result = service.handle(&registry, SessionCommand::Get {
            specifier: ":404".into(),
        });
        assert_eq!(result.unwrap_err(), SessionError::NotFound(":404".into()));
    }

    #[test]
    fn diagnostics_map_to_codes() {
        assert_eq!(
            diagnostic_for(&SessionError::Ambiguous("x".into())).code,
            DiagnosticCode::SessionAmbiguous
        );
        assert_eq!(
            diagnostic_for(&SessionError::AlreadyTerminated).code,
            DiagnosticCode::SessionAlreadyTerminated
        );
    }
}
