// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Typed per-session variables.
//!
//! The set of variable names and their types is fixed when the session is
//! created; assignments must match the declared type.

use super::{Result, SessionError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Declared type of a session variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VariableType {
    SignedInteger,
    UnsignedInteger,
    Float,
    Boolean,
    Text,
}

/// A tagged variable value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum VariableValue {
    SignedInteger(i64),
    UnsignedInteger(u64),
    Float(f64),
    Boolean(bool),
    Text(String),
}

impl VariableValue {
    #[must_use]
    pub fn variable_type(&self) -> VariableType {
        match self {
            Self::SignedInteger(_) => VariableType::SignedInteger,
            Self::UnsignedInteger(_) => VariableType::UnsignedInteger,
            Self::Float(_) => VariableType::Float,
            Self::Boolean(_) => VariableType::Boolean,
            Self::Text(_) => VariableType::Text,
        }
    }
}

/// A variable declaration: name, type, and optional default.
#[derive(Debug, Clone)]
pub struct VariableDeclaration {
    pub name: String,
    pub variable_type: VariableType,
    pub default: Option<VariableValue>,
}

impl VariableDeclaration {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        variable_type: VariableType,
        default: Option<VariableValue>,
    ) -> Self {
        Self {
            name: name.into(),
            variable_type,
            default,
        }
    }
}

/// The variable set of one session.
#[derive(Debug, Default)]
pub struct SessionVariableSet {
    types: HashMap<String, VariableType>,
    values: HashMap<String, VariableValue>,
}

impl SessionVariableSet {
    /// Build the set from its declarations. Defaults become the initial
    /// values.
    #[must_use]
    pub fn new(declarations: Vec<VariableDeclaration>) -> Self {
        let mut types = HashMap::with_capacity(declarations.len());
        let mut values = HashMap::new();
        for decl in declarations {
            if let Some(default) = decl.default {
                debug_assert_eq!(default.variable_type(), decl.variable_type);
                values.insert(decl.name.clone(), default);
            }
            types.insert(decl.name, decl.variable_type);
        }
        Self { types, values }
    }

    /// Declared type of a variable, if declared.
    #[must_use]
    pub fn variable_type(&self, name: &str) -> Option<VariableType> {
        self.types.get(name).copied()
    }

    /// Current value of a variable.
    ///
    /// # Errors
    ///
    /// `SessionError::VariableNotDeclared` for unknown names. A declared
    /// variable without default and never assigned yields `Ok(None)`.
    pub fn get(&self, name: &str) -> Result<Option<&VariableValue>> {
        if !self.types.contains_key(name) {
            return Err(SessionError::VariableNotDeclared(name.to_string()));
        }
        Ok(self.values.get(name))
    }

    /// Assign a variable.
    ///
    /// # Errors
    ///
    /// `VariableNotDeclared` for unknown names, `VariableInvalidValue` when
    /// the value's type differs from the declaration.
    pub fn set(&mut self, name: &str, value: VariableValue) -> Result<()> {
        let Some(declared) = self.types.get(name) else {
            return Err(SessionError::VariableNotDeclared(name.to_string()));
        };
        if value.variable_type() != *declared {
            return Err(SessionError::VariableInvalidValue(name.to_string()));
        }
        self.values.insert(name.to_string(), value);
        Ok(())
    }
}
