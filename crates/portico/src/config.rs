// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Server configuration tree.
//!
//! An INI-like file of `[section]` / `key = value` pairs, parsed as TOML.
//! Every section carries a built-in default table; a key missing from the
//! user's file falls back to its default, a missing file means defaults
//! only. The reverse is a hard error: a section or key in the user's file
//! with no counterpart in the default tree aborts startup before any thread
//! is created.

use std::fmt;
use std::path::Path;
use thiserror::Error;
use toml::Value;

/// Built-in default tree. Section and key names here define what a user
/// file may contain.
const DEFAULT_CONFIGURATION: &str = r#"
[sql]
thread_pool_size = 5
lazy_worker = false

[ipc_endpoint]
database_name = "portico"
threads = 104
admin_sessions = 1

[stream_endpoint]
port = 12345
threads = 104

[fdw]
name = "portico"
threads = 104

[data_store]
log_location = ""
"#;

/// Configuration errors. All abort startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("unknown section [{0}] in configuration file")]
    OrphanSection(String),

    #[error("unknown key {1:?} in section [{0}]")]
    OrphanKey(String, String),

    #[error("section [{0}] is not a table")]
    NotASection(String),
}

/// One configuration section with default fallback.
pub struct Section {
    name: String,
    values: toml::value::Table,
    defaults: toml::value::Table,
}

impl Section {
    /// Typed getter. Values from the user file shadow defaults.
    ///
    /// Returns `None` when the key is unknown to the section or the value
    /// does not convert to `T`.
    #[must_use]
    pub fn get<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.values.get(key).or_else(|| self.defaults.get(key))?;
        T::deserialize(value.clone()).ok()
    }

    /// Section name, without brackets.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Section")
            .field("name", &self.name)
            .field("keys", &self.values.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// The whole configuration: all sections known to the default tree.
#[derive(Debug)]
pub struct ServerConfiguration {
    sections: Vec<Section>,
}

impl ServerConfiguration {
    /// Load from a file, falling back to defaults when the file is absent.
    ///
    /// # Errors
    ///
    /// Parse failures and orphan sections/keys are startup errors; an
    /// unreadable-but-present file is an I/O error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_str(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!(
                    "cannot find {}, using default configuration only",
                    path.display()
                );
                Self::from_str("")
            }
            Err(e) => Err(ConfigError::Io(e)),
        }
    }

    /// Build from configuration text.
    ///
    /// # Errors
    ///
    /// See [`ServerConfiguration::load`].
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(text: &str) -> Result<Self, ConfigError> {
        let defaults: Value = DEFAULT_CONFIGURATION
            .parse()
            .expect("built-in default configuration must parse");
        let defaults = match defaults {
            Value::Table(t) => t,
            _ => unreachable!("default configuration is a table"),
        };

        let user: Value = text.parse()?;
        let user = match user {
            Value::Table(t) => t,
            _ => return Err(ConfigError::NotASection("<root>".into())),
        };

        // Orphan check: everything in the user tree must exist in the
        // default tree.
        for (section_name, section_value) in &user {
            let Some(default_section) = defaults.get(section_name) else {
                return Err(ConfigError::OrphanSection(section_name.clone()));
            };
            let Value::Table(section_table) = section_value else {
                return Err(ConfigError::NotASection(section_name.clone()));
            };
            let Value::Table(default_table) = default_section else {
                return Err(ConfigError::NotASection(section_name.clone()));
            };
            for key in section_table.keys() {
                if !default_table.contains_key(key) {
                    return Err(ConfigError::OrphanKey(section_name.clone(), key.clone()));
                }
            }
        }

        let mut sections = Vec::with_capacity(defaults.len());
        for (name, default_value) in defaults {
            let Value::Table(default_table) = default_value else {
                continue;
            };
            let values = match user.get(&name) {
                Some(Value::Table(t)) => t.clone(),
                _ => toml::value::Table::new(),
            };
            sections.push(Section {
                name,
                values,
                defaults: default_table,
            });
        }

        Ok(Self { sections })
    }

    /// Look up a section by name.
    #[must_use]
    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }
}

impl Default for ServerConfiguration {
    fn default() -> Self {
        Self::from_str("").expect("default configuration must build")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_only() {
        let cfg = ServerConfiguration::default();
        let sql = cfg.section("sql").expect("sql section");
        assert_eq!(sql.get::<usize>("thread_pool_size"), Some(5));
        assert_eq!(sql.get::<bool>("lazy_worker"), Some(false));

        let ipc = cfg.section("ipc_endpoint").expect("ipc section");
        assert_eq!(ipc.get::<String>("database_name").as_deref(), Some("portico"));
        assert_eq!(ipc.get::<usize>("threads"), Some(104));
        assert_eq!(ipc.get::<usize>("admin_sessions"), Some(1));

        let stream = cfg.section("stream_endpoint").expect("stream section");
        assert_eq!(stream.get::<u16>("port"), Some(12345));
    }

    #[test]
    fn user_values_shadow_defaults() {
        let cfg = ServerConfiguration::from_str(
            "[ipc_endpoint]\ndatabase_name = \"testdb\"\nthreads = 8\n",
        )
        .expect("config");
        let ipc = cfg.section("ipc_endpoint").expect("section");
        assert_eq!(ipc.get::<String>("database_name").as_deref(), Some("testdb"));
        assert_eq!(ipc.get::<usize>("threads"), Some(8));
        // untouched key still falls back
        assert_eq!(ipc.get::<usize>("admin_sessions"), Some(1));
    }

    #[test]
    fn partial_section_keeps_other_sections() {
        let cfg = ServerConfiguration::from_str("[sql]\nthread_pool_size = 2\n").expect("config");
        assert_eq!(
            cfg.section("sql").unwrap().get::<usize>("thread_pool_size"),
            Some(2)
        );
        assert_eq!(
            cfg.section("stream_endpoint").unwrap().get::<u16>("port"),
            Some(12345)
        );
    }

    #[test]
    fn orphan_section_is_an_error() {
        let result = ServerConfiguration::from_str("[no_such_section]\nkey = 1\n");
        assert!(matches!(result, Err(ConfigError::OrphanSection(s)) if s == "no_such_section"));
    }

    #[test]
    fn orphan_key_is_an_error() {
        let result = ServerConfiguration::from_str("[sql]\nno_such_key = 1\n");
        assert!(
            matches!(result, Err(ConfigError::OrphanKey(s, k)) if s == "sql" && k == "no_such_key")
        );
    }

    #[test]
    fn unknown_key_in_known_section_returns_none() {
        let cfg = ServerConfiguration::default();
        let sql = cfg.section("sql").expect("section");
        assert_eq!(sql.get::<usize>("does_not_exist"), None);
    }

    #[test]
    fn missing_file_uses_defaults() {
        let cfg = ServerConfiguration::load("/no/such/portico.conf").expect("defaults");
        assert_eq!(
            cfg.section("sql").unwrap().get::<usize>("thread_pool_size"),
            Some(5)
        );
    }

    #[test]
    fn load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "[stream_endpoint]\nport = 54321").expect("write");
        let cfg = ServerConfiguration::load(file.path()).expect("config");
        assert_eq!(
            cfg.section("stream_endpoint").unwrap().get::<u16>("port"),
            Some(54321)
        );
    }

    #[test]
    fn malformed_file_is_an_error() {
        let result = ServerConfiguration::from_str("not valid = = toml [");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }
}
