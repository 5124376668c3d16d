//! Namespace and logging settings loaded via OrthoConfig.

use ortho_config::OrthoConfig;
use serde::Deserialize;

use crate::domain::{DEFAULT_ROOT_COLLECTION, DEFAULT_SCHEMA_VERSION, Namespace, PathError};

/// Settings shared by every client of one deployment.
#[derive(Debug, Clone, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "SECURE_NOTES")]
pub struct SecureNotesSettings {
    /// Top-level collection holding every document.
    pub root_collection: Option<String>,
    /// Schema version segment under the root collection.
    pub schema_version: Option<String>,
    /// Emit JSON log lines instead of human-readable ones.
    #[ortho_config(default = false)]
    pub log_json: bool,
}

impl SecureNotesSettings {
    /// Configured root collection, falling back to the default.
    pub fn root_collection(&self) -> &str {
        self.root_collection
            .as_deref()
            .unwrap_or(DEFAULT_ROOT_COLLECTION)
    }

    /// Configured schema version, falling back to the default.
    pub fn schema_version(&self) -> &str {
        self.schema_version
            .as_deref()
            .unwrap_or(DEFAULT_SCHEMA_VERSION)
    }

    /// Namespace built from the configured segments.
    pub fn namespace(&self) -> Result<Namespace, PathError> {
        Namespace::new(self.root_collection(), self.schema_version())
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for settings parsing.

    use super::*;
    use std::ffi::OsString;

    use env_lock::lock_env;
    use rstest::rstest;

    fn load_from_empty_args() -> SecureNotesSettings {
        SecureNotesSettings::load_from_iter([OsString::from("secure-notes")])
            .expect("config should load")
    }

    #[rstest]
    fn defaults_give_the_standard_namespace() {
        let _guard = lock_env([
            ("SECURE_NOTES_ROOT_COLLECTION", None::<String>),
            ("SECURE_NOTES_SCHEMA_VERSION", None::<String>),
            ("SECURE_NOTES_LOG_JSON", None::<String>),
        ]);

        let settings = load_from_empty_args();
        assert!(!settings.log_json);
        assert_eq!(
            settings.namespace().expect("default namespace"),
            Namespace::default()
        );
    }

    #[rstest]
    fn environment_overrides_are_respected() {
        let _guard = lock_env([
            ("SECURE_NOTES_ROOT_COLLECTION", Some("notes-staging".to_owned())),
            ("SECURE_NOTES_SCHEMA_VERSION", Some("v2".to_owned())),
            ("SECURE_NOTES_LOG_JSON", Some("true".to_owned())),
        ]);

        let settings = load_from_empty_args();
        assert!(settings.log_json);
        let namespace = settings.namespace().expect("valid namespace");
        assert_eq!(namespace.root().to_string(), "notes-staging/v2");
    }

    #[rstest]
    fn separators_in_segments_are_rejected() {
        let _guard = lock_env([
            ("SECURE_NOTES_ROOT_COLLECTION", Some("a/b".to_owned())),
            ("SECURE_NOTES_SCHEMA_VERSION", None::<String>),
            ("SECURE_NOTES_LOG_JSON", None::<String>),
        ]);

        let settings = load_from_empty_args();
        assert!(settings.namespace().is_err());
    }
}
