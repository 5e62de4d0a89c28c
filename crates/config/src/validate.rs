//! Configuration validation.
//!
//! Validates TOML configuration files against the known schema, detects
//! unknown or misspelled fields, and flags interceptor settings that would
//! silently disable interception.

use std::{collections::HashMap, path::Path};

use crate::schema::ChunkhookConfig;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Category: "syntax", "unknown-field", "type-error", "interceptor",
    /// "plugins", "file-ref"
    pub category: &'static str,
    /// Dotted path, e.g. "interceptor.chunk_global"
    pub path: String,
    pub message: String,
}

/// Result of validating a configuration file.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<std::path::PathBuf>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

// ── Schema tree for unknown-field detection ─────────────────────────────────

enum KnownKeys {
    Struct(HashMap<&'static str, KnownKeys>),
    /// Dynamic keys (plugin names, setting names).
    Map(Box<KnownKeys>),
    Leaf,
}

fn build_schema_map() -> KnownKeys {
    use KnownKeys::{Leaf, Map, Struct};

    Struct(HashMap::from([
        (
            "interceptor",
            Struct(HashMap::from([
                ("chunk_global", Leaf),
                ("factory_map_property", Leaf),
                ("chunks_loaded_property", Leaf),
                ("origin_marker", Leaf),
                ("ensure_chunk_signature", Leaf),
                ("init_callback_pattern", Leaf),
                ("self_reference", Leaf),
                ("source_url_prefix", Leaf),
                ("dev_mode", Leaf),
                ("normalize_newlines", Leaf),
            ])),
        ),
        (
            "plugins",
            Struct(HashMap::from([
                ("search_paths", Leaf),
                ("disabled", Leaf),
                ("settings", Map(Box::new(Map(Box::new(Leaf))))),
            ])),
        ),
    ]))
}

fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b_chars.len();
    }
    if b_chars.is_empty() {
        return a.chars().count();
    }

    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0; b_chars.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b_chars.len()]
}

/// Closest candidate within `max_distance` edits.
fn suggest<'a>(needle: &str, candidates: &[&'a str], max_distance: usize) -> Option<&'a str> {
    let mut best: Option<(&'a str, usize)> = None;
    for &candidate in candidates {
        let d = levenshtein(needle, candidate);
        if d > 0 && d <= max_distance && best.as_ref().is_none_or(|(_, bd)| d < *bd) {
            best = Some((candidate, d));
        }
    }
    best.map(|(s, _)| s)
}

// ── Core validation ─────────────────────────────────────────────────────────

/// Validate a config file at the given path, or the discovered config file
/// if `path` is `None`.
#[must_use]
pub fn validate(path: Option<&Path>) -> ValidationResult {
    let config_path = match path {
        Some(p) => Some(p.to_path_buf()),
        None => crate::loader::find_config_file(),
    };

    let Some(ref actual_path) = config_path else {
        return ValidationResult {
            diagnostics: vec![Diagnostic {
                severity: Severity::Info,
                category: "file-ref",
                path: String::new(),
                message: "no config file found; using defaults".into(),
            }],
            config_path: None,
        };
    };

    match std::fs::read_to_string(actual_path) {
        Ok(content) => {
            let mut result = validate_toml_str(&content);
            result.config_path = Some(actual_path.clone());
            result
        },
        Err(e) => ValidationResult {
            diagnostics: vec![Diagnostic {
                severity: Severity::Error,
                category: "syntax",
                path: String::new(),
                message: format!("failed to read config file: {e}"),
            }],
            config_path: Some(actual_path.clone()),
        },
    }
}

/// Validate TOML config text.
#[must_use]
pub fn validate_toml_str(toml_str: &str) -> ValidationResult {
    let mut diagnostics = Vec::new();

    let toml_value: toml::Value = match toml::from_str(toml_str) {
        Ok(v) => v,
        Err(e) => {
            diagnostics.push(Diagnostic {
                severity: Severity::Error,
                category: "syntax",
                path: String::new(),
                message: format!("TOML syntax error: {e}"),
            });
            return ValidationResult {
                diagnostics,
                config_path: None,
            };
        },
    };

    check_unknown_fields(&toml_value, &build_schema_map(), "", &mut diagnostics);

    match toml::from_str::<ChunkhookConfig>(toml_str) {
        Ok(config) => check_semantics(&config, &mut diagnostics),
        Err(e) => diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category: "type-error",
            path: String::new(),
            message: format!("type error: {e}"),
        }),
    }

    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

fn check_unknown_fields(
    value: &toml::Value,
    schema: &KnownKeys,
    prefix: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let join = |key: &str| {
        if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{prefix}.{key}")
        }
    };

    match (value, schema) {
        (toml::Value::Table(table), KnownKeys::Struct(fields)) => {
            let known_keys: Vec<&str> = fields.keys().copied().collect();
            for (key, child_value) in table {
                let path = join(key);
                if let Some(child_schema) = fields.get(key.as_str()) {
                    check_unknown_fields(child_value, child_schema, &path, diagnostics);
                    continue;
                }
                let message = match suggest(key, &known_keys, 3) {
                    Some(s) => format!("unknown field (did you mean \"{s}\"?)"),
                    None => "unknown field".to_string(),
                };
                diagnostics.push(Diagnostic {
                    severity: Severity::Error,
                    category: "unknown-field",
                    path,
                    message,
                });
            }
        },
        (toml::Value::Table(table), KnownKeys::Map(value_schema)) => {
            for (key, child_value) in table {
                check_unknown_fields(child_value, value_schema, &join(key), diagnostics);
            }
        },
        _ => {},
    }
}

fn check_semantics(config: &ChunkhookConfig, diagnostics: &mut Vec<Diagnostic>) {
    let ic = &config.interceptor;
    let required = [
        ("interceptor.chunk_global", &ic.chunk_global),
        ("interceptor.factory_map_property", &ic.factory_map_property),
        ("interceptor.chunks_loaded_property", &ic.chunks_loaded_property),
        ("interceptor.origin_marker", &ic.origin_marker),
        ("interceptor.init_callback_pattern", &ic.init_callback_pattern),
    ];
    for (path, value) in required {
        if value.trim().is_empty() {
            diagnostics.push(Diagnostic {
                severity: Severity::Error,
                category: "interceptor",
                path: path.into(),
                message: "must not be empty; interception would never trigger".into(),
            });
        }
    }

    if ic.factory_map_property == ic.chunks_loaded_property {
        diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category: "interceptor",
            path: "interceptor.chunks_loaded_property".into(),
            message: "must differ from factory_map_property".into(),
        });
    }

    if !ic.self_reference.contains("{id}") {
        diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            category: "interceptor",
            path: "interceptor.self_reference".into(),
            message: "has no {id} placeholder; every plugin's $self resolves to the same object"
                .into(),
        });
    }

    if ic.ensure_chunk_signature.trim().is_empty() {
        diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            category: "interceptor",
            path: "interceptor.ensure_chunk_signature".into(),
            message: "empty signature disables the structural runtime check".into(),
        });
    }

    for name in config.plugins.settings.keys() {
        if config.plugins.is_disabled(name) {
            diagnostics.push(Diagnostic {
                severity: Severity::Info,
                category: "plugins",
                path: format!("plugins.settings.{name}"),
                message: "settings for a disabled plugin are ignored".into(),
            });
        }
    }

    for path in &config.plugins.search_paths {
        if !path.is_dir() {
            diagnostics.push(Diagnostic {
                severity: Severity::Warning,
                category: "file-ref",
                path: "plugins.search_paths".into(),
                message: format!("{} is not a directory", path.display()),
            });
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levenshtein_basics() {
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("abc", ""), 3);
        assert_eq!(levenshtein("origin", "orign"), 1);
        assert_eq!(levenshtein("dev_mode", "dev_mdoe"), 2);
    }

    #[test]
    fn default_config_is_clean() {
        let result = validate_toml_str("");
        assert!(!result.has_errors(), "{:?}", result.diagnostics);
        assert_eq!(result.count(Severity::Warning), 0);
    }

    #[test]
    fn misspelled_field_gets_suggestion() {
        let result = validate_toml_str("[interceptor]\nchunk_globl = \"x\"\n");
        let d = result
            .diagnostics
            .iter()
            .find(|d| d.category == "unknown-field")
            .unwrap();
        assert_eq!(d.path, "interceptor.chunk_globl");
        assert!(d.message.contains("chunk_global"));
    }

    #[test]
    fn ensure_chunk_property_is_not_a_setting() {
        let result = validate_toml_str("[interceptor]\nensure_chunk_property = \"e\"\n");
        assert!(
            result
                .diagnostics
                .iter()
                .any(|d| d.category == "unknown-field"
                    && d.path == "interceptor.ensure_chunk_property")
        );
    }

    #[test]
    fn plugin_settings_accept_any_keys() {
        let result = validate_toml_str("[plugins.settings.pinDms]\nanything = 1\n");
        assert!(!result.has_errors(), "{:?}", result.diagnostics);
    }

    #[test]
    fn empty_property_is_an_error() {
        let result = validate_toml_str("[interceptor]\nfactory_map_property = \"\"\n");
        assert!(result.has_errors());
        assert!(
            result
                .diagnostics
                .iter()
                .any(|d| d.path == "interceptor.factory_map_property")
        );
    }

    #[test]
    fn same_property_names_are_rejected() {
        let result = validate_toml_str(
            "[interceptor]\nfactory_map_property = \"m\"\nchunks_loaded_property = \"m\"\n",
        );
        assert!(result.has_errors());
    }

    #[test]
    fn type_errors_are_reported() {
        let result = validate_toml_str("[interceptor]\ndev_mode = \"yes\"\n");
        assert!(result.diagnostics.iter().any(|d| d.category == "type-error"));
    }

    #[test]
    fn syntax_error_short_circuits() {
        let result = validate_toml_str("[interceptor\n");
        assert_eq!(result.diagnostics.len(), 1);
        assert_eq!(result.diagnostics[0].category, "syntax");
    }

    #[test]
    fn validate_reads_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("chunkhook.toml");
        std::fs::write(&path, "[plugins]\ndisabled = [\"a\"]\n[plugins.settings.a]\nx = true\n")
            .unwrap();
        let result = validate(Some(&path));
        assert_eq!(result.config_path.as_deref(), Some(path.as_path()));
        assert_eq!(result.count(Severity::Info), 1);
    }
}
