//! Sandbox policy for the `code` handler.
//!
//! Two layers:
//!
//! 1. [`DenyList`], a regex pre-filter over the source text. A match is a
//!    [`StepError::SecurityRejection`] and the script never runs. This filter
//!    is pattern based and can be bypassed by obfuscation (string building,
//!    unusual whitespace, aliasing). It is a fast reject, not a boundary.
//! 2. [`SandboxConfig`], applied to the Rhai engine: no module resolver, no
//!    `eval`, bounded operations, call depth, data sizes and wall time. The
//!    engine only exposes the functions registered by the handler, so there
//!    is no filesystem, process or network access from scripts.
//!
//! Deployments that run untrusted code should still execute it in a
//! separate process with OS-level capability restrictions or a WASM runtime.

use regex::Regex;
use rhai::Engine;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::error::StepError;

/// Built-in deny-list rules: `(regex, reason)`.
const DENY_RULES: &[(&str, &str)] = &[
    (r"\bimport\b", "module loading"),
    (r"\beval\s*\(", "nested dynamic evaluation"),
    (r"\b(Fn|call|curry)\s*\(", "dynamic function construction"),
    (r"__\w+__", "reflective attribute traversal"),
    (
        r"\b(getattr|setattr|delattr|globals|locals|vars)\s*\(",
        "reflective attribute traversal",
    ),
    (
        r"\b(system|exec|spawn|popen|subprocess|socket|open_file)\b",
        "system access",
    ),
];

/// Compiled deny-list.
pub struct DenyList {
    rules: Vec<(Regex, &'static str, &'static str)>,
}

impl DenyList {
    /// Compile the built-in rules.
    pub fn new() -> Result<Self, StepError> {
        let rules = DENY_RULES
            .iter()
            .map(|(pattern, reason)| {
                Regex::new(pattern)
                    .map(|re| (re, *pattern, *reason))
                    .map_err(|e| StepError::Script(format!("Invalid deny rule {}: {}", pattern, e)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    /// Reject `code` if it matches any rule.
    pub fn scan(&self, code: &str) -> Result<(), StepError> {
        for (re, pattern, reason) in &self.rules {
            if re.is_match(code) {
                return Err(StepError::SecurityRejection {
                    pattern: *pattern,
                    reason: *reason,
                });
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for DenyList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DenyList")
            .field("rules", &self.rules.len())
            .finish()
    }
}

/// Resource limits applied to every script run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(default = "default_max_operations")]
    pub max_operations: u64,

    #[serde(default = "default_max_call_levels")]
    pub max_call_levels: usize,

    #[serde(default = "default_max_expr_depth")]
    pub max_expr_depth: usize,

    #[serde(default = "default_max_string_size")]
    pub max_string_size: usize,

    #[serde(default = "default_max_array_size")]
    pub max_array_size: usize,

    #[serde(default = "default_max_map_size")]
    pub max_map_size: usize,

    /// Wall-clock budget per script, in seconds.
    #[serde(default = "default_max_duration_secs")]
    pub max_duration_secs: u64,
}

fn default_max_operations() -> u64 {
    1_000_000
}

fn default_max_call_levels() -> usize {
    32
}

fn default_max_expr_depth() -> usize {
    64
}

fn default_max_string_size() -> usize {
    1024 * 1024
}

fn default_max_array_size() -> usize {
    10_000
}

fn default_max_map_size() -> usize {
    10_000
}

fn default_max_duration_secs() -> u64 {
    60
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            max_operations: default_max_operations(),
            max_call_levels: default_max_call_levels(),
            max_expr_depth: default_max_expr_depth(),
            max_string_size: default_max_string_size(),
            max_array_size: default_max_array_size(),
            max_map_size: default_max_map_size(),
            max_duration_secs: default_max_duration_secs(),
        }
    }
}

impl SandboxConfig {
    /// Apply the limits to a fresh engine.
    pub fn apply(&self, engine: &mut Engine) {
        engine.set_module_resolver(rhai::module_resolvers::DummyModuleResolver::new());
        engine.disable_symbol("eval");
        engine.set_max_operations(self.max_operations);
        engine.set_max_call_levels(self.max_call_levels);
        engine.set_max_expr_depths(self.max_expr_depth, self.max_expr_depth);
        engine.set_max_string_size(self.max_string_size);
        engine.set_max_array_size(self.max_array_size);
        engine.set_max_map_size(self.max_map_size);

        let deadline = Instant::now() + Duration::from_secs(self.max_duration_secs);
        engine.on_progress(move |_ops| {
            if Instant::now() >= deadline {
                Some(rhai::Dynamic::from("wall-clock budget exhausted".to_string()))
            } else {
                None
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deny_list_rejects() {
        let deny = DenyList::new().unwrap();
        let cases = [
            r#"import "fs" as fs;"#,
            r#"eval("1 + 1")"#,
            r#"let f = Fn("x"); f.call()"#,
            "let x = y.__class__;",
            "getattr(obj, 'x')",
            "system(\"rm -rf /\")",
        ];
        for code in cases {
            let err = deny.scan(code).unwrap_err();
            assert!(
                matches!(err, StepError::SecurityRejection { .. }),
                "expected rejection for {}",
                code
            );
        }
    }

    #[test]
    fn test_deny_list_allows_plain_code() {
        let deny = DenyList::new().unwrap();
        let code = r#"
            let count = devices.len();
            vars.important = globals.threshold > 3;
            log("checked " + count);
            count > 0
        "#;
        assert!(deny.scan(code).is_ok());
    }

    #[test]
    fn test_limits_stop_runaway_loop() {
        let mut engine = Engine::new();
        SandboxConfig {
            max_operations: 1_000,
            ..Default::default()
        }
        .apply(&mut engine);

        let result = engine.eval::<i64>("let x = 0; loop { x += 1; } x");
        assert!(result.is_err());
    }

    #[test]
    fn test_modules_unavailable() {
        let mut engine = Engine::new();
        SandboxConfig::default().apply(&mut engine);
        assert!(engine.eval::<i64>(r#"import "os" as os; 1"#).is_err());
    }
}
