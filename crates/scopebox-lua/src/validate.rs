//! Pre-execution source validator.
//!
//! Scans raw snippet text against an ordered catalogue of forbidden
//! patterns before the interpreter ever sees it. First match wins.
//!
//! # Scope
//!
//! This is coarse lexical matching and a second line of defense only.
//! Aliasing (`local o = os; o["exe".."cute"]`), string building and other
//! indirection can defeat it. The capability layer is the authoritative
//! control: the snippet environment does not contain `io`, `os.execute`,
//! `load` or `debug` in the first place, and every resource primitive
//! checks the scope stack.
//!
//! Comments and string literals are scanned like code, so a snippet that
//! merely *mentions* `os.execute` in a string is rejected too.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Rule id reported for empty or whitespace-only source.
pub const EMPTY_SOURCE_RULE: &str = "empty-source";

/// Category of a forbidden-pattern rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCategory {
    /// Direct file system, process or network APIs.
    DirectResource,
    /// Reflection and dynamic code loading.
    Reflection,
    /// Interpreter internals.
    RuntimeInternal,
    /// Constructs that would defeat scope-stack enforcement.
    CapabilityEscape,
    /// Process exit, environment mutation, thread spawning.
    SystemControl,
}

impl fmt::Display for RuleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::DirectResource => "direct resource access",
            Self::Reflection => "reflection / dynamic loading",
            Self::RuntimeInternal => "runtime internals",
            Self::CapabilityEscape => "capability escape",
            Self::SystemControl => "system control",
        };
        f.write_str(name)
    }
}

/// Forbidden-pattern catalogue, in evaluation order.
///
/// When a pattern has a capture group named `m`, that group is reported as
/// the matched text instead of the whole match.
pub const RULE_CATALOGUE: &[(&str, RuleCategory, &str)] = &[
    // Direct resource APIs
    ("proc-os-execute", RuleCategory::DirectResource, r"\bos\s*\.\s*execute\b"),
    ("proc-io-popen", RuleCategory::DirectResource, r"\bio\s*\.\s*popen\b"),
    ("fs-io-library", RuleCategory::DirectResource, r"\bio\s*[.:\[]"),
    ("fs-os-files", RuleCategory::DirectResource, r"\bos\s*\.\s*(?:remove|rename|tmpname)\b"),
    ("net-socket-library", RuleCategory::DirectResource, r"\b(?:socket\s*\.|http\s*\.\s*request\b)"),
    // Reflection and dynamic loading
    ("dyn-load", RuleCategory::Reflection, r"(?m)(?:^|[^.:\w])(?P<m>load|loadstring|loadfile|dofile)\b"),
    ("dyn-require", RuleCategory::Reflection, r"(?m)(?:^|[^.:\w])(?P<m>require)\b"),
    ("dyn-package", RuleCategory::Reflection, r"\bpackage\s*[.\[]"),
    ("dyn-string-dump", RuleCategory::Reflection, r"\bstring\s*\.\s*dump\b"),
    // Runtime internals
    ("rt-debug-library", RuleCategory::RuntimeInternal, r"\bdebug\s*[.:\[]"),
    ("rt-collectgarbage", RuleCategory::RuntimeInternal, r"\bcollectgarbage\b"),
    ("rt-env-table", RuleCategory::RuntimeInternal, r"\b_ENV\b"),
    ("rt-global-table", RuleCategory::RuntimeInternal, r"\b_G\b"),
    ("rt-fenv", RuleCategory::RuntimeInternal, r"\b(?:getfenv|setfenv)\b"),
    // Capability escape
    ("escape-internal-name", RuleCategory::CapabilityEscape, r"__scopebox"),
    ("escape-string-metatable", RuleCategory::CapabilityEscape, r#"getmetatable\s*\(?\s*(?:"|'|\[\[)"#),
    // System control
    ("sys-os-exit", RuleCategory::SystemControl, r"\bos\s*\.\s*exit\b"),
    ("sys-os-environment", RuleCategory::SystemControl, r"\bos\s*\.\s*(?:getenv|setlocale)\b"),
    ("sys-coroutine", RuleCategory::SystemControl, r"\bcoroutine\s*\.\s*(?:create|wrap)\b"),
];

/// Result of validating one snippet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ValidationOutcome {
    Ok,
    Rejected {
        #[serde(rename = "ruleId")]
        rule_id: String,
        #[serde(rename = "matchedText")]
        matched_text: String,
    },
}

impl ValidationOutcome {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

/// A catalogue entry failed to compile.
#[derive(Debug, Error)]
#[error("invalid validator rule '{id}': {source}")]
pub struct ValidatorError {
    pub id: String,
    #[source]
    pub source: regex::Error,
}

#[derive(Debug)]
struct Rule {
    id: &'static str,
    category: RuleCategory,
    regex: Regex,
}

/// Compiled forbidden-pattern scanner.
#[derive(Debug)]
pub struct Validator {
    rules: Vec<Rule>,
}

impl Validator {
    /// Compiles [`RULE_CATALOGUE`].
    ///
    /// # Errors
    ///
    /// Returns [`ValidatorError`] if a catalogue pattern does not compile.
    pub fn new() -> Result<Self, ValidatorError> {
        let rules = RULE_CATALOGUE
            .iter()
            .map(|&(id, category, pattern)| {
                Regex::new(pattern)
                    .map(|regex| Rule {
                        id,
                        category,
                        regex,
                    })
                    .map_err(|source| ValidatorError {
                        id: id.to_string(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    /// Scans `source` and returns the first matching rule, if any.
    #[must_use]
    pub fn validate(&self, source: &str) -> ValidationOutcome {
        if source.trim().is_empty() {
            return ValidationOutcome::Rejected {
                rule_id: EMPTY_SOURCE_RULE.to_string(),
                matched_text: String::new(),
            };
        }

        for rule in &self.rules {
            if let Some(caps) = rule.regex.captures(source) {
                let matched = caps
                    .name("m")
                    .or_else(|| caps.get(0))
                    .map_or("", |m| m.as_str());
                tracing::debug!(
                    rule = rule.id,
                    category = %rule.category,
                    matched,
                    "snippet rejected by validator"
                );
                return ValidationOutcome::Rejected {
                    rule_id: rule.id.to_string(),
                    matched_text: matched.to_string(),
                };
            }
        }

        ValidationOutcome::Ok
    }

    /// Rule ids and categories in evaluation order.
    pub fn rules(&self) -> impl Iterator<Item = (&'static str, RuleCategory)> + '_ {
        self.rules.iter().map(|r| (r.id, r.category))
    }
}
