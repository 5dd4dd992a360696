//! Submission payload handed verbatim to the sandbox entrypoint.
//!
//! The pool never looks inside a payload; this type only exists so the
//! CLI can reject malformed files before any container is started. The
//! bytes that were read are what the sandbox receives.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One execution request as understood by the sandbox entrypoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    #[serde(default = "default_language")]
    pub language: String,
    pub code: String,
    pub function_name: String,
    /// Canonical solution used to compute expected values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_code: Option<String>,
    #[serde(default)]
    pub tests: Vec<TestCase>,
    /// Per-job timeout hint for the entrypoint
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub args: Vec<Value>,
    /// Expected return value; `expected` is accepted on input
    #[serde(default, rename = "expect", alias = "expected")]
    pub expect: Value,
}

fn default_language() -> String {
    "python".to_string()
}

fn default_timeout_ms() -> u64 {
    2000
}

impl Submission {
    /// Parse a submission from JSON text
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("Invalid submission JSON")
    }
}
