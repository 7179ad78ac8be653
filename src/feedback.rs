//! Feedback tree produced for one submission.
//!
//! The judge protocol builds a depth-4 tree: a judgement owns tabs, tabs
//! own contexts, contexts own testcases and testcases own individual
//! tests. The serialized shape of these structs is the stored result and
//! must stay stable: renderers and older judges depend on it.

use serde::{Deserialize, Serialize};

use crate::metrics::RuntimeMetrics;
use crate::status::Status;

/// A message attached to any level of the feedback tree.
///
/// Judges either emit a bare string or a rich object carrying a format
/// and a visibility permission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Plain(String),
    Rich {
        format: String,
        description: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        permission: Option<String>,
    },
}

impl Message {
    /// Rich message only visible to course staff.
    pub fn staff(description: impl Into<String>) -> Self {
        Message::Rich {
            format: "text".to_string(),
            description: description.into(),
            permission: Some("staff".to_string()),
        }
    }
}

/// A source-code annotation, attached to the judgement root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub row: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns: Option<u64>,
    pub text: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
}

/// A single expected/generated comparison, the leaf of the tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Test {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<Message>,
}

/// A named group of tests, e.g. one invocation of the student's code.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Testcase {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tests: Vec<Test>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<Message>,
}

/// A group of testcases that share state inside the judge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Context {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<Testcase>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<Message>,
}

impl Context {
    /// Acceptance used for aggregation: an unclosed or overridden context
    /// without an explicit value counts as accepted.
    pub fn is_accepted(&self) -> bool {
        self.accepted.unwrap_or(true)
    }
}

/// A tab in the rendered feedback table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tab {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "badgeCount", skip_serializing_if = "Option::is_none")]
    pub badge_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hidden: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<Context>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<Message>,
}

impl Tab {
    /// A tab is accepted when every context under it is.
    pub fn is_accepted(&self) -> bool {
        self.groups.iter().all(Context::is_accepted)
    }

    /// Count of rejected testcases across this tab's contexts; this is
    /// the number shown on the tab's notification badge.
    pub fn failed_testcases(&self) -> u64 {
        self.groups
            .iter()
            .flat_map(|context| context.groups.iter())
            .filter(|testcase| testcase.accepted == Some(false))
            .count() as u64
    }
}

/// The finished result of judging one submission.
///
/// This is what gets serialized and handed to storage. `accepted`,
/// `status` and `description` are also surfaced as scalar columns, so
/// they live at the top level rather than being derived by the reader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeResult {
    pub accepted: bool,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<Tab>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Annotation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_metrics: Option<RuntimeMetrics>,
}

impl JudgeResult {
    /// Human summary for the caller's scalar projection.
    pub fn summary(&self) -> String {
        self.description
            .clone()
            .unwrap_or_else(|| self.status.to_string())
    }
}
