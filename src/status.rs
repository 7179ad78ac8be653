//! Judgement status values and their escalation order.
//!
//! A judgement's status only ever moves to a worse value; the variant
//! order below is the severity order used for that comparison.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Overall status of a judgement or a single test.
///
/// Variants are declared from least to most severe; `Ord` on this enum
/// is the escalation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum Status {
    #[default]
    #[serde(rename = "correct")]
    Correct,
    #[serde(rename = "wrong")]
    Wrong,
    #[serde(rename = "runtime error")]
    RuntimeError,
    #[serde(rename = "time limit exceeded")]
    TimeLimitExceeded,
    #[serde(rename = "memory limit exceeded")]
    MemoryLimitExceeded,
    #[serde(rename = "internal error")]
    InternalError,
}

impl Status {
    /// Human-readable description in the given natural language.
    pub fn human(&self, locale: Locale) -> &'static str {
        match locale {
            Locale::En => match self {
                Status::Correct => "Correct",
                Status::Wrong => "Wrong",
                Status::RuntimeError => "Runtime error",
                Status::TimeLimitExceeded => "Time limit exceeded",
                Status::MemoryLimitExceeded => "Memory limit exceeded",
                Status::InternalError => "Internal error",
            },
            Locale::Nl => match self {
                Status::Correct => "Correct",
                Status::Wrong => "Fout",
                Status::RuntimeError => "Uitvoeringsfout",
                Status::TimeLimitExceeded => "Tijdslimiet overschreden",
                Status::MemoryLimitExceeded => "Geheugenlimiet overschreden",
                Status::InternalError => "Interne fout",
            },
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Correct => "correct",
            Status::Wrong => "wrong",
            Status::RuntimeError => "runtime error",
            Status::TimeLimitExceeded => "time limit exceeded",
            Status::MemoryLimitExceeded => "memory limit exceeded",
            Status::InternalError => "internal error",
        };
        write!(f, "{}", s)
    }
}

/// Status as it appears in judge protocol commands: the machine value
/// plus the judge's own human-readable description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusPair {
    #[serde(rename = "enum")]
    pub value: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub human: Option<String>,
}

/// Natural language used for generated descriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    En,
    Nl,
}

impl Locale {
    /// Parse a locale tag, falling back to English for anything unknown.
    pub fn parse(tag: &str) -> Self {
        match tag {
            "nl" => Locale::Nl,
            _ => Locale::En,
        }
    }
}
