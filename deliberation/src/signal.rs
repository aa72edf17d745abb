//! Trade signal extraction from free-text decisions.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Bounded terminal decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Signal {
    Buy,
    Sell,
    Hold,
}

impl Signal {
    fn from_token(token: &str) -> Option<Self> {
        match token.to_ascii_uppercase().as_str() {
            "BUY" => Some(Self::Buy),
            "SELL" => Some(Self::Sell),
            "HOLD" => Some(Self::Hold),
            _ => None,
        }
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
            Self::Hold => write!(f, "HOLD"),
        }
    }
}

impl std::str::FromStr for Signal {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_token(s.trim()).ok_or_else(|| format!("not a trade signal: {:?}", s))
    }
}

/// Explicit marker, e.g. `FINAL TRANSACTION PROPOSAL: **BUY**`.
static MARKER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)final\s+(?:transaction\s+proposal|decision)\s*:\s*\**\s*(buy|sell|hold)\b")
        .expect("MARKER_PATTERN regex should compile")
});

/// Bare upper-case token anywhere in the text.
static TOKEN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(BUY|SELL|HOLD)\b").expect("TOKEN_PATTERN regex should compile")
});

/// Extract the decision from free text.
///
/// The last explicit marker wins; otherwise the last upper-case
/// BUY/SELL/HOLD token. Lower-case prose ("we could buy more") is ignored.
pub fn extract_signal(text: &str) -> Option<Signal> {
    if let Some(caps) = MARKER_PATTERN.captures_iter(text).last() {
        return caps.get(1).and_then(|m| Signal::from_token(m.as_str()));
    }
    TOKEN_PATTERN
        .find_iter(text)
        .last()
        .and_then(|m| Signal::from_token(m.as_str()))
}
