//! Language codes and artifact kinds: the keys of every per-language structure.

use std::{fmt, str::FromStr};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// A language code or a locale whose language part is taken (`en-us` → `EN`).
static RE_LOCALE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z][A-Za-z0-9_]*)(?:-[A-Za-z0-9]+)*$").unwrap());

// ─────────────────────────────────────────────────────────────────────────────
// LanguageCode
// ─────────────────────────────────────────────────────────────────────────────

/// Short upper-case language identifier (`"EN"`, `"ZH"`, `"EN_V2"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LanguageCode(String);

/// Returned when a string is neither a language code nor a locale.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("'{0}' is not a language code")]
pub struct InvalidLanguageCode(pub String);

impl LanguageCode {
    /// Parse a code or locale; the part before the first `-` is upper-cased.
    pub fn parse(raw: &str) -> Result<Self, InvalidLanguageCode> {
        let caps = RE_LOCALE
            .captures(raw.trim())
            .ok_or_else(|| InvalidLanguageCode(raw.to_string()))?;
        Ok(Self(caps[1].to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LanguageCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl FromStr for LanguageCode {
    type Err = InvalidLanguageCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for LanguageCode {
    type Error = InvalidLanguageCode;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<LanguageCode> for String {
    fn from(code: LanguageCode) -> Self {
        code.0
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ArtifactKind
// ─────────────────────────────────────────────────────────────────────────────

/// The two files every model handle is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Config,
    Checkpoint,
}

impl ArtifactKind {
    /// File name inside a hub repository and in the offline layout.
    pub fn file_name(self) -> &'static str {
        match self {
            Self::Config => "config.json",
            Self::Checkpoint => "checkpoint.pth",
        }
    }

    /// Sub-directory of `<root>/models/<LANG>/` holding this artifact offline.
    pub fn offline_dir(self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::Checkpoint => "model",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Self::Config => "config",
            Self::Checkpoint => "checkpoint",
        })
    }
}
