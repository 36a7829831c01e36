use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Universal fallbacks tried after the quality's own selector.
pub const FALLBACK_SELECTORS: [&str; 2] = ["best", "worst"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    High,
    Standard,
    Audio,
}

impl Quality {
    pub fn primary_selector(self) -> &'static str {
        match self {
            Self::High => "best[height<=1080]",
            Self::Standard => "best[height<=720]",
            Self::Audio => "bestaudio/best",
        }
    }

    /// Selectors in the order they must be attempted.
    pub fn selectors(self) -> [&'static str; 3] {
        [
            self.primary_selector(),
            FALLBACK_SELECTORS[0],
            FALLBACK_SELECTORS[1],
        ]
    }

    pub fn is_audio(self) -> bool {
        matches!(self, Self::Audio)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Standard => "standard",
            Self::Audio => "audio",
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Quality {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(Self::High),
            "standard" => Ok(Self::Standard),
            "audio" => Ok(Self::Audio),
            other => Err(format!("unknown quality {other:?}")),
        }
    }
}
