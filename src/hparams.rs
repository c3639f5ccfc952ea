//! Strongly-typed view of a MeloTTS `config.json`.
//!
//! Only the fields this crate reads are modelled; the rest of the file is
//! ignored.  The speaker table keeps the order it has in the file, which is the
//! order speakers are listed to clients.

use std::{fmt, path::Path};

use anyhow::{Context, Result};
use serde::{
    de::{MapAccess, Visitor},
    Deserialize, Deserializer,
};

/// Deserialised `config.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    pub data: DataConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataConfig {
    /// Output sample rate in Hz.
    pub sampling_rate: u32,

    /// Speaker name → speaker index, in file order.
    #[serde(deserialize_with = "ordered_speakers")]
    pub spk2id: Vec<(String, u32)>,
}

impl ModelConfig {
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).context("Failed to parse model config")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Cannot read config: {}", path.display()))?;
        Self::from_slice(&bytes).with_context(|| format!("Invalid config: {}", path.display()))
    }

    pub fn sampling_rate(&self) -> u32 {
        self.data.sampling_rate
    }

    pub fn speakers(&self) -> impl Iterator<Item = (&str, u32)> {
        self.data.spk2id.iter().map(|(n, id)| (n.as_str(), *id))
    }
}

/// Deserialise a JSON object into `(key, value)` pairs without losing order.
fn ordered_speakers<'de, D>(deserializer: D) -> Result<Vec<(String, u32)>, D::Error>
where
    D: Deserializer<'de>,
{
    struct OrderedMap;

    impl<'de> Visitor<'de> for OrderedMap {
        type Value = Vec<(String, u32)>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map of speaker name to speaker index")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
            let mut out: Vec<(String, u32)> = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((name, id)) = map.next_entry::<String, u32>()? {
                if out.iter().any(|(n, _)| *n == name) {
                    return Err(serde::de::Error::custom(format!("duplicate speaker '{name}'")));
                }
                out.push((name, id));
            }
            Ok(out)
        }
    }

    deserializer.deserialize_map(OrderedMap)
}
