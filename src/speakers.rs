//! Per-model speaker catalog, derived from the model's own configuration.

use std::collections::HashMap;

use anyhow::{bail, Result};

use crate::hparams::ModelConfig;

/// Opaque speaker index, meaningful only to the model that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpeakerIndex(pub(crate) u32);

impl SpeakerIndex {
    pub fn get(self) -> u32 {
        self.0
    }
}

/// Read-only speaker name → index table.  Never empty.
#[derive(Debug, Clone)]
pub struct SpeakerCatalog {
    names: Vec<String>,
    index: HashMap<String, SpeakerIndex>,
}

impl SpeakerCatalog {
    /// Build from the configuration's speaker table (file order is kept).
    pub fn from_config(config: &ModelConfig) -> Result<Self> {
        Self::from_pairs(config.speakers().map(|(n, id)| (n.to_string(), id)))
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, u32)>) -> Result<Self> {
        let mut names = Vec::new();
        let mut index = HashMap::new();
        for (name, id) in pairs {
            if index.insert(name.clone(), SpeakerIndex(id)).is_some() {
                bail!("duplicate speaker '{}'", name);
            }
            names.push(name);
        }
        if names.is_empty() {
            bail!("model configuration declares no speakers");
        }
        Ok(Self { names, index })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn index_of(&self, name: &str) -> Option<SpeakerIndex> {
        self.index.get(name).copied()
    }

    /// Speaker names in catalog order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// The UI default speaker.
    pub fn first_name(&self) -> &str {
        // Construction rejects empty catalogs.
        &self.names[0]
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> SpeakerCatalog {
        SpeakerCatalog::from_pairs([("ZH".to_string(), 1), ("ZH-MIX".to_string(), 0)]).unwrap()
    }

    #[test]
    fn test_order_and_lookup() {
        let c = catalog();
        assert_eq!(c.names(), ["ZH", "ZH-MIX"]);
        assert_eq!(c.first_name(), "ZH");
        assert_eq!(c.index_of("ZH-MIX").map(SpeakerIndex::get), Some(0));
        assert!(c.contains("ZH"));
        assert!(!c.contains("zh"));
        assert_eq!(c.len(), 2);
    }

    #[test]
    fn test_empty_rejected() {
        assert!(SpeakerCatalog::from_pairs(Vec::<(String, u32)>::new()).is_err());
    }

    #[test]
    fn test_duplicate_rejected() {
        let err = SpeakerCatalog::from_pairs([("A".to_string(), 0), ("A".to_string(), 1)]).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_from_config() {
        let cfg = ModelConfig::from_slice(
            br#"{"data": {"sampling_rate": 44100, "add_blank": true, "spk2id": {"EN-US": 0, "EN-AU": 3}}}"#,
        )
        .unwrap();
        let c = SpeakerCatalog::from_config(&cfg).unwrap();
        assert_eq!(c.names(), ["EN-US", "EN-AU"]);
        assert_eq!(c.index_of("EN-AU").map(SpeakerIndex::get), Some(3));
        assert_eq!(c.index_of("XX-BOGUS"), None);
    }
}
