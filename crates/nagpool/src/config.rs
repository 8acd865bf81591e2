//! Coordinator settings

use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};

use crate::protocol::PROTOCOL_VERSION;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CoordinatorConfig {
    /// Version string a worker must report during negotiation
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,
    /// Fixed RNG seed for ordering seeds and task selection. Random when unset.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_protocol_version() -> String {
    PROTOCOL_VERSION.to_string()
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            protocol_version: default_protocol_version(),
            seed: None,
        }
    }
}

impl CoordinatorConfig {
    pub fn with_seed(seed: u64) -> Self {
        Self {
            seed: Some(seed),
            ..Self::default()
        }
    }

    pub(crate) fn rng(&self) -> Xoshiro256PlusPlus {
        match self.seed {
            Some(seed) => Xoshiro256PlusPlus::seed_from_u64(seed),
            None => Xoshiro256PlusPlus::seed_from_u64(rand::random()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_parse_from_toml() {
        let config: CoordinatorConfig = toml::from_str("seed = 42").unwrap();
        assert_eq!(config.protocol_version, "1");
        assert_eq!(config.seed, Some(42));

        let config: CoordinatorConfig = toml::from_str("").unwrap();
        assert_eq!(config, CoordinatorConfig::default());

        assert!(toml::from_str::<CoordinatorConfig>("seeds = 1").is_err());
    }

    #[test]
    fn test_fixed_seed_is_reproducible() {
        let config = CoordinatorConfig::with_seed(9);
        let a: Vec<u32> = (0..8).map(|_| config.rng().random()).collect();
        let b: Vec<u32> = (0..8).map(|_| config.rng().random()).collect();
        assert_eq!(a, b);
    }
}
