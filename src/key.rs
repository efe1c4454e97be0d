//! Cache key model
//!
//! A cache key is the immutable triple `(scope, key, stage)` mapping to the
//! directory `<root>/<scope>/<key>/<stage>/`. The model does no I/O; all
//! validation happens at construction so downstream path joins can never
//! escape the cache root.

use crate::error::{CacheError, CacheResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Length of a fingerprint in lowercase hex characters (256 bits)
pub const FINGERPRINT_HEX_LEN: usize = 64;

/// Named phase of the compilation pipeline whose output is cached independently
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Validated compilation inputs
    Inputs,
    /// Converted asset bundle
    Assets,
    /// Generated game code
    Code,
    /// Desktop build manifest
    Desktop,
    /// Web (WASM) build manifest
    Web,
}

impl Stage {
    /// All stages, in pipeline order
    pub const ALL: [Stage; 5] = [
        Stage::Inputs,
        Stage::Assets,
        Stage::Code,
        Stage::Desktop,
        Stage::Web,
    ];

    /// Directory name for this stage
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Inputs => "inputs",
            Stage::Assets => "assets",
            Stage::Code => "code",
            Stage::Desktop => "desktop",
            Stage::Web => "web",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inputs" => Ok(Stage::Inputs),
            "assets" => Ok(Stage::Assets),
            "code" => Ok(Stage::Code),
            "desktop" => Ok(Stage::Desktop),
            "web" => Ok(Stage::Web),
            other => Err(CacheError::InvalidKey(format!("unknown stage: {other:?}"))),
        }
    }
}

/// Immutable cache key triple
///
/// `scope` must match `[a-z_][a-z0-9_]*`, `key` must be 64 lowercase hex
/// characters (a [`Fingerprint`](crate::fingerprint::Fingerprint) rendered
/// as text), and `stage` is the closed [`Stage`] enum. Anything else is
/// rejected with [`CacheError::InvalidKey`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    scope: String,
    key: String,
    stage: Stage,
}

impl CacheKey {
    /// Create a validated cache key
    pub fn new(
        scope: impl Into<String>,
        key: impl Into<String>,
        stage: Stage,
    ) -> CacheResult<Self> {
        let scope = scope.into();
        let key = key.into();
        validate_scope(&scope)?;
        validate_key(&key)?;
        Ok(Self { scope, key, stage })
    }

    /// Cache scope, e.g. `compilation`
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Content-addressable key (64-hex fingerprint)
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Pipeline stage
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Stage directory for this key under `root`
    pub fn to_path(&self, root: &Path) -> PathBuf {
        root.join(&self.scope).join(&self.key).join(self.stage.as_str())
    }

    /// Key directory (parent of all stage directories) under `root`
    pub fn key_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.scope).join(&self.key)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.scope, self.key, self.stage)
    }
}

fn validate_scope(scope: &str) -> CacheResult<()> {
    let mut chars = scope.chars();
    let valid_first = chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');

    if valid_first && valid_rest {
        Ok(())
    } else {
        Err(CacheError::InvalidKey(format!(
            "scope {scope:?} must match [a-z_][a-z0-9_]*"
        )))
    }
}

fn validate_key(key: &str) -> CacheResult<()> {
    if key.len() == FINGERPRINT_HEX_LEN
        && key
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
    {
        Ok(())
    } else {
        Err(CacheError::InvalidKey(format!(
            "key {key:?} must be {FINGERPRINT_HEX_LEN} lowercase hex characters"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex_key() -> String {
        "a".repeat(FINGERPRINT_HEX_LEN)
    }

    #[test]
    fn test_valid_key_construction() {
        let key = CacheKey::new("compilation", hex_key(), Stage::Code).unwrap();
        assert_eq!(key.scope(), "compilation");
        assert_eq!(key.stage(), Stage::Code);
        assert_eq!(key.to_string(), format!("compilation/{}/code", hex_key()));
    }

    #[test]
    fn test_scope_validation() {
        assert!(CacheKey::new("_internal", hex_key(), Stage::Web).is_ok());
        assert!(CacheKey::new("scope_2", hex_key(), Stage::Web).is_ok());

        for bad in ["", "Compilation", "9scope", "scope/evil", "scope-dash", "sc ope"] {
            assert!(
                CacheKey::new(bad, hex_key(), Stage::Web).is_err(),
                "scope {bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_key_validation() {
        let bad_keys = vec![
            String::new(),
            "abc".to_string(),
            "A".repeat(64),
            "g".repeat(64),
            format!("{}/..", "a".repeat(61)),
            "a".repeat(63),
            "a".repeat(65),
        ];
        for bad in bad_keys {
            assert!(
                CacheKey::new("compilation", bad.as_str(), Stage::Code).is_err(),
                "key {bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_path_mapping() {
        let key = CacheKey::new("compilation", hex_key(), Stage::Assets).unwrap();
        let path = key.to_path(Path::new("/cache"));
        assert_eq!(
            path,
            Path::new("/cache")
                .join("compilation")
                .join(hex_key())
                .join("assets")
        );
        assert_eq!(key.key_dir(Path::new("/cache")), path.parent().unwrap());
    }

    #[test]
    fn test_stage_round_trip() {
        for stage in Stage::ALL {
            assert_eq!(stage.as_str().parse::<Stage>().unwrap(), stage);
        }
        assert!("WEB".parse::<Stage>().is_err());
        assert!("builds".parse::<Stage>().is_err());
    }

    #[test]
    fn test_stage_serde_lowercase() {
        assert_eq!(serde_json::to_string(&Stage::Desktop).unwrap(), "\"desktop\"");
        let stage: Stage = serde_json::from_str("\"inputs\"").unwrap();
        assert_eq!(stage, Stage::Inputs);
    }
}
