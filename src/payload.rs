//! Per-stage payload contracts
//!
//! Every stage stores canonical JSON. The `inputs`, `assets`, and `code`
//! stages carry the producing call's result record and are opaque to the
//! core beyond being valid JSON; the `desktop` and `web` stages carry a
//! small [`BuildManifest`] pointing at the published build directory, so
//! consumers can locate the artifact without out-of-band schema knowledge.

use crate::canonical::to_canonical_string;
use crate::error::{CacheError, CacheResult};
use crate::key::Stage;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Manifest payload for the `desktop` and `web` stages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildManifest {
    /// Filesystem path of the published build directory
    pub build_dir: PathBuf,
    /// Entry point inside the build directory
    pub entry_point: String,
    /// Files the build comprises, relative to `build_dir`
    #[serde(default)]
    pub files: Vec<String>,
}

impl BuildManifest {
    /// Encode as canonical JSON bytes
    pub fn to_bytes(&self) -> CacheResult<Vec<u8>> {
        Ok(to_canonical_string(self)?.into_bytes())
    }

    /// Decode from payload bytes
    pub fn from_bytes(bytes: &[u8]) -> CacheResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Check that a payload satisfies its stage's contract
pub fn validate(stage: Stage, payload: &[u8]) -> CacheResult<()> {
    match stage {
        Stage::Desktop | Stage::Web => {
            serde_json::from_slice::<BuildManifest>(payload).map_err(CacheError::Serialization)?;
        }
        Stage::Inputs | Stage::Assets | Stage::Code => {
            serde_json::from_slice::<serde_json::Value>(payload)
                .map_err(CacheError::Serialization)?;
        }
    }
    Ok(())
}
