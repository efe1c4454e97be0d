//! Compilation fingerprint engine
//!
//! Produces a stable 256-bit fingerprint from the full input of a
//! compilation: the canonicalised configuration, the template definition
//! and its on-disk files, the selected components, asset content digests,
//! toolchain versions, and security flags.
//!
//! The fingerprint is a pure function of its inputs. It never incorporates
//! wall-clock time, process ids, or filesystem iteration order, so the same
//! request hashed on two hosts (or twice on one) yields byte-identical
//! results. Bumping any of the version constants below changes every
//! fingerprint, which is the supported invalidation mechanism for toolchain
//! upgrades.

use crate::canonical::{canonical_sha256, file_sha256_hex, sha256_hex, to_canonical_string};
use crate::error::{FingerprintError, FingerprintResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Version tag of the hashing algorithm itself
pub const HASHER_VERSION: &str = "1.0";
/// Pinned pygame runtime version folded into every fingerprint
pub const PYGAME_RUNTIME_VERSION: &str = "2.4.1";
/// Pinned WASM compiler version folded into every fingerprint
pub const WASM_COMPILER_VERSION: &str = "0.8.7";
/// Targeted host-language minor version folded into every fingerprint
pub const HOST_LANGUAGE_MINOR: &str = "3.11";

/// File extensions whose content participates in the template files hash
const INCLUDED_EXTENSIONS: &[&str] = &[
    "j2", "jinja2", "py", "md", "txt", "json", "toml", "yaml", "yml",
];

/// Path substrings excluded from template walking (caches, VCS dirs, OS
/// cruft, temp and log files)
const EXCLUDED_PATTERNS: &[&str] = &[
    "__pycache__",
    ".pyc",
    ".pyo",
    ".DS_Store",
    "Thumbs.db",
    ".git",
    ".svn",
    ".hg",
    ".tmp",
    ".temp",
    ".log",
    ".cache",
];

/// A 256-bit compilation fingerprint as 64 lowercase hex characters
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Hex representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A component selected by the caller, paired with its user configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComponentRef {
    /// Component id looked up in the component registry
    pub id: String,
    /// Free-form per-component configuration
    #[serde(default)]
    pub configuration: Map<String, Value>,
}

/// An asset referenced by the compilation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssetRef {
    /// Source path on disk; hashed by content when the file exists
    pub path: String,
    /// Asset type, e.g. `image`, `audio`
    #[serde(rename = "type")]
    pub asset_type: String,
    /// Path the asset takes inside the generated game
    pub logical_path: String,
    /// Conversion parameters that affect the produced bytes
    #[serde(default)]
    pub transform_params: Map<String, Value>,
}

/// The full input of a compilation, as supplied by the pipeline
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompilationRequest {
    /// Template id looked up in the template registry
    pub template_id: String,
    /// Selected components, in caller order
    #[serde(default)]
    pub components: Vec<ComponentRef>,
    /// Free-form compilation configuration
    #[serde(default)]
    pub configuration: Map<String, Value>,
    /// Referenced assets
    #[serde(default)]
    pub assets: Vec<AssetRef>,
}

/// Registry-side template definition
///
/// Unknown template ids fingerprint against [`TemplateDefinition::default`],
/// so a missing registry entry still hashes deterministically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateDefinition {
    /// Human-readable name
    pub name: String,
    /// Template version string
    pub version: String,
    /// Structural description of the template
    pub structure: Value,
    /// Systems the template requires (hashed sorted)
    pub required_systems: Vec<String>,
    /// Mechanics the template requires (hashed sorted)
    pub required_mechanics: Vec<String>,
    /// Slot descriptions
    pub slots: Value,
    /// Directory holding the template's files, if it has any on disk
    #[serde(skip)]
    pub files_dir: Option<PathBuf>,
}

impl Default for TemplateDefinition {
    fn default() -> Self {
        Self {
            name: String::new(),
            version: "1.0".to_string(),
            structure: Value::Object(Map::new()),
            required_systems: Vec::new(),
            required_mechanics: Vec::new(),
            slots: Value::Array(Vec::new()),
            files_dir: None,
        }
    }
}

/// Registry-side component definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentDefinition {
    /// Human-readable name
    pub name: String,
    /// Component version string
    pub version: String,
    /// Component type, e.g. `entity`, `mechanic`
    #[serde(rename = "type")]
    pub component_type: String,
    /// Ids of components this one depends on
    pub dependencies: Vec<String>,
    /// Systems the component participates in (hashed sorted)
    pub systems: Vec<String>,
    /// Mechanics the component provides (hashed sorted)
    pub mechanics: Vec<String>,
}

impl Default for ComponentDefinition {
    fn default() -> Self {
        Self {
            name: String::new(),
            version: "1.0".to_string(),
            component_type: String::new(),
            dependencies: Vec::new(),
            systems: Vec::new(),
            mechanics: Vec::new(),
        }
    }
}

/// Template definitions keyed by id
#[derive(Debug, Clone, Default)]
pub struct TemplateRegistry {
    templates: HashMap<String, TemplateDefinition>,
}

impl TemplateRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a template definition
    pub fn insert(&mut self, id: impl Into<String>, definition: TemplateDefinition) {
        self.templates.insert(id.into(), definition);
    }

    /// Look up a template definition
    pub fn get(&self, id: &str) -> Option<&TemplateDefinition> {
        self.templates.get(id)
    }
}

/// Component definitions keyed by id
#[derive(Debug, Clone, Default)]
pub struct ComponentRegistry {
    components: HashMap<String, ComponentDefinition>,
}

impl ComponentRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component definition
    pub fn insert(&mut self, id: impl Into<String>, definition: ComponentDefinition) {
        self.components.insert(id.into(), definition);
    }

    /// Look up a component definition
    pub fn get(&self, id: &str) -> Option<&ComponentDefinition> {
        self.components.get(id)
    }
}

#[derive(Serialize)]
struct TemplateFileRecord {
    path: String,
    hash: String,
    size: u64,
}

/// Deterministic hasher for compilation inputs
#[derive(Debug, Clone, Copy, Default)]
pub struct FingerprintEngine;

impl FingerprintEngine {
    /// Create a fingerprint engine
    pub fn new() -> Self {
        Self
    }

    /// Compute the fingerprint of a compilation request
    ///
    /// The result is the SHA-256 of the canonical JSON encoding of an
    /// ordered list of `(section_name, section_value)` pairs, prepended
    /// with the hasher version tag. Section order is fixed; within each
    /// section every unordered input container is sorted before hashing.
    pub fn compute(
        &self,
        request: &CompilationRequest,
        templates: &TemplateRegistry,
        components: &ComponentRegistry,
    ) -> FingerprintResult<Fingerprint> {
        let sections: Vec<(&str, String)> = vec![
            (
                "configuration",
                to_canonical_string(&request.configuration)?,
            ),
            (
                "template",
                self.template_hash(&request.template_id, templates)?,
            ),
            (
                "components",
                self.components_hash(&request.components, components)?,
            ),
            ("assets", self.assets_hash(&request.assets)?),
            ("versions", self.versions_hash()?),
            ("security", self.security_hash(&request.configuration)?),
        ];

        let payload = json!({
            "hasher_version": HASHER_VERSION,
            "components": sections,
        });

        Ok(Fingerprint(canonical_sha256(&payload)?))
    }

    fn template_hash(
        &self,
        template_id: &str,
        templates: &TemplateRegistry,
    ) -> FingerprintResult<String> {
        let fallback = TemplateDefinition::default();
        let definition = templates.get(template_id).unwrap_or(&fallback);

        let mut required_systems = definition.required_systems.clone();
        required_systems.sort();
        let mut required_mechanics = definition.required_mechanics.clone();
        required_mechanics.sort();

        let files_hash = self.template_files_hash(template_id, definition.files_dir.as_deref())?;

        let content = json!({
            "id": template_id,
            "name": definition.name,
            "version": definition.version,
            "structure": definition.structure,
            "required_systems": required_systems,
            "required_mechanics": required_mechanics,
            "slots": definition.slots,
            "template_files_hash": files_hash,
        });

        Ok(canonical_sha256(&content)?)
    }

    /// Hash every allow-listed file under the template directory
    ///
    /// Files are recorded as `{path, hash, size}` with paths relative to the
    /// template root using `/` separators, sorted by path. Individual files
    /// that cannot be read are logged and omitted; a directory that exists
    /// but cannot be walked is an error.
    fn template_files_hash(
        &self,
        template_id: &str,
        files_dir: Option<&Path>,
    ) -> FingerprintResult<String> {
        let Some(dir) = files_dir.filter(|d| d.is_dir()) else {
            debug!("no template directory for template id {template_id:?}");
            return Ok(sha256_hex(b""));
        };

        let mut files = Vec::new();

        for entry in WalkDir::new(dir) {
            let entry = entry.map_err(|e| {
                let source = e
                    .io_error()
                    .map(|io| std::io::Error::new(io.kind(), io.to_string()))
                    .unwrap_or_else(|| std::io::Error::other(e.to_string()));
                FingerprintError::Io {
                    path: dir.to_path_buf(),
                    source,
                }
            })?;

            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();

            // Relative path with `/` separators, stable across platforms;
            // deny patterns apply to it rather than the absolute path so a
            // template root living under e.g. `.cache` still hashes.
            let relative: String = path
                .strip_prefix(dir)
                .unwrap_or(path)
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            if EXCLUDED_PATTERNS.iter().any(|p| relative.contains(p)) {
                continue;
            }

            let included = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| {
                    let lower = e.to_ascii_lowercase();
                    INCLUDED_EXTENSIONS.contains(&lower.as_str())
                });
            if !included {
                continue;
            }

            let hash = match file_sha256_hex(path) {
                Ok(hash) => hash,
                Err(e) => {
                    warn!("failed to hash template file {}: {e}", path.display());
                    continue;
                }
            };
            let size = match entry.metadata() {
                Ok(metadata) => metadata.len(),
                Err(e) => {
                    warn!("failed to stat template file {}: {e}", path.display());
                    continue;
                }
            };

            files.push(TemplateFileRecord {
                path: relative,
                hash,
                size,
            });
        }

        files.sort_by(|a, b| a.path.cmp(&b.path));

        let files_data = json!({
            "template_id": template_id,
            "file_count": files.len(),
            "files": files,
        });

        Ok(canonical_sha256(&files_data)?)
    }

    fn components_hash(
        &self,
        selected: &[ComponentRef],
        registry: &ComponentRegistry,
    ) -> FingerprintResult<String> {
        let fallback = ComponentDefinition::default();

        let mut records: Vec<Value> = selected
            .iter()
            .map(|component| {
                let definition = registry.get(&component.id).unwrap_or(&fallback);

                let mut systems = definition.systems.clone();
                systems.sort();
                let mut mechanics = definition.mechanics.clone();
                mechanics.sort();

                json!({
                    "id": component.id,
                    "name": definition.name,
                    "version": definition.version,
                    "type": definition.component_type,
                    "dependencies": definition.dependencies,
                    "systems": systems,
                    "mechanics": mechanics,
                    "configuration": component.configuration,
                })
            })
            .collect();

        records.sort_by(|a, b| {
            let id_of = |v: &Value| v["id"].as_str().unwrap_or_default().to_string();
            id_of(a).cmp(&id_of(b))
        });

        Ok(canonical_sha256(&records)?)
    }

    fn assets_hash(&self, assets: &[AssetRef]) -> FingerprintResult<String> {
        let mut digests: Vec<String> = Vec::with_capacity(assets.len());

        for asset in assets {
            let content_hash = if !asset.path.is_empty() && Path::new(&asset.path).exists() {
                match file_sha256_hex(Path::new(&asset.path)) {
                    Ok(hash) => hash,
                    Err(e) => {
                        warn!("failed to hash asset {}: {e}", asset.path);
                        "none".to_string()
                    }
                }
            } else {
                "none".to_string()
            };

            let asset_input = json!({
                "metadata": {
                    "path": asset.path,
                    "type": asset.asset_type,
                    "logical_path": asset.logical_path,
                    "transform_params": asset.transform_params,
                },
                "content_hash": content_hash,
            });

            digests.push(canonical_sha256(&asset_input)?);
        }

        digests.sort();

        Ok(canonical_sha256(&digests)?)
    }

    fn versions_hash(&self) -> FingerprintResult<String> {
        let versions = json!({
            "hasher": HASHER_VERSION,
            "pygame_runtime_version": PYGAME_RUNTIME_VERSION,
            "wasm_compiler_version": WASM_COMPILER_VERSION,
            "host_language_minor": HOST_LANGUAGE_MINOR,
        });
        Ok(canonical_sha256(&versions)?)
    }

    fn security_hash(&self, configuration: &Map<String, Value>) -> FingerprintResult<String> {
        let flag = |name: &str, default: bool| -> bool {
            configuration
                .get(name)
                .and_then(Value::as_bool)
                .unwrap_or(default)
        };

        let flags = json!({
            "enable_debug": flag("enable_debug", false),
            "enable_console": flag("enable_console", false),
            "allow_external_assets": flag("allow_external_assets", false),
            "sandbox_mode": flag("sandbox_mode", true),
        });
        Ok(canonical_sha256(&flags)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request_with_config(config: Map<String, Value>) -> CompilationRequest {
        CompilationRequest {
            template_id: "basic".to_string(),
            components: vec![ComponentRef {
                id: "c1".to_string(),
                configuration: Map::new(),
            }],
            configuration: config,
            assets: Vec::new(),
        }
    }

    fn config(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_fingerprint_is_64_hex() {
        let engine = FingerprintEngine::new();
        let fp = engine
            .compute(
                &request_with_config(Map::new()),
                &TemplateRegistry::new(),
                &ComponentRegistry::new(),
            )
            .unwrap();
        assert_eq!(fp.as_str().len(), 64);
        assert!(fp.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(fp.as_str(), fp.as_str().to_ascii_lowercase());
    }

    #[test]
    fn test_same_input_same_fingerprint() {
        let engine = FingerprintEngine::new();
        let templates = TemplateRegistry::new();
        let components = ComponentRegistry::new();
        let request = request_with_config(config(&[("a", json!(1))]));

        let first = engine.compute(&request, &templates, &components).unwrap();
        let second = engine.compute(&request, &templates, &components).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_configuration_value_changes_fingerprint() {
        let engine = FingerprintEngine::new();
        let templates = TemplateRegistry::new();
        let components = ComponentRegistry::new();

        let one = engine
            .compute(
                &request_with_config(config(&[("a", json!(1))])),
                &templates,
                &components,
            )
            .unwrap();
        let two = engine
            .compute(
                &request_with_config(config(&[("a", json!(2))])),
                &templates,
                &components,
            )
            .unwrap();
        let two_again = engine
            .compute(
                &request_with_config(config(&[("a", json!(2))])),
                &templates,
                &components,
            )
            .unwrap();

        assert_ne!(one, two);
        assert_eq!(two, two_again);
    }

    #[test]
    fn test_component_order_is_irrelevant() {
        let engine = FingerprintEngine::new();
        let templates = TemplateRegistry::new();
        let registry = ComponentRegistry::new();

        let make = |ids: &[&str]| CompilationRequest {
            template_id: "basic".to_string(),
            components: ids
                .iter()
                .map(|id| ComponentRef {
                    id: (*id).to_string(),
                    configuration: Map::new(),
                })
                .collect(),
            configuration: Map::new(),
            assets: Vec::new(),
        };

        let forward = engine
            .compute(&make(&["alpha", "beta", "gamma"]), &templates, &registry)
            .unwrap();
        let shuffled = engine
            .compute(&make(&["gamma", "alpha", "beta"]), &templates, &registry)
            .unwrap();
        assert_eq!(forward, shuffled);

        let different = engine
            .compute(&make(&["alpha", "beta"]), &templates, &registry)
            .unwrap();
        assert_ne!(forward, different);
    }

    #[test]
    fn test_component_definition_changes_fingerprint() {
        let engine = FingerprintEngine::new();
        let templates = TemplateRegistry::new();
        let request = request_with_config(Map::new());

        let empty_registry = ComponentRegistry::new();
        let mut versioned_registry = ComponentRegistry::new();
        versioned_registry.insert(
            "c1",
            ComponentDefinition {
                version: "2.0".to_string(),
                ..ComponentDefinition::default()
            },
        );

        let with_default = engine
            .compute(&request, &templates, &empty_registry)
            .unwrap();
        let with_versioned = engine
            .compute(&request, &templates, &versioned_registry)
            .unwrap();
        assert_ne!(with_default, with_versioned);
    }

    #[test]
    fn test_unordered_registry_fields_are_sorted() {
        let engine = FingerprintEngine::new();
        let components = ComponentRegistry::new();
        let request = request_with_config(Map::new());

        let mut forward = TemplateRegistry::new();
        forward.insert(
            "basic",
            TemplateDefinition {
                required_systems: vec!["physics".to_string(), "audio".to_string()],
                ..TemplateDefinition::default()
            },
        );
        let mut reversed = TemplateRegistry::new();
        reversed.insert(
            "basic",
            TemplateDefinition {
                required_systems: vec!["audio".to_string(), "physics".to_string()],
                ..TemplateDefinition::default()
            },
        );

        assert_eq!(
            engine.compute(&request, &forward, &components).unwrap(),
            engine.compute(&request, &reversed, &components).unwrap()
        );
    }

    #[test]
    fn test_asset_order_is_irrelevant() {
        let engine = FingerprintEngine::new();
        let templates = TemplateRegistry::new();
        let components = ComponentRegistry::new();

        let asset = |logical: &str| AssetRef {
            path: String::new(),
            asset_type: "image".to_string(),
            logical_path: logical.to_string(),
            transform_params: Map::new(),
        };

        let mut forward = request_with_config(Map::new());
        forward.assets = vec![asset("sprites/a.png"), asset("sprites/b.png")];
        let mut reversed = request_with_config(Map::new());
        reversed.assets = vec![asset("sprites/b.png"), asset("sprites/a.png")];

        assert_eq!(
            engine.compute(&forward, &templates, &components).unwrap(),
            engine.compute(&reversed, &templates, &components).unwrap()
        );
    }

    #[test]
    fn test_asset_content_changes_fingerprint() {
        let engine = FingerprintEngine::new();
        let templates = TemplateRegistry::new();
        let components = ComponentRegistry::new();
        let dir = tempfile::tempdir().unwrap();
        let asset_path = dir.path().join("sprite.png");

        let request_for = |path: &Path| {
            let mut request = request_with_config(Map::new());
            request.assets = vec![AssetRef {
                path: path.to_string_lossy().into_owned(),
                asset_type: "image".to_string(),
                logical_path: "sprites/sprite.png".to_string(),
                transform_params: Map::new(),
            }];
            request
        };

        std::fs::write(&asset_path, b"first frame").unwrap();
        let first = engine
            .compute(&request_for(&asset_path), &templates, &components)
            .unwrap();

        std::fs::write(&asset_path, b"second frame").unwrap();
        let second = engine
            .compute(&request_for(&asset_path), &templates, &components)
            .unwrap();

        assert_ne!(first, second);
    }

    #[test]
    fn test_missing_asset_hashes_as_none() {
        let engine = FingerprintEngine::new();
        let templates = TemplateRegistry::new();
        let components = ComponentRegistry::new();

        let mut request = request_with_config(Map::new());
        request.assets = vec![AssetRef {
            path: "/nonexistent/sprite.png".to_string(),
            asset_type: "image".to_string(),
            logical_path: "sprites/sprite.png".to_string(),
            transform_params: Map::new(),
        }];

        // Deterministic even though the file does not exist
        let first = engine.compute(&request, &templates, &components).unwrap();
        let second = engine.compute(&request, &templates, &components).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_security_flags_change_fingerprint() {
        let engine = FingerprintEngine::new();
        let templates = TemplateRegistry::new();
        let components = ComponentRegistry::new();

        let default_flags = engine
            .compute(&request_with_config(Map::new()), &templates, &components)
            .unwrap();
        let debug_enabled = engine
            .compute(
                &request_with_config(config(&[("enable_debug", json!(true))])),
                &templates,
                &components,
            )
            .unwrap();
        assert_ne!(default_flags, debug_enabled);
    }

    #[test]
    fn test_template_files_participate_in_fingerprint() {
        let engine = FingerprintEngine::new();
        let components = ComponentRegistry::new();
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.py.j2"), b"print('hello')").unwrap();
        // Excluded by pattern and extension respectively
        std::fs::create_dir(dir.path().join("__pycache__")).unwrap();
        std::fs::write(dir.path().join("__pycache__").join("x.py"), b"junk").unwrap();
        std::fs::write(dir.path().join("sprite.png"), b"binary").unwrap();

        let registry_for = |files_dir: Option<PathBuf>| {
            let mut registry = TemplateRegistry::new();
            registry.insert(
                "basic",
                TemplateDefinition {
                    files_dir,
                    ..TemplateDefinition::default()
                },
            );
            registry
        };

        let request = request_with_config(Map::new());
        let with_files = engine
            .compute(
                &request,
                &registry_for(Some(dir.path().to_path_buf())),
                &components,
            )
            .unwrap();
        let without_files = engine
            .compute(&request, &registry_for(None), &components)
            .unwrap();
        assert_ne!(with_files, without_files);

        // Editing an included file changes the fingerprint
        std::fs::write(dir.path().join("main.py.j2"), b"print('changed')").unwrap();
        let edited = engine
            .compute(
                &request,
                &registry_for(Some(dir.path().to_path_buf())),
                &components,
            )
            .unwrap();
        assert_ne!(with_files, edited);

        // Touching excluded files does not
        std::fs::write(dir.path().join("sprite.png"), b"other binary").unwrap();
        let excluded_edited = engine
            .compute(
                &request,
                &registry_for(Some(dir.path().to_path_buf())),
                &components,
            )
            .unwrap();
        assert_eq!(edited, excluded_edited);
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_template_file_is_omitted() {
        use std::os::unix::fs::PermissionsExt;

        let engine = FingerprintEngine::new();
        let components = ComponentRegistry::new();
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), b"a = 1").unwrap();
        let blocked = dir.path().join("b.py");
        std::fs::write(&blocked, b"b = 2").unwrap();
        std::fs::set_permissions(&blocked, std::fs::Permissions::from_mode(0o000)).unwrap();

        if std::fs::read(&blocked).is_ok() {
            // Running with CAP_DAC_OVERRIDE (e.g. as root); permissions are
            // not enforced, so the degradation path cannot be exercised.
            return;
        }

        let mut with_blocked = TemplateRegistry::new();
        with_blocked.insert(
            "basic",
            TemplateDefinition {
                files_dir: Some(dir.path().to_path_buf()),
                ..TemplateDefinition::default()
            },
        );

        // Degrades by omitting the unreadable file instead of failing
        let request = request_with_config(Map::new());
        let fp = engine.compute(&request, &with_blocked, &components);
        std::fs::set_permissions(&blocked, std::fs::Permissions::from_mode(0o644)).unwrap();
        let fp = fp.unwrap();

        // Equivalent to a directory that never contained the blocked file
        let clean_dir = tempfile::tempdir().unwrap();
        std::fs::write(clean_dir.path().join("a.py"), b"a = 1").unwrap();
        let mut clean = TemplateRegistry::new();
        clean.insert(
            "basic",
            TemplateDefinition {
                files_dir: Some(clean_dir.path().to_path_buf()),
                ..TemplateDefinition::default()
            },
        );
        assert_eq!(fp, engine.compute(&request, &clean, &components).unwrap());
    }
}
