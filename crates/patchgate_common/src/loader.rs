//! YAML patch catalog loader.
//!
//! A catalog file has a `metadata` section and a non-empty `patch_sets` map.
//! Actions inside a set are grouped by category:
//!
//! ```yaml
//! metadata:
//!   name: Legacy Mac support
//!   version: 1.2.0
//!   description: Graphics and WiFi fixes
//!   author: Patchgate Team
//! patch_sets:
//!   legacy_graphics:
//!     target_os: { family: macos, versions: ["12\\.", "13\\."] }
//!     target_hardware: { patterns: ["MacBookPro11"] }
//!     actions:
//!       graphics:
//!         - id: framebuffer
//!           type: kext_injection
//!           phase: post_install
//!           priority: critical
//!           files: [IntelFramebuffer.kext]
//!           target_path: System/Library/Extensions
//! ```

use crate::condition::Condition;
use crate::error::CatalogLoadError;
use crate::patch::{PatchAction, PatchPhase, PatchPriority, PatchSet, PatchType};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

#[derive(Debug, Default, Deserialize)]
struct RawFile {
    metadata: Option<RawMetadata>,
    patch_sets: Option<serde_yaml::Mapping>,
}

#[derive(Debug, Default, Deserialize)]
struct RawMetadata {
    name: Option<String>,
    version: Option<String>,
    description: Option<String>,
    author: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawSet {
    id: Option<String>,
    name: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    target_os: RawTargetOs,
    #[serde(default)]
    target_hardware: RawTargetHardware,
    #[serde(default)]
    actions: serde_yaml::Mapping,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    conflicts: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawTargetOs {
    #[serde(default)]
    family: String,
    #[serde(default)]
    versions: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawTargetHardware {
    #[serde(default)]
    patterns: Vec<String>,
    #[serde(default)]
    cpu_families: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawSource {
    Path(String),
    Entry { source: String },
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct RawAction {
    id: Option<String>,
    name: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(rename = "type")]
    patch_type: Option<String>,
    phase: Option<String>,
    priority: Option<String>,
    #[serde(default)]
    files: Vec<RawSource>,
    target_path: Option<String>,
    conditions: Option<RawConditions>,
    #[serde(default = "default_true")]
    reversible: bool,
    #[serde(default)]
    requires_reboot: bool,
    #[serde(default)]
    experimental: bool,
}

#[derive(Debug, Default, Deserialize)]
struct RawConditions {
    os_version: Option<String>,
    hardware_model: Option<String>,
    architecture: Option<String>,
    min_ram_gb: Option<f64>,
    #[serde(default)]
    exclude: Vec<String>,
}

/// Result of loading every catalog in a directory
#[derive(Debug, Default)]
pub struct DirLoad {
    pub sets: Vec<PatchSet>,
    pub files_loaded: usize,
    /// Files that failed; their sets are not included
    pub errors: Vec<CatalogLoadError>,
}

/// Outcome of `validate_file`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileValidation {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub action_count: usize,
}

fn structure(path: &Path, reason: impl Into<String>) -> CatalogLoadError {
    CatalogLoadError::Structure {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

fn title_case(id: &str) -> String {
    id.split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// Turn a CPU family description into a hardware pattern
fn cpu_family_pattern(family: &str) -> String {
    family
        .replace('(', r"\(")
        .replace(')', r"\)")
        .replace(' ', ".*")
}

fn read_raw(path: &Path) -> Result<RawFile, CatalogLoadError> {
    let content = fs::read_to_string(path).map_err(|e| CatalogLoadError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_yaml::from_str(&content).map_err(|e| CatalogLoadError::Yaml {
        path: path.to_path_buf(),
        source: e,
    })
}

fn check_structure(path: &Path, raw: &RawFile) -> Result<(), CatalogLoadError> {
    let metadata = raw
        .metadata
        .as_ref()
        .ok_or_else(|| structure(path, "missing required section 'metadata'"))?;

    for (field, value) in [
        ("name", &metadata.name),
        ("version", &metadata.version),
        ("description", &metadata.description),
        ("author", &metadata.author),
    ] {
        if value.is_none() {
            return Err(structure(
                path,
                format!("missing required metadata field '{}'", field),
            ));
        }
    }

    match &raw.patch_sets {
        None => Err(structure(path, "missing required section 'patch_sets'")),
        Some(sets) if sets.is_empty() => Err(structure(path, "patch_sets must be a non-empty map")),
        Some(_) => Ok(()),
    }
}

fn key_string(path: &Path, key: &serde_yaml::Value) -> Result<String, CatalogLoadError> {
    key.as_str()
        .map(|s| s.to_string())
        .ok_or_else(|| structure(path, format!("non-string key {:?}", key)))
}

fn parse_action(
    path: &Path,
    raw: RawAction,
    set_id: &str,
    category: &str,
    index: usize,
) -> Result<PatchAction, CatalogLoadError> {
    let id = raw
        .id
        .unwrap_or_else(|| format!("{}_{}_{}", set_id, category, index));

    let patch_type = match raw.patch_type.as_deref() {
        None => PatchType::KextInjection,
        Some(s) => PatchType::parse(s)
            .ok_or_else(|| structure(path, format!("action {}: unknown type '{}'", id, s)))?,
    };
    let phase = match raw.phase.as_deref() {
        None => PatchPhase::PostInstall,
        Some(s) => PatchPhase::parse(s)
            .ok_or_else(|| structure(path, format!("action {}: unknown phase '{}'", id, s)))?,
    };
    let priority = match raw.priority.as_deref() {
        None => PatchPriority::Medium,
        Some(s) => PatchPriority::parse(s)
            .ok_or_else(|| structure(path, format!("action {}: unknown priority '{}'", id, s)))?,
    };

    let name = raw.name.unwrap_or_else(|| title_case(&id));
    let mut action = PatchAction::new(&id, &name, patch_type, phase, priority)
        .with_description(&raw.description);

    action.source_files = raw
        .files
        .into_iter()
        .map(|f| match f {
            RawSource::Path(p) => p,
            RawSource::Entry { source } => source,
        })
        .filter(|s| !s.is_empty())
        .collect();
    action.destination = raw.target_path.filter(|p| !p.is_empty());
    action.reversible = raw.reversible;
    action.requires_reboot = raw.requires_reboot;

    if let Some(c) = raw.conditions {
        let condition = Condition {
            os_version: c.os_version,
            hardware_model: c.hardware_model,
            cpu_architecture: c.architecture,
            minimum_ram_gb: c.min_ram_gb,
            exclusion_patterns: c.exclude,
        };
        if !condition.is_empty() {
            action.condition = Some(condition);
        }
    }

    Ok(action)
}

fn parse_set(
    path: &Path,
    key: &str,
    raw: RawSet,
    version: &str,
    author: &str,
) -> Result<PatchSet, CatalogLoadError> {
    let id = raw.id.unwrap_or_else(|| key.to_string());
    if raw.target_os.family.is_empty() {
        return Err(structure(path, format!("set {}: target_os.family is required", id)));
    }

    let name = raw.name.unwrap_or_else(|| title_case(key));
    let mut set = PatchSet::new(&id, &name, &raw.target_os.family);
    set.description = raw.description;
    set.version = version.to_string();
    set.author = Some(author.to_string());
    set.target_versions = raw.target_os.versions;
    set.target_hardware = raw.target_hardware.patterns;
    set.target_hardware.extend(
        raw.target_hardware
            .cpu_families
            .iter()
            .map(|f| cpu_family_pattern(f)),
    );
    set.dependencies = raw.dependencies;
    set.conflicts = raw.conflicts;

    for (category_key, category_actions) in raw.actions {
        let category = key_string(path, &category_key)?;
        let serde_yaml::Value::Sequence(items) = category_actions else {
            debug!("Skipping non-list action category {} in {}", category, id);
            continue;
        };
        for (index, item) in items.into_iter().enumerate() {
            let raw_action: RawAction =
                serde_yaml::from_value(item).map_err(|e| CatalogLoadError::Yaml {
                    path: path.to_path_buf(),
                    source: e,
                })?;
            set.actions
                .push(parse_action(path, raw_action, &id, &category, index)?);
        }
    }

    set.validate_patterns()?;
    Ok(set)
}

/// Parse one catalog file into patch sets
pub fn load_file(path: &Path) -> Result<Vec<PatchSet>, CatalogLoadError> {
    let raw = read_raw(path)?;
    check_structure(path, &raw)?;

    let metadata = raw.metadata.unwrap_or_default();
    let version = metadata.version.unwrap_or_default();
    let author = metadata.author.unwrap_or_default();

    let mut sets = Vec::new();
    for (key, value) in raw.patch_sets.unwrap_or_default() {
        let key = key_string(path, &key)?;
        let raw_set: RawSet = serde_yaml::from_value(value).map_err(|e| CatalogLoadError::Yaml {
            path: path.to_path_buf(),
            source: e,
        })?;
        sets.push(parse_set(path, &key, raw_set, &version, &author)?);
    }

    debug!("Loaded {} patch sets from {}", sets.len(), path.display());
    Ok(sets)
}

fn yaml_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map_or(false, |ext| ext == "yaml"))
            .collect(),
        Err(_) => Vec::new(),
    };
    files.sort();
    files
}

/// Load every `*.yaml` in `dir`, in file name order. Broken files are
/// reported and skipped.
pub fn load_dir(dir: &Path) -> DirLoad {
    let mut result = DirLoad::default();

    if !dir.is_dir() {
        warn!("Patch catalog directory not found: {}", dir.display());
        return result;
    }

    for file in yaml_files(dir) {
        match load_file(&file) {
            Ok(sets) => {
                result.files_loaded += 1;
                result.sets.extend(sets);
            }
            Err(e) => {
                error!("Failed to load patch catalog {}: {}", file.display(), e);
                result.errors.push(e);
            }
        }
    }

    info!(
        "Loaded {} patch sets from {} catalog files",
        result.sets.len(),
        result.files_loaded
    );
    result
}

/// Check a catalog file without registering anything
pub fn validate_file(path: &Path) -> FileValidation {
    let sets = match load_file(path) {
        Ok(sets) => sets,
        Err(e) => {
            return FileValidation {
                valid: false,
                errors: vec![e.to_string()],
                ..Default::default()
            }
        }
    };

    let mut report = FileValidation {
        valid: true,
        ..Default::default()
    };

    let experimental = sets
        .iter()
        .flat_map(|s| s.actions.iter())
        .filter(|a| a.priority == PatchPriority::Experimental)
        .count()
        + count_experimental_flags(path);
    report.action_count = sets.iter().map(|s| s.actions.len()).sum();

    if experimental > 0 {
        report.warnings.push(format!(
            "Catalog contains {} experimental patches",
            experimental
        ));
    }
    let irreversible = sets
        .iter()
        .flat_map(|s| s.actions.iter())
        .filter(|a| !a.reversible)
        .count();
    if irreversible > 0 {
        report.warnings.push(format!(
            "Catalog contains {} irreversible patches",
            irreversible
        ));
    }

    report
}

/// Actions flagged `experimental: true` without an experimental priority
fn count_experimental_flags(path: &Path) -> usize {
    let Ok(raw) = read_raw(path) else {
        return 0;
    };
    let mut count = 0;
    for (_, set) in raw.patch_sets.unwrap_or_default() {
        let Ok(set) = serde_yaml::from_value::<RawSet>(set) else {
            continue;
        };
        for (_, items) in set.actions {
            let serde_yaml::Value::Sequence(items) = items else {
                continue;
            };
            for item in items {
                if let Ok(action) = serde_yaml::from_value::<RawAction>(item) {
                    let experimental_priority = action
                        .priority
                        .as_deref()
                        .and_then(PatchPriority::parse)
                        == Some(PatchPriority::Experimental);
                    if action.experimental && !experimental_priority {
                        count += 1;
                    }
                }
            }
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const GOOD: &str = r#"
metadata:
  name: Legacy Mac support
  version: 1.2.0
  description: Graphics fixes
  author: Patchgate Team
patch_sets:
  legacy_graphics:
    target_os:
      family: macos
      versions: ["12\\.", "13\\."]
    target_hardware:
      patterns: ["MacBookPro11"]
      cpu_families: ["Intel Core i7 (Haswell)"]
    actions:
      graphics:
        - id: framebuffer
          type: kext_injection
          phase: post_install
          priority: critical
          files:
            - IntelFramebuffer.kext
            - source: AppleIntelHD.kext
          target_path: System/Library/Extensions
          requires_reboot: true
          conditions:
            min_ram_gb: 4
            exclude: ["imac"]
      boot:
        - type: efi_patch
          phase: efi_boot
          priority: experimental
"#;

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load_file() {
        let dir = TempDir::new().unwrap();
        let sets = load_file(&write(&dir, "legacy.yaml", GOOD)).unwrap();
        assert_eq!(sets.len(), 1);

        let set = &sets[0];
        assert_eq!(set.id, "legacy_graphics");
        assert_eq!(set.name, "Legacy Graphics");
        assert_eq!(set.version, "1.2.0");
        assert_eq!(set.target_hardware[1], r"Intel.*Core.*i7.*\(Haswell\)");
        assert_eq!(set.actions.len(), 2);

        let fb = &set.actions[0];
        assert_eq!(fb.source_files, vec!["IntelFramebuffer.kext", "AppleIntelHD.kext"]);
        assert_eq!(fb.destination.as_deref(), Some("System/Library/Extensions"));
        assert!(fb.requires_reboot);
        assert_eq!(fb.condition.as_ref().unwrap().minimum_ram_gb, Some(4.0));

        let boot = &set.actions[1];
        assert_eq!(boot.id, "legacy_graphics_boot_0");
        assert_eq!(boot.patch_type, PatchType::EfiPatch);
    }

    #[test]
    fn test_unknown_type_is_error() {
        let dir = TempDir::new().unwrap();
        let content = GOOD.replace("type: kext_injection", "type: rootkit");
        let err = load_file(&write(&dir, "bad.yaml", &content)).unwrap_err();
        assert!(err.to_string().contains("unknown type 'rootkit'"));
    }

    #[test]
    fn test_missing_metadata_field() {
        let dir = TempDir::new().unwrap();
        let content = GOOD.replace("  author: Patchgate Team\n", "");
        let err = load_file(&write(&dir, "bad.yaml", &content)).unwrap_err();
        assert!(err.to_string().contains("'author'"));
    }

    #[test]
    fn test_empty_patch_sets() {
        let dir = TempDir::new().unwrap();
        let content =
            "metadata: {name: a, version: '1', description: d, author: x}\npatch_sets: {}\n";
        let err = load_file(&write(&dir, "empty.yaml", content)).unwrap_err();
        assert!(matches!(err, CatalogLoadError::Structure { .. }));
    }

    #[test]
    fn test_bad_pattern_is_error() {
        let dir = TempDir::new().unwrap();
        let content = GOOD.replace("[\"MacBookPro11\"]", "[\"MacBook(\"]");
        let err = load_file(&write(&dir, "bad.yaml", &content)).unwrap_err();
        assert!(matches!(err, CatalogLoadError::Pattern(_)));
    }

    #[test]
    fn test_load_dir_skips_broken_files() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.yaml", GOOD);
        write(&dir, "b.yaml", "metadata: [");
        write(&dir, "notes.txt", "ignored");

        let loaded = load_dir(dir.path());
        assert_eq!(loaded.files_loaded, 1);
        assert_eq!(loaded.sets.len(), 1);
        assert_eq!(loaded.errors.len(), 1);
    }

    #[test]
    fn test_validate_file_warnings() {
        let dir = TempDir::new().unwrap();
        let report = validate_file(&write(&dir, "legacy.yaml", GOOD));
        assert!(report.valid);
        assert_eq!(report.action_count, 2);
        assert_eq!(report.warnings, vec!["Catalog contains 1 experimental patches"]);
    }
}
