//! Model configuration registry.
//!
//! Configuration lives in TOML files under a base directory and an optional
//! user directory, loaded in lexicographic order. Each file declares groups;
//! each group carries shared `config` defaults, display `metadata`, and an
//! `inference_ids` map whose per-model `config` overlays the group's. The
//! resolved config must name an `impl_class`.
//!
//! Snapshots are immutable; reloads replace the whole map when any file's
//! mtime advances.

use crate::error::InferdError;
use argus_protocol::InferenceId;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// Raw shape of one configuration file.
#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    allow_override: bool,
    #[serde(default)]
    groups: BTreeMap<String, GroupFile>,
}

#[derive(Debug, Deserialize)]
struct GroupFile {
    #[serde(default)]
    config: toml::Table,
    #[serde(default)]
    metadata: toml::Table,
    #[serde(default)]
    inference_ids: BTreeMap<String, InferenceFile>,
}

#[derive(Debug, Deserialize)]
struct InferenceFile {
    #[serde(default)]
    config: toml::Table,
    #[serde(default)]
    metadata: toml::Table,
}

/// Resolved configuration for one model.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub impl_class: String,
    /// Implementation arguments, with `impl_class` removed.
    pub impl_args: toml::Table,
    pub metadata: toml::Table,
}

#[derive(Debug, Clone, Default)]
pub struct GroupConfig {
    pub group_metadata: toml::Table,
    pub inference_ids: BTreeMap<String, ModelConfig>,
}

/// One immutable load of the configuration tree.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    pub groups: BTreeMap<String, GroupConfig>,
    pub mtime: Option<SystemTime>,
}

impl RegistrySnapshot {
    /// Resolved config for a model, or an error naming what is missing.
    pub fn model_config(&self, id: &InferenceId) -> Result<&ModelConfig, InferdError> {
        let group = self
            .groups
            .get(id.group())
            .ok_or_else(|| InferdError::UnknownGroup(id.group().to_string()))?;
        group
            .inference_ids
            .get(id.name())
            .ok_or_else(|| InferdError::UnknownInferenceId(id.clone()))
    }

    /// The `/metadata` response shape: per group, group metadata plus each
    /// model's metadata.
    pub fn list_inference_ids(&self) -> serde_json::Value {
        let mut out = serde_json::Map::new();
        for (group_name, group) in &self.groups {
            let ids: serde_json::Map<String, serde_json::Value> = group
                .inference_ids
                .iter()
                .map(|(name, model)| (name.clone(), toml_to_json(&model.metadata)))
                .collect();
            out.insert(
                group_name.clone(),
                serde_json::json!({
                    "group_metadata": toml_to_json(&group.group_metadata),
                    "inference_ids": ids,
                }),
            );
        }
        serde_json::Value::Object(out)
    }
}

/// Loader for the configuration hierarchy.
#[derive(Debug, Clone)]
pub struct ConfigRegistry {
    base_dir: PathBuf,
    user_dir: Option<PathBuf>,
}

impl ConfigRegistry {
    pub fn new(base_dir: PathBuf, user_dir: Option<PathBuf>) -> Self {
        Self { base_dir, user_dir }
    }

    fn dirs(&self) -> impl Iterator<Item = &Path> {
        std::iter::once(self.base_dir.as_path()).chain(self.user_dir.as_deref())
    }

    /// Latest mtime across every TOML file in both directories.
    pub fn latest_mtime(&self) -> Option<SystemTime> {
        let mut latest = None;
        for dir in self.dirs() {
            for file in toml_files(dir) {
                if let Ok(meta) = std::fs::metadata(&file) {
                    if let Ok(mtime) = meta.modified() {
                        if latest.map(|l| mtime > l).unwrap_or(true) {
                            latest = Some(mtime);
                        }
                    }
                }
            }
        }
        latest
    }

    /// Load a fresh snapshot from disk.
    pub fn load(&self) -> Result<RegistrySnapshot, InferdError> {
        let mtime = self.latest_mtime();
        let mut groups: BTreeMap<String, GroupConfig> = BTreeMap::new();
        let mut group_defaults: BTreeMap<String, toml::Table> = BTreeMap::new();

        for dir in self.dirs() {
            if !dir.is_dir() {
                warn!("Config directory does not exist: {}", dir.display());
                continue;
            }
            for file in toml_files(dir) {
                debug!("Loading config file: {}", file.display());
                let raw = std::fs::read_to_string(&file)?;
                let parsed: ConfigFile = toml::from_str(&raw)?;

                for (group_name, group_data) in parsed.groups {
                    let group = groups.entry(group_name.clone()).or_default();
                    let defaults = group_defaults.entry(group_name.clone()).or_default();
                    merge_table(defaults, &group_data.config);
                    merge_table(&mut group.group_metadata, &group_data.metadata);

                    for (inference_name, inf_data) in group_data.inference_ids {
                        if group.inference_ids.contains_key(&inference_name)
                            && !parsed.allow_override
                        {
                            return Err(InferdError::DuplicateInferenceId(format!(
                                "{group_name}/{inference_name}"
                            )));
                        }
                        let mut config = defaults.clone();
                        merge_table(&mut config, &inf_data.config);
                        let impl_class = match config.remove("impl_class") {
                            Some(toml::Value::String(s)) => s,
                            _ => {
                                return Err(InferdError::MissingImplClass(format!(
                                    "{group_name}/{inference_name}"
                                )))
                            }
                        };
                        group.inference_ids.insert(
                            inference_name,
                            ModelConfig {
                                impl_class,
                                impl_args: config,
                                metadata: inf_data.metadata,
                            },
                        );
                    }
                }
            }
        }

        info!(
            "Configuration loaded from {}",
            self.dirs()
                .map(|d| d.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(RegistrySnapshot { groups, mtime })
    }

    /// Reload only when some file's mtime advanced past the snapshot's.
    pub fn load_if_changed(
        &self,
        prev: &RegistrySnapshot,
    ) -> Result<Option<RegistrySnapshot>, InferdError> {
        let latest = self.latest_mtime();
        match (latest, prev.mtime) {
            (Some(latest), Some(prev_mtime)) if latest <= prev_mtime => {
                debug!("No changes detected in configuration files");
                Ok(None)
            }
            (None, _) => Ok(None),
            _ => Ok(Some(self.load()?)),
        }
    }
}

fn toml_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("toml"))
                .collect()
        })
        .unwrap_or_default();
    files.sort();
    files
}

fn merge_table(target: &mut toml::Table, source: &toml::Table) {
    for (key, value) in source {
        target.insert(key.clone(), value.clone());
    }
}

pub(crate) fn toml_to_json(table: &toml::Table) -> serde_json::Value {
    serde_json::to_value(table).unwrap_or(serde_json::Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, contents: &str) {
        let mut f = std::fs::File::create(dir.join(name)).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
    }

    #[test]
    fn group_config_overlays_into_models() {
        let dir = tempfile::tempdir().unwrap();
        write_file(
            dir.path(),
            "00_base.toml",
            r#"
[groups.ocr]
config = { impl_class = "echo", device = "cpu" }
metadata = { description = "OCR models" }

[groups.ocr.inference_ids.fast]
config = { batch = 8 }

[groups.ocr.inference_ids.slow]
config = { device = "cuda" }
"#,
        );
        let registry = ConfigRegistry::new(dir.path().to_path_buf(), None);
        let snapshot = registry.load().unwrap();

        let fast = snapshot
            .model_config(&InferenceId::new("ocr", "fast"))
            .unwrap();
        assert_eq!(fast.impl_class, "echo");
        assert_eq!(fast.impl_args["device"].as_str(), Some("cpu"));
        assert_eq!(fast.impl_args["batch"].as_integer(), Some(8));

        let slow = snapshot
            .model_config(&InferenceId::new("ocr", "slow"))
            .unwrap();
        assert_eq!(slow.impl_args["device"].as_str(), Some("cuda"));
    }

    #[test]
    fn duplicate_ids_rejected_without_override() {
        let dir = tempfile::tempdir().unwrap();
        write_file(
            dir.path(),
            "00_a.toml",
            "[groups.g.inference_ids.m]\nconfig = { impl_class = \"echo\" }\n",
        );
        write_file(
            dir.path(),
            "01_b.toml",
            "[groups.g.inference_ids.m]\nconfig = { impl_class = \"echo\" }\n",
        );
        let registry = ConfigRegistry::new(dir.path().to_path_buf(), None);
        assert!(matches!(
            registry.load(),
            Err(InferdError::DuplicateInferenceId(_))
        ));
    }

    #[test]
    fn override_allows_user_dir_to_replace_models() {
        let base = tempfile::tempdir().unwrap();
        let user = tempfile::tempdir().unwrap();
        write_file(
            base.path(),
            "00_a.toml",
            "[groups.g.inference_ids.m]\nconfig = { impl_class = \"echo\" }\n",
        );
        write_file(
            user.path(),
            "00_user.toml",
            "allow_override = true\n[groups.g.inference_ids.m]\nconfig = { impl_class = \"digest\" }\n",
        );
        let registry =
            ConfigRegistry::new(base.path().to_path_buf(), Some(user.path().to_path_buf()));
        let snapshot = registry.load().unwrap();
        let model = snapshot.model_config(&InferenceId::new("g", "m")).unwrap();
        assert_eq!(model.impl_class, "digest");
    }

    #[test]
    fn missing_impl_class_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        write_file(
            dir.path(),
            "00_a.toml",
            "[groups.g.inference_ids.m]\nconfig = { device = \"cpu\" }\n",
        );
        let registry = ConfigRegistry::new(dir.path().to_path_buf(), None);
        assert!(matches!(
            registry.load(),
            Err(InferdError::MissingImplClass(_))
        ));
    }

    #[test]
    fn unchanged_files_skip_reload() {
        let dir = tempfile::tempdir().unwrap();
        write_file(
            dir.path(),
            "00_a.toml",
            "[groups.g.inference_ids.m]\nconfig = { impl_class = \"echo\" }\n",
        );
        let registry = ConfigRegistry::new(dir.path().to_path_buf(), None);
        let snapshot = registry.load().unwrap();
        assert!(registry.load_if_changed(&snapshot).unwrap().is_none());
    }
}
