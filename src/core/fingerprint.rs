//! Step fingerprints.
//!
//! A fingerprint is a SHA-256 digest over the canonical JSON of the inputs
//! that determine a step's result. Each input group is digested separately
//! so a rerun can name the components that changed.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};

use super::graph::PartGraph;
use crate::domain::{Part, ProjectInfo, Step};
use crate::errors::{PartsError, Result};
use crate::plugins::get_plugin;

pub const PROPERTIES: &str = "properties";
pub const PROJECT_OPTIONS: &str = "project-options";
pub const DEPENDENCIES: &str = "dependencies";
pub const PREVIOUS_STEP: &str = "previous-step";

/// Digest of a step's inputs plus the digest of each input group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub digest: String,
    pub components: BTreeMap<String, String>,
}

impl Fingerprint {
    /// Components whose digest differs from a previous set
    pub fn changed_components(&self, previous: &BTreeMap<String, String>) -> Vec<String> {
        let mut changed: Vec<String> = self
            .components
            .iter()
            .filter(|(name, digest)| previous.get(*name) != Some(*digest))
            .map(|(name, _)| name.clone())
            .collect();

        for name in previous.keys() {
            if !self.components.contains_key(name) {
                changed.push(name.clone());
            }
        }

        changed.sort();
        changed
    }
}

/// SHA-256 hex digest of the canonical JSON form of a value
pub fn digest<T: Serialize>(value: &T) -> std::result::Result<String, serde_json::Error> {
    // serde_json maps are ordered, so equal values serialize identically
    let canonical = serde_json::to_vec(&serde_json::to_value(value)?)?;
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    Ok(hex::encode(hasher.finalize()))
}

/// Computes fingerprints from the current part configuration
///
/// Results are cached for the lifetime of the fingerprinter, which should
/// not outlive a single plan or action.
pub struct Fingerprinter<'a> {
    graph: &'a PartGraph,
    info: &'a ProjectInfo,
    cache: RefCell<HashMap<(String, Step), Fingerprint>>,
}

impl<'a> Fingerprinter<'a> {
    pub fn new(graph: &'a PartGraph, info: &'a ProjectInfo) -> Self {
        Self {
            graph,
            info,
            cache: RefCell::new(HashMap::new()),
        }
    }

    /// Fingerprint of a step as it would run now
    pub fn compute(&self, part: &Part, step: Step) -> Result<Fingerprint> {
        let key = (part.name.clone(), step);
        if let Some(cached) = self.cache.borrow().get(&key) {
            return Ok(cached.clone());
        }

        let fingerprint = self.calculate(part, step)?;
        self.cache.borrow_mut().insert(key, fingerprint.clone());
        Ok(fingerprint)
    }

    fn calculate(&self, part: &Part, step: Step) -> Result<Fingerprint> {
        let mut components = BTreeMap::new();

        match step {
            Step::Pull => {
                let properties = json!({
                    "plugin": part.plugin.name(),
                    "source": part.spec.source,
                    "source-subdir": part.spec.source_subdir,
                    "stage-packages": part.spec.stage_packages,
                    "override-pull": part.spec.override_pull,
                });
                components.insert(PROPERTIES.to_string(), self.hash(part, step, &properties)?);
                components.insert(PROJECT_OPTIONS.to_string(), self.hash(part, step, &self.info.pull_options())?);
            }
            Step::Build => {
                let mut build_packages = get_plugin(part, self.info).build_packages();
                build_packages.extend(part.spec.build_packages.iter().cloned());

                let properties = json!({
                    "plugin": part.plugin.name(),
                    "plugin-properties": part.properties,
                    "after": part.spec.after,
                    "build-packages": build_packages,
                    "source-subdir": part.spec.source_subdir,
                    "organize": part.spec.organize,
                    "override-build": part.spec.override_build,
                });
                components.insert(PROPERTIES.to_string(), self.hash(part, step, &properties)?);
                components.insert(PROJECT_OPTIONS.to_string(), self.hash(part, step, &self.info.build_options())?);

                let mut dependencies = BTreeMap::new();
                for dep in self.graph.dependencies(&part.name) {
                    let staged = self.compute(dep, Step::Stage)?;
                    dependencies.insert(dep.name.clone(), staged.digest);
                }
                components.insert(DEPENDENCIES.to_string(), self.hash(part, step, &dependencies)?);
            }
            Step::Stage | Step::Prime => {
                let properties = json!({ "override": part.spec.scriptlet(step) });
                components.insert(PROPERTIES.to_string(), self.hash(part, step, &properties)?);
            }
        }

        if let Some(previous) = step.previous() {
            let previous = self.compute(part, previous)?;
            components.insert(PREVIOUS_STEP.to_string(), previous.digest);
        }

        let digest = self.hash(part, step, &json!({ "step": step, "components": components }))?;

        Ok(Fingerprint { digest, components })
    }

    /// Digest of the file filters applied by a shared step
    pub fn filter_digest(&self, part: &Part, step: Step) -> Result<Option<String>> {
        let filters = match step {
            Step::Stage => json!({ "stage": part.spec.stage }),
            Step::Prime => json!({ "stage": part.spec.stage, "prime": part.spec.prime }),
            Step::Pull | Step::Build => return Ok(None),
        };

        Ok(Some(self.hash(part, step, &filters)?))
    }

    fn hash<T: Serialize>(&self, part: &Part, step: Step, value: &T) -> Result<String> {
        digest(value).map_err(|e| PartsError::Fingerprint {
            part_name: part.name.clone(),
            step,
            message: e.to_string(),
        })
    }
}
