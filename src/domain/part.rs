//! Part definitions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::project::PartDirs;
use super::Step;
use crate::plugins::{PluginKind, PluginProperties};

/// Plugin-independent part properties
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct PartSpec {
    /// Plugin identifier as written in the specification
    pub plugin: Option<String>,

    /// Parts that must be staged before this one builds
    pub after: Vec<String>,

    /// Local directory to pull from, relative to the work directory
    pub source: Option<String>,

    /// Subdirectory of the source to build in
    pub source_subdir: Option<String>,

    /// Packages required on the build host
    pub build_packages: Vec<String>,

    /// Packages to unpack into the part's install directory
    pub stage_packages: Vec<String>,

    /// Fileset selecting what gets staged
    pub stage: Vec<String>,

    /// Fileset selecting what gets primed
    pub prime: Vec<String>,

    /// Install-tree moves applied after the build, glob to destination
    pub organize: BTreeMap<String, String>,

    pub override_pull: Option<String>,
    pub override_build: Option<String>,
    pub override_stage: Option<String>,
    pub override_prime: Option<String>,
}

impl PartSpec {
    /// Shell script replacing the built-in handler of a step
    pub fn scriptlet(&self, step: Step) -> Option<&str> {
        match step {
            Step::Pull => self.override_pull.as_deref(),
            Step::Build => self.override_build.as_deref(),
            Step::Stage => self.override_stage.as_deref(),
            Step::Prime => self.override_prime.as_deref(),
        }
    }
}

/// A validated part
#[derive(Debug, Clone)]
pub struct Part {
    pub name: String,
    pub plugin: PluginKind,
    pub spec: PartSpec,
    pub properties: PluginProperties,
    pub dirs: PartDirs,
}

impl Part {
    /// Names of the parts this part is ordered after
    pub fn dependencies(&self) -> &[String] {
        &self.spec.after
    }
}
