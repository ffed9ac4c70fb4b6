//! The make plugin.
//!
//! Runs `make` with the project's parallel build count, then installs
//! into the part's install directory through `DESTDIR`.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::{FieldSpec, Plugin, PluginContext};

pub(super) const PROPERTY_FIELDS: &[FieldSpec] = &[FieldSpec::string_list("make-parameters")];

/// Properties of the make plugin
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct MakeProperties {
    /// Extra arguments passed to every make invocation
    pub make_parameters: Vec<String>,
}

pub struct MakePlugin {
    context: PluginContext,
    properties: MakeProperties,
}

impl MakePlugin {
    pub fn new(context: PluginContext, properties: MakeProperties) -> Self {
        Self {
            context,
            properties,
        }
    }

    fn parameters(&self) -> String {
        self.properties
            .make_parameters
            .iter()
            .map(|p| format!(" {}", p))
            .collect()
    }
}

impl Plugin for MakePlugin {
    fn name(&self) -> &str {
        "make"
    }

    fn build_packages(&self) -> BTreeSet<String> {
        ["gcc", "make"].iter().map(|p| p.to_string()).collect()
    }

    fn build_environment(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    fn build_commands(&self) -> Vec<String> {
        let params = self.parameters();
        vec![
            format!("make -j{}{}", self.context.parallel_build_count, params),
            format!(
                "make -j{} install{} DESTDIR={}",
                self.context.parallel_build_count,
                params,
                self.context.var("PART_INSTALL")
            ),
        ]
    }
}
