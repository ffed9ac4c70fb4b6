//! Plugin interfaces for building parts.
//!
//! A plugin turns a part's properties into the packages, environment and
//! commands its build step needs. Plugins are resolved by identifier
//! through `PluginKind::lookup`.

pub mod dump;
pub mod make;
pub mod nil;
pub mod runner;
pub mod schema;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;
use serde_yaml::{Mapping, Value};

use crate::domain::{Part, ProjectInfo};

pub use dump::DumpPlugin;
pub use make::{MakePlugin, MakeProperties};
pub use nil::NilPlugin;
pub use runner::CommandRunner;
pub use schema::{validate_part, FieldKind, FieldSpec, ValidatedSpec, ValidationFailure};

/// Known plugin kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginKind {
    /// Does nothing during build
    Nil,

    /// Copies the source tree into the install directory
    Dump,

    /// Builds with make and installs with `make install`
    Make,
}

impl PluginKind {
    /// Find a plugin by identifier
    pub fn lookup(name: &str) -> Option<Self> {
        match name {
            "nil" => Some(Self::Nil),
            "dump" => Some(Self::Dump),
            "make" => Some(Self::Make),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::Dump => "dump",
            Self::Make => "make",
        }
    }

    /// Plugin-specific keys accepted in a part specification
    pub fn property_fields(self) -> &'static [FieldSpec] {
        match self {
            Self::Nil | Self::Dump => &[],
            Self::Make => make::PROPERTY_FIELDS,
        }
    }

    /// Unmarshal plugin properties from the plugin-prefixed keys
    pub fn properties(self, keys: Mapping) -> Result<PluginProperties, serde_yaml::Error> {
        match self {
            Self::Nil => Ok(PluginProperties::Nil),
            Self::Dump => Ok(PluginProperties::Dump),
            Self::Make => Ok(PluginProperties::Make(serde_yaml::from_value(
                Value::Mapping(keys),
            )?)),
        }
    }
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Typed plugin properties of a part
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "plugin", rename_all = "snake_case")]
pub enum PluginProperties {
    Nil,
    Dump,
    Make(MakeProperties),
}

/// Part information handed to a plugin instance
#[derive(Debug, Clone)]
pub struct PluginContext {
    pub part_name: String,

    /// Prefix of the exported environment variables (upper-cased app name)
    pub env_prefix: String,

    pub parallel_build_count: usize,
}

impl PluginContext {
    pub fn new(part: &Part, info: &ProjectInfo) -> Self {
        Self {
            part_name: part.name.clone(),
            env_prefix: info.env_prefix(),
            parallel_build_count: info.parallel_build_count(),
        }
    }

    /// Shell reference to one of the exported variables
    pub fn var(&self, suffix: &str) -> String {
        format!("\"${{{}_{}}}\"", self.env_prefix, suffix)
    }
}

/// Trait for build plugins
pub trait Plugin: Send + Sync {
    /// Plugin identifier
    fn name(&self) -> &str;

    /// Packages required on the build host
    fn build_packages(&self) -> BTreeSet<String>;

    /// Extra environment for the build commands
    fn build_environment(&self) -> BTreeMap<String, String>;

    /// Shell commands executed in the build directory
    fn build_commands(&self) -> Vec<String>;
}

/// Instantiate the plugin of a part
pub fn get_plugin(part: &Part, info: &ProjectInfo) -> Box<dyn Plugin> {
    let context = PluginContext::new(part, info);
    match &part.properties {
        PluginProperties::Nil => Box::new(NilPlugin),
        PluginProperties::Dump => Box::new(DumpPlugin::new(context)),
        PluginProperties::Make(props) => Box::new(MakePlugin::new(context, props.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        assert_eq!(PluginKind::lookup("nil"), Some(PluginKind::Nil));
        assert_eq!(PluginKind::lookup("make"), Some(PluginKind::Make));
        assert_eq!(PluginKind::lookup("cmake"), None);
    }

    #[test]
    fn test_properties_serialize_with_plugin_tag() {
        let props = PluginProperties::Make(MakeProperties {
            make_parameters: vec!["V=1".to_string()],
        });
        let value = serde_json::to_value(&props).unwrap();
        assert_eq!(value["plugin"], "make");
        assert_eq!(value["make-parameters"][0], "V=1");
    }
}
