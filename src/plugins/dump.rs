//! The dump plugin.
//!
//! Copies the part's build tree verbatim into its install directory.

use std::collections::{BTreeMap, BTreeSet};

use super::{Plugin, PluginContext};

pub struct DumpPlugin {
    context: PluginContext,
}

impl DumpPlugin {
    pub fn new(context: PluginContext) -> Self {
        Self { context }
    }
}

impl Plugin for DumpPlugin {
    fn name(&self) -> &str {
        "dump"
    }

    fn build_packages(&self) -> BTreeSet<String> {
        BTreeSet::new()
    }

    fn build_environment(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    fn build_commands(&self) -> Vec<String> {
        vec![format!("cp -a . {}", self.context.var("PART_INSTALL"))]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dump_copies_into_install_dir() {
        let plugin = DumpPlugin::new(PluginContext {
            part_name: "foo".to_string(),
            env_prefix: "DEMO".to_string(),
            parallel_build_count: 1,
        });

        assert_eq!(plugin.build_commands(), vec!["cp -a . \"${DEMO_PART_INSTALL}\""]);
    }
}
