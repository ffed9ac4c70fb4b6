//! The nil plugin.
//!
//! Useful for parts that only pull and stage files, or that exist to
//! order other parts.

use std::collections::{BTreeMap, BTreeSet};

use super::Plugin;

#[derive(Debug, Default)]
pub struct NilPlugin;

impl Plugin for NilPlugin {
    fn name(&self) -> &str {
        "nil"
    }

    fn build_packages(&self) -> BTreeSet<String> {
        BTreeSet::new()
    }

    fn build_environment(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    fn build_commands(&self) -> Vec<String> {
        Vec::new()
    }
}
