//! Part graph construction and traversal.
//!
//! Parts are built from their raw YAML specification and linked through
//! the "after" relation. The graph is validated once at construction:
//! every "after" target must exist and the relation must be acyclic.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap};
use std::path::Path;

use serde_yaml::Value;
use tracing::debug;

use crate::domain::{Part, ProjectDirs};
use crate::errors::{PartSpecificationError, PartsError, Result};
use crate::plugins::{validate_part, PluginKind, ValidationFailure};

/// Build a part from its raw specification
pub fn build_part(name: &str, raw: &Value, dirs: &ProjectDirs) -> Result<Part> {
    validate_part_name(name)?;

    let Some(mapping) = raw.as_mapping() else {
        return Err(PartSpecificationError::with_message(name, "part definition is malformed").into());
    };

    let explicit = mapping
        .get("plugin")
        .and_then(Value::as_str)
        .filter(|p| !p.is_empty());

    // Without an explicit plugin the part name doubles as plugin name
    let plugin = match explicit {
        Some(plugin_name) => PluginKind::lookup(plugin_name).ok_or_else(|| PartsError::InvalidPlugin {
            plugin_name: plugin_name.to_string(),
            part_name: name.to_string(),
        })?,
        None => PluginKind::lookup(name).ok_or_else(|| PartsError::UndefinedPlugin {
            part_name: name.to_string(),
        })?,
    };

    let validated = validate_part(plugin, mapping).map_err(|failure| match failure {
        ValidationFailure::Fields(errors) => PartSpecificationError::from_field_errors(name, errors),
        ValidationFailure::Message(message) => PartSpecificationError::with_message(name, message),
    })?;

    debug!(part = name, %plugin, "Built part");

    Ok(Part {
        name: name.to_string(),
        plugin,
        spec: validated.spec,
        properties: validated.properties,
        dirs: dirs.part_dirs(name),
    })
}

/// Part names become directory names under the work directory
pub fn validate_part_name(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0'])
        || Path::new(name).is_absolute();

    if invalid {
        return Err(PartsError::InvalidPartName {
            part_name: name.to_string(),
        });
    }
    Ok(())
}

/// Parts linked by their "after" dependencies
#[derive(Debug)]
pub struct PartGraph {
    /// Parts in declaration order
    parts: Vec<Part>,
    /// Map from part name to index
    index_map: HashMap<String, usize>,
    /// index -> parts ordered after it
    dependents: Vec<Vec<usize>>,
    /// index -> parts it is ordered after
    dependencies: Vec<Vec<usize>>,
    /// Stable topological order (indices)
    order: Vec<usize>,
}

impl PartGraph {
    /// Build and validate the graph
    pub fn new(parts: Vec<Part>) -> Result<Self> {
        let mut index_map = HashMap::new();
        for (i, part) in parts.iter().enumerate() {
            if index_map.insert(part.name.clone(), i).is_some() {
                return Err(PartsError::DuplicatePart {
                    part_name: part.name.clone(),
                });
            }
        }

        let mut dependents = vec![Vec::new(); parts.len()];
        let mut dependencies = vec![Vec::new(); parts.len()];

        for (to_idx, part) in parts.iter().enumerate() {
            for dep in part.dependencies() {
                let from_idx = *index_map.get(dep).ok_or_else(|| PartsError::UnknownDependency {
                    part_name: part.name.clone(),
                    dependency: dep.clone(),
                })?;

                if !dependencies[to_idx].contains(&from_idx) {
                    dependents[from_idx].push(to_idx);
                    dependencies[to_idx].push(from_idx);
                }
            }
        }

        let order = Self::sort(&parts, &dependents, &dependencies)?;

        Ok(Self {
            parts,
            index_map,
            dependents,
            dependencies,
            order,
        })
    }

    /// Kahn's algorithm, always taking the earliest declared ready part
    fn sort(parts: &[Part], dependents: &[Vec<usize>], dependencies: &[Vec<usize>]) -> Result<Vec<usize>> {
        let mut in_degree: Vec<usize> = dependencies.iter().map(Vec::len).collect();
        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, deg)| **deg == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(parts.len());
        while let Some(Reverse(node)) = ready.pop() {
            order.push(node);
            for &dependent in &dependents[node] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.push(Reverse(dependent));
                }
            }
        }

        if order.len() != parts.len() {
            let cycle: Vec<String> = in_degree
                .iter()
                .enumerate()
                .filter(|(_, deg)| **deg > 0)
                .map(|(i, _)| parts[i].name.clone())
                .collect();
            return Err(PartsError::DependencyCycle { parts: cycle });
        }

        Ok(order)
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Parts in declaration order
    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    pub fn get(&self, name: &str) -> Option<&Part> {
        self.index_map.get(name).map(|&i| &self.parts[i])
    }

    /// Look up a part, failing with `PartNotFound`
    pub fn part(&self, name: &str) -> Result<&Part> {
        self.get(name).ok_or_else(|| PartsError::PartNotFound {
            part_name: name.to_string(),
        })
    }

    pub fn part_names(&self) -> Vec<String> {
        self.parts.iter().map(|p| p.name.clone()).collect()
    }

    /// Every part ordered after all parts it depends on
    ///
    /// Parts with no mutual ordering keep their declaration order.
    pub fn topological_order(&self) -> Vec<&Part> {
        self.order.iter().map(|&i| &self.parts[i]).collect()
    }

    /// Resolve part names, keeping topological order
    ///
    /// An empty selection means every part.
    pub fn select(&self, names: &[&str]) -> Result<Vec<&Part>> {
        if names.is_empty() {
            return Ok(self.topological_order());
        }

        let mut wanted = BTreeSet::new();
        for name in names {
            let idx = self.index_map.get(*name).ok_or_else(|| PartsError::PartNotFound {
                part_name: name.to_string(),
            })?;
            wanted.insert(*idx);
        }

        Ok(self
            .order
            .iter()
            .filter(|i| wanted.contains(i))
            .map(|&i| &self.parts[i])
            .collect())
    }

    /// Parts that `name` is directly ordered after
    pub fn dependencies(&self, name: &str) -> Vec<&Part> {
        self.index_map
            .get(name)
            .map(|&i| self.dependencies[i].iter().map(|&d| &self.parts[d]).collect())
            .unwrap_or_default()
    }

    /// Every part `name` depends on, directly or transitively
    pub fn all_dependencies(&self, name: &str) -> Vec<&Part> {
        self.closure(name, &self.dependencies)
    }

    /// Every part that depends on `name`, directly or transitively
    pub fn all_dependents(&self, name: &str) -> Vec<&Part> {
        self.closure(name, &self.dependents)
    }

    fn closure(&self, name: &str, edges: &[Vec<usize>]) -> Vec<&Part> {
        let Some(&start) = self.index_map.get(name) else {
            return Vec::new();
        };

        let mut seen = BTreeSet::new();
        let mut stack = edges[start].clone();
        while let Some(node) = stack.pop() {
            if seen.insert(node) {
                stack.extend(edges[node].iter().copied());
            }
        }

        self.order
            .iter()
            .filter(|i| seen.contains(i))
            .map(|&i| &self.parts[i])
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts_from_yaml(yaml: &str) -> Result<Vec<Part>> {
        let value: Value = serde_yaml::from_str(yaml).unwrap();
        let dirs = ProjectDirs::new("/work");
        value
            .as_mapping()
            .unwrap()
            .iter()
            .map(|(name, spec)| build_part(name.as_str().unwrap(), spec, &dirs))
            .collect()
    }

    fn names(parts: &[&Part]) -> Vec<String> {
        parts.iter().map(|p| p.name.clone()).collect()
    }

    #[test]
    fn test_stable_topological_order() {
        let parts = parts_from_yaml(
            r#"
bar:
  plugin: nil
  after: [foo]
foo:
  plugin: nil
foobar:
  plugin: nil
"#,
        )
        .unwrap();

        let graph = PartGraph::new(parts).unwrap();
        assert_eq!(names(&graph.topological_order()), vec!["foo", "bar", "foobar"]);
    }

    #[test]
    fn test_cycle_detected() {
        let parts = parts_from_yaml(
            r#"
a: {plugin: nil, after: [c]}
b: {plugin: nil, after: [a]}
c: {plugin: nil, after: [b]}
d: {plugin: nil}
"#,
        )
        .unwrap();

        match PartGraph::new(parts) {
            Err(PartsError::DependencyCycle { parts }) => {
                assert_eq!(parts, vec!["a", "b", "c"]);
            }
            other => panic!("expected cycle error, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_dependency() {
        let parts = parts_from_yaml("a: {plugin: nil, after: [ghost]}").unwrap();
        assert!(matches!(
            PartGraph::new(parts),
            Err(PartsError::UnknownDependency { .. })
        ));
    }

    #[test]
    fn test_transitive_relations() {
        let parts = parts_from_yaml(
            r#"
a: {plugin: nil}
b: {plugin: nil, after: [a]}
c: {plugin: nil, after: [b]}
d: {plugin: nil}
"#,
        )
        .unwrap();
        let graph = PartGraph::new(parts).unwrap();

        assert_eq!(names(&graph.all_dependencies("c")), vec!["a", "b"]);
        assert_eq!(names(&graph.all_dependents("a")), vec!["b", "c"]);
        assert_eq!(names(&graph.dependencies("c")), vec!["b"]);
        assert!(graph.all_dependents("d").is_empty());
    }

    #[test]
    fn test_select_unknown_part() {
        let parts = parts_from_yaml("a: {plugin: nil}").unwrap();
        let graph = PartGraph::new(parts).unwrap();

        assert_eq!(graph.select(&[]).unwrap().len(), 1);
        assert!(matches!(
            graph.select(&["zzz"]),
            Err(PartsError::PartNotFound { part_name }) if part_name == "zzz"
        ));
    }

    #[test]
    fn test_plugin_resolution_errors() {
        let dirs = ProjectDirs::new("/work");

        let undefined = build_part("foo", &serde_yaml::from_str("{}").unwrap(), &dirs);
        assert!(matches!(
            undefined,
            Err(PartsError::UndefinedPlugin { part_name }) if part_name == "foo"
        ));

        let invalid = build_part("foo", &serde_yaml::from_str("{plugin: cmake}").unwrap(), &dirs);
        assert!(matches!(
            invalid,
            Err(PartsError::InvalidPlugin { plugin_name, .. }) if plugin_name == "cmake"
        ));

        // A part named after a plugin needs no explicit plugin
        let implicit = build_part("dump", &serde_yaml::from_str("{}").unwrap(), &dirs).unwrap();
        assert_eq!(implicit.plugin, PluginKind::Dump);
    }

    #[test]
    fn test_malformed_part() {
        let dirs = ProjectDirs::new("/work");
        let result = build_part("foo", &Value::String("nope".to_string()), &dirs);

        match result {
            Err(PartsError::PartSpecification(err)) => {
                assert_eq!(err.part_name, "foo");
                assert!(err.to_string().contains("malformed"));
            }
            other => panic!("expected specification error, got {:?}", other),
        }
    }

    #[test]
    fn test_part_names_must_stay_in_work_dir() {
        let dirs = ProjectDirs::new("/work");
        let raw: Value = serde_yaml::from_str("{plugin: nil}").unwrap();

        for name in ["", ".", "..", "../escape", "/tmp/victim", "a/b", "a\\b"] {
            let result = build_part(name, &raw, &dirs);
            assert!(
                matches!(result, Err(PartsError::InvalidPartName { ref part_name }) if part_name == name),
                "{:?} was accepted",
                name
            );
        }

        assert!(build_part("lib-foo.2", &raw, &dirs).is_ok());
    }
}
