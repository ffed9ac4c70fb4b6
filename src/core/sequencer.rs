//! Action planning.
//!
//! The sequencer compares the fingerprint each step would have now with the
//! record of its last successful run and decides, per (part, step), whether
//! it has to run, run again, only re-filter its files or can be skipped.
//!
//! Steps up to stage are planned part by part in topological order, so a
//! part's dependencies are always staged before it builds. Prime actions
//! come last because they read the fully populated stage tree.
//!
//! Planning never writes. Records that a RUN/RERUN invalidates are returned
//! in `Plan::outdated` and the same invalidation is applied to the rest of
//! the plan in memory.

use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::debug;

use super::fingerprint::Fingerprinter;
use super::graph::PartGraph;
use super::state::StateStore;
use crate::domain::{Action, ActionKind, Part, ProjectInfo, Step};
use crate::errors::Result;

/// Planned actions plus the records they invalidate
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    /// Actions in execution order, including skips
    pub actions: Vec<Action>,

    /// Existing records to flag as outdated before execution
    pub outdated: Vec<(String, Step)>,
}

impl Plan {
    /// Actions that change something
    pub fn pending(&self) -> impl Iterator<Item = &Action> {
        self.actions.iter().filter(|a| !a.is_noop())
    }

    pub fn is_noop(&self) -> bool {
        self.pending().next().is_none()
    }
}

pub struct Sequencer<'a> {
    graph: &'a PartGraph,
    store: &'a StateStore,
    fingerprints: Fingerprinter<'a>,
    /// Invalidations triggered earlier in the same plan
    pending: HashMap<(String, Step), String>,
    outdated: Vec<(String, Step)>,
    outdated_seen: HashSet<(String, Step)>,
}

impl<'a> Sequencer<'a> {
    pub fn new(graph: &'a PartGraph, info: &'a ProjectInfo, store: &'a StateStore) -> Self {
        Self {
            graph,
            store,
            fingerprints: Fingerprinter::new(graph, info),
            pending: HashMap::new(),
            outdated: Vec::new(),
            outdated_seen: HashSet::new(),
        }
    }

    /// Plan the actions that bring `part_names` (all parts when empty) to `target`
    pub fn plan(mut self, target: Step, part_names: &[&str]) -> Result<Plan> {
        let selected = self.graph.select(part_names)?;
        let selected_names: BTreeSet<&str> = selected.iter().map(|p| p.name.as_str()).collect();

        // Dependencies outside the selection are brought up to stage so
        // selected parts can build against them
        let mut required_by: HashMap<&str, &str> = HashMap::new();
        if !part_names.is_empty() && target >= Step::Build {
            for part in &selected {
                for dep in self.graph.all_dependencies(&part.name) {
                    if !selected_names.contains(dep.name.as_str()) {
                        required_by.entry(dep.name.as_str()).or_insert(part.name.as_str());
                    }
                }
            }
        }

        let mut actions = Vec::new();

        for part in self.graph.topological_order() {
            let required = required_by.get(part.name.as_str()).copied();
            let wanted = selected_names.contains(part.name.as_str());
            if !wanted && required.is_none() {
                continue;
            }

            let last = if wanted { target.min(Step::Stage) } else { Step::Stage };
            let mut part_actions = Vec::new();
            for &step in last.up_to() {
                part_actions.push(self.decide(part, step)?);
            }

            if let Some(dependent) = required {
                if part_actions.iter().all(Action::is_noop) {
                    continue;
                }
                for action in &mut part_actions {
                    if action.kind == ActionKind::Run {
                        action.reason = Some(format!("required to build '{}'", dependent));
                    }
                }
            }

            actions.extend(part_actions);
        }

        if target == Step::Prime {
            for part in &selected {
                actions.push(self.decide(part, Step::Prime)?);
            }
        }

        Ok(Plan {
            actions,
            outdated: self.outdated,
        })
    }

    fn decide(&mut self, part: &Part, step: Step) -> Result<Action> {
        let action = Action::new(&part.name, step);
        let key = (part.name.clone(), step);

        let action = match self.store.get(&part.name, step) {
            None => action,
            Some(_) if self.pending.contains_key(&key) => {
                let reason = self.pending[&key].clone();
                action.with_kind(ActionKind::Rerun).with_reason(reason)
            }
            Some(record) if record.outdated => action.with_kind(ActionKind::Rerun).with_reason("marked outdated"),
            Some(record) => {
                let current = self.fingerprints.compute(part, step)?;
                if current.digest != record.fingerprint {
                    let changed = current.changed_components(&record.components);
                    let reason = if changed.is_empty() {
                        "inputs changed".to_string()
                    } else {
                        format!("{} changed", changed.join(", "))
                    };
                    action.with_kind(ActionKind::Rerun).with_reason(reason)
                } else if step.is_shared()
                    && self.fingerprints.filter_digest(part, step)? != record.filter_digest
                {
                    action.with_kind(ActionKind::Reapply).with_reason("file filters changed")
                } else {
                    action.with_kind(ActionKind::Skip).with_reason("already ran")
                }
            }
        };

        debug!(
            part = %part.name,
            %step,
            kind = %action.kind,
            reason = action.reason.as_deref().unwrap_or(""),
            "Planned action"
        );

        if matches!(action.kind, ActionKind::Run | ActionKind::Rerun) {
            self.invalidate_after(part, step);
        }

        Ok(action)
    }

    /// Later steps of the part, and shared steps of every dependent part
    fn invalidate_after(&mut self, part: &Part, step: Step) {
        let reason = format!("{}:{} is scheduled to run", part.name, step);

        for &later in step.next_steps() {
            self.invalidate(&part.name, later, &reason);
        }

        if step <= Step::Stage {
            let dependents: Vec<String> = self
                .graph
                .all_dependents(&part.name)
                .into_iter()
                .map(|p| p.name.clone())
                .collect();
            for dependent in dependents {
                self.invalidate(&dependent, Step::Stage, &reason);
                self.invalidate(&dependent, Step::Prime, &reason);
            }
        }
    }

    fn invalidate(&mut self, part_name: &str, step: Step, reason: &str) {
        let key = (part_name.to_string(), step);
        self.pending.entry(key.clone()).or_insert_with(|| reason.to_string());

        let needs_mark = self.store.get(part_name, step).is_some_and(|r| !r.outdated);
        if needs_mark && self.outdated_seen.insert(key.clone()) {
            self.outdated.push(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::core::graph::build_part;
    use crate::domain::{ProjectDirs, StepRecord};
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        graph: PartGraph,
        info: ProjectInfo,
        store: StateStore,
    }

    async fn fixture(yaml: &str) -> Fixture {
        let temp = TempDir::new().unwrap();
        let dirs = ProjectDirs::new(temp.path());
        let value: serde_yaml::Value = serde_yaml::from_str(yaml).unwrap();
        let parts = value
            .as_mapping()
            .unwrap()
            .iter()
            .map(|(name, spec)| build_part(name.as_str().unwrap(), spec, &dirs).unwrap())
            .collect();
        let graph = PartGraph::new(parts).unwrap();
        let info = ProjectInfo::new("demo", "amd64", "", temp.path().join("cache"), 1, BTreeMap::new(), dirs.clone())
            .unwrap();
        let (store, _) = StateStore::load(dirs, graph.part_names()).await;
        Fixture {
            _temp: temp,
            graph,
            info,
            store,
        }
    }

    impl Fixture {
        fn plan(&self, target: Step, names: &[&str]) -> Plan {
            Sequencer::new(&self.graph, &self.info, &self.store)
                .plan(target, names)
                .unwrap()
        }

        /// Record every step as the current configuration would produce it
        async fn complete(&mut self, part_name: &str, up_to: Step) {
            let part = self.graph.get(part_name).unwrap().clone();
            for &step in up_to.up_to() {
                let fingerprints = Fingerprinter::new(&self.graph, &self.info);
                let fp = fingerprints.compute(&part, step).unwrap();
                let record = StepRecord::new(part_name, step, fp.digest)
                    .with_components(fp.components)
                    .with_filter_digest(fingerprints.filter_digest(&part, step).unwrap());
                self.store.record_success(record).await.unwrap();
            }
        }
    }

    fn summary(plan: &Plan) -> Vec<String> {
        plan.actions
            .iter()
            .map(|a| format!("{}:{}:{}", a.part_name, a.step, a.kind))
            .collect()
    }

    #[tokio::test]
    async fn test_stage_order_for_dependent_parts() {
        let f = fixture("{foo: {plugin: nil}, bar: {plugin: nil, after: [foo]}}").await;

        assert_eq!(
            summary(&f.plan(Step::Stage, &[])),
            vec![
                "foo:pull:run",
                "foo:build:run",
                "foo:stage:run",
                "bar:pull:run",
                "bar:build:run",
                "bar:stage:run",
            ]
        );
    }

    #[tokio::test]
    async fn test_prime_follows_all_stages() {
        let f = fixture("{foo: {plugin: nil}, bar: {plugin: nil}}").await;
        let plan = f.plan(Step::Prime, &[]);
        let steps: Vec<Step> = plan.actions.iter().map(|a| a.step).collect();

        assert_eq!(&steps[6..], &[Step::Prime, Step::Prime]);
        assert!(plan.outdated.is_empty());
    }

    #[tokio::test]
    async fn test_completed_steps_are_skipped() {
        let mut f = fixture("{foo: {plugin: nil}}").await;
        f.complete("foo", Step::Prime).await;

        let plan = f.plan(Step::Prime, &[]);
        assert!(plan.is_noop());
        assert!(plan.actions.iter().all(|a| a.reason.as_deref() == Some("already ran")));
    }

    #[tokio::test]
    async fn test_outdated_record_cascades() {
        let mut f = fixture("{foo: {plugin: nil}, bar: {plugin: nil, after: [foo]}}").await;
        f.complete("foo", Step::Prime).await;
        f.complete("bar", Step::Prime).await;
        f.store.mark_outdated("foo", Step::Build).await.unwrap();

        let plan = f.plan(Step::Prime, &[]);
        assert_eq!(
            summary(&plan),
            vec![
                "foo:pull:skip",
                "foo:build:rerun",
                "foo:stage:rerun",
                "bar:pull:skip",
                "bar:build:skip",
                "bar:stage:rerun",
                "foo:prime:rerun",
                "bar:prime:rerun",
            ]
        );
        assert_eq!(
            plan.outdated,
            vec![
                ("foo".to_string(), Step::Stage),
                ("foo".to_string(), Step::Prime),
                ("bar".to_string(), Step::Stage),
                ("bar".to_string(), Step::Prime),
            ]
        );
    }

    #[tokio::test]
    async fn test_implicit_dependencies() {
        let mut f = fixture("{foo: {plugin: nil}, bar: {plugin: nil, after: [foo]}}").await;

        let plan = f.plan(Step::Build, &["bar"]);
        assert_eq!(plan.actions[0].part_name, "foo");
        assert_eq!(plan.actions[2].step, Step::Stage);
        assert_eq!(plan.actions[0].reason.as_deref(), Some("required to build 'bar'"));

        f.complete("foo", Step::Stage).await;
        let plan = f.plan(Step::Build, &["bar"]);
        assert!(plan.actions.iter().all(|a| a.part_name == "bar"));
    }

    #[tokio::test]
    async fn test_filter_change_reapplies() {
        let mut f = fixture("{foo: {plugin: nil}}").await;
        f.complete("foo", Step::Prime).await;

        let changed = fixture("{foo: {plugin: nil, prime: [-usr/share]}}").await;
        let plan = Sequencer::new(&changed.graph, &changed.info, &f.store)
            .plan(Step::Prime, &[])
            .unwrap();

        let kinds: Vec<ActionKind> = plan.actions.iter().map(|a| a.kind).collect();
        assert_eq!(
            kinds,
            vec![ActionKind::Skip, ActionKind::Skip, ActionKind::Skip, ActionKind::Reapply]
        );
    }

    #[tokio::test]
    async fn test_unknown_part_name() {
        let f = fixture("{foo: {plugin: nil}}").await;
        assert!(Sequencer::new(&f.graph, &f.info, &f.store)
            .plan(Step::Pull, &["nope"])
            .is_err());
    }
}
