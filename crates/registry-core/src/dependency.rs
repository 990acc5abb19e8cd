//! Dependency graph over active extension slots.
//!
//! Nodes are active slots; an edge `A -> B` means A declares a dependency
//! that resolved to slot B. Every declared dependency is evaluated once when
//! the graph is built, so validation and reporting never touch the store.
//!
//! # Example
//!
//! ```
//! use registry_core::dependency::DependencyGraph;
//! use registry_core::record::{DependencySpec, ExtensionRecord, ExtensionType};
//! use registry_core::store::RecordStore;
//! use semver::Version;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let mut store = RecordStore::open(dir.path()).unwrap();
//! store.put(ExtensionRecord::new("core", "parser", Version::new(1, 0, 0), ExtensionType::Skill)).unwrap();
//! store.put(
//!     ExtensionRecord::new("fmt", "formatter", Version::new(1, 0, 0), ExtensionType::Command)
//!         .with_dependency(DependencySpec::required("parser", "^1.0.0")),
//! ).unwrap();
//!
//! let graph = DependencyGraph::from_store(&store);
//! assert!(graph.validate().valid);
//! let order = graph.topological_order().unwrap();
//! assert_eq!(order[0].to_string(), "core:parser");
//! ```

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

use semver::Version;

use crate::error::{Error, Result};
use crate::record::{DependencySpec, SlotId};
use crate::store::RecordStore;

/// Result of evaluating one declared dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyStatus {
    /// The active version of `target` satisfies the constraint.
    Satisfied { target: SlotId, version: Version },
    /// No active slot matches the dependency name.
    NotFound,
    /// An unqualified name matches slots in several plugins.
    Ambiguous { candidates: Vec<SlotId> },
    /// The constraint expression does not parse.
    InvalidConstraint { reason: String },
    /// Neither the active nor any retained version satisfies the constraint.
    Unsatisfied { target: SlotId, active: Version },
    /// Only non-active retained versions satisfy the constraint.
    AvailableNotInstalled {
        target: SlotId,
        active: Version,
        candidates: Vec<Version>,
    },
}

impl DependencyStatus {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, Self::Satisfied { .. })
    }

    /// The slot this dependency points at, when the name resolved.
    pub fn target(&self) -> Option<&SlotId> {
        match self {
            Self::Satisfied { target, .. }
            | Self::Unsatisfied { target, .. }
            | Self::AvailableNotInstalled { target, .. } => Some(target),
            Self::NotFound | Self::Ambiguous { .. } | Self::InvalidConstraint { .. } => None,
        }
    }
}

impl fmt::Display for DependencyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Satisfied { target, version } => write!(f, "satisfied by {target}@{version}"),
            Self::NotFound => f.write_str("not found"),
            Self::Ambiguous { candidates } => {
                let names: Vec<String> = candidates.iter().map(ToString::to_string).collect();
                write!(f, "ambiguous, qualify as one of: {}", names.join(", "))
            }
            Self::InvalidConstraint { reason } => write!(f, "invalid constraint: {reason}"),
            Self::Unsatisfied { target, active } => {
                write!(f, "{target}@{active} does not satisfy the constraint")
            }
            Self::AvailableNotInstalled {
                target,
                active,
                candidates,
            } => {
                let versions: Vec<String> = candidates.iter().map(ToString::to_string).collect();
                write!(
                    f,
                    "available but not installed: {target} has {} retained, {active} active",
                    versions.join(", ")
                )
            }
        }
    }
}

/// One declared dependency of a slot and how it resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyCheck {
    pub slot: SlotId,
    pub dependency: DependencySpec,
    pub status: DependencyStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueKind {
    /// A dependency that is not satisfied.
    Dependency {
        dependency: DependencySpec,
        status: DependencyStatus,
    },
    /// Slots that depend on each other in a loop.
    Cycle(Cycle),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    pub slot: SlotId,
    pub severity: Severity,
    pub kind: IssueKind,
}

impl Issue {
    /// Whether the issue concerns a slot owned by `plugin`.
    pub fn involves_plugin(&self, plugin: &str) -> bool {
        match &self.kind {
            IssueKind::Cycle(cycle) => cycle.members.iter().any(|s| s.plugin == plugin),
            IssueKind::Dependency { .. } => self.slot.plugin == plugin,
        }
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        match &self.kind {
            IssueKind::Dependency { dependency, status } => {
                write!(f, "{level}: {} depends on {dependency}: {status}", self.slot)
            }
            IssueKind::Cycle(cycle) => write!(f, "{level}: {cycle}"),
        }
    }
}

/// A strongly connected group of slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cycle {
    /// One loop through the group, starting at its smallest slot. The edge
    /// from the last slot back to the first is implied.
    pub path: Vec<SlotId>,
    /// Every slot of the group, sorted. Can be larger than `path`.
    pub members: Vec<SlotId>,
    /// Set when the group only forms once optional edges are counted.
    pub through_optional: bool,
}

impl fmt::Display for Cycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<String> = self.path.iter().map(ToString::to_string).collect();
        if let Some(first) = names.first().cloned() {
            names.push(first);
        }
        let kind = if self.through_optional {
            "optional dependency cycle"
        } else {
            "dependency cycle"
        };
        write!(f, "{kind}: {}", names.join(" -> "))?;
        if self.members.len() > self.path.len() {
            let members: Vec<String> = self.members.iter().map(ToString::to_string).collect();
            write!(f, " (involving {})", members.join(", "))?;
        }
        Ok(())
    }
}

/// Aggregated outcome of a graph validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// False if any issue has [`Severity::Error`].
    pub valid: bool,
    pub issues: Vec<Issue>,
    /// Slots with at least one error, including every member of a hard cycle.
    pub invalid_slots: BTreeSet<SlotId>,
}

impl ValidationReport {
    fn from_issues(issues: Vec<Issue>) -> Self {
        let mut invalid_slots = BTreeSet::new();
        for issue in issues.iter().filter(|i| i.severity == Severity::Error) {
            match &issue.kind {
                IssueKind::Cycle(cycle) => invalid_slots.extend(cycle.members.iter().cloned()),
                IssueKind::Dependency { .. } => {
                    invalid_slots.insert(issue.slot.clone());
                }
            }
        }
        Self {
            valid: invalid_slots.is_empty(),
            issues,
            invalid_slots,
        }
    }

    /// Restrict the report to issues involving `plugin`.
    pub fn for_plugin(&self, plugin: &str) -> Self {
        let issues = self
            .issues
            .iter()
            .filter(|i| i.involves_plugin(plugin))
            .cloned()
            .collect();
        let mut report = Self::from_issues(issues);
        report.invalid_slots.retain(|s| s.plugin == plugin);
        report.valid = !report.issues.iter().any(|i| i.severity == Severity::Error);
        report
    }

    pub fn errors(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(|i| i.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(|i| i.severity == Severity::Warning)
    }

    pub fn is_slot_valid(&self, slot: &SlotId) -> bool {
        !self.invalid_slots.contains(slot)
    }

    /// Paths of every reported cycle.
    pub fn cycles(&self) -> Vec<&[SlotId]> {
        self.issues
            .iter()
            .filter_map(|i| match &i.kind {
                IssueKind::Cycle(cycle) => Some(cycle.path.as_slice()),
                IssueKind::Dependency { .. } => None,
            })
            .collect()
    }

    /// Human-readable lines, one per issue.
    pub fn messages(&self) -> Vec<String> {
        self.issues.iter().map(ToString::to_string).collect()
    }
}

/// Per-plugin listing of every declared dependency and its status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyReport {
    pub plugin: String,
    pub checks: Vec<DependencyCheck>,
}

impl DependencyReport {
    /// True when every required dependency is satisfied.
    pub fn all_required_satisfied(&self) -> bool {
        self.checks
            .iter()
            .all(|c| c.dependency.optional || c.status.is_satisfied())
    }

    /// Checks that did not resolve to a satisfying active version.
    pub fn unsatisfied(&self) -> impl Iterator<Item = &DependencyCheck> {
        self.checks.iter().filter(|c| !c.status.is_satisfied())
    }
}

/// Directed graph of resolved dependencies between active slots.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: BTreeSet<SlotId>,
    /// Every declared dependency per slot, in declaration order.
    checks: BTreeMap<SlotId, Vec<DependencyCheck>>,
    /// Adjacency: key depends on each target; value is true when every
    /// declaration behind the edge is optional.
    edges: BTreeMap<SlotId, BTreeMap<SlotId, bool>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the graph from the active records of `store`.
    pub fn from_store(store: &RecordStore) -> Self {
        let mut graph = Self::new();
        for record in store.active_records() {
            graph.nodes.insert(record.slot());
        }
        for record in store.active_records() {
            let checks = record
                .dependencies
                .iter()
                .map(|dep| DependencyCheck {
                    slot: record.slot(),
                    dependency: dep.clone(),
                    status: evaluate(store, dep),
                })
                .collect::<Vec<_>>();
            for check in &checks {
                if let Some(target) = check.status.target() {
                    graph.add_edge(&check.slot, target, check.dependency.optional);
                }
            }
            graph.checks.insert(record.slot(), checks);
        }
        graph
    }

    /// Declare that `from` depends on `to`.
    ///
    /// An edge stays required if any declaration behind it is required.
    pub fn add_edge(&mut self, from: &SlotId, to: &SlotId, optional: bool) {
        self.nodes.insert(from.clone());
        self.nodes.insert(to.clone());
        self.edges
            .entry(from.clone())
            .or_default()
            .entry(to.clone())
            .and_modify(|all_optional| *all_optional &= optional)
            .or_insert(optional);
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(BTreeMap::len).sum()
    }

    /// Slots `slot` depends on.
    pub fn dependencies_of(&self, slot: &SlotId) -> Vec<&SlotId> {
        self.edges
            .get(slot)
            .map(|deps| deps.keys().collect())
            .unwrap_or_default()
    }

    /// Slots that depend on `slot`.
    pub fn dependents_of(&self, slot: &SlotId) -> Vec<&SlotId> {
        self.edges
            .iter()
            .filter(|(_, deps)| deps.contains_key(slot))
            .map(|(from, _)| from)
            .collect()
    }

    /// Declared dependencies of `slot` with their status.
    pub fn checks_for(&self, slot: &SlotId) -> &[DependencyCheck] {
        self.checks.get(slot).map(Vec::as_slice).unwrap_or_default()
    }

    /// Dependency listing for every slot owned by `plugin`.
    pub fn report_for_plugin(&self, plugin: &str) -> DependencyReport {
        DependencyReport {
            plugin: plugin.to_string(),
            checks: self
                .checks
                .iter()
                .filter(|(slot, _)| slot.plugin == plugin)
                .flat_map(|(_, checks)| checks.iter().cloned())
                .collect(),
        }
    }

    /// Find dependency cycles.
    ///
    /// Every strongly connected group of required edges is reported as a
    /// hard cycle. Groups that only close once optional edges are counted
    /// are reported with `through_optional` set. Sorted by path.
    pub fn find_cycles(&self) -> Vec<Cycle> {
        let mut cycles = Vec::new();

        let hard: Vec<BTreeSet<&SlotId>> = self
            .components(false)
            .into_iter()
            .filter(|group| self.is_cyclic(group, false))
            .collect();
        for group in &hard {
            let Some(&start) = group.first() else {
                continue;
            };
            if let Some(path) = self.shortest_walk(start, start, group, false) {
                cycles.push(Cycle {
                    path,
                    members: group.iter().map(|s| (*s).clone()).collect(),
                    through_optional: false,
                });
            }
        }

        for group in self.components(true) {
            if hard.contains(&group) || !self.is_cyclic(&group, true) {
                continue;
            }
            let Some((from, to)) = self.optional_edge_within(&group) else {
                continue;
            };
            let path = if from == to {
                Some(vec![from.clone()])
            } else {
                self.shortest_walk(to, from, &group, true).map(|walk| {
                    let mut path = vec![from.clone()];
                    path.extend(walk);
                    path
                })
            };
            if let Some(path) = path {
                cycles.push(Cycle {
                    path: canonical_cycle(path),
                    members: group.iter().map(|s| (*s).clone()).collect(),
                    through_optional: true,
                });
            }
        }

        cycles.sort_by(|a, b| a.path.cmp(&b.path));
        cycles
    }

    fn targets(&self, node: &SlotId, include_optional: bool) -> Vec<&SlotId> {
        self.edges
            .get(node)
            .map(|deps| {
                deps.iter()
                    .filter(|(_, optional)| include_optional || !**optional)
                    .map(|(target, _)| target)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn is_cyclic(&self, group: &BTreeSet<&SlotId>, include_optional: bool) -> bool {
        group.len() > 1
            || group
                .iter()
                .any(|node| self.targets(node, include_optional).contains(node))
    }

    /// First optional edge with both ends in `group`.
    fn optional_edge_within<'a>(
        &'a self,
        group: &BTreeSet<&'a SlotId>,
    ) -> Option<(&'a SlotId, &'a SlotId)> {
        group.iter().find_map(|from| {
            let deps = self.edges.get(*from)?;
            deps.iter()
                .find(|(to, optional)| **optional && group.contains(to))
                .map(|(to, _)| (*from, to))
        })
    }

    /// Strongly connected components (Tarjan) over required edges, or over
    /// all edges.
    fn components(&self, include_optional: bool) -> Vec<BTreeSet<&SlotId>> {
        struct Tarjan<'a> {
            graph: &'a DependencyGraph,
            include_optional: bool,
            next_index: usize,
            index: BTreeMap<&'a SlotId, usize>,
            lowlink: BTreeMap<&'a SlotId, usize>,
            stack: Vec<&'a SlotId>,
            on_stack: BTreeSet<&'a SlotId>,
            components: Vec<BTreeSet<&'a SlotId>>,
        }

        impl<'a> Tarjan<'a> {
            fn low(&self, node: &SlotId) -> usize {
                self.lowlink.get(node).copied().unwrap_or(usize::MAX)
            }

            fn connect(&mut self, node: &'a SlotId) {
                let graph = self.graph;
                self.index.insert(node, self.next_index);
                self.lowlink.insert(node, self.next_index);
                self.next_index += 1;
                self.stack.push(node);
                self.on_stack.insert(node);

                for target in graph.targets(node, self.include_optional) {
                    let reached = match self.index.get(target).copied() {
                        None => {
                            self.connect(target);
                            self.low(target)
                        }
                        Some(index) if self.on_stack.contains(target) => index,
                        Some(_) => continue,
                    };
                    let low = self.low(node).min(reached);
                    self.lowlink.insert(node, low);
                }

                if self.lowlink.get(node) == self.index.get(node) {
                    let mut component = BTreeSet::new();
                    while let Some(member) = self.stack.pop() {
                        self.on_stack.remove(member);
                        component.insert(member);
                        if member == node {
                            break;
                        }
                    }
                    self.components.push(component);
                }
            }
        }

        let mut tarjan = Tarjan {
            graph: self,
            include_optional,
            next_index: 0,
            index: BTreeMap::new(),
            lowlink: BTreeMap::new(),
            stack: Vec::new(),
            on_stack: BTreeSet::new(),
            components: Vec::new(),
        };
        for node in &self.nodes {
            if !tarjan.index.contains_key(node) {
                tarjan.connect(node);
            }
        }
        tarjan.components
    }

    /// Shortest walk of at least one edge from `from` to `to` inside
    /// `group`, breadth first. Returns the slots visited before arriving at `to`.
    fn shortest_walk<'a>(
        &'a self,
        from: &'a SlotId,
        to: &SlotId,
        group: &BTreeSet<&SlotId>,
        include_optional: bool,
    ) -> Option<Vec<SlotId>> {
        let mut parent: BTreeMap<&'a SlotId, &'a SlotId> = BTreeMap::new();
        let mut queue = VecDeque::from([from]);

        while let Some(current) = queue.pop_front() {
            for target in self.targets(current, include_optional) {
                if !group.contains(target) {
                    continue;
                }
                if target == to {
                    let mut walk = vec![current.clone()];
                    let mut at = current;
                    while at != from {
                        at = parent.get(at).copied()?;
                        walk.push(at.clone());
                    }
                    walk.reverse();
                    return Some(walk);
                }
                if target != from && !parent.contains_key(target) {
                    parent.insert(target, current);
                    queue.push_back(target);
                }
            }
        }
        None
    }

    /// Validate the graph: every unsatisfied dependency and every cycle
    /// becomes an issue. Required problems are errors, optional ones warnings.
    pub fn validate(&self) -> ValidationReport {
        let mut issues = Vec::new();

        for checks in self.checks.values() {
            for check in checks.iter().filter(|c| !c.status.is_satisfied()) {
                issues.push(Issue {
                    slot: check.slot.clone(),
                    severity: if check.dependency.optional {
                        Severity::Warning
                    } else {
                        Severity::Error
                    },
                    kind: IssueKind::Dependency {
                        dependency: check.dependency.clone(),
                        status: check.status.clone(),
                    },
                });
            }
        }

        for cycle in self.find_cycles() {
            let Some(first) = cycle.path.first().cloned() else {
                continue;
            };
            issues.push(Issue {
                slot: first,
                severity: if cycle.through_optional {
                    Severity::Warning
                } else {
                    Severity::Error
                },
                kind: IssueKind::Cycle(cycle),
            });
        }

        ValidationReport::from_issues(issues)
    }

    /// Order slots so that dependencies come before their dependents.
    ///
    /// Optional edges are dropped when they are the only thing preventing an
    /// order. Ties are broken by slot order, so the result is deterministic.
    ///
    /// # Errors
    ///
    /// Returns `Error::DependencyCycle` if required edges form a cycle.
    pub fn topological_order(&self) -> Result<Vec<SlotId>> {
        match self.kahn(true) {
            Ok(order) => Ok(order),
            Err(_) => self.kahn(false).map_err(|participants| Error::DependencyCycle {
                participants: participants.iter().map(ToString::to_string).collect(),
            }),
        }
    }

    /// Kahn's algorithm; on failure returns the nodes that could not be placed.
    fn kahn(&self, include_optional: bool) -> std::result::Result<Vec<SlotId>, Vec<SlotId>> {
        let included = |optional: bool| include_optional || !optional;

        let mut remaining: BTreeMap<&SlotId, usize> = self
            .nodes
            .iter()
            .map(|n| {
                let degree = self
                    .edges
                    .get(n)
                    .map(|deps| deps.values().filter(|&&o| included(o)).count())
                    .unwrap_or(0);
                (n, degree)
            })
            .collect();

        let mut ready: BTreeSet<&SlotId> = remaining
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(n, _)| *n)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(current) = ready.pop_first() {
            remaining.remove(current);
            order.push(current.clone());

            for (from, deps) in &self.edges {
                let Some(&optional) = deps.get(current) else {
                    continue;
                };
                if !included(optional) {
                    continue;
                }
                if let Some(degree) = remaining.get_mut(from) {
                    *degree = degree.saturating_sub(1);
                    if *degree == 0 {
                        ready.insert(from);
                    }
                }
            }
        }

        if order.len() == self.nodes.len() {
            Ok(order)
        } else {
            Err(remaining.into_keys().cloned().collect())
        }
    }
}

/// Rotate a cycle so it starts at its smallest slot.
fn canonical_cycle(mut cycle: Vec<SlotId>) -> Vec<SlotId> {
    if let Some((min_idx, _)) = cycle.iter().enumerate().min_by(|a, b| a.1.cmp(b.1)) {
        cycle.rotate_left(min_idx);
    }
    cycle
}

/// Resolve a dependency name to active slots.
///
/// Qualified names (`plugin:name`) match exactly one slot. Unqualified names
/// match by name across all plugins.
pub fn resolve_name(store: &RecordStore, name: &str) -> Vec<SlotId> {
    match SlotId::parse_qualified(name) {
        Some(slot) if store.get_active(&slot).is_some() => vec![slot],
        Some(_) => Vec::new(),
        None => store.index().named(name).into_iter().collect(),
    }
}

/// Evaluate one dependency against the store.
pub fn evaluate(store: &RecordStore, dep: &DependencySpec) -> DependencyStatus {
    let constraint = match dep.constraint() {
        Ok(c) => c,
        Err(e) => {
            return DependencyStatus::InvalidConstraint {
                reason: e.to_string(),
            };
        }
    };

    let target = match resolve_name(store, &dep.name).as_slice() {
        [] => return DependencyStatus::NotFound,
        [single] => single.clone(),
        many => {
            return DependencyStatus::Ambiguous {
                candidates: many.to_vec(),
            };
        }
    };
    let Some(active) = store.get_active(&target) else {
        return DependencyStatus::NotFound;
    };

    if constraint.matches(&active.version) {
        return DependencyStatus::Satisfied {
            version: active.version.clone(),
            target,
        };
    }

    let candidates: Vec<Version> = store
        .history(&target)
        .into_iter()
        .map(|r| &r.version)
        .filter(|v| constraint.matches(v))
        .cloned()
        .collect();
    if candidates.is_empty() {
        DependencyStatus::Unsatisfied {
            active: active.version.clone(),
            target,
        }
    } else {
        DependencyStatus::AvailableNotInstalled {
            active: active.version.clone(),
            target,
            candidates,
        }
    }
}
