//! Table dependency graph and creation ordering.
//!
//! Nodes are table names; an edge `a -> b` means table `a` holds a foreign
//! key to table `b`, so `b` has to exist before `a` is created. Self references
//! and namespaced (cross-module) references never become edges.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SchemaError};
use crate::schema::{is_namespaced, Schema, Table};

static NO_DEPENDENCIES: BTreeSet<String> = BTreeSet::new();

/// How cyclic foreign keys are handled when ordering tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePolicy {
    /// Any cycle is reported as [`SchemaError::CircularDependency`].
    FailFast,
    /// Tables on a cycle are created without their foreign key constraints,
    /// which are added afterwards.
    Defer,
}

/// A table creation order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreationOrder {
    /// Tables in creation order.
    pub tables: Vec<String>,
    /// Tables whose foreign keys must be added after all tables exist.
    pub deferred: BTreeSet<String>,
}

impl CreationOrder {
    /// Returns the order in which the tables can be dropped.
    #[must_use]
    pub fn drop_order(&self) -> Vec<String> {
        self.tables.iter().rev().cloned().collect()
    }

    /// Returns true if the foreign keys of `table` are deferred.
    #[must_use]
    pub fn is_deferred(&self, table: &str) -> bool {
        self.deferred.contains(table)
    }
}

/// Dependency graph over the tables of a schema.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    /// Every node maps to the set of tables it depends on.
    edges: BTreeMap<String, BTreeSet<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

impl DependencyGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the graph of a schema's foreign keys.
    #[must_use]
    pub fn from_schema(schema: &Schema) -> Self {
        Self::from_tables(&schema.tables)
    }

    /// Builds the graph of a subset of tables. References to tables outside
    /// the subset are ignored.
    #[must_use]
    pub fn from_tables<'a>(tables: impl IntoIterator<Item = &'a Table> + Clone) -> Self {
        let mut graph = Self::new();
        for table in tables.clone() {
            graph.add_node(&table.name);
        }
        for table in tables {
            for target in table.foreign_keys().filter_map(|f| f.foreign_key_target()) {
                graph.add_edge(&table.name, target);
            }
        }
        graph
    }

    /// Adds a table.
    pub fn add_node(&mut self, name: &str) {
        self.edges.entry(name.to_string()).or_default();
    }

    /// Records that `from` references `to`.
    ///
    /// Returns false (and records nothing) for self references, namespaced
    /// targets and targets that are not nodes of the graph.
    pub fn add_edge(&mut self, from: &str, to: &str) -> bool {
        if from == to || is_namespaced(to) || !self.edges.contains_key(to) {
            return false;
        }
        match self.edges.get_mut(from) {
            Some(dependencies) => dependencies.insert(to.to_string()),
            None => false,
        }
    }

    /// Returns true if `name` is a node.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.edges.contains_key(name)
    }

    /// Returns the number of tables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// Returns true if the graph has no tables.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Returns the table names, sorted.
    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.edges.keys().map(String::as_str)
    }

    /// Returns the tables `name` depends on, sorted.
    pub fn dependencies(&self, name: &str) -> impl Iterator<Item = &str> {
        self.dependency_set(name).iter().map(String::as_str)
    }

    fn dependency_set(&self, name: &str) -> &BTreeSet<String> {
        self.edges.get(name).unwrap_or(&NO_DEPENDENCIES)
    }

    /// Finds one cycle, returned as the path that closes the loop
    /// (`[a, b, a]`).
    ///
    /// Depth-first search with an explicit stack; nodes and edges are visited in
    /// name order so the reported cycle is stable.
    #[must_use]
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let mut marks: BTreeMap<&str, Mark> = BTreeMap::new();

        for start in self.nodes() {
            if marks.contains_key(start) {
                continue;
            }
            marks.insert(start, Mark::InProgress);
            let mut stack = vec![(start, self.dependency_set(start).iter())];

            while let Some((node, dependencies)) = stack.last_mut() {
                let node = *node;
                let Some(next) = dependencies.next() else {
                    marks.insert(node, Mark::Done);
                    stack.pop();
                    continue;
                };
                let next = next.as_str();
                match marks.get(next) {
                    Some(Mark::InProgress) => {
                        let start_at = stack.iter().position(|(n, _)| *n == next).unwrap_or(0);
                        let mut cycle: Vec<String> = stack[start_at..]
                            .iter()
                            .map(|(n, _)| (*n).to_string())
                            .collect();
                        cycle.push(next.to_string());
                        return Some(cycle);
                    }
                    Some(Mark::Done) => {}
                    None => {
                        marks.insert(next, Mark::InProgress);
                        stack.push((next, self.dependency_set(next).iter()));
                    }
                }
            }
        }

        None
    }

    /// Returns every table that participates in at least one cycle.
    #[must_use]
    pub fn cyclic_tables(&self) -> BTreeSet<String> {
        self.nodes()
            .filter(|node| self.reaches(node, node))
            .map(str::to_string)
            .collect()
    }

    /// Returns true if `to` is reachable from `from` through at least one edge.
    fn reaches(&self, from: &str, to: &str) -> bool {
        let mut seen: BTreeSet<&str> = BTreeSet::new();
        let mut queue: VecDeque<&str> = self.dependencies(from).collect();
        while let Some(node) = queue.pop_front() {
            if node == to {
                return true;
            }
            if seen.insert(node) {
                queue.extend(self.dependencies(node));
            }
        }
        false
    }

    /// Kahn's algorithm. Outgoing edges of `ignored` tables are not counted.
    /// Ready tables are taken in name order.
    fn kahn(&self, ignored: &BTreeSet<String>) -> Vec<String> {
        let mut remaining: BTreeMap<&str, usize> = BTreeMap::new();
        let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

        for (node, dependencies) in &self.edges {
            if ignored.contains(node) {
                remaining.insert(node, 0);
                continue;
            }
            remaining.insert(node, dependencies.len());
            for dependency in dependencies {
                dependents.entry(dependency).or_default().push(node);
            }
        }

        let mut ready: BTreeSet<&str> = remaining
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(node, _)| *node)
            .collect();
        let mut order = Vec::with_capacity(self.edges.len());

        while let Some(node) = ready.pop_first() {
            order.push(node.to_string());
            for dependent in dependents.get(node).into_iter().flatten() {
                if let Some(count) = remaining.get_mut(dependent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(*dependent);
                    }
                }
            }
        }

        order
    }

    /// Produces a creation order in which every referenced table comes before
    /// the tables that reference it.
    pub fn creation_order(&self, policy: CyclePolicy) -> Result<CreationOrder> {
        let deferred = match policy {
            CyclePolicy::FailFast => BTreeSet::new(),
            CyclePolicy::Defer => self.cyclic_tables(),
        };
        let tables = self.kahn(&deferred);

        if tables.len() != self.edges.len() {
            let cycle = self.find_cycle().unwrap_or_default();
            return Err(SchemaError::CircularDependency { cycle });
        }

        if !deferred.is_empty() {
            debug!(tables = ?deferred, "Deferring foreign keys of cyclic tables");
        }

        Ok(CreationOrder { tables, deferred })
    }
}
