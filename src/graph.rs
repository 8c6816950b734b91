//! Dependency graph over compiled units (Arc<str> optimized)
//!
//! An edge A -> B exists iff A's bindings reference B's handle or an
//! attribute of it. Linking validates every reference, rejects cycles with
//! the full cycle path, and produces a reproducible topological order:
//! referenced units precede their referencers, ties broken by declaration
//! order.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tracing::debug;

use crate::binder::CompiledUnit;
use crate::error::TrellisError;

#[derive(Debug)]
pub struct DependencyGraph {
    /// unit -> units it references (must be created first)
    dependencies: HashMap<Arc<str>, Vec<Arc<str>>>,
    /// unit -> units referencing it
    dependents: HashMap<Arc<str>, Vec<Arc<str>>>,
    /// Topological order, referenced before referencer
    order: Vec<Arc<str>>,
}

/// Link compiled units into a dependency graph
pub fn link(units: &[Arc<CompiledUnit>]) -> Result<DependencyGraph, TrellisError> {
    let index: HashMap<&str, usize> = units
        .iter()
        .enumerate()
        .map(|(i, u)| (u.name().as_ref(), i))
        .collect();

    let mut dependencies: HashMap<Arc<str>, Vec<Arc<str>>> = HashMap::with_capacity(units.len());
    let mut dependents: HashMap<Arc<str>, Vec<Arc<str>>> = HashMap::with_capacity(units.len());
    for unit in units {
        dependencies.insert(Arc::clone(unit.name()), Vec::new());
        dependents.insert(Arc::clone(unit.name()), Vec::new());
    }

    let mut dep_indices: Vec<Vec<usize>> = vec![Vec::new(); units.len()];
    let mut dependent_indices: Vec<Vec<usize>> = vec![Vec::new(); units.len()];

    for (i, unit) in units.iter().enumerate() {
        for dep in unit.dependencies() {
            let &j = index.get(dep.as_str()).ok_or_else(|| {
                TrellisError::DanglingReference {
                    unit: unit.name().to_string(),
                    referenced: dep.clone(),
                }
            })?;

            dep_indices[i].push(j);
            dependent_indices[j].push(i);
            dependencies
                .get_mut(unit.name())
                .expect("inserted above")
                .push(Arc::clone(units[j].name()));
            dependents
                .get_mut(units[j].name())
                .expect("inserted above")
                .push(Arc::clone(unit.name()));
        }
    }

    // Kahn's algorithm; the ready set is a min-heap over declaration
    // indices so builds are reproducible
    let mut in_degree: Vec<usize> = dep_indices.iter().map(Vec::len).collect();
    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, &deg)| deg == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut order: Vec<Arc<str>> = Vec::with_capacity(units.len());
    let mut order_indices: Vec<usize> = Vec::with_capacity(units.len());

    while let Some(Reverse(i)) = ready.pop() {
        order.push(Arc::clone(units[i].name()));
        order_indices.push(i);
        for &dependent in &dependent_indices[i] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.push(Reverse(dependent));
            }
        }
    }

    if order.len() < units.len() {
        return Err(cycle_error(units, &dep_indices, &order_indices));
    }

    debug!(units = units.len(), "linked dependency graph");
    Ok(DependencyGraph {
        dependencies,
        dependents,
        order,
    })
}

/// Reconstruct one full cycle among the unprocessed units
fn cycle_error(
    units: &[Arc<CompiledUnit>],
    dep_indices: &[Vec<usize>],
    processed: &[usize],
) -> TrellisError {
    let done: HashSet<usize> = processed.iter().copied().collect();
    let start = (0..units.len())
        .find(|i| !done.contains(i))
        .expect("at least one unit is unprocessed");

    // Every unprocessed unit keeps at least one unprocessed dependency, so
    // walking them must revisit a unit
    let mut positions: HashMap<usize, usize> = HashMap::new();
    let mut path: Vec<usize> = Vec::new();
    let mut current = start;

    loop {
        if let Some(&pos) = positions.get(&current) {
            let mut cycle: Vec<String> = path[pos..]
                .iter()
                .map(|&i| units[i].name().to_string())
                .collect();
            cycle.push(units[current].name().to_string());
            return TrellisError::Cycle { path: cycle };
        }
        positions.insert(current, path.len());
        path.push(current);
        current = dep_indices[current]
            .iter()
            .copied()
            .find(|i| !done.contains(i))
            .expect("unprocessed unit has an unprocessed dependency");
    }
}

impl DependencyGraph {
    /// Topological order over unit names
    pub fn order(&self) -> &[Arc<str>] {
        &self.order
    }

    /// Units the given unit references
    #[inline]
    pub fn dependencies(&self, unit: &str) -> &[Arc<str>] {
        static EMPTY: &[Arc<str>] = &[];
        self.dependencies
            .get(unit)
            .map(|v| v.as_slice())
            .unwrap_or(EMPTY)
    }

    /// Units referencing the given unit
    #[inline]
    pub fn dependents(&self, unit: &str) -> &[Arc<str>] {
        static EMPTY: &[Arc<str>] = &[];
        self.dependents
            .get(unit)
            .map(|v| v.as_slice())
            .unwrap_or(EMPTY)
    }

    /// Check if `from` transitively references `to` (BFS)
    pub fn has_path(&self, from: &str, to: &str) -> bool {
        if from == to {
            return true;
        }

        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();

        queue.push_back(from);
        visited.insert(from);

        while let Some(current) = queue.pop_front() {
            if let Some(deps) = self.dependencies.get(current) {
                for dep in deps {
                    if dep.as_ref() == to {
                        return true;
                    }
                    if visited.insert(dep.as_ref()) {
                        queue.push_back(dep.as_ref());
                    }
                }
            }
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::bind;
    use crate::record::{SemanticType, TemplateRecord};
    use crate::shape::ArgExpr;
    use serde_json::json;

    fn node_template() -> Arc<TemplateRecord> {
        Arc::new(
            TemplateRecord::builder("node")
                .optional("Deps", SemanticType::List)
                .create_body("")
                .build()
                .unwrap(),
        )
    }

    fn unit(name: &str, deps: &[&str]) -> Arc<CompiledUnit> {
        let refs: Vec<serde_json::Value> =
            deps.iter().map(|d| json!(format!("${{{}}}", d))).collect();
        let args = match ArgExpr::from(json!({ "Deps": refs })) {
            ArgExpr::Object(entries) => entries.into_iter().collect(),
            _ => unreachable!(),
        };
        Arc::new(bind(node_template(), name, args).unwrap())
    }

    fn order_of(graph: &DependencyGraph) -> Vec<&str> {
        graph.order().iter().map(|s| s.as_ref()).collect()
    }

    #[test]
    fn referenced_precedes_referencer() {
        let units = vec![unit("alias", &["key"]), unit("key", &[])];
        let graph = link(&units).unwrap();
        assert_eq!(order_of(&graph), ["key", "alias"]);
        assert_eq!(graph.dependencies("alias"), [Arc::<str>::from("key")]);
        assert_eq!(graph.dependents("key"), [Arc::<str>::from("alias")]);
    }

    #[test]
    fn ties_broken_by_declaration_order() {
        let units = vec![unit("c", &[]), unit("a", &[]), unit("b", &[])];
        let graph = link(&units).unwrap();
        assert_eq!(order_of(&graph), ["c", "a", "b"]);
    }

    #[test]
    fn diamond_orders_every_edge() {
        let units = vec![
            unit("top", &["left", "right"]),
            unit("left", &["base"]),
            unit("right", &["base"]),
            unit("base", &[]),
        ];
        let graph = link(&units).unwrap();
        let order = order_of(&graph);

        let pos = |n: &str| order.iter().position(|&x| x == n).unwrap();
        assert!(pos("base") < pos("left"));
        assert!(pos("base") < pos("right"));
        assert!(pos("left") < pos("top"));
        assert!(pos("right") < pos("top"));
    }

    #[test]
    fn dangling_reference_rejected() {
        let units = vec![unit("alias", &["ghost"])];
        let err = link(&units).unwrap_err();
        match err {
            TrellisError::DanglingReference { unit, referenced } => {
                assert_eq!(unit, "alias");
                assert_eq!(referenced, "ghost");
            }
            other => panic!("expected DanglingReference, got {}", other),
        }
    }

    #[test]
    fn cycle_reported_with_full_path() {
        let units = vec![
            unit("a", &["b"]),
            unit("b", &["c"]),
            unit("c", &["a"]),
            unit("free", &[]),
        ];
        let err = link(&units).unwrap_err();
        match err {
            TrellisError::Cycle { path } => {
                assert_eq!(path.len(), 4);
                assert_eq!(path.first(), path.last());
                for name in ["a", "b", "c"] {
                    assert!(path.contains(&name.to_string()), "path: {:?}", path);
                }
            }
            other => panic!("expected Cycle, got {}", other),
        }
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let units = vec![unit("narcissus", &["narcissus"])];
        let err = link(&units).unwrap_err();
        assert!(err.to_string().starts_with("TRL-031"));
    }

    #[test]
    fn has_path_follows_references() {
        let units = vec![unit("a", &["b"]), unit("b", &["c"]), unit("c", &[]), unit("x", &[])];
        let graph = link(&units).unwrap();
        assert!(graph.has_path("a", "c"));
        assert!(!graph.has_path("c", "a"));
        assert!(!graph.has_path("a", "x"));
    }
}
