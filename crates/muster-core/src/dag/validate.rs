//! Plan validation: unique ids, known dependencies, acyclic, ≥1 root
//! (spec §3, §4.6). Cycle detection uses Kahn's algorithm.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::DagValidationError;

use super::types::TaskPlan;

pub fn validate(plan: &TaskPlan) -> Result<(), DagValidationError> {
    if plan.nodes.is_empty() {
        return Err(DagValidationError::Empty);
    }

    let mut seen = HashSet::new();
    for node in &plan.nodes {
        if !seen.insert(node.id.as_str()) {
            return Err(DagValidationError::DuplicateId { id: node.id.clone() });
        }
    }

    for node in &plan.nodes {
        for dep in &node.dependencies {
            if !seen.contains(dep.as_str()) {
                return Err(DagValidationError::UnknownDependency {
                    task: node.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    if !plan.nodes.iter().any(|n| n.dependencies.is_empty()) {
        return Err(DagValidationError::NoRoot);
    }

    check_for_cycles(plan)
}

/// Kahn's algorithm: repeatedly remove nodes with in-degree 0; any nodes
/// left over after the queue drains participate in a cycle.
fn check_for_cycles(plan: &TaskPlan) -> Result<(), DagValidationError> {
    let mut in_degree: HashMap<&str, usize> = plan.nodes.iter().map(|n| (n.id.as_str(), 0)).collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for node in &plan.nodes {
        *in_degree.get_mut(node.id.as_str()).unwrap() += node.dependencies.len();
        for dep in &node.dependencies {
            dependents.entry(dep.as_str()).or_default().push(node.id.as_str());
        }
    }

    let mut queue: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(&id, _)| id)
        .collect();
    let mut visited = 0usize;

    while let Some(id) = queue.pop_front() {
        visited += 1;
        if let Some(deps) = dependents.get(id) {
            for &dep_id in deps {
                let entry = in_degree.get_mut(dep_id).unwrap();
                *entry -= 1;
                if *entry == 0 {
                    queue.push_back(dep_id);
                }
            }
        }
    }

    if visited != plan.nodes.len() {
        let cycle_ids: Vec<String> = in_degree
            .into_iter()
            .filter(|(_, deg)| *deg > 0)
            .map(|(id, _)| id.to_string())
            .collect();
        return Err(DagValidationError::Cycle { ids: cycle_ids });
    }

    Ok(())
}
