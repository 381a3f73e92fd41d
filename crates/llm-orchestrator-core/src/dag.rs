// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Graph compiler (spec §4.5).
//!
//! Ported from `original_source/agentic-workflows-v2/src/agentic_v2/engine/dag.py`:
//! the hand-rolled adjacency-list `DAG` with its own DFS cycle detector
//! and Kahn-style `get_execution_order` is replaced by a `petgraph`
//! `DiGraph`, keeping the same sanctioned-self-loop exception and the
//! same two query methods (`get_ready_steps`, `get_dependents`) the
//! executor depends on.

use crate::error::{OrchestratorError, Result};
use crate::workflow::WorkflowConfig;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet};

/// The compiled dependency graph for one workflow. Self-loop steps
/// (`loop_until` set) depend on themselves for re-entry but are
/// excluded from edges in the underlying graph — a step never needs to
/// wait on its own prior iteration to be scheduled the first time, and
/// the executor re-queues it in place (§4.6).
#[derive(Debug)]
pub struct Dag {
    graph: DiGraph<String, ()>,
    index_of: HashMap<String, NodeIndex>,
    self_loops: HashSet<String>,
}

impl Dag {
    /// Compiles a workflow's `depends_on` edges into a graph, rejecting
    /// any cycle other than a step's sanctioned self-dependency.
    pub fn compile(config: &WorkflowConfig) -> Result<Self> {
        let mut graph = DiGraph::new();
        let mut index_of = HashMap::new();
        let mut self_loops = HashSet::new();

        for step in &config.steps {
            let index = graph.add_node(step.name.clone());
            index_of.insert(step.name.clone(), index);
            if step.is_self_loop() {
                self_loops.insert(step.name.clone());
            }
        }

        for step in &config.steps {
            let to = index_of[&step.name];
            for dep in &step.depends_on {
                if dep == &step.name {
                    // A step naming itself in depends_on is the
                    // self-loop idiom; it is not a graph edge.
                    continue;
                }
                let from = index_of.get(dep).ok_or_else(|| OrchestratorError::MissingDependency {
                    step: step.name.clone(),
                    missing_dep: dep.clone(),
                })?;
                graph.add_edge(*from, to, ());
            }
        }

        if toposort(&graph, None).is_err() {
            return Err(OrchestratorError::CycleDetected(
                "workflow graph contains a cycle outside a step's sanctioned self-loop".to_string(),
            ));
        }

        Ok(Self {
            graph,
            index_of,
            self_loops,
        })
    }

    pub fn step_names(&self) -> impl Iterator<Item = &str> {
        self.graph.node_weights().map(|s| s.as_str())
    }

    pub fn is_self_loop(&self, name: &str) -> bool {
        self.self_loops.contains(name)
    }

    /// A valid linear execution order respecting all edges. Used to seed
    /// trace-emission ordering expectations and for dry-run validation;
    /// the executor itself schedules dynamically (§4.6), not by walking
    /// this order.
    pub fn execution_order(&self) -> Vec<String> {
        toposort(&self.graph, None)
            .expect("cycles rejected at compile time")
            .into_iter()
            .map(|idx| self.graph[idx].clone())
            .collect()
    }

    pub fn dependencies_of(&self, name: &str) -> Vec<String> {
        let Some(&index) = self.index_of.get(name) else {
            return Vec::new();
        };
        self.graph
            .neighbors_directed(index, petgraph::Direction::Incoming)
            .map(|idx| self.graph[idx].clone())
            .collect()
    }

    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        let Some(&index) = self.index_of.get(name) else {
            return Vec::new();
        };
        self.graph
            .neighbors_directed(index, petgraph::Direction::Outgoing)
            .map(|idx| self.graph[idx].clone())
            .collect()
    }

    /// Steps whose dependencies are all in `done` (completed or
    /// skipped), excluding steps already in `done` themselves. Mirrors
    /// `DAG.get_ready_steps` in the source.
    pub fn ready_steps(&self, done: &HashSet<String>) -> Vec<String> {
        self.graph
            .node_indices()
            .filter_map(|idx| {
                let name = &self.graph[idx];
                if done.contains(name) {
                    return None;
                }
                let deps = self.dependencies_of(name);
                if deps.iter().all(|dep| done.contains(dep)) {
                    Some(name.clone())
                } else {
                    None
                }
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::StepConfig;
    use std::collections::HashMap as Map;

    fn step(name: &str, deps: &[&str]) -> StepConfig {
        StepConfig {
            name: name.to_string(),
            agent: "tier0_tool".to_string(),
            description: None,
            depends_on: deps.iter().map(|s| s.to_string()).collect(),
            inputs: Map::new(),
            outputs: Map::new(),
            when: None,
            loop_until: None,
            loop_max: None,
            tools: None,
            prompt_file: None,
            model_override: None,
            timeout_seconds: None,
        }
    }

    fn config(steps: Vec<StepConfig>) -> WorkflowConfig {
        WorkflowConfig {
            name: "w".into(),
            version: "1".into(),
            description: None,
            experimental: false,
            inputs: Map::new(),
            outputs: Map::new(),
            steps,
            evaluation: None,
            capabilities: None,
        }
    }

    #[test]
    fn compiles_diamond() {
        let cfg = config(vec![
            step("a", &[]),
            step("b", &["a"]),
            step("c", &["a"]),
            step("d", &["b", "c"]),
        ]);
        let dag = Dag::compile(&cfg).unwrap();
        assert_eq!(dag.len(), 4);
        let order = dag.execution_order();
        assert!(order.iter().position(|s| s == "a").unwrap() < order.iter().position(|s| s == "b").unwrap());
        assert!(order.iter().position(|s| s == "d").unwrap() == order.len() - 1);
    }

    #[test]
    fn rejects_genuine_cycle() {
        let mut steps = vec![step("a", &["b"]), step("b", &["a"])];
        steps[0].depends_on = vec!["b".to_string()];
        steps[1].depends_on = vec!["a".to_string()];
        let cfg = config(steps);
        assert!(matches!(Dag::compile(&cfg), Err(OrchestratorError::CycleDetected(_))));
    }

    #[test]
    fn sanctioned_self_loop_is_not_a_cycle() {
        let mut s = step("reviewer", &["reviewer"]);
        s.loop_until = Some("${steps.reviewer.outputs.approved}".to_string());
        s.loop_max = Some(3);
        let cfg = config(vec![s]);
        let dag = Dag::compile(&cfg).unwrap();
        assert!(dag.is_self_loop("reviewer"));
        assert_eq!(dag.dependencies_of("reviewer"), Vec::<String>::new());
    }

    #[test]
    fn ready_steps_respects_completion_set() {
        let cfg = config(vec![step("a", &[]), step("b", &["a"]), step("c", &["a"])]);
        let dag = Dag::compile(&cfg).unwrap();
        let none_done: HashSet<String> = HashSet::new();
        assert_eq!(dag.ready_steps(&none_done), vec!["a".to_string()]);

        let a_done: HashSet<String> = ["a".to_string()].into_iter().collect();
        let mut ready = dag.ready_steps(&a_done);
        ready.sort();
        assert_eq!(ready, vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn missing_dependency_rejected_at_compile() {
        let cfg = config(vec![step("a", &["ghost"])]);
        assert!(matches!(Dag::compile(&cfg), Err(OrchestratorError::MissingDependency { .. })));
    }
}
