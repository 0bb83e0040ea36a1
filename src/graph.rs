use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::{ConfigError, TaskNode, find_cycle};

/// `to` depends on `from`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
}

impl Edge {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// Validated, immutable task DAG.
///
/// Construction rejects duplicate ids, dangling references and cycles, so a
/// `TaskGraph` value is always executable.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    id: String,
    nodes: Vec<TaskNode>,
    index: HashMap<String, usize>,
    dependents: HashMap<String, Vec<String>>,
    order: Vec<usize>,
}

impl TaskGraph {
    /// Build a graph from nodes plus extra edges. Dependencies may be given
    /// either on the nodes themselves ([`TaskNode::after`]) or as edges.
    pub fn build(
        id: impl Into<String>,
        nodes: Vec<TaskNode>,
        edges: Vec<Edge>,
    ) -> Result<Self, ConfigError> {
        let mut nodes = nodes;
        let mut index = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            if index.insert(node.name().to_string(), i).is_some() {
                return Err(ConfigError::DuplicateTask(node.name().to_string()));
            }
        }

        for edge in edges {
            for end in [&edge.from, &edge.to] {
                if !index.contains_key(end) {
                    return Err(ConfigError::UnknownTask {
                        task: if end == &edge.to {
                            edge.from.clone()
                        } else {
                            edge.to.clone()
                        },
                        missing: end.clone(),
                    });
                }
            }
            let target = index[&edge.to];
            nodes[target].add_dependency(edge.from);
        }

        for node in &nodes {
            for dep in node.dependencies() {
                if !index.contains_key(dep) {
                    return Err(ConfigError::UnknownTask {
                        task: node.name().to_string(),
                        missing: dep.clone(),
                    });
                }
            }
        }

        if let Some(task) = find_cycle(&nodes) {
            return Err(ConfigError::CycleDetected(task));
        }

        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        for node in &nodes {
            for dep in node.dependencies() {
                dependents
                    .entry(dep.clone())
                    .or_default()
                    .push(node.name().to_string());
            }
        }

        let order = kahn_order(&nodes, &index, &dependents);

        Ok(Self {
            id: id.into(),
            nodes,
            index,
            dependents,
            order,
        })
    }

    /// Pipeline identifier reported in alerts.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes in declaration order.
    pub fn nodes(&self) -> &[TaskNode] {
        &self.nodes
    }

    pub fn node(&self, name: &str) -> Option<&TaskNode> {
        self.index.get(name).map(|&i| &self.nodes[i])
    }

    /// Nodes ordered so that every task comes after all of its dependencies.
    /// Independent tasks keep their declaration order.
    pub fn topological_order(&self) -> Vec<&TaskNode> {
        self.order.iter().map(|&i| &self.nodes[i]).collect()
    }

    pub fn dependencies_of(&self, name: &str) -> &[String] {
        self.node(name).map(|n| n.dependencies()).unwrap_or(&[])
    }

    pub fn dependents_of(&self, name: &str) -> &[String] {
        self.dependents.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Tasks with no dependencies, in declaration order.
    pub fn roots(&self) -> Vec<&TaskNode> {
        self.nodes
            .iter()
            .filter(|n| n.dependencies().is_empty())
            .collect()
    }

    /// Every task reachable downstream of `name`, excluding `name` itself.
    pub fn downstream_of(&self, name: &str) -> HashSet<&str> {
        let mut seen = HashSet::new();
        let mut stack: Vec<&str> = self.dependents_of(name).iter().map(String::as_str).collect();
        while let Some(next) = stack.pop() {
            if seen.insert(next) {
                stack.extend(self.dependents_of(next).iter().map(String::as_str));
            }
        }
        seen
    }

    /// Indented dependency tree, one root per block.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for root in self.roots() {
            out.push_str(root.name());
            out.push('\n');
            self.render_chain(root.name(), "  ", &mut out);
        }
        out
    }

    fn render_chain(&self, name: &str, prefix: &str, out: &mut String) {
        for child in self.dependents_of(name) {
            out.push_str(&format!("{prefix}└─> {child}\n"));
            self.render_chain(child, &format!("{prefix}    "), out);
        }
    }
}

fn kahn_order(
    nodes: &[TaskNode],
    index: &HashMap<String, usize>,
    dependents: &HashMap<String, Vec<String>>,
) -> Vec<usize> {
    let mut in_degrees: Vec<usize> = nodes.iter().map(|n| n.dependencies().len()).collect();
    let mut ready: BTreeSet<usize> = in_degrees
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == 0)
        .map(|(i, _)| i)
        .collect();
    let mut order = Vec::with_capacity(nodes.len());

    while let Some(i) = ready.pop_first() {
        order.push(i);
        if let Some(children) = dependents.get(nodes[i].name()) {
            for child in children {
                let c = index[child];
                in_degrees[c] -= 1;
                if in_degrees[c] == 0 {
                    ready.insert(c);
                }
            }
        }
    }

    order
}
