use std::collections::{HashMap, HashSet};
use crate::TaskNode;

/// Depth-first search for a dependency cycle.
///
/// Returns the name of a task on the cycle, or `None` if the nodes form a DAG.
/// Roots are visited in declaration order so the reported task is stable.
/// Dependencies that name unknown tasks are ignored here.
pub fn find_cycle(nodes: &[TaskNode]) -> Option<String> {
    let by_name: HashMap<&str, &TaskNode> = nodes.iter().map(|n| (n.name(), n)).collect();
    let mut visited = HashSet::new();
    let mut rec_stack = HashSet::new();

    fn dfs<'a>(
        task_name: &'a str,
        nodes: &HashMap<&'a str, &'a TaskNode>,
        visited: &mut HashSet<&'a str>,
        rec_stack: &mut HashSet<&'a str>,
    ) -> Option<String> {
        if rec_stack.contains(task_name) {
            return Some(task_name.to_string());
        }
        if visited.contains(task_name) {
            return None;
        }

        visited.insert(task_name);
        rec_stack.insert(task_name);

        if let Some(&node) = nodes.get(task_name) {
            for dep in node.dependencies() {
                if let Some(found) = dfs(dep.as_str(), nodes, visited, rec_stack) {
                    return Some(found);
                }
            }
        }

        rec_stack.remove(task_name);
        None
    }

    for node in nodes {
        if !visited.contains(node.name()) {
            if let Some(found) = dfs(node.name(), &by_name, &mut visited, &mut rec_stack) {
                return Some(found);
            }
        }
    }

    None
}
