//! The static shape of the work: generator nodes, their children and the
//! tasks each of them owns.
//!
//! A [`GeneratorNode`] is a plain nested description. [`GeneratorTree::new`]
//! validates it and flattens it into an arena stored in pre-order, which is
//! what the engine walks.

use std::collections::HashSet;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::TreeError;
use crate::output::normalize_path;
use crate::task::TaskDefinition;

/// Description of a generator node, before validation.
#[derive(Debug)]
pub struct GeneratorNode {
    id: String,
    generator: String,
    base_directory: Option<Utf8PathBuf>,
    children: Vec<GeneratorNode>,
    tasks: Vec<TaskDefinition>,
}

impl GeneratorNode {
    pub fn new(id: impl Into<String>, generator: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            generator: generator.into(),
            base_directory: None,
            children: Vec::new(),
            tasks: Vec::new(),
        }
    }

    /// Directory relative destinations of this node resolve against. A
    /// relative directory is taken from the parent's. Nodes without one
    /// inherit the parent's, the root defaults to `/`.
    pub fn base_directory(mut self, directory: impl Into<Utf8PathBuf>) -> Self {
        self.base_directory = Some(directory.into());
        self
    }

    pub fn task(mut self, task: TaskDefinition) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn tasks(mut self, tasks: impl IntoIterator<Item = TaskDefinition>) -> Self {
        self.tasks.extend(tasks);
        self
    }

    pub fn child(mut self, child: GeneratorNode) -> Self {
        self.children.push(child);
        self
    }
}

/// Position of a node in a [`GeneratorTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIdx(usize);

impl NodeIdx {
    pub fn index(self) -> usize {
        self.0
    }
}

/// A validated node inside the arena.
#[derive(Debug)]
pub struct NodeEntry {
    id: String,
    generator: String,
    base_directory: Utf8PathBuf,
    parent: Option<NodeIdx>,
    children: Vec<NodeIdx>,
    tasks: Vec<Arc<TaskDefinition>>,
    depth: usize,
}

impl NodeEntry {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn generator(&self) -> &str {
        &self.generator
    }

    pub fn base_directory(&self) -> &Utf8Path {
        &self.base_directory
    }

    pub fn parent(&self) -> Option<NodeIdx> {
        self.parent
    }

    pub fn children(&self) -> &[NodeIdx] {
        &self.children
    }

    pub fn tasks(&self) -> &[Arc<TaskDefinition>] {
        &self.tasks
    }

    pub fn depth(&self) -> usize {
        self.depth
    }
}

/// An immutable, validated generator tree.
#[derive(Debug)]
pub struct GeneratorTree {
    /// Nodes in pre-order, the root first.
    nodes: Vec<NodeEntry>,
    post_order: Vec<NodeIdx>,
    post_rank: Vec<usize>,
}

impl GeneratorTree {
    pub fn new(root: GeneratorNode) -> Result<Self, TreeError> {
        let mut nodes = Vec::new();
        let mut ids = HashSet::new();

        flatten(root, None, Utf8Path::new("/"), 0, &mut nodes, &mut ids)?;

        let mut post_order = Vec::with_capacity(nodes.len());
        collect_post_order(&nodes, NodeIdx(0), &mut post_order);

        let mut post_rank = vec![0; nodes.len()];
        for (rank, idx) in post_order.iter().enumerate() {
            post_rank[idx.0] = rank;
        }

        Ok(Self {
            nodes,
            post_order,
            post_rank,
        })
    }

    pub fn root(&self) -> NodeIdx {
        NodeIdx(0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, idx: NodeIdx) -> &NodeEntry {
        &self.nodes[idx.0]
    }

    pub fn find(&self, id: &str) -> Option<NodeIdx> {
        self.nodes.iter().position(|node| node.id == id).map(NodeIdx)
    }

    /// Ancestors before descendants, siblings in declaration order.
    pub fn pre_order(&self) -> impl Iterator<Item = NodeIdx> + '_ {
        (0..self.nodes.len()).map(NodeIdx)
    }

    /// Descendants before ancestors, siblings in declaration order.
    pub fn post_order(&self) -> impl Iterator<Item = NodeIdx> + '_ {
        self.post_order.iter().copied()
    }

    pub(crate) fn post_rank(&self, idx: NodeIdx) -> usize {
        self.post_rank[idx.0]
    }

    /// The node itself, then its parent, up to the root.
    pub fn ancestors(&self, idx: NodeIdx) -> impl Iterator<Item = NodeIdx> + '_ {
        std::iter::successors(Some(idx), |&idx| self.nodes[idx.0].parent)
    }

    /// Human readable location of a node, e.g. `root > root:app > root:app:db`.
    pub fn path(&self, idx: NodeIdx) -> String {
        let mut ids: Vec<_> = self
            .ancestors(idx)
            .map(|idx| self.nodes[idx.0].id.as_str())
            .collect();
        ids.reverse();
        ids.join(" > ")
    }
}

fn flatten(
    node: GeneratorNode,
    parent: Option<NodeIdx>,
    parent_directory: &Utf8Path,
    depth: usize,
    nodes: &mut Vec<NodeEntry>,
    ids: &mut HashSet<String>,
) -> Result<NodeIdx, TreeError> {
    if node.id.is_empty() {
        return Err(TreeError::EmptyNodeId {
            parent: parent.map_or_else(|| "<root>".to_string(), |p| nodes[p.0].id.clone()),
        });
    }

    if !ids.insert(node.id.clone()) {
        return Err(TreeError::DuplicateNodeId(node.id));
    }

    let mut names = HashSet::new();
    for task in &node.tasks {
        task.validate(&node.id)?;
        if !names.insert(task.name()) {
            return Err(TreeError::DuplicateTask {
                node: node.id.clone(),
                task: task.name().to_string(),
            });
        }
    }

    let base_directory = match &node.base_directory {
        Some(directory) => normalize_path(&parent_directory.join(directory)),
        None => parent_directory.to_path_buf(),
    };

    let idx = NodeIdx(nodes.len());
    nodes.push(NodeEntry {
        id: node.id,
        generator: node.generator,
        base_directory: base_directory.clone(),
        parent,
        children: Vec::new(),
        tasks: node.tasks.into_iter().map(Arc::new).collect(),
        depth,
    });

    for child in node.children {
        let child = flatten(child, Some(idx), &base_directory, depth + 1, nodes, ids)?;
        nodes[idx.0].children.push(child);
    }

    Ok(idx)
}

fn collect_post_order(nodes: &[NodeEntry], idx: NodeIdx, acc: &mut Vec<NodeIdx>) {
    for &child in &nodes[idx.0].children {
        collect_post_order(nodes, child, acc);
    }
    acc.push(idx);
}

impl std::fmt::Display for GeneratorTree {
    /// Renders the tree as a Mermaid diagram.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "graph TD")?;

        for (i, node) in self.nodes.iter().enumerate() {
            let tasks: Vec<_> = node.tasks.iter().map(|task| task.name()).collect();
            let label = format!("{} ({})<br/>{}", node.id, node.generator, tasks.join(", "))
                .replace('"', "\\\"");
            writeln!(f, "    {i}[\"{label}\"]")?;
        }

        for (i, node) in self.nodes.iter().enumerate() {
            for child in &node.children {
                writeln!(f, "    {i} --> {}", child.0)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderType;
    use crate::task::TaskRun;

    fn task(name: &'static str) -> TaskDefinition {
        TaskDefinition::builder(name).run(|_, _| Ok(TaskRun::new()))
    }

    fn sample() -> GeneratorTree {
        let root = GeneratorNode::new("root", "project")
            .base_directory("/project")
            .task(task("main"))
            .child(
                GeneratorNode::new("root:app", "app")
                    .base_directory("apps/app")
                    .child(GeneratorNode::new("root:app:db", "db"))
                    .child(GeneratorNode::new("root:app:api", "api").base_directory("api")),
            )
            .child(GeneratorNode::new("root:docs", "docs"));

        GeneratorTree::new(root).unwrap()
    }

    fn ids(tree: &GeneratorTree, order: impl Iterator<Item = NodeIdx>) -> Vec<String> {
        order.map(|idx| tree.node(idx).id().to_string()).collect()
    }

    #[test]
    fn test_traversal_orders() {
        let tree = sample();

        assert_eq!(
            ids(&tree, tree.pre_order()),
            ["root", "root:app", "root:app:db", "root:app:api", "root:docs"]
        );
        assert_eq!(
            ids(&tree, tree.post_order()),
            ["root:app:db", "root:app:api", "root:app", "root:docs", "root"]
        );
    }

    #[test]
    fn test_ancestors_and_path() {
        let tree = sample();
        let api = tree.find("root:app:api").unwrap();

        assert_eq!(
            ids(&tree, tree.ancestors(api)),
            ["root:app:api", "root:app", "root"]
        );
        assert_eq!(tree.path(api), "root > root:app > root:app:api");
        assert_eq!(tree.node(api).depth(), 2);
    }

    #[test]
    fn test_base_directories() {
        let tree = sample();
        let dir = |id: &str| tree.node(tree.find(id).unwrap()).base_directory().to_string();

        assert_eq!(dir("root"), "/project");
        assert_eq!(dir("root:app"), "/project/apps/app");
        assert_eq!(dir("root:app:db"), "/project/apps/app");
        assert_eq!(dir("root:app:api"), "/project/apps/app/api");
        assert_eq!(dir("root:docs"), "/project");
    }

    #[test]
    fn test_duplicate_node_id() {
        let root = GeneratorNode::new("root", "project")
            .child(GeneratorNode::new("root:a", "a"))
            .child(GeneratorNode::new("root:b", "b").child(GeneratorNode::new("root:a", "a")));

        let err = GeneratorTree::new(root).unwrap_err();
        assert!(matches!(err, TreeError::DuplicateNodeId(id) if id == "root:a"));
    }

    #[test]
    fn test_empty_node_id() {
        let root = GeneratorNode::new("root", "project").child(GeneratorNode::new("", "a"));

        let err = GeneratorTree::new(root).unwrap_err();
        assert!(matches!(err, TreeError::EmptyNodeId { parent } if parent == "root"));
    }

    #[test]
    fn test_duplicate_task_name() {
        let root = GeneratorNode::new("root", "project")
            .task(task("main"))
            .task(task("main"));

        let err = GeneratorTree::new(root).unwrap_err();
        assert!(matches!(
            err,
            TreeError::DuplicateTask { node, task } if node == "root" && task == "main"
        ));
    }

    #[test]
    fn test_output_must_be_read_only() {
        let writable = ProviderType::<String>::new("writable");
        let root = GeneratorNode::new("root", "project").task(
            TaskDefinition::builder("main")
                .outputs("writable", &writable)
                .run(|_, _| Ok(TaskRun::new())),
        );

        assert!(matches!(
            GeneratorTree::new(root),
            Err(TreeError::OutputNotReadOnly { .. })
        ));
    }

    #[test]
    fn test_mermaid() {
        let tree = sample();
        let mermaid = tree.to_string();

        assert!(mermaid.starts_with("graph TD"));
        assert!(mermaid.contains("0[\"root (project)<br/>main\"]"));
        assert!(mermaid.contains("0 --> 1"));
        assert!(mermaid.contains("1 --> 3"));
    }
}
