use crate::utils::error::PairfamError;
use eyre::Report;
use indexmap::{IndexMap, IndexSet};

/// Index of a node within its tree's arena.
pub type NodeId = usize;

#[derive(Clone, Debug)]
pub struct TreeNode {
  pub label: String,
  /// Length of the edge above this node; 0 for the root.
  pub edge_length: f64,
  parent: Option<NodeId>,
  children: Vec<NodeId>,
}

/// Rooted, labelled tree with non-negative edge lengths, stored as an arena:
/// a vector of nodes with parent/child indices and a label index. Leaves
/// correspond to observed uids; the root is the inferred naive sequence.
#[derive(Clone, Debug)]
pub struct TreeModel {
  nodes: Vec<TreeNode>,
  root: NodeId,
  index: IndexMap<String, NodeId>,
}

impl TreeModel {
  pub fn new(root_label: impl Into<String>) -> Self {
    let label = root_label.into();
    let mut index = IndexMap::new();
    index.insert(label.clone(), 0);
    Self {
      nodes: vec![TreeNode {
        label,
        edge_length: 0.0,
        parent: None,
        children: vec![],
      }],
      root: 0,
      index,
    }
  }

  pub fn root(&self) -> NodeId {
    self.root
  }

  pub fn n_nodes(&self) -> usize {
    self.nodes.len()
  }

  pub fn node(&self, id: NodeId) -> &TreeNode {
    &self.nodes[id]
  }

  pub fn label(&self, id: NodeId) -> &str {
    &self.nodes[id].label
  }

  pub fn edge_length(&self, id: NodeId) -> f64 {
    self.nodes[id].edge_length
  }

  pub fn set_edge_length(&mut self, id: NodeId, length: f64) {
    self.nodes[id].edge_length = length;
  }

  pub fn parent(&self, id: NodeId) -> Option<NodeId> {
    self.nodes[id].parent
  }

  pub fn children(&self, id: NodeId) -> &[NodeId] {
    &self.nodes[id].children
  }

  pub fn is_leaf(&self, id: NodeId) -> bool {
    self.nodes[id].children.is_empty()
  }

  pub fn find(&self, label: &str) -> Option<NodeId> {
    self.index.get(label).copied()
  }

  pub fn add_child(&mut self, parent: NodeId, label: impl Into<String>, edge_length: f64) -> Result<NodeId, Report> {
    let label = label.into();
    if self.index.contains_key(&label) {
      return Err(PairfamError::DuplicateUid(format!("tree already contains a node labelled '{label}'")).into());
    }
    let id = self.nodes.len();
    self.nodes.push(TreeNode {
      label: label.clone(),
      edge_length,
      parent: Some(parent),
      children: vec![],
    });
    self.nodes[parent].children.push(id);
    self.index.insert(label, id);
    Ok(id)
  }

  /// Inserts a new root above the current one; the old root hangs below it
  /// with the given edge length.
  pub fn add_root_above(&mut self, label: impl Into<String>, edge_length: f64) -> Result<NodeId, Report> {
    let label = label.into();
    if self.index.contains_key(&label) {
      return Err(PairfamError::DuplicateUid(format!("tree already contains a node labelled '{label}'")).into());
    }
    let old_root = self.root;
    let id = self.nodes.len();
    self.nodes.push(TreeNode {
      label: label.clone(),
      edge_length: 0.0,
      parent: None,
      children: vec![old_root],
    });
    self.nodes[old_root].parent = Some(id);
    self.nodes[old_root].edge_length = edge_length;
    self.root = id;
    self.index.insert(label, id);
    Ok(id)
  }

  /// Parents-first order.
  pub fn preorder(&self) -> Vec<NodeId> {
    let mut order = Vec::with_capacity(self.nodes.len());
    let mut stack = vec![self.root];
    while let Some(id) = stack.pop() {
      order.push(id);
      // push in reverse so children come off the stack in insertion order
      for &child in self.nodes[id].children.iter().rev() {
        stack.push(child);
      }
    }
    order
  }

  /// Children-first order.
  pub fn postorder(&self) -> Vec<NodeId> {
    let mut order = self.preorder();
    order.reverse();
    order
  }

  pub fn leaves(&self) -> Vec<NodeId> {
    self.preorder().into_iter().filter(|&id| self.is_leaf(id)).collect()
  }

  /// Distance from the root for every node, indexed by node id.
  pub fn depths(&self) -> Vec<f64> {
    let mut depths = vec![0.0; self.nodes.len()];
    for id in self.preorder() {
      if let Some(parent) = self.nodes[id].parent {
        depths[id] = depths[parent] + self.nodes[id].edge_length;
      }
    }
    depths
  }

  pub fn max_leaf_depth(&self) -> f64 {
    let depths = self.depths();
    self.leaves().into_iter().map(|id| depths[id]).fold(0.0, f64::max)
  }

  /// Sum of all edge lengths.
  pub fn total_length(&self) -> f64 {
    self
      .nodes
      .iter()
      .enumerate()
      .filter(|&(id, _)| id != self.root)
      .map(|(_, node)| node.edge_length)
      .sum()
  }

  pub fn scale_edges(&mut self, factor: f64) -> Result<(), Report> {
    if !(factor.is_finite() && factor > 0.0) {
      return Err(PairfamError::NumericDomain(format!("cannot scale tree edges by {factor}")).into());
    }
    for node in &mut self.nodes {
      node.edge_length *= factor;
    }
    self.nodes[self.root].edge_length = 0.0;
    Ok(())
  }

  pub fn labels(&self) -> IndexSet<String> {
    self.preorder().into_iter().map(|id| self.nodes[id].label.clone()).collect()
  }

  pub fn leaf_labels(&self) -> IndexSet<String> {
    self.leaves().into_iter().map(|id| self.nodes[id].label.clone()).collect()
  }

  /// Removes the given nodes. Every removed node must either be a leaf or the
  /// current root with exactly one child (which then becomes the root with a
  /// zero-length edge above it).
  pub fn remove_labels(&mut self, labels: &[String]) -> Result<(), Report> {
    let mut removed = vec![false; self.nodes.len()];
    for label in labels {
      let id = self
        .find(label)
        .ok_or_else(|| PairfamError::InputMalformed(format!("no tree node labelled '{label}' to remove")))?;
      if id == self.root {
        let children = self.nodes[id].children.clone();
        if children.len() != 1 {
          return Err(
            PairfamError::NumericDomain(format!(
              "root '{label}' has {} children, can only remove a unifurcating root",
              children.len()
            ))
            .into(),
          );
        }
        let new_root = children[0];
        self.nodes[new_root].parent = None;
        self.nodes[new_root].edge_length = 0.0;
        self.root = new_root;
      } else {
        if !self.is_leaf(id) {
          return Err(
            PairfamError::NumericDomain(format!("cannot remove internal node '{label}' from the tree")).into(),
          );
        }
        let parent = self.nodes[id].parent.expect("non-root node has a parent");
        self.nodes[parent].children.retain(|&child| child != id);
      }
      removed[id] = true;
      self.index.shift_remove(label);
    }
    self.compact(&removed);
    Ok(())
  }

  fn compact(&mut self, removed: &[bool]) {
    let mut new_ids = vec![usize::MAX; self.nodes.len()];
    let mut new_nodes = Vec::with_capacity(self.nodes.len());
    for (id, node) in self.nodes.iter().enumerate() {
      if !removed[id] {
        new_ids[id] = new_nodes.len();
        new_nodes.push(node.clone());
      }
    }
    for node in &mut new_nodes {
      node.parent = node.parent.map(|parent| new_ids[parent]);
      for child in &mut node.children {
        *child = new_ids[*child];
      }
    }
    self.root = new_ids[self.root];
    self.nodes = new_nodes;
    self.index = self
      .nodes
      .iter()
      .enumerate()
      .map(|(id, node)| (node.label.clone(), id))
      .collect();
  }
}
