use crate::tree::tree::{NodeId, TreeModel};

/// Plain-text rendering of a tree, one node per line, for debug logging.
///
/// ```text
/// r
/// ├── a  (0.1000)
/// │   └── b  (0.2000)
/// └── c  (0.0500)
/// ```
pub fn ascii_tree(tree: &TreeModel) -> String {
  let mut out = String::new();
  out.push_str(tree.label(tree.root()));
  out.push('\n');
  render_children(tree, tree.root(), "", &mut out);
  out
}

fn render_children(tree: &TreeModel, id: NodeId, prefix: &str, out: &mut String) {
  let children = tree.children(id);
  for (ichild, &child) in children.iter().enumerate() {
    let last = ichild == children.len() - 1;
    out.push_str(prefix);
    out.push_str(if last { "└── " } else { "├── " });
    out.push_str(tree.label(child));
    out.push_str(&format!("  ({:.4})", tree.edge_length(child)));
    out.push('\n');
    let child_prefix = format!("{prefix}{}", if last { "    " } else { "│   " });
    render_children(tree, child, &child_prefix, out);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::tree::newick::parse_newick;
  use eyre::Report;

  #[test]
  fn renders_every_node_once() -> Result<(), Report> {
    let tree = parse_newick("(a:0.1,(b:0.2,c:0.3)i:0.4)r;")?;
    let rendered = ascii_tree(&tree);
    for label in ["r", "a", "b", "c", "i"] {
      assert_eq!(rendered.matches(label).count(), 1, "label {label}");
    }
    Ok(())
  }
}
