use crate::tree::tree::{NodeId, TreeModel};
use crate::utils::error::PairfamError;
use eyre::{Report, WrapErr};

/// Parses a single rooted newick string. Unlabelled nodes get deterministic
/// generated labels (`in-0`, `in-1`, ... in parse order); edge lengths default
/// to 0.
pub fn parse_newick(treestr: &str) -> Result<TreeModel, Report> {
  Parser::new(treestr).parse().wrap_err("When parsing newick tree")
}

/// One tree per non-empty line.
pub fn parse_newick_lines(content: &str) -> Result<Vec<TreeModel>, Report> {
  content
    .lines()
    .map(str::trim)
    .filter(|line| !line.is_empty())
    .enumerate()
    .map(|(iline, line)| parse_newick(line).wrap_err_with(|| format!("When parsing tree on line {}", iline + 1)))
    .collect()
}

pub fn to_newick(tree: &TreeModel) -> String {
  let mut out = String::new();
  write_node(tree, tree.root(), &mut out);
  out.push(';');
  out
}

fn write_node(tree: &TreeModel, id: NodeId, out: &mut String) {
  let children = tree.children(id);
  if !children.is_empty() {
    out.push('(');
    for (ichild, &child) in children.iter().enumerate() {
      if ichild > 0 {
        out.push(',');
      }
      write_node(tree, child, out);
    }
    out.push(')');
  }
  out.push_str(tree.label(id));
  if tree.parent(id).is_some() {
    out.push(':');
    out.push_str(&format_edge_length(tree.edge_length(id)));
  }
}

fn format_edge_length(length: f64) -> String {
  if length == length.trunc() && length.abs() < 1e15 {
    format!("{length:.1}")
  } else {
    format!("{length}")
  }
}

struct Parser<'a> {
  bytes: &'a [u8],
  pos: usize,
  n_unlabelled: usize,
}

struct ParsedNode {
  label: Option<String>,
  edge_length: f64,
  children: Vec<ParsedNode>,
}

impl<'a> Parser<'a> {
  fn new(treestr: &'a str) -> Self {
    Self {
      bytes: treestr.as_bytes(),
      pos: 0,
      n_unlabelled: 0,
    }
  }

  fn parse(mut self) -> Result<TreeModel, Report> {
    let root = self.parse_subtree()?;
    self.skip_whitespace();
    if self.peek() == Some(b';') {
      self.pos += 1;
    }
    self.skip_whitespace();
    if self.pos != self.bytes.len() {
      return Err(PairfamError::InputMalformed(format!("trailing characters at position {} in newick string", self.pos)).into());
    }
    self.build(root)
  }

  fn build(&mut self, parsed_root: ParsedNode) -> Result<TreeModel, Report> {
    let root_label = self.label_of(&parsed_root);
    let mut tree = TreeModel::new(root_label);
    // depth-first, keeping child insertion order
    let mut stack: Vec<(NodeId, ParsedNode)> = vec![(tree.root(), parsed_root)];
    while let Some((id, parsed)) = stack.pop() {
      for child in parsed.children.into_iter().rev() {
        let label = self.label_of(&child);
        let child_id = tree.add_child(id, label, child.edge_length)?;
        stack.push((child_id, child));
      }
    }
    Ok(tree)
  }

  fn label_of(&mut self, node: &ParsedNode) -> String {
    node.label.clone().unwrap_or_else(|| {
      let label = format!("in-{}", self.n_unlabelled);
      self.n_unlabelled += 1;
      label
    })
  }

  fn parse_subtree(&mut self) -> Result<ParsedNode, Report> {
    self.skip_whitespace();
    let mut children = vec![];
    if self.peek() == Some(b'(') {
      self.pos += 1;
      loop {
        children.push(self.parse_subtree()?);
        self.skip_whitespace();
        match self.peek() {
          Some(b',') => {
            self.pos += 1;
          }
          Some(b')') => {
            self.pos += 1;
            break;
          }
          other => {
            return Err(
              PairfamError::InputMalformed(format!(
                "expected ',' or ')' at position {} in newick string, found {:?}",
                self.pos,
                other.map(char::from)
              ))
              .into(),
            );
          }
        }
      }
    }
    let label = self.parse_label();
    let edge_length = self.parse_edge_length()?;
    Ok(ParsedNode {
      label,
      edge_length,
      children,
    })
  }

  fn parse_label(&mut self) -> Option<String> {
    self.skip_whitespace();
    let start = self.pos;
    while let Some(chr) = self.peek() {
      if matches!(chr, b'(' | b')' | b',' | b':' | b';') || chr.is_ascii_whitespace() {
        break;
      }
      self.pos += 1;
    }
    if self.pos == start {
      None
    } else {
      Some(String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned())
    }
  }

  fn parse_edge_length(&mut self) -> Result<f64, Report> {
    self.skip_whitespace();
    if self.peek() != Some(b':') {
      return Ok(0.0);
    }
    self.pos += 1;
    self.skip_whitespace();
    let start = self.pos;
    while let Some(chr) = self.peek() {
      if matches!(chr, b'+' | b'-' | b'.' | b'e' | b'E') || chr.is_ascii_digit() {
        self.pos += 1;
      } else {
        break;
      }
    }
    let text = std::str::from_utf8(&self.bytes[start..self.pos]).expect("ascii slice");
    let length: f64 = text
      .parse()
      .map_err(|_| PairfamError::InputMalformed(format!("invalid edge length '{text}' in newick string")))?;
    if length < 0.0 {
      return Err(PairfamError::NumericDomain(format!("negative edge length {length} in newick string")).into());
    }
    Ok(length)
  }

  fn peek(&self) -> Option<u8> {
    self.bytes.get(self.pos).copied()
  }

  fn skip_whitespace(&mut self) {
    while self.peek().is_some_and(|chr| chr.is_ascii_whitespace()) {
      self.pos += 1;
    }
  }
}
