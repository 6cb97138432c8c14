//! Trees rebuilt during replay
//!
//! Two trees come out of a trace: the parse tree, implied by rule entries, rule
//! exits and consumed tokens, and the AST the traced parser built explicitly
//! through tree-construction events.

use crate::types::{DebuggerError, ExceptionInfo, NodeId, Result, Token};
use std::collections::HashMap;
use std::fmt::Write;

/// Label of a parse tree node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseLabel {
    Rule(String),
    Token(Token),
    Error(ExceptionInfo),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseNode {
    pub label: ParseLabel,
    pub children: Vec<usize>,
}

/// Parse tree of the traced run
///
/// Nodes live in an arena; `open` holds the rules entered but not yet exited.
#[derive(Debug, Clone, Default)]
pub struct ParseTree {
    nodes: Vec<ParseNode>,
    roots: Vec<usize>,
    open: Vec<usize>,
}

impl ParseTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.nodes.clear();
        self.roots.clear();
        self.open.clear();
    }

    pub fn enter_rule(&mut self, name: &str) {
        let index = self.attach(ParseLabel::Rule(name.to_string()));
        self.open.push(index);
    }

    /// Close the innermost rule, which must be `name`
    pub fn exit_rule(&mut self, name: &str) -> Result<()> {
        let innermost = self.open.last().and_then(|&index| match &self.nodes[index].label {
            ParseLabel::Rule(rule) => Some(rule.clone()),
            _ => None,
        });
        if innermost.as_deref() != Some(name) {
            return Err(DebuggerError::RuleMismatch {
                expected: innermost,
                found: name.to_string(),
            });
        }
        self.open.pop();
        Ok(())
    }

    pub fn add_token(&mut self, token: &Token) {
        self.attach(ParseLabel::Token(token.clone()));
    }

    pub fn add_error(&mut self, exception: &ExceptionInfo) {
        self.attach(ParseLabel::Error(exception.clone()));
    }

    fn attach(&mut self, label: ParseLabel) -> usize {
        let index = self.nodes.len();
        self.nodes.push(ParseNode { label, children: Vec::new() });
        match self.open.last() {
            Some(&parent) => self.nodes[parent].children.push(index),
            None => self.roots.push(index),
        }
        index
    }

    /// Names of the rules currently entered, outermost first
    pub fn rule_stack(&self) -> Vec<&str> {
        self.open
            .iter()
            .filter_map(|&index| match &self.nodes[index].label {
                ParseLabel::Rule(name) => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn roots(&self) -> &[usize] {
        &self.roots
    }

    pub fn node(&self, index: usize) -> Option<&ParseNode> {
        self.nodes.get(index)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Indented rendering, one node per line
    pub fn render(&self) -> String {
        let mut out = String::new();
        for &root in &self.roots {
            self.render_node(root, 0, &mut out);
        }
        out
    }

    fn render_node(&self, index: usize, depth: usize, out: &mut String) {
        let node = &self.nodes[index];
        let label = match &node.label {
            ParseLabel::Rule(name) => name.clone(),
            ParseLabel::Token(token) => format!("{:?}", token.text),
            ParseLabel::Error(exception) => format!("<{}>", exception),
        };
        let _ = writeln!(out, "{}{}", "  ".repeat(depth), label);
        for &child in &node.children {
            self.render_node(child, depth + 1, out);
        }
    }
}

/// One node of the rebuilt AST
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AstNode {
    /// Token text, imaginary text, or `nil`
    pub text: String,
    pub token_index: Option<i64>,
    pub children: Vec<NodeId>,
    /// Token range covered by the node, once reported
    pub boundaries: Option<(i64, i64)>,
    pub is_nil: bool,
}

/// AST rebuilt from tree-construction events
#[derive(Debug, Clone, Default)]
pub struct AstBuilder {
    nodes: HashMap<NodeId, AstNode>,
    order: Vec<NodeId>,
}

impl AstBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.nodes.clear();
        self.order.clear();
    }

    pub fn nil_node(&mut self, id: NodeId) {
        self.insert(id, AstNode {
            text: "nil".to_string(),
            token_index: None,
            children: Vec::new(),
            boundaries: None,
            is_nil: true,
        });
    }

    pub fn create_node(&mut self, id: NodeId, text: impl Into<String>, token_index: Option<i64>) {
        self.insert(id, AstNode {
            text: text.into(),
            token_index,
            children: Vec::new(),
            boundaries: None,
            is_nil: false,
        });
    }

    fn insert(&mut self, id: NodeId, node: AstNode) {
        if self.nodes.insert(id, node).is_none() {
            self.order.push(id);
        }
    }

    /// Make `new_root` the parent of `old_root`; a nil old root hands over its children
    pub fn become_root(&mut self, new_root: NodeId, old_root: NodeId) -> Result<()> {
        self.require(new_root)?;
        let old = self.nodes.get(&old_root).ok_or(DebuggerError::UnknownNode(old_root))?;
        let adopted = if old.is_nil { old.children.clone() } else { vec![old_root] };
        self.adopt(new_root, adopted)
    }

    /// Append `child` to `root`; a nil child hands over its children
    pub fn add_child(&mut self, root: NodeId, child: NodeId) -> Result<()> {
        self.require(root)?;
        let node = self.nodes.get(&child).ok_or(DebuggerError::UnknownNode(child))?;
        let adopted = if node.is_nil { node.children.clone() } else { vec![child] };
        self.adopt(root, adopted)
    }

    pub fn set_token_boundaries(&mut self, id: NodeId, start: i64, stop: i64) -> Result<()> {
        let node = self.nodes.get_mut(&id).ok_or(DebuggerError::UnknownNode(id))?;
        node.boundaries = Some((start, stop));
        Ok(())
    }

    fn adopt(&mut self, parent: NodeId, children: Vec<NodeId>) -> Result<()> {
        let node = self.nodes.get_mut(&parent).ok_or(DebuggerError::UnknownNode(parent))?;
        node.children.extend(children);
        Ok(())
    }

    fn require(&self, id: NodeId) -> Result<()> {
        if self.nodes.contains_key(&id) {
            Ok(())
        } else {
            Err(DebuggerError::UnknownNode(id))
        }
    }

    pub fn node(&self, id: NodeId) -> Option<&AstNode> {
        self.nodes.get(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes no other node adopted, in creation order
    pub fn roots(&self) -> Vec<NodeId> {
        let adopted: std::collections::HashSet<NodeId> =
            self.nodes.values().flat_map(|node| node.children.iter().copied()).collect();
        self.order.iter().copied().filter(|id| !adopted.contains(id)).collect()
    }

    /// LISP-style rendering: `(root child child)`
    pub fn to_string_tree(&self, id: NodeId) -> String {
        let Some(node) = self.nodes.get(&id) else {
            return String::new();
        };
        if node.children.is_empty() {
            return node.text.clone();
        }
        let children: Vec<String> = node.children.iter().map(|&child| self.to_string_tree(child)).collect();
        if node.is_nil {
            children.join(" ")
        } else {
            format!("({} {})", node.text, children.join(" "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tree_nesting() {
        let mut tree = ParseTree::new();
        tree.enter_rule("prog");
        tree.enter_rule("expr");
        tree.add_token(&Token::new(0, 4, "1"));
        assert_eq!(tree.rule_stack(), vec!["prog", "expr"]);
        tree.exit_rule("expr").unwrap();
        tree.add_token(&Token::new(1, 5, ";"));
        tree.exit_rule("prog").unwrap();

        assert!(tree.rule_stack().is_empty());
        assert_eq!(tree.render(), "prog\n  expr\n    \"1\"\n  \";\"\n");
    }

    #[test]
    fn test_parse_tree_rejects_unbalanced_exit() {
        let mut tree = ParseTree::new();
        tree.enter_rule("prog");
        let err = tree.exit_rule("expr").unwrap_err();
        assert!(matches!(err, DebuggerError::RuleMismatch { ref found, .. } if found == "expr"));
        assert_eq!(tree.rule_stack(), vec!["prog"]);

        let mut empty = ParseTree::new();
        assert!(empty.exit_rule("prog").is_err());
    }

    #[test]
    fn test_ast_construction() {
        let mut ast = AstBuilder::new();
        ast.nil_node(1);
        ast.create_node(2, "+", Some(1));
        ast.create_node(3, "1", Some(0));
        ast.create_node(4, "2", Some(2));
        ast.add_child(1, 3).unwrap();
        ast.become_root(2, 1).unwrap();
        ast.add_child(2, 4).unwrap();
        ast.set_token_boundaries(2, 0, 2).unwrap();

        assert_eq!(ast.to_string_tree(2), "(+ 1 2)");
        assert_eq!(ast.node(2).unwrap().boundaries, Some((0, 2)));
        assert_eq!(ast.roots(), vec![1, 2]);
    }

    #[test]
    fn test_ast_unknown_node() {
        let mut ast = AstBuilder::new();
        ast.nil_node(1);
        assert!(matches!(ast.add_child(1, 9), Err(DebuggerError::UnknownNode(9))));
        assert!(matches!(ast.become_root(8, 1), Err(DebuggerError::UnknownNode(8))));
        assert!(matches!(ast.set_token_boundaries(7, 0, 0), Err(DebuggerError::UnknownNode(7))));
    }
}
