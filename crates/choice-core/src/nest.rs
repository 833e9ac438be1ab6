//! Validated nesting structure for nested logit.
//!
//! The tree is stored as an arena: nodes refer to their parent and children by
//! index, node 0 is the root, and traversal orders are computed once at
//! construction.

use std::collections::BTreeSet;

use contracts::{ModelSettings, NestChild, NestSpec};
use tracing::warn;

use crate::error::{Result, SimulateError};

#[derive(Debug, Clone, PartialEq)]
pub struct NestNode {
    pub name: String,
    /// Nest coefficient; leaves carry their parent's.
    pub coefficient: f64,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    /// Root is level 0.
    pub level: usize,
    /// Product of enclosing nest coefficients below the root.
    pub product_of_coefficients: f64,
    /// Spec alternative index for leaves.
    pub alternative: Option<usize>,
}

impl NestNode {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NestTree {
    nodes: Vec<NestNode>,
    post_order: Vec<usize>,
    pre_order: Vec<usize>,
    leaves: Vec<usize>,
    alternatives: Vec<String>,
}

impl NestTree {
    pub const ROOT: usize = 0;

    /// Build a tree from `spec`, checked against the model's alternative columns.
    ///
    /// Alternatives the tree does not mention are kept but can never be
    /// chosen under nested logit.
    pub fn new(spec: &NestSpec, alternatives: &[String]) -> Result<Self> {
        let mut tree = Self {
            nodes: Vec::with_capacity(spec.node_count()),
            post_order: Vec::new(),
            pre_order: Vec::new(),
            leaves: Vec::new(),
            alternatives: alternatives.to_vec(),
        };
        let mut names = BTreeSet::new();
        check_coefficient(&spec.name, spec.coefficient)?;
        names.insert(spec.name.clone());
        tree.nodes.push(NestNode {
            name: spec.name.clone(),
            coefficient: spec.coefficient,
            parent: None,
            children: Vec::new(),
            level: 0,
            product_of_coefficients: 1.0,
            alternative: None,
        });
        tree.add_children(Self::ROOT, spec, &mut names)?;

        tree.pre_order = Vec::with_capacity(tree.nodes.len());
        tree.post_order = Vec::with_capacity(tree.nodes.len());
        tree.walk(Self::ROOT);
        tree.leaves = tree
            .pre_order
            .iter()
            .copied()
            .filter(|idx| tree.nodes[*idx].is_leaf())
            .collect();

        let unused: Vec<&str> = alternatives
            .iter()
            .filter(|alternative| !names.contains(alternative.as_str()))
            .map(String::as_str)
            .collect();
        if !unused.is_empty() {
            warn!(nest = %spec.name, alternatives = ?unused, "alternatives missing from nest tree");
        }
        Ok(tree)
    }

    /// Tree for nested-logit settings, `None` for multinomial ones.
    pub fn from_settings(settings: &ModelSettings, alternatives: &[String]) -> Result<Option<Self>> {
        let spec = settings
            .nest_spec()
            .map_err(|err| SimulateError::invalid_nest(err.to_string()))?;
        spec.map(|spec| Self::new(spec, alternatives)).transpose()
    }

    fn add_children(
        &mut self,
        parent: usize,
        spec: &NestSpec,
        names: &mut BTreeSet<String>,
    ) -> Result<()> {
        if spec.alternatives.is_empty() {
            return Err(SimulateError::invalid_nest(format!(
                "nest `{}` has no alternatives",
                spec.name
            )));
        }
        let level = self.nodes[parent].level + 1;
        let inherited = if parent == Self::ROOT {
            1.0
        } else {
            self.nodes[parent].product_of_coefficients
        };
        for child in &spec.alternatives {
            let name = match child {
                NestChild::Leaf(name) => name,
                NestChild::Nest(nest) => &nest.name,
            };
            if !names.insert(name.clone()) {
                return Err(SimulateError::invalid_nest(format!(
                    "node name `{name}` appears more than once"
                )));
            }
            let idx = self.nodes.len();
            match child {
                NestChild::Leaf(name) => {
                    let alternative = self
                        .alternatives
                        .iter()
                        .position(|alternative| alternative == name)
                        .ok_or_else(|| {
                            SimulateError::invalid_nest(format!(
                                "leaf `{name}` is not a spec alternative"
                            ))
                        })?;
                    self.nodes.push(NestNode {
                        name: name.clone(),
                        coefficient: spec.coefficient,
                        parent: Some(parent),
                        children: Vec::new(),
                        level,
                        product_of_coefficients: inherited,
                        alternative: Some(alternative),
                    });
                    self.nodes[parent].children.push(idx);
                }
                NestChild::Nest(nest) => {
                    check_coefficient(&nest.name, nest.coefficient)?;
                    self.nodes.push(NestNode {
                        name: nest.name.clone(),
                        coefficient: nest.coefficient,
                        parent: Some(parent),
                        children: Vec::new(),
                        level,
                        product_of_coefficients: inherited * nest.coefficient,
                        alternative: None,
                    });
                    self.nodes[parent].children.push(idx);
                    self.add_children(idx, nest, names)?;
                }
            }
        }
        Ok(())
    }

    fn walk(&mut self, idx: usize) {
        self.pre_order.push(idx);
        for pos in 0..self.nodes[idx].children.len() {
            let child = self.nodes[idx].children[pos];
            self.walk(child);
        }
        self.post_order.push(idx);
    }

    pub fn nodes(&self) -> &[NestNode] {
        &self.nodes
    }

    pub fn node(&self, idx: usize) -> &NestNode {
        &self.nodes[idx]
    }

    pub fn root(&self) -> &NestNode {
        &self.nodes[Self::ROOT]
    }

    /// Nodes including leaves and the root.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Children before parents.
    pub fn post_order(&self) -> &[usize] {
        &self.post_order
    }

    pub fn pre_order(&self) -> &[usize] {
        &self.pre_order
    }

    /// Leaves in pre-order.
    pub fn leaves(&self) -> &[usize] {
        &self.leaves
    }

    /// Non-leaf nodes in pre-order, root first.
    pub fn nests(&self) -> impl Iterator<Item = usize> + '_ {
        self.pre_order
            .iter()
            .copied()
            .filter(|idx| !self.nodes[*idx].is_leaf())
    }

    pub fn alternatives(&self) -> &[String] {
        &self.alternatives
    }

    /// `idx` and its ancestors, stopping before the root.
    pub fn path_to_root(&self, idx: usize) -> impl Iterator<Item = usize> + '_ {
        std::iter::successors(Some(idx), |current| self.nodes[*current].parent)
            .take_while(|current| *current != Self::ROOT)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.nodes.iter().position(|node| node.name == name)
    }
}

fn check_coefficient(name: &str, coefficient: f64) -> Result<()> {
    if coefficient > 0.0 && coefficient <= 1.0 {
        Ok(())
    } else {
        Err(SimulateError::invalid_nest(format!(
            "nest `{name}` coefficient {coefficient} outside (0, 1]"
        )))
    }
}
