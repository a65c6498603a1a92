//! Scale hierarchy with precomputed ancestry.
//!
//! Scales form a tree per context (a global scale with subscales). The
//! hierarchy is built once from (scale, parent) rows and answers ancestor
//! queries in O(depth) by walking parent indices in an arena.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::CatError;
use crate::ScaleId;

/// One (scale, parent) row as delivered by the scale administration layer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScaleEdge {
    pub scale: ScaleId,
    /// `None` marks a root scale.
    pub parent: Option<ScaleId>,
}

#[derive(Debug, Clone)]
struct Node {
    id: ScaleId,
    parent: Option<usize>,
}

/// Arena-backed scale tree for one context.
#[derive(Debug, Clone, Default)]
pub struct ScaleHierarchy {
    nodes: Vec<Node>,
    index: HashMap<ScaleId, usize>,
}

impl ScaleHierarchy {
    /// Build the hierarchy from edges. Fails on duplicate scales, parents
    /// that are not themselves listed, or cycles.
    pub fn from_edges(edges: &[ScaleEdge]) -> Result<Self, CatError> {
        let mut index = HashMap::with_capacity(edges.len());
        for (i, e) in edges.iter().enumerate() {
            if index.insert(e.scale, i).is_some() {
                return Err(CatError::DataIntegrity(format!(
                    "duplicate scale id {}",
                    e.scale
                )));
            }
        }

        let mut nodes = Vec::with_capacity(edges.len());
        for e in edges {
            let parent = match e.parent {
                None => None,
                Some(p) => Some(*index.get(&p).ok_or_else(|| {
                    CatError::DataIntegrity(format!(
                        "scale {} references unknown parent {}",
                        e.scale, p
                    ))
                })?),
            };
            nodes.push(Node {
                id: e.scale,
                parent,
            });
        }

        let hierarchy = Self { nodes, index };
        hierarchy.check_acyclic()?;
        Ok(hierarchy)
    }

    fn check_acyclic(&self) -> Result<(), CatError> {
        for start in 0..self.nodes.len() {
            let mut steps = 0usize;
            let mut current = self.nodes[start].parent;
            while let Some(i) = current {
                steps += 1;
                if steps > self.nodes.len() {
                    return Err(CatError::DataIntegrity(format!(
                        "cycle in scale hierarchy at scale {}",
                        self.nodes[start].id
                    )));
                }
                current = self.nodes[i].parent;
            }
        }
        Ok(())
    }

    pub fn contains(&self, scale: ScaleId) -> bool {
        self.index.contains_key(&scale)
    }

    /// Proper ancestors of `scale`, nearest first.
    pub fn ancestors(&self, scale: ScaleId) -> Result<Vec<ScaleId>, CatError> {
        let &start = self
            .index
            .get(&scale)
            .ok_or_else(|| CatError::DataIntegrity(format!("unknown scale {scale}")))?;
        let mut out = Vec::new();
        let mut current = self.nodes[start].parent;
        while let Some(i) = current {
            out.push(self.nodes[i].id);
            current = self.nodes[i].parent;
        }
        Ok(out)
    }

    /// `scale` followed by its proper ancestors, nearest first.
    pub fn self_and_ancestors(&self, scale: ScaleId) -> Result<Vec<ScaleId>, CatError> {
        let mut out = vec![scale];
        out.extend(self.ancestors(scale)?);
        Ok(out)
    }

    /// True when `ancestor` is a proper ancestor of `scale`.
    pub fn is_ancestor(&self, ancestor: ScaleId, scale: ScaleId) -> bool {
        match self.ancestors(scale) {
            Ok(a) => a.contains(&ancestor),
            Err(_) => false,
        }
    }

    /// `scale` and all of its descendants, in id order.
    pub fn subtree(&self, scale: ScaleId) -> Result<Vec<ScaleId>, CatError> {
        if !self.contains(scale) {
            return Err(CatError::DataIntegrity(format!("unknown scale {scale}")));
        }
        let mut out: Vec<ScaleId> = self
            .nodes
            .iter()
            .map(|n| n.id)
            .filter(|&id| id == scale || self.is_ancestor(scale, id))
            .collect();
        out.sort_unstable();
        Ok(out)
    }

    /// All scale ids, in insertion order.
    pub fn scale_ids(&self) -> impl Iterator<Item = ScaleId> + '_ {
        self.nodes.iter().map(|n| n.id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
