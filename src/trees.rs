//! Tree shapes consumed for pool-context lookups.
//!
//! Two on-disk shapes exist: hierarchical trees (genre/scene — recursive
//! `children` with `is_leaf` markers) and the flat collection tree
//! (`categories` → `leaves`). `walk_leaves` unifies them so the pool
//! analyzer never branches on shape.

use serde::{Deserialize, Serialize};

/// Recursive node used in genre/scene trees.
/// Depth 0 = lineage, deeper levels narrow down to leaves.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TreeNode {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub track_ids: Vec<i64>,
    #[serde(default)]
    pub track_count: usize,
    #[serde(default)]
    pub is_leaf: bool,
    #[serde(default)]
    pub children: Vec<TreeNode>,
}

/// Root structure for genre and scene trees.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HierarchicalTree {
    pub id: String,
    #[serde(default)]
    pub tree_type: Option<String>,
    #[serde(default)]
    pub lineages: Vec<TreeNode>,
}

/// Collection tree leaf — a curated playlist-like cluster.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectionLeaf {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub track_ids: Vec<i64>,
    #[serde(default)]
    pub genre_context: Option<String>,
    #[serde(default)]
    pub scene_context: Option<String>,
}

/// Top-level grouping of leaves in a collection tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectionCategory {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub leaves: Vec<CollectionLeaf>,
}

/// Root structure for the collection tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectionTree {
    pub id: String,
    #[serde(default)]
    pub categories: Vec<CollectionCategory>,
}

/// Either tree shape, tagged by which family it belongs to.
#[derive(Debug, Clone)]
pub enum Tree {
    Hierarchical(HierarchicalTree),
    Collection(CollectionTree),
}

/// The three tree families the engine can consult.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TreeKind {
    Genre,
    Scene,
    Collection,
}

impl TreeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TreeKind::Genre => "genre",
            TreeKind::Scene => "scene",
            TreeKind::Collection => "collection",
        }
    }
}

/// A leaf as seen by the pool analyzer, shape-independent.
#[derive(Debug, Clone)]
pub struct LeafView<'a> {
    pub id: &'a str,
    pub title: &'a str,
    pub track_ids: &'a [i64],
    /// Top-level lineage title (hierarchical trees only).
    pub lineage: Option<&'a str>,
    /// Owning category title (collection tree only).
    pub category: Option<&'a str>,
    pub genre_context: Option<&'a str>,
    pub scene_context: Option<&'a str>,
}

/// Depth-first over hierarchical leaves, flat over collection leaves.
pub fn walk_leaves(tree: &Tree) -> Vec<LeafView<'_>> {
    let mut leaves = Vec::new();
    match tree {
        Tree::Hierarchical(t) => {
            for lineage in &t.lineages {
                collect_leaves(lineage, &lineage.title, &mut leaves);
            }
        }
        Tree::Collection(t) => {
            for cat in &t.categories {
                for leaf in &cat.leaves {
                    leaves.push(LeafView {
                        id: &leaf.id,
                        title: &leaf.title,
                        track_ids: &leaf.track_ids,
                        lineage: None,
                        category: Some(&cat.title),
                        genre_context: leaf.genre_context.as_deref(),
                        scene_context: leaf.scene_context.as_deref(),
                    });
                }
            }
        }
    }
    leaves
}

fn collect_leaves<'a>(node: &'a TreeNode, lineage: &'a str, out: &mut Vec<LeafView<'a>>) {
    if node.is_leaf {
        out.push(LeafView {
            id: &node.id,
            title: &node.title,
            track_ids: &node.track_ids,
            lineage: Some(lineage),
            category: None,
            genre_context: None,
            scene_context: None,
        });
    }
    for child in &node.children {
        collect_leaves(child, lineage, out);
    }
}

/// Find a node by id anywhere in a hierarchical tree.
pub fn find_node<'a>(tree: &'a HierarchicalTree, node_id: &str) -> Option<&'a TreeNode> {
    for lineage in &tree.lineages {
        if let Some(found) = find_in(lineage, node_id) {
            return Some(found);
        }
    }
    None
}

fn find_in<'a>(node: &'a TreeNode, node_id: &str) -> Option<&'a TreeNode> {
    if node.id == node_id {
        return Some(node);
    }
    node.children.iter().find_map(|c| find_in(c, node_id))
}
