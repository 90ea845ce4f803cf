/*!
This crate compiles trained ensembles of decision trees into stand-alone decision procedures and combines their outputs into a single class prediction. Random forests are combined by majority vote and AdaBoost ensembles by SAMME weighted fusion of log probabilities.

The data flows from a [`Forest`] through [`compile`] into one [`DecisionProcedure`] per tree, and an [`Ensemble`] evaluates those procedures on a feature vector and reduces their outputs with its [`Aggregation`].
*/

#![allow(clippy::tabs_in_doc_comments)]

mod compile;
mod ensemble;
mod error;
mod normalize;
mod predict;
mod sklearn;
mod validate;

pub use self::{
	compile::{argmax, compile, compile_forest, CompileMode, DecisionProcedure, Statement, Terminal},
	ensemble::{
		classify, samme_contribution, Aggregation, Ensemble, EnsembleDescription, EnsembleKind,
		ParseEnsembleKindError, SammeOptions, SAMME_EPSILON,
	},
	error::{Error, MalformedTreeReason, Result},
	normalize::normalize,
	sklearn::{ModelFile, SklearnTree, SklearnValue},
};

/// Trees are stored as a `Vec` of `Node`s. Each branch in the tree has two indexes into the `Vec`, one for each of its children. The root is always the node at index 0.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Tree {
	pub nodes: Vec<Node>,
}

/// A node is either a branch or a leaf.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Node {
	Branch(BranchNode),
	Leaf(LeafNode),
}

/// A `BranchNode` takes the value of a single feature and compares it with `threshold`. If the value is <= `threshold`, the example is sent to the left child, and if it is > `threshold`, it is sent to the right child.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BranchNode {
	/// This is the index of the feature to get the value for.
	pub feature_index: usize,
	/// This is the threshold value of the split.
	pub threshold: f32,
	/// This is the index in the tree's node vector for this node's left child.
	pub left_child_index: usize,
	/// This is the index in the tree's node vector for this node's right child.
	pub right_child_index: usize,
}

/// The leaves in a tree hold the number of training examples of each class that were sent to them.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LeafNode {
	/// The class counts, one per class.
	pub counts: Vec<f32>,
}

impl Tree {
	/// Create a tree with a single leaf.
	pub fn leaf(counts: Vec<f32>) -> Tree {
		Tree {
			nodes: vec![Node::Leaf(LeafNode { counts })],
		}
	}

	/// Retrieve the node at `node_index`, or `None` if the index is out of range.
	pub fn node(&self, node_index: usize) -> Option<&Node> {
		self.nodes.get(node_index)
	}

	/// The largest feature index used by any branch, or `None` if the tree is a single leaf.
	pub fn max_feature_index(&self) -> Option<usize> {
		self.nodes
			.iter()
			.filter_map(|node| match node {
				Node::Branch(branch) => Some(branch.feature_index),
				Node::Leaf(_) => None,
			})
			.max()
	}

	/// The number of branches on the longest path from the root to a leaf. Call this on validated trees only.
	pub fn depth(&self) -> usize {
		let mut max_depth = 0;
		let mut stack = vec![(0, 0)];
		while let Some((node_index, depth)) = stack.pop() {
			match self.nodes.get(node_index) {
				Some(Node::Branch(branch)) => {
					stack.push((branch.left_child_index, depth + 1));
					stack.push((branch.right_child_index, depth + 1));
				}
				Some(Node::Leaf(_)) | None => max_depth = max_depth.max(depth),
			}
		}
		max_depth
	}
}

/// A `Forest` is an ordered, non-empty sequence of trees which share the same number of classes and the same feature space.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct Forest {
	trees: Vec<Tree>,
	n_classes: usize,
	n_features: usize,
}

impl Forest {
	/// Create a forest, validating every tree against `n_classes`.
	pub fn new(trees: Vec<Tree>, n_classes: usize) -> Result<Forest> {
		if trees.is_empty() {
			return Err(Error::EmptyEnsemble);
		}
		for (tree_index, tree) in trees.iter().enumerate() {
			validate::validate_tree(tree, tree_index, n_classes)?;
		}
		let n_features = trees
			.iter()
			.filter_map(|tree| tree.max_feature_index())
			.max()
			.map(|feature_index| feature_index + 1)
			.unwrap_or(0);
		Ok(Forest {
			trees,
			n_classes,
			n_features,
		})
	}

	pub fn trees(&self) -> &[Tree] {
		&self.trees
	}

	pub fn n_classes(&self) -> usize {
		self.n_classes
	}

	/// The minimum length a feature vector must have to be evaluated by every tree.
	pub fn n_features(&self) -> usize {
		self.n_features
	}
}

#[cfg(test)]
pub(crate) fn stump(threshold: f32, left: Vec<f32>, right: Vec<f32>) -> Tree {
	stump_on(0, threshold, left, right)
}

#[cfg(test)]
pub(crate) fn stump_on(
	feature_index: usize,
	threshold: f32,
	left: Vec<f32>,
	right: Vec<f32>,
) -> Tree {
	Tree {
		nodes: vec![
			Node::Branch(BranchNode {
				feature_index,
				threshold,
				left_child_index: 1,
				right_child_index: 2,
			}),
			Node::Leaf(LeafNode { counts: left }),
			Node::Leaf(LeafNode { counts: right }),
		],
	}
}

#[test]
fn test_forest_requires_trees() {
	assert_eq!(Forest::new(Vec::new(), 2), Err(Error::EmptyEnsemble));
}

#[test]
fn test_forest_n_features() {
	let trees = vec![
		stump_on(4, 1.0, vec![1.0, 0.0], vec![0.0, 1.0]),
		stump_on(1, 1.0, vec![1.0, 0.0], vec![0.0, 1.0]),
		Tree::leaf(vec![2.0, 1.0]),
	];
	let forest = Forest::new(trees, 2).unwrap();
	assert_eq!(forest.n_features(), 5);
	assert_eq!(forest.trees().len(), 3);
	let forest = Forest::new(vec![Tree::leaf(vec![2.0, 1.0])], 2).unwrap();
	assert_eq!(forest.n_features(), 0);
}

#[test]
fn test_depth() {
	assert_eq!(Tree::leaf(vec![1.0]).depth(), 0);
	let tree = Tree {
		nodes: vec![
			Node::Branch(BranchNode {
				feature_index: 0,
				threshold: 1.0,
				left_child_index: 1,
				right_child_index: 2,
			}),
			Node::Leaf(LeafNode {
				counts: vec![1.0, 0.0],
			}),
			Node::Branch(BranchNode {
				feature_index: 1,
				threshold: 2.0,
				left_child_index: 3,
				right_child_index: 4,
			}),
			Node::Leaf(LeafNode {
				counts: vec![0.0, 1.0],
			}),
			Node::Leaf(LeafNode {
				counts: vec![1.0, 1.0],
			}),
		],
	};
	assert_eq!(tree.depth(), 2);
	assert_eq!(tree.max_feature_index(), Some(1));
}
