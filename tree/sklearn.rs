/*!
This module reads trees in the flat array layout scikit-learn uses for its `tree_` attribute. Node `i` is described by the `i`th entry of each array, and leaves are marked with sentinel values.
*/

use crate::{
	BranchNode, EnsembleKind, Error, Forest, LeafNode, MalformedTreeReason, Node, Result, Tree,
};
use num_traits::ToPrimitive;

/// Marks a missing child in `children_left` and `children_right`.
const TREE_LEAF: i64 = -1;
/// Marks a leaf in `threshold`.
const TREE_UNDEFINED: f64 = -2.0;

/// A model exported from a training environment. This is the on-disk format read by the command line tool.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ModelFile {
	pub kind: EnsembleKind,
	/// The number of classes. If it is omitted, it is the length of the first leaf's value.
	#[serde(default)]
	pub n_classes: Option<usize>,
	pub trees: Vec<SklearnTree>,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SklearnTree {
	pub children_left: Vec<i64>,
	pub children_right: Vec<i64>,
	pub feature: Vec<i64>,
	pub threshold: Vec<f64>,
	pub value: Vec<SklearnValue>,
}

/// The class counts at a node, either as a flat vector or nested under a single output the way scikit-learn stores them.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum SklearnValue {
	Flat(Vec<f64>),
	Outputs(Vec<Vec<f64>>),
}

impl ModelFile {
	pub fn from_json(json: &str) -> serde_json::Result<ModelFile> {
		serde_json::from_str(json)
	}

	/// Convert every tree and validate them as a forest.
	pub fn forest(&self) -> Result<Forest> {
		let n_classes = match self.n_classes {
			Some(n_classes) => n_classes,
			None => self
				.trees
				.first()
				.and_then(SklearnTree::first_leaf_len)
				.unwrap_or(0),
		};
		let trees = self
			.trees
			.iter()
			.enumerate()
			.map(|(tree_index, tree)| tree.to_tree(tree_index))
			.collect::<Result<Vec<_>>>()?;
		Forest::new(trees, n_classes)
	}
}

impl SklearnTree {
	/// Convert the flat arrays to a `Tree`. A node is a leaf when its threshold is the undefined sentinel.
	pub fn to_tree(&self, tree_index: usize) -> Result<Tree> {
		let malformed = |node_index: usize, reason: MalformedTreeReason| Error::MalformedTree {
			tree_index,
			node_index,
			reason,
		};
		let n_nodes = self.threshold.len();
		if self.children_left.len() != n_nodes
			|| self.children_right.len() != n_nodes
			|| self.feature.len() != n_nodes
			|| self.value.len() != n_nodes
		{
			return Err(malformed(0, MalformedTreeReason::InconsistentArrays));
		}
		let mut nodes = Vec::with_capacity(n_nodes);
		for node_index in 0..n_nodes {
			let threshold = self.threshold[node_index];
			#[allow(clippy::float_cmp)]
			let is_leaf = threshold == TREE_UNDEFINED;
			let node = if is_leaf {
				let counts = self.value[node_index]
					.counts()
					.map_err(|reason| malformed(node_index, reason))?;
				Node::Leaf(LeafNode { counts })
			} else {
				let feature_index = self.feature[node_index];
				let feature_index = feature_index.to_usize().ok_or_else(|| {
					malformed(
						node_index,
						MalformedTreeReason::NegativeFeature { feature_index },
					)
				})?;
				let to_child_index = |child_index: i64| {
					if child_index == TREE_LEAF {
						return Err(malformed(node_index, MalformedTreeReason::ChildlessBranch));
					}
					child_index.to_usize().ok_or_else(|| {
						malformed(node_index, MalformedTreeReason::ChildlessBranch)
					})
				};
				Node::Branch(BranchNode {
					feature_index,
					threshold: threshold_to_f32(threshold),
					left_child_index: to_child_index(self.children_left[node_index])?,
					right_child_index: to_child_index(self.children_right[node_index])?,
				})
			};
			nodes.push(node);
		}
		Ok(Tree { nodes })
	}

	fn first_leaf_len(&self) -> Option<usize> {
		#[allow(clippy::float_cmp)]
		let leaf_index = self
			.threshold
			.iter()
			.position(|threshold| *threshold == TREE_UNDEFINED)?;
		self.value
			.get(leaf_index)
			.and_then(|value| value.counts().ok())
			.map(|counts| counts.len())
	}
}

impl SklearnValue {
	fn counts(&self) -> Result<Vec<f32>, MalformedTreeReason> {
		let counts = match self {
			SklearnValue::Flat(counts) => counts,
			SklearnValue::Outputs(outputs) => match outputs.as_slice() {
				[counts] => counts,
				_ => {
					return Err(MalformedTreeReason::MultiOutput {
						n_outputs: outputs.len(),
					})
				}
			},
		};
		Ok(counts.iter().map(|count| *count as f32).collect())
	}
}

/// Training environments compare `float32` features against `float64` thresholds. Rounding the threshold down to the largest `f32` that does not exceed it sends every `f32` feature value the same way.
fn threshold_to_f32(threshold: f64) -> f32 {
	let rounded = threshold as f32;
	if f64::from(rounded) > threshold {
		next_down(rounded)
	} else {
		rounded
	}
}

fn next_down(value: f32) -> f32 {
	let bits = value.to_bits();
	if value == 0.0 {
		// The largest negative subnormal.
		f32::from_bits(0x8000_0001)
	} else if value > 0.0 {
		f32::from_bits(bits - 1)
	} else {
		f32::from_bits(bits + 1)
	}
}

#[test]
fn test_model_file() {
	let json = r#"{
		"kind": "random_forest",
		"trees": [{
			"children_left": [1, -1, -1],
			"children_right": [2, -1, -1],
			"feature": [0, -2, -2],
			"threshold": [5.0, -2.0, -2.0],
			"value": [[[10.0, 10.0]], [[10.0, 0.0]], [[0.0, 10.0]]]
		}]
	}"#;
	let model = ModelFile::from_json(json).unwrap();
	assert_eq!(model.kind, EnsembleKind::RandomForest);
	let forest = model.forest().unwrap();
	assert_eq!(forest.n_classes(), 2);
	assert_eq!(forest.n_features(), 1);
	assert_eq!(
		forest.trees()[0],
		crate::stump(5.0, vec![10.0, 0.0], vec![0.0, 10.0])
	);
}

#[test]
fn test_flat_values_and_declared_classes() {
	let json = r#"{
		"kind": "adaboost",
		"n_classes": 3,
		"trees": [{
			"children_left": [-1],
			"children_right": [-1],
			"feature": [-2],
			"threshold": [-2.0],
			"value": [[0.25, 0.5, 0.25]]
		}]
	}"#;
	let forest = ModelFile::from_json(json).unwrap().forest().unwrap();
	assert_eq!(forest.trees()[0], Tree::leaf(vec![0.25, 0.5, 0.25]));
}

#[test]
fn test_malformed_arrays() {
	let tree = SklearnTree {
		children_left: vec![1, -1],
		children_right: vec![-1, -1],
		feature: vec![0, -2],
		threshold: vec![1.5, -2.0],
		value: vec![
			SklearnValue::Flat(vec![1.0, 1.0]),
			SklearnValue::Flat(vec![1.0, 0.0]),
		],
	};
	assert_eq!(
		tree.to_tree(2),
		Err(Error::MalformedTree {
			tree_index: 2,
			node_index: 0,
			reason: MalformedTreeReason::ChildlessBranch,
		})
	);
	let tree = SklearnTree {
		children_left: vec![-1],
		children_right: vec![-1],
		feature: vec![-2],
		threshold: vec![-2.0],
		value: vec![SklearnValue::Outputs(vec![vec![1.0], vec![2.0]])],
	};
	assert_eq!(
		tree.to_tree(0),
		Err(Error::MalformedTree {
			tree_index: 0,
			node_index: 0,
			reason: MalformedTreeReason::MultiOutput { n_outputs: 2 },
		})
	);
	let tree = SklearnTree {
		children_left: vec![-1],
		children_right: vec![],
		feature: vec![-2],
		threshold: vec![-2.0],
		value: vec![SklearnValue::Flat(vec![1.0])],
	};
	assert_eq!(
		tree.to_tree(0),
		Err(Error::MalformedTree {
			tree_index: 0,
			node_index: 0,
			reason: MalformedTreeReason::InconsistentArrays,
		})
	);
}

#[test]
fn test_empty_model_file() {
	let json = r#"{ "kind": "adaboost", "trees": [] }"#;
	let model = ModelFile::from_json(json).unwrap();
	assert_eq!(model.forest(), Err(Error::EmptyEnsemble));
}

#[test]
fn test_threshold_rounds_down() {
	assert_eq!(threshold_to_f32(0.5), 0.5);
	assert_eq!(threshold_to_f32(-2.5), -2.5);
	// Halfway between two floats, where rounding to nearest would round up.
	let below = f32::from_bits(1.0f32.to_bits() + 1);
	let above = f32::from_bits(1.0f32.to_bits() + 2);
	let midpoint = (f64::from(below) + f64::from(above)) / 2.0;
	assert_eq!(midpoint as f32, above);
	assert_eq!(threshold_to_f32(midpoint), below);
	let threshold = threshold_to_f32(0.1);
	assert!(f64::from(threshold) <= 0.1);
	assert_eq!(threshold, next_down(0.1f32));
	assert_eq!(threshold_to_f32(-0.1), -0.1f32);
}
