use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// These are the ways compiling or evaluating an ensemble can fail. Each of them is a violation of the caller's contract, so none of them is worth retrying.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum Error {
	#[error("tree {tree_index} is malformed at node {node_index}: {reason}")]
	MalformedTree {
		tree_index: usize,
		node_index: usize,
		reason: MalformedTreeReason,
	},
	#[error("feature index {feature_index} is out of range for a feature vector with {n_features} values")]
	DimensionMismatch {
		feature_index: usize,
		n_features: usize,
	},
	#[error("the ensemble has no trees")]
	EmptyEnsemble,
	#[error("the SAMME epsilon {epsilon} must be finite and greater than zero")]
	InvalidEpsilon { epsilon: f32 },
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum MalformedTreeReason {
	#[error("the tree has no nodes")]
	NoNodes,
	#[error("the leaf has no class counts")]
	NoClasses,
	#[error("the child index {child_index} does not refer to a node")]
	MissingChild { child_index: usize },
	#[error("the branch is missing a child")]
	ChildlessBranch,
	#[error("the node is reachable by more than one path")]
	SharedNode,
	#[error("the node is not reachable from the root")]
	Unreachable,
	#[error("the leaf has {len} class counts but the forest has {n_classes} classes")]
	ClassCountMismatch { len: usize, n_classes: usize },
	#[error("the class count {count} is negative or not finite")]
	InvalidCount { count: f32 },
	#[error("the threshold {threshold} is not finite")]
	InvalidThreshold { threshold: f32 },
	#[error("the value at this node has {n_outputs} outputs, but only single output trees are supported")]
	MultiOutput { n_outputs: usize },
	#[error("the node arrays have inconsistent lengths")]
	InconsistentArrays,
	#[error("the feature index {feature_index} is negative")]
	NegativeFeature { feature_index: i64 },
}
