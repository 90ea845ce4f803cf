/*!
This module lowers a [`Tree`](crate::Tree) into a [`DecisionProcedure`], a tree of nested conditionals that an emitter can render into source text for any target language, or that can be evaluated directly.
*/

use crate::{normalize, validate, BranchNode, Forest, LeafNode, Node, Result, Tree};
use std::borrow::Cow;

/// The kind of value a compiled procedure returns from its leaves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CompileMode {
	/// Leaves return the index of the class with the most training examples. Random forests are compiled this way.
	ClassLabel,
	/// Leaves return the normalized class distribution. AdaBoost ensembles are compiled this way.
	ProbabilityVector,
}

/// The compiled form of a single tree. It has no state and can be evaluated any number of times from any number of threads.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DecisionProcedure {
	pub mode: CompileMode,
	pub root: Statement,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Statement {
	/// `if (features[feature_index] <= threshold) { then } else { otherwise }`
	If {
		feature_index: usize,
		threshold: f32,
		then: Box<Statement>,
		otherwise: Box<Statement>,
	},
	Return(Terminal),
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Terminal {
	ClassLabel(usize),
	Probabilities(Vec<f32>),
}

impl DecisionProcedure {
	/// The largest feature index tested by the procedure, or `None` if it is constant.
	pub fn max_feature_index(&self) -> Option<usize> {
		let mut max_feature_index = None;
		let mut stack = vec![&self.root];
		while let Some(statement) = stack.pop() {
			if let Statement::If {
				feature_index,
				then,
				otherwise,
				..
			} = statement
			{
				max_feature_index = max_feature_index.max(Some(*feature_index));
				stack.push(then);
				stack.push(otherwise);
			}
		}
		max_feature_index
	}

	/// Visit every terminal in preorder.
	pub fn terminals(&self) -> Vec<&Terminal> {
		let mut terminals = Vec::new();
		let mut stack = vec![&self.root];
		while let Some(statement) = stack.pop() {
			match statement {
				Statement::If {
					then, otherwise, ..
				} => {
					stack.push(otherwise);
					stack.push(then);
				}
				Statement::Return(terminal) => terminals.push(terminal),
			}
		}
		terminals
	}

	/// Rewrite every terminal so the procedure returns values of `mode`. Labels become one-hot distributions over `n_classes` classes and distributions become their most probable class. Every terminal must fit `n_classes`.
	pub fn into_mode(self, mode: CompileMode, n_classes: usize) -> DecisionProcedure {
		if self.mode == mode {
			return self;
		}
		DecisionProcedure {
			mode,
			root: convert_statement(self.root, mode, n_classes),
		}
	}
}

fn convert_statement(statement: Statement, mode: CompileMode, n_classes: usize) -> Statement {
	match statement {
		Statement::If {
			feature_index,
			threshold,
			then,
			otherwise,
		} => Statement::If {
			feature_index,
			threshold,
			then: Box::new(convert_statement(*then, mode, n_classes)),
			otherwise: Box::new(convert_statement(*otherwise, mode, n_classes)),
		},
		Statement::Return(terminal) => Statement::Return(match mode {
			CompileMode::ClassLabel => Terminal::ClassLabel(terminal.class_label()),
			CompileMode::ProbabilityVector => {
				Terminal::Probabilities(terminal.probabilities(n_classes).into_owned())
			}
		}),
	}
}

impl Terminal {
	/// The class this terminal votes for. A probability vector votes for its most probable class.
	pub fn class_label(&self) -> usize {
		match self {
			Terminal::ClassLabel(class_index) => *class_index,
			Terminal::Probabilities(probabilities) => argmax(probabilities),
		}
	}

	/// The class distribution of this terminal. A class label is a distribution with all of its mass on that class.
	pub fn probabilities(&self, n_classes: usize) -> Cow<[f32]> {
		match self {
			Terminal::ClassLabel(class_index) => {
				let mut probabilities = vec![0.0; n_classes];
				probabilities[*class_index] = 1.0;
				Cow::Owned(probabilities)
			}
			Terminal::Probabilities(probabilities) => Cow::Borrowed(probabilities),
		}
	}

	/// Whether this terminal describes one of `n_classes` classes.
	pub(crate) fn fits(&self, n_classes: usize) -> bool {
		match self {
			Terminal::ClassLabel(class_index) => *class_index < n_classes,
			Terminal::Probabilities(probabilities) => probabilities.len() == n_classes,
		}
	}
}

/// Compile a single tree. The tree is validated first, with the number of classes taken from its first leaf. Errors report the tree index as 0.
pub fn compile(tree: &Tree, mode: CompileMode) -> Result<DecisionProcedure> {
	let n_classes = tree
		.nodes
		.iter()
		.find_map(|node| match node {
			Node::Leaf(LeafNode { counts }) => Some(counts.len()),
			Node::Branch(_) => None,
		})
		.unwrap_or(0);
	validate::validate_tree(tree, 0, n_classes)?;
	Ok(compile_validated(tree, mode))
}

/// Compile every tree in the forest. The forest was validated when it was constructed.
pub fn compile_forest(forest: &Forest, mode: CompileMode) -> Vec<DecisionProcedure> {
	let procedures: Vec<DecisionProcedure> = forest
		.trees()
		.iter()
		.map(|tree| compile_validated(tree, mode))
		.collect();
	log::debug!(
		"compiled {} trees with {} classes in {:?} mode, max depth {}",
		procedures.len(),
		forest.n_classes(),
		mode,
		forest.trees().iter().map(Tree::depth).max().unwrap_or(0),
	);
	procedures
}

fn compile_validated(tree: &Tree, mode: CompileMode) -> DecisionProcedure {
	DecisionProcedure {
		mode,
		root: compile_node(tree, 0, mode),
	}
}

fn compile_node(tree: &Tree, node_index: usize, mode: CompileMode) -> Statement {
	match &tree.nodes[node_index] {
		Node::Branch(BranchNode {
			feature_index,
			threshold,
			left_child_index,
			right_child_index,
		}) => Statement::If {
			feature_index: *feature_index,
			threshold: *threshold,
			then: Box::new(compile_node(tree, *left_child_index, mode)),
			otherwise: Box::new(compile_node(tree, *right_child_index, mode)),
		},
		Node::Leaf(LeafNode { counts }) => Statement::Return(match mode {
			CompileMode::ClassLabel => Terminal::ClassLabel(argmax(counts)),
			CompileMode::ProbabilityVector => Terminal::Probabilities(normalize(counts)),
		}),
	}
}

/// Find the index of the largest value. Ties go to the lowest index. An empty slice returns 0.
pub fn argmax(values: &[f32]) -> usize {
	let mut max_index = 0;
	for (index, value) in values.iter().enumerate().skip(1) {
		if *value > values[max_index] {
			max_index = index;
		}
	}
	max_index
}

#[test]
fn test_argmax() {
	assert_eq!(argmax(&[1.0, 3.0, 2.0]), 1);
	assert_eq!(argmax(&[4.0, 4.0, 1.0]), 0);
	assert_eq!(argmax(&[0.0, 2.0, 2.0]), 1);
	assert_eq!(argmax(&[0.0, 0.0]), 0);
}

#[test]
fn test_compile_single_leaf() {
	let tree = Tree::leaf(vec![8.0, 2.0]);
	let procedure = compile(&tree, CompileMode::ClassLabel).unwrap();
	assert_eq!(
		procedure.root,
		Statement::Return(Terminal::ClassLabel(0))
	);
	let procedure = compile(&tree, CompileMode::ProbabilityVector).unwrap();
	assert_eq!(
		procedure.root,
		Statement::Return(Terminal::Probabilities(vec![0.8, 0.2]))
	);
}

#[test]
fn test_compile_stump() {
	let tree = crate::stump(5.0, vec![10.0, 0.0], vec![0.0, 10.0]);
	let procedure = compile(&tree, CompileMode::ClassLabel).unwrap();
	insta::assert_debug_snapshot!(procedure, @r###"
DecisionProcedure {
    mode: ClassLabel,
    root: If {
        feature_index: 0,
        threshold: 5.0,
        then: Return(
            ClassLabel(
                0,
            ),
        ),
        otherwise: Return(
            ClassLabel(
                1,
            ),
        ),
    },
}
"###);
	let procedure = compile(&tree, CompileMode::ProbabilityVector).unwrap();
	insta::assert_debug_snapshot!(procedure.root, @r###"
If {
    feature_index: 0,
    threshold: 5.0,
    then: Return(
        Probabilities(
            [
                1.0,
                0.0,
            ],
        ),
    ),
    otherwise: Return(
        Probabilities(
            [
                0.0,
                1.0,
            ],
        ),
    ),
}
"###);
}

#[test]
fn test_compile_is_preorder() {
	// The left subtree is stored after the right one, so the node order differs from the traversal order.
	let tree = Tree {
		nodes: vec![
			Node::Branch(BranchNode {
				feature_index: 2,
				threshold: 0.5,
				left_child_index: 2,
				right_child_index: 1,
			}),
			Node::Leaf(LeafNode {
				counts: vec![0.0, 0.0, 3.0],
			}),
			Node::Branch(BranchNode {
				feature_index: 1,
				threshold: -1.5,
				left_child_index: 3,
				right_child_index: 4,
			}),
			Node::Leaf(LeafNode {
				counts: vec![5.0, 1.0, 0.0],
			}),
			Node::Leaf(LeafNode {
				counts: vec![1.0, 5.0, 5.0],
			}),
		],
	};
	let procedure = compile(&tree, CompileMode::ClassLabel).unwrap();
	let expected = Statement::If {
		feature_index: 2,
		threshold: 0.5,
		then: Box::new(Statement::If {
			feature_index: 1,
			threshold: -1.5,
			then: Box::new(Statement::Return(Terminal::ClassLabel(0))),
			otherwise: Box::new(Statement::Return(Terminal::ClassLabel(1))),
		}),
		otherwise: Box::new(Statement::Return(Terminal::ClassLabel(2))),
	};
	assert_eq!(procedure.root, expected);
}

#[test]
fn test_procedure_inspection() {
	let tree = crate::stump_on(3, 1.0, vec![2.0, 1.0], vec![1.0, 2.0]);
	let procedure = compile(&tree, CompileMode::ProbabilityVector).unwrap();
	assert_eq!(procedure.max_feature_index(), Some(3));
	let terminals = procedure.terminals();
	assert_eq!(terminals.len(), 2);
	assert_eq!(terminals[0].class_label(), 0);
	assert_eq!(terminals[1].class_label(), 1);
	assert_eq!(
		Terminal::ClassLabel(2).probabilities(3).as_ref(),
		&[0.0, 0.0, 1.0]
	);
	let constant = compile(&Tree::leaf(vec![1.0]), CompileMode::ClassLabel).unwrap();
	assert_eq!(constant.max_feature_index(), None);
}

#[test]
fn test_compile_propagates_malformed_tree() {
	let mut tree = crate::stump(5.0, vec![10.0, 0.0], vec![0.0, 10.0]);
	tree.nodes.truncate(2);
	let error = compile(&tree, CompileMode::ClassLabel).unwrap_err();
	assert_eq!(
		error,
		crate::Error::MalformedTree {
			tree_index: 0,
			node_index: 0,
			reason: crate::MalformedTreeReason::MissingChild { child_index: 2 },
		}
	);
}

#[test]
fn test_into_mode() {
	let tree = crate::stump(5.0, vec![10.0, 0.0], vec![1.0, 3.0]);
	let labels = compile(&tree, CompileMode::ClassLabel).unwrap();
	let probabilities = compile(&tree, CompileMode::ProbabilityVector).unwrap();
	let one_hot = labels.clone().into_mode(CompileMode::ProbabilityVector, 3);
	assert_eq!(one_hot.mode, CompileMode::ProbabilityVector);
	let terminals = one_hot.terminals();
	assert_eq!(terminals[0], &Terminal::Probabilities(vec![1.0, 0.0, 0.0]));
	assert_eq!(terminals[1], &Terminal::Probabilities(vec![0.0, 1.0, 0.0]));
	assert_eq!(
		probabilities.clone().into_mode(CompileMode::ClassLabel, 2),
		labels
	);
	assert_eq!(
		probabilities.clone().into_mode(CompileMode::ProbabilityVector, 2),
		probabilities
	);
}
