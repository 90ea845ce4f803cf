use crate::{BranchNode, Error, LeafNode, MalformedTreeReason, Node, Result, Tree};

/// Check that `tree` is a finite rooted binary tree whose leaves all hold `n_classes` valid counts. Every node must be reached exactly once from the root.
pub fn validate_tree(tree: &Tree, tree_index: usize, n_classes: usize) -> Result<()> {
	let malformed = |node_index: usize, reason: MalformedTreeReason| Error::MalformedTree {
		tree_index,
		node_index,
		reason,
	};
	if tree.nodes.is_empty() {
		return Err(malformed(0, MalformedTreeReason::NoNodes));
	}
	if n_classes == 0 {
		return Err(malformed(0, MalformedTreeReason::NoClasses));
	}
	let mut visited = vec![false; tree.nodes.len()];
	visited[0] = true;
	let mut stack = vec![0];
	while let Some(node_index) = stack.pop() {
		match &tree.nodes[node_index] {
			Node::Branch(BranchNode {
				threshold,
				left_child_index,
				right_child_index,
				..
			}) => {
				if !threshold.is_finite() {
					return Err(malformed(
						node_index,
						MalformedTreeReason::InvalidThreshold {
							threshold: *threshold,
						},
					));
				}
				for &child_index in &[*left_child_index, *right_child_index] {
					match visited.get_mut(child_index) {
						None => {
							return Err(malformed(
								node_index,
								MalformedTreeReason::MissingChild { child_index },
							))
						}
						Some(true) => {
							return Err(malformed(child_index, MalformedTreeReason::SharedNode))
						}
						Some(visited) => *visited = true,
					}
					stack.push(child_index);
				}
			}
			Node::Leaf(LeafNode { counts }) => {
				if counts.len() != n_classes {
					return Err(malformed(
						node_index,
						MalformedTreeReason::ClassCountMismatch {
							len: counts.len(),
							n_classes,
						},
					));
				}
				if let Some(&count) = counts
					.iter()
					.find(|count| !count.is_finite() || **count < 0.0)
				{
					return Err(malformed(
						node_index,
						MalformedTreeReason::InvalidCount { count },
					));
				}
			}
		}
	}
	if let Some(node_index) = visited.iter().position(|visited| !visited) {
		return Err(malformed(node_index, MalformedTreeReason::Unreachable));
	}
	Ok(())
}

#[test]
fn test_valid_tree() {
	let tree = crate::stump(5.0, vec![10.0, 0.0], vec![0.0, 10.0]);
	assert_eq!(validate_tree(&tree, 0, 2), Ok(()));
	assert_eq!(validate_tree(&Tree::leaf(vec![0.0, 0.0]), 0, 2), Ok(()));
}

#[test]
fn test_missing_child() {
	let mut tree = crate::stump(5.0, vec![10.0, 0.0], vec![0.0, 10.0]);
	if let Node::Branch(branch) = &mut tree.nodes[0] {
		branch.right_child_index = 7;
	}
	assert_eq!(
		validate_tree(&tree, 3, 2),
		Err(Error::MalformedTree {
			tree_index: 3,
			node_index: 0,
			reason: MalformedTreeReason::MissingChild { child_index: 7 },
		})
	);
}

#[test]
fn test_cycle_is_shared_node() {
	let mut tree = crate::stump(5.0, vec![10.0, 0.0], vec![0.0, 10.0]);
	if let Node::Branch(branch) = &mut tree.nodes[0] {
		branch.right_child_index = 0;
	}
	assert_eq!(
		validate_tree(&tree, 0, 2),
		Err(Error::MalformedTree {
			tree_index: 0,
			node_index: 0,
			reason: MalformedTreeReason::SharedNode,
		})
	);
}

#[test]
fn test_unreachable_node() {
	let mut tree = crate::stump(5.0, vec![10.0, 0.0], vec![0.0, 10.0]);
	tree.nodes.push(Node::Leaf(LeafNode {
		counts: vec![1.0, 1.0],
	}));
	assert_eq!(
		validate_tree(&tree, 0, 2),
		Err(Error::MalformedTree {
			tree_index: 0,
			node_index: 3,
			reason: MalformedTreeReason::Unreachable,
		})
	);
}

#[test]
fn test_leaf_errors() {
	let tree = crate::stump(5.0, vec![10.0, 0.0], vec![0.0, 10.0, 1.0]);
	assert_eq!(
		validate_tree(&tree, 1, 2),
		Err(Error::MalformedTree {
			tree_index: 1,
			node_index: 2,
			reason: MalformedTreeReason::ClassCountMismatch {
				len: 3,
				n_classes: 2
			},
		})
	);
	let tree = Tree::leaf(vec![1.0, -1.0]);
	assert!(matches!(
		validate_tree(&tree, 0, 2),
		Err(Error::MalformedTree {
			reason: MalformedTreeReason::InvalidCount { .. },
			..
		})
	));
	let tree = crate::stump(std::f32::NAN, vec![10.0, 0.0], vec![0.0, 10.0]);
	assert!(matches!(
		validate_tree(&tree, 0, 2),
		Err(Error::MalformedTree {
			reason: MalformedTreeReason::InvalidThreshold { .. },
			..
		})
	));
	assert_eq!(
		validate_tree(&Tree { nodes: Vec::new() }, 0, 2),
		Err(Error::MalformedTree {
			tree_index: 0,
			node_index: 0,
			reason: MalformedTreeReason::NoNodes,
		})
	);
}
