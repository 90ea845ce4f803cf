use crate::{DecisionProcedure, Error, Result, Statement, Terminal};

impl DecisionProcedure {
	/// Evaluate the procedure on a feature vector. A feature index past the end of `features` is a dimension mismatch.
	pub fn evaluate(&self, features: &[f32]) -> Result<&Terminal> {
		// Start at the root.
		let mut statement = &self.root;
		// Descend until we get to a return.
		loop {
			match statement {
				Statement::If {
					feature_index,
					threshold,
					then,
					otherwise,
				} => {
					let feature_value =
						features
							.get(*feature_index)
							.ok_or(Error::DimensionMismatch {
								feature_index: *feature_index,
								n_features: features.len(),
							})?;
					statement = if *feature_value <= *threshold {
						then
					} else {
						otherwise
					};
				}
				Statement::Return(terminal) => return Ok(terminal),
			}
		}
	}
}

#[cfg(test)]
use crate::{compile, CompileMode, Tree};

#[test]
fn test_stump_class_labels() {
	let tree = crate::stump(5.0, vec![10.0, 0.0], vec![0.0, 10.0]);
	let procedure = compile(&tree, CompileMode::ClassLabel).unwrap();
	assert_eq!(procedure.evaluate(&[3.0]), Ok(&Terminal::ClassLabel(0)));
	assert_eq!(procedure.evaluate(&[7.0]), Ok(&Terminal::ClassLabel(1)));
	// The threshold itself goes left.
	assert_eq!(procedure.evaluate(&[5.0]), Ok(&Terminal::ClassLabel(0)));
}

#[test]
fn test_stump_probabilities() {
	let tree = crate::stump(5.0, vec![9.0, 1.0], vec![0.0, 0.0]);
	let procedure = compile(&tree, CompileMode::ProbabilityVector).unwrap();
	assert_eq!(
		procedure.evaluate(&[5.0]),
		Ok(&Terminal::Probabilities(vec![0.9, 0.1]))
	);
	assert_eq!(
		procedure.evaluate(&[5.5]),
		Ok(&Terminal::Probabilities(vec![0.0, 0.0]))
	);
}

#[test]
fn test_single_leaf_is_constant() {
	let procedure = compile(&Tree::leaf(vec![3.0, 1.0]), CompileMode::ClassLabel).unwrap();
	let inputs: [&[f32]; 3] = [&[], &[-100.0], &[1.0, 2.0, 3.0]];
	for features in inputs.iter() {
		assert_eq!(procedure.evaluate(features), Ok(&Terminal::ClassLabel(0)));
	}
}

#[test]
fn test_dimension_mismatch() {
	let tree = crate::stump_on(4, 1.0, vec![1.0, 0.0], vec![0.0, 1.0]);
	let procedure = compile(&tree, CompileMode::ClassLabel).unwrap();
	assert_eq!(
		procedure.evaluate(&[0.0, 0.0]),
		Err(Error::DimensionMismatch {
			feature_index: 4,
			n_features: 2,
		})
	);
}
