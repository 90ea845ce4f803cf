use crate::{
	compile_forest, CompileMode, DecisionProcedure, Error, Forest, MalformedTreeReason, Result,
	Terminal,
};
use ndarray::prelude::*;
use num_traits::ToPrimitive;
use rayon::prelude::*;
use std::{borrow::Cow, str::FromStr};

/// Zero probabilities are replaced with this value before taking their logarithm. It is the double precision machine epsilon.
pub const SAMME_EPSILON: f32 = 2.220446049250313e-16;

/// The kind of ensemble a model was trained as. It determines how the outputs of the trees are combined.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum EnsembleKind {
	#[serde(rename = "random_forest")]
	RandomForest,
	#[serde(rename = "adaboost")]
	AdaBoost,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown ensemble kind \"{0}\", expected \"random_forest\" or \"adaboost\"")]
pub struct ParseEnsembleKindError(String);

impl FromStr for EnsembleKind {
	type Err = ParseEnsembleKindError;
	fn from_str(value: &str) -> Result<Self, Self::Err> {
		match value {
			"random_forest" | "random-forest" => Ok(EnsembleKind::RandomForest),
			"adaboost" => Ok(EnsembleKind::AdaBoost),
			_ => Err(ParseEnsembleKindError(value.to_owned())),
		}
	}
}

/// These are the options for SAMME fusion.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize)]
pub struct SammeOptions {
	epsilon: f32,
}

impl SammeOptions {
	/// `epsilon` is the floor applied to zero probabilities before the logarithm is taken. It must be finite and positive, or the fused scores would be NaN.
	pub fn new(epsilon: f32) -> Result<SammeOptions> {
		if !epsilon.is_finite() || epsilon <= 0.0 {
			return Err(Error::InvalidEpsilon { epsilon });
		}
		Ok(SammeOptions { epsilon })
	}

	pub fn epsilon(&self) -> f32 {
		self.epsilon
	}
}

impl Default for SammeOptions {
	fn default() -> Self {
		Self {
			epsilon: SAMME_EPSILON,
		}
	}
}

/// An `Aggregation` combines the outputs of every tree in an ensemble into a single class prediction.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize)]
pub enum Aggregation {
	/// Each tree votes for a class and the class with the largest share of the votes wins.
	MajorityVote,
	/// Each tree contributes its centered log probabilities, scaled by `n_classes - 1`, and the class with the largest mean contribution wins.
	SammeFusion(SammeOptions),
}

impl Aggregation {
	pub fn for_kind(kind: EnsembleKind) -> Aggregation {
		match kind {
			EnsembleKind::RandomForest => Aggregation::MajorityVote,
			EnsembleKind::AdaBoost => Aggregation::SammeFusion(SammeOptions::default()),
		}
	}

	/// The mode the trees must be compiled in for this aggregation.
	pub fn compile_mode(&self) -> CompileMode {
		match self {
			Aggregation::MajorityVote => CompileMode::ClassLabel,
			Aggregation::SammeFusion(_) => CompileMode::ProbabilityVector,
		}
	}

	/// Reduce the outputs of the trees to one score per class. The outputs are combined in order, so the scores do not depend on how the trees were evaluated. No outputs give a score of zero for every class.
	///
	/// # Panics
	///
	/// Panics if an output names a class index of `n_classes` or more. [`Ensemble`] checks this when it is constructed.
	pub fn combine(&self, outputs: &[&Terminal], n_classes: usize) -> Vec<f32> {
		let mut scores = vec![0.0; n_classes];
		if outputs.is_empty() {
			return scores;
		}
		let n_trees = outputs.len().to_f32().unwrap();
		match self {
			Aggregation::MajorityVote => {
				for output in outputs {
					scores[output.class_label()] += 1.0;
				}
			}
			Aggregation::SammeFusion(options) => {
				for output in outputs {
					let probabilities = output.probabilities(n_classes);
					let contribution = samme_contribution(&probabilities, options.epsilon);
					for (score, contribution) in scores.iter_mut().zip(contribution) {
						*score += contribution;
					}
				}
			}
		}
		for score in scores.iter_mut() {
			*score /= n_trees;
		}
		scores
	}

	/// Choose the class with the largest score. Ties go to the lowest index.
	pub fn select(&self, scores: &[f32]) -> usize {
		// Vote shares are never negative, so majority voting starts from zero. Fused scores can be negative.
		let mut max = match self {
			Aggregation::MajorityVote => 0.0,
			Aggregation::SammeFusion(_) => std::f32::MIN,
		};
		let mut answer = 0;
		for (class_index, score) in scores.iter().enumerate() {
			if *score > max {
				max = *score;
				answer = class_index;
			}
		}
		answer
	}
}

/// Compute the SAMME contribution of a single tree: the log probabilities centered on their mean and scaled by `n_classes - 1`. The contributions sum to zero across classes.
pub fn samme_contribution(probabilities: &[f32], epsilon: f32) -> Vec<f32> {
	let n_classes = probabilities.len().to_f32().unwrap();
	let log_probabilities: Vec<f32> = probabilities
		.iter()
		.map(|probability| {
			if *probability == 0.0 {
				epsilon.ln()
			} else {
				probability.ln()
			}
		})
		.collect();
	let mean = log_probabilities.iter().sum::<f32>() / n_classes;
	log_probabilities
		.iter()
		.map(|log_probability| (log_probability - mean) * (n_classes - 1.0))
		.collect()
}

/// An `Ensemble` holds one compiled procedure per tree along with the aggregation used to combine them.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct Ensemble {
	procedures: Vec<DecisionProcedure>,
	aggregation: Aggregation,
	n_classes: usize,
	n_features: usize,
}

/// This is everything an emitter needs to render the combination loop.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize)]
pub struct EnsembleDescription {
	pub aggregation: Aggregation,
	pub n_trees: usize,
	pub n_classes: usize,
	pub n_features: usize,
}

impl Ensemble {
	/// Compile every tree in the forest in the mode the aggregation requires.
	pub fn compile(forest: &Forest, aggregation: Aggregation) -> Ensemble {
		let procedures = compile_forest(forest, aggregation.compile_mode());
		Ensemble {
			procedures,
			aggregation,
			n_classes: forest.n_classes(),
			n_features: forest.n_features(),
		}
	}

	/// Build an ensemble from procedures that were already compiled. Every terminal must describe one of `n_classes` classes. Procedures compiled in a different mode than the aggregation needs are converted with [`DecisionProcedure::into_mode`].
	pub fn from_procedures(
		procedures: Vec<DecisionProcedure>,
		aggregation: Aggregation,
		n_classes: usize,
	) -> Result<Ensemble> {
		if procedures.is_empty() {
			return Err(Error::EmptyEnsemble);
		}
		for (tree_index, procedure) in procedures.iter().enumerate() {
			if let Some((node_index, terminal)) = procedure
				.terminals()
				.into_iter()
				.enumerate()
				.find(|(_, terminal)| !terminal.fits(n_classes))
			{
				let len = match terminal {
					Terminal::ClassLabel(class_index) => class_index + 1,
					Terminal::Probabilities(probabilities) => probabilities.len(),
				};
				return Err(Error::MalformedTree {
					tree_index,
					node_index,
					reason: MalformedTreeReason::ClassCountMismatch { len, n_classes },
				});
			}
		}
		let mode = aggregation.compile_mode();
		let procedures: Vec<DecisionProcedure> = procedures
			.into_iter()
			.map(|procedure| procedure.into_mode(mode, n_classes))
			.collect();
		let n_features = procedures
			.iter()
			.filter_map(DecisionProcedure::max_feature_index)
			.max()
			.map(|feature_index| feature_index + 1)
			.unwrap_or(0);
		Ok(Ensemble {
			procedures,
			aggregation,
			n_classes,
			n_features,
		})
	}

	pub fn procedures(&self) -> &[DecisionProcedure] {
		&self.procedures
	}

	pub fn aggregation(&self) -> Aggregation {
		self.aggregation
	}

	pub fn n_classes(&self) -> usize {
		self.n_classes
	}

	pub fn n_features(&self) -> usize {
		self.n_features
	}

	pub fn description(&self) -> EnsembleDescription {
		EnsembleDescription {
			aggregation: self.aggregation,
			n_trees: self.procedures.len(),
			n_classes: self.n_classes,
			n_features: self.n_features,
		}
	}

	/// Compute the aggregated score of each class: vote shares for majority voting and mean contributions for SAMME fusion.
	pub fn scores(&self, features: &[f32]) -> Result<Vec<f32>> {
		self.check_dimension(features)?;
		let outputs = self
			.procedures
			.iter()
			.map(|procedure| procedure.evaluate(features))
			.collect::<Result<Vec<_>>>()?;
		Ok(self.aggregation.combine(&outputs, self.n_classes))
	}

	/// Predict the class of a single example.
	pub fn classify(&self, features: &[f32]) -> Result<usize> {
		let scores = self.scores(features)?;
		Ok(self.aggregation.select(&scores))
	}

	/// Predict the class of a single example, evaluating the trees in parallel. The result is identical to `classify`.
	pub fn par_classify(&self, features: &[f32]) -> Result<usize> {
		self.check_dimension(features)?;
		let outputs = self
			.procedures
			.par_iter()
			.map(|procedure| procedure.evaluate(features))
			.collect::<Result<Vec<_>>>()?;
		let scores = self.aggregation.combine(&outputs, self.n_classes);
		Ok(self.aggregation.select(&scores))
	}

	/// Predict the class of each row of `features` in parallel.
	pub fn classify_batch(&self, features: ArrayView2<f32>) -> Result<Array1<usize>> {
		let predictions = features
			.axis_iter(Axis(0))
			.into_par_iter()
			.map(|row| {
				let row = match row.as_slice() {
					Some(row) => Cow::Borrowed(row),
					None => Cow::Owned(row.to_vec()),
				};
				self.classify(&row)
			})
			.collect::<Result<Vec<_>>>()?;
		Ok(Array1::from(predictions))
	}

	fn check_dimension(&self, features: &[f32]) -> Result<()> {
		if features.len() < self.n_features {
			return Err(Error::DimensionMismatch {
				feature_index: self.n_features - 1,
				n_features: features.len(),
			});
		}
		Ok(())
	}
}

/// Compile the forest and classify a single example. Prefer compiling an `Ensemble` once when classifying many examples.
pub fn classify(forest: &Forest, aggregation: Aggregation, features: &[f32]) -> Result<usize> {
	Ensemble::compile(forest, aggregation).classify(features)
}

#[cfg(test)]
use crate::{stump, stump_on, Tree};

#[test]
fn test_majority_vote_agreement() {
	let trees = vec![stump(5.0, vec![10.0, 0.0], vec![0.0, 10.0]); 3];
	let forest = Forest::new(trees, 2).unwrap();
	assert_eq!(classify(&forest, Aggregation::MajorityVote, &[7.0]), Ok(1));
	assert_eq!(classify(&forest, Aggregation::MajorityVote, &[3.0]), Ok(0));
}

#[test]
fn test_majority_vote_tie_goes_to_lowest_class() {
	let trees = vec![Tree::leaf(vec![0.0, 5.0]), Tree::leaf(vec![5.0, 0.0])];
	let forest = Forest::new(trees, 2).unwrap();
	let ensemble = Ensemble::compile(&forest, Aggregation::MajorityVote);
	assert_eq!(ensemble.scores(&[]), Ok(vec![0.5, 0.5]));
	assert_eq!(ensemble.classify(&[]), Ok(0));
}

#[test]
fn test_majority_vote_shares() {
	let trees = vec![
		Tree::leaf(vec![0.0, 1.0, 0.0]),
		Tree::leaf(vec![0.0, 0.0, 4.0]),
		Tree::leaf(vec![1.0, 2.0, 0.0]),
		Tree::leaf(vec![0.0, 3.0, 3.0]),
	];
	let forest = Forest::new(trees, 3).unwrap();
	let ensemble = Ensemble::compile(&forest, Aggregation::MajorityVote);
	assert_eq!(ensemble.scores(&[]), Ok(vec![0.0, 0.75, 0.25]));
	assert_eq!(ensemble.classify(&[]), Ok(1));
}

#[test]
fn test_samme_single_tree() {
	let contribution = samme_contribution(&[0.9, 0.1], SAMME_EPSILON);
	assert!(contribution[0] > contribution[1]);
	assert!((contribution[0] + contribution[1]).abs() < 1e-6);
	assert!((contribution[0] - (0.9f32.ln() - 0.1f32.ln()) / 2.0).abs() < 1e-6);
	let forest = Forest::new(vec![Tree::leaf(vec![9.0, 1.0])], 2).unwrap();
	let ensemble = Ensemble::compile(&forest, Aggregation::for_kind(EnsembleKind::AdaBoost));
	let scores = ensemble.scores(&[]).unwrap();
	assert_eq!(scores, contribution);
	assert_eq!(ensemble.classify(&[]), Ok(0));
}

#[test]
fn test_samme_zero_probabilities_use_epsilon() {
	let contribution = samme_contribution(&[1.0, 0.0, 0.0], SAMME_EPSILON);
	assert!(contribution.iter().all(|value| value.is_finite()));
	let log_epsilon = SAMME_EPSILON.ln();
	let mean = 2.0 * log_epsilon / 3.0;
	assert!((contribution[0] - (0.0 - mean) * 2.0).abs() < 1e-4);
	assert!((contribution[1] - (log_epsilon - mean) * 2.0).abs() < 1e-4);
	assert_eq!(contribution[1], contribution[2]);
	// A leaf that saw no examples contributes nothing.
	let contribution = samme_contribution(&[0.0, 0.0], SAMME_EPSILON);
	assert_eq!(contribution, vec![0.0, 0.0]);
}

#[test]
fn test_samme_negative_scores() {
	// Every fused score is negative except the winner's, so the running maximum must start below zero.
	let forest = Forest::new(vec![Tree::leaf(vec![1.0, 1.0, 8.0])], 3).unwrap();
	let ensemble = Ensemble::compile(&forest, Aggregation::for_kind(EnsembleKind::AdaBoost));
	let scores = ensemble.scores(&[]).unwrap();
	assert!(scores[0] < 0.0 && scores[1] < 0.0);
	assert_eq!(ensemble.classify(&[]), Ok(2));
	let aggregation = Aggregation::SammeFusion(SammeOptions::default());
	assert_eq!(aggregation.select(&[-3.0, -1.0, -2.0]), 1);
	assert_eq!(Aggregation::MajorityVote.select(&[0.0, 0.0]), 0);
}

#[test]
fn test_samme_differs_from_majority_vote() {
	let trees = vec![
		stump(0.0, vec![45.0, 55.0], vec![1.0, 0.0]),
		stump(0.0, vec![45.0, 55.0], vec![1.0, 0.0]),
		stump(0.0, vec![99.0, 1.0], vec![1.0, 0.0]),
	];
	let forest = Forest::new(trees, 2).unwrap();
	assert_eq!(classify(&forest, Aggregation::MajorityVote, &[-1.0]), Ok(1));
	assert_eq!(
		classify(&forest, Aggregation::for_kind(EnsembleKind::AdaBoost), &[-1.0]),
		Ok(0)
	);
}

#[test]
fn test_dimension_mismatch() {
	let trees = vec![
		stump_on(4, 1.0, vec![1.0, 0.0], vec![0.0, 1.0]),
		stump_on(0, 1.0, vec![1.0, 0.0], vec![0.0, 1.0]),
	];
	let forest = Forest::new(trees, 2).unwrap();
	for &aggregation in &[
		Aggregation::MajorityVote,
		Aggregation::SammeFusion(SammeOptions::default()),
	] {
		let ensemble = Ensemble::compile(&forest, aggregation);
		let error = Error::DimensionMismatch {
			feature_index: 4,
			n_features: 2,
		};
		assert_eq!(ensemble.classify(&[0.0, 0.0]), Err(error.clone()));
		assert_eq!(ensemble.par_classify(&[0.0, 0.0]), Err(error));
		assert!(ensemble.classify(&[0.0; 5]).is_ok());
	}
}

#[test]
fn test_from_procedures() {
	assert_eq!(
		Ensemble::from_procedures(Vec::new(), Aggregation::MajorityVote, 2),
		Err(Error::EmptyEnsemble)
	);
	let procedure =
		crate::compile(&stump_on(2, 0.5, vec![3.0, 1.0], vec![1.0, 3.0]), CompileMode::ClassLabel)
			.unwrap();
	let ensemble =
		Ensemble::from_procedures(vec![procedure.clone()], Aggregation::MajorityVote, 2).unwrap();
	assert_eq!(ensemble.n_features(), 3);
	assert_eq!(ensemble.classify(&[0.0, 0.0, 1.0]), Ok(1));
	assert_eq!(
		Ensemble::from_procedures(vec![procedure], Aggregation::MajorityVote, 1),
		Err(Error::MalformedTree {
			tree_index: 0,
			node_index: 1,
			reason: MalformedTreeReason::ClassCountMismatch {
				len: 2,
				n_classes: 1
			},
		})
	);
}

#[test]
fn test_parallel_matches_sequential() {
	let mut trees = Vec::new();
	for tree_index in 0..24 {
		let threshold = tree_index as f32 * 0.25 - 3.0;
		let left = vec![(tree_index % 3) as f32, 1.0, (tree_index % 5) as f32];
		let right = vec![1.0, (tree_index % 4) as f32, 2.0];
		trees.push(stump_on(tree_index % 3, threshold, left, right));
	}
	let forest = Forest::new(trees, 3).unwrap();
	let n_rows = 40;
	let features = Array2::from_shape_fn((n_rows, 3), |(row, column)| {
		(row as f32 * 0.37 + column as f32 * 1.1) % 7.0 - 3.5
	});
	for &aggregation in &[
		Aggregation::MajorityVote,
		Aggregation::SammeFusion(SammeOptions::default()),
	] {
		let ensemble = Ensemble::compile(&forest, aggregation);
		let predictions = ensemble.classify_batch(features.view()).unwrap();
		assert_eq!(predictions.len(), n_rows);
		for (row, prediction) in features.axis_iter(Axis(0)).zip(predictions.iter()) {
			let row = row.to_vec();
			assert_eq!(ensemble.classify(&row), Ok(*prediction));
			assert_eq!(ensemble.par_classify(&row), Ok(*prediction));
		}
		// The rows of a column major array are not contiguous.
		let features_f = Array2::from_shape_fn((n_rows, 3).f(), |index| features[index]);
		assert_eq!(
			ensemble.classify_batch(features_f.view()).unwrap(),
			predictions
		);
	}
}

#[test]
fn test_parse_ensemble_kind() {
	assert_eq!(
		"random-forest".parse::<EnsembleKind>().unwrap(),
		EnsembleKind::RandomForest
	);
	assert_eq!(
		"adaboost".parse::<EnsembleKind>().unwrap(),
		EnsembleKind::AdaBoost
	);
	assert!("gbdt".parse::<EnsembleKind>().is_err());
}

#[test]
fn test_from_procedures_converts_modes() {
	let forest = Forest::new(vec![stump(5.0, vec![10.0, 0.0], vec![0.0, 10.0])], 2).unwrap();
	// Labels under SAMME fusion become one-hot distributions.
	let labels = compile_forest(&forest, CompileMode::ClassLabel);
	let samme = Aggregation::SammeFusion(SammeOptions::default());
	let ensemble = Ensemble::from_procedures(labels, samme, 2).unwrap();
	assert_eq!(
		ensemble.procedures()[0].mode,
		CompileMode::ProbabilityVector
	);
	assert_eq!(ensemble.classify(&[7.0]), Ok(1));
	assert_eq!(ensemble.classify(&[3.0]), Ok(0));
	let compiled = Ensemble::compile(&forest, samme);
	assert_eq!(ensemble.scores(&[7.0]), compiled.scores(&[7.0]));
	// Distributions under majority voting cast the vote of their most probable class.
	let probabilities = compile_forest(&forest, CompileMode::ProbabilityVector);
	let ensemble = Ensemble::from_procedures(probabilities, Aggregation::MajorityVote, 2).unwrap();
	assert_eq!(ensemble.procedures()[0].mode, CompileMode::ClassLabel);
	assert_eq!(ensemble.scores(&[7.0]), Ok(vec![0.0, 1.0]));
}

#[test]
fn test_samme_options_reject_invalid_epsilon() {
	for &epsilon in &[0.0, -1.0, std::f32::NAN, std::f32::INFINITY] {
		// NaN is not equal to itself, so compare the messages.
		let error = SammeOptions::new(epsilon).unwrap_err();
		assert_eq!(
			error.to_string(),
			Error::InvalidEpsilon { epsilon }.to_string()
		);
	}
	let options = SammeOptions::new(1e-3).unwrap();
	assert_eq!(options.epsilon(), 1e-3);
	assert_eq!(SammeOptions::default().epsilon(), SAMME_EPSILON);
	let forest = Forest::new(vec![Tree::leaf(vec![0.0, 10.0])], 2).unwrap();
	let ensemble = Ensemble::compile(&forest, Aggregation::SammeFusion(options));
	assert!(ensemble.scores(&[]).unwrap().iter().all(|score| score.is_finite()));
	assert_eq!(ensemble.classify(&[]), Ok(1));
}

#[test]
fn test_combine_without_outputs() {
	assert_eq!(Aggregation::MajorityVote.combine(&[], 3), vec![0.0; 3]);
	let samme = Aggregation::SammeFusion(SammeOptions::default());
	assert_eq!(samme.combine(&[], 2), vec![0.0; 2]);
}
