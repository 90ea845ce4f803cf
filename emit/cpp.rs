use crate::Emitter;
use anyhow::{bail, Context, Result};
use grove_tree::{Aggregation, Ensemble, Statement, Terminal};
use itertools::Itertools;
use std::path::{Path, PathBuf};

const INDENT: &str = "    ";

/// Renders an ensemble as a C++ header holding one inline function per tree and a source file holding the ensemble's entry point.
#[derive(Clone, Debug)]
pub struct CppEmitter {
	data_type: String,
	name: String,
}

/// The generated header and source text.
#[derive(Clone, Debug)]
pub struct CppSource {
	pub name: String,
	pub header: String,
	pub source: String,
}

impl CppSource {
	/// Write `<name>.h` and `<name>.cpp` to `dir` and return their paths.
	pub fn write(&self, dir: &Path) -> Result<Vec<PathBuf>> {
		let header_path = dir.join(format!("{}.h", self.name));
		let source_path = dir.join(format!("{}.cpp", self.name));
		for (path, contents) in &[(&header_path, &self.header), (&source_path, &self.source)] {
			std::fs::write(path, contents)
				.with_context(|| format!("failed to write {}", path.display()))?;
			log::info!("wrote {}", path.display());
		}
		Ok(vec![header_path, source_path])
	}
}

impl Emitter for CppEmitter {
	type Output = CppSource;

	fn emit(&self, ensemble: &Ensemble) -> CppSource {
		CppSource {
			name: self.name.clone(),
			header: self.header(ensemble),
			source: self.source(ensemble),
		}
	}
}

impl CppEmitter {
	/// `data_type` is the element type of the feature vector, for example `float` or `int`. `name` is the stem of the generated files. It also prefixes the tree functions and names the include guard, so it must be a C++ identifier.
	pub fn new(data_type: String, name: String) -> Result<CppEmitter> {
		if !is_identifier(&name) {
			bail!(
				"\"{}\" is not a valid C++ identifier, use letters, digits and underscores and do not start with a digit",
				name
			);
		}
		Ok(CppEmitter { data_type, name })
	}

	fn entry_point(aggregation: Aggregation) -> &'static str {
		match aggregation {
			Aggregation::MajorityVote => "random_forest",
			Aggregation::SammeFusion(_) => "adaboost",
		}
	}

	fn tree_return_type(aggregation: Aggregation) -> &'static str {
		match aggregation {
			Aggregation::MajorityVote => "int",
			Aggregation::SammeFusion(_) => "std::vector<float>",
		}
	}

	fn parameter(&self) -> String {
		format!("const std::vector<{}> & feature_vector", self.data_type)
	}

	fn header(&self, ensemble: &Ensemble) -> String {
		let aggregation = ensemble.aggregation();
		let guard = format!("{}_H", self.name.to_uppercase());
		let return_type = Self::tree_return_type(aggregation);
		let mut header = String::new();
		header.push_str(&format!("#ifndef {}\n#define {}\n\n", guard, guard));
		header.push_str("#include <vector>\n\n");
		header.push_str(&format!(
			"typedef {} (*{}_tree) ({});\n\n",
			return_type,
			self.name,
			self.parameter()
		));
		for (tree_index, procedure) in ensemble.procedures().iter().enumerate() {
			header.push_str(&format!(
				"inline {} {}_tree{}({}) {{\n",
				return_type,
				self.name,
				tree_index,
				self.parameter()
			));
			header.push_str(&render_statement(&procedure.root, 1));
			header.push_str("}\n\n");
		}
		header.push_str(&format!(
			"int {}({});\n\n",
			Self::entry_point(aggregation),
			self.parameter()
		));
		header.push_str("#endif\n");
		header
	}

	fn source(&self, ensemble: &Ensemble) -> String {
		let description = ensemble.description();
		let tree_functions = (0..description.n_trees)
			.map(|tree_index| format!("{}_tree{}", self.name, tree_index))
			.join(", ");
		let mut source = String::new();
		source.push_str(&format!("#include \"{}.h\"\n\n", self.name));
		if let Aggregation::SammeFusion(options) = description.aggregation {
			source.push_str("#include <cmath>\n#include <limits>\n\n");
			source.push_str(&SAMME_HELPERS.replace("EPSILON", &float_literal(options.epsilon())));
		}
		source.push_str(&format!(
			"int {}({}) {{\n",
			Self::entry_point(description.aggregation),
			self.parameter()
		));
		source.push_str(&format!(
			"    const int number = {};\n    const int classes = {};\n\n",
			description.n_trees, description.n_classes
		));
		source.push_str(&format!(
			"    const {}_tree tree_functions[number] = {{{}}};\n\n",
			self.name, tree_functions
		));
		match description.aggregation {
			Aggregation::MajorityVote => source.push_str(MAJORITY_VOTE_BODY),
			Aggregation::SammeFusion(_) => source.push_str(SAMME_BODY),
		}
		source.push_str("}\n");
		source
	}
}

/// Render a statement as nested `if`/`else` blocks, indented by `depth` levels.
pub fn render_statement(statement: &Statement, depth: usize) -> String {
	let indent = INDENT.repeat(depth);
	match statement {
		Statement::If {
			feature_index,
			threshold,
			then,
			otherwise,
		} => format!(
			"{indent}if (feature_vector.at({feature_index}) <= {threshold}) {{\n{then}{indent}}}\n{indent}else {{\n{otherwise}{indent}}}\n",
			indent = indent,
			feature_index = feature_index,
			threshold = float_literal(*threshold),
			then = render_statement(then, depth + 1),
			otherwise = render_statement(otherwise, depth + 1),
		),
		Statement::Return(Terminal::ClassLabel(class_index)) => {
			format!("{}return {};\n", indent, class_index)
		}
		Statement::Return(Terminal::Probabilities(probabilities)) => format!(
			"{}return std::vector<float> {{{}}};\n",
			indent,
			probabilities.iter().map(|p| float_literal(*p)).join(", ")
		),
	}
}

fn is_identifier(name: &str) -> bool {
	let mut chars = name.chars();
	match chars.next() {
		Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
		_ => return false,
	}
	chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Render a `float` literal that rounds back to exactly `value`.
fn float_literal(value: f32) -> String {
	format!("{:?}f", value)
}

const MAJORITY_VOTE_BODY: &str = "    std::vector<float> pred(classes, 0);
    for (int i = 0; i < number; i++) {
        pred[tree_functions[i](feature_vector)]++;
    }

    int answer = 0;
    float value = 0;
    for (int i = 0; i < classes; i++) {
        pred[i] /= number;
        if (pred[i] > value) {
            value = pred[i];
            answer = i;
        }
    }

    return answer;
";

const SAMME_HELPERS: &str = "static std::vector<float> log_proba(std::vector<float> proba) {
    for (size_t i = 0; i < proba.size(); i++) {
        if (proba[i] == 0) {
            proba[i] = EPSILON;
        }
        proba[i] = std::log(proba[i]);
    }
    return proba;
}

static std::vector<float> samme_proba(std::vector<float> log_proba, int classes) {
    float mean = 0;
    for (size_t i = 0; i < log_proba.size(); i++) {
        mean += log_proba[i];
    }
    mean /= classes;
    for (size_t i = 0; i < log_proba.size(); i++) {
        log_proba[i] = (log_proba[i] - mean) * (classes - 1);
    }
    return log_proba;
}

";

const SAMME_BODY: &str = "    std::vector<float> res(classes, 0);
    for (int i = 0; i < number; i++) {
        std::vector<float> contribution = samme_proba(log_proba(tree_functions[i](feature_vector)), classes);
        for (int j = 0; j < classes; j++) {
            res[j] += contribution[j];
        }
    }

    int answer = 0;
    float max = std::numeric_limits<float>::lowest();
    for (int i = 0; i < classes; i++) {
        res[i] /= number;
        if (res[i] > max) {
            max = res[i];
            answer = i;
        }
    }

    return answer;
";

#[cfg(test)]
use grove_tree::{compile_forest, BranchNode, CompileMode, Forest, LeafNode, Node, SammeOptions, Tree};

#[cfg(test)]
fn stump_forest(n_trees: usize) -> Forest {
	let tree = Tree {
		nodes: vec![
			Node::Branch(BranchNode {
				feature_index: 0,
				threshold: 5.0,
				left_child_index: 1,
				right_child_index: 2,
			}),
			Node::Leaf(LeafNode {
				counts: vec![10.0, 0.0],
			}),
			Node::Leaf(LeafNode {
				counts: vec![0.0, 10.0],
			}),
		],
	};
	Forest::new(vec![tree; n_trees], 2).unwrap()
}

#[test]
fn test_float_literal() {
	assert_eq!(float_literal(5.0), "5.0f");
	assert_eq!(float_literal(-0.25), "-0.25f");
	assert_eq!(float_literal(0.1), "0.1f");
	assert_eq!(float_literal(grove_tree::SAMME_EPSILON), "2.220446e-16f");
}

#[test]
fn test_random_forest() {
	let ensemble = Ensemble::compile(&stump_forest(2), Aggregation::MajorityVote);
	let emitter = CppEmitter::new("float".to_owned(), "forest".to_owned()).unwrap();
	let output = emitter.emit(&ensemble);
	insta::assert_snapshot!(output.header.trim_end(), @r###"
#ifndef FOREST_H
#define FOREST_H

#include <vector>

typedef int (*forest_tree) (const std::vector<float> & feature_vector);

inline int forest_tree0(const std::vector<float> & feature_vector) {
    if (feature_vector.at(0) <= 5.0f) {
        return 0;
    }
    else {
        return 1;
    }
}

inline int forest_tree1(const std::vector<float> & feature_vector) {
    if (feature_vector.at(0) <= 5.0f) {
        return 0;
    }
    else {
        return 1;
    }
}

int random_forest(const std::vector<float> & feature_vector);

#endif
"###);
	insta::assert_snapshot!(output.source.trim_end(), @r###"
#include "forest.h"

int random_forest(const std::vector<float> & feature_vector) {
    const int number = 2;
    const int classes = 2;

    const forest_tree tree_functions[number] = {forest_tree0, forest_tree1};

    std::vector<float> pred(classes, 0);
    for (int i = 0; i < number; i++) {
        pred[tree_functions[i](feature_vector)]++;
    }

    int answer = 0;
    float value = 0;
    for (int i = 0; i < classes; i++) {
        pred[i] /= number;
        if (pred[i] > value) {
            value = pred[i];
            answer = i;
        }
    }

    return answer;
}
"###);
}

#[test]
fn test_adaboost() {
	let ensemble = Ensemble::compile(
		&stump_forest(1),
		Aggregation::SammeFusion(SammeOptions::default()),
	);
	let emitter = CppEmitter::new("int".to_owned(), "adaboost".to_owned()).unwrap();
	let output = emitter.emit(&ensemble);
	insta::assert_snapshot!(output.header.trim_end(), @r###"
#ifndef ADABOOST_H
#define ADABOOST_H

#include <vector>

typedef std::vector<float> (*adaboost_tree) (const std::vector<int> & feature_vector);

inline std::vector<float> adaboost_tree0(const std::vector<int> & feature_vector) {
    if (feature_vector.at(0) <= 5.0f) {
        return std::vector<float> {1.0f, 0.0f};
    }
    else {
        return std::vector<float> {0.0f, 1.0f};
    }
}

int adaboost(const std::vector<int> & feature_vector);

#endif
"###);
	assert!(output.source.starts_with("#include \"adaboost.h\"\n"));
	assert!(output
		.source
		.contains("            proba[i] = 2.220446e-16f;\n"));
	assert!(output.source.contains("const int number = 1;"));
	assert!(output
		.source
		.contains("const adaboost_tree tree_functions[number] = {adaboost_tree0};"));
	assert!(output
		.source
		.contains("float max = std::numeric_limits<float>::lowest();"));
}

#[test]
fn test_nested_statement() {
	let statement = Statement::If {
		feature_index: 3,
		threshold: -1.5,
		then: Box::new(Statement::Return(Terminal::ClassLabel(2))),
		otherwise: Box::new(Statement::If {
			feature_index: 0,
			threshold: 0.5,
			then: Box::new(Statement::Return(Terminal::ClassLabel(0))),
			otherwise: Box::new(Statement::Return(Terminal::ClassLabel(1))),
		}),
	};
	let expected = "    if (feature_vector.at(3) <= -1.5f) {
        return 2;
    }
    else {
        if (feature_vector.at(0) <= 0.5f) {
            return 0;
        }
        else {
            return 1;
        }
    }
";
	assert_eq!(render_statement(&statement, 1), expected);
}

#[test]
fn test_write() {
	let ensemble = Ensemble::compile(&stump_forest(1), Aggregation::MajorityVote);
	let emitter = CppEmitter::new("float".to_owned(), "forest".to_owned()).unwrap();
	let output = emitter.emit(&ensemble);
	let dir = std::env::temp_dir().join(format!("grove_emit_test_{}", std::process::id()));
	std::fs::create_dir_all(&dir).unwrap();
	let paths = output.write(&dir).unwrap();
	assert_eq!(paths, vec![dir.join("forest.h"), dir.join("forest.cpp")]);
	assert_eq!(std::fs::read_to_string(&paths[0]).unwrap(), output.header);
	assert_eq!(std::fs::read_to_string(&paths[1]).unwrap(), output.source);
	std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_name_must_be_identifier() {
	assert!(CppEmitter::new("float".to_owned(), "iris_forest2".to_owned()).is_ok());
	assert!(CppEmitter::new("float".to_owned(), "_forest".to_owned()).is_ok());
	for name in &["my-model", "2forest", "", "forest.v2", "for est"] {
		assert!(CppEmitter::new("float".to_owned(), name.to_string()).is_err());
	}
}

#[test]
fn test_mixed_modes_render_in_aggregation_mode() {
	let forest = stump_forest(1);
	let labels = compile_forest(&forest, CompileMode::ClassLabel);
	let ensemble = Ensemble::from_procedures(
		labels,
		Aggregation::SammeFusion(SammeOptions::default()),
		2,
	)
	.unwrap();
	let emitter = CppEmitter::new("float".to_owned(), "adaboost".to_owned()).unwrap();
	let header = emitter.emit(&ensemble).header;
	assert!(header.contains("inline std::vector<float> adaboost_tree0("));
	assert!(header.contains("        return std::vector<float> {1.0f, 0.0f};\n"));
	assert!(header.contains("        return std::vector<float> {0.0f, 1.0f};\n"));
	assert!(!header.contains("return 0;"));
	let probabilities = compile_forest(&forest, CompileMode::ProbabilityVector);
	let ensemble = Ensemble::from_procedures(probabilities, Aggregation::MajorityVote, 2).unwrap();
	let emitter = CppEmitter::new("float".to_owned(), "forest".to_owned()).unwrap();
	let header = emitter.emit(&ensemble).header;
	assert!(header.contains("inline int forest_tree0("));
	assert!(header.contains("        return 0;\n"));
	assert!(header.contains("        return 1;\n"));
	assert!(!header.contains("std::vector<float> {"));
}
