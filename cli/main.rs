//! This module contains the main entrypoint to the grove cli.

use self::config::{load_config, Config};
use anyhow::{format_err, Context, Result};
use clap::Clap;
use colored::Colorize;
use grove_emit::{CppEmitter, Emitter};
use grove_tree::{Aggregation, Ensemble, EnsembleKind, ModelFile, SammeOptions};
use std::path::{Path, PathBuf};

mod config;

#[derive(Clap)]
#[clap(
	about = "Compile tree ensembles into stand-alone decision logic.",
	setting = clap::AppSettings::DisableHelpSubcommand,
)]
enum Options {
	#[clap(name = "emit")]
	Emit(Box<EmitOptions>),
	#[clap(name = "compile")]
	Compile(Box<CompileOptions>),
	#[clap(name = "classify")]
	Classify(Box<ClassifyOptions>),
}

#[derive(Clap, Debug)]
#[clap(about = "emit C++ code for a model")]
#[clap(long_about = "emit a C++ header with one function per tree and a source file with the ensemble's entry point")]
struct EmitOptions {
	#[clap(about = "the path to your model .json file")]
	file: PathBuf,
	#[clap(short = 't', long, about = "the data type of the features, float by default")]
	data_type: Option<String>,
	#[clap(
		short = 'f',
		long = "new-file",
		about = "the name of the generated files, forest or adaboost by default"
	)]
	name: Option<String>,
	#[clap(short, long, about = "the directory to write the generated files to")]
	output: Option<PathBuf>,
	#[clap(short, long, about = "the path to a config file")]
	config: Option<PathBuf>,
	#[clap(long, about = "the ensemble kind, random_forest or adaboost")]
	kind: Option<EnsembleKind>,
}

#[derive(Clap, Debug)]
#[clap(about = "compile a model to decision procedures")]
#[clap(long_about = "compile a model and write its decision procedures as json")]
struct CompileOptions {
	#[clap(about = "the path to your model .json file")]
	file: PathBuf,
	#[clap(short, long, about = "the path to write the .json file to")]
	output: Option<PathBuf>,
	#[clap(short, long, about = "the path to a config file")]
	config: Option<PathBuf>,
	#[clap(long, about = "the ensemble kind, random_forest or adaboost")]
	kind: Option<EnsembleKind>,
}

#[derive(Clap, Debug)]
#[clap(about = "classify a feature vector")]
struct ClassifyOptions {
	#[clap(about = "the path to your model .json file")]
	file: PathBuf,
	#[clap(long, about = "the comma separated feature values")]
	features: String,
	#[clap(short, long, about = "the path to a config file")]
	config: Option<PathBuf>,
	#[clap(long, about = "the ensemble kind, random_forest or adaboost")]
	kind: Option<EnsembleKind>,
}

fn main() {
	let env = env_logger::Env::default().default_filter_or("grove=info");
	env_logger::Builder::from_env(env)
		.format_level(false)
		.format_module_path(false)
		.format_timestamp(None)
		.init();
	let options = Options::parse();
	let result = match options {
		Options::Emit(options) => cli_emit(*options),
		Options::Compile(options) => cli_compile(*options),
		Options::Classify(options) => cli_classify(*options),
	};
	if let Err(error) = result {
		eprintln!("{}: {:#}", "error".red().bold(), error);
		std::process::exit(1);
	}
}

fn cli_emit(options: EmitOptions) -> Result<()> {
	let config = load_config(options.config.as_deref())?.unwrap_or_default();
	let model = load_model(&options.file)?;
	let kind = options.kind.or(config.kind).unwrap_or(model.kind);
	let ensemble = compile_model(&model, kind, &config)?;
	let default_name = match kind {
		EnsembleKind::RandomForest => "forest",
		EnsembleKind::AdaBoost => "adaboost",
	};
	let emitter = CppEmitter::new(
		options
			.data_type
			.or(config.data_type)
			.unwrap_or_else(|| "float".to_owned()),
		options
			.name
			.or(config.name)
			.unwrap_or_else(|| default_name.to_owned()),
	)?;
	let output_dir = match options.output.or(config.output) {
		Some(output_dir) => output_dir,
		None => std::env::current_dir()?,
	};
	emitter.emit(&ensemble).write(&output_dir)?;
	log::info!(
		"{} saved",
		match kind {
			EnsembleKind::RandomForest => "forest",
			EnsembleKind::AdaBoost => "classifier",
		}
	);
	Ok(())
}

fn cli_compile(options: CompileOptions) -> Result<()> {
	let config = load_config(options.config.as_deref())?.unwrap_or_default();
	let model = load_model(&options.file)?;
	let kind = options.kind.or(config.kind).unwrap_or(model.kind);
	let ensemble = compile_model(&model, kind, &config)?;
	let json = serde_json::to_string_pretty(&ensemble)?;
	match options.output {
		Some(output_path) => {
			std::fs::write(&output_path, json)
				.with_context(|| format!("failed to write {}", output_path.display()))?;
			log::info!("wrote {}", output_path.display());
		}
		None => println!("{}", json),
	}
	Ok(())
}

fn cli_classify(options: ClassifyOptions) -> Result<()> {
	let config = load_config(options.config.as_deref())?.unwrap_or_default();
	let model = load_model(&options.file)?;
	let kind = options.kind.or(config.kind).unwrap_or(model.kind);
	let ensemble = compile_model(&model, kind, &config)?;
	let features = parse_features(&options.features)?;
	let class_index = classify_features(&ensemble, &features)?;
	println!("{}", class_index);
	Ok(())
}

/// Evaluate the trees once, log the scores, and select the class from them.
fn classify_features(ensemble: &Ensemble, features: &[f32]) -> Result<usize> {
	let scores = ensemble.scores(features)?;
	log::debug!("scores {:?}", scores);
	Ok(ensemble.aggregation().select(&scores))
}

fn load_model(path: &Path) -> Result<ModelFile> {
	let json = std::fs::read_to_string(path)
		.with_context(|| format!("failed to read model file {}", path.display()))?;
	let model = ModelFile::from_json(&json)
		.with_context(|| format!("failed to parse model file {}", path.display()))?;
	Ok(model)
}

fn compile_model(model: &ModelFile, kind: EnsembleKind, config: &Config) -> Result<Ensemble> {
	let forest = model.forest().context("failed to load the trees")?;
	let mut aggregation = Aggregation::for_kind(kind);
	if let (Aggregation::SammeFusion(options), Some(epsilon)) =
		(&mut aggregation, config.samme_epsilon)
	{
		*options = SammeOptions::new(epsilon).context("invalid samme_epsilon in the config")?;
	}
	Ok(Ensemble::compile(&forest, aggregation))
}

fn parse_features(features: &str) -> Result<Vec<f32>> {
	features
		.split(',')
		.map(|value| {
			let value = value.trim();
			value
				.parse::<f32>()
				.map_err(|_| format_err!("failed to parse feature value \"{}\"", value))
		})
		.collect()
}

#[test]
fn test_parse_features() {
	assert_eq!(parse_features("1.5, -2,3e2").unwrap(), vec![1.5, -2.0, 300.0]);
	assert!(parse_features("1.5,,2").is_err());
	assert!(parse_features("one").is_err());
}

#[test]
fn test_compile_model_uses_config_epsilon() {
	let model = ModelFile::from_json(
		r#"{
			"kind": "adaboost",
			"trees": [{
				"children_left": [-1],
				"children_right": [-1],
				"feature": [-2],
				"threshold": [-2.0],
				"value": [[1.0, 0.0]]
			}]
		}"#,
	)
	.unwrap();
	let config = Config {
		samme_epsilon: Some(1e-3),
		..Default::default()
	};
	let ensemble = compile_model(&model, EnsembleKind::AdaBoost, &config).unwrap();
	assert_eq!(
		ensemble.aggregation(),
		Aggregation::SammeFusion(SammeOptions::new(1e-3).unwrap())
	);
	let ensemble = compile_model(&model, EnsembleKind::RandomForest, &config).unwrap();
	assert_eq!(ensemble.aggregation(), Aggregation::MajorityVote);
	assert_eq!(ensemble.classify(&[]).unwrap(), 0);
}

#[test]
fn test_compile_model_rejects_invalid_epsilon() {
	let model = ModelFile::from_json(
		r#"{
			"kind": "adaboost",
			"trees": [{
				"children_left": [-1],
				"children_right": [-1],
				"feature": [-2],
				"threshold": [-2.0],
				"value": [[0.0, 10.0]]
			}]
		}"#,
	)
	.unwrap();
	for &epsilon in &[0.0, -1.0] {
		let config = Config {
			samme_epsilon: Some(epsilon),
			..Default::default()
		};
		assert!(compile_model(&model, EnsembleKind::AdaBoost, &config).is_err());
		// Majority voting does not use the epsilon.
		assert!(compile_model(&model, EnsembleKind::RandomForest, &config).is_ok());
	}
	let ensemble = compile_model(&model, EnsembleKind::AdaBoost, &Config::default()).unwrap();
	assert_eq!(ensemble.classify(&[]).unwrap(), 1);
}

#[test]
fn test_classify_features() {
	let model = ModelFile::from_json(
		r#"{
			"kind": "random_forest",
			"trees": [{
				"children_left": [1, -1, -1],
				"children_right": [2, -1, -1],
				"feature": [1, -2, -2],
				"threshold": [0.5, -2.0, -2.0],
				"value": [[5.0, 5.0], [4.0, 1.0], [1.0, 4.0]]
			}]
		}"#,
	)
	.unwrap();
	for &kind in &[EnsembleKind::RandomForest, EnsembleKind::AdaBoost] {
		let ensemble = compile_model(&model, kind, &Config::default()).unwrap();
		for features in &[vec![0.0, 0.0], vec![0.0, 1.0]] {
			assert_eq!(
				classify_features(&ensemble, features).unwrap(),
				ensemble.classify(features).unwrap()
			);
		}
		assert_eq!(classify_features(&ensemble, &[0.0, 1.0]).unwrap(), 1);
		assert!(classify_features(&ensemble, &[0.0]).is_err());
	}
}
