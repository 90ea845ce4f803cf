/*!
This module defines the `Config` struct, which is read from an optional YAML file. Every value can also be given on the command line, which takes precedence.
*/

use anyhow::{Context, Result};
use grove_tree::EnsembleKind;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, PartialEq, serde::Deserialize)]
pub struct Config {
	/// The element type of the feature vector in the generated code.
	pub data_type: Option<String>,
	/// The stem of the generated files.
	pub name: Option<String>,
	/// The directory to write the generated files to.
	pub output: Option<PathBuf>,
	/// Overrides the ensemble kind stored in the model file.
	pub kind: Option<EnsembleKind>,
	/// The floor applied to zero probabilities in SAMME fusion.
	pub samme_epsilon: Option<f32>,
}

pub fn load_config(config_path: Option<&Path>) -> Result<Option<Config>> {
	if let Some(config_path) = config_path {
		let config = std::fs::read_to_string(config_path)
			.with_context(|| format!("failed to read config file {}", config_path.display()))?;
		let config = serde_yaml::from_str(&config)
			.with_context(|| format!("failed to parse config file {}", config_path.display()))?;
		Ok(Some(config))
	} else {
		Ok(None)
	}
}

#[test]
fn test_parse_config() {
	let config: Config = serde_yaml::from_str(
		"data_type: int\nname: iris\nkind: adaboost\nsamme_epsilon: 1.0e-10\n",
	)
	.unwrap();
	assert_eq!(
		config,
		Config {
			data_type: Some("int".to_owned()),
			name: Some("iris".to_owned()),
			output: None,
			kind: Some(EnsembleKind::AdaBoost),
			samme_epsilon: Some(1.0e-10),
		}
	);
}

#[test]
fn test_missing_config() {
	assert_eq!(load_config(None).unwrap(), None);
	assert!(load_config(Some(Path::new("/nonexistent/grove.yaml"))).is_err());
}
