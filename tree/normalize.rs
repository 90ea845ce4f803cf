/// Divide each class count by the sum of the counts. If the counts sum to exactly zero, the normalizer is 1.0 and the zero vector is returned unchanged.
pub fn normalize(counts: &[f32]) -> Vec<f32> {
	let sum = counts.iter().sum::<f32>();
	let normalizer = if sum == 0.0 { 1.0 } else { sum };
	counts.iter().map(|count| count / normalizer).collect()
}

#[test]
fn test_normalize() {
	let probabilities = normalize(&[3.0, 1.0]);
	assert_eq!(probabilities, vec![0.75, 0.25]);
	let probabilities = normalize(&[7.0, 11.0, 13.0, 0.0]);
	let sum = probabilities.iter().sum::<f32>();
	assert!((sum - 1.0).abs() < 1e-6);
	assert!(probabilities.iter().all(|p| (0.0..=1.0).contains(p)));
}

#[test]
fn test_normalize_zero_counts() {
	let probabilities = normalize(&[0.0, 0.0, 0.0]);
	assert_eq!(probabilities, vec![0.0, 0.0, 0.0]);
	assert!(probabilities.iter().all(|p| !p.is_nan()));
}
