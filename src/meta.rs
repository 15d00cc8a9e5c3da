//! Tuning parameters for the path engine

use serde::*;

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Debug)]
#[serde(default)]
pub struct Parameters {
	/// Per-service capacity of the alternative-path cache; once full, the
	/// oldest entry is evicted first.
	pub cache_capacity: usize,
}

impl Default for Parameters {
	fn default() -> Self {
		Self { cache_capacity: 1024 }
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn defaults_apply_to_an_empty_document() {
		let p: Parameters = serde_yaml::from_str("{}").unwrap();
		assert_eq!(p, Parameters::default());
		let p: Parameters = serde_yaml::from_str("cache_capacity: 4").unwrap();
		assert_eq!(p.cache_capacity, 4);
	}
}
