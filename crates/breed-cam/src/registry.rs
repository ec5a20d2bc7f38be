//! Class index <-> breed label mapping saved next to the trained weights.

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use crate::error::RegistryError;

/// Bijection between `0..N` and breed labels. Built once at startup, read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassRegistry {
	labels: Vec<String>,
	indices: HashMap<String, usize>,
}

impl ClassRegistry {
	/// Reads a JSON object of `label -> index` pairs. A label listed twice is rejected.
	pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, RegistryError> {
		let reader = BufReader::new(File::open(path)?);
		let LabelPairs(mapping) = serde_json::from_reader(reader)?;
		Self::from_mapping(mapping)
	}

	pub fn from_mapping<I: IntoIterator<Item = (String, usize)>>(mapping: I) -> Result<Self, RegistryError> {
		let mut indices = HashMap::new();
		for (label, index) in mapping {
			if indices.contains_key(&label) {
				return Err(RegistryError::DuplicateLabel(label));
			}
			indices.insert(label, index);
		}
		let len = indices.len();
		if len == 0 {
			return Err(RegistryError::Empty);
		}

		let mut slots: Vec<Option<&String>> = vec![None; len];
		for (label, &index) in &indices {
			let slot = slots.get_mut(index).ok_or_else(|| RegistryError::IndexOutOfRange {
				label: label.clone(),
				index,
				len,
			})?;
			if let Some(first) = slot.replace(label) {
				return Err(RegistryError::DuplicateIndex {
					index,
					first: first.clone(),
					second: label.clone(),
				});
			}
		}

		// len distinct indices below len: every slot is filled
		let labels = slots.into_iter().flatten().cloned().collect();

		Ok(Self { labels, indices })
	}

	pub fn label(&self, index: usize) -> Result<&str, RegistryError> {
		self.labels
			.get(index)
			.map(String::as_str)
			.ok_or(RegistryError::MissingClass(index))
	}

	pub fn index_of(&self, label: &str) -> Option<usize> {
		self.indices.get(label).copied()
	}

	pub fn labels(&self) -> &[String] {
		&self.labels
	}

	pub fn len(&self) -> usize {
		self.labels.len()
	}

	pub fn is_empty(&self) -> bool {
		self.labels.is_empty()
	}
}

/// Every entry of a JSON object, in file order, duplicates included.
struct LabelPairs(Vec<(String, usize)>);

impl<'de> Deserialize<'de> for LabelPairs {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		struct PairsVisitor;

		impl<'de> Visitor<'de> for PairsVisitor {
			type Value = LabelPairs;

			fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
				formatter.write_str("an object of label -> class index")
			}

			fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<LabelPairs, A::Error> {
				let mut pairs = Vec::with_capacity(map.size_hint().unwrap_or(0));
				while let Some((label, index)) = map.next_entry::<String, usize>()? {
					pairs.push((label, index));
				}
				Ok(LabelPairs(pairs))
			}
		}

		deserializer.deserialize_map(PairsVisitor)
	}
}
