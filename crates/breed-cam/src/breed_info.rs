//! Descriptions shown next to a prediction. Consulted by callers, not by the classifier.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use serde::{Deserialize, Serialize};
use crate::error::StartupError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreedInfo {
	pub origin: String,
	pub farmer_look_for: String,
	pub uniqueness: String,
}

impl BreedInfo {
	/// Returned for breeds the catalog does not describe.
	pub fn placeholder() -> Self {
		Self {
			origin: "N/A".to_string(),
			farmer_look_for: "No detailed information available for this breed in the database.".to_string(),
			uniqueness: "N/A".to_string(),
		}
	}
}

#[derive(Debug, Clone, Default)]
pub struct BreedCatalog {
	entries: HashMap<String, BreedInfo>,
}

impl BreedCatalog {
	/// Reads a JSON object of `breed -> {origin, farmer_look_for, uniqueness}`.
	pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, StartupError> {
		let reader = BufReader::new(File::open(path)?);
		let entries = serde_json::from_reader(reader).map_err(StartupError::Catalog)?;
		Ok(Self { entries })
	}

	pub fn from_entries<I: IntoIterator<Item = (String, BreedInfo)>>(entries: I) -> Self {
		Self { entries: entries.into_iter().collect() }
	}

	pub fn lookup(&self, breed: &str) -> Cow<'_, BreedInfo> {
		match self.entries.get(breed) {
			Some(info) => Cow::Borrowed(info),
			None => Cow::Owned(BreedInfo::placeholder()),
		}
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}
}
