use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Raw upload staged on disk for the duration of one request.
///
/// The file is removed when the artifact is dropped, on every exit path of the request.
#[derive(Debug)]
pub struct UploadArtifact {
	path: PathBuf,
}

impl UploadArtifact {
	pub fn stage<P: AsRef<Path>>(dir: P, bytes: &[u8]) -> io::Result<Self> {
		let dir = dir.as_ref();
		fs::create_dir_all(dir)?;

		// Guard first so a partial write is cleaned up too
		let artifact = Self { path: dir.join(format!("{}.upload", Uuid::new_v4())) };
		fs::write(&artifact.path, bytes)?;
		log::debug!("Staged {} bytes at {}", bytes.len(), artifact.path.display());

		Ok(artifact)
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	pub fn read(&self) -> io::Result<Vec<u8>> {
		fs::read(&self.path)
	}
}

impl Drop for UploadArtifact {
	fn drop(&mut self) {
		match fs::remove_file(&self.path) {
			Ok(()) => log::debug!("Removed upload {}", self.path.display()),
			Err(err) if err.kind() == io::ErrorKind::NotFound => {
				log::debug!("Upload {} already removed", self.path.display())
			}
			Err(err) => log::warn!("Could not remove upload {}: {err}", self.path.display()),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_removed_on_drop() {
		let dir = tempfile::tempdir().unwrap();
		let artifact = UploadArtifact::stage(dir.path(), b"bytes").unwrap();
		let path = artifact.path().to_path_buf();

		assert_eq!(artifact.read().unwrap(), b"bytes");
		drop(artifact);

		assert!(!path.exists());
	}

	#[test]
	fn test_creates_missing_directory() {
		let dir = tempfile::tempdir().unwrap();
		let nested = dir.path().join("a").join("b");

		let artifact = UploadArtifact::stage(&nested, b"x").unwrap();

		assert!(artifact.path().starts_with(&nested));
	}

	#[test]
	fn test_already_removed_is_ignored() {
		let dir = tempfile::tempdir().unwrap();
		let artifact = UploadArtifact::stage(dir.path(), b"x").unwrap();

		fs::remove_file(artifact.path()).unwrap();
		drop(artifact);
	}

	#[test]
	fn test_names_do_not_collide() {
		let dir = tempfile::tempdir().unwrap();
		let a = UploadArtifact::stage(dir.path(), b"a").unwrap();
		let b = UploadArtifact::stage(dir.path(), b"b").unwrap();

		assert_ne!(a.path(), b.path());
		assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 2);
	}
}
