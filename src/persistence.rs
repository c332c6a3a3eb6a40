//! Persisted JSON schemas (spec.md §6): the character registry produced by
//! `analyze` and the transformed book produced by `transform` are each
//! serialized as a self-describing file with a format version, so a later
//! run can load a previously analyzed cast without re-issuing provider
//! calls.

use crate::data::{CharacterRegistry, TransformedBook};
use crate::exceptions::{CastError, CastResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

const CHARACTER_FILE_VERSION: &str = "1";
const TRANSFORMED_BOOK_FILE_VERSION: &str = "1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterFile {
    pub format_version: String,
    pub registry: CharacterRegistry,
}

impl CharacterFile {
    pub fn new(registry: CharacterRegistry) -> Self {
        Self {
            format_version: CHARACTER_FILE_VERSION.to_string(),
            registry,
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> CastResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> CastResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let file: Self = serde_json::from_str(&raw)?;
        if file.format_version != CHARACTER_FILE_VERSION {
            return Err(CastError::Config(format!(
                "unsupported character file version '{}'",
                file.format_version
            )));
        }
        Ok(file)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformedBookFile {
    pub format_version: String,
    pub transformed: TransformedBook,
}

impl TransformedBookFile {
    pub fn new(transformed: TransformedBook) -> Self {
        Self {
            format_version: TRANSFORMED_BOOK_FILE_VERSION.to_string(),
            transformed,
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> CastResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> CastResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let file: Self = serde_json::from_str(&raw)?;
        if file.format_version != TRANSFORMED_BOOK_FILE_VERSION {
            return Err(CastError::Config(format!(
                "unsupported transformed-book file version '{}'",
                file.format_version
            )));
        }
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Character, Gender};

    #[test]
    fn character_file_round_trips_through_disk() {
        let mut registry = CharacterRegistry::new();
        registry.insert(Character::new("Elizabeth Bennet", Gender::Female));
        registry.freeze();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("characters.json");

        CharacterFile::new(registry).save(&path).unwrap();
        let loaded = CharacterFile::load(&path).unwrap();

        assert_eq!(loaded.registry.len(), 1);
        assert!(loaded.registry.get("Elizabeth Bennet").is_some());
    }

    #[test]
    fn load_rejects_mismatched_format_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("characters.json");
        std::fs::write(&path, r#"{"format_version": "99", "registry": {"characters": {}, "frozen": true}}"#).unwrap();

        let result = CharacterFile::load(&path);
        assert!(result.is_err());
    }
}
