use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const QUESTION_HASH_LEN: usize = 16;

/// Deterministic fingerprint of a question prompt, used to group the
/// "same" question across sessions. Not a uniqueness or security key.
pub fn question_hash(prompt: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(prompt.trim().as_bytes());
    let digest = hex::encode(hasher.finalize().as_bytes());
    digest[..QUESTION_HASH_LEN].to_string()
}

pub fn new_session_id() -> String {
    format!("sess_{}", Uuid::new_v4().simple())
}

pub fn new_presentation_id(module_id: &str) -> String {
    format!("pres_{}_{}", module_id, Uuid::new_v4().simple())
}

/// File-backed stand-in for browser local storage: one session id per
/// install and one presentation id per module, created on first use and
/// reused afterwards.
#[derive(Debug, Serialize, Deserialize)]
pub struct IdentityFile {
    pub session_id: String,
    #[serde(default)]
    pub presentation_ids: BTreeMap<String, String>,
    #[serde(skip)]
    path: PathBuf,
}

impl IdentityFile {
    pub fn load_or_generate(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("failed to read identity file: {}", path.display()))?;
            let mut file: IdentityFile =
                serde_json::from_str(&contents).context("invalid identity file")?;
            file.path = path.to_path_buf();
            Ok(file)
        } else {
            let file = IdentityFile {
                session_id: new_session_id(),
                presentation_ids: BTreeMap::new(),
                path: path.to_path_buf(),
            };
            file.write()?;
            Ok(file)
        }
    }

    pub fn presentation_id(&mut self, module_id: &str) -> Result<String> {
        if let Some(existing) = self.presentation_ids.get(module_id) {
            return Ok(existing.clone());
        }
        let id = new_presentation_id(module_id);
        self.presentation_ids
            .insert(module_id.to_string(), id.clone());
        self.write()?;
        Ok(id)
    }

    fn write(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create identity directory: {}", parent.display())
            })?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&self.path, json)
            .with_context(|| format!("failed to write identity file: {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn question_hash_is_deterministic_and_trims_whitespace() {
        let a = question_hash("How clear was the positioning?");
        let b = question_hash("  How clear was the positioning?  ");
        assert_eq!(a, b);
        assert_eq!(a.len(), QUESTION_HASH_LEN);
    }

    #[test]
    fn question_hash_differs_for_different_prompts() {
        assert_ne!(question_hash("Question A?"), question_hash("Question B?"));
    }

    #[test]
    fn new_session_id_has_expected_shape() {
        let id = new_session_id();
        assert!(id.starts_with("sess_"));
        assert!(id.len() > "sess_".len());
    }

    #[test]
    fn identity_file_persists_session_and_presentation_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");

        let mut first = IdentityFile::load_or_generate(&path).unwrap();
        let session_id = first.session_id.clone();
        let pres_id = first.presentation_id("module-01").unwrap();
        assert!(pres_id.starts_with("pres_module-01_"));

        let mut second = IdentityFile::load_or_generate(&path).unwrap();
        assert_eq!(second.session_id, session_id);
        assert_eq!(second.presentation_id("module-01").unwrap(), pres_id);
    }

    #[test]
    fn identity_file_generates_distinct_ids_per_module() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");

        let mut file = IdentityFile::load_or_generate(&path).unwrap();
        let a = file.presentation_id("module-a").unwrap();
        let b = file.presentation_id("module-b").unwrap();
        assert_ne!(a, b);
    }
}
