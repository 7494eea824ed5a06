// ABOUTME: Persona (character card) the bot speaks as
// ABOUTME: Loaded from a JSON character card file

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Placeholder replaced by the persona's name in prompts and memory
pub const CHAR_PLACEHOLDER: &str = "{{char}}";

/// The bot's character identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub personality: String,
    #[serde(default)]
    pub scenario: String,
    /// Opening line when the chat is empty
    #[serde(default)]
    pub first_mes: String,
}

impl Persona {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            personality: String::new(),
            scenario: String::new(),
            first_mes: String::new(),
        }
    }

    /// Load a character card from a JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read character card {}", path.display()))?;
        let persona: Persona = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse character card {}", path.display()))?;
        if persona.name.trim().is_empty() {
            anyhow::bail!("Character card {} has an empty name", path.display());
        }
        Ok(persona)
    }

    /// Replace every `{{char}}` with the persona's name
    pub fn substitute(&self, text: &str) -> String {
        text.replace(CHAR_PLACEHOLDER, &self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substitute() {
        let persona = Persona::new("Aiko");
        assert_eq!(
            persona.substitute("{{char}} waves. {{char}} smiles."),
            "Aiko waves. Aiko smiles."
        );
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aiko.json");
        std::fs::write(
            &path,
            r#"{"name":"Aiko","description":"A cheerful barista","personality":"warm","scenario":"a cafe","first_mes":"Welcome!"}"#,
        )
        .unwrap();
        let persona = Persona::from_file(&path).unwrap();
        assert_eq!(persona.name, "Aiko");
        assert_eq!(persona.scenario, "a cafe");
    }

    #[test]
    fn test_from_file_missing_optional_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("min.json");
        std::fs::write(&path, r#"{"name":"Min"}"#).unwrap();
        let persona = Persona::from_file(&path).unwrap();
        assert_eq!(persona, Persona::new("Min"));
    }

    #[test]
    fn test_from_file_rejects_empty_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blank.json");
        std::fs::write(&path, r#"{"name":"  "}"#).unwrap();
        assert!(Persona::from_file(&path).is_err());
    }
}
