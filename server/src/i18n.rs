//! Translation of server messages into each player's language.
//!
//! Messages are built from English msgids. A catalog maps msgids to
//! translations for one language; catalogs are loaded from
//! `<dir>/<language>.json` files holding a flat JSON object. Lookups for a
//! missing language or msgid fall back to the English text.

use crate::error::ServerError;
use log::{debug, warn};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;

/// A translatable message: one or more msgids joined by a space, with named
/// `{placeholder}` arguments substituted after translation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    parts: Vec<&'static str>,
    args: Vec<(&'static str, String)>,
}

impl Message {
    pub fn new(msgid: &'static str) -> Self {
        Self {
            parts: vec![msgid],
            args: Vec::new(),
        }
    }

    /// Appends another sentence.
    pub fn then(mut self, msgid: &'static str) -> Self {
        self.parts.push(msgid);
        self
    }

    pub fn arg(mut self, name: &'static str, value: impl ToString) -> Self {
        self.args.push((name, value.to_string()));
        self
    }

    pub fn parts(&self) -> &[&'static str] {
        &self.parts
    }

    fn substitute(&self, mut text: String) -> String {
        for (name, value) in &self.args {
            text = text.replace(&format!("{{{}}}", name), value);
        }
        text
    }
}

impl From<&'static str> for Message {
    fn from(msgid: &'static str) -> Self {
        Message::new(msgid)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.substitute(self.parts.join(" ")))
    }
}

/// Language a player asked to be addressed in. The default is English.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Locale(Option<String>);

impl Locale {
    pub fn new(language: impl Into<String>) -> Self {
        Locale(Some(language.into()))
    }

    pub fn language(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(transparent)]
struct Catalog(HashMap<String, String>);

#[derive(Debug, Default)]
pub struct Localizer {
    catalogs: HashMap<String, Catalog>,
}

impl Localizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every `*.json` catalog in `dir`; the file stem is the language.
    pub fn load_dir(dir: &Path) -> Result<Self, ServerError> {
        let mut localizer = Self::new();
        let entries = fs::read_dir(dir).map_err(|source| ServerError::LocaleIo {
            path: dir.to_path_buf(),
            source,
        })?;

        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let Some(language) = path.file_stem().and_then(|stem| stem.to_str()) else {
                warn!("Skipping locale catalog with unusable name {}", path.display());
                continue;
            };

            let text = fs::read_to_string(&path).map_err(|source| ServerError::LocaleIo {
                path: path.clone(),
                source,
            })?;
            let catalog: Catalog =
                serde_json::from_str(&text).map_err(|source| ServerError::LocaleParse {
                    path: path.clone(),
                    source,
                })?;

            debug!("Loaded {} translations for '{}'", catalog.0.len(), language);
            localizer.catalogs.insert(language.to_string(), catalog);
        }

        Ok(localizer)
    }

    pub fn insert_catalog(
        &mut self,
        language: impl Into<String>,
        entries: HashMap<String, String>,
    ) {
        self.catalogs.insert(language.into(), Catalog(entries));
    }

    pub fn has_language(&self, language: &str) -> bool {
        self.catalogs.contains_key(language)
    }

    pub fn gettext<'a>(&'a self, locale: &Locale, msgid: &'a str) -> &'a str {
        locale
            .language()
            .and_then(|language| self.catalogs.get(language))
            .and_then(|catalog| catalog.0.get(msgid))
            .map(String::as_str)
            .unwrap_or(msgid)
    }

    pub fn render(&self, locale: &Locale, message: &Message) -> String {
        let text = message
            .parts()
            .iter()
            .map(|part| self.gettext(locale, part))
            .collect::<Vec<_>>()
            .join(" ");
        message.substitute(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn german() -> Localizer {
        let mut localizer = Localizer::new();
        localizer.insert_catalog(
            "de",
            HashMap::from([
                ("Wrong password".to_string(), "Falsches Passwort".to_string()),
                (
                    "Game is full".to_string(),
                    "Das Spiel ist voll".to_string(),
                ),
            ]),
        );
        localizer
    }

    #[test]
    fn test_untranslated_falls_back_to_english() {
        let localizer = german();
        let message = Message::new("Game has already started. No more joining");
        assert_eq!(
            localizer.render(&Locale::new("de"), &message),
            "Game has already started. No more joining"
        );
        assert_eq!(
            localizer.render(&Locale::default(), &Message::new("Wrong password")),
            "Wrong password"
        );
    }

    #[test]
    fn test_translated_parts_are_joined() {
        let localizer = german();
        let message = Message::new("Game is full").then("Wrong password");
        assert_eq!(
            localizer.render(&Locale::new("de"), &message),
            "Das Spiel ist voll Falsches Passwort"
        );
    }

    #[test]
    fn test_arguments_substituted_after_translation() {
        let mut localizer = Localizer::new();
        localizer.insert_catalog(
            "fr",
            HashMap::from([(
                "You can't run a game with less than {count} players".to_string(),
                "Il faut au moins {count} joueurs".to_string(),
            )]),
        );
        let message =
            Message::new("You can't run a game with less than {count} players").arg("count", 2);

        assert_eq!(
            localizer.render(&Locale::new("fr"), &message),
            "Il faut au moins 2 joueurs"
        );
        assert_eq!(
            message.to_string(),
            "You can't run a game with less than 2 players"
        );
    }

    #[test]
    fn test_load_dir_reads_json_catalogs() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = fs::File::create(dir.path().join("de.json")).unwrap();
        write!(file, r#"{{"Wrong password": "Falsches Passwort"}}"#).unwrap();
        fs::write(dir.path().join("README.txt"), "not a catalog").unwrap();

        let localizer = Localizer::load_dir(dir.path()).unwrap();
        assert!(localizer.has_language("de"));
        assert!(!localizer.has_language("README"));
        assert_eq!(
            localizer.gettext(&Locale::new("de"), "Wrong password"),
            "Falsches Passwort"
        );
    }

    #[test]
    fn test_load_dir_rejects_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("xx.json"), "[1, 2").unwrap();

        let err = Localizer::load_dir(dir.path()).unwrap_err();
        assert!(matches!(err, ServerError::LocaleParse { .. }));
    }
}
