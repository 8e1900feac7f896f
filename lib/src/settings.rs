// Copyright 2020 The Jujutsu Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Query settings loaded from the host's configuration.

#![allow(missing_docs)]

use std::collections::BTreeMap;

use config::ConfigError;
use serde::Deserialize;

/// Settings that affect how revset and fileset expressions are compiled.
#[derive(Debug, Clone)]
pub struct QuerySettings {
    revset_aliases: Vec<(String, String)>,
    fileset_aliases: Vec<(String, String)>,
    old_style_lookup: bool,
}

impl Default for QuerySettings {
    fn default() -> Self {
        QuerySettings {
            revset_aliases: vec![],
            fileset_aliases: vec![],
            old_style_lookup: true,
        }
    }
}

impl QuerySettings {
    /// Reads the `[revsetalias]`, `[filesetalias]`, and `[revset]` tables.
    pub fn from_config(config: &config::Config) -> Result<Self, ConfigError> {
        let revset = match config.get::<RevsetSection>("revset") {
            Ok(section) => section,
            Err(ConfigError::NotFound(_)) => RevsetSection::default(),
            Err(err) => return Err(err),
        };
        Ok(QuerySettings {
            revset_aliases: get_aliases(config, "revsetalias")?,
            fileset_aliases: get_aliases(config, "filesetalias")?,
            old_style_lookup: revset.old_style_lookup,
        })
    }

    /// Parses the settings from a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::from_str(text, config::FileFormat::Toml))
            .build()?;
        Self::from_config(&config)
    }

    /// `(declaration, definition)` pairs sorted by declaration.
    pub fn revset_aliases(&self) -> &[(String, String)] {
        &self.revset_aliases
    }

    pub fn fileset_aliases(&self) -> &[(String, String)] {
        &self.fileset_aliases
    }

    /// Whether the symbol lookup of the repository is consulted while
    /// tokenizing.
    pub fn old_style_lookup(&self) -> bool {
        self.old_style_lookup
    }

    pub fn with_revset_alias(mut self, decl: &str, defn: &str) -> Self {
        self.revset_aliases.push((decl.to_owned(), defn.to_owned()));
        self.revset_aliases.sort();
        self
    }

    pub fn with_fileset_alias(mut self, decl: &str, defn: &str) -> Self {
        self.fileset_aliases.push((decl.to_owned(), defn.to_owned()));
        self.fileset_aliases.sort();
        self
    }

    pub fn with_old_style_lookup(mut self, enabled: bool) -> Self {
        self.old_style_lookup = enabled;
        self
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
struct RevsetSection {
    old_style_lookup: bool,
}

impl Default for RevsetSection {
    fn default() -> Self {
        RevsetSection {
            old_style_lookup: true,
        }
    }
}

fn get_aliases(config: &config::Config, table: &str) -> Result<Vec<(String, String)>, ConfigError> {
    match config.get::<BTreeMap<String, String>>(table) {
        Ok(aliases) => Ok(aliases.into_iter().collect()),
        Err(ConfigError::NotFound(_)) => Ok(vec![]),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use indoc::indoc;

    use super::*;

    #[test]
    fn test_defaults() {
        let settings = QuerySettings::from_toml_str("").unwrap();
        assert!(settings.revset_aliases().is_empty());
        assert!(settings.fileset_aliases().is_empty());
        assert!(settings.old_style_lookup());
    }

    #[test]
    fn test_read_tables() {
        let settings = QuerySettings::from_toml_str(indoc! {r#"
            [revsetalias]
            "mine" = "draft() and head()"
            "f(x)" = "x::"

            [filesetalias]
            "py" = "glob:**.py"

            [revset]
            old-style-lookup = false
        "#})
        .unwrap();
        assert_eq!(
            settings.revset_aliases(),
            [
                ("f(x)".to_owned(), "x::".to_owned()),
                ("mine".to_owned(), "draft() and head()".to_owned()),
            ]
        );
        assert_eq!(
            settings.fileset_aliases(),
            [("py".to_owned(), "glob:**.py".to_owned())]
        );
        assert!(!settings.old_style_lookup());
    }

    #[test]
    fn test_bad_value() {
        let result = QuerySettings::from_toml_str(indoc! {"
            [revset]
            old-style-lookup = [1, 2]
        "});
        assert_matches!(result, Err(_));
    }
}
