//! Artist/title extraction from file names.

use common::{ParseConfig, ParseStage, Replacement};
use regex::Regex;
use tracing::warn;

const STAGES: [ParseStage; 4] = [
    ParseStage::PreSplit,
    ParseStage::PostSplit,
    ParseStage::Artist,
    ParseStage::Title,
];

#[derive(Debug, thiserror::Error)]
#[error("invalid {stage} replacement {pattern:?}: {source}")]
pub struct ParseConfigError {
    pub stage: ParseStage,
    pub pattern: String,
    #[source]
    pub source: regex::Error,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsedName {
    pub artist: String,
    pub title: String,
}

impl ParsedName {
    /// No delimiter matched and no override supplied an artist.
    pub fn is_unattributed(&self) -> bool {
        self.artist.is_empty()
    }
}

#[derive(Clone, Debug)]
struct Rule {
    regex: Regex,
    replacement: String,
}

/// A compiled [`ParseConfig`]. Stages whose rules failed to compile are
/// left empty.
#[derive(Clone, Debug)]
pub struct TitleParser {
    delimiter: String,
    artist_first: bool,
    artist_override: Option<String>,
    stages: [Vec<Rule>; 4],
}

impl TitleParser {
    pub fn compile(config: &ParseConfig) -> (Self, Vec<ParseConfigError>) {
        let mut errors = Vec::new();
        let mut stages: [Vec<Rule>; 4] = Default::default();

        for (slot, stage) in stages.iter_mut().zip(STAGES) {
            match compile_stage(stage, config.replacements.stage(stage)) {
                Ok(rules) => *slot = rules,
                Err(err) => {
                    warn!("Skipping {} replacements: {}", stage, err);
                    errors.push(err);
                }
            }
        }

        let artist_override = config
            .artist_override
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);

        let parser = Self {
            delimiter: config.delimiter.clone(),
            artist_first: config.artist_first,
            artist_override,
            stages,
        };
        (parser, errors)
    }

    pub fn has_override(&self) -> bool {
        self.artist_override.is_some()
    }

    /// Parses a file name without its extension.
    pub fn parse(&self, name: &str) -> ParsedName {
        let cleaned = self.apply(ParseStage::PreSplit, name);

        let (artist, title) = match self.split(&cleaned) {
            Some((first, second)) if self.artist_first => (first, second),
            Some((first, second)) => (second, first),
            None => (String::new(), cleaned),
        };
        let artist = match &self.artist_override {
            Some(forced) => forced.clone(),
            None => artist,
        };

        let artist = self.apply(ParseStage::PostSplit, &artist);
        let title = self.apply(ParseStage::PostSplit, &title);
        let artist = self.apply(ParseStage::Artist, &artist);
        let title = self.apply(ParseStage::Title, &title);

        ParsedName {
            artist: artist.trim().to_string(),
            title: title.trim().to_string(),
        }
    }

    fn split(&self, value: &str) -> Option<(String, String)> {
        if self.delimiter.is_empty() {
            return None;
        }
        let (first, second) = value.split_once(self.delimiter.as_str())?;
        let (first, second) = (first.trim(), second.trim());
        if first.is_empty() || second.is_empty() {
            return None;
        }
        Some((first.to_string(), second.to_string()))
    }

    fn apply(&self, stage: ParseStage, value: &str) -> String {
        let rules = &self.stages[stage_index(stage)];
        rules.iter().fold(value.to_string(), |acc, rule| {
            rule.regex
                .replace_all(&acc, rule.replacement.as_str())
                .into_owned()
        })
    }
}

fn stage_index(stage: ParseStage) -> usize {
    match stage {
        ParseStage::PreSplit => 0,
        ParseStage::PostSplit => 1,
        ParseStage::Artist => 2,
        ParseStage::Title => 3,
    }
}

fn compile_stage(stage: ParseStage, rules: &[Replacement]) -> Result<Vec<Rule>, ParseConfigError> {
    rules
        .iter()
        .map(|rule| {
            Regex::new(&rule.pattern)
                .map(|regex| Rule {
                    regex,
                    replacement: rule.replacement.clone(),
                })
                .map_err(|source| ParseConfigError {
                    stage,
                    pattern: rule.pattern.clone(),
                    source,
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Replacements;

    fn default_parser() -> TitleParser {
        let (parser, errors) = TitleParser::compile(&ParseConfig::default());
        assert!(errors.is_empty());
        parser
    }

    #[test]
    fn default_config_splits_and_cleans() {
        let parsed = default_parser().parse("Beatles, The - Hey Jude (Karaoke)");
        assert_eq!(parsed.artist, "The Beatles");
        assert_eq!(parsed.title, "Hey Jude");
    }

    #[test]
    fn underscores_and_spacing_collapse() {
        let parsed = default_parser().parse("Queen_-_Bohemian  Rhapsody [HD]");
        assert_eq!(parsed.artist, "Queen");
        assert_eq!(parsed.title, "Bohemian Rhapsody");
    }

    #[test]
    fn only_first_delimiter_splits() {
        let parsed = default_parser().parse("a-ha - Take On Me - Live");
        assert_eq!(parsed.artist, "a");
        assert_eq!(parsed.title, "ha - Take On Me - Live");
    }

    #[test]
    fn missing_delimiter_leaves_artist_empty() {
        let parsed = default_parser().parse("Just A Title");
        assert!(parsed.is_unattributed());
        assert_eq!(parsed.title, "Just A Title");
    }

    #[test]
    fn title_first_and_override() {
        let config = ParseConfig {
            delimiter: " by ".to_string(),
            artist_first: false,
            ..ParseConfig::default()
        };
        let (parser, _) = TitleParser::compile(&config);
        let parsed = parser.parse("Yesterday by The Beatles");
        assert_eq!(parsed.artist, "The Beatles");
        assert_eq!(parsed.title, "Yesterday");

        let config = ParseConfig {
            artist_override: Some("Various".to_string()),
            ..ParseConfig::default()
        };
        let (parser, _) = TitleParser::compile(&config);
        assert!(parser.has_override());
        let parsed = parser.parse("Some Song");
        assert_eq!(parsed.artist, "Various");
        assert_eq!(parsed.title, "Some Song");
    }

    #[test]
    fn override_replaces_only_the_split_artist() {
        let config = ParseConfig {
            artist_override: Some("Various".to_string()),
            ..ParseConfig::default()
        };
        let (parser, _) = TitleParser::compile(&config);
        let parsed = parser.parse("Queen - Bohemian Rhapsody");
        assert_eq!(parsed.artist, "Various");
        assert_eq!(parsed.title, "Bohemian Rhapsody");

        let config = ParseConfig {
            delimiter: " by ".to_string(),
            artist_first: false,
            artist_override: Some("Various".to_string()),
            ..ParseConfig::default()
        };
        let (parser, _) = TitleParser::compile(&config);
        let parsed = parser.parse("Yesterday by The Beatles");
        assert_eq!(parsed.artist, "Various");
        assert_eq!(parsed.title, "Yesterday");
    }

    #[test]
    fn malformed_rule_skips_only_its_stage() {
        let config = ParseConfig {
            replacements: Replacements {
                pre_split: vec![Replacement::strip(r"\s*\(.*\)")],
                title: vec![Replacement::new("(unclosed", "x"), Replacement::new("o", "0")],
                ..Replacements::default()
            },
            ..ParseConfig::default()
        };
        let (parser, errors) = TitleParser::compile(&config);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].stage, ParseStage::Title);

        let parsed = parser.parse("Artist - Song (Live)");
        assert_eq!(parsed.title, "Song");
    }
}
