use common::PipelineConfig;

const CORE_WEIGHT: u32 = 3;
const GENERAL_WEIGHT: u32 = 2;
const PERIPHERAL_WEIGHT: u32 = 1;

/// Lexical relevance filter for crypto news.
///
/// Keywords are matched as lowercase substrings of `title + " " + body`. Each configured
/// crypto keyword counts once, weighted by its tier; exclusion keywords veto the item
/// when enough of them are present.
#[derive(Debug, Clone)]
pub struct RelevanceClassifier {
    crypto_keywords: Vec<String>,
    exclude_keywords: Vec<String>,
    core_keywords: Vec<String>,
    general_keywords: Vec<String>,
    exclude_threshold: u32,
    relevance_threshold: u32,
}

fn lowercase_all(items: &[String]) -> Vec<String> {
    items
        .iter()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

impl RelevanceClassifier {
    pub fn from_config(cfg: &PipelineConfig) -> Self {
        Self {
            crypto_keywords: lowercase_all(&cfg.crypto_keywords),
            exclude_keywords: lowercase_all(&cfg.exclude_keywords),
            core_keywords: lowercase_all(&cfg.core_keywords),
            general_keywords: lowercase_all(&cfg.general_keywords),
            exclude_threshold: cfg.exclude_threshold,
            relevance_threshold: cfg.relevance_threshold,
        }
    }

    fn haystack(title: &str, body: &str) -> String {
        format!("{} {}", title, body).to_lowercase()
    }

    fn weight_of(&self, keyword: &str) -> u32 {
        if self.core_keywords.iter().any(|k| k == keyword) {
            CORE_WEIGHT
        } else if self.general_keywords.iter().any(|k| k == keyword) {
            GENERAL_WEIGHT
        } else {
            PERIPHERAL_WEIGHT
        }
    }

    /// Number of distinct exclusion keywords found in the text.
    pub fn exclusion_hits(&self, title: &str, body: &str) -> u32 {
        let text = Self::haystack(title, body);
        self.exclude_keywords.iter().filter(|k| text.contains(k.as_str())).count() as u32
    }

    /// Tier-weighted keyword score of the text.
    pub fn score(&self, title: &str, body: &str) -> u32 {
        let text = Self::haystack(title, body);
        self.crypto_keywords
            .iter()
            .filter(|k| text.contains(k.as_str()))
            .map(|k| self.weight_of(k))
            .sum()
    }

    pub fn is_relevant(&self, title: &str, body: &str, crypto_only: bool) -> bool {
        if crypto_only {
            return true;
        }
        if title.trim().is_empty() && body.trim().is_empty() {
            return false;
        }
        if self.exclusion_hits(title, body) >= self.exclude_threshold {
            return false;
        }
        self.score(title, body) >= self.relevance_threshold
    }
}
