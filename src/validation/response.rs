//! Statistical response-quality validation.
//!
//! The full level rejects degenerate model output (loops, symbol spam,
//! truncated or filtered answers, wrong language) using cheap text statistics,
//! cheapest and most decisive first:
//!
//! 1. length
//! 2. gzip compression ratio
//! 3. Shannon entropy over characters
//! 4. character-bigram uniqueness
//! 5. word density
//! 6. finish reason
//!
//! followed by an optional script-ratio language check.

use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::io::Write;
use std::str::FromStr;

use super::language::{requirement_for, script_ratio, strip_code_blocks};

/// How strictly a response is checked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationLevel {
    /// Accept everything.
    None,
    /// Length only.
    Minimal,
    /// All statistical checks.
    #[default]
    #[serde(alias = "v3")]
    Full,
}

impl fmt::Display for ValidationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValidationLevel::None => "none",
            ValidationLevel::Minimal => "minimal",
            ValidationLevel::Full => "full",
        };
        f.write_str(s)
    }
}

impl FromStr for ValidationLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" => Ok(ValidationLevel::None),
            "minimal" => Ok(ValidationLevel::Minimal),
            "full" | "v3" => Ok(ValidationLevel::Full),
            other => Err(format!("unknown validation level '{}'", other)),
        }
    }
}

/// Outcome of a validation: accepted or rejected with a structured reason tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub accepted: bool,
    pub reason: String,
}

impl Verdict {
    /// An accepting verdict.
    pub fn accept() -> Self {
        Self {
            accepted: true,
            reason: "ok".to_string(),
        }
    }

    /// A rejecting verdict.
    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            reason: reason.into(),
        }
    }
}

/// Tunable thresholds.
///
/// The entropy and bigram limits were fit against real failure samples; treat
/// them as corpus-tunable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationThresholds {
    /// Minimum length in characters (minimal and full levels).
    pub min_length: usize,
    /// Reject when raw/gzip size exceeds this.
    pub max_compression_ratio: f64,
    /// Reject when character entropy (bits) is below this.
    pub min_entropy: f64,
    /// Reject when unique/total character bigrams is below this.
    pub min_bigram_uniqueness: f64,
    /// Accepted word-density band (words per character).
    pub min_word_density: f64,
    pub max_word_density: f64,
    /// Text longer than this with no word tokens is rejected.
    pub no_words_min_length: usize,
    /// Minimum share of Cyrillic characters for Cyrillic-script targets.
    pub cyrillic_min_ratio: f64,
    /// Minimum share of Latin characters for Latin-script targets.
    pub latin_min_ratio: f64,
    /// Exclude fenced code blocks from the language ratio.
    pub exempt_code_blocks: bool,
    /// Finish reasons that mean a normal end of generation (case-insensitive).
    pub accepted_finish_reasons: Vec<String>,
}

impl Default for ValidationThresholds {
    fn default() -> Self {
        Self {
            min_length: 100,
            max_compression_ratio: 4.0,
            min_entropy: 2.5,
            min_bigram_uniqueness: 0.02,
            min_word_density: 0.05,
            max_word_density: 0.4,
            no_words_min_length: 100,
            cyrillic_min_ratio: 0.3,
            latin_min_ratio: 0.5,
            exempt_code_blocks: true,
            accepted_finish_reasons: vec!["stop".to_string(), "end_turn".to_string()],
        }
    }
}

/// Text statistics computed by the full level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextMetrics {
    pub char_count: usize,
    pub compression_ratio: f64,
    pub entropy: f64,
    pub bigram_uniqueness: f64,
    pub word_count: usize,
    pub word_density: f64,
}

/// `raw_bytes / gzip_bytes` for the UTF-8 encoding of `text`.
pub fn compression_ratio(text: &str) -> f64 {
    let raw = text.as_bytes();
    if raw.is_empty() {
        return 0.0;
    }
    let mut encoder = GzEncoder::new(Vec::with_capacity(raw.len() / 2), Compression::best());
    // Writing into a Vec cannot fail.
    let compressed_len = match encoder.write_all(raw).and_then(|_| encoder.finish()) {
        Ok(bytes) => bytes.len(),
        Err(_) => return 0.0,
    };
    raw.len() as f64 / compressed_len.max(1) as f64
}

/// Shannon entropy in bits over the character distribution.
pub fn shannon_entropy(text: &str) -> f64 {
    let mut counts: HashMap<char, usize> = HashMap::new();
    let mut total = 0usize;
    for c in text.chars() {
        *counts.entry(c).or_insert(0) += 1;
        total += 1;
    }
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    counts
        .values()
        .map(|&count| {
            let p = count as f64 / total;
            -p * p.log2()
        })
        .sum()
}

/// Unique character bigrams divided by total bigrams (1.0 for texts under two chars).
pub fn bigram_uniqueness(text: &str) -> f64 {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() < 2 {
        return 1.0;
    }
    let unique: HashSet<(char, char)> = chars.windows(2).map(|w| (w[0], w[1])).collect();
    unique.len() as f64 / (chars.len() - 1) as f64
}

/// Number of word tokens (maximal runs of alphanumerics and underscores).
pub fn word_count(text: &str) -> usize {
    let mut count = 0;
    let mut in_word = false;
    for c in text.chars() {
        let word_char = c.is_alphanumeric() || c == '_';
        if word_char && !in_word {
            count += 1;
        }
        in_word = word_char;
    }
    count
}

impl TextMetrics {
    /// Compute every statistic for `text`.
    pub fn compute(text: &str) -> Self {
        let char_count = text.chars().count();
        let words = word_count(text);
        Self {
            char_count,
            compression_ratio: compression_ratio(text),
            entropy: shannon_entropy(text),
            bigram_uniqueness: bigram_uniqueness(text),
            word_count: words,
            word_density: if char_count == 0 {
                0.0
            } else {
                words as f64 / char_count as f64
            },
        }
    }
}

/// Stateless response validator.
///
/// `validate` is a pure function of its arguments and the thresholds the
/// validator was built with.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseValidator {
    thresholds: ValidationThresholds,
}

impl ResponseValidator {
    /// Create a validator with default thresholds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a validator with custom thresholds.
    pub fn with_thresholds(thresholds: ValidationThresholds) -> Self {
        Self { thresholds }
    }

    /// Override the minimum length.
    pub fn with_min_length(mut self, min_length: usize) -> Self {
        self.thresholds.min_length = min_length;
        self
    }

    /// Get the thresholds.
    pub fn thresholds(&self) -> &ValidationThresholds {
        &self.thresholds
    }

    /// Validate `text` at the given level.
    ///
    /// # Arguments
    ///
    /// * `text` - Response text
    /// * `level` - Validation level
    /// * `finish_reason` - Provider finish reason; `None` skips that check
    /// * `target_language` - Expected language; unrecognized values skip the check
    ///
    /// # Example
    ///
    /// ```
    /// use llm_orchestrator::validation::{ResponseValidator, ValidationLevel};
    ///
    /// let validator = ResponseValidator::new();
    /// let verdict = validator.validate(&"-о-".repeat(2000), ValidationLevel::Full, Some("stop"), None);
    /// assert!(!verdict.accepted);
    /// assert!(verdict.reason.starts_with("high_compression"));
    /// ```
    pub fn validate(
        &self,
        text: &str,
        level: ValidationLevel,
        finish_reason: Option<&str>,
        target_language: Option<&str>,
    ) -> Verdict {
        match level {
            ValidationLevel::None => Verdict::accept(),
            ValidationLevel::Minimal => self.check_length(text),
            ValidationLevel::Full => self.validate_full(text, finish_reason, target_language),
        }
    }

    fn check_length(&self, text: &str) -> Verdict {
        let len = text.chars().count();
        if len < self.thresholds.min_length {
            Verdict::reject(format!(
                "too_short ({} < {})",
                len, self.thresholds.min_length
            ))
        } else {
            Verdict::accept()
        }
    }

    fn validate_full(
        &self,
        text: &str,
        finish_reason: Option<&str>,
        target_language: Option<&str>,
    ) -> Verdict {
        let t = &self.thresholds;
        let content = text.trim();
        if content.is_empty() {
            return Verdict::reject("empty_or_invalid");
        }

        let length = self.check_length(content);
        if !length.accepted {
            return length;
        }

        let ratio = compression_ratio(content);
        if ratio > t.max_compression_ratio {
            return Verdict::reject(format!("high_compression ({:.2})", ratio));
        }

        let entropy = shannon_entropy(content);
        if entropy < t.min_entropy {
            return Verdict::reject(format!("low_entropy ({:.2})", entropy));
        }

        let uniqueness = bigram_uniqueness(content);
        if uniqueness < t.min_bigram_uniqueness {
            return Verdict::reject(format!("repetitive_bigrams ({:.2}%)", uniqueness * 100.0));
        }

        let char_count = content.chars().count();
        let words = word_count(content);
        if words == 0 {
            if char_count > t.no_words_min_length {
                return Verdict::reject("no_words");
            }
        } else {
            let density = words as f64 / char_count as f64;
            if density < t.min_word_density {
                return Verdict::reject(format!("low_word_density ({:.2}%)", density * 100.0));
            }
            if density > t.max_word_density {
                return Verdict::reject(format!("high_word_density ({:.2}%)", density * 100.0));
            }
        }

        if let Some(reason) = finish_reason {
            let normal = t
                .accepted_finish_reasons
                .iter()
                .any(|accepted| accepted.eq_ignore_ascii_case(reason));
            if !normal {
                return Verdict::reject(format!("bad_finish_reason ({})", reason));
            }
        }

        if let Some(language) = target_language {
            if let Some(verdict) = self.check_language(content, language) {
                return verdict;
            }
        }

        tracing::trace!(
            chars = char_count,
            compression = ratio,
            entropy = entropy,
            "Content validation passed"
        );
        Verdict::accept()
    }

    /// Returns a rejection if the language requirement is not met.
    fn check_language(&self, content: &str, language: &str) -> Option<Verdict> {
        let requirement = requirement_for(language)?;
        let prose = if self.thresholds.exempt_code_blocks {
            strip_code_blocks(content)
        } else {
            std::borrow::Cow::Borrowed(content)
        };
        let prose = prose.trim();
        if prose.is_empty() {
            return None;
        }

        let min_ratio = match requirement.script {
            super::language::Script::Cyrillic => self.thresholds.cyrillic_min_ratio,
            super::language::Script::Latin => self.thresholds.latin_min_ratio,
        };
        let ratio = script_ratio(prose, requirement.script);
        if ratio > min_ratio {
            None
        } else {
            Some(Verdict::reject(format!(
                "not_{} ({:.1}%)",
                requirement.name,
                ratio * 100.0
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENGLISH: &str = "The orchestrator sends each request to a backend chosen by model name. \
        When a reply arrives, a validator measures how compressible the text is, how varied its \
        characters are, and whether the words look like natural language. Rejected replies are \
        retried a few times with growing pauses before a second model is tried instead. Every \
        attempt is written to disk so engineers can inspect what went wrong later.";

    const RUSSIAN: &str = "Оркестратор отправляет каждый запрос поставщику, выбранному по имени \
        модели. Когда приходит ответ, проверка оценивает, насколько хорошо сжимается текст, \
        насколько разнообразны его символы и похожи ли слова на естественный язык. Отклонённые \
        ответы повторяются несколько раз с растущими паузами, после чего пробуется запасная модель.";

    fn full(text: &str, finish: Option<&str>, lang: Option<&str>) -> Verdict {
        ResponseValidator::new().validate(text, ValidationLevel::Full, finish, lang)
    }

    #[test]
    fn test_none_accepts_everything() {
        let validator = ResponseValidator::new();
        assert!(validator.validate("", ValidationLevel::None, None, None).accepted);
        assert!(
            validator
                .validate("aaaa", ValidationLevel::None, Some("MAX_TOKENS"), Some("ru"))
                .accepted
        );
    }

    #[test]
    fn test_minimal_is_length_only() {
        let validator = ResponseValidator::new().with_min_length(10);
        for len in 0..30 {
            let text = "x".repeat(len);
            let verdict = validator.validate(&text, ValidationLevel::Minimal, None, None);
            assert_eq!(verdict.accepted, len >= 10, "len={}", len);
        }
        // Character count, not bytes.
        assert!(
            validator
                .validate(&"ж".repeat(10), ValidationLevel::Minimal, None, None)
                .accepted
        );
    }

    #[test]
    fn test_natural_text_passes_full() {
        assert_eq!(full(ENGLISH, Some("stop"), Some("en")), Verdict::accept());
        assert_eq!(full(RUSSIAN, Some("STOP"), Some("ru")), Verdict::accept());
        assert_eq!(full(ENGLISH, None, None), Verdict::accept());
    }

    #[test]
    fn test_empty_and_short() {
        assert_eq!(full("   \n ", None, None).reason, "empty_or_invalid");
        assert_eq!(full("Short answer.", None, None).reason, "too_short (13 < 100)");
    }

    #[test]
    fn test_length_measured_after_trimming() {
        let prose = "A short reply which the model padded out with newlines.";
        assert_eq!(prose.chars().count(), 55);
        let padded = format!("{}{}", prose, "\n".repeat(60));
        assert_eq!(
            full(&padded, Some("stop"), None).reason,
            "too_short (55 < 100)"
        );
    }

    #[test]
    fn test_repeated_dash_motif_is_high_compression() {
        let verdict = full(&"-о-".repeat(2000), Some("stop"), None);
        assert!(!verdict.accepted);
        assert!(verdict.reason.starts_with("high_compression ("), "{}", verdict.reason);
        assert!(compression_ratio(&"-о-".repeat(2000)) > 4.0);
    }

    #[test]
    fn test_short_token_repetition_rejected_by_compression() {
        for token in ["a", "ab", "xyz", "о", "-о", "1 2"] {
            let text = token.repeat(500);
            let verdict = full(&text, Some("stop"), None);
            assert!(!verdict.accepted, "token {:?}", token);
            assert!(
                verdict.reason.starts_with("high_compression"),
                "token {:?}: {}",
                token,
                verdict.reason
            );
        }
    }

    #[test]
    fn test_low_entropy_when_compression_disabled() {
        let validator = ResponseValidator::with_thresholds(ValidationThresholds {
            max_compression_ratio: f64::MAX,
            ..ValidationThresholds::default()
        });
        let verdict = validator.validate(&"ab ".repeat(100), ValidationLevel::Full, None, None);
        assert!(verdict.reason.starts_with("low_entropy ("), "{}", verdict.reason);
    }

    #[test]
    fn test_bad_finish_reason() {
        assert_eq!(
            full(ENGLISH, Some("MAX_TOKENS"), None).reason,
            "bad_finish_reason (MAX_TOKENS)"
        );
        assert_eq!(
            full(ENGLISH, Some("content_filter"), None).reason,
            "bad_finish_reason (content_filter)"
        );
        assert!(full(ENGLISH, Some("end_turn"), None).accepted);
        assert!(full(ENGLISH, Some("END_TURN"), None).accepted);
    }

    #[test]
    fn test_latin_text_is_not_russian() {
        let verdict = full(ENGLISH, Some("stop"), Some("ru"));
        assert_eq!(verdict.reason, "not_russian (0.0%)");
    }

    #[test]
    fn test_cyrillic_text_is_not_english() {
        let verdict = full(RUSSIAN, Some("stop"), Some("english"));
        assert!(verdict.reason.starts_with("not_english ("), "{}", verdict.reason);
    }

    #[test]
    fn test_unknown_language_skipped() {
        assert!(full(RUSSIAN, Some("stop"), Some("klingon")).accepted);
    }

    #[test]
    fn test_code_blocks_exempt_from_language_ratio() {
        let text = concat!(
            "Пример запуска сервиса приведён ниже, он читает настройки из окружения.\n",
            "```rust\n",
            "fn main() {\n",
            "    let config = Config::from_env().expect(\"config\");\n",
            "    let client = reqwest::Client::builder().timeout(Duration::from_secs(30)).build()?;\n",
            "    for url in config.urls.iter().filter(|u| u.starts_with(\"https\")) {\n",
            "        println!(\"fetching {url}\");\n",
            "    }\n",
            "}\n",
            "```"
        );
        assert!(full(text, Some("stop"), Some("ru")).accepted);

        let strict = ResponseValidator::with_thresholds(ValidationThresholds {
            exempt_code_blocks: false,
            ..ValidationThresholds::default()
        });
        let verdict = strict.validate(text, ValidationLevel::Full, Some("stop"), Some("ru"));
        assert!(verdict.reason.starts_with("not_russian ("), "{}", verdict.reason);
    }

    #[test]
    fn test_validate_is_pure() {
        let validator = ResponseValidator::new();
        let inputs = [ENGLISH, RUSSIAN, "short", ""];
        for text in inputs {
            let first = validator.validate(text, ValidationLevel::Full, Some("stop"), Some("ru"));
            let second = validator.validate(text, ValidationLevel::Full, Some("stop"), Some("ru"));
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_level_parsing() {
        assert_eq!("v3".parse::<ValidationLevel>(), Ok(ValidationLevel::Full));
        assert_eq!("Minimal".parse::<ValidationLevel>(), Ok(ValidationLevel::Minimal));
        assert!("strict".parse::<ValidationLevel>().is_err());
        let level: ValidationLevel = serde_json::from_str("\"v3\"").expect("alias");
        assert_eq!(level, ValidationLevel::Full);
    }

    #[test]
    fn test_metrics() {
        assert_eq!(shannon_entropy("aaaa"), 0.0);
        assert!((shannon_entropy("abab") - 1.0).abs() < 1e-9);
        assert!((bigram_uniqueness("aaaa") - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(word_count("hello, world_2 — ok"), 3);
        let metrics = TextMetrics::compute(ENGLISH);
        assert!(metrics.word_density > 0.1 && metrics.word_density < 0.3);
    }
}
