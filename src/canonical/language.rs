use std::collections::HashSet;

/// Identifies the language of normalized text.
pub trait LanguageDetector: Send + Sync {
    /// ISO 639-1 code, or `None` when the text gives no signal.
    fn detect(&self, text: &str) -> Option<String>;
}

const STOPWORDS: &[(&str, &[&str])] = &[
    (
        "en",
        &[
            "the", "is", "are", "and", "of", "to", "in", "that", "it", "was", "for", "with",
            "this", "not", "be",
        ],
    ),
    (
        "es",
        &[
            "el", "la", "los", "las", "es", "son", "y", "de", "que", "en", "un", "una", "por",
            "con", "no",
        ],
    ),
    (
        "fr",
        &[
            "le", "la", "les", "est", "sont", "et", "de", "des", "que", "en", "un", "une", "pour",
            "avec", "pas",
        ],
    ),
    (
        "de",
        &[
            "der", "die", "das", "ist", "sind", "und", "von", "zu", "nicht", "mit", "ein", "eine",
            "auf", "den", "dem",
        ],
    ),
    (
        "vi",
        &[
            "là", "và", "của", "có", "không", "được", "những", "các", "một", "trong", "cho",
            "với", "này", "đã", "người",
        ],
    ),
];

/// Votes on language by counting per-language stopword hits.
///
/// Ties resolve in table order, so English wins over languages sharing the
/// same function words.
#[derive(Debug, Clone, Default)]
pub struct StopwordLanguageDetector;

impl StopwordLanguageDetector {
    pub fn new() -> Self {
        Self
    }
}

impl LanguageDetector for StopwordLanguageDetector {
    fn detect(&self, text: &str) -> Option<String> {
        let lowered = text.to_lowercase();
        let words: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();

        let mut best: Option<(&str, usize)> = None;
        for (code, list) in STOPWORDS {
            let set: HashSet<&str> = list.iter().copied().collect();
            let hits = words.iter().filter(|w| set.contains(*w)).count();
            if hits > 0 && best.map_or(true, |(_, h)| hits > h) {
                best = Some((code, hits));
            }
        }

        best.map(|(code, _)| code.to_string())
    }
}
