//! Deterministic adversarial perturbations.
//!
//! Randomness comes from a SHA-256 counter stream, so a given seed always
//! yields the same perturbed text.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Perturbation family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttackType {
    NoiseInjection,
    SemanticPerturbation,
    LogicalManipulation,
    EvidencePoisoning,
    ConfidenceAttack,
    MultilingualAttack,
    ContextManipulation,
}

impl AttackType {
    pub const ALL: [AttackType; 7] = [
        AttackType::NoiseInjection,
        AttackType::SemanticPerturbation,
        AttackType::LogicalManipulation,
        AttackType::EvidencePoisoning,
        AttackType::ConfidenceAttack,
        AttackType::MultilingualAttack,
        AttackType::ContextManipulation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AttackType::NoiseInjection => "noise_injection",
            AttackType::SemanticPerturbation => "semantic_perturbation",
            AttackType::LogicalManipulation => "logical_manipulation",
            AttackType::EvidencePoisoning => "evidence_poisoning",
            AttackType::ConfidenceAttack => "confidence_attack",
            AttackType::MultilingualAttack => "multilingual_attack",
            AttackType::ContextManipulation => "context_manipulation",
        }
    }
}

impl std::fmt::Display for AttackType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AttackType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AttackType::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| format!("Unknown attack type: {}", s))
    }
}

/// Noise injection variant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoiseMode {
    #[default]
    Character,
    Word,
    Punctuation,
}

/// Semantic perturbation variant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticMode {
    #[default]
    Synonyms,
    SentenceReordering,
}

/// Logical manipulation variant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalMode {
    #[default]
    FalsePremises,
    CircularReasoning,
    StrawMan,
}

/// Evidence poisoning variant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceMode {
    #[default]
    FakeSources,
    BiasedQuotes,
}

/// Multilingual attack variant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MultilingualMode {
    #[default]
    CodeSwitching,
    ForeignCharacters,
}

/// Context manipulation variant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextMode {
    #[default]
    Irrelevant,
    Emotional,
}

/// Knobs for every attack family.
///
/// Each family has a `*_mode` selecting its variant; the defaults pick the
/// first variant listed on each mode enum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttackParams {
    pub seed: u64,
    pub noise_mode: NoiseMode,
    pub semantic_mode: SemanticMode,
    pub logical_mode: LogicalMode,
    pub evidence_mode: EvidenceMode,
    pub multilingual_mode: MultilingualMode,
    pub context_mode: ContextMode,
    /// Fraction of characters touched by noise injection.
    pub noise_level: f64,
    /// Chance that a word with a known synonym is replaced.
    pub replacement_rate: f64,
    pub num_premises: usize,
    pub num_sources: usize,
    /// Boost confidence (`true`) or hedge it (`false`).
    pub boost: bool,
    /// Language mixed in by the multilingual attack (`es` or `fr`).
    pub target_language: String,
    /// Approximate characters of irrelevant context to prepend.
    pub context_length: usize,
}

impl Default for AttackParams {
    fn default() -> Self {
        Self {
            seed: 42,
            noise_mode: NoiseMode::default(),
            semantic_mode: SemanticMode::default(),
            logical_mode: LogicalMode::default(),
            evidence_mode: EvidenceMode::default(),
            multilingual_mode: MultilingualMode::default(),
            context_mode: ContextMode::default(),
            noise_level: 0.1,
            replacement_rate: 0.3,
            num_premises: 2,
            num_sources: 3,
            boost: true,
            target_language: "es".to_string(),
            context_length: 100,
        }
    }
}

// ============================================================================
// Seeded randomness
// ============================================================================

/// SHA-256 counter-mode byte stream.
pub struct SeededRng {
    key: [u8; 32],
    counter: u64,
    block: [u8; 32],
    offset: usize,
}

impl SeededRng {
    /// Stream for `seed`, separated by `label` so different cases do not
    /// share draws.
    pub fn new(seed: u64, label: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(seed.to_le_bytes());
        hasher.update(label.as_bytes());
        Self {
            key: hasher.finalize().into(),
            counter: 0,
            block: [0; 32],
            offset: 32,
        }
    }

    pub fn next_u64(&mut self) -> u64 {
        if self.offset + 8 > self.block.len() {
            let mut hasher = Sha256::new();
            hasher.update(self.key);
            hasher.update(self.counter.to_le_bytes());
            self.block = hasher.finalize().into();
            self.counter += 1;
            self.offset = 0;
        }
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&self.block[self.offset..self.offset + 8]);
        self.offset += 8;
        u64::from_le_bytes(bytes)
    }

    /// Uniform in `[0, 1)`.
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Uniform in `0..n`; `0` when `n == 0`.
    pub fn below(&mut self, n: usize) -> usize {
        if n == 0 {
            return 0;
        }
        (self.next_u64() % n as u64) as usize
    }

    pub fn pick<'a>(&mut self, items: &[&'a str]) -> &'a str {
        items.get(self.below(items.len())).copied().unwrap_or("")
    }

    /// Fisher-Yates shuffle.
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        for i in (1..items.len()).rev() {
            let j = self.below(i + 1);
            items.swap(i, j);
        }
    }
}

// ============================================================================
// Word lists
// ============================================================================

const SYNONYMS: &[(&str, &[&str])] = &[
    ("good", &["excellent", "great", "wonderful", "fantastic"]),
    ("bad", &["terrible", "awful", "horrible", "dreadful"]),
    ("big", &["large", "huge", "enormous", "massive"]),
    ("small", &["tiny", "little", "miniature", "petite"]),
    ("fast", &["quick", "rapid", "swift", "speedy"]),
    ("slow", &["sluggish", "lethargic", "tardy"]),
    ("important", &["crucial", "vital", "essential", "critical"]),
    ("difficult", &["challenging", "hard", "tough", "arduous"]),
    ("easy", &["simple", "straightforward", "effortless"]),
    ("safe", &["secure", "harmless", "protected"]),
    ("round", &["spherical", "circular", "globular"]),
    ("flat", &["level", "planar", "even"]),
];

const WORD_SUBSTITUTIONS: &[(&str, &[&str])] = &[
    ("the", &["a", "an", "some"]),
    ("is", &["are", "was", "were"]),
    ("and", &["or", "but", "yet"]),
    ("not", &["never", "no", "none"]),
    ("very", &["extremely", "highly", "quite"]),
    ("good", &["great", "excellent", "wonderful"]),
    ("bad", &["terrible", "awful", "horrible"]),
    ("big", &["large", "huge", "enormous"]),
    ("small", &["tiny", "little", "miniature"]),
];

const FALSE_PREMISES: &[&str] = &[
    "Studies have shown that",
    "Research indicates that",
    "Experts agree that",
    "It is well-known that",
    "Statistics prove that",
    "Data shows that",
    "Evidence suggests that",
    "Analysis reveals that",
];

const FAKE_SOURCES: &[&str] = &[
    "According to a study by Harvard University",
    "Research from MIT shows that",
    "A report from Stanford indicates",
    "Studies from Oxford University prove",
    "Data from Cambridge University reveals",
    "Analysis from Yale University suggests",
    "Findings from Princeton University show",
    "Research from Caltech demonstrates",
];

const BIASED_QUOTES: &[&str] = &[
    "\"This is definitely true\" - Expert",
    "\"The evidence is overwhelming\" - Scientist",
    "\"This is beyond doubt\" - Researcher",
    "\"The data is conclusive\" - Analyst",
    "\"This is irrefutable\" - Specialist",
];

const STRAW_MEN: &[&str] = &[
    "Some people might say that",
    "Critics argue that",
    "Opponents claim that",
    "Detractors suggest that",
    "Skeptics believe that",
];

const COUNTER_ARGUMENTS: &[&str] = &[
    "but this is clearly wrong because",
    "however, this is not true since",
    "but this is a misunderstanding because",
    "however, this is incorrect as",
    "but this is false because",
];

const BOOSTERS: &[&str] = &[
    "It is absolutely certain that",
    "There is no doubt that",
    "It is completely clear that",
    "It is undeniably true that",
    "It is beyond question that",
];

const HEDGES: &[&str] = &[
    "It might be possible that",
    "There could be a chance that",
    "Perhaps",
    "It seems like",
    "It appears that",
];

const CODE_SWITCH_ES: &[(&str, &str)] = &[
    ("the", "el"),
    ("and", "y"),
    ("is", "es"),
    ("are", "son"),
    ("good", "bueno"),
    ("bad", "malo"),
    ("true", "verdadero"),
    ("false", "falso"),
    ("important", "importante"),
];

const CODE_SWITCH_FR: &[(&str, &str)] = &[
    ("the", "le"),
    ("and", "et"),
    ("is", "est"),
    ("are", "sont"),
    ("good", "bon"),
    ("bad", "mauvais"),
    ("true", "vrai"),
    ("false", "faux"),
    ("important", "important"),
];

const IRRELEVANT_CONTEXT: &[&str] = &[
    "The weather today is sunny and warm.",
    "I had a great breakfast this morning.",
    "The traffic was terrible on my way to work.",
    "My favorite color is blue.",
    "I love listening to music.",
    "The stock market is doing well today.",
    "I need to buy groceries later.",
    "My dog is very cute.",
];

const EMOTIONAL_PREFIXES: &[&str] = &[
    "This is absolutely outrageous!",
    "I can't believe this is happening!",
    "This is so frustrating!",
    "I'm really excited about this!",
    "This is incredibly important!",
    "I'm deeply concerned about this!",
    "This is truly amazing!",
    "I'm shocked by this!",
];

const FOREIGN_CHARS: &[char] = &[
    'à', 'á', 'â', 'ã', 'ä', 'å', 'æ', 'ç', 'è', 'é', 'ê', 'ë', 'ì', 'í', 'î', 'ï', 'ð', 'ñ',
    'ò', 'ó', 'ô', 'õ', 'ö', 'ø', 'ù', 'ú', 'û', 'ü', 'ý', 'þ', 'ÿ',
];

const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
const PUNCTUATION: &[char] = &['.', ',', '!', '?', ';', ':'];

// ============================================================================
// Perturbations
// ============================================================================

fn sentences(text: &str) -> Vec<String> {
    text.split(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn join_sentences(sentences: &[String]) -> String {
    format!("{}.", sentences.join(". "))
}

/// Split a word into lowercase core and trailing punctuation.
fn split_word(word: &str) -> (String, &str) {
    let core = word.trim_end_matches(PUNCTUATION);
    (core.to_lowercase(), &word[core.len()..])
}

fn replace_words<F>(text: &str, mut replace: F) -> String
where
    F: FnMut(&str) -> Option<String>,
{
    text.split_whitespace()
        .map(|word| {
            let (core, suffix) = split_word(word);
            match replace(&core) {
                Some(replacement) => format!("{}{}", replacement, suffix),
                None => word.to_string(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn character_noise(text: &str, level: f64, rng: &mut SeededRng) -> String {
    let mut chars: Vec<char> = text.chars().collect();
    let changes = (chars.len() as f64 * level.max(0.0)) as usize;
    for _ in 0..changes {
        if chars.is_empty() {
            break;
        }
        let pos = rng.below(chars.len());
        if !chars[pos].is_alphabetic() {
            continue;
        }
        let letter = LETTERS[rng.below(LETTERS.len())] as char;
        let roll = rng.next_f64();
        if roll < 0.5 {
            chars[pos] = letter;
        } else if roll < 0.65 {
            chars.remove(pos);
        } else {
            chars.insert(pos, letter);
        }
    }
    chars.into_iter().collect()
}

fn synonym_replacement(text: &str, rate: f64, rng: &mut SeededRng) -> String {
    replace_words(text, |core| {
        let (_, options) = SYNONYMS.iter().find(|(word, _)| *word == core)?;
        (rng.next_f64() < rate).then(|| rng.pick(options).to_string())
    })
}

fn false_premises(text: &str, count: usize, rng: &mut SeededRng) -> String {
    let mut parts = sentences(text);
    for _ in 0..count {
        let pos = rng.below(parts.len() + 1);
        parts.insert(pos, format!("{} this is true", rng.pick(FALSE_PREMISES)));
    }
    join_sentences(&parts)
}

fn fake_sources(text: &str, count: usize, rng: &mut SeededRng) -> String {
    let mut parts = sentences(text);
    for _ in 0..count.min(parts.len()) {
        let pos = rng.below(parts.len());
        parts[pos] = format!("{}, {}", rng.pick(FAKE_SOURCES), parts[pos]);
    }
    join_sentences(&parts)
}

fn confidence_phrases(text: &str, boost: bool, rng: &mut SeededRng) -> String {
    let phrases = if boost { BOOSTERS } else { HEDGES };
    let mut parts = sentences(text);
    if parts.is_empty() {
        return text.to_string();
    }
    let pos = rng.below(parts.len());
    let phrase = rng.pick(phrases);
    parts[pos] = format!("{} {}", phrase, lowercase_first(&parts[pos]));
    join_sentences(&parts)
}

fn code_switching(text: &str, language: &str, rng: &mut SeededRng) -> String {
    let table = match language {
        "es" => CODE_SWITCH_ES,
        "fr" => CODE_SWITCH_FR,
        _ => return text.to_string(),
    };
    replace_words(text, |core| {
        let (_, foreign) = table.iter().find(|(word, _)| *word == core)?;
        (rng.next_f64() < 0.3).then(|| foreign.to_string())
    })
}

fn irrelevant_context(text: &str, length: usize, rng: &mut SeededRng) -> String {
    let count = (length / 20).max(1);
    let context: Vec<&str> = (0..count).map(|_| rng.pick(IRRELEVANT_CONTEXT)).collect();
    format!("{} {}", context.join(" "), text)
}

fn word_noise(text: &str, level: f64, rng: &mut SeededRng) -> String {
    let mut words: Vec<String> = text.split_whitespace().map(str::to_string).collect();
    let changes = (words.len() as f64 * level.max(0.0)) as usize;
    for _ in 0..changes {
        if words.is_empty() {
            break;
        }
        let pos = rng.below(words.len());
        let (core, _) = split_word(&words[pos]);
        if let Some((_, options)) = WORD_SUBSTITUTIONS.iter().find(|(word, _)| *word == core) {
            words[pos] = rng.pick(options).to_string();
        } else if rng.next_f64() < 0.3 {
            let (inserted, _) = WORD_SUBSTITUTIONS[rng.below(WORD_SUBSTITUTIONS.len())];
            words.insert(pos, inserted.to_string());
        } else if rng.next_f64() < 0.2 {
            words.remove(pos);
        }
    }
    words.join(" ")
}

fn punctuation_noise(text: &str, level: f64, rng: &mut SeededRng) -> String {
    let mut chars: Vec<char> = text.chars().collect();
    let changes = (chars.len() as f64 * level.max(0.0)) as usize;
    for _ in 0..changes {
        if chars.is_empty() {
            break;
        }
        let pos = rng.below(chars.len());
        if rng.next_f64() < 0.5 {
            chars.insert(pos, PUNCTUATION[rng.below(PUNCTUATION.len())]);
        } else if PUNCTUATION.contains(&chars[pos]) {
            chars.remove(pos);
        }
    }
    chars.into_iter().collect()
}

/// Shuffle interior sentences; the first and last stay put.
fn sentence_reordering(text: &str, rng: &mut SeededRng) -> String {
    let mut parts = sentences(text);
    if parts.len() <= 1 {
        return text.to_string();
    }
    if parts.len() > 2 {
        let last = parts.len() - 1;
        rng.shuffle(&mut parts[1..last]);
    }
    join_sentences(&parts)
}

fn lowercase_first(sentence: &str) -> String {
    let mut chars = sentence.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Restate the first sentence as its own justification.
fn circular_reasoning(text: &str) -> String {
    let mut parts = sentences(text);
    let Some(claim) = parts.first().map(|c| lowercase_first(c)) else {
        return text.to_string();
    };
    let additions = [
        format!("This proves that {} is correct", claim),
        format!("The evidence for this is that {}", claim),
        format!("This is true because {}", claim),
    ];
    for addition in additions {
        parts.insert(1, addition);
    }
    join_sentences(&parts)
}

/// Attack a made-up opposing position after the first sentence.
fn straw_man(text: &str, rng: &mut SeededRng) -> String {
    let mut parts = sentences(text);
    if parts.is_empty() {
        return text.to_string();
    }
    let position = rng.pick(STRAW_MEN);
    let counter = rng.pick(COUNTER_ARGUMENTS);
    parts.insert(1, format!("{} this is wrong", position));
    parts.insert(2, format!("{} the evidence shows otherwise", capitalize(counter)));
    join_sentences(&parts)
}

fn capitalize(phrase: &str) -> String {
    let mut chars = phrase.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn biased_quotes(text: &str, rng: &mut SeededRng) -> String {
    let mut parts = sentences(text);
    if parts.is_empty() {
        return text.to_string();
    }
    for quote in BIASED_QUOTES {
        let pos = rng.below(parts.len());
        parts[pos] = format!("{} {}", parts[pos], quote);
    }
    join_sentences(&parts)
}

fn foreign_characters(text: &str, rng: &mut SeededRng) -> String {
    text.chars()
        .map(|c| {
            if c.is_alphabetic() && rng.next_f64() < 0.1 {
                FOREIGN_CHARS[rng.below(FOREIGN_CHARS.len())]
            } else {
                c
            }
        })
        .collect()
}

fn emotional_context(text: &str, rng: &mut SeededRng) -> String {
    format!("{} {}", rng.pick(EMOTIONAL_PREFIXES), text)
}

/// Apply one attack to `text`, in the variant `params` selects.
pub fn perturb(attack: AttackType, text: &str, params: &AttackParams, rng: &mut SeededRng) -> String {
    match attack {
        AttackType::NoiseInjection => match params.noise_mode {
            NoiseMode::Character => character_noise(text, params.noise_level, rng),
            NoiseMode::Word => word_noise(text, params.noise_level, rng),
            NoiseMode::Punctuation => punctuation_noise(text, params.noise_level, rng),
        },
        AttackType::SemanticPerturbation => match params.semantic_mode {
            SemanticMode::Synonyms => synonym_replacement(text, params.replacement_rate, rng),
            SemanticMode::SentenceReordering => sentence_reordering(text, rng),
        },
        AttackType::LogicalManipulation => match params.logical_mode {
            LogicalMode::FalsePremises => false_premises(text, params.num_premises, rng),
            LogicalMode::CircularReasoning => circular_reasoning(text),
            LogicalMode::StrawMan => straw_man(text, rng),
        },
        AttackType::EvidencePoisoning => match params.evidence_mode {
            EvidenceMode::FakeSources => fake_sources(text, params.num_sources, rng),
            EvidenceMode::BiasedQuotes => biased_quotes(text, rng),
        },
        AttackType::ConfidenceAttack => confidence_phrases(text, params.boost, rng),
        AttackType::MultilingualAttack => match params.multilingual_mode {
            MultilingualMode::CodeSwitching => code_switching(text, &params.target_language, rng),
            MultilingualMode::ForeignCharacters => foreign_characters(text, rng),
        },
        AttackType::ContextManipulation => match params.context_mode {
            ContextMode::Irrelevant => irrelevant_context(text, params.context_length, rng),
            ContextMode::Emotional => emotional_context(text, rng),
        },
    }
}

// ============================================================================
// Synthetic suites
// ============================================================================

/// Claims synthetic suites draw from.
pub const SYNTHETIC_CLAIMS: &[&str] = &[
    "The Earth is round and orbits around the Sun.",
    "Climate change is caused by human activities.",
    "Vaccines are safe and effective for preventing diseases.",
    "The COVID-19 pandemic has affected global economies.",
    "Artificial intelligence will transform many industries.",
    "Renewable energy sources are becoming more cost-effective.",
    "Social media has both positive and negative impacts on society.",
    "Education is essential for personal and societal development.",
    "Technology has improved healthcare outcomes significantly.",
    "Globalization has increased international trade and cooperation.",
];

/// One perturbation to run: which text, which attack, which knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteCase {
    pub input_index: usize,
    pub text: String,
    pub attack_type: AttackType,
    pub params: AttackParams,
    /// Separates this case's random stream from its neighbours'.
    pub label: String,
}

impl SuiteCase {
    /// Perturbed text for this case. Same case, same output.
    pub fn perturbed_text(&self) -> String {
        let mut rng = SeededRng::new(self.params.seed, &self.label);
        perturb(self.attack_type, &self.text, &self.params, &mut rng)
    }
}

/// Attack configurations synthetic suites draw from.
fn synthetic_configs() -> Vec<(AttackType, AttackParams)> {
    let base = AttackParams::default();
    let with = |f: &dyn Fn(&mut AttackParams)| {
        let mut params = base.clone();
        f(&mut params);
        params
    };
    vec![
        (AttackType::NoiseInjection, with(&|p| p.noise_level = 0.1)),
        (AttackType::NoiseInjection, with(&|p| p.noise_level = 0.2)),
        (AttackType::NoiseInjection, with(&|p| p.noise_mode = NoiseMode::Word)),
        (AttackType::NoiseInjection, with(&|p| p.noise_mode = NoiseMode::Punctuation)),
        (AttackType::SemanticPerturbation, with(&|p| p.replacement_rate = 0.3)),
        (AttackType::SemanticPerturbation, with(&|p| p.replacement_rate = 0.5)),
        (
            AttackType::SemanticPerturbation,
            with(&|p| p.semantic_mode = SemanticMode::SentenceReordering),
        ),
        (AttackType::LogicalManipulation, with(&|p| p.num_premises = 2)),
        (AttackType::LogicalManipulation, with(&|p| p.num_premises = 4)),
        (
            AttackType::LogicalManipulation,
            with(&|p| p.logical_mode = LogicalMode::CircularReasoning),
        ),
        (AttackType::LogicalManipulation, with(&|p| p.logical_mode = LogicalMode::StrawMan)),
        (AttackType::EvidencePoisoning, with(&|p| p.num_sources = 3)),
        (AttackType::EvidencePoisoning, with(&|p| p.num_sources = 5)),
        (
            AttackType::EvidencePoisoning,
            with(&|p| p.evidence_mode = EvidenceMode::BiasedQuotes),
        ),
        (AttackType::ConfidenceAttack, with(&|p| p.boost = true)),
        (AttackType::ConfidenceAttack, with(&|p| p.boost = false)),
        (AttackType::MultilingualAttack, with(&|p| p.target_language = "es".to_string())),
        (AttackType::MultilingualAttack, with(&|p| p.target_language = "fr".to_string())),
        (
            AttackType::MultilingualAttack,
            with(&|p| p.multilingual_mode = MultilingualMode::ForeignCharacters),
        ),
        (AttackType::ContextManipulation, with(&|p| p.context_length = 100)),
        (AttackType::ContextManipulation, with(&|p| p.context_length = 200)),
        (AttackType::ContextManipulation, with(&|p| p.context_mode = ContextMode::Emotional)),
    ]
}

/// `count` cases drawn from [`SYNTHETIC_CLAIMS`] and a fixed set of attack
/// configurations. Deterministic in `seed`.
pub fn synthetic_cases(count: usize, seed: u64) -> Vec<SuiteCase> {
    let configs = synthetic_configs();
    let mut rng = SeededRng::new(seed, "synthetic");
    (0..count)
        .map(|n| {
            let input_index = rng.below(SYNTHETIC_CLAIMS.len());
            let (attack_type, params) = configs[rng.below(configs.len())].clone();
            SuiteCase {
                input_index,
                text: SYNTHETIC_CLAIMS[input_index].to_string(),
                attack_type,
                params: AttackParams { seed, ..params },
                label: format!("synthetic:{}", n),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLAIM: &str = "The Earth is flat and the Moon is important. Vaccines are safe.";

    #[test]
    fn test_rng_is_deterministic() {
        let mut a = SeededRng::new(7, "case");
        let mut b = SeededRng::new(7, "case");
        let mut c = SeededRng::new(7, "other");
        let draws_a: Vec<u64> = (0..10).map(|_| a.next_u64()).collect();
        let draws_b: Vec<u64> = (0..10).map(|_| b.next_u64()).collect();
        let draws_c: Vec<u64> = (0..10).map(|_| c.next_u64()).collect();
        assert_eq!(draws_a, draws_b);
        assert_ne!(draws_a, draws_c);
    }

    #[test]
    fn test_rng_ranges() {
        let mut rng = SeededRng::new(1, "range");
        for _ in 0..100 {
            let f = rng.next_f64();
            assert!((0.0..1.0).contains(&f));
            assert!(rng.below(5) < 5);
        }
        assert_eq!(rng.below(0), 0);
        assert_eq!(rng.pick(&[]), "");
    }

    #[test]
    fn test_every_attack_is_deterministic() {
        let params = AttackParams::default();
        for attack in AttackType::ALL {
            let a = perturb(attack, CLAIM, &params, &mut SeededRng::new(params.seed, "x"));
            let b = perturb(attack, CLAIM, &params, &mut SeededRng::new(params.seed, "x"));
            assert_eq!(a, b, "attack {} not deterministic", attack);
        }
    }

    #[test]
    fn test_structural_attacks_change_text() {
        let params = AttackParams::default();
        for attack in [
            AttackType::LogicalManipulation,
            AttackType::EvidencePoisoning,
            AttackType::ConfidenceAttack,
            AttackType::ContextManipulation,
        ] {
            let perturbed = perturb(attack, CLAIM, &params, &mut SeededRng::new(3, "y"));
            assert_ne!(perturbed, CLAIM, "attack {} left text unchanged", attack);
        }
    }

    #[test]
    fn test_false_premises_inserted() {
        let params = AttackParams {
            num_premises: 2,
            ..Default::default()
        };
        let perturbed = perturb(
            AttackType::LogicalManipulation,
            "The Earth is flat.",
            &params,
            &mut SeededRng::new(1, "p"),
        );
        assert_eq!(perturbed.matches("this is true").count(), 2);
        assert!(perturbed.contains("The Earth is flat"));
    }

    #[test]
    fn test_full_synonym_rate_replaces_known_words() {
        let params = AttackParams {
            replacement_rate: 1.0,
            ..Default::default()
        };
        let perturbed = perturb(
            AttackType::SemanticPerturbation,
            "The Earth is flat.",
            &params,
            &mut SeededRng::new(1, "s"),
        );
        assert!(perturbed.starts_with("The Earth is "));
        assert!(perturbed.ends_with('.'));
        assert!(!perturbed.contains("flat"));
    }

    #[test]
    fn test_zero_noise_is_identity() {
        let params = AttackParams {
            noise_level: 0.0,
            ..Default::default()
        };
        let perturbed = perturb(
            AttackType::NoiseInjection,
            CLAIM,
            &params,
            &mut SeededRng::new(1, "n"),
        );
        assert_eq!(perturbed, CLAIM);
    }

    #[test]
    fn test_unknown_code_switch_language_is_identity() {
        let params = AttackParams {
            target_language: "xx".to_string(),
            ..Default::default()
        };
        let perturbed = perturb(
            AttackType::MultilingualAttack,
            CLAIM,
            &params,
            &mut SeededRng::new(1, "m"),
        );
        assert_eq!(perturbed, CLAIM);
    }

    #[test]
    fn test_attack_type_parse() {
        for attack in AttackType::ALL {
            assert_eq!(attack.as_str().parse::<AttackType>().unwrap(), attack);
        }
        assert!("sql_injection".parse::<AttackType>().is_err());
    }

    fn params_with(f: impl FnOnce(&mut AttackParams)) -> AttackParams {
        let mut params = AttackParams::default();
        f(&mut params);
        params
    }

    fn run(attack: AttackType, text: &str, params: &AttackParams) -> String {
        perturb(attack, text, params, &mut SeededRng::new(params.seed, "mode"))
    }

    #[test]
    fn test_modes_default_to_first_variant() {
        let params: AttackParams = serde_json::from_str("{}").unwrap();
        assert_eq!(params, AttackParams::default());
        assert_eq!(params.noise_mode, NoiseMode::Character);
        assert_eq!(params.context_mode, ContextMode::Irrelevant);

        let params: AttackParams =
            serde_json::from_str(r#"{"logical_mode": "straw_man", "noise_mode": "word"}"#).unwrap();
        assert_eq!(params.logical_mode, LogicalMode::StrawMan);
        assert_eq!(params.noise_mode, NoiseMode::Word);
    }

    #[test]
    fn test_word_noise_substitutes_known_words() {
        let params = params_with(|p| {
            p.noise_mode = NoiseMode::Word;
            p.noise_level = 0.25;
        });
        // four words at a quarter noise level is exactly one change
        let perturbed = run(AttackType::NoiseInjection, "the the the the", &params);
        let words: Vec<&str> = perturbed.split_whitespace().collect();
        assert_eq!(words.len(), 4);
        assert_eq!(words.iter().filter(|w| **w == "the").count(), 3);
        assert!(words.iter().any(|w| ["a", "an", "some"].contains(w)));
    }

    #[test]
    fn test_punctuation_noise_only_touches_punctuation() {
        let params = params_with(|p| {
            p.noise_mode = NoiseMode::Punctuation;
            p.noise_level = 0.5;
        });
        let perturbed = run(AttackType::NoiseInjection, CLAIM, &params);
        let letters = |s: &str| s.chars().filter(|c| !PUNCTUATION.contains(c)).collect::<String>();
        assert_eq!(letters(&perturbed), letters(CLAIM));
        assert_ne!(perturbed, CLAIM);
    }

    #[test]
    fn test_sentence_reordering_keeps_first_and_last() {
        let params = params_with(|p| p.semantic_mode = SemanticMode::SentenceReordering);
        let text = "First. Two. Three. Four. Five. Last.";
        let perturbed = run(AttackType::SemanticPerturbation, text, &params);
        assert!(perturbed.starts_with("First. "));
        assert!(perturbed.ends_with(" Last."));
        let mut sorted = sentences(&perturbed);
        sorted.sort();
        let mut expected = sentences(text);
        expected.sort();
        assert_eq!(sorted, expected);

        assert_eq!(run(AttackType::SemanticPerturbation, "Alone", &params), "Alone");
    }

    #[test]
    fn test_circular_reasoning_restates_claim() {
        let params = params_with(|p| p.logical_mode = LogicalMode::CircularReasoning);
        let perturbed = run(AttackType::LogicalManipulation, "The Earth is flat. Really.", &params);
        assert_eq!(
            perturbed,
            "The Earth is flat. This is true because the Earth is flat. \
             The evidence for this is that the Earth is flat. \
             This proves that the Earth is flat is correct. Really."
        );
    }

    #[test]
    fn test_straw_man_follows_first_sentence() {
        let params = params_with(|p| p.logical_mode = LogicalMode::StrawMan);
        let perturbed = run(AttackType::LogicalManipulation, CLAIM, &params);
        let parts = sentences(&perturbed);
        assert_eq!(parts[0], "The Earth is flat and the Moon is important");
        assert!(STRAW_MEN.iter().any(|s| parts[1].starts_with(s)));
        assert!(parts[2].ends_with("the evidence shows otherwise"));
        assert_eq!(parts.len(), 4);
    }

    #[test]
    fn test_biased_quotes_all_inserted() {
        let params = params_with(|p| p.evidence_mode = EvidenceMode::BiasedQuotes);
        let perturbed = run(AttackType::EvidencePoisoning, CLAIM, &params);
        for quote in BIASED_QUOTES {
            assert!(perturbed.contains(quote), "missing {quote}");
        }
    }

    #[test]
    fn test_foreign_characters_keep_length() {
        let params = params_with(|p| p.multilingual_mode = MultilingualMode::ForeignCharacters);
        let text = "a".repeat(200);
        let perturbed = run(AttackType::MultilingualAttack, &text, &params);
        assert_eq!(perturbed.chars().count(), 200);
        assert!(perturbed.chars().any(|c| FOREIGN_CHARS.contains(&c)));
        assert!(perturbed.chars().all(|c| c == 'a' || FOREIGN_CHARS.contains(&c)));
    }

    #[test]
    fn test_emotional_context_prefixes_text() {
        let params = params_with(|p| p.context_mode = ContextMode::Emotional);
        let perturbed = run(AttackType::ContextManipulation, CLAIM, &params);
        assert!(perturbed.ends_with(CLAIM));
        assert!(EMOTIONAL_PREFIXES.iter().any(|p| perturbed.starts_with(p)));
    }

    #[test]
    fn test_synthetic_cases_are_deterministic() {
        let first = synthetic_cases(40, 9);
        assert_eq!(first, synthetic_cases(40, 9));
        assert_ne!(first, synthetic_cases(40, 10));
        assert_eq!(first.len(), 40);
        for case in &first {
            assert_eq!(case.text, SYNTHETIC_CLAIMS[case.input_index]);
            assert_eq!(case.params.seed, 9);
            assert_eq!(case.perturbed_text(), case.perturbed_text());
        }
        assert!(synthetic_cases(0, 9).is_empty());
    }
}
