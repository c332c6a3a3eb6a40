//! Core data model: Book, Chapter, Paragraph, Character, and the types that
//! flow between pipeline stages.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A gender a character may be assigned, either as extracted from the source
/// text or as the target of a transformation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
    Nonbinary,
    Unknown,
}

impl Gender {
    pub fn pronoun_triple(self) -> (&'static str, &'static str, &'static str) {
        match self {
            Gender::Male => ("he", "him", "his"),
            Gender::Female => ("she", "her", "her"),
            Gender::Nonbinary => ("they", "them", "their"),
            Gender::Unknown => ("they", "them", "their"),
        }
    }
}

/// How important a character is to the narrative, as judged by the analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Importance {
    Minor,
    Supporting,
    Main,
}

/// A single sentence. Paragraphs own an ordered list of these.
pub type Sentence = String;

/// An ordered sequence of sentences, the atomic unit of structural
/// preservation across a transform.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paragraph {
    pub sentences: Vec<Sentence>,
}

impl Paragraph {
    pub fn new(sentences: Vec<Sentence>) -> Self {
        Self { sentences }
    }

    pub fn sentence_count(&self) -> usize {
        self.sentences.len()
    }

    pub fn text(&self) -> String {
        self.sentences.join(" ")
    }
}

/// A chapter: an integer or textual number, an optional title, and its
/// paragraphs in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chapter {
    pub number: ChapterNumber,
    pub title: Option<String>,
    pub paragraphs: Vec<Paragraph>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChapterNumber {
    Ordinal(u32),
    Label(String),
}

impl std::fmt::Display for ChapterNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChapterNumber::Ordinal(n) => write!(f, "{n}"),
            ChapterNumber::Label(s) => write!(f, "{s}"),
        }
    }
}

/// Book-level metadata carried through unchanged by every stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BookMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub source: Option<String>,
    pub format_version: Option<String>,
}

/// An ordered sequence of chapters plus metadata. Immutable once parsed —
/// the core never mutates a `Book` in place; every stage produces a new one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Book {
    pub metadata: BookMetadata,
    pub chapters: Vec<Chapter>,
}

impl Book {
    pub fn paragraph_count(&self) -> usize {
        self.chapters.iter().map(|c| c.paragraphs.len()).sum()
    }

    pub fn total_chars(&self) -> usize {
        self.chapters
            .iter()
            .flat_map(|c| &c.paragraphs)
            .flat_map(|p| &p.sentences)
            .map(|s| s.len())
            .sum()
    }

    /// Concatenation of every sentence, used for whole-book token estimates.
    pub fn concatenated_text(&self) -> String {
        let mut out = String::with_capacity(self.total_chars());
        for chapter in &self.chapters {
            for paragraph in &chapter.paragraphs {
                out.push_str(&paragraph.text());
                out.push('\n');
            }
        }
        out
    }
}

/// A normalized position within the book, 0.0 at the first character and 1.0
/// at the last. Used for stratified sampling windows and a character's
/// first-seen position.
pub type NormalizedOffset = f32;

/// The extracted cast member.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Character {
    pub canonical_name: String,
    pub variants: Vec<String>,
    pub gender: Gender,
    pub pronouns: (String, String, String),
    pub titles: Vec<String>,
    pub importance: Importance,
    pub confidence: f32,
    pub first_seen: NormalizedOffset,
}

impl Character {
    pub fn new(canonical_name: impl Into<String>, gender: Gender) -> Self {
        let (s, o, p) = gender.pronoun_triple();
        Self {
            canonical_name: canonical_name.into(),
            variants: Vec::new(),
            gender,
            pronouns: (s.to_string(), o.to_string(), p.to_string()),
            titles: Vec::new(),
            importance: Importance::Minor,
            confidence: 0.5,
            first_seen: 0.0,
        }
    }

    /// The first whitespace-delimited token of the canonical name with any
    /// known title stripped — the anchor for the anti-merge rule.
    pub fn given_name_token(&self) -> &str {
        given_name_token(&self.canonical_name)
    }
}

const KNOWN_TITLES: &[&str] = &[
    "Mr.", "Mrs.", "Ms.", "Miss", "Mx.", "Dr.", "Sir", "Lady", "Lord", "Prof.", "Madam", "Master",
];

/// Strip a leading known title token from a name, if present.
pub fn strip_title(name: &str) -> &str {
    let trimmed = name.trim();
    for title in KNOWN_TITLES {
        if let Some(rest) = trimmed.strip_prefix(title) {
            let rest = rest.trim_start();
            if !rest.is_empty() {
                return rest;
            }
        }
    }
    trimmed
}

/// The first token after title-stripping. "Mr. Harry Potter" -> "Harry".
pub fn given_name_token(name: &str) -> &str {
    strip_title(name)
        .split_whitespace()
        .next()
        .unwrap_or_default()
}

/// A frozen or in-progress mapping from canonical name to `Character`.
///
/// Invariants (enforced by `character_analyzer::build_registry`): every
/// variant appears in exactly one character's variant set; characters
/// with distinct given names are always distinct entries, even when
/// surnames match; once `freeze()` is called the registry is never mutated
/// again.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CharacterRegistry {
    characters: HashMap<String, Character>,
    #[serde(default)]
    frozen: bool,
}

impl CharacterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    /// Insert or replace a character. Panics-free: returns `false` once
    /// frozen instead of mutating.
    pub fn insert(&mut self, character: Character) -> bool {
        if self.frozen {
            return false;
        }
        self.characters
            .insert(character.canonical_name.clone(), character);
        true
    }

    pub fn get(&self, canonical_name: &str) -> Option<&Character> {
        self.characters.get(canonical_name)
    }

    pub fn len(&self) -> usize {
        self.characters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.characters.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Character> {
        self.characters.values()
    }

    /// Find the character whose variant set contains `name_fragment`
    /// (exact, case-sensitive match).
    pub fn find_by_variant(&self, name_fragment: &str) -> Option<&Character> {
        self.characters
            .values()
            .find(|c| c.canonical_name == name_fragment || c.variants.iter().any(|v| v == name_fragment))
    }
}

/// The chosen gender-transformation schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransformSpec {
    AllFemale,
    AllMale,
    GenderSwap,
    Nonbinary,
    Custom {
        /// canonical name -> (new name, new gender)
        mapping: HashMap<String, (Option<String>, Gender)>,
    },
}

impl TransformSpec {
    pub fn label(&self) -> &'static str {
        match self {
            TransformSpec::AllFemale => "ALL_FEMALE",
            TransformSpec::AllMale => "ALL_MALE",
            TransformSpec::GenderSwap => "GENDER_SWAP",
            TransformSpec::Nonbinary => "NONBINARY",
            TransformSpec::Custom { .. } => "CUSTOM",
        }
    }

    /// The target gender for a given character under this transform. `None`
    /// means "leave unchanged" (CUSTOM with no mapping entry, or an
    /// Unknown-gender character under GENDER_SWAP, which declines to guess).
    pub fn target_gender(&self, character: &Character) -> Option<Gender> {
        match self {
            TransformSpec::AllFemale => Some(Gender::Female),
            TransformSpec::AllMale => Some(Gender::Male),
            TransformSpec::Nonbinary => Some(Gender::Nonbinary),
            TransformSpec::GenderSwap => match character.gender {
                Gender::Male => Some(Gender::Female),
                Gender::Female => Some(Gender::Male),
                Gender::Nonbinary => Some(Gender::Nonbinary),
                Gender::Unknown => None,
            },
            TransformSpec::Custom { mapping } => mapping
                .get(&character.canonical_name)
                .map(|(_, gender)| *gender),
        }
    }

    pub fn target_name(&self, character: &Character) -> Option<String> {
        if let TransformSpec::Custom { mapping } = self {
            if let Some((Some(name), _)) = mapping.get(&character.canonical_name) {
                return Some(name.clone());
            }
        }
        None
    }
}

/// The compact "Original -> Target" textual mapping injected into every
/// transform prompt. Deterministic for a given (registry, spec) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterContext {
    pub summary: String,
}

/// A contiguous slice of one chapter's paragraphs, sized to a token budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: uuid::Uuid,
    pub chapter_index: usize,
    pub paragraph_range: std::ops::Range<usize>,
    /// 1-based sentence index -> sentence text, in input order.
    pub sentences: Vec<(usize, Sentence)>,
    pub estimated_tokens: usize,
}

impl Chunk {
    pub fn sentence_indices(&self) -> std::collections::HashSet<usize> {
        self.sentences.iter().map(|(idx, _)| *idx).collect()
    }
}

/// The model's response to a chunk: input sentence index -> transformed
/// sentence. Spec.md's alignment invariant requires the key set to equal the
/// chunk's input index set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransformedChunk {
    pub chunk_id: uuid::Uuid,
    pub sentences: HashMap<usize, Sentence>,
    pub was_fallback: bool,
}

impl TransformedChunk {
    pub fn alignment_ok(&self, chunk: &Chunk) -> bool {
        let expected = chunk.sentence_indices();
        let actual: std::collections::HashSet<usize> = self.sentences.keys().copied().collect();
        expected == actual
    }
}

/// One defect found by the quality controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Defect {
    pub kind: DefectKind,
    pub chapter_index: usize,
    pub paragraph_index: usize,
    pub evidence: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefectKind {
    PronounMismatch,
    TitleMismatch,
    NamedCharacterMismatch,
    AlignmentFallback,
    GrammarAgreement,
}

/// Per-chapter defects plus an overall score in [0, 100].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QualityReport {
    pub defects: Vec<Defect>,
    pub score: f32,
    pub passes_run: usize,
    /// True if the quality-level pass ceiling was hit with defects still
    /// outstanding. Informational — never an error.
    pub budget_exceeded: bool,
}

impl QualityReport {
    pub fn defects_in_chapter(&self, chapter_index: usize) -> Vec<&Defect> {
        self.defects
            .iter()
            .filter(|d| d.chapter_index == chapter_index)
            .collect()
    }
}

/// Metadata attached to the final transformed book.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformationMetadata {
    pub transform_type: String,
    pub model: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub score: f32,
}

/// The output of the pipeline: a `Book` with identical structure to the
/// input plus transformation metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformedBook {
    pub book: Book,
    pub transformation: TransformationMetadata,
}

/// The quality level controls how many QC passes run. Represented as a
/// closed enum rather than a raw iteration count — see DESIGN.md.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityLevel {
    Fast,
    Standard,
    High,
}

impl QualityLevel {
    pub fn max_passes(self) -> usize {
        match self {
            QualityLevel::Fast => 0,
            QualityLevel::Standard => 1,
            QualityLevel::High => 3,
        }
    }

    pub fn mandatory_character_analysis(self) -> bool {
        matches!(self, QualityLevel::High)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_name_token_strips_title() {
        assert_eq!(given_name_token("Mr. Darcy"), "Darcy");
        assert_eq!(given_name_token("Harry Potter"), "Harry");
        assert_eq!(given_name_token("Dr. Sarah Chen"), "Sarah");
    }

    #[test]
    fn anti_merge_distinct_given_names_under_shared_surname() {
        let harry = Character::new("Harry Potter", Gender::Male);
        let lily = Character::new("Lily Potter", Gender::Female);
        assert_ne!(harry.given_name_token(), lily.given_name_token());
    }

    #[test]
    fn registry_rejects_mutation_after_freeze() {
        let mut registry = CharacterRegistry::new();
        registry.insert(Character::new("Elizabeth", Gender::Female));
        registry.freeze();
        assert!(!registry.insert(Character::new("Edward", Gender::Male)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn gender_swap_target_gender_flips_known_genders() {
        let spec = TransformSpec::GenderSwap;
        let male = Character::new("Darcy", Gender::Male);
        let female = Character::new("Elizabeth", Gender::Female);
        let nb = Character::new("Alex", Gender::Nonbinary);
        let unknown = Character::new("Stranger", Gender::Unknown);

        assert_eq!(spec.target_gender(&male), Some(Gender::Female));
        assert_eq!(spec.target_gender(&female), Some(Gender::Male));
        assert_eq!(spec.target_gender(&nb), Some(Gender::Nonbinary));
        assert_eq!(spec.target_gender(&unknown), None);
    }
}
