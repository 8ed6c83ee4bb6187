//! Glyph vocabularies.
//!
//! [`ClassVocabulary`] is the bijective glyph↔class-index table that sizes the
//! classification head and decodes its output. [`FallbackVocabulary`] is the
//! immutable character pool the fallback tiers draw substitutes and padding
//! from; it is passed explicitly to the tiers that need it.

use crate::core::constants::{CANDIDATE_COUNT, COMMON_CHARACTERS};
use crate::core::errors::{OCRError, OcrResult};
use once_cell::sync::Lazy;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// A recognition unit: one character class.
pub type Glyph = char;

/// Bidirectional mapping between glyphs and dense class indices.
///
/// Immutable after construction. Indices are dense in `0..len()` and every
/// glyph maps to exactly one index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassVocabulary {
    char_to_index: HashMap<Glyph, usize>,
    index_to_char: Vec<Glyph>,
}

impl ClassVocabulary {
    /// Builds a vocabulary from an ordered glyph list; position is the class index.
    ///
    /// # Errors
    ///
    /// Returns `OCRError::InvalidInput` if the list is empty or repeats a glyph.
    pub fn from_glyphs<I>(glyphs: I) -> OcrResult<Self>
    where
        I: IntoIterator<Item = Glyph>,
    {
        let index_to_char: Vec<Glyph> = glyphs.into_iter().collect();
        if index_to_char.is_empty() {
            return Err(OCRError::invalid_input("vocabulary must not be empty"));
        }
        let mut char_to_index = HashMap::with_capacity(index_to_char.len());
        for (index, &glyph) in index_to_char.iter().enumerate() {
            if let Some(previous) = char_to_index.insert(glyph, index) {
                return Err(OCRError::invalid_input(format!(
                    "glyph '{}' appears at both index {} and {}",
                    glyph, previous, index
                )));
            }
        }
        Ok(Self {
            char_to_index,
            index_to_char,
        })
    }

    /// Builds a vocabulary from a serialized glyph→index table.
    ///
    /// Keys must be exactly one character and the indices must cover
    /// `0..map.len()` without gaps or repeats.
    pub fn from_map(map: HashMap<String, usize>) -> OcrResult<Self> {
        if map.is_empty() {
            return Err(OCRError::invalid_input("vocabulary must not be empty"));
        }
        let mut slots: Vec<Option<Glyph>> = vec![None; map.len()];
        for (key, index) in map {
            let mut chars = key.chars();
            let glyph = match (chars.next(), chars.next()) {
                (Some(glyph), None) => glyph,
                _ => {
                    return Err(OCRError::invalid_input(format!(
                        "vocabulary key '{}' is not a single character",
                        key
                    )));
                }
            };
            let slot = slots.get_mut(index).ok_or_else(|| {
                OCRError::invalid_input(format!(
                    "index {} of glyph '{}' leaves a gap in the class range",
                    index, glyph
                ))
            })?;
            if let Some(other) = slot.replace(glyph) {
                return Err(OCRError::invalid_input(format!(
                    "index {} is assigned to both '{}' and '{}'",
                    index, other, glyph
                )));
            }
        }
        // With one key per slot and no repeats, every slot is filled.
        Self::from_glyphs(slots.into_iter().flatten())
    }

    /// Loads a vocabulary file.
    ///
    /// A `.json` file holds a `{"glyph": index}` object; any other file is a
    /// dictionary with one glyph per line, the line number being the index.
    ///
    /// # Errors
    ///
    /// Every failure, including a missing file, is reported as
    /// `OCRError::VocabularyLoad`.
    pub fn load(path: impl AsRef<Path>) -> OcrResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| OCRError::vocabulary_load(path, e.to_string()))?;
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let vocabulary = if is_json {
            let map: HashMap<String, usize> = serde_json::from_str(&content)
                .map_err(|e| OCRError::vocabulary_load(path, e.to_string()))?;
            Self::from_map(map)
        } else {
            Self::from_lines(&content)
        };
        let vocabulary = vocabulary.map_err(|e| OCRError::vocabulary_load(path, e.to_string()))?;
        tracing::debug!(
            path = %path.display(),
            classes = vocabulary.len(),
            "loaded class vocabulary"
        );
        Ok(vocabulary)
    }

    fn from_lines(content: &str) -> OcrResult<Self> {
        let mut glyphs = Vec::new();
        for (line_no, line) in content.lines().enumerate() {
            let mut chars = line.chars();
            match (chars.next(), chars.next()) {
                (Some(glyph), None) => glyphs.push(glyph),
                _ => {
                    return Err(OCRError::invalid_input(format!(
                        "line {} must hold exactly one glyph, got '{}'",
                        line_no + 1,
                        line
                    )));
                }
            }
        }
        Self::from_glyphs(glyphs)
    }

    /// Returns the class index of a glyph.
    pub fn index_of(&self, glyph: Glyph) -> Option<usize> {
        self.char_to_index.get(&glyph).copied()
    }

    /// Returns the glyph of a class index.
    pub fn glyph_of(&self, index: usize) -> Option<Glyph> {
        self.index_to_char.get(index).copied()
    }

    /// Number of classes.
    pub fn len(&self) -> usize {
        self.index_to_char.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index_to_char.is_empty()
    }

    /// Glyphs in class-index order.
    pub fn glyphs(&self) -> &[Glyph] {
        &self.index_to_char
    }
}

/// The character pool used by the fallback tiers.
///
/// Built once from a string; repeated characters are dropped while keeping
/// first-occurrence order, so a position always names the same glyph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackVocabulary {
    glyphs: Vec<Glyph>,
}

impl FallbackVocabulary {
    /// Creates a pool from the characters of `text`, ignoring whitespace.
    ///
    /// # Errors
    ///
    /// The pool must hold at least as many distinct glyphs as a result has
    /// candidates, otherwise padding without duplicates is impossible.
    pub fn new(text: &str) -> OcrResult<Self> {
        let pool = Self::distinct(text);
        if pool.len() < CANDIDATE_COUNT {
            return Err(OCRError::config_error(format!(
                "fallback vocabulary needs at least {} distinct glyphs, got {}",
                CANDIDATE_COUNT,
                pool.len()
            )));
        }
        Ok(pool)
    }

    fn distinct(text: &str) -> Self {
        let mut seen = HashSet::new();
        Self {
            glyphs: text
                .chars()
                .filter(|c| !c.is_whitespace())
                .filter(|c| seen.insert(*c))
                .collect(),
        }
    }

    /// Returns the glyph at `index`, wrapping around the pool.
    pub fn pick(&self, index: usize) -> Glyph {
        self.glyphs[index % self.glyphs.len()]
    }

    /// Draws a glyph uniformly from those not in `exclude`.
    ///
    /// Returns `None` only when every glyph of the pool is excluded.
    pub fn sample_unique<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        exclude: &HashSet<Glyph>,
    ) -> Option<Glyph> {
        let available: Vec<Glyph> = self
            .glyphs
            .iter()
            .copied()
            .filter(|glyph| !exclude.contains(glyph))
            .collect();
        if available.is_empty() {
            return None;
        }
        Some(available[rng.gen_range(0..available.len())])
    }

    pub fn len(&self) -> usize {
        self.glyphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.glyphs.is_empty()
    }

    pub fn contains(&self, glyph: Glyph) -> bool {
        self.glyphs.contains(&glyph)
    }
}

/// The deduplicated common-character table, built on first use.
static COMMON_POOL: Lazy<FallbackVocabulary> =
    Lazy::new(|| FallbackVocabulary::distinct(COMMON_CHARACTERS));

impl Default for FallbackVocabulary {
    fn default() -> Self {
        COMMON_POOL.clone()
    }
}
