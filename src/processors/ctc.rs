//! CTC decoding for the alternate text engine.
//!
//! The engine model emits a probability distribution over
//! `[blank, char_1, ..., char_n]` at every time step. Decoding collapses the
//! step sequence into text, dropping blanks and repeated emissions.

use ndarray::ArrayView2;
use std::collections::HashMap;

/// A decoded text with one confidence per emitted character.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedText {
    pub text: String,
    pub char_confidences: Vec<f32>,
}

impl DecodedText {
    /// Mean character confidence, or `0.0` for an empty text.
    pub fn confidence(&self) -> f32 {
        if self.char_confidences.is_empty() {
            0.0
        } else {
            self.char_confidences.iter().sum::<f32>() / self.char_confidences.len() as f32
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Decoder for CTC probability sequences with the blank token at index 0.
#[derive(Clone)]
pub struct CtcDecoder {
    /// Index 0 holds the blank placeholder.
    character: Vec<String>,
    blank_index: usize,
}

impl std::fmt::Debug for CtcDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CtcDecoder")
            .field("character_count", &self.character.len())
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
struct Beam {
    p_blank: f64,
    p_non_blank: f64,
    /// Emission confidences of the path contributing most to this prefix.
    confidences: Vec<f32>,
    path_weight: f64,
}

impl Beam {
    fn total(&self) -> f64 {
        self.p_blank + self.p_non_blank
    }

    fn offer_path(&mut self, weight: f64, confidences: impl FnOnce() -> Vec<f32>) {
        if weight > self.path_weight || self.confidences.is_empty() && self.path_weight == 0.0 {
            self.path_weight = weight;
            self.confidences = confidences();
        }
    }
}

impl CtcDecoder {
    /// Creates a decoder from dictionary entries; the blank is prepended.
    pub fn new(entries: Vec<String>) -> Self {
        let mut character = Vec::with_capacity(entries.len() + 1);
        character.push(String::new());
        character.extend(entries);
        Self {
            character,
            blank_index: 0,
        }
    }

    /// Number of classes including the blank.
    pub fn class_count(&self) -> usize {
        self.character.len()
    }

    fn label(&self, index: usize) -> &str {
        self.character.get(index).map(String::as_str).unwrap_or("")
    }

    /// Best-path decoding.
    ///
    /// Takes the arg-max class per step, removes consecutive duplicates and
    /// blanks, and drops characters whose probability is below `low_text`.
    pub fn greedy(&self, probs: ArrayView2<'_, f32>, low_text: f32) -> DecodedText {
        let mut text = String::new();
        let mut char_confidences = Vec::new();
        let mut previous = None;

        for row in probs.outer_iter() {
            let Some((index, prob)) = row
                .iter()
                .copied()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(&b.1).then(b.0.cmp(&a.0)))
            else {
                continue;
            };
            let repeated = previous == Some(index);
            previous = Some(index);
            if repeated || index == self.blank_index || prob < low_text {
                continue;
            }
            text.push_str(self.label(index));
            char_confidences.push(prob);
        }

        DecodedText {
            text,
            char_confidences,
        }
    }

    /// Prefix beam search keeping `width` prefixes per step.
    ///
    /// Only the `width` most probable classes of each step are expanded.
    /// Characters whose emission probability is below `low_text` are dropped
    /// from the returned text.
    pub fn beam_search(&self, probs: ArrayView2<'_, f32>, width: usize, low_text: f32) -> DecodedText {
        let width = width.max(1);
        let mut beams: Vec<(Vec<usize>, Beam)> = vec![(
            Vec::new(),
            Beam {
                p_blank: 1.0,
                ..Default::default()
            },
        )];

        for row in probs.outer_iter() {
            let mut expand: Vec<(usize, f32)> = row
                .iter()
                .copied()
                .enumerate()
                .filter(|(index, _)| *index != self.blank_index)
                .collect();
            expand.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
            expand.truncate(width);
            let p_blank_step = row.get(self.blank_index).copied().unwrap_or(0.0) as f64;

            let mut next: HashMap<Vec<usize>, Beam> = HashMap::new();
            for (prefix, beam) in &beams {
                let entry = next.entry(prefix.clone()).or_default();
                let stay_blank = beam.total() * p_blank_step;
                let stay_repeat = match prefix.last() {
                    Some(&last) => beam.p_non_blank * row[last] as f64,
                    None => 0.0,
                };
                entry.p_blank += stay_blank;
                entry.p_non_blank += stay_repeat;
                entry.offer_path(stay_blank + stay_repeat, || beam.confidences.clone());

                for &(index, prob) in &expand {
                    if prob <= 0.0 {
                        continue;
                    }
                    let mut extended = prefix.clone();
                    extended.push(index);
                    let contribution = if prefix.last() == Some(&index) {
                        beam.p_blank * prob as f64
                    } else {
                        beam.total() * prob as f64
                    };
                    let entry = next.entry(extended).or_default();
                    entry.p_non_blank += contribution;
                    entry.offer_path(contribution, || {
                        let mut confidences = beam.confidences.clone();
                        confidences.push(prob);
                        confidences
                    });
                }
            }

            let mut ranked: Vec<(Vec<usize>, Beam)> = next.into_iter().collect();
            ranked.sort_by(|a, b| b.1.total().total_cmp(&a.1.total()).then(a.0.cmp(&b.0)));
            ranked.truncate(width);
            beams = ranked;
        }

        let Some((prefix, beam)) = beams.into_iter().next() else {
            return DecodedText {
                text: String::new(),
                char_confidences: Vec::new(),
            };
        };

        let mut text = String::new();
        let mut char_confidences = Vec::new();
        for (index, prob) in prefix.into_iter().zip(beam.confidences) {
            if prob < low_text {
                continue;
            }
            text.push_str(self.label(index));
            char_confidences.push(prob);
        }
        DecodedText {
            text,
            char_confidences,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn decoder() -> CtcDecoder {
        CtcDecoder::new(vec!["一".to_string(), "二".to_string(), "三".to_string()])
    }

    fn steps(rows: &[[f32; 4]]) -> Array2<f32> {
        let flat: Vec<f32> = rows.iter().flatten().copied().collect();
        Array2::from_shape_vec((rows.len(), 4), flat).unwrap()
    }

    #[test]
    fn test_debug_summarizes_dictionary() {
        let decoder = decoder();
        let copy = decoder.clone();
        assert_eq!(
            format!("{:?}", copy),
            "CtcDecoder { character_count: 4 }"
        );
        assert_eq!(copy.class_count(), decoder.class_count());
    }

    #[test]
    fn test_greedy_collapses_repeats_and_blanks() {
        let probs = steps(&[
            [0.1, 0.8, 0.05, 0.05],
            [0.1, 0.9, 0.0, 0.0],
            [0.9, 0.05, 0.05, 0.0],
            [0.1, 0.7, 0.1, 0.1],
            [0.0, 0.0, 0.6, 0.4],
        ]);
        let decoded = decoder().greedy(probs.view(), 0.0);
        assert_eq!(decoded.text, "一一二");
        assert_eq!(decoded.char_confidences, vec![0.8, 0.7, 0.6]);
        assert!((decoded.confidence() - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_greedy_drops_low_text() {
        let probs = steps(&[[0.1, 0.8, 0.05, 0.05], [0.3, 0.0, 0.35, 0.35]]);
        let decoded = decoder().greedy(probs.view(), 0.5);
        assert_eq!(decoded.text, "一");
    }

    #[test]
    fn test_empty_sequence() {
        let probs = Array2::<f32>::zeros((0, 4));
        assert!(decoder().greedy(probs.view(), 0.0).is_empty());
        assert_eq!(decoder().beam_search(probs.view(), 3, 0.0).confidence(), 0.0);
    }

    #[test]
    fn test_beam_search_merges_paths() {
        // Best path reads blank, but "三" is more probable once paths merge.
        let probs = steps(&[[0.4, 0.0, 0.0, 0.6], [0.4, 0.0, 0.0, 0.6]]);
        let greedy = decoder().greedy(probs.view(), 0.0);
        assert_eq!(greedy.text, "三");

        let probs = steps(&[[0.5, 0.0, 0.0, 0.5], [0.55, 0.0, 0.0, 0.45]]);
        assert!(decoder().greedy(probs.view(), 0.0).is_empty());
        let beam = decoder().beam_search(probs.view(), 4, 0.0);
        // P("") = 0.275 while the paths reading "三" sum to 0.725.
        assert_eq!(beam.text, "三");
        assert_eq!(beam.char_confidences, vec![0.5]);
    }

    #[test]
    fn test_beam_search_separates_repeats_by_blank() {
        let probs = steps(&[
            [0.0, 1.0, 0.0, 0.0],
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
        ]);
        let beam = decoder().beam_search(probs.view(), 3, 0.0);
        assert_eq!(beam.text, "一一");
        assert_eq!(beam.char_confidences, vec![1.0, 1.0]);
    }
}
