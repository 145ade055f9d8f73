//! A per-length dictionary with bit-vector candidate filtering.
//!
//! Every length bucket is sorted by descending score, so bit `i` of a bitmap over that bucket
//! always refers to the `i`-th best word of that length. Filtering a pattern is an AND of the
//! precomputed `(position, glyph)` masks for each fixed letter.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;
use std::rc::Rc;

use bit_set::BitSet;
use log::debug;
use smallvec::SmallVec;

use crate::errors::AutofillError;
use crate::topology::{BLANK, BLOCK};
use crate::MAX_SLOT_LENGTH;

/// An identifier for a given letter, based on its index in the index's `glyphs` field.
pub type GlyphId = usize;

/// An identifier for a given word, based on its index within the relevant length bucket.
pub type WordId = usize;

/// A set of candidate words of one length. An empty bitmap means "no word fits".
pub type Bitmap = Rc<BitSet>;

/// Fill cost in fixed point. Lower is better; sums are exact so equal fills tie exactly.
pub type Cost = u64;

/// The cost of a word with score zero.
pub const COST_SCALE: f32 = 1_000_000.0;

/// The cost of an entry that has no candidates left.
pub const IMPOSSIBLE_COST: Cost = Cost::MAX;

/// Convert a word score into its contribution to the fill cost. Higher scores are cheaper and
/// negative scores are treated as zero.
pub fn word_cost(score: f32) -> Cost {
    (COST_SCALE / (1.0 + score.max(0.0))).round() as Cost
}

/// A dictionary word that can be chosen for an entry.
#[derive(Debug, Clone)]
pub struct Word {
    pub string: String,
    pub glyphs: SmallVec<[GlyphId; MAX_SLOT_LENGTH]>,
    pub score: f32,
    pub cost: Cost,
}

/// All words of a single length plus the masks used to filter them.
struct LengthBucket {
    words: Vec<Word>,
    all: Bitmap,
    /// Indexed by character position, then glyph id.
    masks: Vec<Vec<BitSet>>,
}

impl LengthBucket {
    fn empty() -> LengthBucket {
        LengthBucket { words: vec![], all: Rc::new(BitSet::new()), masks: vec![] }
    }

    fn build(length: usize, words: Vec<Word>, glyph_count: usize) -> LengthBucket {
        let mut masks: Vec<Vec<BitSet>> = (0..length)
            .map(|_| (0..glyph_count).map(|_| BitSet::with_capacity(words.len())).collect())
            .collect();

        for (word_id, word) in words.iter().enumerate() {
            for (pos, &glyph) in word.glyphs.iter().enumerate() {
                masks[pos][glyph].insert(word_id);
            }
        }

        LengthBucket { all: Rc::new((0..words.len()).collect()), words, masks }
    }
}

pub struct WordIndex {
    glyphs: Vec<char>,
    glyph_ids_by_char: HashMap<char, GlyphId>,
    buckets: Vec<LengthBucket>,
    empty: Bitmap,
    word_count: usize,
}

impl std::fmt::Debug for WordIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WordIndex")
            .field("glyphs", &self.glyphs)
            .field("words", &format!("({} entries)", self.word_count))
            .finish()
    }
}

impl WordIndex {
    /// Build an index from `(word, score)` pairs. Words are upper-cased; blank words and words
    /// containing grid markers are dropped, and duplicates keep their highest score.
    pub fn new(word_list: &[(String, f32)]) -> WordIndex {
        let mut scores: Vec<(String, f32)> = Vec::with_capacity(word_list.len());
        let mut positions_by_word: HashMap<String, usize> = HashMap::with_capacity(word_list.len());

        for (word, score) in word_list {
            let word = word.trim().to_uppercase();
            if word.is_empty() || word.contains(BLANK) || word.contains(BLOCK) {
                continue;
            }
            match positions_by_word.get(&word) {
                Some(&pos) => {
                    if scores[pos].1 < *score {
                        scores[pos].1 = *score;
                    }
                }
                None => {
                    positions_by_word.insert(word.clone(), scores.len());
                    scores.push((word, *score));
                }
            }
        }

        let glyphs: Vec<char> = scores
            .iter()
            .flat_map(|(word, _)| word.chars())
            .collect::<BTreeSet<char>>()
            .into_iter()
            .collect();
        let glyph_ids_by_char: HashMap<char, GlyphId> =
            glyphs.iter().enumerate().map(|(id, &c)| (c, id)).collect();

        let max_length = scores.iter().map(|(word, _)| word.chars().count()).max().unwrap_or(0);
        let mut words_by_length: Vec<Vec<Word>> = (0..=max_length).map(|_| vec![]).collect();
        let word_count = scores.len();

        for (string, score) in scores {
            let glyphs = string.chars().map(|c| glyph_ids_by_char[&c]).collect();
            words_by_length[string.chars().count()].push(Word {
                string,
                glyphs,
                score,
                cost: word_cost(score),
            });
        }

        let buckets = words_by_length
            .into_iter()
            .enumerate()
            .map(|(length, mut words)| {
                if words.is_empty() {
                    return LengthBucket::empty();
                }
                // Stable, so equal scores keep the word list's order.
                words.sort_by(|a, b| b.score.total_cmp(&a.score));
                LengthBucket::build(length, words, glyphs.len())
            })
            .collect();

        debug!("indexed {} words over {} glyphs", word_count, glyphs.len());

        WordIndex {
            glyphs,
            glyph_ids_by_char,
            buckets,
            empty: Rc::new(BitSet::new()),
            word_count,
        }
    }

    /// Load a word list file with one `word;score` (or `word,score`) per line, skipping words
    /// that score below `min_score`.
    pub fn load_from_path<P: AsRef<Path>>(path: P, min_score: f32) -> Result<WordIndex, AutofillError> {
        let text = fs::read_to_string(path)?;
        Ok(WordIndex::new(&parse_word_list(&text, min_score)?))
    }

    pub fn len(&self) -> usize {
        self.word_count
    }

    pub fn is_empty(&self) -> bool {
        self.word_count == 0
    }

    pub fn max_length(&self) -> usize {
        self.buckets.len().saturating_sub(1)
    }

    /// All words of the given length, best score first.
    pub fn words_of_length(&self, length: usize) -> &[Word] {
        self.buckets.get(length).map(|bucket| bucket.words.as_slice()).unwrap_or(&[])
    }

    pub fn word(&self, length: usize, word_id: WordId) -> &Word {
        &self.buckets[length].words[word_id]
    }

    pub fn glyph_char(&self, glyph: GlyphId) -> char {
        self.glyphs[glyph]
    }

    pub fn glyph_id(&self, letter: char) -> Option<GlyphId> {
        self.glyph_ids_by_char.get(&letter).copied()
    }

    /// The shared "no candidates" bitmap.
    pub fn empty_bitmap(&self) -> Bitmap {
        self.empty.clone()
    }

    /// The words consistent with `pattern`, where each character is either a fixed letter or a
    /// blank (`' '`). An all-blank pattern matches the whole bucket.
    pub fn matching_bitmap(&self, pattern: &str) -> Bitmap {
        let length = pattern.chars().count();
        let bucket = match self.buckets.get(length) {
            Some(bucket) if !bucket.words.is_empty() => bucket,
            _ => return self.empty_bitmap(),
        };

        let mut result: Option<BitSet> = None;
        for (pos, letter) in pattern.chars().enumerate() {
            if letter == ' ' {
                continue;
            }
            let Some(glyph) = self.glyph_id(letter) else {
                return self.empty_bitmap();
            };
            let mask = &bucket.masks[pos][glyph];
            match result.as_mut() {
                Some(bits) => bits.intersect_with(mask),
                None => result = Some(mask.clone()),
            }
            if result.as_ref().map_or(false, |bits| bits.is_empty()) {
                return self.empty_bitmap();
            }
        }

        match result {
            Some(bits) => Rc::new(bits),
            None => bucket.all.clone(),
        }
    }

    /// Narrow `bitmap` to the words with `letter` at character position `char_pos`.
    pub fn update_bitmap(&self, length: usize, bitmap: &Bitmap, char_pos: usize, letter: char) -> Bitmap {
        match self.glyph_id(letter) {
            Some(glyph) => self.update_bitmap_with_glyph(length, bitmap, char_pos, glyph),
            None => self.empty_bitmap(),
        }
    }

    pub(crate) fn update_bitmap_with_glyph(
        &self,
        length: usize,
        bitmap: &Bitmap,
        char_pos: usize,
        glyph: GlyphId,
    ) -> Bitmap {
        let Some(mask) = self.buckets.get(length).and_then(|bucket| bucket.masks.get(char_pos)) else {
            return self.empty_bitmap();
        };
        if bitmap.is_subset(&mask[glyph]) {
            return bitmap.clone();
        }

        let mut bits = (**bitmap).clone();
        bits.intersect_with(&mask[glyph]);
        if bits.is_empty() {
            self.empty_bitmap()
        } else {
            Rc::new(bits)
        }
    }

    pub fn num_matches(&self, bitmap: &Bitmap) -> usize {
        bitmap.len()
    }

    /// A lower bound on the cost of filling an entry of `length` from `bitmap`: the cost of its
    /// best remaining word.
    pub fn min_cost(&self, length: usize, bitmap: &Bitmap) -> Cost {
        match bitmap.iter().next() {
            Some(word_id) => self.word(length, word_id).cost,
            None => IMPOSSIBLE_COST,
        }
    }
}

/// Parse a word list with one `word;score` or `word,score` per line.
pub fn parse_word_list(text: &str, min_score: f32) -> Result<Vec<(String, f32)>, AutofillError> {
    let mut words = Vec::new();

    for (line_idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (word, score) = match line.split_once(|c: char| c == ';' || c == ',') {
            Some((word, score)) => {
                let score: f32 = score.trim().parse().map_err(|_| AutofillError::InvalidScore {
                    line: line_idx + 1,
                    score: score.trim().to_string(),
                })?;
                (word, score)
            }
            None => (line, 0.0),
        };
        if score < min_score {
            continue;
        }
        words.push((word.to_string(), score));
    }

    Ok(words)
}

#[cfg(test)]
mod tests {
    use super::{parse_word_list, word_cost, WordIndex, IMPOSSIBLE_COST};
    use proptest::prelude::*;

    fn small_index() -> WordIndex {
        WordIndex::new(&[
            ("cat".to_string(), 30.0),
            ("cot".to_string(), 50.0),
            ("car".to_string(), 40.0),
            ("dog".to_string(), 20.0),
            ("at".to_string(), 10.0),
            ("CAT".to_string(), 60.0),
        ])
    }

    #[test]
    fn test_words_sorted_and_deduplicated() {
        let index = small_index();
        let words: Vec<_> = index.words_of_length(3).iter().map(|w| (w.string.as_str(), w.score)).collect();

        assert_eq!(words, vec![("CAT", 60.0), ("COT", 50.0), ("CAR", 40.0), ("DOG", 20.0)]);
        assert_eq!(index.len(), 5);
        assert_eq!(index.max_length(), 3);
        assert!(index.words_of_length(7).is_empty());
    }

    #[test]
    fn test_matching_bitmap() {
        let index = small_index();

        assert_eq!(index.num_matches(&index.matching_bitmap("   ")), 4);
        assert_eq!(index.num_matches(&index.matching_bitmap("C T")), 2);
        assert_eq!(index.num_matches(&index.matching_bitmap("DOG")), 1);
        assert!(index.matching_bitmap("Z  ").is_empty());
        assert!(index.matching_bitmap("     ").is_empty());
    }

    #[test]
    fn test_update_bitmap_narrows() {
        let index = small_index();
        let all = index.matching_bitmap("   ");

        let c_words = index.update_bitmap(3, &all, 0, 'C');
        assert_eq!(index.num_matches(&c_words), 3);

        let cat_cot = index.update_bitmap(3, &c_words, 2, 'T');
        let found: Vec<_> = cat_cot.iter().map(|id| index.word(3, id).string.clone()).collect();
        assert_eq!(found, vec!["CAT", "COT"]);

        assert!(index.update_bitmap(3, &cat_cot, 1, 'X').is_empty());
        assert!(index.update_bitmap(3, &cat_cot, 1, 'E').is_empty());
    }

    #[test]
    fn test_min_cost_uses_best_remaining_word() {
        let index = small_index();
        let all = index.matching_bitmap("   ");
        let dog = index.matching_bitmap("D  ");

        assert_eq!(index.min_cost(3, &all), word_cost(60.0));
        assert_eq!(index.min_cost(3, &dog), word_cost(20.0));
        assert!(index.min_cost(3, &all) <= index.min_cost(3, &dog));
        assert_eq!(index.min_cost(3, &index.empty_bitmap()), IMPOSSIBLE_COST);
    }

    #[test]
    fn test_word_cost_is_decreasing() {
        assert!(word_cost(10.0) < word_cost(9.0));
        assert_eq!(word_cost(-5.0), word_cost(0.0));
        assert_eq!(word_cost(10.0), 90909);
    }

    #[test]
    fn test_parse_word_list() {
        let words = parse_word_list("cat;50\n\ndog,20\nemu; 5\nyak\n", 10.0).unwrap();
        assert_eq!(words, vec![("cat".to_string(), 50.0), ("dog".to_string(), 20.0)]);

        let err = parse_word_list("cat;50\ndog;lots\n", 0.0).unwrap_err();
        assert_eq!(err.to_string(), "word list line 2: invalid score \"lots\"");
    }

    proptest! {
        #[test]
        fn test_update_bitmap_never_grows(
            steps in proptest::collection::vec((0usize..3, prop::sample::select(vec!['C', 'A', 'T', 'O', 'R', 'D', 'G'])), 0..8)
        ) {
            let index = small_index();
            let mut bitmap = index.matching_bitmap("   ");
            let mut cost = index.min_cost(3, &bitmap);

            for (pos, letter) in steps {
                let next = index.update_bitmap(3, &bitmap, pos, letter);
                prop_assert!(next.is_subset(&bitmap));
                prop_assert!(index.num_matches(&next) <= index.num_matches(&bitmap));
                let next_cost = index.min_cost(3, &next);
                prop_assert!(next_cost >= cost);
                bitmap = next;
                cost = next_cost;
            }
        }
    }
}
