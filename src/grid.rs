//! Persistent grid snapshots used by the search.
//!
//! An `AutofillGrid` is never mutated once built. Deciding an entry produces a new snapshot that
//! shares the topology, the word index and every untouched bitmap with its parent, so any number
//! of pending continuations can hold on to different ancestors.

use std::collections::{HashSet, VecDeque};
use std::fmt::{Debug, Formatter};
use std::rc::Rc;

use bit_set::BitSet;
use log::debug;
use smallvec::SmallVec;

use crate::topology::{is_blank, EntryIndex, GridTopology, Position};
use crate::word_index::{Bitmap, Cost, Word, WordIndex};
use crate::MAX_SLOT_LENGTH;

/// The live state of a single entry.
#[derive(Debug, Clone)]
pub struct EntryState {
    pub is_complete: bool,
    /// Words still consistent with the entry's pattern; `None` once the entry is complete.
    pub bitmap: Option<Bitmap>,
    /// Cached population count of `bitmap`.
    pub matches: usize,
    /// Lower bound on this entry's contribution to the grid cost.
    pub min_cost: Cost,
    /// Number of blank cells left in the entry.
    pub open_cells: usize,
}

impl EntryState {
    fn open(index: &WordIndex, length: usize, bitmap: Bitmap, open_cells: usize) -> EntryState {
        EntryState {
            is_complete: false,
            matches: index.num_matches(&bitmap),
            min_cost: index.min_cost(length, &bitmap),
            bitmap: Some(bitmap),
            open_cells,
        }
    }

    fn complete(cost: Cost) -> EntryState {
        EntryState { is_complete: true, bitmap: None, matches: 1, min_cost: cost, open_cells: 0 }
    }

    fn narrow(&mut self, index: &WordIndex, length: usize, bitmap: Bitmap) {
        self.matches = index.num_matches(&bitmap);
        self.min_cost = index.min_cost(length, &bitmap);
        self.bitmap = Some(bitmap);
        self.open_cells -= 1;
    }
}

/// Why a word could not be committed to an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conflict {
    /// The letter written into this cell (by position in the entry's cell list) leaves the
    /// crossing entry with no candidates.
    Letter { cell: usize },
    /// The word, or a crossing entry it completes, is already used elsewhere in the grid.
    Duplicate,
    /// The word doesn't fit the entry's length or its already-filled cells.
    Mismatch,
}

#[derive(Clone)]
pub struct AutofillGrid {
    topology: Rc<GridTopology>,
    index: Rc<WordIndex>,
    cells: Vec<Rc<str>>,
    entries: Vec<EntryState>,
    used_words: HashSet<Rc<str>>,
}

impl Debug for AutofillGrid {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutofillGrid")
            .field("cells", &self.cells)
            .field("open_entries", &self.open_entries(None).count())
            .field("min_cost", &self.min_grid_cost())
            .finish()
    }
}

impl AutofillGrid {
    /// The starting snapshot for a template: complete entries are recorded as used words and
    /// every open entry gets the bitmap of its current pattern.
    pub fn new(topology: Rc<GridTopology>, index: Rc<WordIndex>) -> AutofillGrid {
        let cells: Vec<Rc<str>> = topology.cells.iter().map(|cell| Rc::from(cell.as_str())).collect();
        let mut used_words = HashSet::new();

        let entries = topology
            .entries
            .iter()
            .map(|entry| {
                let pattern: String = entry.cells.iter().map(|&pos| topology.cell(pos)).collect();
                let open_cells = entry.cells.iter().filter(|&&pos| is_blank(topology.cell(pos))).count();
                let bitmap = index.matching_bitmap(&pattern);

                if open_cells > 0 {
                    return EntryState::open(&index, entry.length, bitmap, open_cells);
                }

                // Fixed words outside the dictionary are part of the input, not a cost.
                let cost = if bitmap.is_empty() { 0 } else { index.min_cost(entry.length, &bitmap) };
                used_words.insert(Rc::from(pattern));
                EntryState::complete(cost)
            })
            .collect();

        AutofillGrid { topology, index, cells, entries, used_words }
    }

    pub fn topology(&self) -> &Rc<GridTopology> {
        &self.topology
    }

    pub fn word_index(&self) -> &Rc<WordIndex> {
        &self.index
    }

    pub fn cells(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|cell| &**cell)
    }

    pub fn cell(&self, pos: Position) -> &str {
        &self.cells[self.topology.cell_index(pos)]
    }

    pub fn cell_strings(&self) -> Vec<String> {
        self.cells().map(str::to_string).collect()
    }

    pub fn entry(&self, entry_index: EntryIndex) -> &EntryState {
        &self.entries[entry_index]
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// The entry's current pattern, with `' '` for each blank cell.
    pub fn entry_pattern(&self, entry_index: EntryIndex) -> String {
        pattern_of(&self.topology, &self.cells, entry_index)
    }

    pub fn is_word_used(&self, word: &str) -> bool {
        self.used_words.contains(word)
    }

    pub fn used_words(&self) -> impl Iterator<Item = &str> {
        self.used_words.iter().map(|word| &**word)
    }

    /// True once every entry is complete.
    pub fn is_complete(&self) -> bool {
        self.entries.iter().all(|entry| entry.is_complete)
    }

    /// Incomplete entries, restricted to `filter` when given.
    pub fn open_entries<'a>(&'a self, filter: Option<&'a BitSet>) -> impl Iterator<Item = EntryIndex> + 'a {
        self.entries
            .iter()
            .enumerate()
            .filter(move |(entry_index, entry)| {
                !entry.is_complete && filter.map_or(true, |filter| filter.contains(*entry_index))
            })
            .map(|(entry_index, _)| entry_index)
    }

    /// Sum of every entry's `min_cost`; a lower bound on the cost of any fill reachable from here.
    pub fn min_grid_cost(&self) -> Cost {
        self.entries.iter().fold(0, |acc: Cost, entry| acc.saturating_add(entry.min_cost))
    }

    /// Commit `word` into an open entry, returning `None` if it isn't one of the entry's
    /// remaining candidates, or if it would leave a crossing entry without candidates or
    /// duplicate a word already in the grid. The cost charged is the index's, whatever `score`
    /// the caller believes the word has.
    pub fn grid_with_entry_decided(&self, entry_index: EntryIndex, word: &str, score: f32) -> Option<AutofillGrid> {
        let word = self.candidate_word(entry_index, word)?;
        if word.score != score {
            debug!("deciding {} with indexed score {} instead of {}", word.string, word.score, score);
        }
        self.decide_entry(entry_index, word).ok()
    }

    fn candidate_word(&self, entry_index: EntryIndex, word: &str) -> Option<&Word> {
        let bitmap = self.entries.get(entry_index)?.bitmap.as_ref()?;
        let length = self.topology.entries[entry_index].length;
        let word = word.to_uppercase();
        bitmap
            .iter()
            .map(|word_id| self.index.word(length, word_id))
            .find(|candidate| candidate.string == word)
    }

    /// Like `grid_with_entry_decided`, but reports which kind of conflict stopped the commit so
    /// the search can remember letters that are known to fail.
    pub(crate) fn decide_entry(&self, entry_index: EntryIndex, word: &Word) -> Result<AutofillGrid, Conflict> {
        let entry = &self.topology.entries[entry_index];
        if word.glyphs.len() != entry.length || self.entries[entry_index].is_complete {
            return Err(Conflict::Mismatch);
        }
        if self.used_words.contains(word.string.as_str()) {
            return Err(Conflict::Duplicate);
        }

        let mut cells = self.cells.clone();
        let mut entries = self.entries.clone();
        let mut completed_crosses: SmallVec<[EntryIndex; MAX_SLOT_LENGTH]> = SmallVec::new();
        let mut letter_buf = [0u8; 4];

        for (cell, &pos) in entry.cells.iter().enumerate() {
            let cell_index = self.topology.cell_index(pos);
            let existing = &self.cells[cell_index];
            if !is_blank(existing) {
                let offset = entry.offsets[cell];
                let fits = existing.chars().enumerate().all(|(i, c)| {
                    word.glyphs.get(offset + i).map(|&glyph| self.index.glyph_char(glyph)) == Some(c)
                });
                if !fits {
                    return Err(Conflict::Mismatch);
                }
                continue;
            }

            let glyph = word.glyphs[entry.offsets[cell]];
            let letter = self.index.glyph_char(glyph);
            cells[cell_index] = Rc::from(&*letter.encode_utf8(&mut letter_buf));

            let Some(cross) = self.topology.cross(pos, entry.direction.other()) else {
                continue;
            };
            let cross_length = self.topology.entries[cross.entry].length;
            let cross_state = &mut entries[cross.entry];
            let Some(bitmap) = cross_state.bitmap.as_ref() else {
                continue;
            };

            let bitmap = self.index.update_bitmap_with_glyph(cross_length, bitmap, cross.offset, glyph);
            if bitmap.is_empty() {
                return Err(Conflict::Letter { cell });
            }
            cross_state.narrow(&self.index, cross_length, bitmap);
            if cross_state.open_cells == 0 {
                completed_crosses.push(cross.entry);
            }
        }

        let mut used_words = self.used_words.clone();
        used_words.insert(Rc::from(word.string.as_str()));
        entries[entry_index] = EntryState::complete(word.cost);

        for cross_index in completed_crosses {
            let pattern = pattern_of(&self.topology, &cells, cross_index);
            if !used_words.insert(Rc::from(pattern)) {
                return Err(Conflict::Duplicate);
            }
            let cost = entries[cross_index].min_cost;
            entries[cross_index] = EntryState::complete(cost);
        }

        Ok(AutofillGrid {
            topology: self.topology.clone(),
            index: self.index.clone(),
            cells,
            entries,
            used_words,
        })
    }

    /// Open entries that share a blank cell with `entry_index`.
    fn open_neighbors(&self, entry_index: EntryIndex) -> impl Iterator<Item = EntryIndex> + '_ {
        let entry = &self.topology.entries[entry_index];
        entry.cells.iter().filter_map(move |&pos| {
            if !is_blank(&self.cells[self.topology.cell_index(pos)]) {
                return None;
            }
            self.topology
                .cross(pos, entry.direction.other())
                .map(|cross| cross.entry)
                .filter(|&cross_entry| !self.entries[cross_entry].is_complete)
        })
    }

    /// Split the open entries (within `filter`, if given) into connected components of the
    /// "shares a blank cell" relation. Each component can be filled independently of the others.
    pub fn stable_subsets(&self, filter: Option<&BitSet>) -> Vec<BitSet> {
        let entry_count = self.entries.len();
        let in_filter = |entry_index: EntryIndex| filter.map_or(true, |filter| filter.contains(entry_index));

        let mut visited = BitSet::with_capacity(entry_count);
        let mut subsets = vec![];

        for start in self.open_entries(filter) {
            if visited.contains(start) {
                continue;
            }

            let mut subset = BitSet::with_capacity(entry_count);
            let mut to_visit: VecDeque<EntryIndex> = VecDeque::new();
            visited.insert(start);
            to_visit.push_back(start);

            while let Some(entry_index) = to_visit.pop_front() {
                subset.insert(entry_index);
                for neighbor in self.open_neighbors(entry_index) {
                    if in_filter(neighbor) && visited.insert(neighbor) {
                        to_visit.push_back(neighbor);
                    }
                }
            }

            subsets.push(subset);
        }

        subsets
    }
}

fn pattern_of(topology: &GridTopology, cells: &[Rc<str>], entry_index: EntryIndex) -> String {
    topology.entries[entry_index]
        .cells
        .iter()
        .map(|&pos| &*cells[topology.cell_index(pos)])
        .collect()
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use bit_set::BitSet;
    use proptest::prelude::*;

    use super::AutofillGrid;
    use crate::topology::{parse_template_string, GridTopology};
    use crate::word_index::{word_cost, WordIndex};

    fn word_index(words: &[(&str, f32)]) -> Rc<WordIndex> {
        let words: Vec<(String, f32)> = words.iter().map(|&(w, s)| (w.to_string(), s)).collect();
        Rc::new(WordIndex::new(&words))
    }

    fn grid_from_str(template: &str, index: Rc<WordIndex>) -> AutofillGrid {
        let (cells, width, height) = parse_template_string(template).unwrap();
        AutofillGrid::new(Rc::new(GridTopology::build(&cells, width, height).unwrap()), index)
    }

    fn two_letter_words() -> Rc<WordIndex> {
        word_index(&[("at", 10.0), ("as", 9.0), ("to", 8.0), ("so", 7.0)])
    }

    #[test]
    fn test_initial_state() {
        let grid = grid_from_str("..\n..", two_letter_words());

        assert_eq!(grid.entry_count(), 4);
        assert!(!grid.is_complete());
        assert!((0..4).all(|e| grid.entry(e).matches == 4));
        assert_eq!(grid.min_grid_cost(), 4 * word_cost(10.0));
        assert_eq!(grid.used_words().count(), 0);
    }

    #[test]
    fn test_decide_narrows_crosses() {
        let grid = grid_from_str("..\n..", two_letter_words());
        // Entries: 0 = 1-Across, 1 = 1-Down, 2 = 2-Down, 3 = 3-Across.
        let next = grid.grid_with_entry_decided(0, "AT", 10.0).unwrap();

        assert_eq!(next.cell_strings(), vec!["A", "T", " ", " "]);
        assert!(next.entry(0).is_complete);
        assert!(next.entry(0).bitmap.is_none());
        assert_eq!(next.entry(1).matches, 2);
        assert_eq!(next.entry(2).matches, 1);
        assert_eq!(next.entry(2).min_cost, word_cost(8.0));
        assert_eq!(next.entry(3).matches, 4);
        assert!(next.is_word_used("AT"));
        assert_eq!(next.entry_pattern(1), "A ");
        assert!(next.min_grid_cost() >= grid.min_grid_cost());

        // The parent snapshot is untouched.
        assert_eq!(grid.cell_strings(), vec![" ", " ", " ", " "]);
        assert_eq!(grid.entry(1).matches, 4);
    }

    #[test]
    fn test_conflict_leaves_input_unchanged() {
        let grid = grid_from_str("..\n..", word_index(&[("at", 10.0), ("by", 9.0)]));
        let before_cost = grid.min_grid_cost();

        assert!(grid.grid_with_entry_decided(0, "AT", 10.0).is_none());
        assert!(grid.grid_with_entry_decided(0, "BY", 9.0).is_none());
        assert!(grid.grid_with_entry_decided(0, "ZZ", 9.0).is_none());
        assert!(grid.grid_with_entry_decided(0, "ATE", 9.0).is_none());

        assert_eq!(grid.cell_strings(), vec![" ", " ", " ", " "]);
        assert_eq!(grid.min_grid_cost(), before_cost);
        assert_eq!(grid.used_words().count(), 0);
    }

    #[test]
    fn test_decided_cost_comes_from_the_index() {
        let grid = grid_from_str("..\n..", two_letter_words());
        let next = grid.grid_with_entry_decided(0, "at", 1000.0).unwrap();

        assert_eq!(next.entry(0).min_cost, word_cost(10.0));
        assert_eq!(next.min_grid_cost(), word_cost(10.0) + word_cost(10.0) + word_cost(8.0) + word_cost(10.0));
        assert!(next.min_grid_cost() >= grid.min_grid_cost());
    }

    #[test]
    fn test_completing_a_cross_records_its_word() {
        let grid = grid_from_str("..\n..", two_letter_words());
        let grid = grid.grid_with_entry_decided(0, "AT", 10.0).unwrap();
        let grid = grid.grid_with_entry_decided(2, "TO", 8.0).unwrap();
        let grid = grid.grid_with_entry_decided(1, "AS", 9.0).unwrap();

        // Filling 1-Down completes 3-Across as SO.
        assert!(grid.is_complete());
        assert_eq!(grid.cell_strings(), vec!["A", "T", "S", "O"]);
        assert!(grid.is_word_used("SO"));
        assert_eq!(
            grid.min_grid_cost(),
            word_cost(10.0) + word_cost(9.0) + word_cost(8.0) + word_cost(7.0)
        );
    }

    #[test]
    fn test_duplicate_words_conflict() {
        let grid = grid_from_str("..\n..", word_index(&[("ab", 5.0), ("ba", 4.0), ("bb", 3.0)]));
        let grid = grid.grid_with_entry_decided(0, "AB", 5.0).unwrap();

        assert!(grid.grid_with_entry_decided(3, "AB", 5.0).is_none());
        // BA in the second row would complete 1-Down as AB, which is already used.
        assert!(grid.grid_with_entry_decided(3, "BA", 4.0).is_none());
    }

    #[test]
    fn test_prefilled_entries_are_used() {
        let grid = grid_from_str("at\n..", two_letter_words());

        assert!(grid.entry(0).is_complete);
        assert!(grid.is_word_used("AT"));
        assert_eq!(grid.entry(0).min_cost, word_cost(10.0));
        // 1-Down already starts with A.
        assert!(grid.grid_with_entry_decided(1, "TO", 8.0).is_none());
        assert!(grid.grid_with_entry_decided(1, "TA", 8.0).is_none());
        assert!(grid.grid_with_entry_decided(1, "AS", 9.0).is_some());
        assert_eq!(grid.open_entries(None).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    /// ..#..
    /// ..#..
    #[test]
    fn test_stable_subsets_split_regions() {
        let grid = grid_from_str("..#..\n..#..", two_letter_words());
        let subsets = grid.stable_subsets(None);

        let members: Vec<Vec<usize>> = subsets.iter().map(|s| s.iter().collect()).collect();
        assert_eq!(members.len(), 2);
        assert_eq!(members.iter().map(Vec::len).sum::<usize>(), grid.open_entries(None).count());

        let left: BitSet = members[0].iter().cloned().collect();
        assert_eq!(grid.stable_subsets(Some(&left)).len(), 1);
    }

    #[test]
    fn test_decided_entries_leave_subsets() {
        let grid = grid_from_str("...\n...\n...", word_index(&[("abc", 1.0), ("bca", 1.0), ("cab", 1.0)]));
        assert_eq!(grid.stable_subsets(None).len(), 1);

        // The other five entries still share blank cells in the lower rows.
        let grid = grid.grid_with_entry_decided(0, "ABC", 1.0).unwrap();
        assert_eq!(grid.stable_subsets(None).iter().map(|s| s.len()).sum::<usize>(), 5);
    }

    fn open_grid_template(blocks: &[bool], width: usize) -> String {
        blocks
            .chunks(width)
            .map(|row| row.iter().map(|&b| if b { '#' } else { '.' }).collect::<String>())
            .collect::<Vec<_>>()
            .join("\n")
    }

    proptest! {
        #[test]
        fn test_stable_subsets_partition_open_entries(blocks in proptest::collection::vec(prop::bool::weighted(0.3), 25)) {
            let grid = grid_from_str(&open_grid_template(&blocks, 5), two_letter_words());
            let subsets = grid.stable_subsets(None);

            let mut union = BitSet::new();
            let mut total = 0;
            for subset in &subsets {
                prop_assert!(!subset.is_empty());
                prop_assert!(subset.is_disjoint(&union));
                union.union_with(subset);
                total += subset.len();
            }
            let open: Vec<usize> = grid.open_entries(None).collect();
            prop_assert_eq!(union.iter().collect::<Vec<_>>(), open);
            prop_assert_eq!(total, grid.open_entries(None).count());
        }

        #[test]
        fn test_deciding_never_lowers_cost(choices in proptest::collection::vec((0usize..16, 0usize..16), 1..8)) {
            let index = word_index(&[
                ("cat", 30.0), ("ate", 25.0), ("tea", 20.0), ("ace", 15.0),
                ("ear", 12.0), ("art", 10.0), ("tar", 8.0), ("rat", 5.0),
            ]);
            let mut grid = grid_from_str("...\n...\n...", index.clone());

            for (entry_pick, word_pick) in choices {
                let open: Vec<usize> = grid.open_entries(None).collect();
                if open.is_empty() {
                    break;
                }
                let entry_index = open[entry_pick % open.len()];
                let bitmap = grid.entry(entry_index).bitmap.clone().unwrap();
                let candidates: Vec<usize> = bitmap.iter().collect();
                if candidates.is_empty() {
                    break;
                }
                let word = index.word(3, candidates[word_pick % candidates.len()]).clone();

                if let Some(next) = grid.grid_with_entry_decided(entry_index, &word.string, word.score) {
                    prop_assert!(next.min_grid_cost() >= grid.min_grid_cost());
                    grid = next;
                }
            }
        }
    }
}
