//! The resumable autofill search.
//!
//! The search is branch-and-bound over grid snapshots with limited discrepancy backtracking and
//! decomposition into independent regions. Instead of recursing on the native stack, every
//! transition returns a `Step`: either more work (`Recur`, carrying the continuation that
//! consumes its result) or a finished value. `Autofiller::step` runs transitions until its time
//! slice is used up, so the caller can interleave other work between calls.

use std::collections::HashSet;
use std::rc::Rc;

use bit_set::BitSet;
use instant::{Duration, Instant};
use log::{debug, error, info};

use crate::errors::AutofillError;
use crate::grid::{AutofillGrid, Conflict};
use crate::topology::{is_blank, EntryIndex, GridTopology};
use crate::word_index::{Cost, WordId, WordIndex};

/// Default wall clock budget for one call to `Autofiller::step`.
pub const DEFAULT_TIME_SLICE: Duration = Duration::from_millis(50);

/// Default number of "second best" choices a single branch may take.
pub const DEFAULT_DISCREPANCY_BUDGET: usize = 3;

/// Default number of most-constrained entries evaluated before committing a choice.
pub const DEFAULT_LOOKAHEAD_ENTRIES: usize = 3;

#[derive(Debug, Clone)]
pub struct AutofillConfig {
    /// How long a single `step` call may search before returning.
    pub time_slice: Duration,
    /// How many `(entry, word)` pairs a branch may pitch to explore alternatives. Zero makes
    /// the search purely greedy.
    pub discrepancy_budget: usize,
    /// How many of the most constrained open entries are evaluated per pass.
    pub lookahead_entries: usize,
    /// Heuristic cap on how many viable candidates are evaluated per entry. A cap can miss the
    /// true runner-up, so the default `None` evaluates all of them.
    pub candidate_limit: Option<usize>,
}

impl Default for AutofillConfig {
    fn default() -> Self {
        AutofillConfig {
            time_slice: DEFAULT_TIME_SLICE,
            discrepancy_budget: DEFAULT_DISCREPANCY_BUDGET,
            lookahead_entries: DEFAULT_LOOKAHEAD_ENTRIES,
            candidate_limit: None,
        }
    }
}

/// A struct tracking statistics about the filling process.
#[derive(Debug, Clone, Default)]
pub struct Statistics {
    pub steps: u64,
    pub states: u64,
    pub forced: u64,
    pub dead_ends: u64,
    pub pruned: u64,
    pub subset_splits: u64,
    pub discrepancy_branches: u64,
    pub max_pitched: usize,
    pub solutions: u64,
    pub duration: Duration,
}

/// Signals produced by `Autofiller::step`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutofillEvent {
    /// A better fill was found. Emitted once per improvement.
    Result { input: Vec<String>, solution: Vec<String> },
    /// The search can't improve any further. Emitted exactly once.
    Complete,
}

/// `(entry, word)` pairs excluded on the current branch.
type Pitched = Rc<HashSet<(EntryIndex, WordId)>>;

type Continuation = Box<dyn FnOnce(Option<AutofillGrid>) -> Step>;

struct Frame {
    grid: AutofillGrid,
    discrepancy_budget: usize,
    pitched: Pitched,
    subset: Option<Rc<BitSet>>,
    cont: Continuation,
}

enum Step {
    Recur(Frame),
    Value(Option<AutofillGrid>),
}

struct Candidate {
    word_id: WordId,
    grid: AutofillGrid,
    cost: Cost,
}

enum Ranking {
    /// No word fits the entry on this branch.
    DeadEnd,
    /// Exactly one word fits.
    Forced(Candidate),
    /// The cheapest option, and how much worse the runner-up is.
    Ranked { best: Candidate, gap: Cost },
}

fn cheaper(first: AutofillGrid, second: Option<AutofillGrid>) -> AutofillGrid {
    match second {
        Some(second) if second.min_grid_cost() < first.min_grid_cost() => second,
        _ => first,
    }
}

pub struct Autofiller {
    config: AutofillConfig,
    input: Vec<String>,
    next_step: Option<Step>,
    best: Option<AutofillGrid>,
    best_cost: Option<Cost>,
    solution_posted: bool,
    completed: bool,
    complete_posted: bool,
    failure: Option<AutofillError>,
    statistics: Statistics,
}

impl Autofiller {
    /// Start an autofill session for a `width` x `height` template. A template or word index
    /// that can't be used leaves the session already completed with no solution; the error is
    /// logged and available from `failure`.
    pub fn new<S: AsRef<str>>(
        cells: &[S],
        width: usize,
        height: usize,
        index: Rc<WordIndex>,
        config: AutofillConfig,
    ) -> Autofiller {
        let mut autofiller = Autofiller {
            input: cells.iter().map(|cell| cell.as_ref().to_string()).collect(),
            config,
            next_step: None,
            best: None,
            best_cost: None,
            solution_posted: false,
            completed: false,
            complete_posted: false,
            failure: None,
            statistics: Statistics::default(),
        };

        match Self::initial_grid(cells, width, height, index) {
            Ok(grid) => {
                autofiller.next_step = Some(Step::Recur(Frame {
                    grid,
                    discrepancy_budget: autofiller.config.discrepancy_budget,
                    pitched: Pitched::default(),
                    subset: None,
                    cont: Box::new(Step::Value),
                }));
            }
            Err(err) => {
                error!("can't start autofill: {err}");
                autofiller.completed = true;
                autofiller.failure = Some(err);
            }
        }

        autofiller
    }

    fn initial_grid<S: AsRef<str>>(
        cells: &[S],
        width: usize,
        height: usize,
        index: Rc<WordIndex>,
    ) -> Result<AutofillGrid, AutofillError> {
        if index.is_empty() {
            return Err(AutofillError::EmptyWordIndex);
        }
        let topology = GridTopology::build(cells, width, height)?;
        debug!("autofilling {}x{} grid with {} entries", width, height, topology.entries.len());
        Ok(AutofillGrid::new(Rc::new(topology), index))
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn failure(&self) -> Option<&AutofillError> {
        self.failure.as_ref()
    }

    pub fn statistics(&self) -> &Statistics {
        &self.statistics
    }

    pub fn best_grid(&self) -> Option<&AutofillGrid> {
        self.best.as_ref()
    }

    /// Cells of the best fill found so far.
    pub fn solution(&self) -> Option<Vec<String>> {
        self.best.as_ref().map(AutofillGrid::cell_strings)
    }

    pub fn solution_cost(&self) -> Option<Cost> {
        self.best_cost
    }

    /// Search for up to one time slice and return the events produced along the way.
    pub fn step(&mut self) -> Vec<AutofillEvent> {
        let mut events = vec![];

        if !self.completed {
            let start = Instant::now();
            self.statistics.steps += 1;

            loop {
                match self.next_step.take() {
                    Some(Step::Recur(frame)) => {
                        self.next_step = Some(self.solve(frame));
                        if start.elapsed() >= self.config.time_slice {
                            break;
                        }
                    }
                    finished => {
                        self.next_step = finished;
                        self.completed = true;
                        break;
                    }
                }
            }

            self.statistics.duration += start.elapsed();
            if self.completed {
                info!(
                    "autofill complete after {} states ({})",
                    self.statistics.states,
                    match self.best_cost {
                        Some(cost) => format!("best cost {cost}"),
                        None => "no fill".to_string(),
                    }
                );
            }
        }

        if let Some(best) = &self.best {
            if !self.solution_posted {
                self.solution_posted = true;
                events.push(AutofillEvent::Result { input: self.input.clone(), solution: best.cell_strings() });
            }
        }

        if self.completed && !self.complete_posted {
            self.complete_posted = true;
            events.push(AutofillEvent::Complete);
        }

        events
    }

    /// Step until the search is exhausted, collecting every event.
    pub fn run_to_completion(&mut self) -> Vec<AutofillEvent> {
        let mut events = vec![];
        while !self.complete_posted {
            events.extend(self.step());
        }
        events
    }

    fn solve(&mut self, frame: Frame) -> Step {
        let Frame { grid, discrepancy_budget, pitched, subset, cont } = frame;
        self.statistics.states += 1;
        self.statistics.max_pitched = self.statistics.max_pitched.max(pitched.len());

        let base_cost = grid.min_grid_cost();
        if self.best_cost.map_or(false, |best_cost| best_cost <= base_cost) {
            self.statistics.pruned += 1;
            return cont(None);
        }

        let open: Vec<EntryIndex> = grid.open_entries(subset.as_deref()).collect();
        if open.is_empty() {
            if grid.is_complete() {
                info!("found fill with cost {base_cost}");
                self.statistics.solutions += 1;
                self.best_cost = Some(base_cost);
                self.best = Some(grid.clone());
                self.solution_posted = false;
            }
            return cont(Some(grid));
        }

        let mut subsets = grid.stable_subsets(subset.as_deref());
        if subsets.len() > 1 {
            self.statistics.subset_splits += 1;
            let smallest = subsets
                .iter()
                .enumerate()
                .min_by_key(|(_, subset)| subset.len())
                .map_or(0, |(position, _)| position);
            let first = subsets.remove(smallest);
            let mut rest = BitSet::with_capacity(grid.entry_count());
            for other in &subsets {
                rest.union_with(other);
            }
            debug!("splitting {} open entries into {} regions", open.len(), subsets.len() + 1);

            let rest = Rc::new(rest);
            let outer_pitched = pitched.clone();
            return Step::Recur(Frame {
                grid,
                discrepancy_budget,
                pitched,
                subset: Some(Rc::new(first)),
                cont: Box::new(move |result: Option<AutofillGrid>| match result {
                    None => cont(None),
                    Some(solved) => Step::Recur(Frame {
                        grid: solved,
                        discrepancy_budget,
                        pitched: outer_pitched,
                        subset: Some(rest),
                        cont,
                    }),
                }),
            });
        }

        let mut order = open;
        order.sort_by_key(|&entry_index| grid.entry(entry_index).matches);
        order.truncate(self.config.lookahead_entries.max(1));

        let mut pick: Option<(EntryIndex, Candidate, Cost)> = None;
        for entry_index in order {
            match self.rank_candidates(&grid, entry_index, &pitched) {
                Ranking::DeadEnd => {
                    self.statistics.dead_ends += 1;
                    return cont(None);
                }
                Ranking::Forced(candidate) => {
                    self.statistics.forced += 1;
                    return Step::Recur(Frame { grid: candidate.grid, discrepancy_budget, pitched, subset, cont });
                }
                Ranking::Ranked { best, gap } => {
                    if pick.as_ref().map_or(true, |(_, _, best_gap)| gap > *best_gap) {
                        pick = Some((entry_index, best, gap));
                    }
                }
            }
        }

        let Some((entry_index, choice, _)) = pick else {
            return cont(None);
        };

        if pitched.len() >= discrepancy_budget {
            return Step::Recur(Frame { grid: choice.grid, discrepancy_budget, pitched, subset, cont });
        }

        // Try the best choice. Only if that leads to a fill, also try the same grid with the
        // choice pitched, and keep the cheaper of the two.
        self.statistics.discrepancy_branches += 1;
        debug!("branching on entry {entry_index} with {} pitched", pitched.len());

        let mut alternative = (*pitched).clone();
        alternative.insert((entry_index, choice.word_id));
        let alternative: Pitched = Rc::new(alternative);
        let retry_subset = subset.clone();

        Step::Recur(Frame {
            grid: choice.grid,
            discrepancy_budget,
            pitched,
            subset,
            cont: Box::new(move |first: Option<AutofillGrid>| match first {
                None => cont(None),
                Some(first) => Step::Recur(Frame {
                    grid,
                    discrepancy_budget,
                    pitched: alternative,
                    subset: retry_subset,
                    cont: Box::new(move |second: Option<AutofillGrid>| cont(Some(cheaper(first, second)))),
                }),
            }),
        })
    }

    /// Evaluate the candidate words for one entry, best score first. Letters that are known to
    /// empty a crossing entry are remembered per cell so later words with the same letter there
    /// are skipped without building a grid.
    fn rank_candidates(&self, grid: &AutofillGrid, entry_index: EntryIndex, pitched: &Pitched) -> Ranking {
        let index = grid.word_index();
        let entry = &grid.topology().entries[entry_index];
        let Some(bitmap) = grid.entry(entry_index).bitmap.as_ref() else {
            return Ranking::DeadEnd;
        };

        let blank_cells: Vec<usize> = (0..entry.cells.len())
            .filter(|&cell| is_blank(grid.cell(entry.cells[cell])))
            .collect();
        let mut failing_letters: Vec<BitSet> = (0..entry.cells.len()).map(|_| BitSet::new()).collect();
        let candidate_limit = self.config.candidate_limit.map(|limit| limit.max(2));

        let mut best: Option<Candidate> = None;
        let mut runner_up: Option<Cost> = None;
        let mut viable = 0;

        for word_id in bitmap.iter() {
            let word = index.word(entry.length, word_id);
            if grid.is_word_used(&word.string) || pitched.contains(&(entry_index, word_id)) {
                continue;
            }
            if blank_cells
                .iter()
                .any(|&cell| failing_letters[cell].contains(word.glyphs[entry.offsets[cell]]))
            {
                continue;
            }

            let next = match grid.decide_entry(entry_index, word) {
                Ok(next) => next,
                Err(Conflict::Letter { cell }) => {
                    failing_letters[cell].insert(word.glyphs[entry.offsets[cell]]);
                    continue;
                }
                Err(_) => continue,
            };

            let cost = next.min_grid_cost();
            if self.best_cost.map_or(false, |best_cost| cost >= best_cost) {
                continue;
            }

            viable += 1;
            match best.take() {
                Some(current) if current.cost <= cost => {
                    runner_up = Some(runner_up.map_or(cost, |r| r.min(cost)));
                    best = Some(current);
                }
                current => {
                    if let Some(current) = current {
                        runner_up = Some(runner_up.map_or(current.cost, |r| r.min(current.cost)));
                    }
                    best = Some(Candidate { word_id, grid: next, cost });
                }
            }

            if candidate_limit.map_or(false, |limit| viable >= limit) {
                break;
            }
        }

        match (best, runner_up) {
            (None, _) => Ranking::DeadEnd,
            (Some(best), None) => Ranking::Forced(best),
            (Some(best), Some(runner_up)) => {
                let gap = runner_up.saturating_sub(best.cost);
                Ranking::Ranked { best, gap }
            }
        }
    }
}
