//! Parsing a cell template into entries, per-cell crossings and clue labels.
//!
//! Crossings are tracked by character offset as well as by cell offset: a rebus cell holds
//! several characters, so the `n`-th cell of an entry is not necessarily its `n`-th letter.

use smallvec::SmallVec;

use crate::errors::AutofillError;
use crate::MAX_SLOT_LENGTH;

/// The cell value for a block.
pub const BLOCK: &str = ".";

/// The cell value for an open cell with no letter yet.
pub const BLANK: &str = " ";

/// An identifier for an entry, based on its index in the topology's `entries` field.
pub type EntryIndex = usize;

/// Zero-indexed row and column of a cell, where row 0 is the top row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Position {
    pub row: usize,
    pub col: usize,
}

impl Position {
    pub fn new(row: usize, col: usize) -> Position {
        Position { row, col }
    }
}

/// Direction that an entry is facing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Across,
    Down,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::Across, Direction::Down];

    pub fn other(self) -> Direction {
        match self {
            Direction::Across => Direction::Down,
            Direction::Down => Direction::Across,
        }
    }

    fn index(self) -> usize {
        match self {
            Direction::Across => 0,
            Direction::Down => 1,
        }
    }
}

/// Where a cell sits inside the entry running through it in one direction: the entry, the
/// position in the entry's cell list, and the position in the entry's character pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryCell {
    pub entry: EntryIndex,
    pub cell: usize,
    pub offset: usize,
}

/// The parts of an entry that never change during filling.
#[derive(Debug, Clone)]
pub struct TopologyEntry {
    pub index: EntryIndex,
    pub label: u32,
    pub direction: Direction,
    pub cells: SmallVec<[Position; MAX_SLOT_LENGTH]>,
    /// Character offset of each cell within the entry's pattern.
    pub offsets: SmallVec<[usize; MAX_SLOT_LENGTH]>,
    /// Length in characters, counting every character of a rebus cell.
    pub length: usize,
}

#[derive(Debug, Clone)]
pub struct GridTopology {
    pub width: usize,
    pub height: usize,
    pub cells: Vec<String>,
    pub entries: Vec<TopologyEntry>,
    entries_by_cell: Vec<[Option<EntryCell>; 2]>,
    labels: Vec<Option<u32>>,
}

pub fn is_block(cell: &str) -> bool {
    cell == BLOCK
}

pub fn is_blank(cell: &str) -> bool {
    cell == BLANK
}

fn normalize_cell(index: usize, cell: &str) -> Result<String, AutofillError> {
    if cell.is_empty() {
        return Err(AutofillError::EmptyCell { index });
    }
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        Ok(BLANK.to_string())
    } else {
        Ok(trimmed.to_uppercase())
    }
}

impl GridTopology {
    /// Scan a `width` x `height` template (row-major) for entries. An entry starts at an open
    /// cell whose predecessor is a block or the edge, and needs at least two open cells.
    pub fn build<S: AsRef<str>>(
        template: &[S],
        width: usize,
        height: usize,
    ) -> Result<GridTopology, AutofillError> {
        let expected = width.checked_mul(height);
        if width == 0 || height == 0 || expected != Some(template.len()) {
            return Err(AutofillError::TemplateDimensions {
                width,
                height,
                expected: expected.unwrap_or(usize::MAX),
                actual: template.len(),
            });
        }

        let cells: Vec<String> = template
            .iter()
            .enumerate()
            .map(|(index, cell)| normalize_cell(index, cell.as_ref()))
            .collect::<Result<_, _>>()?;

        let mut topology = GridTopology {
            width,
            height,
            entries: vec![],
            entries_by_cell: vec![[None, None]; cells.len()],
            labels: vec![None; cells.len()],
            cells,
        };

        let mut next_label = 1;
        for row in 0..height {
            for col in 0..width {
                let start = Position::new(row, col);
                if is_block(topology.cell(start)) {
                    continue;
                }

                let mut started_entry = false;
                for direction in Direction::ALL {
                    let run = topology.run_from(start, direction);
                    if run.len() < 2 {
                        continue;
                    }
                    topology.push_entry(next_label, direction, run);
                    started_entry = true;
                }

                if started_entry {
                    let cell_index = topology.cell_index(start);
                    topology.labels[cell_index] = Some(next_label);
                    next_label += 1;
                }
            }
        }

        Ok(topology)
    }

    /// The open cells of the entry starting at `start`, or nothing if `start` doesn't begin one.
    fn run_from(&self, start: Position, direction: Direction) -> SmallVec<[Position; MAX_SLOT_LENGTH]> {
        let mut run = SmallVec::new();
        if self.predecessor(start, direction).map_or(false, |pos| !is_block(self.cell(pos))) {
            return run;
        }

        let mut pos = Some(start);
        while let Some(current) = pos {
            if is_block(self.cell(current)) {
                break;
            }
            run.push(current);
            pos = self.successor(current, direction);
        }
        run
    }

    fn push_entry(&mut self, label: u32, direction: Direction, cells: SmallVec<[Position; MAX_SLOT_LENGTH]>) {
        let index = self.entries.len();
        let mut offsets = SmallVec::with_capacity(cells.len());
        let mut offset = 0;

        for (cell, &pos) in cells.iter().enumerate() {
            offsets.push(offset);
            let cell_index = self.cell_index(pos);
            self.entries_by_cell[cell_index][direction.index()] = Some(EntryCell { entry: index, cell, offset });
            offset += self.cells[cell_index].chars().count();
        }

        self.entries.push(TopologyEntry { index, label, direction, cells, offsets, length: offset });
    }

    fn predecessor(&self, pos: Position, direction: Direction) -> Option<Position> {
        match direction {
            Direction::Across if pos.col > 0 => Some(Position::new(pos.row, pos.col - 1)),
            Direction::Down if pos.row > 0 => Some(Position::new(pos.row - 1, pos.col)),
            _ => None,
        }
    }

    fn successor(&self, pos: Position, direction: Direction) -> Option<Position> {
        match direction {
            Direction::Across if pos.col + 1 < self.width => Some(Position::new(pos.row, pos.col + 1)),
            Direction::Down if pos.row + 1 < self.height => Some(Position::new(pos.row + 1, pos.col)),
            _ => None,
        }
    }

    pub fn cell_index(&self, pos: Position) -> usize {
        pos.row * self.width + pos.col
    }

    pub fn cell(&self, pos: Position) -> &str {
        &self.cells[self.cell_index(pos)]
    }

    /// The entry running through `pos` in `direction`, if there is one.
    pub fn cross(&self, pos: Position, direction: Direction) -> Option<EntryCell> {
        self.entries_by_cell[self.cell_index(pos)][direction.index()]
    }

    /// The across and down entries running through `pos`.
    pub fn entries_at(&self, pos: Position) -> [Option<EntryCell>; 2] {
        self.entries_by_cell[self.cell_index(pos)]
    }

    pub fn label(&self, pos: Position) -> Option<u32> {
        self.labels[self.cell_index(pos)]
    }
}

/// Parse a text template into `(cells, width, height)`. Each non-empty line is a row: `#` is a
/// block, `.` is an open cell, `[XY]` is a rebus cell and anything else is a letter.
pub fn parse_template_string(template: &str) -> Result<(Vec<String>, usize, usize), AutofillError> {
    let mut cells: Vec<String> = vec![];
    let mut width = None;
    let mut height = 0;

    for line in template.lines().map(str::trim).filter(|line| !line.is_empty()) {
        let row = height;
        let mut row_len = 0;
        let mut chars = line.chars();

        while let Some(c) = chars.next() {
            let cell = match c {
                '#' => BLOCK.to_string(),
                '.' => BLANK.to_string(),
                '[' => {
                    let mut rebus = String::new();
                    let mut terminated = false;
                    for c in chars.by_ref() {
                        if c == ']' {
                            terminated = true;
                            break;
                        }
                        rebus.push(c);
                    }
                    if rebus.is_empty() || !terminated {
                        return Err(AutofillError::UnterminatedRebus { row });
                    }
                    rebus.to_uppercase()
                }
                c => c.to_uppercase().collect(),
            };
            cells.push(cell);
            row_len += 1;
        }

        match width {
            None => width = Some(row_len),
            Some(expected) if expected != row_len => {
                return Err(AutofillError::RaggedTemplate { row, expected, actual: row_len });
            }
            Some(_) => {}
        }
        height += 1;
    }

    Ok((cells, width.unwrap_or(0), height))
}

/// Turn a cell array back into the text form read by `parse_template_string`.
pub fn render_grid<S: AsRef<str>>(cells: &[S], width: usize) -> String {
    if width == 0 {
        return String::new();
    }

    cells
        .chunks(width)
        .map(|row| {
            row.iter()
                .map(|cell| match cell.as_ref() {
                    BLOCK => "#".to_string(),
                    BLANK => ".".to_string(),
                    value if value.chars().count() > 1 => format!("[{value}]"),
                    value => value.to_string(),
                })
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join("\n")
}
