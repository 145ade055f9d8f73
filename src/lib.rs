//! Crossword autofill: given a partially filled grid and a scored word list, search for a
//! complete, mutually consistent fill of every entry with the lowest total cost.
//!
//! The search runs in bounded time slices (see [`Autofiller::step`]) so a host can drive it from
//! a timer or idle callback without blocking.

pub mod autofiller;
pub mod errors;
pub mod grid;
pub mod log;
pub mod topology;
pub mod word_index;

/// The expected maximum length for a single entry.
pub const MAX_SLOT_LENGTH: usize = 21;

pub use autofiller::{AutofillConfig, AutofillEvent, Autofiller, Statistics};
pub use errors::AutofillError;
pub use grid::AutofillGrid;
pub use topology::{parse_template_string, render_grid, Direction, GridTopology, Position, BLANK, BLOCK};
pub use word_index::{Cost, WordIndex};
