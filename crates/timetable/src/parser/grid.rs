//! Column-block decoding of the spreadsheet timetable layout.
//!
//! Sheets are laid out in repeating blocks of 15 columns. The first ten columns
//! ("type 1") and the last five ("type 2") may each hold one group, identified by a
//! header in row 2. From row 4 down, every 14 rows form one weekday and every two rows
//! one pair. Parity follows the sheet row number: the pair's first row (an even row)
//! holds the even-week lesson, the second (odd) row the odd-week lesson.

use super::text::{normalize_space, split_grid_room, split_names};
use crate::model::{
    GroupSchedules, LessonData, LessonTypes, PairSlot, Parity, ScheduleResult, Weekday,
};
use std::collections::BTreeMap;
use tracing::debug;

const BLOCK_WIDTH: u32 = 15;
const HEADER_ROW: u32 = 2;
const FIRST_DATA_ROW: u32 = 4;
const ROWS_PER_DAY: u32 = 14;
const MIN_SUBJECT_CHARS: usize = 3;

/// A decoded worksheet: 1-based (row, column) -> trimmed cell text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CellGrid {
    cells: BTreeMap<(u32, u32), String>,
    max_row: u32,
    max_col: u32,
}

impl CellGrid {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a grid from rows of text, top-left cell at (1, 1).
    pub fn from_rows<S: AsRef<str>>(rows: &[Vec<S>]) -> Self {
        let mut grid = Self::new();
        for (r, row) in rows.iter().enumerate() {
            for (c, value) in row.iter().enumerate() {
                grid.set(r as u32 + 1, c as u32 + 1, value.as_ref());
            }
        }
        grid
    }

    /// Stores a cell. Empty values are dropped but still extend the grid bounds.
    pub fn set(&mut self, row: u32, col: u32, value: &str) {
        if row == 0 || col == 0 {
            return;
        }
        self.max_row = self.max_row.max(row);
        self.max_col = self.max_col.max(col);
        let value = value.trim();
        if !value.is_empty() {
            self.cells.insert((row, col), value.to_string());
        }
    }

    /// Cell text, or `""` for blank cells.
    pub fn get(&self, row: u32, col: u32) -> &str {
        self.cells.get(&(row, col)).map(String::as_str).unwrap_or("")
    }

    pub fn max_row(&self) -> u32 {
        self.max_row
    }

    pub fn max_col(&self) -> u32 {
        self.max_col
    }
}

/// Where the header and each field sit relative to the start of a 15-column block.
struct BlockLayout {
    header: u32,
    subject: u32,
    lesson_type: u32,
    teacher: u32,
    room: u32,
}

const TYPE_ONE: BlockLayout = BlockLayout {
    header: 5,
    subject: 5,
    lesson_type: 6,
    teacher: 7,
    room: 8,
};

const TYPE_TWO: BlockLayout = BlockLayout {
    header: 10,
    subject: 10,
    lesson_type: 11,
    teacher: 12,
    room: 13,
};

/// Position of a data row within the weekly layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowSlot {
    pub weekday: Weekday,
    pub pair: PairSlot,
    pub parity: Parity,
}

impl RowSlot {
    /// Maps a 1-based sheet row to its weekday, pair and parity.
    ///
    /// Returns `None` for header rows and for rows below the last weekday.
    pub fn for_row(row: u32) -> Option<Self> {
        let offset = row.checked_sub(FIRST_DATA_ROW)?;
        let weekday = Weekday::from_index(u8::try_from(offset / ROWS_PER_DAY).ok()?)?;
        let pair = PairSlot::new(((offset % ROWS_PER_DAY) / 2 + 1) as u8).ok()?;
        let parity = if row % 2 == 1 { Parity::Odd } else { Parity::Even };
        Some(Self {
            weekday,
            pair,
            parity,
        })
    }
}

/// Decodes cell grids into per-group nominal schedules.
#[derive(Debug, Clone)]
pub struct GridParser {
    group_marker: String,
    lesson_types: LessonTypes,
}

impl GridParser {
    pub fn new(group_marker: impl Into<String>, lesson_types: LessonTypes) -> Self {
        Self {
            group_marker: group_marker.into(),
            lesson_types,
        }
    }

    /// Parses one grid. The result holds a two-week cycle: week 1 for odd weeks and
    /// week 2 for even weeks.
    pub fn parse(&self, grid: &CellGrid) -> GroupSchedules {
        let mut groups = GroupSchedules::new();
        self.parse_into(grid, &mut groups);
        groups
    }

    /// Parses one grid, merging its groups into `groups`.
    pub fn parse_into(&self, grid: &CellGrid, groups: &mut GroupSchedules) {
        let mut start = 1;
        while start <= grid.max_col() {
            for layout in [&TYPE_ONE, &TYPE_TWO] {
                let header_col = start + layout.header;
                if header_col > grid.max_col() {
                    continue;
                }
                let header = grid.get(HEADER_ROW, header_col);
                if !header.contains(self.group_marker.as_str()) {
                    continue;
                }

                let group_name = normalize_space(header);
                let schedule = groups
                    .entry(group_name.clone())
                    .or_insert_with(|| ScheduleResult::new(group_name.clone()));
                let before = schedule.lesson_count();
                self.parse_block(grid, start, layout, schedule);
                debug!(
                    group = %group_name,
                    column = start,
                    lessons = schedule.lesson_count() - before,
                    "Parsed grid block"
                );
            }
            start += BLOCK_WIDTH;
        }
    }

    fn parse_block(
        &self,
        grid: &CellGrid,
        start: u32,
        layout: &BlockLayout,
        schedule: &mut ScheduleResult,
    ) {
        let mut last_teachers: Vec<String> = Vec::new();

        for row in FIRST_DATA_ROW..=grid.max_row() {
            let Some(slot) = RowSlot::for_row(row) else {
                break;
            };

            let subject = normalize_space(grid.get(row, start + layout.subject));
            if subject.chars().count() < MIN_SUBJECT_CHARS {
                continue;
            }

            let mut teachers = split_names(grid.get(row, start + layout.teacher));
            if teachers.is_empty() {
                teachers = last_teachers.clone();
            } else {
                last_teachers = teachers.clone();
            }

            let (lesson_type, lesson_type_id) = self
                .lesson_types
                .lookup(grid.get(row, start + layout.lesson_type))
                .map(|t| (t.code.clone(), t.id))
                .unwrap_or_default();
            let (rooms, campus) = split_grid_room(grid.get(row, start + layout.room));

            let lesson = LessonData {
                subject,
                teachers,
                rooms,
                campus,
                lesson_type,
                lesson_type_id,
                date: None,
            };
            schedule.insert(slot.parity.template_week(), slot.weekday, slot.pair, lesson);
        }
    }
}
