//! Weekly timetable rules.
//!
//! A grade's grid has one slot per school day and daily time slot. Assigning a
//! class to a slot must not double-book the class or its teacher anywhere in
//! the school at the same day and time. The checks run against a [`SlotLookup`]
//! so they can be driven by the database inside a transaction or by an
//! in-memory fixture.

use chrono::Weekday;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use tracing::debug;

/// ISO day numbers of the school week, Monday through Saturday.
pub const SCHOOL_DAYS: [i16; 6] = [1, 2, 3, 4, 5, 6];

/// The fixed daily time slots.
pub const DAILY_TIME_SLOTS: [i16; 3] = [1, 2, 3];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridCell {
    pub day_of_week: i16,
    pub time_slot: i16,
}

impl GridCell {
    pub fn new(day_of_week: i16, time_slot: i16) -> Self {
        Self {
            day_of_week,
            time_slot,
        }
    }

    pub fn is_valid(&self) -> bool {
        SCHOOL_DAYS.contains(&self.day_of_week) && DAILY_TIME_SLOTS.contains(&self.time_slot)
    }

    pub fn weekday(&self) -> Option<Weekday> {
        match self.day_of_week {
            1 => Some(Weekday::Mon),
            2 => Some(Weekday::Tue),
            3 => Some(Weekday::Wed),
            4 => Some(Weekday::Thu),
            5 => Some(Weekday::Fri),
            6 => Some(Weekday::Sat),
            _ => None,
        }
    }
}

impl fmt::Display for GridCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.weekday() {
            Some(day) => write!(f, "{} slot {}", day, self.time_slot),
            None => write!(f, "day {} slot {}", self.day_of_week, self.time_slot),
        }
    }
}

/// Every cell of a grade's weekly grid, ordered by day then time slot.
pub fn full_grid() -> impl Iterator<Item = GridCell> {
    SCHOOL_DAYS.into_iter().flat_map(|day| {
        DAILY_TIME_SLOTS
            .into_iter()
            .map(move |slot| GridCell::new(day, slot))
    })
}

/// Cells of the full grid that are not in `existing`. Cells outside the grid are ignored.
pub fn missing_cells(existing: &[GridCell]) -> Vec<GridCell> {
    let present: HashSet<GridCell> = existing.iter().copied().collect();
    full_grid().filter(|cell| !present.contains(cell)).collect()
}

/// The slot being edited: its identity, school, and place in the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotPosition {
    pub slot_id: i64,
    pub school_id: i64,
    pub cell: GridCell,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeacherRef {
    pub teacher_id: i64,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleConflict {
    ClassDoubleBooked {
        class_id: i64,
        clashing_slot_ids: Vec<i64>,
    },
    TeacherDoubleBooked {
        teacher: TeacherRef,
        clashing_slot_ids: Vec<i64>,
    },
}

impl ScheduleConflict {
    pub fn reason(&self) -> String {
        match self {
            ScheduleConflict::ClassDoubleBooked { .. } => {
                "class already scheduled at this time".to_string()
            }
            ScheduleConflict::TeacherDoubleBooked { teacher, .. } => format!(
                "teacher {} already scheduled at this time",
                teacher.display_name
            ),
        }
    }

    pub fn clashing_slot_ids(&self) -> &[i64] {
        match self {
            ScheduleConflict::ClassDoubleBooked {
                clashing_slot_ids, ..
            }
            | ScheduleConflict::TeacherDoubleBooked {
                clashing_slot_ids, ..
            } => clashing_slot_ids,
        }
    }
}

impl fmt::Display for ScheduleConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason())
    }
}

impl std::error::Error for ScheduleConflict {}

/// Queries the guard needs. All of them only consider active slots.
pub trait SlotLookup {
    type Error;

    /// Slots in the target's school at the target's day and time holding `class_id`,
    /// excluding the target slot itself.
    fn class_slots_at(
        &mut self,
        target: &SlotPosition,
        class_id: i64,
    ) -> Result<Vec<i64>, Self::Error>;

    /// The class's active teacher, if it has one.
    fn active_teacher(&mut self, class_id: i64) -> Result<Option<TeacherRef>, Self::Error>;

    /// Slots in the target's school at the target's day and time holding a class other
    /// than `excluding_class_id` taught by `teacher_id`, excluding the target slot itself.
    fn teacher_slots_at(
        &mut self,
        target: &SlotPosition,
        teacher_id: i64,
        excluding_class_id: i64,
    ) -> Result<Vec<i64>, Self::Error>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignmentDecision {
    /// Clearing a slot, always legal.
    Clear,
    Accepted,
    Rejected(ScheduleConflict),
}

impl AssignmentDecision {
    pub fn is_accepted(&self) -> bool {
        !matches!(self, AssignmentDecision::Rejected(_))
    }

    pub fn into_result(self) -> Result<(), ScheduleConflict> {
        match self {
            AssignmentDecision::Rejected(conflict) => Err(conflict),
            _ => Ok(()),
        }
    }
}

/// Decides whether `class_id` may be placed in `target`. `None` clears the slot.
///
/// The class check runs first. A class without a teacher skips the teacher check.
/// Nothing is written; the caller persists the assignment after an accept.
pub fn validate_assignment<L: SlotLookup>(
    lookup: &mut L,
    target: &SlotPosition,
    class_id: Option<i64>,
) -> Result<AssignmentDecision, L::Error> {
    let Some(class_id) = class_id else {
        debug!("Clearing slot {}, no conflict possible", target.slot_id);
        return Ok(AssignmentDecision::Clear);
    };

    let clashing = lookup.class_slots_at(target, class_id)?;
    if !clashing.is_empty() {
        debug!(
            "Class {} already placed at {} in slots {:?}",
            class_id, target.cell, clashing
        );
        return Ok(AssignmentDecision::Rejected(
            ScheduleConflict::ClassDoubleBooked {
                class_id,
                clashing_slot_ids: clashing,
            },
        ));
    }

    let Some(teacher) = lookup.active_teacher(class_id)? else {
        debug!("Class {} has no active teacher, skipping teacher check", class_id);
        return Ok(AssignmentDecision::Accepted);
    };

    let clashing = lookup.teacher_slots_at(target, teacher.teacher_id, class_id)?;
    if !clashing.is_empty() {
        debug!(
            "Teacher {} already teaching at {} in slots {:?}",
            teacher.teacher_id, target.cell, clashing
        );
        return Ok(AssignmentDecision::Rejected(
            ScheduleConflict::TeacherDoubleBooked {
                teacher,
                clashing_slot_ids: clashing,
            },
        ));
    }

    Ok(AssignmentDecision::Accepted)
}
