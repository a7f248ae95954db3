use crate::engine::schedule::{GridCell, SlotPosition};
use crate::schema::schedule_slots;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Insertable, Debug)]
#[diesel(table_name = schedule_slots)]
pub struct NewScheduleSlot {
    pub school_id: i64,
    pub grade_id: i64,
    pub day_of_week: i16,
    pub time_slot: i16,
    // class_id is nullable (defaults to NULL)
    // is_active defaults to true, updated_at has DB default
}

#[derive(Queryable, Selectable, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[diesel(table_name = schedule_slots)]
pub struct ScheduleSlot {
    pub id: i64,
    pub school_id: i64,
    pub grade_id: i64,
    pub day_of_week: i16,
    pub time_slot: i16,
    pub class_id: Option<i64>,
    pub is_active: bool,
    pub updated_at: DateTime<Utc>,
}

impl ScheduleSlot {
    pub fn cell(&self) -> GridCell {
        GridCell::new(self.day_of_week, self.time_slot)
    }

    pub fn position(&self) -> SlotPosition {
        SlotPosition {
            slot_id: self.id,
            school_id: self.school_id,
            cell: self.cell(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ScheduleCellResponse {
    pub slot_id: i64,
    pub day_of_week: i16,
    pub day_name: String,
    pub time_slot: i16,
    pub class_id: Option<i64>,
    pub class_name: Option<String>,
    pub teacher_name: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GradeScheduleResponse {
    pub grade_id: i64,
    pub cells: Vec<ScheduleCellResponse>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EnsureSlotsResponse {
    pub grade_id: i64,
    pub created: usize,
    pub total: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AssignmentValidationResponse {
    pub ok: bool,
    pub reason: Option<String>,
    #[serde(default)]
    pub clashing_slot_ids: Vec<i64>,
}
