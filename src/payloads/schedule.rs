use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug)]
pub struct EnsureSlotsPayload {
    pub requester_id: i64,
    pub school_id: i64,
    pub grade_id: i64,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct GetGradeScheduleParams {
    pub requester_id: i64,
    pub school_id: i64,
    pub grade_id: i64,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ValidateAssignmentParams {
    pub requester_id: i64,
    pub school_id: i64,
    pub slot_id: i64,
    // absent means clearing the slot
    pub class_id: Option<i64>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct AssignClassPayload {
    pub requester_id: i64,
    pub school_id: i64,
    pub slot_id: i64,
    pub class_id: Option<i64>,
    /// Class the caller last saw in the slot; `None` means it expected an empty slot.
    #[serde(default)]
    pub expected_current_class_id: Option<i64>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct DeactivateSlotPayload {
    pub requester_id: i64,
    pub school_id: i64,
    pub slot_id: i64,
}
