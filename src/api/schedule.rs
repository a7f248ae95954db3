use super::helper;
use crate::engine::schedule::{
    self, AssignmentDecision, GridCell, SlotLookup, SlotPosition, TeacherRef,
};
use crate::errors::AppError;
use crate::model::schedule::{
    AssignmentValidationResponse, EnsureSlotsResponse, GradeScheduleResponse, NewScheduleSlot,
    ScheduleCellResponse, ScheduleSlot,
};
use crate::model::school::{Role, SchoolContext};
use crate::payloads::schedule::{
    AssignClassPayload, DeactivateSlotPayload, EnsureSlotsPayload, GetGradeScheduleParams,
    ValidateAssignmentParams,
};
use crate::response::ApiResponse;
use crate::schema::{
    class_teachers::dsl as ct_dsl, classes::dsl as classes_dsl,
    schedule_slots::dsl as slots_dsl, teachers::dsl as teachers_dsl,
};
use anyhow::anyhow;
use axum::{
    Json,
    extract::{Query, State},
};
use deadpool_diesel::postgres::Pool;
use diesel::dsl::now;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use std::collections::HashMap;
use tracing::{debug, error, info, instrument, warn};

const ANY_MEMBER: &[Role] = &[Role::Admin, Role::Teacher, Role::Student];
const ADMIN_ONLY: &[Role] = &[Role::Admin];

/// Slot lookups backed by the connection of the surrounding interaction or transaction.
struct PgSlotLookup<'a> {
    conn: &'a mut PgConnection,
}

impl SlotLookup for PgSlotLookup<'_> {
    type Error = DieselError;

    fn class_slots_at(
        &mut self,
        target: &SlotPosition,
        class_id: i64,
    ) -> Result<Vec<i64>, DieselError> {
        slots_dsl::schedule_slots
            .filter(slots_dsl::school_id.eq(target.school_id))
            .filter(slots_dsl::day_of_week.eq(target.cell.day_of_week))
            .filter(slots_dsl::time_slot.eq(target.cell.time_slot))
            .filter(slots_dsl::is_active.eq(true))
            .filter(slots_dsl::class_id.eq(class_id))
            .filter(slots_dsl::id.ne(target.slot_id))
            .select(slots_dsl::id)
            .order(slots_dsl::id.asc())
            .load::<i64>(self.conn)
    }

    fn active_teacher(&mut self, class_id: i64) -> Result<Option<TeacherRef>, DieselError> {
        let teacher = ct_dsl::class_teachers
            .inner_join(teachers_dsl::teachers.on(ct_dsl::teacher_id.eq(teachers_dsl::id)))
            .filter(ct_dsl::class_id.eq(class_id))
            .filter(ct_dsl::is_active.eq(true))
            .select((teachers_dsl::id, teachers_dsl::display_name))
            .first::<(i64, String)>(self.conn)
            .optional()?;

        Ok(teacher.map(|(teacher_id, display_name)| TeacherRef {
            teacher_id,
            display_name,
        }))
    }

    fn teacher_slots_at(
        &mut self,
        target: &SlotPosition,
        teacher_id: i64,
        excluding_class_id: i64,
    ) -> Result<Vec<i64>, DieselError> {
        slots_dsl::schedule_slots
            .inner_join(
                ct_dsl::class_teachers.on(slots_dsl::class_id.eq(ct_dsl::class_id.nullable())),
            )
            .filter(slots_dsl::school_id.eq(target.school_id))
            .filter(slots_dsl::day_of_week.eq(target.cell.day_of_week))
            .filter(slots_dsl::time_slot.eq(target.cell.time_slot))
            .filter(slots_dsl::is_active.eq(true))
            .filter(slots_dsl::id.ne(target.slot_id))
            .filter(ct_dsl::teacher_id.eq(teacher_id))
            .filter(ct_dsl::is_active.eq(true))
            .filter(ct_dsl::class_id.ne(excluding_class_id))
            .select(slots_dsl::id)
            .order(slots_dsl::id.asc())
            .load::<i64>(self.conn)
    }
}

/// Inserts the grid cells the grade is missing and returns how many were created.
fn ensure_grid(
    conn: &mut PgConnection,
    school_id: i64,
    grade_id: i64,
) -> Result<usize, DieselError> {
    let existing = slots_dsl::schedule_slots
        .filter(slots_dsl::school_id.eq(school_id))
        .filter(slots_dsl::grade_id.eq(grade_id))
        .filter(slots_dsl::is_active.eq(true))
        .select((slots_dsl::day_of_week, slots_dsl::time_slot))
        .load::<(i16, i16)>(conn)?
        .into_iter()
        .map(|(day, slot)| GridCell::new(day, slot))
        .collect::<Vec<_>>();

    let missing = schedule::missing_cells(&existing);
    if missing.is_empty() {
        debug!("Grade {} already has a complete grid", grade_id);
        return Ok(0);
    }

    let new_slots: Vec<NewScheduleSlot> = missing
        .iter()
        .map(|cell| NewScheduleSlot {
            school_id,
            grade_id,
            day_of_week: cell.day_of_week,
            time_slot: cell.time_slot,
        })
        .collect();

    // a concurrent initializer may have inserted some cells already
    let created = diesel::insert_into(slots_dsl::schedule_slots)
        .values(&new_slots)
        .on_conflict_do_nothing()
        .execute(conn)?;

    info!(
        "Created {} of {} missing grid cells for grade {}",
        created,
        missing.len(),
        grade_id
    );
    Ok(created)
}

/// Loads an active slot of the requester's school, optionally locking the row.
fn load_slot(
    conn: &mut PgConnection,
    ctx: &SchoolContext,
    slot_id: i64,
    lock: bool,
) -> Result<ScheduleSlot, AppError> {
    let query = slots_dsl::schedule_slots
        .filter(slots_dsl::id.eq(slot_id))
        .filter(slots_dsl::school_id.eq(ctx.school_id))
        .select(ScheduleSlot::as_select());

    let slot = if lock {
        query.for_update().first::<ScheduleSlot>(conn).optional()?
    } else {
        query.first::<ScheduleSlot>(conn).optional()?
    };

    let Some(slot) = slot else {
        error!("Schedule slot {} not found in school {}", slot_id, ctx.school_id);
        return Err(AppError::NotFound(format!(
            "Schedule slot with ID {} not found in school {}.",
            slot_id, ctx.school_id
        )));
    };

    if !slot.is_active {
        warn!("Schedule slot {} is no longer active", slot_id);
        return Err(AppError::Conflict(format!(
            "Schedule slot with ID {} is no longer active.",
            slot_id
        )));
    }
    Ok(slot)
}

/// The class must belong to the school and be taught in the slot's grade.
fn check_class_fits_slot(
    conn: &mut PgConnection,
    ctx: &SchoolContext,
    slot: &ScheduleSlot,
    class_id: i64,
) -> Result<(), AppError> {
    let class_grade_id = helper::class_in_school(conn, ctx, class_id)?;
    if class_grade_id != slot.grade_id {
        warn!(
            "Class {} belongs to grade {}, slot {} to grade {}",
            class_id, class_grade_id, slot.id, slot.grade_id
        );
        return Err(AppError::UnprocessableEntity(format!(
            "Class with ID {} is not taught in grade {}.",
            class_id, slot.grade_id
        )));
    }
    Ok(())
}

/// Guarantees that the grade's weekly grid has exactly one active slot per
/// school day and daily time slot. Only missing cells are inserted.
///
/// Request Body: `EnsureSlotsPayload`
///
/// Returns (wrapped in `ApiResponse`)
/// * `EnsureSlotsResponse`: Number of created cells and grid size (200 OK).
/// * `403 Forbidden`: If the requester is not an admin of the school.
/// * `404 Not Found`: If the grade does not exist in the school.
/// * `503 Service Unavailable`: If the data store cannot be reached.
/// * `500 Internal Server Error`: If a database error occurs.
#[instrument(skip(pool, payload))]
pub async fn ensure_slots(
    State(pool): State<Pool>,
    Json(payload): Json<EnsureSlotsPayload>,
) -> Result<ApiResponse<EnsureSlotsResponse>, AppError> {
    let grade_id = payload.grade_id;
    info!(
        "Ensuring schedule grid for grade {} in school {}",
        grade_id, payload.school_id
    );
    debug!("Ensure slots payload: {:?}", payload);

    let ctx =
        helper::require_school_role(&pool, payload.requester_id, payload.school_id, ADMIN_ONLY)
            .await?;

    let conn = pool.get().await?;
    let created: Result<usize, AppError> = conn
        .interact(move |conn_sync| {
            conn_sync.transaction(|tx_conn| {
                helper::grade_in_school(tx_conn, &ctx, grade_id)?;
                Ok(ensure_grid(tx_conn, ctx.school_id, grade_id)?)
            })
        })
        .await?;
    let created = created?;

    let total = schedule::full_grid().count();
    info!(
        "Grid for grade {} complete, {} cells created",
        grade_id, created
    );
    Ok(ApiResponse::ok(EnsureSlotsResponse {
        grade_id,
        created,
        total,
    }))
}

/// Retrieves a grade's weekly grid, initializing missing cells first.
///
/// Query Parameters:
/// * `requester_id`, `school_id`: The requester and the school acted in.
/// * `grade_id`: The grade whose grid is returned.
///
/// Returns (wrapped in `ApiResponse`)
/// * `GradeScheduleResponse`: Cells ordered by day and time slot, with class and teacher
///   names (200 OK).
/// * `403 Forbidden`: If the requester is not a member of the school.
/// * `404 Not Found`: If the grade does not exist in the school.
/// * `500 Internal Server Error`: If a database error occurs.
#[instrument(skip(pool, params))]
pub async fn get_grade_schedule(
    State(pool): State<Pool>,
    Query(params): Query<GetGradeScheduleParams>,
) -> Result<ApiResponse<GradeScheduleResponse>, AppError> {
    let grade_id = params.grade_id;
    info!(
        "Fetching schedule for grade {} in school {}",
        grade_id, params.school_id
    );
    debug!("Get grade schedule params: {:?}", params);

    let ctx =
        helper::require_school_role(&pool, params.requester_id, params.school_id, ANY_MEMBER)
            .await?;

    let conn = pool.get().await?;
    let cells: Result<Vec<ScheduleCellResponse>, AppError> = conn
        .interact(move |conn_sync| {
            conn_sync.transaction(|tx_conn| {
                helper::grade_in_school(tx_conn, &ctx, grade_id)?;
                ensure_grid(tx_conn, ctx.school_id, grade_id)?;

                let rows = slots_dsl::schedule_slots
                    .left_join(
                        classes_dsl::classes
                            .on(slots_dsl::class_id.eq(classes_dsl::id.nullable())),
                    )
                    .filter(slots_dsl::school_id.eq(ctx.school_id))
                    .filter(slots_dsl::grade_id.eq(grade_id))
                    .filter(slots_dsl::is_active.eq(true))
                    .order((slots_dsl::day_of_week.asc(), slots_dsl::time_slot.asc()))
                    .select((
                        slots_dsl::id,
                        slots_dsl::day_of_week,
                        slots_dsl::time_slot,
                        slots_dsl::class_id,
                        classes_dsl::name.nullable(),
                    ))
                    .load::<(i64, i16, i16, Option<i64>, Option<String>)>(tx_conn)?;

                let class_ids: Vec<i64> = rows.iter().filter_map(|row| row.3).collect();
                let teacher_names: HashMap<i64, String> = ct_dsl::class_teachers
                    .inner_join(
                        teachers_dsl::teachers.on(ct_dsl::teacher_id.eq(teachers_dsl::id)),
                    )
                    .filter(ct_dsl::class_id.eq_any(class_ids))
                    .filter(ct_dsl::is_active.eq(true))
                    .select((ct_dsl::class_id, teachers_dsl::display_name))
                    .load::<(i64, String)>(tx_conn)?
                    .into_iter()
                    .collect();

                Ok(rows
                    .into_iter()
                    .map(|(slot_id, day_of_week, time_slot, class_id, class_name)| {
                        let cell = GridCell::new(day_of_week, time_slot);
                        ScheduleCellResponse {
                            slot_id,
                            day_of_week,
                            day_name: cell
                                .weekday()
                                .map(|day| day.to_string())
                                .unwrap_or_else(|| day_of_week.to_string()),
                            time_slot,
                            class_id,
                            class_name,
                            teacher_name: class_id.and_then(|id| teacher_names.get(&id).cloned()),
                        }
                    })
                    .collect())
            })
        })
        .await?;
    let cells = cells?;

    info!(
        "Successfully fetched {} schedule cells for grade {}",
        cells.len(),
        grade_id
    );
    Ok(ApiResponse::ok(GradeScheduleResponse { grade_id, cells }))
}

/// Checks whether a class may be placed in a slot without writing anything.
///
/// Query Parameters:
/// * `requester_id`, `school_id`: The requester and the school acted in.
/// * `slot_id`: The slot to fill.
/// * `class_id`: The class to place, absent to clear the slot.
///
/// Returns (wrapped in `ApiResponse`)
/// * `AssignmentValidationResponse`: `ok` and, on rejection, the reason (200 OK).
/// * `403 Forbidden`: If the requester is not an admin of the school.
/// * `404 Not Found`: If the slot or class does not exist in the school.
/// * `409 Conflict`: If the slot is no longer active.
/// * `422 Unprocessable Entity`: If the class is taught in another grade.
/// * `500 Internal Server Error`: If a database error occurs.
#[instrument(skip(pool, params))]
pub async fn validate_assignment(
    State(pool): State<Pool>,
    Query(params): Query<ValidateAssignmentParams>,
) -> Result<ApiResponse<AssignmentValidationResponse>, AppError> {
    let slot_id = params.slot_id;
    let class_id = params.class_id;
    info!(
        "Validating assignment of class {:?} to slot {}",
        class_id, slot_id
    );
    debug!("Validate assignment params: {:?}", params);

    let ctx =
        helper::require_school_role(&pool, params.requester_id, params.school_id, ADMIN_ONLY)
            .await?;

    let conn = pool.get().await?;
    let decision: Result<AssignmentDecision, AppError> = conn
        .interact(move |conn_sync| {
            let slot = load_slot(conn_sync, &ctx, slot_id, false)?;
            if let Some(class_id) = class_id {
                check_class_fits_slot(conn_sync, &ctx, &slot, class_id)?;
            }
            let mut lookup = PgSlotLookup { conn: &mut *conn_sync };
            Ok(schedule::validate_assignment(
                &mut lookup,
                &slot.position(),
                class_id,
            )?)
        })
        .await?;

    let response = match decision? {
        AssignmentDecision::Rejected(conflict) => {
            info!(
                "Assignment of class {:?} to slot {} rejected: {}",
                class_id, slot_id, conflict
            );
            AssignmentValidationResponse {
                ok: false,
                reason: Some(conflict.reason()),
                clashing_slot_ids: conflict.clashing_slot_ids().to_vec(),
            }
        }
        _ => {
            info!("Assignment of class {:?} to slot {} is legal", class_id, slot_id);
            AssignmentValidationResponse {
                ok: true,
                reason: None,
                clashing_slot_ids: Vec::new(),
            }
        }
    };
    Ok(ApiResponse::ok(response))
}

/// Places a class in a slot, or clears it when `class_id` is absent.
///
/// The slot row is locked and the conflict checks and the write share one
/// serializable transaction. The write only applies while the slot still
/// holds `expected_current_class_id`.
///
/// Request Body: `AssignClassPayload`
///
/// Returns (wrapped in `ApiResponse`)
/// * `ScheduleSlot`: The updated slot (200 OK).
/// * `403 Forbidden`: If the requester is not an admin of the school.
/// * `404 Not Found`: If the slot or class does not exist in the school.
/// * `409 Conflict`: On double-booking, a stale expectation, or a concurrent change.
/// * `422 Unprocessable Entity`: If the class is taught in another grade.
/// * `500 Internal Server Error`: If a database error occurs.
#[instrument(skip(pool, payload))]
pub async fn assign_class(
    State(pool): State<Pool>,
    Json(payload): Json<AssignClassPayload>,
) -> Result<ApiResponse<ScheduleSlot>, AppError> {
    let slot_id = payload.slot_id;
    let class_id = payload.class_id;
    let expected = payload.expected_current_class_id;
    info!(
        "Attempting to assign class {:?} to slot {} (expecting {:?})",
        class_id, slot_id, expected
    );
    debug!("Assign class payload: {:?}", payload);

    let ctx =
        helper::require_school_role(&pool, payload.requester_id, payload.school_id, ADMIN_ONLY)
            .await?;

    let conn = pool.get().await?;
    let updated: Result<ScheduleSlot, AppError> = conn
        .interact(move |conn_sync| {
            conn_sync
                .build_transaction()
                .serializable()
                .run(|tx_conn| {
                    let slot = load_slot(tx_conn, &ctx, slot_id, true)?;

                    if slot.class_id != expected {
                        warn!(
                            "Slot {} holds class {:?}, caller expected {:?}",
                            slot_id, slot.class_id, expected
                        );
                        return Err(AppError::Conflict(format!(
                            "Schedule slot with ID {} was changed by someone else, \
                             reload and retry.",
                            slot_id
                        )));
                    }

                    if let Some(class_id) = class_id {
                        check_class_fits_slot(tx_conn, &ctx, &slot, class_id)?;
                    }

                    let mut lookup = PgSlotLookup { conn: &mut *tx_conn };
                    schedule::validate_assignment(&mut lookup, &slot.position(), class_id)?
                        .into_result()?;

                    let rows_affected = diesel::update(
                        slots_dsl::schedule_slots
                            .filter(slots_dsl::id.eq(slot_id))
                            .filter(slots_dsl::is_active.eq(true)),
                    )
                    .set((
                        slots_dsl::class_id.eq(class_id),
                        slots_dsl::updated_at.eq(now),
                    ))
                    .execute(tx_conn)
                    .map_err(|e| match e {
                        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                            warn!("Unique index rejected class {:?} in slot {}", class_id, slot_id);
                            AppError::Conflict("class already scheduled at this time".to_string())
                        }
                        _ => AppError::from(e),
                    })?;

                    match rows_affected {
                        1 => Ok(load_slot(tx_conn, &ctx, slot_id, false)?),
                        n => {
                            error!(
                                "Expected 1 row affected by slot update, got {} for slot {}",
                                n, slot_id
                            );
                            Err(AppError::InternalServerError(anyhow!(
                                "Slot update affected {} rows, expected 1",
                                n
                            )))
                        }
                    }
                })
        })
        .await?;
    let updated = updated?;

    info!(
        "Slot {} now holds class {:?}",
        updated.id, updated.class_id
    );
    Ok(ApiResponse::ok(updated))
}

/// Soft-deactivates a slot. Deactivated slots take no part in conflict checks
/// and are recreated by the next grid initialization.
///
/// Request Body: `DeactivateSlotPayload`
///
/// Returns (wrapped in `ApiResponse`)
/// * `()`: Empty success response (200 OK).
/// * `403 Forbidden`: If the requester is not an admin of the school.
/// * `404 Not Found`: If no active slot with that ID exists in the school.
/// * `500 Internal Server Error`: If a database error occurs.
#[instrument(skip(pool, payload))]
pub async fn deactivate_slot(
    State(pool): State<Pool>,
    Json(payload): Json<DeactivateSlotPayload>,
) -> Result<ApiResponse<()>, AppError> {
    let slot_id = payload.slot_id;
    info!("Attempting to deactivate slot {}", slot_id);
    debug!("Deactivate slot payload: {:?}", payload);

    let ctx =
        helper::require_school_role(&pool, payload.requester_id, payload.school_id, ADMIN_ONLY)
            .await?;

    let rows_affected = helper::run_query(&pool, move |conn| {
        diesel::update(
            slots_dsl::schedule_slots
                .filter(slots_dsl::id.eq(slot_id))
                .filter(slots_dsl::school_id.eq(ctx.school_id))
                .filter(slots_dsl::is_active.eq(true)),
        )
        .set((
            slots_dsl::is_active.eq(false),
            slots_dsl::updated_at.eq(now),
        ))
        .execute(conn)
    })
    .await?;

    match rows_affected {
        0 => {
            error!(
                "No active slot {} in school {} to deactivate",
                slot_id, ctx.school_id
            );
            Err(AppError::NotFound(format!(
                "Active schedule slot with ID {} not found in school {}.",
                slot_id, ctx.school_id
            )))
        }
        1 => {
            info!("Successfully deactivated slot {}", slot_id);
            Ok(ApiResponse::ok(()))
        }
        n => {
            error!(
                "Expected 1 row affected by deactivation, got {} for slot {}",
                n, slot_id
            );
            Err(AppError::InternalServerError(anyhow!(
                "Deactivation affected {} rows, expected 1",
                n
            )))
        }
    }
}
