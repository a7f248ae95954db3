use super::helper;
use crate::engine::averaging::{
    self, AveragingPolicy, GradeClass, MarkInput, MarkType, MissingMarkPolicy, QuarterFigures,
};
use crate::errors::AppError;
use crate::model::grading::{
    MarkChangeResponse, MarkRow, NewMark, NewQuarterAverage, NewYearlyAverage, QuarterAverageRow,
    YearlyAverageRow,
};
use crate::model::school::{Role, SchoolContext};
use crate::payloads::grading::{
    GetQuarterAverageParams, GetStudentMarksParams, GetYearlyAverageParams,
    RecomputeQuarterAveragePayload, RecomputeYearlyAveragePayload, RemoveMarkPayload,
    UpsertMarkPayload,
};
use crate::response::ApiResponse;
use crate::schema::{
    academic_quarters::dsl as aq_dsl, classes::dsl as classes_dsl, marks::dsl as marks_dsl,
    quarter_averages::dsl as qa_dsl, yearly_averages::dsl as ya_dsl,
};
use axum::{
    Json,
    extract::{Query, State},
};
use bigdecimal::{BigDecimal, RoundingMode, ToPrimitive};
use deadpool_diesel::postgres::Pool;
use diesel::dsl::now;
use diesel::prelude::*;
use diesel::upsert::excluded;
use tracing::{debug, error, info, instrument, warn};

const ANY_MEMBER: &[Role] = &[Role::Admin, Role::Teacher, Role::Student];
const STAFF: &[Role] = &[Role::Admin, Role::Teacher];

// marks and max marks are stored as NUMERIC(6, 2)
const MARK_SCALE: i64 = 2;

fn mark_column_limit() -> BigDecimal {
    BigDecimal::new(999_999.into(), MARK_SCALE)
}

fn parse_mark_type(raw: &str) -> Result<MarkType, AppError> {
    raw.parse::<MarkType>().map_err(|parse_err| {
        warn!("Rejected mark type '{}'", raw);
        AppError::UnprocessableEntity(parse_err)
    })
}

// id, class, type, mark, max mark, coefficient, grade of the class
type MarkWithClass = (i64, i64, String, Option<BigDecimal>, BigDecimal, BigDecimal, i64);

/// Rounds the mark and its maximum to the precision the store keeps, then
/// checks the bounds on the rounded values. Returns what will be stored.
fn validate_mark(
    mark: Option<BigDecimal>,
    max_mark: BigDecimal,
) -> Result<(Option<BigDecimal>, BigDecimal), AppError> {
    let zero = BigDecimal::from(0);
    // NUMERIC rounds halves away from zero
    let max_mark = max_mark.with_scale_round(MARK_SCALE, RoundingMode::HalfUp);
    let mark = mark.map(|mark| mark.with_scale_round(MARK_SCALE, RoundingMode::HalfUp));

    if max_mark <= zero {
        warn!("Rejected max_mark {}", max_mark);
        return Err(AppError::UnprocessableEntity(format!(
            "max_mark must be at least 0.01, got {}",
            max_mark
        )));
    }
    let limit = mark_column_limit();
    if max_mark > limit {
        warn!("Rejected max_mark {} above {}", max_mark, limit);
        return Err(AppError::UnprocessableEntity(format!(
            "max_mark must not exceed {}, got {}",
            limit, max_mark
        )));
    }
    if let Some(mark) = &mark {
        if *mark < zero || *mark > max_mark {
            warn!("Rejected mark {} outside [0, {}]", mark, max_mark);
            return Err(AppError::UnprocessableEntity(format!(
                "Mark {} is outside the allowed range [0, {}]",
                mark, max_mark
            )));
        }
    }
    Ok((mark, max_mark))
}

/// Rebuilds and stores the student's aggregate for one quarter from the current marks.
///
/// The aggregate belongs to the grade the quarter's marks were given in. Only a
/// quarter without marks falls back to the grade already stored for it, then
/// to `current_grade_id`.
fn recompute_quarter(
    conn: &mut PgConnection,
    policy: &AveragingPolicy,
    student_id: i64,
    current_grade_id: i64,
    academic_quarter_id: i64,
) -> Result<QuarterAverageRow, AppError> {
    let rows = marks_dsl::marks
        .inner_join(classes_dsl::classes.on(marks_dsl::class_id.eq(classes_dsl::id)))
        .filter(marks_dsl::student_id.eq(student_id))
        .filter(marks_dsl::academic_quarter_id.eq(academic_quarter_id))
        .select((
            marks_dsl::id,
            marks_dsl::class_id,
            marks_dsl::mark_type,
            marks_dsl::mark,
            marks_dsl::max_mark,
            classes_dsl::coefficient,
            classes_dsl::grade_id,
        ))
        .order(marks_dsl::id.asc())
        .load::<MarkWithClass>(conn)?;

    let grade_id = match rows.first() {
        Some(first) => {
            let mark_grade_id = first.6;
            if rows.iter().any(|row| row.6 != mark_grade_id) {
                warn!(
                    "Marks of student {} in quarter {} span several grades, using grade {}",
                    student_id, academic_quarter_id, mark_grade_id
                );
            }
            mark_grade_id
        }
        None => qa_dsl::quarter_averages
            .filter(qa_dsl::student_id.eq(student_id))
            .filter(qa_dsl::academic_quarter_id.eq(academic_quarter_id))
            .select(qa_dsl::grade_id)
            .first::<i64>(conn)
            .optional()?
            .unwrap_or(current_grade_id),
    };

    let inputs: Vec<MarkInput> = rows
        .into_iter()
        .filter_map(|(mark_id, class_id, mark_type, mark, max_mark, coefficient, _)| {
            let mark_type = match mark_type.parse::<MarkType>() {
                Ok(mark_type) => mark_type,
                Err(parse_err) => {
                    warn!("Skipping mark {}: {}", mark_id, parse_err);
                    return None;
                }
            };
            let (Some(max_mark), Some(coefficient)) =
                (max_mark.to_f64(), coefficient.to_f64())
            else {
                warn!("Skipping mark {}: numeric value not representable", mark_id);
                return None;
            };
            Some(MarkInput {
                mark_id,
                class_id,
                mark_type,
                mark: mark.and_then(|m| m.to_f64()),
                max_mark,
                coefficient,
            })
        })
        .collect();

    let grade_classes = if policy.missing_marks == MissingMarkPolicy::Zero {
        classes_dsl::classes
            .filter(classes_dsl::grade_id.eq(grade_id))
            .select((classes_dsl::id, classes_dsl::coefficient))
            .load::<(i64, BigDecimal)>(conn)?
            .into_iter()
            .filter_map(|(class_id, coefficient)| {
                coefficient.to_f64().map(|coefficient| GradeClass {
                    class_id,
                    coefficient,
                })
            })
            .collect()
    } else {
        Vec::new()
    };

    let figures = averaging::compute_quarter(&inputs, &grade_classes, policy);
    debug!(
        "Quarter {} figures for student {} from {} marks: {:?}",
        academic_quarter_id,
        student_id,
        inputs.len(),
        figures
    );

    let new_row =
        NewQuarterAverage::from_figures(student_id, academic_quarter_id, grade_id, figures);
    let stored = diesel::insert_into(qa_dsl::quarter_averages)
        .values(&new_row)
        .on_conflict((qa_dsl::student_id, qa_dsl::academic_quarter_id))
        .do_update()
        .set((
            qa_dsl::grade_id.eq(excluded(qa_dsl::grade_id)),
            qa_dsl::assessment_average.eq(excluded(qa_dsl::assessment_average)),
            qa_dsl::exam_average.eq(excluded(qa_dsl::exam_average)),
            qa_dsl::quarter_average.eq(excluded(qa_dsl::quarter_average)),
            qa_dsl::total_coefficient.eq(excluded(qa_dsl::total_coefficient)),
            qa_dsl::computed_at.eq(excluded(qa_dsl::computed_at)),
        ))
        .returning(QuarterAverageRow::as_returning())
        .get_result::<QuarterAverageRow>(conn)?;

    Ok(stored)
}

/// Rebuilds and stores the student's aggregate for one academic year from its
/// quarter aggregates. The year takes the grade of its latest aggregated quarter.
fn recompute_yearly(
    conn: &mut PgConnection,
    policy: &AveragingPolicy,
    student_id: i64,
    current_grade_id: i64,
    academic_year_id: i64,
) -> Result<YearlyAverageRow, AppError> {
    let rows = qa_dsl::quarter_averages
        .inner_join(aq_dsl::academic_quarters.on(qa_dsl::academic_quarter_id.eq(aq_dsl::id)))
        .filter(qa_dsl::student_id.eq(student_id))
        .filter(aq_dsl::academic_year_id.eq(academic_year_id))
        .order(aq_dsl::quarter_number.asc())
        .select((
            qa_dsl::assessment_average,
            qa_dsl::exam_average,
            qa_dsl::quarter_average,
            qa_dsl::total_coefficient,
            qa_dsl::grade_id,
        ))
        .load::<(Option<f64>, Option<f64>, Option<f64>, f64, i64)>(conn)?;

    let grade_id = rows.last().map(|row| row.4).unwrap_or(current_grade_id);

    let quarters: Vec<QuarterFigures> = rows
        .into_iter()
        .map(|(assessment_average, exam_average, quarter_average, total_coefficient, _)| {
            QuarterFigures {
                assessment_average,
                exam_average,
                quarter_average,
                total_coefficient,
            }
        })
        .collect();

    let figures = averaging::compute_yearly(&quarters, policy);
    debug!(
        "Year {} figures for student {} from {} quarters: {:?}",
        academic_year_id,
        student_id,
        quarters.len(),
        figures
    );

    let new_row = NewYearlyAverage::from_figures(student_id, academic_year_id, grade_id, figures);
    let stored = diesel::insert_into(ya_dsl::yearly_averages)
        .values(&new_row)
        .on_conflict((ya_dsl::student_id, ya_dsl::academic_year_id))
        .do_update()
        .set((
            ya_dsl::grade_id.eq(excluded(ya_dsl::grade_id)),
            ya_dsl::assessment_yearly_average.eq(excluded(ya_dsl::assessment_yearly_average)),
            ya_dsl::exam_yearly_average.eq(excluded(ya_dsl::exam_yearly_average)),
            ya_dsl::final_yearly_average.eq(excluded(ya_dsl::final_yearly_average)),
            ya_dsl::computed_at.eq(excluded(ya_dsl::computed_at)),
        ))
        .returning(YearlyAverageRow::as_returning())
        .get_result::<YearlyAverageRow>(conn)?;

    Ok(stored)
}

/// Scope checks shared by the mark-changing endpoints. Locks the student row
/// for the rest of the transaction and returns the student's grade and the
/// quarter's academic year.
fn check_mark_scope(
    conn: &mut PgConnection,
    ctx: &SchoolContext,
    student_id: i64,
    class_id: i64,
    academic_quarter_id: i64,
) -> Result<(i64, i64), AppError> {
    let grade_id = helper::student_in_school(conn, ctx, student_id, true)?;
    let class_grade_id = helper::class_in_school(conn, ctx, class_id)?;
    if class_grade_id != grade_id {
        warn!(
            "Class {} (grade {}) is not taught in grade {} of student {}",
            class_id, class_grade_id, grade_id, student_id
        );
        return Err(AppError::UnprocessableEntity(format!(
            "Class with ID {} is not taught in the grade of student {}.",
            class_id, student_id
        )));
    }
    helper::ensure_can_grade_class(conn, ctx, class_id)?;
    let academic_year_id = helper::quarter_in_school(conn, ctx, academic_quarter_id)?;
    Ok((grade_id, academic_year_id))
}

/// Stores a mark and refreshes the aggregates that depend on it.
///
/// A mark for the same student, class, quarter and mark type is replaced. The
/// write, the quarter recomputation and the yearly recomputation share one
/// transaction that holds the student's row lock, so concurrent writes for
/// the same student are applied one after another and the aggregates never
/// lag behind the marks. Values are rounded to two decimals before checking.
///
/// Request Body: `UpsertMarkPayload`
///
/// Returns (wrapped in `ApiResponse`)
/// * `MarkChangeResponse`: The stored mark with the fresh quarter and yearly aggregates (200 OK).
/// * `403 Forbidden`: If the requester is neither an admin nor the class's active teacher.
/// * `404 Not Found`: If the student, class or quarter does not exist in the school.
/// * `422 Unprocessable Entity`: If the mark type is unknown, the mark is out of bounds,
///   `max_mark` exceeds 9999.99, or the class is not taught in the student's grade.
/// * `500 Internal Server Error`: If a database error occurs.
#[instrument(skip(pool, policy, payload))]
pub async fn upsert_mark(
    State(pool): State<Pool>,
    State(policy): State<AveragingPolicy>,
    Json(payload): Json<UpsertMarkPayload>,
) -> Result<ApiResponse<MarkChangeResponse>, AppError> {
    info!(
        "Attempting to store {} mark for student {} in class {}, quarter {}",
        payload.mark_type, payload.student_id, payload.class_id, payload.academic_quarter_id
    );
    debug!("Upsert mark payload: {:?}", payload);

    let mark_type = parse_mark_type(&payload.mark_type)?;
    let (mark, max_mark) = validate_mark(payload.mark, payload.max_mark)?;

    let ctx = helper::require_school_role(&pool, payload.requester_id, payload.school_id, STAFF)
        .await?;

    let student_id = payload.student_id;
    let class_id = payload.class_id;
    let academic_quarter_id = payload.academic_quarter_id;
    let conn = pool.get().await?;
    let transaction_result: Result<MarkChangeResponse, AppError> = conn
        .interact(move |conn_sync| {
            conn_sync.transaction(|tx_conn| {
                let (grade_id, academic_year_id) =
                    check_mark_scope(tx_conn, &ctx, student_id, class_id, academic_quarter_id)?;

                let new_mark = NewMark {
                    student_id,
                    class_id,
                    academic_quarter_id,
                    mark_type: mark_type.as_str().to_string(),
                    mark,
                    max_mark,
                };
                let stored_mark = diesel::insert_into(marks_dsl::marks)
                    .values(&new_mark)
                    .on_conflict((
                        marks_dsl::student_id,
                        marks_dsl::class_id,
                        marks_dsl::academic_quarter_id,
                        marks_dsl::mark_type,
                    ))
                    .do_update()
                    .set((
                        marks_dsl::mark.eq(excluded(marks_dsl::mark)),
                        marks_dsl::max_mark.eq(excluded(marks_dsl::max_mark)),
                        marks_dsl::updated_at.eq(now),
                    ))
                    .returning(MarkRow::as_returning())
                    .get_result::<MarkRow>(tx_conn)?;
                info!("Stored mark {} for student {}", stored_mark.id, student_id);

                let quarter_average =
                    recompute_quarter(tx_conn, &policy, student_id, grade_id, academic_quarter_id)?;
                let yearly_average =
                    recompute_yearly(tx_conn, &policy, student_id, grade_id, academic_year_id)?;

                Ok(MarkChangeResponse {
                    mark: Some(stored_mark),
                    quarter_average,
                    yearly_average,
                })
            })
        })
        .await?;

    let response = transaction_result?;
    info!(
        "Successfully stored mark and refreshed averages for student {} in quarter {}",
        student_id, academic_quarter_id
    );
    Ok(ApiResponse::ok(response))
}

/// Deletes a mark and refreshes the aggregates that depended on it.
///
/// Request Body: `RemoveMarkPayload`
///
/// Returns (wrapped in `ApiResponse`)
/// * `MarkChangeResponse`: `mark` is `None`, with the fresh aggregates (200 OK).
/// * `403 Forbidden`: If the requester is neither an admin nor the class's active teacher.
/// * `404 Not Found`: If the mark, student, class or quarter does not exist in the school.
/// * `422 Unprocessable Entity`: If the mark type is unknown.
/// * `500 Internal Server Error`: If a database error occurs.
#[instrument(skip(pool, policy, payload))]
pub async fn remove_mark(
    State(pool): State<Pool>,
    State(policy): State<AveragingPolicy>,
    Json(payload): Json<RemoveMarkPayload>,
) -> Result<ApiResponse<MarkChangeResponse>, AppError> {
    info!(
        "Attempting to remove {} mark for student {} in class {}, quarter {}",
        payload.mark_type, payload.student_id, payload.class_id, payload.academic_quarter_id
    );
    debug!("Remove mark payload: {:?}", payload);

    let mark_type = parse_mark_type(&payload.mark_type)?;
    let ctx = helper::require_school_role(&pool, payload.requester_id, payload.school_id, STAFF)
        .await?;

    let student_id = payload.student_id;
    let class_id = payload.class_id;
    let academic_quarter_id = payload.academic_quarter_id;
    let conn = pool.get().await?;
    let transaction_result: Result<MarkChangeResponse, AppError> = conn
        .interact(move |conn_sync| {
            conn_sync.transaction(|tx_conn| {
                let (grade_id, academic_year_id) =
                    check_mark_scope(tx_conn, &ctx, student_id, class_id, academic_quarter_id)?;

                let rows_affected = diesel::delete(
                    marks_dsl::marks
                        .filter(marks_dsl::student_id.eq(student_id))
                        .filter(marks_dsl::class_id.eq(class_id))
                        .filter(marks_dsl::academic_quarter_id.eq(academic_quarter_id))
                        .filter(marks_dsl::mark_type.eq(mark_type.as_str())),
                )
                .execute(tx_conn)?;

                if rows_affected == 0 {
                    error!(
                        "No {} mark for student {} in class {}, quarter {}",
                        mark_type, student_id, class_id, academic_quarter_id
                    );
                    return Err(AppError::NotFound(format!(
                        "No {} mark found for student {} in class {} and quarter {}.",
                        mark_type, student_id, class_id, academic_quarter_id
                    )));
                }

                let quarter_average =
                    recompute_quarter(tx_conn, &policy, student_id, grade_id, academic_quarter_id)?;
                let yearly_average =
                    recompute_yearly(tx_conn, &policy, student_id, grade_id, academic_year_id)?;

                Ok(MarkChangeResponse {
                    mark: None,
                    quarter_average,
                    yearly_average,
                })
            })
        })
        .await?;

    let response = transaction_result?;
    info!(
        "Successfully removed mark and refreshed averages for student {} in quarter {}",
        student_id, academic_quarter_id
    );
    Ok(ApiResponse::ok(response))
}

/// Lists a student's marks in a quarter, ordered by class then mark type.
///
/// Query Parameters:
/// * `requester_id`, `school_id`: The requester and the school acted in.
/// * `student_id`, `academic_quarter_id`: Whose marks, and when.
///
/// Returns (wrapped in `ApiResponse`)
/// * `Vec<MarkRow>`: The marks (200 OK).
/// * `403 Forbidden`: If the requester is not staff of the school.
/// * `404 Not Found`: If the student or quarter does not exist in the school.
/// * `500 Internal Server Error`: If a database error occurs.
#[instrument(skip(pool, params))]
pub async fn get_student_marks(
    State(pool): State<Pool>,
    Query(params): Query<GetStudentMarksParams>,
) -> Result<ApiResponse<Vec<MarkRow>>, AppError> {
    let student_id = params.student_id;
    let academic_quarter_id = params.academic_quarter_id;
    info!(
        "Fetching marks of student {} in quarter {}",
        student_id, academic_quarter_id
    );
    debug!("Get student marks params: {:?}", params);

    let ctx =
        helper::require_school_role(&pool, params.requester_id, params.school_id, STAFF).await?;

    let conn = pool.get().await?;
    let marks: Result<Vec<MarkRow>, AppError> = conn
        .interact(move |conn_sync| {
            helper::student_in_school(conn_sync, &ctx, student_id, false)?;
            helper::quarter_in_school(conn_sync, &ctx, academic_quarter_id)?;

            Ok(marks_dsl::marks
                .filter(marks_dsl::student_id.eq(student_id))
                .filter(marks_dsl::academic_quarter_id.eq(academic_quarter_id))
                .order((marks_dsl::class_id.asc(), marks_dsl::mark_type.asc()))
                .select(MarkRow::as_select())
                .load::<MarkRow>(conn_sync)?)
        })
        .await?;
    let marks = marks?;

    info!(
        "Successfully fetched {} marks of student {} in quarter {}",
        marks.len(),
        student_id,
        academic_quarter_id
    );
    Ok(ApiResponse::ok(marks))
}

/// Recomputes a student's quarter aggregate from the current marks, then the
/// yearly aggregate of the quarter's academic year. Safe to repeat.
///
/// Request Body: `RecomputeQuarterAveragePayload`
///
/// Returns (wrapped in `ApiResponse`)
/// * `QuarterAverageRow`: The stored quarter aggregate (200 OK).
/// * `403 Forbidden`: If the requester is not staff of the school.
/// * `404 Not Found`: If the student or quarter does not exist in the school.
/// * `500 Internal Server Error`: If a database error occurs.
#[instrument(skip(pool, policy, payload))]
pub async fn recompute_quarter_average(
    State(pool): State<Pool>,
    State(policy): State<AveragingPolicy>,
    Json(payload): Json<RecomputeQuarterAveragePayload>,
) -> Result<ApiResponse<QuarterAverageRow>, AppError> {
    let student_id = payload.student_id;
    let academic_quarter_id = payload.academic_quarter_id;
    info!(
        "Recomputing quarter {} average for student {}",
        academic_quarter_id, student_id
    );
    debug!("Recompute quarter average payload: {:?}", payload);

    let ctx = helper::require_school_role(&pool, payload.requester_id, payload.school_id, STAFF)
        .await?;

    let conn = pool.get().await?;
    let transaction_result: Result<QuarterAverageRow, AppError> = conn
        .interact(move |conn_sync| {
            conn_sync.transaction(|tx_conn| {
                let grade_id = helper::student_in_school(tx_conn, &ctx, student_id, true)?;
                let academic_year_id =
                    helper::quarter_in_school(tx_conn, &ctx, academic_quarter_id)?;

                let quarter_average =
                    recompute_quarter(tx_conn, &policy, student_id, grade_id, academic_quarter_id)?;
                recompute_yearly(tx_conn, &policy, student_id, grade_id, academic_year_id)?;
                Ok(quarter_average)
            })
        })
        .await?;

    let quarter_average = transaction_result?;
    info!(
        "Successfully recomputed quarter {} average for student {}",
        academic_quarter_id, student_id
    );
    Ok(ApiResponse::ok(quarter_average))
}

/// Recomputes a student's yearly aggregate from the stored quarter aggregates.
///
/// Request Body: `RecomputeYearlyAveragePayload`
///
/// Returns (wrapped in `ApiResponse`)
/// * `YearlyAverageRow`: The stored yearly aggregate (200 OK).
/// * `403 Forbidden`: If the requester is not staff of the school.
/// * `404 Not Found`: If the student or academic year does not exist in the school.
/// * `500 Internal Server Error`: If a database error occurs.
#[instrument(skip(pool, policy, payload))]
pub async fn recompute_yearly_average(
    State(pool): State<Pool>,
    State(policy): State<AveragingPolicy>,
    Json(payload): Json<RecomputeYearlyAveragePayload>,
) -> Result<ApiResponse<YearlyAverageRow>, AppError> {
    let student_id = payload.student_id;
    let academic_year_id = payload.academic_year_id;
    info!(
        "Recomputing year {} average for student {}",
        academic_year_id, student_id
    );
    debug!("Recompute yearly average payload: {:?}", payload);

    let ctx = helper::require_school_role(&pool, payload.requester_id, payload.school_id, STAFF)
        .await?;

    let conn = pool.get().await?;
    let transaction_result: Result<YearlyAverageRow, AppError> = conn
        .interact(move |conn_sync| {
            conn_sync.transaction(|tx_conn| {
                let grade_id = helper::student_in_school(tx_conn, &ctx, student_id, true)?;
                helper::year_in_school(tx_conn, &ctx, academic_year_id)?;
                recompute_yearly(tx_conn, &policy, student_id, grade_id, academic_year_id)
            })
        })
        .await?;

    let yearly_average = transaction_result?;
    info!(
        "Successfully recomputed year {} average for student {}",
        academic_year_id, student_id
    );
    Ok(ApiResponse::ok(yearly_average))
}

/// Retrieves a stored quarter aggregate.
///
/// Query Parameters:
/// * `requester_id`, `school_id`: The requester and the school acted in.
/// * `student_id`, `academic_quarter_id`: Whose aggregate, and when.
///
/// Returns (wrapped in `ApiResponse`)
/// * `QuarterAverageRow`: The aggregate (200 OK).
/// * `403 Forbidden`: If the requester is not a member of the school, or is a student
///   asking for another student's record.
/// * `404 Not Found`: If the student is not in the school or nothing was computed yet.
/// * `500 Internal Server Error`: If a database error occurs.
#[instrument(skip(pool, params))]
pub async fn get_quarter_average(
    State(pool): State<Pool>,
    Query(params): Query<GetQuarterAverageParams>,
) -> Result<ApiResponse<QuarterAverageRow>, AppError> {
    let student_id = params.student_id;
    let academic_quarter_id = params.academic_quarter_id;
    info!(
        "Fetching quarter {} average for student {}",
        academic_quarter_id, student_id
    );
    debug!("Get quarter average params: {:?}", params);

    let ctx =
        helper::require_school_role(&pool, params.requester_id, params.school_id, ANY_MEMBER)
            .await?;

    let conn = pool.get().await?;
    let found: Result<Option<QuarterAverageRow>, AppError> = conn
        .interact(move |conn_sync| {
            helper::student_in_school(conn_sync, &ctx, student_id, false)?;
            helper::ensure_can_read_student(conn_sync, &ctx, student_id)?;
            Ok(qa_dsl::quarter_averages
                .filter(qa_dsl::student_id.eq(student_id))
                .filter(qa_dsl::academic_quarter_id.eq(academic_quarter_id))
                .select(QuarterAverageRow::as_select())
                .first::<QuarterAverageRow>(conn_sync)
                .optional()?)
        })
        .await?;

    match found? {
        Some(row) => {
            info!(
                "Successfully fetched quarter {} average for student {}",
                academic_quarter_id, student_id
            );
            Ok(ApiResponse::ok(row))
        }
        None => {
            warn!(
                "No quarter {} average computed for student {}",
                academic_quarter_id, student_id
            );
            Err(AppError::NotFound(format!(
                "No average computed for student {} in quarter {}.",
                student_id, academic_quarter_id
            )))
        }
    }
}

/// Retrieves a stored yearly aggregate.
///
/// Query Parameters:
/// * `requester_id`, `school_id`: The requester and the school acted in.
/// * `student_id`, `academic_year_id`: Whose aggregate, and for which year.
///
/// Returns (wrapped in `ApiResponse`)
/// * `YearlyAverageRow`: The aggregate (200 OK).
/// * `403 Forbidden`: If the requester is not a member of the school, or is a student
///   asking for another student's record.
/// * `404 Not Found`: If the student is not in the school or nothing was computed yet.
/// * `500 Internal Server Error`: If a database error occurs.
#[instrument(skip(pool, params))]
pub async fn get_yearly_average(
    State(pool): State<Pool>,
    Query(params): Query<GetYearlyAverageParams>,
) -> Result<ApiResponse<YearlyAverageRow>, AppError> {
    let student_id = params.student_id;
    let academic_year_id = params.academic_year_id;
    info!(
        "Fetching year {} average for student {}",
        academic_year_id, student_id
    );
    debug!("Get yearly average params: {:?}", params);

    let ctx =
        helper::require_school_role(&pool, params.requester_id, params.school_id, ANY_MEMBER)
            .await?;

    let conn = pool.get().await?;
    let found: Result<Option<YearlyAverageRow>, AppError> = conn
        .interact(move |conn_sync| {
            helper::student_in_school(conn_sync, &ctx, student_id, false)?;
            helper::ensure_can_read_student(conn_sync, &ctx, student_id)?;
            Ok(ya_dsl::yearly_averages
                .filter(ya_dsl::student_id.eq(student_id))
                .filter(ya_dsl::academic_year_id.eq(academic_year_id))
                .select(YearlyAverageRow::as_select())
                .first::<YearlyAverageRow>(conn_sync)
                .optional()?)
        })
        .await?;

    match found? {
        Some(row) => {
            info!(
                "Successfully fetched year {} average for student {}",
                academic_year_id, student_id
            );
            Ok(ApiResponse::ok(row))
        }
        None => {
            warn!(
                "No year {} average computed for student {}",
                academic_year_id, student_id
            );
            Err(AppError::NotFound(format!(
                "No average computed for student {} in academic year {}.",
                student_id, academic_year_id
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(raw: &str) -> BigDecimal {
        BigDecimal::from_str(raw).unwrap()
    }

    #[test]
    fn mark_is_rounded_like_the_column() {
        let (mark, max_mark) = validate_mark(Some(dec("12.345")), dec("20.004")).unwrap();
        assert_eq!(mark, Some(dec("12.35")));
        assert_eq!(max_mark, dec("20.00"));
    }

    #[test]
    fn max_mark_limited_to_column_range() {
        assert!(validate_mark(None, dec("9999.99")).is_ok());
        assert!(validate_mark(None, dec("9999.995")).is_err());
        assert!(validate_mark(Some(dec("1")), dec("100000")).is_err());
    }

    #[test]
    fn max_mark_rounding_to_zero_rejected() {
        assert!(validate_mark(Some(dec("0.001")), dec("0.004")).is_err());
        assert!(validate_mark(None, dec("0.005")).is_ok());
    }

    #[test]
    fn mark_above_max_after_rounding_rejected() {
        assert!(validate_mark(Some(dec("20.006")), dec("20")).is_err());
        assert!(validate_mark(Some(dec("20.004")), dec("20")).is_ok());
    }
}
