use crate::errors::AppError;
use crate::model::school::{Role, SchoolContext};
use crate::schema::{
    academic_quarters::dsl as aq_dsl, academic_years::dsl as ay_dsl,
    class_teachers::dsl as ct_dsl, classes::dsl as classes_dsl, grades::dsl as grades_dsl,
    school_members::dsl as members_dsl, students::dsl as students_dsl,
    teachers::dsl as teachers_dsl,
};
use deadpool_diesel::postgres::Pool;
use diesel::dsl::exists;
use diesel::prelude::*;
use tracing::{debug, error, warn};

pub(super) async fn run_query<T, F>(pool: &Pool, query: F) -> Result<T, AppError>
where
    F: FnOnce(&mut diesel::PgConnection) -> Result<T, diesel::result::Error> + Send + 'static,
    T: Send + 'static,
{
    let conn = pool.get().await?;
    debug!("DB connection object obtained from pool for interaction");

    match conn.interact(query).await {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(diesel_err)) => {
            error!("Diesel query failed within interaction: {:?}", diesel_err);
            Err(AppError::from(diesel_err))
        }
        Err(interact_err) => Err(AppError::from(interact_err)),
    }
}

/// Resolves the requester's membership in `school_id` and checks the role.
///
/// Returns 403 when the requester is not a member, or is one with a role
/// outside `allowed`.
pub(super) async fn require_school_role(
    pool: &Pool,
    requester_id: i64,
    school_id: i64,
    allowed: &[Role],
) -> Result<SchoolContext, AppError> {
    let stored_role = run_query(pool, move |conn| {
        members_dsl::school_members
            .filter(members_dsl::user_id.eq(requester_id))
            .filter(members_dsl::school_id.eq(school_id))
            .select(members_dsl::role)
            .first::<String>(conn)
            .optional()
    })
    .await?;

    let Some(stored_role) = stored_role else {
        warn!(
            "User {} has no membership in school {}",
            requester_id, school_id
        );
        return Err(AppError::Forbidden(format!(
            "User {} is not a member of school {}",
            requester_id, school_id
        )));
    };

    let role = stored_role.parse::<Role>().map_err(|parse_err| {
        error!(
            "Membership of user {} in school {} has an unusable role: {}",
            requester_id, school_id, parse_err
        );
        AppError::Forbidden(format!(
            "User {} has no usable role in school {}",
            requester_id, school_id
        ))
    })?;

    if !allowed.contains(&role) {
        warn!(
            "User {} with role '{}' denied in school {}, allowed roles: {:?}",
            requester_id, role, school_id, allowed
        );
        return Err(AppError::Forbidden(format!(
            "Role '{}' is not allowed to perform this action in school {}",
            role, school_id
        )));
    }

    debug!(
        "User {} acting as '{}' in school {}",
        requester_id, role, school_id
    );
    Ok(SchoolContext {
        school_id,
        user_id: requester_id,
        role,
    })
}

pub(super) fn grade_in_school(
    conn: &mut PgConnection,
    ctx: &SchoolContext,
    grade_id: i64,
) -> Result<(), AppError> {
    let found = diesel::select(exists(
        grades_dsl::grades
            .filter(grades_dsl::id.eq(grade_id))
            .filter(grades_dsl::school_id.eq(ctx.school_id)),
    ))
    .get_result::<bool>(conn)?;

    if !found {
        error!("Grade {} not found in school {}", grade_id, ctx.school_id);
        return Err(AppError::NotFound(format!(
            "Grade with ID {} not found in school {}.",
            grade_id, ctx.school_id
        )));
    }
    Ok(())
}

/// Returns the class's grade.
pub(super) fn class_in_school(
    conn: &mut PgConnection,
    ctx: &SchoolContext,
    class_id: i64,
) -> Result<i64, AppError> {
    classes_dsl::classes
        .filter(classes_dsl::id.eq(class_id))
        .filter(classes_dsl::school_id.eq(ctx.school_id))
        .select(classes_dsl::grade_id)
        .first::<i64>(conn)
        .optional()?
        .ok_or_else(|| {
            error!("Class {} not found in school {}", class_id, ctx.school_id);
            AppError::NotFound(format!(
                "Class with ID {} not found in school {}.",
                class_id, ctx.school_id
            ))
        })
}

/// Returns the student's current grade. With `lock`, the student row stays
/// locked until the transaction ends, so writes touching the same student's
/// marks and aggregates run one after another.
pub(super) fn student_in_school(
    conn: &mut PgConnection,
    ctx: &SchoolContext,
    student_id: i64,
    lock: bool,
) -> Result<i64, AppError> {
    let query = students_dsl::students
        .filter(students_dsl::id.eq(student_id))
        .filter(students_dsl::school_id.eq(ctx.school_id))
        .select(students_dsl::grade_id);

    let grade_id = if lock {
        query.for_update().first::<i64>(conn).optional()?
    } else {
        query.first::<i64>(conn).optional()?
    };

    grade_id.ok_or_else(|| {
        error!("Student {} not found in school {}", student_id, ctx.school_id);
        AppError::NotFound(format!(
            "Student with ID {} not found in school {}.",
            student_id, ctx.school_id
        ))
    })
}

/// Staff may read any student of their school, students only their own record.
pub(super) fn ensure_can_read_student(
    conn: &mut PgConnection,
    ctx: &SchoolContext,
    student_id: i64,
) -> Result<(), AppError> {
    if ctx.role != Role::Student {
        return Ok(());
    }

    let own_record = diesel::select(exists(
        students_dsl::students
            .filter(students_dsl::id.eq(student_id))
            .filter(students_dsl::school_id.eq(ctx.school_id))
            .filter(students_dsl::user_id.eq(ctx.user_id)),
    ))
    .get_result::<bool>(conn)?;

    if !own_record {
        warn!(
            "Student user {} denied access to student {}",
            ctx.user_id, student_id
        );
        return Err(AppError::Forbidden(format!(
            "User {} may only read their own records",
            ctx.user_id
        )));
    }
    Ok(())
}

/// Returns the academic year the quarter belongs to.
pub(super) fn quarter_in_school(
    conn: &mut PgConnection,
    ctx: &SchoolContext,
    academic_quarter_id: i64,
) -> Result<i64, AppError> {
    aq_dsl::academic_quarters
        .inner_join(ay_dsl::academic_years.on(aq_dsl::academic_year_id.eq(ay_dsl::id)))
        .filter(aq_dsl::id.eq(academic_quarter_id))
        .filter(ay_dsl::school_id.eq(ctx.school_id))
        .select(aq_dsl::academic_year_id)
        .first::<i64>(conn)
        .optional()?
        .ok_or_else(|| {
            error!(
                "Academic quarter {} not found in school {}",
                academic_quarter_id, ctx.school_id
            );
            AppError::NotFound(format!(
                "Academic quarter with ID {} not found in school {}.",
                academic_quarter_id, ctx.school_id
            ))
        })
}

pub(super) fn year_in_school(
    conn: &mut PgConnection,
    ctx: &SchoolContext,
    academic_year_id: i64,
) -> Result<(), AppError> {
    let found = diesel::select(exists(
        ay_dsl::academic_years
            .filter(ay_dsl::id.eq(academic_year_id))
            .filter(ay_dsl::school_id.eq(ctx.school_id)),
    ))
    .get_result::<bool>(conn)?;

    if !found {
        error!(
            "Academic year {} not found in school {}",
            academic_year_id, ctx.school_id
        );
        return Err(AppError::NotFound(format!(
            "Academic year with ID {} not found in school {}.",
            academic_year_id, ctx.school_id
        )));
    }
    Ok(())
}

/// Admins may grade any class of their school, teachers only the classes they
/// are actively assigned to.
pub(super) fn ensure_can_grade_class(
    conn: &mut PgConnection,
    ctx: &SchoolContext,
    class_id: i64,
) -> Result<(), AppError> {
    if ctx.is_admin() {
        return Ok(());
    }

    let assigned = diesel::select(exists(
        ct_dsl::class_teachers
            .inner_join(teachers_dsl::teachers.on(ct_dsl::teacher_id.eq(teachers_dsl::id)))
            .filter(ct_dsl::class_id.eq(class_id))
            .filter(ct_dsl::is_active.eq(true))
            .filter(teachers_dsl::school_id.eq(ctx.school_id))
            .filter(teachers_dsl::user_id.eq(ctx.user_id)),
    ))
    .get_result::<bool>(conn)?;

    if !assigned {
        warn!(
            "User {} is not the active teacher of class {}",
            ctx.user_id, class_id
        );
        return Err(AppError::Forbidden(format!(
            "User {} does not teach class {}",
            ctx.user_id, class_id
        )));
    }
    Ok(())
}
