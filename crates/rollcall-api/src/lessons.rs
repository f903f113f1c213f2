use std::collections::{BTreeSet, HashMap};

use axum::{
    Extension, Json,
    extract::{
        Path, State,
        rejection::{JsonRejection, PathRejection},
    },
    http::{StatusCode, header},
    response::IntoResponse,
};
use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use rollcall_core::{generate_token, validate_window};
use rollcall_db::models::id_from_sql;
use rollcall_types::api::{CreateLessonRequest, LessonDetailResponse, LessonResponse};
use rollcall_types::models::{Attendance, Lesson, Role, User};

use crate::auth::{AppState, blocking};
use crate::error::ApiError;
use crate::projection::{self, LessonView};
use crate::qr;

/// Everything needed to render a page of lessons, fetched in one blocking hop.
struct LessonPage {
    lessons: Vec<Lesson>,
    teachers: HashMap<Uuid, User>,
    group_names: HashMap<Uuid, String>,
    marks: HashMap<Uuid, Attendance>,
}

fn load_page(db: &rollcall_db::Database, viewer: &User, lessons: Vec<Lesson>) -> anyhow::Result<LessonPage> {
    let teacher_ids: Vec<String> = lessons
        .iter()
        .map(|l| l.teacher_id.to_string())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let teachers: HashMap<Uuid, User> = db
        .load_users(&teacher_ids)?
        .into_iter()
        .map(|u| (u.id, u))
        .collect();

    let group_ids: Vec<String> = lessons
        .iter()
        .flat_map(|l| l.group_ids.iter())
        .chain(teachers.values().flat_map(|t| t.group_ids.iter()))
        .map(|id| id.to_string())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let group_names = db
        .get_groups_by_ids(&group_ids)?
        .into_iter()
        .map(|g| -> anyhow::Result<(Uuid, String)> { Ok((id_from_sql(&g.id)?, g.name)) })
        .collect::<anyhow::Result<HashMap<_, _>>>()?;

    let marks = match viewer.role {
        Role::Student => {
            let lesson_ids: Vec<String> = lessons.iter().map(|l| l.id.to_string()).collect();
            db.get_student_marks(&viewer.id.to_string(), &lesson_ids)?
                .into_iter()
                .map(|a| (a.lesson_id, a))
                .collect()
        }
        Role::Teacher | Role::Admin => HashMap::new(),
    };

    Ok(LessonPage {
        lessons,
        teachers,
        group_names,
        marks,
    })
}

fn render_page(state: &AppState, viewer: &User, page: &LessonPage) -> Vec<LessonResponse> {
    let now = Utc::now();
    page.lessons
        .iter()
        .filter_map(|lesson| {
            let Some(teacher) = page.teachers.get(&lesson.teacher_id) else {
                warn!("Lesson {} references missing teacher {}", lesson.id, lesson.teacher_id);
                return None;
            };
            Some(projection::lesson_response(
                lesson,
                LessonView {
                    viewer: viewer.role,
                    teacher: projection::user_response(teacher, &page.group_names),
                    group_names: &page.group_names,
                    own_mark: page.marks.get(&lesson.id),
                    now,
                    offset: state.display_offset,
                },
            ))
        })
        .collect()
}

/// GET /lessons/
///
/// Teachers see the lessons they own, students the lessons of their groups,
/// admins every lesson. Most recent start first.
pub async fn list_lessons(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Json<Vec<LessonResponse>>, ApiError> {
    let viewer = user.clone();
    let page = blocking(&state, move |db| {
        let uid = viewer.id.to_string();
        let lessons = match viewer.role {
            Role::Teacher => db.get_lessons_for_teacher(&uid)?,
            Role::Student => db.get_lessons_for_student(&uid)?,
            Role::Admin => db.get_all_lessons()?,
        };
        Ok(load_page(db, &viewer, lessons)?)
    })
    .await?;

    Ok(Json(render_page(&state, &user, &page)))
}

/// POST /lessons/
///
/// Teachers create lessons they own. Admins create on behalf of a teacher.
pub async fn create_lesson(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    payload: Result<Json<CreateLessonRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    if user.role == Role::Student {
        return Err(ApiError::Forbidden);
    }
    let Json(req) = payload?;

    let teacher_id = match user.role {
        Role::Student => return Err(ApiError::Forbidden),
        Role::Teacher => user.id,
        Role::Admin => req
            .teacher_id
            .ok_or_else(|| ApiError::BadRequest("teacher_id is required".into()))?,
    };

    let course_name = req.course_name.trim().to_string();
    if course_name.is_empty() || course_name.len() > 255 {
        return Err(ApiError::BadRequest("course_name must be 1-255 characters".into()));
    }
    validate_window(req.start_time, req.end_time)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let group_ids: Vec<Uuid> = req
        .group_ids
        .iter()
        .copied()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    if group_ids.is_empty() {
        return Err(ApiError::BadRequest("a lesson needs at least one group".into()));
    }

    let lesson = Lesson {
        id: Uuid::new_v4(),
        course_name,
        teacher_id,
        group_ids,
        start_time: req.start_time,
        end_time: req.end_time,
        token: generate_token(),
    };

    let viewer = user.clone();
    let page = blocking(&state, move |db| {
        let owner = db
            .load_user(&lesson.teacher_id.to_string())?
            .filter(|u| u.role == Role::Teacher)
            .ok_or_else(|| ApiError::BadRequest("teacher_id must reference a teacher".into()))?;

        let wanted: Vec<String> = lesson.group_ids.iter().map(|g| g.to_string()).collect();
        if db.get_groups_by_ids(&wanted)?.len() != wanted.len() {
            return Err(ApiError::BadRequest("unknown group in group_ids".into()));
        }

        db.create_lesson(&lesson)?;
        info!(
            "Lesson {} '{}' created for teacher {}",
            lesson.id, lesson.course_name, owner.username
        );
        Ok(load_page(db, &viewer, vec![lesson])?)
    })
    .await?;

    let created = render_page(&state, &user, &page)
        .pop()
        .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("created lesson vanished")))?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /lessons/{lesson_id}/details/
///
/// Roster for the owning teacher.
pub async fn lesson_details(
    State(state): State<AppState>,
    lesson_id: Result<Path<Uuid>, PathRejection>,
    Extension(user): Extension<User>,
) -> Result<Json<LessonDetailResponse>, ApiError> {
    match user.role {
        Role::Teacher => {}
        Role::Student | Role::Admin => return Err(ApiError::Forbidden),
    }
    let Path(lesson_id) = lesson_id?;

    let (lesson, rows) = blocking(&state, move |db| {
        let lid = lesson_id.to_string();
        // Someone else's lesson is indistinguishable from a missing one.
        let lesson = db
            .get_lesson(&lid)?
            .filter(|l| l.teacher_id == user.id)
            .ok_or(ApiError::NotFound)?;
        let rows = db.get_roster(&lid)?;
        Ok((lesson, rows))
    })
    .await?;

    let students_attendance = projection::build_roster(rows, state.display_offset)?;

    Ok(Json(LessonDetailResponse {
        id: lesson.id,
        course_name: lesson.course_name,
        start_time: lesson.start_time,
        end_time: lesson.end_time,
        students_attendance,
    }))
}

/// GET /lessons/{lesson_id}/qr/
///
/// PNG of the raw token, admins only.
pub async fn lesson_qr(
    State(state): State<AppState>,
    lesson_id: Result<Path<Uuid>, PathRejection>,
    Extension(user): Extension<User>,
) -> Result<impl IntoResponse, ApiError> {
    match user.role {
        Role::Admin => {}
        Role::Student | Role::Teacher => return Err(ApiError::Forbidden),
    }
    let Path(lesson_id) = lesson_id?;

    let lesson = blocking(&state, move |db| {
        db.get_lesson(&lesson_id.to_string())?
            .ok_or(ApiError::NotFound)
    })
    .await?;

    let png = tokio::task::spawn_blocking(move || qr::render_png(&lesson.token))
        .await
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("QR render task failed: {}", e)))??;

    Ok(([(header::CONTENT_TYPE, "image/png")], png))
}
