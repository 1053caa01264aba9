use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::models::resume::{ResumeRow, Visibility};
use crate::resume::defaults::{default_resume_data, slugify, ResumeVariant};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateResumeRequest {
    pub title: String,
    pub slug: Option<String>,
    pub visibility: Option<Visibility>,
    pub locale: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateResumeRequest {
    pub title: Option<String>,
    pub slug: Option<String>,
    pub data: Option<Value>,
    pub visibility: Option<Visibility>,
}

#[derive(Debug, Deserialize)]
pub struct LockRequest {
    pub locked: bool,
}

const DUPLICATE_SLUG: &str = "a resume with this slug already exists";

fn validate_title(title: &str) -> Result<String, AppError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(AppError::Validation("title must not be empty".into()));
    }
    Ok(title.to_string())
}

/// An explicit slug is normalized the same way a title is.
fn resolve_slug(slug: Option<&str>, title: &str) -> Result<String, AppError> {
    let slug = slugify(slug.unwrap_or(title));
    if slug.is_empty() {
        return Err(AppError::Validation(
            "slug must contain at least one letter or digit".into(),
        ));
    }
    Ok(slug)
}

fn validate_data(data: &Value) -> Result<(), AppError> {
    let complete = data.is_object()
        && ["basics", "sections", "metadata"]
            .iter()
            .all(|key| data.get(key).is_some_and(Value::is_object));
    if complete {
        Ok(())
    } else {
        Err(AppError::Validation(
            "data must be an object with basics, sections and metadata".into(),
        ))
    }
}

async fn find_owned(state: &AppState, user_id: Uuid, id: Uuid) -> Result<ResumeRow, AppError> {
    sqlx::query_as("SELECT * FROM resumes WHERE id = $1 AND user_id = $2")
        .bind(id)
        .bind(user_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("resume {id} not found")))
}

/// GET /api/resume
pub async fn handle_list_resumes(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<ResumeRow>>, AppError> {
    let resumes: Vec<ResumeRow> =
        sqlx::query_as("SELECT * FROM resumes WHERE user_id = $1 ORDER BY updated_at DESC")
            .bind(user.user_id)
            .fetch_all(&state.db)
            .await?;
    Ok(Json(resumes))
}

/// POST /api/resume
pub async fn handle_create_resume(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<CreateResumeRequest>,
) -> Result<(StatusCode, Json<ResumeRow>), AppError> {
    let title = validate_title(&req.title)?;
    let slug = resolve_slug(req.slug.as_deref(), &title)?;
    let data = default_resume_data(ResumeVariant::from_locale(req.locale.as_deref()));

    let resume: ResumeRow = sqlx::query_as(
        r#"
        INSERT INTO resumes (id, user_id, title, slug, data, visibility)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user.user_id)
    .bind(&title)
    .bind(&slug)
    .bind(&data)
    .bind(req.visibility.unwrap_or_default())
    .fetch_one(&state.db)
    .await
    .map_err(|e| AppError::from_unique_violation(e, DUPLICATE_SLUG))?;

    info!(resume_id = %resume.id, user_id = %user.user_id, "Resume created");
    Ok((StatusCode::CREATED, Json(resume)))
}

/// GET /api/resume/:id
pub async fn handle_get_resume(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ResumeRow>, AppError> {
    Ok(Json(find_owned(&state, user.user_id, id).await?))
}

/// PATCH /api/resume/:id
pub async fn handle_update_resume(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateResumeRequest>,
) -> Result<Json<ResumeRow>, AppError> {
    let existing = find_owned(&state, user.user_id, id).await?;
    if existing.locked {
        return Err(AppError::Forbidden("resume is locked".into()));
    }

    let title = req.title.as_deref().map(validate_title).transpose()?;
    let slug = req
        .slug
        .as_deref()
        .map(|s| resolve_slug(Some(s), ""))
        .transpose()?;
    if let Some(data) = &req.data {
        validate_data(data)?;
    }

    // the lock check is repeated in SQL so a concurrent lock wins
    let resume: ResumeRow = sqlx::query_as(
        r#"
        UPDATE resumes
        SET title = COALESCE($3, title),
            slug = COALESCE($4, slug),
            data = COALESCE($5, data),
            visibility = COALESCE($6, visibility),
            updated_at = NOW()
        WHERE id = $1 AND user_id = $2 AND locked = FALSE
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(user.user_id)
    .bind(title)
    .bind(slug)
    .bind(req.data)
    .bind(req.visibility)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| AppError::from_unique_violation(e, DUPLICATE_SLUG))?
    .ok_or_else(|| AppError::Forbidden("resume is locked".into()))?;

    Ok(Json(resume))
}

/// PATCH /api/resume/:id/lock
pub async fn handle_lock_resume(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<LockRequest>,
) -> Result<Json<ResumeRow>, AppError> {
    let resume: ResumeRow = sqlx::query_as(
        "UPDATE resumes SET locked = $3, updated_at = NOW() WHERE id = $1 AND user_id = $2 RETURNING *",
    )
    .bind(id)
    .bind(user.user_id)
    .bind(req.locked)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("resume {id} not found")))?;

    info!(resume_id = %id, locked = req.locked, "Resume lock changed");
    Ok(Json(resume))
}

/// DELETE /api/resume/:id
pub async fn handle_delete_resume(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let result = sqlx::query("DELETE FROM resumes WHERE id = $1 AND user_id = $2")
        .bind(id)
        .bind(user.user_id)
        .execute(&state.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("resume {id} not found")));
    }
    info!(resume_id = %id, user_id = %user.user_id, "Resume deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/resume/public/:username/:slug
pub async fn handle_public_resume(
    State(state): State<AppState>,
    Path((username, slug)): Path<(String, String)>,
) -> Result<Json<ResumeRow>, AppError> {
    let resume: Option<ResumeRow> = sqlx::query_as(
        r#"
        SELECT r.* FROM resumes r
        JOIN users u ON u.id = r.user_id
        WHERE u.username = $1 AND r.slug = $2 AND r.visibility = 'public'
        "#,
    )
    .bind(username.to_lowercase())
    .bind(&slug)
    .fetch_optional(&state.db)
    .await?;

    resume
        .map(Json)
        .ok_or_else(|| AppError::NotFound("resume not found".into()))
}
