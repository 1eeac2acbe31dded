// src/handlers/admin.rs

use axum::{
    Json,
    extract::{Extension, Multipart, Path, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use chrono::Utc;
use sqlx::SqlitePool;
use validator::Validate;

use crate::{
    error::{AppError, is_unique_violation},
    excel,
    models::{
        category::CreateCategoryRequest,
        question::{self, CreateQuestionRequest, UpdateQuestionRequest},
        quiz::{CreateQuizRequest, Quiz, UpdateQuizRequest},
        user::User,
    },
    utils::jwt::Claims,
};

const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Creates a new category.
/// Admin only.
pub async fn create_category(
    State(pool): State<SqlitePool>,
    Json(payload): Json<CreateCategoryRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let id: i64 = sqlx::query_scalar(
        "INSERT INTO categories (name, description) VALUES (?, ?) RETURNING id",
    )
    .bind(&payload.name)
    .bind(&payload.description)
    .fetch_one(&pool)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::Conflict(format!("Category '{}' already exists", payload.name))
        } else {
            tracing::error!("Failed to create category: {:?}", e);
            AppError::from(e)
        }
    })?;

    Ok((StatusCode::CREATED, Json(serde_json::json!({ "id": id }))))
}

async fn category_exists(pool: &SqlitePool, category_id: i64) -> Result<(), AppError> {
    let found: Option<i64> = sqlx::query_scalar("SELECT id FROM categories WHERE id = ?")
        .bind(category_id)
        .fetch_optional(pool)
        .await?;
    found
        .map(|_| ())
        .ok_or(AppError::NotFound("Category not found".to_string()))
}

/// Creates a new quiz owned by the calling admin.
/// Admin only.
pub async fn create_quiz(
    State(pool): State<SqlitePool>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateQuizRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    if let Some(category_id) = payload.category_id {
        category_exists(&pool, category_id).await?;
    }

    let quiz = sqlx::query_as::<_, Quiz>(
        r#"
        INSERT INTO quizzes (title, description, category_id, created_by, is_active, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        RETURNING id, title, description, category_id, created_by, is_active, created_at
        "#,
    )
    .bind(&payload.title)
    .bind(&payload.description)
    .bind(payload.category_id)
    .bind(claims.user_id())
    .bind(payload.is_active.unwrap_or(true))
    .bind(Utc::now())
    .fetch_one(&pool)
    .await?;

    Ok((StatusCode::CREATED, Json(quiz)))
}

/// Updates quiz fields that are present in the payload.
/// Admin only.
pub async fn update_quiz(
    State(pool): State<SqlitePool>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateQuizRequest>,
) -> Result<impl IntoResponse, AppError> {
    let _exists: i64 = sqlx::query_scalar("SELECT id FROM quizzes WHERE id = ?")
        .bind(id)
        .fetch_optional(&pool)
        .await?
        .ok_or(AppError::NotFound("Quiz not found".to_string()))?;

    if let Some(title) = payload.title {
        if title.is_empty() {
            return Err(AppError::BadRequest("Quiz title cannot be empty".to_string()));
        }
        sqlx::query("UPDATE quizzes SET title = ? WHERE id = ?")
            .bind(title)
            .bind(id)
            .execute(&pool)
            .await?;
    }

    if let Some(description) = payload.description {
        sqlx::query("UPDATE quizzes SET description = ? WHERE id = ?")
            .bind(description)
            .bind(id)
            .execute(&pool)
            .await?;
    }

    if let Some(category_id) = payload.category_id {
        category_exists(&pool, category_id).await?;
        sqlx::query("UPDATE quizzes SET category_id = ? WHERE id = ?")
            .bind(category_id)
            .bind(id)
            .execute(&pool)
            .await?;
    }

    if let Some(is_active) = payload.is_active {
        sqlx::query("UPDATE quizzes SET is_active = ? WHERE id = ?")
            .bind(is_active)
            .bind(id)
            .execute(&pool)
            .await?;
    }

    Ok(StatusCode::OK)
}

/// Deletes a quiz and, via cascade, its questions, choices, and submissions.
/// Admin only.
pub async fn delete_quiz(
    State(pool): State<SqlitePool>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let result = sqlx::query("DELETE FROM quizzes WHERE id = ?")
        .bind(id)
        .execute(&pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Quiz not found".to_string()));
    }

    Ok(StatusCode::NO_CONTENT)
}

/// Creates a new question, optionally with inline choices.
///
/// Choices are only stored for multiple choice questions; text questions
/// ignore them, matching the bulk importer.
/// Admin only.
pub async fn create_question(
    State(pool): State<SqlitePool>,
    Json(payload): Json<CreateQuestionRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let _exists: i64 = sqlx::query_scalar("SELECT id FROM quizzes WHERE id = ?")
        .bind(payload.quiz_id)
        .fetch_optional(&pool)
        .await?
        .ok_or(AppError::NotFound("Quiz not found".to_string()))?;

    let mut tx = pool.begin().await?;

    let question_id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO questions (quiz_id, question_text, question_type, ord, time_limit_minutes)
        VALUES (?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(payload.quiz_id)
    .bind(&payload.question_text)
    .bind(&payload.question_type)
    .bind(payload.ord)
    .bind(payload.time_limit_minutes)
    .fetch_one(&mut *tx)
    .await?;

    if payload.question_type == question::MULTIPLE_CHOICE {
        for choice in payload.choices.iter().flatten() {
            sqlx::query(
                "INSERT INTO choices (question_id, choice_text, is_correct) VALUES (?, ?, ?)",
            )
            .bind(question_id)
            .bind(&choice.choice_text)
            .bind(choice.is_correct)
            .execute(&mut *tx)
            .await?;
        }
    }

    tx.commit().await?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "id": question_id })),
    ))
}

/// Updates question fields that are present in the payload. Providing
/// `choices` replaces the existing choice set.
/// Admin only.
pub async fn update_question(
    State(pool): State<SqlitePool>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateQuestionRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let _exists: i64 = sqlx::query_scalar("SELECT id FROM questions WHERE id = ?")
        .bind(id)
        .fetch_optional(&pool)
        .await?
        .ok_or(AppError::NotFound("Question not found".to_string()))?;

    let mut tx = pool.begin().await?;

    if let Some(question_text) = &payload.question_text {
        sqlx::query("UPDATE questions SET question_text = ? WHERE id = ?")
            .bind(question_text)
            .bind(id)
            .execute(&mut *tx)
            .await?;
    }

    if let Some(question_type) = &payload.question_type {
        sqlx::query("UPDATE questions SET question_type = ? WHERE id = ?")
            .bind(question_type)
            .bind(id)
            .execute(&mut *tx)
            .await?;
    }

    if let Some(ord) = payload.ord {
        sqlx::query("UPDATE questions SET ord = ? WHERE id = ?")
            .bind(ord)
            .bind(id)
            .execute(&mut *tx)
            .await?;
    }

    if let Some(time_limit_minutes) = payload.time_limit_minutes {
        sqlx::query("UPDATE questions SET time_limit_minutes = ? WHERE id = ?")
            .bind(time_limit_minutes)
            .bind(id)
            .execute(&mut *tx)
            .await?;
    }

    if let Some(choices) = &payload.choices {
        let question_type: String =
            sqlx::query_scalar("SELECT question_type FROM questions WHERE id = ?")
                .bind(id)
                .fetch_one(&mut *tx)
                .await?;

        sqlx::query("DELETE FROM choices WHERE question_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if question_type == question::MULTIPLE_CHOICE {
            for choice in choices {
                sqlx::query(
                    "INSERT INTO choices (question_id, choice_text, is_correct) VALUES (?, ?, ?)",
                )
                .bind(id)
                .bind(&choice.choice_text)
                .bind(choice.is_correct)
                .execute(&mut *tx)
                .await?;
            }
        }
    }

    tx.commit().await?;

    Ok(StatusCode::OK)
}

/// Deletes a question by ID.
/// Admin only.
pub async fn delete_question(
    State(pool): State<SqlitePool>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let result = sqlx::query("DELETE FROM questions WHERE id = ?")
        .bind(id)
        .execute(&pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Question not found".to_string()));
    }

    Ok(StatusCode::NO_CONTENT)
}

/// Lists all users in the system.
/// Admin only.
pub async fn list_users(State(pool): State<SqlitePool>) -> Result<impl IntoResponse, AppError> {
    let users = sqlx::query_as::<_, User>(
        r#"
        SELECT id, username, password, role, created_at
        FROM users
        ORDER BY created_at, id
        "#,
    )
    .fetch_all(&pool)
    .await?;

    Ok(Json(users))
}

/// Deletes a user by ID.
/// Admin only. Refuses to delete the caller or another admin.
pub async fn delete_user(
    State(pool): State<SqlitePool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    if id == claims.user_id() {
        return Err(AppError::BadRequest(
            "Cannot delete your own account".to_string(),
        ));
    }

    let role: String = sqlx::query_scalar("SELECT role FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(&pool)
        .await?
        .ok_or(AppError::NotFound("User not found".to_string()))?;

    if role == "admin" {
        return Err(AppError::Forbidden(
            "Cannot delete an admin account".to_string(),
        ));
    }

    sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(id)
        .execute(&pool)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Exports all quizzes with questions and choices as an xlsx workbook.
/// Admin only.
pub async fn export_quizzes(
    State(pool): State<SqlitePool>,
) -> Result<impl IntoResponse, AppError> {
    let bytes = excel::export_quizzes(&pool).await?;

    Ok((
        [
            (header::CONTENT_TYPE, XLSX_CONTENT_TYPE),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"quizzes_export.xlsx\"",
            ),
        ],
        bytes,
    ))
}

/// Downloads the empty bulk-import template.
/// Admin only.
pub async fn download_template() -> Result<impl IntoResponse, AppError> {
    let bytes = excel::build_import_template()?;

    Ok((
        [
            (header::CONTENT_TYPE, XLSX_CONTENT_TYPE),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"quiz_import_template.xlsx\"",
            ),
        ],
        bytes,
    ))
}

/// Imports quizzes from an uploaded xlsx workbook.
///
/// Row-level problems are collected into the report; the import never
/// aborts part-way because of one bad row.
/// Admin only.
pub async fn import_quizzes(
    State(pool): State<SqlitePool>,
    Extension(claims): Extension<Claims>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let mut data = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        if field.name() == Some("file") || field.file_name().is_some() {
            data = Some(
                field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?,
            );
            break;
        }
    }

    let data = data.ok_or(AppError::BadRequest("No file uploaded".to_string()))?;

    let report = excel::import_quizzes(&pool, &data, claims.user_id()).await?;

    tracing::info!(
        "Quiz import touched {} quizzes with {} errors",
        report.quiz_count,
        report.errors.len()
    );

    Ok(Json(report))
}
