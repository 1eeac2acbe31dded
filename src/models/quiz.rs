// src/models/quiz.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Represents the 'quizzes' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Quiz {
    pub id: i64,
    pub title: String,
    pub description: String,

    /// A quiz belongs to at most one category. Quizzes without a category
    /// predate category gating and remain accessible to everyone.
    pub category_id: Option<i64>,

    pub created_by: i64,
    pub is_active: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Row for the trainee-facing quiz list: active quizzes within the caller's
/// registered categories, with the caller's completed submission if any.
#[derive(Debug, Serialize, FromRow)]
pub struct QuizListItem {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub category_name: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub completed_submission_id: Option<i64>,
}

/// DTO for creating a new quiz.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateQuizRequest {
    #[validate(length(min = 1, max = 200, message = "Quiz title is required."))]
    pub title: String,
    #[validate(length(max = 2000))]
    #[serde(default)]
    pub description: String,
    pub category_id: Option<i64>,
    pub is_active: Option<bool>,
}

/// DTO for updating a quiz. Fields are optional.
#[derive(Debug, Deserialize)]
pub struct UpdateQuizRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category_id: Option<i64>,
    pub is_active: Option<bool>,
}
