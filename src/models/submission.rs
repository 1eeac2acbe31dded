// src/models/submission.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::models::question::QuestionView;

/// Represents the 'submissions' table: one trainee's single attempt at one
/// quiz. Created lazily on first start, frozen once completed.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct QuizSubmission {
    pub id: i64,
    pub quiz_id: i64,
    pub trainee_id: i64,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub submitted_at: Option<chrono::DateTime<chrono::Utc>>,
    pub is_completed: bool,

    /// Percentage score, set only when `is_completed` is true.
    pub score: Option<f64>,
}

/// An answer previously recorded for a question of this submission.
#[derive(Debug, Serialize, FromRow)]
pub struct ExistingAnswer {
    pub question_id: i64,
    pub answer_text: String,
    pub selected_choice_id: Option<i64>,
}

/// Response for `POST /api/quizzes/{id}/start`.
#[derive(Debug, Serialize)]
pub struct StartQuizResponse {
    pub submission_id: i64,
    pub completed: bool,
}

/// Response for the take-quiz view.
#[derive(Debug, Serialize)]
pub struct TakeQuizResponse {
    pub quiz_id: i64,
    pub quiz_title: String,
    pub quiz_description: String,
    pub submission_id: i64,
    pub questions: Vec<QuestionView>,
    pub answers: Vec<ExistingAnswer>,

    /// Total time budget: sum of per-question minute limits, in seconds.
    pub total_time_seconds: i64,
}

/// DTO for recording a single answer.
///
/// Multiple-choice questions take `choice_id`; text questions take
/// `answer_text`, stored verbatim.
#[derive(Debug, Deserialize)]
pub struct SubmitAnswerRequest {
    pub question_id: i64,
    pub choice_id: Option<i64>,
    pub answer_text: Option<String>,
}

/// Response for `POST /api/quizzes/{id}/submit`.
#[derive(Debug, Serialize)]
pub struct SubmitQuizResponse {
    pub submission_id: i64,
    pub score: f64,
}

/// Per-question review row for the results view. `is_correct` is only
/// populated for answered multiple-choice questions.
#[derive(Debug, Serialize, FromRow)]
pub struct AnswerReview {
    pub question_id: i64,
    pub question_text: String,
    pub question_type: String,
    pub answer_text: Option<String>,
    pub selected_choice_id: Option<i64>,
    pub selected_choice_text: Option<String>,
    pub is_correct: Option<bool>,
}

/// Response for `GET /api/results/{submission_id}`.
#[derive(Debug, Serialize)]
pub struct ResultsResponse {
    pub submission: QuizSubmission,
    pub quiz_title: String,
    pub answers: Vec<AnswerReview>,
}

/// A row joined from `submissions` and `users` for the leaderboard.
#[derive(Debug, Serialize, FromRow)]
pub struct LeaderboardEntry {
    pub username: String,
    pub score: f64,
    pub submitted_at: chrono::DateTime<chrono::Utc>,
}
