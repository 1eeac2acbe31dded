// src/models/question.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Question type labels stored in the 'question_type' column.
pub const MULTIPLE_CHOICE: &str = "multiple_choice";
pub const TEXT: &str = "text";

/// Represents the 'questions' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Question {
    pub id: i64,
    pub quiz_id: i64,
    pub question_text: String,

    /// 'multiple_choice' or 'text'.
    pub question_type: String,

    /// Position within the quiz; questions are ordered by (ord, id).
    pub ord: i64,

    pub time_limit_minutes: i64,
}

/// Represents the 'choices' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Choice {
    pub id: i64,
    pub question_id: i64,
    pub choice_text: String,
    pub is_correct: bool,
}

/// Choice as shown to a trainee taking a quiz (correctness withheld).
#[derive(Debug, Serialize, FromRow)]
pub struct ChoiceView {
    pub id: i64,
    pub question_id: i64,
    pub choice_text: String,
}

/// Question plus its choices, as rendered in the take-quiz view.
#[derive(Debug, Serialize)]
pub struct QuestionView {
    pub id: i64,
    pub question_text: String,
    pub question_type: String,
    pub ord: i64,
    pub time_limit_minutes: i64,
    pub choices: Vec<ChoiceView>,
}

/// DTO for a choice supplied inline with a question.
#[derive(Debug, Deserialize, Validate)]
pub struct ChoiceInput {
    #[validate(length(min = 1, max = 200))]
    pub choice_text: String,
    #[serde(default)]
    pub is_correct: bool,
}

/// DTO for creating a new question, optionally with its choices.
///
/// Choices only apply to multiple-choice questions; they are ignored for
/// text questions, matching the bulk importer. The "at least 2 choices, one
/// correct" expectation is advisory and not enforced here.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateQuestionRequest {
    pub quiz_id: i64,

    #[validate(length(min = 1, max = 2000, message = "Question text is required."))]
    pub question_text: String,

    #[validate(custom(function = validate_question_type))]
    #[serde(default = "default_question_type")]
    pub question_type: String,

    #[serde(default)]
    pub ord: i64,

    #[validate(range(min = 1, message = "Time limit must be at least 1 minute."))]
    #[serde(default = "default_time_limit")]
    pub time_limit_minutes: i64,

    #[validate(nested)]
    pub choices: Option<Vec<ChoiceInput>>,
}

/// DTO for updating a question. Fields are optional; providing `choices`
/// replaces the existing choice set.
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateQuestionRequest {
    #[validate(length(min = 1, max = 2000))]
    pub question_text: Option<String>,

    #[validate(custom(function = validate_question_type))]
    pub question_type: Option<String>,

    pub ord: Option<i64>,

    #[validate(range(min = 1))]
    pub time_limit_minutes: Option<i64>,

    #[validate(nested)]
    pub choices: Option<Vec<ChoiceInput>>,
}

fn default_question_type() -> String {
    MULTIPLE_CHOICE.to_string()
}

fn default_time_limit() -> i64 {
    1
}

fn validate_question_type(value: &str) -> Result<(), validator::ValidationError> {
    if value == MULTIPLE_CHOICE || value == TEXT {
        Ok(())
    } else {
        Err(validator::ValidationError::new("invalid_question_type"))
    }
}
