// src/handlers/quiz.rs

use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::{
    error::AppError,
    models::{
        question::{self, Choice, ChoiceView, Question, QuestionView},
        quiz::{Quiz, QuizListItem},
        submission::{
            AnswerReview, ExistingAnswer, LeaderboardEntry, QuizSubmission, ResultsResponse,
            StartQuizResponse, SubmitAnswerRequest, SubmitQuizResponse, TakeQuizResponse,
        },
    },
    utils::jwt::Claims,
};

/// Check if the user has access to the quiz's category.
///
/// A quiz without a category is open to everyone (pre-category data).
/// Otherwise the quiz's category must be among the user's registered
/// categories; a user without a profile has none and is denied.
pub async fn check_quiz_category_access(
    pool: &SqlitePool,
    user_id: i64,
    quiz: &Quiz,
) -> Result<bool, AppError> {
    let Some(category_id) = quiz.category_id else {
        return Ok(true);
    };

    let registered: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM profile_categories pc
        JOIN profiles p ON pc.profile_id = p.id
        WHERE p.user_id = ? AND pc.category_id = ?
        "#,
    )
    .bind(user_id)
    .bind(category_id)
    .fetch_one(pool)
    .await?;

    Ok(registered > 0)
}

async fn fetch_quiz(pool: &SqlitePool, quiz_id: i64) -> Result<Quiz, AppError> {
    sqlx::query_as::<_, Quiz>(
        r#"
        SELECT id, title, description, category_id, created_by, is_active, created_at
        FROM quizzes
        WHERE id = ?
        "#,
    )
    .bind(quiz_id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("Quiz not found".to_string()))
}

async fn fetch_active_quiz(pool: &SqlitePool, quiz_id: i64) -> Result<Quiz, AppError> {
    let quiz = fetch_quiz(pool, quiz_id).await?;
    if !quiz.is_active {
        return Err(AppError::NotFound("Quiz not found".to_string()));
    }
    Ok(quiz)
}

async fn require_access(pool: &SqlitePool, user_id: i64, quiz: &Quiz) -> Result<(), AppError> {
    if !check_quiz_category_access(pool, user_id, quiz).await? {
        return Err(AppError::Forbidden(
            "You do not have access to quizzes in this category".to_string(),
        ));
    }
    Ok(())
}

async fn fetch_submission(
    pool: &SqlitePool,
    quiz_id: i64,
    trainee_id: i64,
) -> Result<Option<QuizSubmission>, AppError> {
    let submission = sqlx::query_as::<_, QuizSubmission>(
        r#"
        SELECT id, quiz_id, trainee_id, started_at, submitted_at, is_completed, score
        FROM submissions
        WHERE quiz_id = ? AND trainee_id = ?
        "#,
    )
    .bind(quiz_id)
    .bind(trainee_id)
    .fetch_optional(pool)
    .await?;

    Ok(submission)
}

/// Lists active quizzes within the caller's registered categories.
///
/// Trainees who registered no categories see an empty list. Each row carries
/// the caller's completed submission id, if any, so the client can route to
/// results instead of the take view.
pub async fn list_quizzes(
    State(pool): State<SqlitePool>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id();

    let quizzes = sqlx::query_as::<_, QuizListItem>(
        r#"
        SELECT
            q.id, q.title, q.description, c.name AS category_name,
            q.created_at, s.id AS completed_submission_id
        FROM quizzes q
        JOIN categories c ON q.category_id = c.id
        JOIN profile_categories pc ON pc.category_id = c.id
        JOIN profiles p ON p.id = pc.profile_id AND p.user_id = ?
        LEFT JOIN submissions s
            ON s.quiz_id = q.id AND s.trainee_id = ? AND s.is_completed = 1
        WHERE q.is_active = 1
        ORDER BY q.created_at DESC
        "#,
    )
    .bind(user_id)
    .bind(user_id)
    .fetch_all(&pool)
    .await?;

    Ok(Json(quizzes))
}

/// Starts a quiz: creates the caller's submission if it does not exist.
///
/// Idempotent. Concurrent starts race on the (quiz, trainee) unique index;
/// the loser's insert is a no-op and both callers get the same row.
pub async fn start_quiz(
    State(pool): State<SqlitePool>,
    Extension(claims): Extension<Claims>,
    Path(quiz_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id();
    let quiz = fetch_active_quiz(&pool, quiz_id).await?;
    require_access(&pool, user_id, &quiz).await?;

    sqlx::query(
        r#"
        INSERT INTO submissions (quiz_id, trainee_id, started_at)
        VALUES (?, ?, ?)
        ON CONFLICT(quiz_id, trainee_id) DO NOTHING
        "#,
    )
    .bind(quiz.id)
    .bind(user_id)
    .bind(Utc::now())
    .execute(&pool)
    .await?;

    let submission = fetch_submission(&pool, quiz.id, user_id)
        .await?
        .ok_or(AppError::InternalServerError(
            "Submission missing after insert".to_string(),
        ))?;

    Ok(Json(StartQuizResponse {
        submission_id: submission.id,
        completed: submission.is_completed,
    }))
}

/// Take-quiz view: questions with choices (correctness withheld), previously
/// recorded answers, and the total time budget in seconds.
pub async fn take_quiz(
    State(pool): State<SqlitePool>,
    Extension(claims): Extension<Claims>,
    Path(quiz_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id();
    let quiz = fetch_active_quiz(&pool, quiz_id).await?;
    require_access(&pool, user_id, &quiz).await?;

    let submission = fetch_submission(&pool, quiz.id, user_id)
        .await?
        .ok_or(AppError::NotFound("Quiz not started".to_string()))?;

    if submission.is_completed {
        return Err(AppError::Conflict(
            "You have already completed this quiz".to_string(),
        ));
    }

    let questions = sqlx::query_as::<_, Question>(
        r#"
        SELECT id, quiz_id, question_text, question_type, ord, time_limit_minutes
        FROM questions
        WHERE quiz_id = ?
        ORDER BY ord, id
        "#,
    )
    .bind(quiz.id)
    .fetch_all(&pool)
    .await?;

    let total_time_seconds: i64 = questions.iter().map(|q| q.time_limit_minutes).sum::<i64>() * 60;

    let mut choices_by_question: HashMap<i64, Vec<ChoiceView>> = HashMap::new();
    if !questions.is_empty() {
        let mut query_builder = QueryBuilder::<Sqlite>::new(
            "SELECT id, question_id, choice_text FROM choices WHERE question_id IN (",
        );
        let mut separated = query_builder.separated(",");
        for q in &questions {
            separated.push_bind(q.id);
        }
        separated.push_unseparated(") ORDER BY id");

        let choices: Vec<ChoiceView> = query_builder.build_query_as().fetch_all(&pool).await?;
        for choice in choices {
            choices_by_question
                .entry(choice.question_id)
                .or_default()
                .push(choice);
        }
    }

    let questions = questions
        .into_iter()
        .map(|q| {
            let choices = choices_by_question.remove(&q.id).unwrap_or_default();
            QuestionView {
                id: q.id,
                question_text: q.question_text,
                question_type: q.question_type,
                ord: q.ord,
                time_limit_minutes: q.time_limit_minutes,
                choices,
            }
        })
        .collect();

    let answers = sqlx::query_as::<_, ExistingAnswer>(
        r#"
        SELECT question_id, answer_text, selected_choice_id
        FROM answers
        WHERE submission_id = ?
        "#,
    )
    .bind(submission.id)
    .fetch_all(&pool)
    .await?;

    Ok(Json(TakeQuizResponse {
        quiz_id: quiz.id,
        quiz_title: quiz.title,
        quiz_description: quiz.description,
        submission_id: submission.id,
        questions,
        answers,
        total_time_seconds,
    }))
}

/// Records one answer, upserting on (submission, question).
///
/// A second call for the same question overwrites the previous answer rather
/// than creating a duplicate. Rejected with 409 once the submission is
/// completed.
pub async fn submit_answer(
    State(pool): State<SqlitePool>,
    Extension(claims): Extension<Claims>,
    Path(quiz_id): Path<i64>,
    Json(payload): Json<SubmitAnswerRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id();
    let quiz = fetch_quiz(&pool, quiz_id).await?;
    require_access(&pool, user_id, &quiz).await?;

    let submission = fetch_submission(&pool, quiz.id, user_id)
        .await?
        .ok_or(AppError::NotFound("Quiz not started".to_string()))?;

    if submission.is_completed {
        return Err(AppError::Conflict("Quiz already completed".to_string()));
    }

    let question = sqlx::query_as::<_, Question>(
        r#"
        SELECT id, quiz_id, question_text, question_type, ord, time_limit_minutes
        FROM questions
        WHERE id = ? AND quiz_id = ?
        "#,
    )
    .bind(payload.question_id)
    .bind(quiz.id)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::NotFound("Question not found".to_string()))?;

    let (answer_text, selected_choice_id) = if question.question_type == question::MULTIPLE_CHOICE
    {
        let choice_id = payload.choice_id.ok_or(AppError::BadRequest(
            "choice_id is required for multiple choice questions".to_string(),
        ))?;

        // The selected choice must belong to the question being answered.
        let choice = sqlx::query_as::<_, Choice>(
            r#"
            SELECT id, question_id, choice_text, is_correct
            FROM choices
            WHERE id = ? AND question_id = ?
            "#,
        )
        .bind(choice_id)
        .bind(question.id)
        .fetch_optional(&pool)
        .await?
        .ok_or(AppError::NotFound("Choice not found".to_string()))?;

        (choice.choice_text, Some(choice.id))
    } else {
        (payload.answer_text.unwrap_or_default(), None)
    };

    sqlx::query(
        r#"
        INSERT INTO answers (submission_id, question_id, answer_text, selected_choice_id)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(submission_id, question_id) DO UPDATE SET
            answer_text = excluded.answer_text,
            selected_choice_id = excluded.selected_choice_id
        "#,
    )
    .bind(submission.id)
    .bind(question.id)
    .bind(&answer_text)
    .bind(selected_choice_id)
    .execute(&pool)
    .await?;

    Ok(Json(serde_json::json!({ "success": true })))
}

/// Finalizes a submission and computes its score.
///
/// score = correct multiple-choice answers / total questions * 100, or 0 for
/// a quiz with no questions. The completing UPDATE is guarded by
/// `is_completed = 0`, so the transition happens exactly once; a concurrent
/// double submit loses and gets 409.
pub async fn submit_quiz(
    State(pool): State<SqlitePool>,
    Extension(claims): Extension<Claims>,
    Path(quiz_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id();
    let quiz = fetch_quiz(&pool, quiz_id).await?;
    require_access(&pool, user_id, &quiz).await?;

    let submission = fetch_submission(&pool, quiz.id, user_id)
        .await?
        .ok_or(AppError::NotFound("Quiz not started".to_string()))?;

    if submission.is_completed {
        return Err(AppError::Conflict("Quiz already completed".to_string()));
    }

    let total_questions: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM questions WHERE quiz_id = ?")
            .bind(quiz.id)
            .fetch_one(&pool)
            .await?;

    let correct_answers: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM answers a
        JOIN questions q ON a.question_id = q.id
        JOIN choices c ON a.selected_choice_id = c.id
        WHERE a.submission_id = ?
          AND q.question_type = 'multiple_choice'
          AND c.is_correct = 1
        "#,
    )
    .bind(submission.id)
    .fetch_one(&pool)
    .await?;

    let score = if total_questions > 0 {
        correct_answers as f64 / total_questions as f64 * 100.0
    } else {
        0.0
    };

    let result = sqlx::query(
        r#"
        UPDATE submissions
        SET is_completed = 1, submitted_at = ?, score = ?
        WHERE id = ? AND is_completed = 0
        "#,
    )
    .bind(Utc::now())
    .bind(score)
    .bind(submission.id)
    .execute(&pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::Conflict("Quiz already completed".to_string()));
    }

    tracing::info!(
        "Submission {} completed with score {:.1}",
        submission.id,
        score
    );

    Ok(Json(SubmitQuizResponse {
        submission_id: submission.id,
        score,
    }))
}

/// Results view for the caller's own submission: per-question review with
/// multiple-choice correctness.
pub async fn quiz_results(
    State(pool): State<SqlitePool>,
    Extension(claims): Extension<Claims>,
    Path(submission_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id();

    let submission = sqlx::query_as::<_, QuizSubmission>(
        r#"
        SELECT id, quiz_id, trainee_id, started_at, submitted_at, is_completed, score
        FROM submissions
        WHERE id = ? AND trainee_id = ?
        "#,
    )
    .bind(submission_id)
    .bind(user_id)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::NotFound("Submission not found".to_string()))?;

    let quiz = fetch_quiz(&pool, submission.quiz_id).await?;
    require_access(&pool, user_id, &quiz).await?;

    let answers = sqlx::query_as::<_, AnswerReview>(
        r#"
        SELECT
            q.id AS question_id, q.question_text, q.question_type,
            a.answer_text, a.selected_choice_id,
            c.choice_text AS selected_choice_text, c.is_correct
        FROM questions q
        LEFT JOIN answers a ON a.question_id = q.id AND a.submission_id = ?
        LEFT JOIN choices c ON c.id = a.selected_choice_id
        WHERE q.quiz_id = ?
        ORDER BY q.ord, q.id
        "#,
    )
    .bind(submission.id)
    .bind(quiz.id)
    .fetch_all(&pool)
    .await?;

    Ok(Json(ResultsResponse {
        submission,
        quiz_title: quiz.title,
        answers,
    }))
}

/// Leaderboard: top 50 completed, scored submissions for a quiz, best score
/// first, ties broken by earlier submission time. Read-only.
pub async fn leaderboard(
    State(pool): State<SqlitePool>,
    Extension(claims): Extension<Claims>,
    Path(quiz_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id();
    let quiz = fetch_quiz(&pool, quiz_id).await?;
    require_access(&pool, user_id, &quiz).await?;

    let entries = sqlx::query_as::<_, LeaderboardEntry>(
        r#"
        SELECT u.username, s.score, s.submitted_at
        FROM submissions s
        JOIN users u ON s.trainee_id = u.id
        WHERE s.quiz_id = ? AND s.is_completed = 1 AND s.score IS NOT NULL
        ORDER BY s.score DESC, s.submitted_at ASC
        LIMIT 50
        "#,
    )
    .bind(quiz.id)
    .fetch_all(&pool)
    .await?;

    Ok(Json(entries))
}
