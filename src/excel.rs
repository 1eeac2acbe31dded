// src/excel.rs
//
// Spreadsheet import/export for quiz bulk operations. Runs outside the live
// quiz-taking path; import accumulates row-level errors and reports partial
// success instead of aborting.

use std::collections::HashMap;
use std::io::Cursor;

use calamine::{Data, Reader, Xlsx};
use chrono::Utc;
use rust_xlsxwriter::{Color, Format, Workbook, Worksheet, XlsxError};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::{error::AppError, models::question};

const QUIZ_HEADERS: [&str; 5] = [
    "Quiz Title",
    "Description",
    "Created By",
    "Is Active",
    "Created At",
];
const QUESTION_HEADERS: [&str; 5] = [
    "Quiz Title",
    "Question Text",
    "Question Type",
    "Order",
    "Time Limit (minutes)",
];
const CHOICE_HEADERS: [&str; 4] = ["Quiz Title", "Question Text", "Choice Text", "Is Correct"];

/// Outcome of a bulk import: row-level errors are collected, never fatal.
#[derive(Debug, Serialize, Deserialize)]
pub struct ImportReport {
    pub success: bool,
    pub errors: Vec<String>,
    pub quiz_count: usize,
}

fn header_format() -> Format {
    Format::new()
        .set_bold()
        .set_font_color(Color::White)
        .set_background_color(Color::RGB(0x366092))
}

fn write_headers(sheet: &mut Worksheet, headers: &[&str]) -> Result<(), XlsxError> {
    let format = header_format();
    for (col, header) in headers.iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, *header, &format)?;
    }
    Ok(())
}

/// Display label for a stored question type.
fn question_type_label(question_type: &str) -> &'static str {
    if question_type == question::TEXT {
        "Text Answer"
    } else {
        "Multiple Choice"
    }
}

/// Maps a sheet's type label to a stored question type.
/// Unknown labels default to multiple choice.
fn parse_question_type(label: &str) -> &'static str {
    match label.trim().to_lowercase().as_str() {
        "text answer" | "text" => question::TEXT,
        _ => question::MULTIPLE_CHOICE,
    }
}

/// Yes/No cells accept case-insensitive {yes, y, true, 1}; an empty cell
/// falls back to the given default.
fn parse_yes_no(value: &str, default: bool) -> bool {
    let value = value.trim().to_lowercase();
    if value.is_empty() {
        return default;
    }
    matches!(value.as_str(), "yes" | "y" | "true" | "1")
}

/// String content of a cell, trimmed; empty for missing cells.
fn cell_str(row: &[Data], idx: usize) -> String {
    match row.get(idx) {
        None | Some(Data::Empty) => String::new(),
        Some(Data::String(s)) => s.trim().to_string(),
        Some(Data::Float(f)) if f.fract() == 0.0 => format!("{}", *f as i64),
        Some(other) => other.to_string().trim().to_string(),
    }
}

/// Integer content of a cell; malformed or missing values fall back to the
/// given default.
fn cell_i64(row: &[Data], idx: usize, default: i64) -> i64 {
    match row.get(idx) {
        Some(Data::Int(i)) => *i,
        Some(Data::Float(f)) => *f as i64,
        Some(Data::String(s)) => s.trim().parse().unwrap_or(default),
        _ => default,
    }
}

#[derive(sqlx::FromRow)]
struct ExportQuizRow {
    title: String,
    description: String,
    created_by: String,
    is_active: bool,
    created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(sqlx::FromRow)]
struct ExportQuestionRow {
    quiz_title: String,
    question_text: String,
    question_type: String,
    ord: i64,
    time_limit_minutes: i64,
}

#[derive(sqlx::FromRow)]
struct ExportChoiceRow {
    quiz_title: String,
    question_text: String,
    choice_text: String,
    is_correct: bool,
}

/// Exports all quizzes with their questions and choices into a three-sheet
/// workbook (Quizzes / Questions / Choices).
pub async fn export_quizzes(pool: &SqlitePool) -> Result<Vec<u8>, AppError> {
    let quizzes = sqlx::query_as::<_, ExportQuizRow>(
        r#"
        SELECT q.title, q.description, u.username AS created_by, q.is_active, q.created_at
        FROM quizzes q
        JOIN users u ON q.created_by = u.id
        ORDER BY q.created_at DESC
        "#,
    )
    .fetch_all(pool)
    .await?;

    let questions = sqlx::query_as::<_, ExportQuestionRow>(
        r#"
        SELECT z.title AS quiz_title, q.question_text, q.question_type,
               q.ord, q.time_limit_minutes
        FROM questions q
        JOIN quizzes z ON q.quiz_id = z.id
        ORDER BY z.created_at DESC, q.ord, q.id
        "#,
    )
    .fetch_all(pool)
    .await?;

    let choices = sqlx::query_as::<_, ExportChoiceRow>(
        r#"
        SELECT z.title AS quiz_title, q.question_text, c.choice_text, c.is_correct
        FROM choices c
        JOIN questions q ON c.question_id = q.id
        JOIN quizzes z ON q.quiz_id = z.id
        WHERE q.question_type = 'multiple_choice'
        ORDER BY z.created_at DESC, q.ord, q.id, c.id
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut workbook = Workbook::new();

    let sheet = workbook.add_worksheet();
    sheet.set_name("Quizzes")?;
    write_headers(sheet, &QUIZ_HEADERS)?;
    sheet.set_column_width(0, 30.0)?;
    sheet.set_column_width(1, 50.0)?;
    for (i, quiz) in quizzes.iter().enumerate() {
        let row = i as u32 + 1;
        sheet.write_string(row, 0, &quiz.title)?;
        sheet.write_string(row, 1, &quiz.description)?;
        sheet.write_string(row, 2, &quiz.created_by)?;
        sheet.write_string(row, 3, if quiz.is_active { "Yes" } else { "No" })?;
        sheet.write_string(
            row,
            4,
            quiz.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        )?;
    }

    let sheet = workbook.add_worksheet();
    sheet.set_name("Questions")?;
    write_headers(sheet, &QUESTION_HEADERS)?;
    sheet.set_column_width(0, 30.0)?;
    sheet.set_column_width(1, 60.0)?;
    for (i, q) in questions.iter().enumerate() {
        let row = i as u32 + 1;
        sheet.write_string(row, 0, &q.quiz_title)?;
        sheet.write_string(row, 1, &q.question_text)?;
        sheet.write_string(row, 2, question_type_label(&q.question_type))?;
        sheet.write_number(row, 3, q.ord as f64)?;
        sheet.write_number(row, 4, q.time_limit_minutes as f64)?;
    }

    let sheet = workbook.add_worksheet();
    sheet.set_name("Choices")?;
    write_headers(sheet, &CHOICE_HEADERS)?;
    sheet.set_column_width(0, 30.0)?;
    sheet.set_column_width(1, 60.0)?;
    sheet.set_column_width(2, 40.0)?;
    for (i, c) in choices.iter().enumerate() {
        let row = i as u32 + 1;
        sheet.write_string(row, 0, &c.quiz_title)?;
        sheet.write_string(row, 1, &c.question_text)?;
        sheet.write_string(row, 2, &c.choice_text)?;
        sheet.write_string(row, 3, if c.is_correct { "Yes" } else { "No" })?;
    }

    let mut cursor = Cursor::new(Vec::new());
    workbook.save_to_writer(&mut cursor)?;
    Ok(cursor.into_inner())
}

/// Builds the bulk-import template: an Instructions sheet plus the three
/// data sheets with headers and example rows.
pub fn build_import_template() -> Result<Vec<u8>, AppError> {
    let mut workbook = Workbook::new();

    let title_format = Format::new().set_bold();
    let instructions = [
        "QUIZ BULK IMPORT TEMPLATE - INSTRUCTIONS",
        "",
        "1. QUIZZES SHEET:",
        "   - Quiz Title is required and must be unique across the sheet",
        "   - Created By: username of the owner (falls back to the importing admin)",
        "   - Is Active: 'Yes' or 'No' (defaults to 'Yes')",
        "",
        "2. QUESTIONS SHEET:",
        "   - Quiz Title must match a row in the Quizzes sheet exactly",
        "   - Question Type: 'Multiple Choice' or 'Text Answer' (defaults to 'Multiple Choice')",
        "   - Order: question position (0, 1, 2, ...)",
        "   - Time Limit: minutes allowed for the question (defaults to 1)",
        "",
        "3. CHOICES SHEET:",
        "   - Quiz Title and Question Text must match the Questions sheet exactly",
        "   - Is Correct: 'Yes' or 'No'",
        "   - Only Multiple Choice questions take choices; rows for other questions are skipped",
        "",
        "NOTES:",
        "- Multiple Choice questions should have at least 2 choices and 1 correct one",
        "- Yes/No fields accept yes, y, true or 1 (case-insensitive)",
    ];

    let sheet = workbook.add_worksheet();
    sheet.set_name("Instructions")?;
    sheet.set_column_width(0, 90.0)?;
    for (i, line) in instructions.iter().enumerate() {
        if i == 0 {
            sheet.write_string_with_format(i as u32, 0, *line, &title_format)?;
        } else {
            sheet.write_string(i as u32, 0, *line)?;
        }
    }

    let sheet = workbook.add_worksheet();
    sheet.set_name("Quizzes")?;
    write_headers(sheet, &QUIZ_HEADERS[..4])?;
    sheet.set_column_width(0, 30.0)?;
    sheet.set_column_width(1, 50.0)?;
    sheet.write_string(1, 0, "Sample Quiz")?;
    sheet.write_string(1, 1, "This is a sample quiz description")?;
    sheet.write_string(1, 2, "admin")?;
    sheet.write_string(1, 3, "Yes")?;

    let sheet = workbook.add_worksheet();
    sheet.set_name("Questions")?;
    write_headers(sheet, &QUESTION_HEADERS)?;
    sheet.set_column_width(0, 30.0)?;
    sheet.set_column_width(1, 60.0)?;
    sheet.write_string(1, 0, "Sample Quiz")?;
    sheet.write_string(1, 1, "What is Rust?")?;
    sheet.write_string(1, 2, "Multiple Choice")?;
    sheet.write_number(1, 3, 0.0)?;
    sheet.write_number(1, 4, 1.0)?;
    sheet.write_string(2, 0, "Sample Quiz")?;
    sheet.write_string(2, 1, "Explain ownership in your own words.")?;
    sheet.write_string(2, 2, "Text Answer")?;
    sheet.write_number(2, 3, 1.0)?;
    sheet.write_number(2, 4, 2.0)?;

    let sheet = workbook.add_worksheet();
    sheet.set_name("Choices")?;
    write_headers(sheet, &CHOICE_HEADERS)?;
    sheet.set_column_width(0, 30.0)?;
    sheet.set_column_width(1, 60.0)?;
    sheet.set_column_width(2, 40.0)?;
    sheet.write_string(1, 0, "Sample Quiz")?;
    sheet.write_string(1, 1, "What is Rust?")?;
    sheet.write_string(1, 2, "An oxide layer")?;
    sheet.write_string(1, 3, "No")?;
    sheet.write_string(2, 0, "Sample Quiz")?;
    sheet.write_string(2, 1, "What is Rust?")?;
    sheet.write_string(2, 2, "A programming language")?;
    sheet.write_string(2, 3, "Yes")?;

    let mut cursor = Cursor::new(Vec::new());
    workbook.save_to_writer(&mut cursor)?;
    Ok(cursor.into_inner())
}

/// Imports quizzes, questions, and choices from an uploaded workbook.
///
/// Quiz rows create-or-update by title; question rows by (quiz, text);
/// choice rows are created once per (question, text) and only for
/// multiple-choice questions. Unmatched cross-sheet references become
/// collected errors; the rest of the import proceeds.
pub async fn import_quizzes(
    pool: &SqlitePool,
    data: &[u8],
    fallback_user_id: i64,
) -> Result<ImportReport, AppError> {
    let mut errors = Vec::new();

    let mut workbook = match Xlsx::new(Cursor::new(data)) {
        Ok(wb) => wb,
        Err(e) => {
            return Ok(ImportReport {
                success: false,
                errors: vec![format!("Error reading Excel file: {}", e)],
                quiz_count: 0,
            });
        }
    };

    let fallback_username: String =
        sqlx::query_scalar("SELECT username FROM users WHERE id = ?")
            .bind(fallback_user_id)
            .fetch_one(pool)
            .await?;

    // Quizzes sheet is mandatory; everything else keys off it.
    let quiz_range = match workbook.worksheet_range("Quizzes") {
        Ok(range) => range,
        Err(_) => {
            return Ok(ImportReport {
                success: false,
                errors: vec!["Excel file must contain a \"Quizzes\" sheet".to_string()],
                quiz_count: 0,
            });
        }
    };

    let mut quiz_ids_by_title: HashMap<String, i64> = HashMap::new();

    for (row_idx, row) in quiz_range.rows().enumerate().skip(1) {
        let row_number = row_idx + 1;
        let title = cell_str(row, 0);
        if title.is_empty() {
            continue;
        }

        let description = cell_str(row, 1);

        let mut creator_username = cell_str(row, 2);
        if creator_username.is_empty() {
            creator_username = "admin".to_string();
        }
        let creator_id: Option<i64> =
            sqlx::query_scalar("SELECT id FROM users WHERE username = ?")
                .bind(&creator_username)
                .fetch_optional(pool)
                .await?;
        let creator_id = match creator_id {
            Some(id) => id,
            None => {
                errors.push(format!(
                    "Quizzes sheet, Row {}: User \"{}\" not found, using \"{}\"",
                    row_number, creator_username, fallback_username
                ));
                fallback_user_id
            }
        };

        let is_active = parse_yes_no(&cell_str(row, 3), true);

        let existing: Option<i64> =
            sqlx::query_scalar("SELECT id FROM quizzes WHERE title = ? LIMIT 1")
                .bind(&title)
                .fetch_optional(pool)
                .await?;

        let quiz_id = match existing {
            Some(id) => {
                sqlx::query("UPDATE quizzes SET description = ?, is_active = ? WHERE id = ?")
                    .bind(&description)
                    .bind(is_active)
                    .bind(id)
                    .execute(pool)
                    .await?;
                id
            }
            None => {
                sqlx::query_scalar(
                    r#"
                    INSERT INTO quizzes (title, description, category_id, created_by, is_active, created_at)
                    VALUES (?, ?, NULL, ?, ?, ?)
                    RETURNING id
                    "#,
                )
                .bind(&title)
                .bind(&description)
                .bind(creator_id)
                .bind(is_active)
                .bind(Utc::now())
                .fetch_one(pool)
                .await?
            }
        };

        quiz_ids_by_title.insert(title, quiz_id);
    }

    match workbook.worksheet_range("Questions") {
        Err(_) => errors.push("Excel file should contain a \"Questions\" sheet".to_string()),
        Ok(question_range) => {
            for (row_idx, row) in question_range.rows().enumerate().skip(1) {
                let row_number = row_idx + 1;
                let quiz_title = cell_str(row, 0);
                if quiz_title.is_empty() {
                    continue;
                }

                let Some(&quiz_id) = quiz_ids_by_title.get(&quiz_title) else {
                    errors.push(format!(
                        "Questions sheet, Row {}: Quiz \"{}\" not found in Quizzes sheet",
                        row_number, quiz_title
                    ));
                    continue;
                };

                let question_text = cell_str(row, 1);
                if question_text.is_empty() {
                    errors.push(format!(
                        "Questions sheet, Row {}: Question text is required",
                        row_number
                    ));
                    continue;
                }

                let question_type = parse_question_type(&cell_str(row, 2));
                let ord = cell_i64(row, 3, 0);
                let time_limit = cell_i64(row, 4, 1).max(1);

                let existing: Option<i64> = sqlx::query_scalar(
                    "SELECT id FROM questions WHERE quiz_id = ? AND question_text = ? LIMIT 1",
                )
                .bind(quiz_id)
                .bind(&question_text)
                .fetch_optional(pool)
                .await?;

                match existing {
                    Some(id) => {
                        sqlx::query(
                            r#"
                            UPDATE questions
                            SET question_type = ?, ord = ?, time_limit_minutes = ?
                            WHERE id = ?
                            "#,
                        )
                        .bind(question_type)
                        .bind(ord)
                        .bind(time_limit)
                        .bind(id)
                        .execute(pool)
                        .await?;
                    }
                    None => {
                        sqlx::query(
                            r#"
                            INSERT INTO questions (quiz_id, question_text, question_type, ord, time_limit_minutes)
                            VALUES (?, ?, ?, ?, ?)
                            "#,
                        )
                        .bind(quiz_id)
                        .bind(&question_text)
                        .bind(question_type)
                        .bind(ord)
                        .bind(time_limit)
                        .execute(pool)
                        .await?;
                    }
                }
            }
        }
    }

    if let Ok(choice_range) = workbook.worksheet_range("Choices") {
        for (row_idx, row) in choice_range.rows().enumerate().skip(1) {
            let row_number = row_idx + 1;
            let quiz_title = cell_str(row, 0);
            if quiz_title.is_empty() {
                continue;
            }

            // Missing quiz was already reported during the Questions pass.
            let Some(&quiz_id) = quiz_ids_by_title.get(&quiz_title) else {
                continue;
            };

            let question_text = cell_str(row, 1);
            if question_text.is_empty() {
                continue;
            }

            let question: Option<(i64, String)> = sqlx::query_as(
                "SELECT id, question_type FROM questions WHERE quiz_id = ? AND question_text = ? LIMIT 1",
            )
            .bind(quiz_id)
            .bind(&question_text)
            .fetch_optional(pool)
            .await?;

            let Some((question_id, question_type)) = question else {
                errors.push(format!(
                    "Choices sheet, Row {}: Question \"{}\" not found for quiz \"{}\"",
                    row_number, question_text, quiz_title
                ));
                continue;
            };

            // Only multiple choice questions take choices.
            if question_type != question::MULTIPLE_CHOICE {
                continue;
            }

            let choice_text = cell_str(row, 2);
            if choice_text.is_empty() {
                continue;
            }

            let is_correct = parse_yes_no(&cell_str(row, 3), false);

            let existing: Option<i64> = sqlx::query_scalar(
                "SELECT id FROM choices WHERE question_id = ? AND choice_text = ? LIMIT 1",
            )
            .bind(question_id)
            .bind(&choice_text)
            .fetch_optional(pool)
            .await?;

            if existing.is_none() {
                sqlx::query(
                    "INSERT INTO choices (question_id, choice_text, is_correct) VALUES (?, ?, ?)",
                )
                .bind(question_id)
                .bind(&choice_text)
                .bind(is_correct)
                .execute(pool)
                .await?;
            }
        }
    }

    Ok(ImportReport {
        success: errors.is_empty(),
        errors,
        quiz_count: quiz_ids_by_title.len(),
    })
}
