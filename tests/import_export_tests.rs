// tests/import_export_tests.rs

use std::io::Cursor;

use calamine::{Reader, Xlsx};
use chrono::Utc;
use quizhub::{config::Config, routes, state::AppState, utils::hash::hash_password};
use rust_xlsxwriter::Workbook;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

async fn spawn_app() -> (String, SqlitePool) {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to open in-memory SQLite database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to migrate database");

    let config = Config {
        database_url: "sqlite::memory:".to_string(),
        jwt_secret: "import_export_test_secret".to_string(),
        jwt_expiration: 600,
        rust_log: "error".to_string(),
        site_title: "Quiz Administration".to_string(),
        admin_username: None,
        admin_password: None,
    };

    let state = AppState {
        pool: pool.clone(),
        config,
    };

    let app = routes::create_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (address, pool)
}

/// Seeds the 'admin' account and returns its token.
async fn admin_token(address: &str, client: &reqwest::Client, pool: &SqlitePool) -> String {
    let hashed = hash_password("admin123").unwrap();
    sqlx::query(
        "INSERT INTO users (username, password, role, created_at) VALUES ('admin', ?, 'admin', ?)",
    )
    .bind(hashed)
    .bind(Utc::now())
    .execute(pool)
    .await
    .unwrap();

    let login: serde_json::Value = client
        .post(format!("{}/api/auth/login", address))
        .json(&serde_json::json!({
            "username": "admin",
            "password": "admin123"
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    login["token"].as_str().unwrap().to_string()
}

/// Builds a three-sheet import workbook from string rows.
fn build_workbook(
    quizzes: &[&[&str]],
    questions: &[&[&str]],
    choices: &[&[&str]],
) -> Vec<u8> {
    let mut workbook = Workbook::new();

    let sheets = [
        ("Quizzes", &["Quiz Title", "Description", "Created By", "Is Active"][..], quizzes),
        (
            "Questions",
            &["Quiz Title", "Question Text", "Question Type", "Order", "Time Limit (minutes)"][..],
            questions,
        ),
        ("Choices", &["Quiz Title", "Question Text", "Choice Text", "Is Correct"][..], choices),
    ];

    for (name, headers, rows) in sheets {
        let sheet = workbook.add_worksheet();
        sheet.set_name(name).unwrap();
        for (col, header) in headers.iter().enumerate() {
            sheet.write_string(0, col as u16, *header).unwrap();
        }
        for (row_idx, row) in rows.iter().enumerate() {
            for (col, value) in row.iter().enumerate() {
                sheet
                    .write_string(row_idx as u32 + 1, col as u16, *value)
                    .unwrap();
            }
        }
    }

    let mut cursor = Cursor::new(Vec::new());
    workbook.save_to_writer(&mut cursor).unwrap();
    cursor.into_inner()
}

async fn upload_workbook(
    address: &str,
    client: &reqwest::Client,
    token: &str,
    bytes: Vec<u8>,
) -> reqwest::Response {
    let part = reqwest::multipart::Part::bytes(bytes).file_name("quizzes.xlsx");
    let form = reqwest::multipart::Form::new().part("file", part);

    client
        .post(format!("{}/api/admin/quizzes/import", address))
        .header("Authorization", format!("Bearer {}", token))
        .multipart(form)
        .send()
        .await
        .expect("Import upload failed")
}

#[tokio::test]
async fn import_creates_quizzes_questions_and_choices() {
    let (address, pool) = spawn_app().await;
    let client = reqwest::Client::new();
    let token = admin_token(&address, &client, &pool).await;

    let bytes = build_workbook(
        &[&["Rust Basics", "Intro quiz", "admin", "Yes"]],
        &[
            &["Rust Basics", "What is cargo?", "Multiple Choice", "0", "1"],
            &["Rust Basics", "Explain borrowing.", "Text Answer", "1", "2"],
        ],
        &[
            &["Rust Basics", "What is cargo?", "A package manager", "Yes"],
            &["Rust Basics", "What is cargo?", "A web framework", "No"],
            // Choice rows for text questions are skipped silently
            &["Rust Basics", "Explain borrowing.", "Should be ignored", "Yes"],
        ],
    );

    let response = upload_workbook(&address, &client, &token, bytes).await;
    assert_eq!(response.status().as_u16(), 200);
    let report: serde_json::Value = response.json().await.unwrap();

    assert_eq!(report["success"], true);
    assert_eq!(report["quiz_count"], 1);
    assert_eq!(report["errors"].as_array().unwrap().len(), 0);

    let (description, is_active): (String, bool) =
        sqlx::query_as("SELECT description, is_active FROM quizzes WHERE title = 'Rust Basics'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(description, "Intro quiz");
    assert!(is_active);

    let question_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM questions")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(question_count, 2);

    let (question_type, time_limit): (String, i64) = sqlx::query_as(
        "SELECT question_type, time_limit_minutes FROM questions WHERE question_text = 'Explain borrowing.'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(question_type, "text");
    assert_eq!(time_limit, 2);

    // Only the two multiple-choice rows landed
    let choice_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM choices")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(choice_count, 2);

    let correct_count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM choices WHERE is_correct = 1 AND choice_text = 'A package manager'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(correct_count, 1);
}

#[tokio::test]
async fn import_collects_error_for_unknown_quiz_reference() {
    let (address, pool) = spawn_app().await;
    let client = reqwest::Client::new();
    let token = admin_token(&address, &client, &pool).await;

    let bytes = build_workbook(
        &[&["Known Quiz", "", "admin", "Yes"]],
        &[&["Ghost Quiz", "Orphan question?", "Multiple Choice", "0", "1"]],
        &[],
    );

    let response = upload_workbook(&address, &client, &token, bytes).await;
    let report: serde_json::Value = response.json().await.unwrap();

    assert_eq!(report["success"], false);
    assert_eq!(report["quiz_count"], 1);
    let errors = report["errors"].as_array().unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].as_str().unwrap().contains("Ghost Quiz"));

    // The orphan row created nothing
    let question_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM questions")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(question_count, 0);
}

#[tokio::test]
async fn import_updates_existing_quiz_by_title() {
    let (address, pool) = spawn_app().await;
    let client = reqwest::Client::new();
    let token = admin_token(&address, &client, &pool).await;

    let first = build_workbook(
        &[&["Evolving Quiz", "First description", "admin", "Yes"]],
        &[&["Evolving Quiz", "Q1", "Multiple Choice", "0", "1"]],
        &[],
    );
    upload_workbook(&address, &client, &token, first).await;

    let second = build_workbook(
        &[&["Evolving Quiz", "Second description", "admin", "No"]],
        &[&["Evolving Quiz", "Q1", "Text Answer", "3", "5"]],
        &[],
    );
    let report: serde_json::Value = upload_workbook(&address, &client, &token, second)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(report["success"], true);

    let quiz_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM quizzes")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(quiz_count, 1);

    let (description, is_active): (String, bool) =
        sqlx::query_as("SELECT description, is_active FROM quizzes WHERE title = 'Evolving Quiz'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(description, "Second description");
    assert!(!is_active);

    // The question was updated in place, keyed by (quiz, text)
    let (question_type, ord, time_limit): (String, i64, i64) = sqlx::query_as(
        "SELECT question_type, ord, time_limit_minutes FROM questions WHERE question_text = 'Q1'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(question_type, "text");
    assert_eq!(ord, 3);
    assert_eq!(time_limit, 5);
}

#[tokio::test]
async fn import_falls_back_to_importing_admin_for_unknown_creator() {
    let (address, pool) = spawn_app().await;
    let client = reqwest::Client::new();
    let token = admin_token(&address, &client, &pool).await;

    let bytes = build_workbook(
        &[&["Orphan Quiz", "", "ghost_user", "Yes"]],
        &[],
        &[],
    );

    let report: serde_json::Value = upload_workbook(&address, &client, &token, bytes)
        .await
        .json()
        .await
        .unwrap();

    assert_eq!(report["success"], false);
    let errors = report["errors"].as_array().unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].as_str().unwrap().contains("ghost_user"));

    let creator: String = sqlx::query_scalar(
        r#"
        SELECT u.username FROM quizzes q
        JOIN users u ON q.created_by = u.id
        WHERE q.title = 'Orphan Quiz'
        "#,
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(creator, "admin");
}

#[tokio::test]
async fn import_reports_unreadable_file() {
    let (address, pool) = spawn_app().await;
    let client = reqwest::Client::new();
    let token = admin_token(&address, &client, &pool).await;

    let response = upload_workbook(&address, &client, &token, b"not an xlsx file".to_vec()).await;
    assert_eq!(response.status().as_u16(), 200);

    let report: serde_json::Value = response.json().await.unwrap();
    assert_eq!(report["success"], false);
    assert_eq!(report["quiz_count"], 0);
    assert!(
        report["errors"][0]
            .as_str()
            .unwrap()
            .contains("Error reading Excel file")
    );
}

#[tokio::test]
async fn import_requires_admin_role() {
    let (address, pool) = spawn_app().await;
    let client = reqwest::Client::new();
    admin_token(&address, &client, &pool).await;

    let category_id: i64 =
        sqlx::query_scalar("INSERT INTO categories (name, description) VALUES ('Rust', '') RETURNING id")
            .fetch_one(&pool)
            .await
            .unwrap();

    client
        .post(format!("{}/api/auth/register", address))
        .json(&serde_json::json!({
            "username": "plain_trainee",
            "password": "password123",
            "category_ids": [category_id]
        }))
        .send()
        .await
        .unwrap();

    let login: serde_json::Value = client
        .post(format!("{}/api/auth/login", address))
        .json(&serde_json::json!({
            "username": "plain_trainee",
            "password": "password123"
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let trainee_token = login["token"].as_str().unwrap();

    let bytes = build_workbook(&[&["Quiz", "", "admin", "Yes"]], &[], &[]);
    let response = upload_workbook(&address, &client, trainee_token, bytes).await;
    assert_eq!(response.status().as_u16(), 403);
}

#[tokio::test]
async fn export_produces_three_sheet_workbook() {
    let (address, pool) = spawn_app().await;
    let client = reqwest::Client::new();
    let token = admin_token(&address, &client, &pool).await;

    // Seed one quiz with a multiple-choice and a text question
    let bytes = build_workbook(
        &[&["Export Me", "Exported quiz", "admin", "Yes"]],
        &[
            &["Export Me", "MC question", "Multiple Choice", "0", "1"],
            &["Export Me", "Text question", "Text Answer", "1", "2"],
        ],
        &[
            &["Export Me", "MC question", "Right", "Yes"],
            &["Export Me", "MC question", "Wrong", "No"],
        ],
    );
    upload_workbook(&address, &client, &token, bytes).await;

    let response = client
        .get(format!("{}/api/admin/quizzes/export", address))
        .header("Authorization", format!("Bearer {}", token))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert!(
        response
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap()
            .contains("spreadsheetml")
    );

    let body = response.bytes().await.unwrap();
    let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(body.to_vec())).unwrap();

    let quizzes = workbook.worksheet_range("Quizzes").unwrap();
    let quiz_rows: Vec<_> = quizzes.rows().collect();
    assert_eq!(quiz_rows.len(), 2); // header + one quiz
    assert_eq!(quiz_rows[1][0].to_string(), "Export Me");
    assert_eq!(quiz_rows[1][2].to_string(), "admin");
    assert_eq!(quiz_rows[1][3].to_string(), "Yes");

    let questions = workbook.worksheet_range("Questions").unwrap();
    let question_rows: Vec<_> = questions.rows().collect();
    assert_eq!(question_rows.len(), 3);
    assert_eq!(question_rows[1][2].to_string(), "Multiple Choice");
    assert_eq!(question_rows[2][2].to_string(), "Text Answer");

    // Choices sheet only carries multiple-choice rows
    let choices = workbook.worksheet_range("Choices").unwrap();
    let choice_rows: Vec<_> = choices.rows().collect();
    assert_eq!(choice_rows.len(), 3);
    for row in &choice_rows[1..] {
        assert_eq!(row[1].to_string(), "MC question");
    }
}

#[tokio::test]
async fn template_contains_instructions_and_data_sheets() {
    let (address, pool) = spawn_app().await;
    let client = reqwest::Client::new();
    let token = admin_token(&address, &client, &pool).await;

    let response = client
        .get(format!("{}/api/admin/quizzes/template", address))
        .header("Authorization", format!("Bearer {}", token))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let body = response.bytes().await.unwrap();
    let workbook: Xlsx<_> = Xlsx::new(Cursor::new(body.to_vec())).unwrap();

    let names = workbook.sheet_names();
    for expected in ["Instructions", "Quizzes", "Questions", "Choices"] {
        assert!(
            names.iter().any(|n| n == expected),
            "missing sheet {}",
            expected
        );
    }
}
