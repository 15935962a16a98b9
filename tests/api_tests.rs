use axum::http::StatusCode;
use axum_test::TestServer;
use axum_test::multipart::{MultipartForm, Part};
use bolmate::{
    Database, FlashcardService, LLMService, LanguageDefaults, QuizService, ResponseCache, UserService,
    api::*,
};
use serde_json::{Value, json};

async fn create_test_server() -> TestServer {
    let db = Database::new("sqlite::memory:").await.unwrap();
    let llm_service = LLMService::disabled(ResponseCache::new(100, 60));
    let defaults = LanguageDefaults::default();

    let app_state = AppState {
        flashcard_service: FlashcardService::new(db.clone(), llm_service.clone(), defaults.clone()),
        quiz_service: QuizService::new(db.clone(), llm_service.clone(), defaults),
        user_service: UserService::new(db),
        llm_service,
    };

    TestServer::new(create_router(app_state)).unwrap()
}

async fn create_card(server: &TestServer, word: &str, translation: &str) -> Value {
    let response = server
        .post("/api/flashcards")
        .json(&json!({
            "source_word": word,
            "translated_word": translation,
            "source_language": "es",
            "native_language": "pl"
        }))
        .await;
    response.assert_status(StatusCode::CREATED);
    response.json::<Value>()["data"].clone()
}

#[tokio::test]
async fn test_health_and_languages() {
    let server = create_test_server().await;

    let health = server.get("/api/health").await;
    health.assert_status_ok();
    assert_eq!(health.json::<Value>(), json!({"status": "ok"}));

    let languages = server.get("/api/languages").await;
    languages.assert_status_ok();
    let body: Value = languages.json();
    let codes: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|l| l["code"].as_str().unwrap())
        .collect();
    assert!(codes.contains(&"pl"));
    assert!(codes.contains(&"es"));
}

#[tokio::test]
async fn test_users_endpoints() {
    let server = create_test_server().await;

    let created = server
        .post("/users")
        .json(&json!({"name": "Ana", "email": "ana@example.com"}))
        .await;
    created.assert_status(StatusCode::CREATED);
    assert_eq!(created.json::<Value>()["data"]["email"], "ana@example.com");

    let duplicate = server
        .post("/users")
        .json(&json!({"name": "Other", "email": "ana@example.com"}))
        .await;
    duplicate.assert_status(StatusCode::CONFLICT);
    assert_eq!(duplicate.json::<Value>()["error"], "Email already exists.");

    let missing = server.post("/users").json(&json!({"name": "Solo"})).await;
    missing.assert_status(StatusCode::BAD_REQUEST);

    let list = server.get("/users").await;
    list.assert_status_ok();
    assert_eq!(list.json::<Value>()["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_flashcard_crud() {
    let server = create_test_server().await;
    let card = create_card(&server, "perro", "pies").await;
    let id = card["id"].as_str().unwrap().to_string();
    assert_eq!(card["is_manual"], true);

    let fetched = server.get(&format!("/api/flashcards/{}", id)).await;
    fetched.assert_status_ok();
    assert_eq!(fetched.json::<Value>()["data"]["source_word"], "perro");

    let updated = server
        .put(&format!("/api/flashcards/{}", id))
        .json(&json!({"translated_word": "psisko", "difficulty_level": "A1"}))
        .await;
    updated.assert_status_ok();
    assert_eq!(updated.json::<Value>()["data"]["translated_word"], "psisko");

    let filtered = server.get("/api/flashcards?difficulty_level=a1").await;
    assert_eq!(filtered.json::<Value>()["data"].as_array().unwrap().len(), 1);

    let deleted = server.delete(&format!("/api/flashcards/{}", id)).await;
    deleted.assert_status_ok();

    let gone = server.get(&format!("/api/flashcards/{}", id)).await;
    gone.assert_status(StatusCode::NOT_FOUND);
    let again = server.delete(&format!("/api/flashcards/{}", id)).await;
    again.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_duplicate_flashcard_is_conflict() {
    let server = create_test_server().await;
    create_card(&server, "Hola", "cześć").await;

    let duplicate = server
        .post("/api/flashcards")
        .json(&json!({
            "source_word": "  hola ",
            "translated_word": "witaj",
            "source_language": "ES",
            "native_language": "pl"
        }))
        .await;
    duplicate.assert_status(StatusCode::CONFLICT);
    assert_eq!(
        duplicate.json::<Value>()["error"],
        "Flashcard already exists for this language pair."
    );

    let other_pair = server
        .post("/api/flashcards")
        .json(&json!({
            "source_word": "hola",
            "translated_word": "hello",
            "source_language": "es",
            "native_language": "en"
        }))
        .await;
    other_pair.assert_status(StatusCode::CREATED);
}

#[tokio::test]
async fn test_update_into_existing_identity_is_conflict() {
    let server = create_test_server().await;
    create_card(&server, "gato", "kot").await;
    let perro = create_card(&server, "perro", "pies").await;

    let response = server
        .put(&format!("/api/flashcards/{}", perro["id"].as_str().unwrap()))
        .json(&json!({"source_word": "GATO"}))
        .await;
    response.assert_status(StatusCode::CONFLICT);

    let unchanged = server
        .put(&format!("/api/flashcards/{}", perro["id"].as_str().unwrap()))
        .json(&json!({"source_word": "Perro"}))
        .await;
    unchanged.assert_status_ok();
}

#[tokio::test]
async fn test_invalid_flashcard_is_bad_request() {
    let server = create_test_server().await;

    let response = server
        .post("/api/flashcards")
        .json(&json!({"source_word": "hola", "translated_word": "   "}))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["success"], false);
}

#[tokio::test]
async fn test_bulk_create_reports_skips() {
    let server = create_test_server().await;
    create_card(&server, "hola", "cześć").await;

    let response = server
        .post("/api/flashcards/bulk")
        .json(&json!({
            "flashcards": [
                {"source_word": "hola", "translated_word": "cześć"},
                {"source_word": "adiós", "translated_word": "do widzenia"},
                {"source_word": "Adiós ", "translated_word": "pa"},
                {"source_word": "", "translated_word": "nic"}
            ]
        }))
        .await;
    response.assert_status(StatusCode::CREATED);

    let body: Value = response.json();
    assert_eq!(body["data"]["created_count"], 1);
    assert_eq!(body["data"]["skipped_count"], 3);
    assert_eq!(body["data"]["created"][0]["is_manual"], false);
    assert_eq!(body["data"]["error_details"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_quiz_flow() {
    let server = create_test_server().await;

    let empty = server.get("/api/quiz").await;
    empty.assert_status(StatusCode::NOT_FOUND);

    let card = create_card(&server, "perro", "pies").await;

    let next = server.get("/api/quiz?source_language=es").await;
    next.assert_status_ok();
    assert_eq!(next.json::<Value>()["data"]["id"], card["id"]);

    let answer = server
        .post("/api/quiz")
        .json(&json!({"flashcard_id": card["id"], "answer": " Pies"}))
        .await;
    answer.assert_status_ok();
    let body: Value = answer.json();
    assert_eq!(body["data"]["correct"], true);
    assert_eq!(body["data"]["flashcard"]["correct_count"], 1);

    let unknown = server
        .post("/api/quiz")
        .json(&json!({"flashcard_id": "00000000-0000-0000-0000-000000000000", "answer": "x"}))
        .await;
    unknown.assert_status(StatusCode::NOT_FOUND);

    let quiz = server.post("/api/quiz/generate").json(&json!({"num_questions": 3})).await;
    quiz.assert_status_ok();
    assert_eq!(quiz.json::<Value>()["data"]["questions"].as_array().unwrap().len(), 1);

    let too_many = server.post("/api/quiz/generate").json(&json!({"num_questions": 0})).await;
    too_many.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_interpret_plain_text_falls_back_to_tokens() {
    let server = create_test_server().await;

    let response = server.post("/api/interpret").text("Hola hola, amigo!").await;
    response.assert_status_ok();

    let body: Value = response.json();
    let words: Vec<&str> = body["data"]["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|item| item["source_word"].as_str().unwrap())
        .collect();
    assert_eq!(words, vec!["amigo", "hola"]);
    assert!(body["data"]["job_id"].is_string());

    let blank = server.post("/api/interpret").json(&json!({"text": "   "})).await;
    blank.assert_status(StatusCode::BAD_REQUEST);

    let bad_image = server
        .post("/api/interpret")
        .json(&json!({"image_base64": "not base64!!"}))
        .await;
    bad_image.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_interpret_file_upload() {
    let server = create_test_server().await;

    let form = MultipartForm::new().add_text("native_language", "en").add_part(
        "file",
        Part::bytes("Hola amigo".as_bytes())
            .file_name("notes.txt")
            .mime_type("text/plain"),
    );
    let response = server.post("/api/interpret").multipart(form).await;
    response.assert_status_ok();

    let body: Value = response.json();
    let items = body["data"]["items"].as_array().unwrap();
    let words: Vec<&str> = items
        .iter()
        .map(|item| item["source_word"].as_str().unwrap())
        .collect();
    assert_eq!(words, vec!["amigo", "hola"]);
    assert_eq!(items[0]["native_language"], "en");
    assert_eq!(body["data"]["original_filename"], "notes.txt");

    let unsupported = MultipartForm::new().add_part(
        "file",
        Part::bytes(vec![0u8, 1, 2, 3])
            .file_name("notes.docx")
            .mime_type("application/vnd.openxmlformats-officedocument.wordprocessingml.document"),
    );
    let rejected = server.post("/api/interpret").multipart(unsupported).await;
    rejected.assert_status(StatusCode::BAD_REQUEST);

    let no_file = MultipartForm::new().add_text("native_language", "en");
    let missing = server.post("/api/interpret").multipart(no_file).await;
    missing.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_interpret_save_skips_existing() {
    let server = create_test_server().await;
    create_card(&server, "amigo", "przyjaciel").await;

    let response = server
        .post("/api/interpret/save")
        .json(&json!({
            "flashcards": [
                {"source_word": "amigo", "translated_word": "kolega"},
                {"source_word": "casa", "translated_word": "dom"},
                {"source_word": "CASA", "translated_word": "dom"}
            ]
        }))
        .await;
    response.assert_status(StatusCode::CREATED);

    let body: Value = response.json();
    assert_eq!(body["data"]["created_count"], 1);
    assert_eq!(body["data"]["skipped_count"], 1);
}

#[tokio::test]
async fn test_language_switch_endpoint() {
    let server = create_test_server().await;

    let empty = server
        .post("/api/languages/switch")
        .json(&json!({"target_language": "en"}))
        .await;
    empty.assert_status_ok();
    assert_eq!(empty.json::<Value>()["data"]["translated_count"], 0);

    create_card(&server, "perro", "pies").await;

    let blank = server
        .post("/api/languages/switch")
        .json(&json!({"target_language": "  "}))
        .await;
    blank.assert_status(StatusCode::BAD_REQUEST);

    let switched = server
        .post("/api/languages/switch")
        .json(&json!({"target_language": "en"}))
        .await;
    switched.assert_status_ok();
    let body: Value = switched.json();
    assert_eq!(body["data"]["translated_count"], 1);
    assert_eq!(body["data"]["translation_fallback"], true);
    assert_eq!(body["data"]["affected"][0]["native_language"], "en");

    let list = server.get("/api/flashcards?native_language=en").await;
    assert_eq!(list.json::<Value>()["data"].as_array().unwrap().len(), 1);
}
