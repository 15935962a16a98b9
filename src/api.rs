use axum::{
    Router,
    body::Bytes,
    extract::{DefaultBodyLimit, FromRequest, Multipart, Path, Query, Request, State, multipart::MultipartError},
    http::{StatusCode, header::CONTENT_TYPE},
    response::Json,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    errors::{ApiError, ErrorContext, classify_database_error},
    flashcard_service::FlashcardService,
    llm_service::LLMService,
    models::*,
    quiz_service::QuizService,
    user_service::UserService,
};

use crate::{log_api_error, log_api_start, log_api_success, log_api_warn};

#[derive(Clone)]
pub struct AppState {
    pub flashcard_service: FlashcardService,
    pub quiz_service: QuizService,
    pub user_service: UserService,
    pub llm_service: LLMService,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

type ErrorResponse = (StatusCode, Json<ApiResponse<()>>);

#[derive(Debug, Deserialize)]
pub struct InterpretQuery {
    pub native_language: Option<String>,
}

fn created<T>(data: T) -> (StatusCode, Json<ApiResponse<T>>) {
    (StatusCode::CREATED, Json(ApiResponse::success(data)))
}

// Users
pub async fn list_users(State(state): State<AppState>) -> Result<Json<ApiResponse<Vec<User>>>, ErrorResponse> {
    match state.user_service.list_users().await {
        Ok(users) => Ok(Json(ApiResponse::success(users))),
        Err(e) => Err(ApiError::DatabaseError(e).to_response_with_context(ErrorContext::new("list_users", "user"))),
    }
}

pub async fn create_user(
    State(state): State<AppState>,
    Json(request): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<ApiResponse<User>>), ErrorResponse> {
    log_api_start!("create_user");
    match state.user_service.create_user(request).await {
        Ok(user) => {
            log_api_success!("create_user", "user created");
            Ok(created(user))
        }
        Err(e) => Err(e.to_response_with_context(ErrorContext::new("create_user", "user"))),
    }
}

// Flashcards
pub async fn list_flashcards(
    State(state): State<AppState>,
    Query(filter): Query<FlashcardFilter>,
) -> Result<Json<ApiResponse<Vec<Flashcard>>>, ErrorResponse> {
    debug!(filter = ?filter, "Listing flashcards");
    match state.flashcard_service.list_flashcards(&filter).await {
        Ok(cards) => {
            debug!(count = cards.len(), "Flashcards listed");
            Ok(Json(ApiResponse::success(cards)))
        }
        Err(e) => {
            Err(ApiError::DatabaseError(e).to_response_with_context(ErrorContext::new("list_flashcards", "flashcard")))
        }
    }
}

pub async fn create_flashcard(
    State(state): State<AppState>,
    Json(request): Json<CreateFlashcardRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Flashcard>>), ErrorResponse> {
    info!(source_word = %request.source_word, "Creating flashcard");

    match state.flashcard_service.create_flashcard(request).await {
        Ok(card) => {
            log_api_success!("create_flashcard", flashcard_id = card.id, "flashcard created");
            Ok(created(card))
        }
        Err(e) => Err(e.to_response_with_context(ErrorContext::new("create_flashcard", "flashcard"))),
    }
}

pub async fn get_flashcard(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Flashcard>>, ErrorResponse> {
    log_api_start!("get_flashcard", flashcard_id = id);

    match state.flashcard_service.get_flashcard(id).await {
        Ok(Some(card)) => Ok(Json(ApiResponse::success(card))),
        Ok(None) => {
            log_api_warn!("get_flashcard", flashcard_id = id, "flashcard not found");
            Err(crate::api_error!(not_found, "get_flashcard", "Flashcard", id))
        }
        Err(e) => {
            log_api_error!("get_flashcard", flashcard_id = id, error = e, "database error retrieving flashcard");
            let context = ErrorContext::new("get_flashcard", "flashcard").with_id(&id.to_string());
            Err(ApiError::DatabaseError(e).to_response_with_context(context))
        }
    }
}

pub async fn update_flashcard(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateFlashcardRequest>,
) -> Result<Json<ApiResponse<Flashcard>>, ErrorResponse> {
    log_api_start!("update_flashcard", flashcard_id = id);

    match state.flashcard_service.update_flashcard(id, request).await {
        Ok(Some(card)) => {
            log_api_success!("update_flashcard", flashcard_id = id, "flashcard updated");
            Ok(Json(ApiResponse::success(card)))
        }
        Ok(None) => Err(crate::api_error!(not_found, "update_flashcard", "Flashcard", id)),
        Err(e) => {
            let context = ErrorContext::new("update_flashcard", "flashcard").with_id(&id.to_string());
            Err(e.to_response_with_context(context))
        }
    }
}

pub async fn delete_flashcard(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<bool>>, ErrorResponse> {
    info!(flashcard_id = %id, "Deleting flashcard");

    match state.flashcard_service.delete_flashcard(id).await {
        Ok(true) => Ok(Json(ApiResponse::success(true))),
        Ok(false) => Err(crate::api_error!(not_found, "delete_flashcard", "Flashcard", id)),
        Err(e) => {
            let context = ErrorContext::new("delete_flashcard", "flashcard").with_id(&id.to_string());
            Err(ApiError::DatabaseError(e).to_response_with_context(context))
        }
    }
}

pub async fn bulk_create_flashcards(
    State(state): State<AppState>,
    Json(request): Json<BulkCreateFlashcardsRequest>,
) -> Result<(StatusCode, Json<ApiResponse<ReconciliationResult>>), ErrorResponse> {
    log_api_start!("bulk_create_flashcards");

    match state.flashcard_service.bulk_create(request.flashcards).await {
        Ok(result) => {
            log_api_success!("bulk_create_flashcards", count = result.created_count, "bulk create finished");
            Ok(created(result))
        }
        Err(e) => {
            log_api_error!("bulk_create_flashcards", error = e, "bulk create aborted");
            Err(classify_database_error(&e)
                .to_response_with_context(ErrorContext::new("bulk_create_flashcards", "flashcard")))
        }
    }
}

pub async fn enrich_candidates(
    State(state): State<AppState>,
    Json(request): Json<EnrichCandidatesRequest>,
) -> Json<ApiResponse<Vec<VocabularyItem>>> {
    let items = state
        .flashcard_service
        .enrich_candidates(request.candidates, request.native_language.as_deref())
        .await;
    Json(ApiResponse::success(items))
}

pub async fn enrich_flashcards(
    State(state): State<AppState>,
    Json(request): Json<EnrichFlashcardsRequest>,
) -> Result<Json<ApiResponse<Vec<Flashcard>>>, ErrorResponse> {
    match state
        .flashcard_service
        .enrich_stored(&request.ids, request.native_language.as_deref())
        .await
    {
        Ok(cards) => Ok(Json(ApiResponse::success(cards))),
        Err(e) => Err(crate::api_error!(database, "enrich_flashcards", "flashcard", e)),
    }
}

// Quiz
pub async fn next_quiz_flashcard(
    State(state): State<AppState>,
    Query(query): Query<QuizQuery>,
) -> Result<Json<ApiResponse<Flashcard>>, ErrorResponse> {
    match state.quiz_service.next_flashcard(query.source_language.as_deref()).await {
        Ok(Some(card)) => Ok(Json(ApiResponse::success(card))),
        Ok(None) => Err(ApiError::NotFound("No flashcards available".to_string()).to_response_with_context(
            ErrorContext::new("next_quiz_flashcard", "flashcard").with_user_message("No flashcards available"),
        )),
        Err(e) => Err(ApiError::DatabaseError(e)
            .to_response_with_context(ErrorContext::new("next_quiz_flashcard", "flashcard"))),
    }
}

pub async fn submit_quiz_answer(
    State(state): State<AppState>,
    Json(request): Json<QuizAnswerRequest>,
) -> Result<Json<ApiResponse<QuizAnswerResponse>>, ErrorResponse> {
    let flashcard_id = request.flashcard_id;
    match state.quiz_service.submit_answer(request).await {
        Ok(Some(response)) => {
            debug!(flashcard_id = ?flashcard_id, correct = response.correct, "Quiz answer graded");
            Ok(Json(ApiResponse::success(response)))
        }
        Ok(None) => Err(ApiError::NotFound("Flashcard not found".to_string())
            .to_response_with_context(ErrorContext::new("submit_quiz_answer", "Flashcard"))),
        Err(e) => Err(e.to_response_with_context(ErrorContext::new("submit_quiz_answer", "flashcard"))),
    }
}

pub async fn generate_quiz(
    State(state): State<AppState>,
    Json(request): Json<GenerateQuizRequest>,
) -> Result<Json<ApiResponse<GeneratedQuiz>>, ErrorResponse> {
    match state.quiz_service.generate_quiz(request).await {
        Ok(Some(quiz)) => {
            log_api_success!("generate_quiz", count = quiz.questions.len(), "quiz generated");
            Ok(Json(ApiResponse::success(quiz)))
        }
        Ok(None) => Err(ApiError::NotFound("No flashcards available".to_string()).to_response_with_context(
            ErrorContext::new("generate_quiz", "flashcard").with_user_message("No flashcards available"),
        )),
        Err(e) => Err(e.to_response_with_context(ErrorContext::new("generate_quiz", "quiz"))),
    }
}

// Interpret
/// Uploads larger than axum's 2 MB default are common for photos and scans.
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Accepts a multipart file upload, a JSON body (`text` or `image_base64`) or
/// raw text of any other content type.
pub async fn interpret(
    State(state): State<AppState>,
    Query(query): Query<InterpretQuery>,
    request: Request,
) -> Result<Json<ApiResponse<InterpretResponse>>, ErrorResponse> {
    let content_type = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let reject = |message: String| {
        ApiError::BadRequest(message).to_response_with_context(ErrorContext::new("interpret", "interpret_job"))
    };

    let outcome = if content_type.as_deref().is_some_and(|ct| ct.starts_with("multipart/form-data")) {
        let multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|e| reject(format!("Invalid multipart body: {}", e)))?;
        let (upload, form_native) = read_upload(multipart)
            .await
            .map_err(|e| reject(format!("Invalid multipart body: {}", e)))?;
        let native_language = form_native.or(query.native_language);

        match upload {
            Some(upload) => {
                info!(filename = ?upload.filename, bytes = upload.data.len(), "Interpreting uploaded file");
                state
                    .flashcard_service
                    .interpret_upload(upload, native_language.as_deref())
                    .await
            }
            None => Err(ApiError::ValidationError("No file provided".to_string())),
        }
    } else {
        let body = Bytes::from_request(request, &state)
            .await
            .map_err(|e| reject(format!("Invalid request body: {}", e)))?;

        let interpret_request = if content_type.as_deref().is_some_and(|ct| ct.starts_with("application/json")) {
            let mut parsed: InterpretRequest =
                serde_json::from_slice(&body).map_err(|e| reject(format!("Invalid JSON body: {}", e)))?;
            if parsed.native_language.is_none() {
                parsed.native_language = query.native_language;
            }
            parsed
        } else {
            InterpretRequest {
                text: Some(String::from_utf8_lossy(&body).into_owned()),
                native_language: query.native_language,
                ..Default::default()
            }
        };

        state
            .flashcard_service
            .interpret(interpret_request, content_type.as_deref())
            .await
    };

    match outcome {
        Ok(response) => {
            debug!(job_id = ?response.job_id, "Interpret job recorded");
            log_api_success!("interpret", count = response.items.len(), "text interpreted");
            Ok(Json(ApiResponse::success(response)))
        }
        Err(e) => Err(e.to_response_with_context(ErrorContext::new("interpret", "interpret_job"))),
    }
}

/// First file part (or a plain `text` field) plus an optional `native_language` field.
async fn read_upload(mut multipart: Multipart) -> Result<(Option<InterpretUpload>, Option<String>), MultipartError> {
    let mut upload: Option<InterpretUpload> = None;
    let mut native_language = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        let has_file = upload.as_ref().is_some_and(|u| u.filename.is_some());

        if field.file_name().is_some() {
            if has_file {
                continue;
            }
            let filename = field.file_name().map(str::to_string);
            let content_type = field.content_type().map(str::to_string);
            let data = field.bytes().await?.to_vec();
            upload = Some(InterpretUpload {
                filename,
                content_type,
                data,
            });
        } else if name.as_deref() == Some("native_language") {
            native_language = Some(field.text().await?.trim().to_string()).filter(|v| !v.is_empty());
        } else if name.as_deref() == Some("text") && upload.is_none() {
            upload = Some(InterpretUpload {
                filename: None,
                content_type: Some("text/plain".to_string()),
                data: field.bytes().await?.to_vec(),
            });
        }
    }

    Ok((upload, native_language))
}

pub async fn save_interpreted(
    State(state): State<AppState>,
    Json(request): Json<SaveInterpretedRequest>,
) -> Result<(StatusCode, Json<ApiResponse<ReconciliationResult>>), ErrorResponse> {
    match state.flashcard_service.save_interpreted(request.flashcards).await {
        Ok(result) => {
            log_api_success!("save_interpreted", count = result.created_count, "interpreted flashcards saved");
            Ok(created(result))
        }
        Err(e) => Err(crate::api_error!(database, "save_interpreted", "flashcard", e)),
    }
}

// Languages
pub async fn list_languages() -> Json<ApiResponse<Vec<Language>>> {
    Json(ApiResponse::success(supported_languages()))
}

pub async fn switch_language(
    State(state): State<AppState>,
    Json(request): Json<SwitchLanguageRequest>,
) -> Result<Json<ApiResponse<SwitchResult>>, ErrorResponse> {
    info!(
        target_language = %request.target_language,
        force = request.force,
        selected = ?request.flashcard_ids.as_ref().map(Vec::len),
        "Switching flashcard language"
    );

    match state.flashcard_service.switch_language(request).await {
        Ok(result) => {
            log_api_success!("switch_language", count = result.translated_count, "language switched");
            Ok(Json(ApiResponse::success(result)))
        }
        Err(e) => Err(ApiError::from(e).to_response_with_context(ErrorContext::new("switch_language", "flashcard"))),
    }
}

// Health
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    debug!(ai_provider = state.llm_service.provider_name(), "Health check");
    Json(json!({"status": "ok"}))
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/users", get(list_users).post(create_user))
        // Flashcards
        .route("/api/flashcards", get(list_flashcards).post(create_flashcard))
        .route("/api/flashcards/bulk", post(bulk_create_flashcards))
        .route("/api/flashcards/bulk/enrich", post(enrich_candidates))
        .route("/api/flashcards/enrich", post(enrich_flashcards))
        .route(
            "/api/flashcards/:id",
            get(get_flashcard).put(update_flashcard).delete(delete_flashcard),
        )
        // Quiz
        .route("/api/quiz", get(next_quiz_flashcard).post(submit_quiz_answer))
        .route("/api/quiz/generate", post(generate_quiz))
        // Interpret
        .route(
            "/api/interpret",
            post(interpret).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/api/interpret/save", post(save_interpreted))
        // Languages
        .route("/api/languages", get(list_languages))
        .route("/api/languages/switch", post(switch_language))
        .route("/api/health", get(health))
        .with_state(state)
}
