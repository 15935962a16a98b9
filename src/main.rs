use anyhow::Result;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

use bolmate::{
    api::{AppState, create_router},
    config::{Config, LoggingConfig},
    database::Database,
    flashcard_service::FlashcardService,
    llm_service::LLMService,
    log_system_event,
    quiz_service::QuizService,
    response_cache::ResponseCache,
    user_service::UserService,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    let _guard = setup_logging(&config.logging)?;
    config.validate()?;

    log_system_event!(startup, component = "server", "Starting bolmate server");

    let db = Database::new(&config.database.url).await?;
    info!("Database initialized successfully");

    let cache = ResponseCache::new(config.cache.max_entries, config.cache.ttl_minutes);
    let llm_service = LLMService::new(&config.llm, cache);
    info!(provider = llm_service.provider_name(), "Initialized AI service");

    let state = AppState {
        flashcard_service: FlashcardService::new(db.clone(), llm_service.clone(), config.languages.clone()),
        quiz_service: QuizService::new(db.clone(), llm_service.clone(), config.languages.clone()),
        user_service: UserService::new(db),
        llm_service,
    };

    let app = create_router(state).layer(ServiceBuilder::new().layer(CorsLayer::permissive()));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    log_system_event!(shutdown, component = "server", "Server stopped");
    Ok(())
}

fn setup_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::fmt;

    let env_filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));

    let console_layer = config.console_enabled.then(|| {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_ansi(true)
            .boxed()
    });

    let mut guard = None;
    let file_layer = if config.file_enabled {
        std::fs::create_dir_all(&config.log_directory).unwrap_or_else(|e| {
            eprintln!("Warning: Could not create logs directory: {}", e);
        });

        // Daily rotation; no ANSI colors in files
        let file_appender = tracing_appender::rolling::daily(&config.log_directory, "bolmate.log");
        let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);
        guard = Some(file_guard);

        Some(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_ansi(false)
                .with_writer(non_blocking_file)
                .boxed(),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    info!(
        directory = %config.log_directory,
        file_enabled = config.file_enabled,
        "Logging initialized"
    );

    Ok(guard)
}
