// Macros file - tracing macros are referenced by full path inside each definition

/// Structured logging macros shared by the HTTP layer, services and storage.
///
/// Field names stay the same everywhere (`operation`, `flashcard_id`,
/// `service`, `component`) so log queries work across layers.

// ============================================================================
// API Operation Logging Macros
// ============================================================================

/// Log the start of an API operation
#[macro_export]
macro_rules! log_api_start {
    ($operation:expr, flashcard_id = $flashcard_id:expr) => {
        tracing::debug!(
            operation = $operation,
            flashcard_id = %$flashcard_id,
            "API operation started"
        );
    };
    ($operation:expr, job_id = $job_id:expr) => {
        tracing::debug!(
            operation = $operation,
            job_id = %$job_id,
            "API operation started"
        );
    };
    ($operation:expr) => {
        tracing::debug!(
            operation = $operation,
            "API operation started"
        );
    };
}

/// Log successful completion of an API operation
#[macro_export]
macro_rules! log_api_success {
    ($operation:expr, flashcard_id = $flashcard_id:expr, $msg:expr) => {
        tracing::info!(
            operation = $operation,
            flashcard_id = %$flashcard_id,
            "API operation completed: {}", $msg
        );
    };
    ($operation:expr, count = $count:expr, $msg:expr) => {
        tracing::info!(
            operation = $operation,
            count = $count,
            "API operation completed: {}", $msg
        );
    };
    ($operation:expr, $msg:expr) => {
        tracing::info!(
            operation = $operation,
            "API operation completed: {}", $msg
        );
    };
}

#[macro_export]
macro_rules! log_api_error {
    ($operation:expr, flashcard_id = $flashcard_id:expr, error = $error:expr, $msg:expr) => {
        tracing::error!(
            operation = $operation,
            flashcard_id = %$flashcard_id,
            error = %$error,
            "API operation failed: {}", $msg
        );
    };
    ($operation:expr, error = $error:expr, $msg:expr) => {
        tracing::error!(
            operation = $operation,
            error = %$error,
            "API operation failed: {}", $msg
        );
    };
}

#[macro_export]
macro_rules! log_api_warn {
    ($operation:expr, flashcard_id = $flashcard_id:expr, $msg:expr) => {
        tracing::warn!(
            operation = $operation,
            flashcard_id = %$flashcard_id,
            "API operation warning: {}", $msg
        );
    };
    ($operation:expr, $msg:expr) => {
        tracing::warn!(
            operation = $operation,
            "API operation warning: {}", $msg
        );
    };
}

// ============================================================================
// Service Layer Logging Macros
// ============================================================================

#[macro_export]
macro_rules! log_service_start {
    ($service:expr, $operation:expr, item_count = $count:expr) => {
        tracing::info!(
            service = $service,
            operation = $operation,
            item_count = $count,
            "Service operation started"
        );
    };
    ($service:expr, $operation:expr, flashcard_id = $flashcard_id:expr) => {
        tracing::info!(
            service = $service,
            operation = $operation,
            flashcard_id = %$flashcard_id,
            "Service operation started"
        );
    };
    ($service:expr, $operation:expr) => {
        tracing::info!(
            service = $service,
            operation = $operation,
            "Service operation started"
        );
    };
}

#[macro_export]
macro_rules! log_service_success {
    ($service:expr, $operation:expr, created = $created:expr, skipped = $skipped:expr, duration_ms = $duration:expr) => {
        tracing::info!(
            service = $service,
            operation = $operation,
            created_count = $created,
            skipped_count = $skipped,
            duration_ms = $duration,
            "Service operation completed successfully"
        );
    };
    ($service:expr, $operation:expr, flashcard_id = $flashcard_id:expr, duration_ms = $duration:expr) => {
        tracing::info!(
            service = $service,
            operation = $operation,
            flashcard_id = %$flashcard_id,
            duration_ms = $duration,
            "Service operation completed successfully"
        );
    };
    ($service:expr, $operation:expr, $msg:expr) => {
        tracing::info!(
            service = $service,
            operation = $operation,
            "Service operation completed: {}", $msg
        );
    };
}

#[macro_export]
macro_rules! log_service_error {
    ($service:expr, $operation:expr, flashcard_id = $flashcard_id:expr, error = $error:expr) => {
        tracing::error!(
            service = $service,
            operation = $operation,
            flashcard_id = %$flashcard_id,
            error = %$error,
            "Service operation failed"
        );
    };
    ($service:expr, $operation:expr, error = $error:expr) => {
        tracing::error!(
            service = $service,
            operation = $operation,
            error = %$error,
            "Service operation failed"
        );
    };
}

#[macro_export]
macro_rules! log_service_warn {
    ($service:expr, $operation:expr, $msg:expr) => {
        tracing::warn!(
            service = $service,
            operation = $operation,
            "Service warning: {}",
            $msg
        );
    };
}

// ============================================================================
// Reconciliation Logging Macros
// ============================================================================

/// One line per skipped candidate, so bulk imports can be audited.
#[macro_export]
macro_rules! log_skip {
    ($operation:expr, key = $key:expr, reason = $reason:expr) => {
        tracing::info!(
            component = "reconciler",
            operation = $operation,
            identity_key = %$key,
            reason = %$reason,
            "Candidate skipped"
        );
    };
}

// ============================================================================
// Database Operation Logging Macros
// ============================================================================

#[macro_export]
macro_rules! log_db_operation {
    (debug, $operation:expr, flashcard_id = $flashcard_id:expr, duration_ms = $duration:expr) => {
        tracing::debug!(
            component = "database",
            operation = $operation,
            flashcard_id = %$flashcard_id,
            duration_ms = $duration,
            "Database operation completed"
        );
    };
    (debug, $operation:expr, count = $count:expr, duration_ms = $duration:expr) => {
        tracing::debug!(
            component = "database",
            operation = $operation,
            result_count = $count,
            duration_ms = $duration,
            "Database operation completed"
        );
    };
    (info, $operation:expr, $msg:expr) => {
        tracing::info!(
            component = "database",
            operation = $operation,
            "Database operation: {}", $msg
        );
    };
    (error, $operation:expr, error = $error:expr) => {
        tracing::error!(
            component = "database",
            operation = $operation,
            error = %$error,
            "Database operation failed"
        );
    };
}

// ============================================================================
// LLM Service Logging Macros
// ============================================================================

#[macro_export]
macro_rules! log_llm_operation {
    (start, $operation:expr, provider = $provider:expr, item_count = $count:expr) => {
        tracing::info!(
            component = "llm_service",
            operation = $operation,
            provider = %$provider,
            item_count = $count,
            "LLM operation started"
        );
    };
    (success, $operation:expr, provider = $provider:expr, duration_ms = $duration:expr, item_count = $count:expr) => {
        tracing::info!(
            component = "llm_service",
            operation = $operation,
            provider = %$provider,
            duration_ms = $duration,
            item_count = $count,
            "LLM operation completed successfully"
        );
    };
    (error, $operation:expr, provider = $provider:expr, error = $error:expr) => {
        tracing::error!(
            component = "llm_service",
            operation = $operation,
            provider = %$provider,
            error = %$error,
            "LLM operation failed"
        );
    };
    (warn, $operation:expr, $msg:expr) => {
        tracing::warn!(
            component = "llm_service",
            operation = $operation,
            "LLM operation warning: {}", $msg
        );
    };
}

// ============================================================================
// System Event Logging Macros
// ============================================================================

#[macro_export]
macro_rules! log_system_event {
    (startup, component = $component:expr, $msg:expr) => {
        tracing::info!(
            event_type = "startup",
            component = $component,
            "System event: {}",
            $msg
        );
    };
    (shutdown, component = $component:expr, $msg:expr) => {
        tracing::info!(
            event_type = "shutdown",
            component = $component,
            "System event: {}",
            $msg
        );
    };
    (config, $msg:expr) => {
        tracing::info!(event_type = "configuration", "System event: {}", $msg);
    };
}

// ============================================================================
// Validation Logging Macros
// ============================================================================

#[macro_export]
macro_rules! log_validation {
    (success, $component:expr, $msg:expr) => {
        tracing::debug!(
            event_type = "validation",
            component = $component,
            result = "success",
            "Validation completed: {}", $msg
        );
    };
    (failure, $component:expr, error = $error:expr) => {
        tracing::warn!(
            event_type = "validation",
            component = $component,
            result = "failure",
            error = %$error,
            "Validation failed"
        );
    };
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use crate::normalizer::IdentityKey;

    #[test]
    fn test_logging_macros_compile() {
        let flashcard_id = Uuid::new_v4();
        let job_id = Uuid::new_v4();
        let error = anyhow::anyhow!("test error");
        let key = IdentityKey::new("hola", "es", "pl");

        log_api_start!("get_flashcard", flashcard_id = flashcard_id);
        log_api_start!("interpret", job_id = job_id);
        log_api_start!("list_flashcards");

        log_api_success!("get_flashcard", flashcard_id = flashcard_id, "flashcard retrieved");
        log_api_success!("bulk_create", count = 5, "flashcards processed");
        log_api_error!("delete_flashcard", error = error, "storage unavailable");
        log_api_warn!("update_flashcard", flashcard_id = flashcard_id, "no fields changed");

        log_service_start!("flashcard_service", "bulk_create", item_count = 3);
        log_service_success!("flashcard_service", "bulk_create", created = 2, skipped = 1, duration_ms = 12);
        log_service_warn!("flashcard_service", "interpret", "AI unavailable");

        log_skip!("bulk_create", key = key, reason = "already stored");

        log_db_operation!(debug, "get_flashcard", flashcard_id = flashcard_id, duration_ms = 3);
        log_db_operation!(info, "migrate", "schema ready");

        log_llm_operation!(start, "enrich", provider = "openai", item_count = 5);
        log_llm_operation!(success, "enrich", provider = "openai", duration_ms = 1500, item_count = 5);

        log_system_event!(startup, component = "server", "server starting");
        log_system_event!(config, "configuration loaded successfully");

        log_validation!(failure, "create_flashcard", error = "source_word is required");
    }
}
