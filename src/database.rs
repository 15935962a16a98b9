use anyhow::{Result, anyhow};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool, Transaction};
use std::collections::HashSet;
use std::str::FromStr;
use uuid::Uuid;

use crate::log_db_operation;
use crate::models::*;
use crate::normalizer::{IDENTITY_KEY_VERSION, IdentityKey, key_of, key_of_card, normalize};

const FLASHCARD_COLUMNS: &str = "id, user_id, source_word, source_language, translated_word, native_language, \
     example_sentence, example_sentence_translated, difficulty_level, is_manual, \
     correct_count, incorrect_count, created_at";

/// Stays well below SQLite's bound-parameter limit.
const MAX_IDS_PER_QUERY: usize = 500;

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);

        // Every connection to `:memory:` opens a fresh database, so keep exactly one alive.
        let pool_options = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new()
        };

        let pool = pool_options.connect_with(options).await?;
        let db = Database { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Write transaction. `BEGIN IMMEDIATE` takes the write lock up front so a
    /// concurrent writer waits on the busy timeout instead of failing with
    /// `database is locked` when it upgrades from a read.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin_with("BEGIN IMMEDIATE").await?)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                email TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS flashcards (
                id TEXT PRIMARY KEY,
                user_id TEXT REFERENCES users(id) ON DELETE SET NULL,
                source_word TEXT NOT NULL,
                source_language TEXT NOT NULL,
                translated_word TEXT NOT NULL,
                native_language TEXT NOT NULL,
                example_sentence TEXT,
                example_sentence_translated TEXT,
                difficulty_level TEXT,
                is_manual INTEGER NOT NULL DEFAULT 1,
                correct_count INTEGER NOT NULL DEFAULT 0,
                incorrect_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                word_key TEXT NOT NULL,
                source_language_key TEXT NOT NULL,
                native_language_key TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS uq_flashcard_identity
            ON flashcards (word_key, source_language_key, native_language_key);
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS interpret_jobs (
                id TEXT PRIMARY KEY,
                original_filename TEXT,
                content_type TEXT,
                status TEXT NOT NULL,
                result_summary TEXT,
                created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_meta (
                name TEXT PRIMARY KEY,
                value INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        self.ensure_identity_key_version().await?;
        log_db_operation!(info, "migrate", "schema ready");
        Ok(())
    }

    async fn ensure_identity_key_version(&self) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO schema_meta (name, value) VALUES ('identity_key_version', ?1)")
            .bind(IDENTITY_KEY_VERSION)
            .execute(&self.pool)
            .await?;

        let stored: i64 = sqlx::query_scalar("SELECT value FROM schema_meta WHERE name = 'identity_key_version'")
            .fetch_one(&self.pool)
            .await?;

        if stored != IDENTITY_KEY_VERSION {
            return Err(anyhow!(
                "Database was written with identity key version {} but this build uses version {}",
                stored,
                IDENTITY_KEY_VERSION
            ));
        }
        Ok(())
    }

    // User operations
    pub async fn create_user(&self, name: &str, email: &str) -> Result<User> {
        let user = User {
            id: Uuid::new_v4(),
            name: name.to_string(),
            email: email.to_string(),
            created_at: Utc::now(),
        };

        sqlx::query("INSERT INTO users (id, name, email, created_at) VALUES (?1, ?2, ?3, ?4)")
            .bind(user.id.to_string())
            .bind(&user.name)
            .bind(&user.email)
            .bind(timestamp(&user.created_at))
            .execute(&self.pool)
            .await?;

        Ok(user)
    }

    pub async fn get_all_users(&self) -> Result<Vec<User>> {
        let rows = sqlx::query("SELECT * FROM users ORDER BY created_at ASC, rowid ASC")
            .fetch_all(&self.pool)
            .await?;

        let mut users = Vec::with_capacity(rows.len());
        for row in rows {
            users.push(User {
                id: Uuid::parse_str(&row.get::<String, _>("id"))?,
                name: row.get("name"),
                email: row.get("email"),
                created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
            });
        }
        Ok(users)
    }

    // Flashcard operations
    pub async fn create_flashcard(
        &self,
        item: &VocabularyItem,
        is_manual: bool,
        user_id: Option<Uuid>,
    ) -> Result<Flashcard> {
        let mut conn = self.pool.acquire().await?;
        Self::insert_flashcard(&mut conn, item, is_manual, user_id).await
    }

    /// Insert on an existing connection or transaction. Fails with a sqlx
    /// unique violation when the identity key is already taken.
    pub async fn insert_flashcard(
        conn: &mut SqliteConnection,
        item: &VocabularyItem,
        is_manual: bool,
        user_id: Option<Uuid>,
    ) -> Result<Flashcard> {
        let key = key_of(item);
        let card = Flashcard {
            id: Uuid::new_v4(),
            user_id,
            source_word: item.source_word.clone(),
            source_language: item.source_language.clone(),
            translated_word: item.translated_word.clone(),
            native_language: item.native_language.clone(),
            example_sentence: item.example_sentence.clone(),
            example_sentence_translated: item.example_sentence_translated.clone(),
            difficulty_level: item.difficulty_level.clone(),
            is_manual,
            correct_count: 0,
            incorrect_count: 0,
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO flashcards (id, user_id, source_word, source_language, translated_word,
                                    native_language, example_sentence, example_sentence_translated,
                                    difficulty_level, is_manual, correct_count, incorrect_count,
                                    created_at, word_key, source_language_key, native_language_key)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            "#,
        )
        .bind(card.id.to_string())
        .bind(card.user_id.map(|id| id.to_string()))
        .bind(&card.source_word)
        .bind(&card.source_language)
        .bind(&card.translated_word)
        .bind(&card.native_language)
        .bind(&card.example_sentence)
        .bind(&card.example_sentence_translated)
        .bind(&card.difficulty_level)
        .bind(card.is_manual)
        .bind(card.correct_count)
        .bind(card.incorrect_count)
        .bind(timestamp(&card.created_at))
        .bind(&key.word)
        .bind(&key.source_language)
        .bind(&key.native_language)
        .execute(&mut *conn)
        .await?;

        Ok(card)
    }

    pub async fn get_flashcard(&self, id: Uuid) -> Result<Option<Flashcard>> {
        let mut conn = self.pool.acquire().await?;
        Self::get_flashcard_on(&mut conn, id).await
    }

    pub async fn get_flashcard_on(conn: &mut SqliteConnection, id: Uuid) -> Result<Option<Flashcard>> {
        let row = sqlx::query(&format!("SELECT {} FROM flashcards WHERE id = ?1", FLASHCARD_COLUMNS))
            .bind(id.to_string())
            .fetch_optional(&mut *conn)
            .await?;

        row.as_ref().map(row_to_flashcard).transpose()
    }

    /// Cards for the given ids in storage order; unknown ids are left out.
    pub async fn get_flashcards_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Flashcard>> {
        let mut unique: Vec<Uuid> = ids.to_vec();
        unique.sort();
        unique.dedup();

        let mut cards = Vec::with_capacity(unique.len());
        for chunk in unique.chunks(MAX_IDS_PER_QUERY) {
            let mut builder: QueryBuilder<Sqlite> =
                QueryBuilder::new(format!("SELECT {} FROM flashcards WHERE id IN (", FLASHCARD_COLUMNS));
            let mut separated = builder.separated(", ");
            for id in chunk {
                separated.push_bind(id.to_string());
            }
            separated.push_unseparated(")");

            let rows = builder.build().fetch_all(&self.pool).await?;
            cards.extend(rows_to_flashcards(rows)?);
        }

        // Storage order across chunks
        cards.sort_by_key(|card| card.created_at);
        Ok(cards)
    }

    pub async fn get_all_flashcards(&self) -> Result<Vec<Flashcard>> {
        self.list_flashcards(&FlashcardFilter::default()).await
    }

    pub async fn list_flashcards(&self, filter: &FlashcardFilter) -> Result<Vec<Flashcard>> {
        let started = std::time::Instant::now();
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {} FROM flashcards WHERE 1 = 1", FLASHCARD_COLUMNS));
        push_filter(&mut builder, filter.source_language.as_deref(), filter.native_language.as_deref());
        if let Some(level) = filter.difficulty_level.as_deref().filter(|v| !v.trim().is_empty()) {
            builder.push(" AND lower(difficulty_level) = ").push_bind(normalize(level));
        }
        if let Some(user_id) = filter.user_id {
            builder.push(" AND user_id = ").push_bind(user_id.to_string());
        }
        builder.push(" ORDER BY created_at DESC, rowid DESC");

        let rows = builder.build().fetch_all(&self.pool).await?;
        let cards = rows_to_flashcards(rows)?;
        log_db_operation!(
            debug,
            "list_flashcards",
            count = cards.len(),
            duration_ms = started.elapsed().as_millis() as u64
        );
        Ok(cards)
    }

    /// Random sample of cards, optionally restricted to one source language.
    pub async fn random_flashcards(&self, source_language: Option<&str>, limit: usize) -> Result<Vec<Flashcard>> {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {} FROM flashcards WHERE 1 = 1", FLASHCARD_COLUMNS));
        push_filter(&mut builder, source_language, None);
        builder.push(" ORDER BY RANDOM() LIMIT ").push_bind(limit as i64);

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows_to_flashcards(rows)
    }

    pub async fn update_flashcard(&self, card: &Flashcard) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        Self::update_flashcard_on(&mut conn, card).await
    }

    /// Writes every mutable column and recomputes the identity key columns.
    pub async fn update_flashcard_on(conn: &mut SqliteConnection, card: &Flashcard) -> Result<()> {
        let key = key_of_card(card);
        sqlx::query(
            r#"
            UPDATE flashcards
            SET source_word = ?1, source_language = ?2, translated_word = ?3, native_language = ?4,
                example_sentence = ?5, example_sentence_translated = ?6, difficulty_level = ?7,
                is_manual = ?8, word_key = ?9, source_language_key = ?10, native_language_key = ?11
            WHERE id = ?12
            "#,
        )
        .bind(&card.source_word)
        .bind(&card.source_language)
        .bind(&card.translated_word)
        .bind(&card.native_language)
        .bind(&card.example_sentence)
        .bind(&card.example_sentence_translated)
        .bind(&card.difficulty_level)
        .bind(card.is_manual)
        .bind(&key.word)
        .bind(&key.source_language)
        .bind(&key.native_language)
        .bind(card.id.to_string())
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    pub async fn delete_flashcard(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM flashcards WHERE id = ?1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Stored card occupying `key`, ignoring the card with id `exclude_id`.
    pub async fn find_by_key(
        conn: &mut SqliteConnection,
        key: &IdentityKey,
        exclude_id: Option<Uuid>,
    ) -> Result<Option<Flashcard>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM flashcards \
             WHERE word_key = ?1 AND source_language_key = ?2 AND native_language_key = ?3 \
             AND (?4 IS NULL OR id != ?4) LIMIT 1",
            FLASHCARD_COLUMNS
        ))
        .bind(&key.word)
        .bind(&key.source_language)
        .bind(&key.native_language)
        .bind(exclude_id.map(|id| id.to_string()))
        .fetch_optional(&mut *conn)
        .await?;

        row.as_ref().map(row_to_flashcard).transpose()
    }

    pub async fn existing_keys(&self) -> Result<HashSet<IdentityKey>> {
        let rows = sqlx::query("SELECT word_key, source_language_key, native_language_key FROM flashcards")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| IdentityKey {
                word: row.get("word_key"),
                source_language: row.get("source_language_key"),
                native_language: row.get("native_language_key"),
            })
            .collect())
    }

    /// Bumps one of the answer counters and returns the updated card.
    pub async fn record_quiz_answer(&self, id: Uuid, correct: bool) -> Result<Option<Flashcard>> {
        let statement = if correct {
            "UPDATE flashcards SET correct_count = correct_count + 1 WHERE id = ?1"
        } else {
            "UPDATE flashcards SET incorrect_count = incorrect_count + 1 WHERE id = ?1"
        };

        let result = sqlx::query(statement)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_flashcard(id).await
    }

    // Interpret job operations
    pub async fn create_interpret_job(
        &self,
        original_filename: Option<&str>,
        content_type: Option<&str>,
        result_summary: Option<String>,
    ) -> Result<InterpretJob> {
        let job = InterpretJob {
            id: Uuid::new_v4(),
            original_filename: original_filename.map(str::to_string),
            content_type: content_type.map(str::to_string),
            status: "processed".to_string(),
            result_summary,
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO interpret_jobs (id, original_filename, content_type, status, result_summary, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(job.id.to_string())
        .bind(&job.original_filename)
        .bind(&job.content_type)
        .bind(&job.status)
        .bind(&job.result_summary)
        .bind(timestamp(&job.created_at))
        .execute(&self.pool)
        .await?;

        Ok(job)
    }
}

fn push_filter(builder: &mut QueryBuilder<Sqlite>, source_language: Option<&str>, native_language: Option<&str>) {
    if let Some(source) = source_language.filter(|v| !v.trim().is_empty()) {
        builder.push(" AND source_language_key = ").push_bind(normalize(source));
    }
    if let Some(native) = native_language.filter(|v| !v.trim().is_empty()) {
        builder.push(" AND native_language_key = ").push_bind(normalize(native));
    }
}

fn rows_to_flashcards(rows: Vec<SqliteRow>) -> Result<Vec<Flashcard>> {
    rows.iter().map(row_to_flashcard).collect()
}

fn row_to_flashcard(row: &SqliteRow) -> Result<Flashcard> {
    Ok(Flashcard {
        id: Uuid::parse_str(&row.get::<String, _>("id"))?,
        user_id: row
            .get::<Option<String>, _>("user_id")
            .map(|id| Uuid::parse_str(&id))
            .transpose()?,
        source_word: row.get("source_word"),
        source_language: row.get("source_language"),
        translated_word: row.get("translated_word"),
        native_language: row.get("native_language"),
        example_sentence: row.get("example_sentence"),
        example_sentence_translated: row.get("example_sentence_translated"),
        difficulty_level: row.get("difficulty_level"),
        is_manual: row.get("is_manual"),
        correct_count: row.get("correct_count"),
        incorrect_count: row.get("incorrect_count"),
        created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
    })
}

fn timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

/// True when any error in the chain is a storage uniqueness violation.
pub fn is_unique_violation(error: &anyhow::Error) -> bool {
    error.chain().any(|cause| {
        cause
            .downcast_ref::<sqlx::Error>()
            .and_then(|e| e.as_database_error())
            .is_some_and(|db_error| db_error.is_unique_violation())
    })
}
