use anyhow::Result;
use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::database::Database;
use crate::models::Flashcard;
use crate::normalizer::IdentityKey;

/// Returns the stored card that already occupies `key`, if any.
///
/// `exclude_id` names the card being edited so it never conflicts with its
/// own current row. Run this on the same transaction as the write that
/// follows; the unique index stays the final arbiter under concurrency.
pub async fn find_conflict(
    conn: &mut SqliteConnection,
    key: &IdentityKey,
    exclude_id: Option<Uuid>,
) -> Result<Option<Flashcard>> {
    Database::find_by_key(conn, key, exclude_id).await
}

pub async fn would_conflict(
    conn: &mut SqliteConnection,
    key: &IdentityKey,
    exclude_id: Option<Uuid>,
) -> Result<bool> {
    Ok(find_conflict(conn, key, exclude_id).await?.is_some())
}
