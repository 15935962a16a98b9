use anyhow::Result;
use std::collections::HashSet;
use std::time::Instant;

use crate::conflict::find_conflict;
use crate::database::{Database, is_unique_violation};
use crate::models::{ReconciliationResult, VocabularyItem};
use crate::normalizer::{IdentityKey, key_of};
use crate::{log_service_start, log_service_success, log_skip};

/// Inserts each candidate that is not already stored and reports the rest.
///
/// Candidates are processed in input order and each insert commits on its
/// own transaction. `existing_keys` holds the keys known before the call and
/// is extended with every key created here. Only a storage failure other
/// than a uniqueness violation aborts the batch; cards committed before that
/// point stay committed.
pub async fn reconcile(
    db: &Database,
    candidates: Vec<VocabularyItem>,
    existing_keys: &mut HashSet<IdentityKey>,
) -> Result<ReconciliationResult> {
    let started = Instant::now();
    log_service_start!("reconciler", "reconcile", item_count = candidates.len());

    let mut result = ReconciliationResult::default();

    for candidate in candidates {
        let candidate = candidate.trimmed();
        let key = key_of(&candidate);

        if let Err(reason) = candidate.validate() {
            skip(&mut result, &key, format!("Invalid flashcard: {}", reason));
            continue;
        }

        if existing_keys.contains(&key) {
            skip(&mut result, &key, format!("Duplicate skipped: {}", key));
            continue;
        }

        let mut tx = db.begin().await?;
        if find_conflict(&mut tx, &key, None).await?.is_some() {
            tx.rollback().await?;
            existing_keys.insert(key.clone());
            skip(&mut result, &key, format!("Duplicate skipped: {}", key));
            continue;
        }

        match Database::insert_flashcard(&mut tx, &candidate, false, None).await {
            Ok(card) => {
                tx.commit().await?;
                existing_keys.insert(key);
                result.created.push(card);
            }
            Err(e) if is_unique_violation(&e) => {
                // Another request stored the same key between the check and the insert.
                tx.rollback().await?;
                existing_keys.insert(key.clone());
                skip(&mut result, &key, format!("Duplicate skipped (concurrent insert): {}", key));
            }
            Err(e) => return Err(e),
        }
    }

    result.created_count = result.created.len();
    log_service_success!(
        "reconciler",
        "reconcile",
        created = result.created_count,
        skipped = result.skipped_count,
        duration_ms = started.elapsed().as_millis() as u64
    );
    Ok(result)
}

fn skip(result: &mut ReconciliationResult, key: &IdentityKey, reason: String) {
    log_skip!("reconcile", key = key, reason = reason);
    result.skipped_count += 1;
    result.error_details.push(reason);
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> Database {
        Database::new("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_same_key_in_batch_is_skipped() {
        let db = test_db().await;
        let mut keys = db.existing_keys().await.unwrap();

        let result = reconcile(
            &db,
            vec![
                VocabularyItem::new("hola", "es", "cześć", "pl"),
                VocabularyItem::new("hola", "es", "adios", "pl"),
            ],
            &mut keys,
        )
        .await
        .unwrap();

        assert_eq!(result.created_count, 1);
        assert_eq!(result.skipped_count, 1);
        assert_eq!(result.created[0].translated_word, "cześć");
        assert!(!result.created[0].is_manual);
        assert_eq!(result.error_details.len(), 1);
        assert!(keys.contains(&IdentityKey::new("hola", "es", "pl")));
    }

    #[tokio::test]
    async fn test_already_stored_key_is_skipped_even_if_not_in_set() {
        let db = test_db().await;
        db.create_flashcard(&VocabularyItem::new("Gracias", "ES", "dzięki", "PL"), true, None)
            .await
            .unwrap();

        // A stale snapshot of existing keys still cannot produce a duplicate.
        let mut keys = HashSet::new();
        let result = reconcile(
            &db,
            vec![VocabularyItem::new("gracias", "es", "dziękuję", "pl")],
            &mut keys,
        )
        .await
        .unwrap();

        assert_eq!(result.created_count, 0);
        assert_eq!(result.skipped_count, 1);
        assert_eq!(db.get_all_flashcards().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_items_are_skipped_with_reason() {
        let db = test_db().await;
        let mut keys = HashSet::new();
        let result = reconcile(
            &db,
            vec![
                VocabularyItem::new("perro", "es", "", "pl"),
                VocabularyItem::new("gato", "es", "kot", "pl"),
            ],
            &mut keys,
        )
        .await
        .unwrap();

        assert_eq!(result.created_count, 1);
        assert_eq!(result.skipped_count, 1);
        assert!(result.error_details[0].contains("translated_word"));
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let db = test_db().await;
        let mut keys = HashSet::new();
        let result = reconcile(&db, Vec::new(), &mut keys).await.unwrap();
        assert_eq!(result.created_count, 0);
        assert_eq!(result.skipped_count, 0);
        assert!(result.created.is_empty());
    }
}
