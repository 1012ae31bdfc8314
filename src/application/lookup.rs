//! Existing-record lookup for one chunk

use std::collections::HashSet;

use serde_json::Value;
use tracing::{debug, warn};

use crate::domain::{ExistingRecordMap, InputRow, normalize_email};
use crate::infrastructure::record_store::{RecordStore, StoreError};

/// Distinct non-empty emails of `rows`, in first-seen order.
pub fn collect_lookup_emails<'a, I>(rows: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a InputRow>,
{
    let mut seen = HashSet::new();
    rows.into_iter()
        .map(InputRow::normalized_email)
        .filter(|email| !email.is_empty() && seen.insert(email.clone()))
        .collect()
}

/// Key records by their normalized identity field. Records without one are
/// dropped; a later record with the same email replaces an earlier one.
pub fn index_by_email(records: Vec<Value>, identity_field: &str, store_name: &str) -> ExistingRecordMap {
    let mut map = ExistingRecordMap::with_capacity(records.len());
    for record in records {
        let email = record
            .get(identity_field)
            .and_then(Value::as_str)
            .map(normalize_email)
            .unwrap_or_default();
        if email.is_empty() {
            warn!(
                "⚠️ [{}] record without {} ignored: {}",
                store_name, identity_field, record
            );
            continue;
        }
        if map.insert(email.clone(), record).is_some() {
            warn!("⚠️ [{}] duplicate records for {}, keeping the last", store_name, email);
        }
    }
    map
}

pub async fn lookup_existing(
    store: &dyn RecordStore,
    identity_field: &str,
    emails: &[String],
) -> Result<ExistingRecordMap, StoreError> {
    if emails.is_empty() {
        return Ok(ExistingRecordMap::new());
    }
    let records = store.search_by_emails(emails).await?;
    let map = index_by_email(records, identity_field, store.name());
    debug!(
        "🔎 [{}] {} of {} emails already exist",
        store.name(),
        map.len(),
        emails.len()
    );
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::enrollment::columns;
    use crate::test_utils::InMemoryRecordStore;
    use serde_json::json;

    #[test]
    fn test_collect_skips_empty_and_duplicates() {
        let rows = [
            InputRow::from_pairs([(columns::EMAIL, "A@x.com")]),
            InputRow::from_pairs([(columns::EMAIL, "")]),
            InputRow::from_pairs([(columns::EMAIL, " a@x.com")]),
            InputRow::from_pairs([(columns::EMAIL, "b@x.com")]),
        ];
        assert_eq!(collect_lookup_emails(&rows), vec!["a@x.com", "b@x.com"]);
    }

    #[test]
    fn test_index_normalizes_and_drops_emailless() {
        let records = vec![
            json!({"_id": "1", "email": " Jane@X.com"}),
            json!({"_id": "2"}),
            json!({"_id": "3", "email": ""}),
            json!({"_id": "4", "email": "jane@x.com"}),
        ];
        let map = index_by_email(records, "email", "bubble");
        assert_eq!(map.len(), 1);
        assert_eq!(map["jane@x.com"]["_id"], json!("4"));
    }

    #[tokio::test]
    async fn test_empty_email_set_skips_the_store() {
        let store = InMemoryRecordStore::new("bubble", "email");
        let map = lookup_existing(&store, "email", &[]).await.unwrap();
        assert!(map.is_empty());
        assert_eq!(store.search_calls(), 0);
    }

    #[tokio::test]
    async fn test_lookup_returns_matching_records() {
        let store = InMemoryRecordStore::new("bubble", "email");
        store.seed(json!({"_id": "1", "email": "a@x.com"}));
        store.seed(json!({"_id": "2", "email": "z@x.com"}));

        let map = lookup_existing(&store, "email", &["a@x.com".to_string()])
            .await
            .unwrap();
        assert_eq!(map.len(), 1);
        assert!(map.contains_key("a@x.com"));
    }
}
