//! Bubble Data API adapter
//!
//! Search: `GET {base}/{table}?constraints=[..]&cursor=C&limit=L`, paged by
//! cursor until `remaining` reaches zero. Create is `POST`, update `PATCH`.

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};
use url::Url;

use super::{RecordStore, StoreError, decode_body, join_segments};
use crate::infrastructure::http_client::ResilientHttpClient;

#[derive(Debug, Default, Deserialize)]
struct SearchEnvelope {
    #[serde(default)]
    response: SearchPage,
}

#[derive(Debug, Default, Deserialize)]
struct SearchPage {
    #[serde(default)]
    results: Vec<Value>,
    #[serde(default)]
    remaining: u64,
}

#[derive(Debug, Clone)]
pub struct BubbleDataApiStore {
    client: ResilientHttpClient,
    base_url: Url,
    table: String,
    search_key: String,
    page_size: u32,
}

impl BubbleDataApiStore {
    pub fn new(
        client: ResilientHttpClient,
        base_url: Url,
        table: impl Into<String>,
        search_key: impl Into<String>,
        page_size: u32,
    ) -> Self {
        Self {
            client,
            base_url,
            table: table.into(),
            search_key: search_key.into(),
            page_size: page_size.max(1),
        }
    }

    fn table_url(&self) -> Result<Url, StoreError> {
        join_segments(self.name(), &self.base_url, &[&self.table])
    }

    fn record_url(&self, record_id: &str) -> Result<Url, StoreError> {
        join_segments(self.name(), &self.base_url, &[&self.table, record_id])
    }
}

#[async_trait]
impl RecordStore for BubbleDataApiStore {
    fn name(&self) -> &str {
        self.client.target()
    }

    async fn search_by_emails(&self, emails: &[String]) -> Result<Vec<Value>, StoreError> {
        if emails.is_empty() {
            return Ok(Vec::new());
        }

        let constraints = json!([{
            "key": self.search_key,
            "constraint_type": "in",
            "value": emails,
        }])
        .to_string();

        let mut results = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let mut url = self.table_url()?;
            url.query_pairs_mut()
                .append_pair("constraints", &constraints)
                .append_pair("cursor", &cursor.to_string())
                .append_pair("limit", &self.page_size.to_string());

            let response = self.client.execute(Method::GET, url, None).await?;
            let envelope: SearchEnvelope = decode_body(self.name(), &response.body)?;
            let page = envelope.response;
            let fetched = page.results.len();
            results.extend(page.results);

            debug!(
                "🔍 [{}] cursor {} -> {} results, {} remaining",
                self.name(),
                cursor,
                fetched,
                page.remaining
            );

            if page.remaining == 0 {
                break;
            }
            if fetched == 0 {
                warn!(
                    "⚠️ [{}] {} records reported remaining but page was empty, stopping",
                    self.name(),
                    page.remaining
                );
                break;
            }
            cursor += u64::from(self.page_size);
        }

        Ok(results)
    }

    async fn create(&self, body: &Value) -> Result<(), StoreError> {
        let url = self.table_url()?;
        self.client.execute(Method::POST, url, Some(body)).await?;
        info!("➕ [{}] created record", self.name());
        Ok(())
    }

    async fn update(&self, record_id: &str, body: &Value) -> Result<(), StoreError> {
        let url = self.record_url(record_id)?;
        self.client.execute(Method::PATCH, url, Some(body)).await?;
        info!("✏️ [{}] updated record {}", self.name(), record_id);
        Ok(())
    }
}
