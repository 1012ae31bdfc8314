//! Parse Server (Back4App) REST adapter
//!
//! Search: `GET {base}/{table}?where={"$or":[..]}&limit=L&skip=S`, paged by
//! skip while pages come back full. Create is `POST`, update `PUT`.

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};
use url::Url;

use super::{RecordStore, StoreError, decode_body, join_segments};
use crate::infrastructure::http_client::ResilientHttpClient;

#[derive(Debug, Default, Deserialize)]
struct QueryPage {
    #[serde(default)]
    results: Vec<Value>,
}

#[derive(Debug, Clone)]
pub struct ParseServerStore {
    client: ResilientHttpClient,
    base_url: Url,
    table: String,
    email_field: String,
    page_size: u32,
}

impl ParseServerStore {
    pub fn new(
        client: ResilientHttpClient,
        base_url: Url,
        table: impl Into<String>,
        email_field: impl Into<String>,
        page_size: u32,
    ) -> Self {
        Self {
            client,
            base_url,
            table: table.into(),
            email_field: email_field.into(),
            page_size: page_size.max(1),
        }
    }

    fn table_url(&self) -> Result<Url, StoreError> {
        join_segments(self.name(), &self.base_url, &[&self.table])
    }

    fn record_url(&self, record_id: &str) -> Result<Url, StoreError> {
        join_segments(self.name(), &self.base_url, &[&self.table, record_id])
    }

    fn where_clause(&self, emails: &[String]) -> String {
        let alternatives: Vec<Value> = emails
            .iter()
            .map(|email| json!({ self.email_field.as_str(): email }))
            .collect();
        json!({ "$or": alternatives }).to_string()
    }
}

#[async_trait]
impl RecordStore for ParseServerStore {
    fn name(&self) -> &str {
        self.client.target()
    }

    async fn search_by_emails(&self, emails: &[String]) -> Result<Vec<Value>, StoreError> {
        if emails.is_empty() {
            return Ok(Vec::new());
        }

        let where_clause = self.where_clause(emails);
        let page_size = self.page_size as usize;
        let mut results = Vec::new();
        let mut skip: u64 = 0;
        loop {
            let mut url = self.table_url()?;
            url.query_pairs_mut()
                .append_pair("where", &where_clause)
                .append_pair("limit", &self.page_size.to_string())
                .append_pair("skip", &skip.to_string());

            let response = self.client.execute(Method::GET, url, None).await?;
            let page: QueryPage = decode_body(self.name(), &response.body)?;
            let fetched = page.results.len();
            results.extend(page.results);

            debug!("🔍 [{}] skip {} -> {} results", self.name(), skip, fetched);

            if fetched < page_size {
                break;
            }
            skip += u64::from(self.page_size);
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
        self.client.execute(Method::PUT, url, Some(body)).await?;
        info!("✏️ [{}] updated record {}", self.name(), record_id);
        Ok(())
    }
}
