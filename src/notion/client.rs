//! Usage: Bearer-authenticated calls to the Notion REST API.

use crate::infra::http::{http_client, request_json};
use crate::notion::comments::build_comment_rich_text;
use crate::shared::error::AppResult;
use crate::shared::security::mask_token;
use serde_json::{json, Map, Value};

pub struct NotionClient {
    http: reqwest::Client,
    api_base: String,
    access_token: String,
    notion_version: String,
}

impl std::fmt::Debug for NotionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotionClient")
            .field("api_base", &self.api_base)
            .field("access_token", &mask_token(&self.access_token))
            .field("notion_version", &self.notion_version)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct DataSourceQuery<'a> {
    pub data_source_id: &'a str,
    pub status_property: &'a str,
    pub include_statuses: &'a [String],
    pub page_size: u8,
}

impl NotionClient {
    pub fn new(api_base: &str, access_token: &str, notion_version: &str) -> AppResult<Self> {
        Ok(Self {
            http: http_client()?,
            api_base: api_base.trim().trim_end_matches('/').to_string(),
            access_token: access_token.trim().to_string(),
            notion_version: notion_version.trim().to_string(),
        })
    }

    async fn post(&self, path: &str, body: &Value) -> AppResult<Map<String, Value>> {
        let url = format!("{}/{}", self.api_base, path.trim_start_matches('/'));
        let request = self
            .http
            .post(&url)
            .bearer_auth(&self.access_token)
            .header("Notion-Version", &self.notion_version);
        Ok(request_json(request, &url, Some(body)).await?)
    }

    /// Follows `next_cursor` until `has_more` is false and returns every page object.
    pub async fn query_data_source(&self, query: &DataSourceQuery<'_>) -> AppResult<Vec<Value>> {
        let filter_or: Vec<Value> = query
            .include_statuses
            .iter()
            .map(|status| json!({"property": query.status_property, "select": {"equals": status}}))
            .collect();
        let path = format!("data_sources/{}/query", query.data_source_id.trim());

        let mut pages = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut body = json!({
                "page_size": query.page_size,
                "result_type": "page",
                "filter": {"or": filter_or},
            });
            if let Some(cursor) = cursor.as_deref() {
                body["start_cursor"] = json!(cursor);
            }

            let mut response = self.post(&path, &body).await?;
            if let Some(Value::Array(results)) = response.remove("results") {
                pages.extend(results.into_iter().filter(Value::is_object));
            }
            let has_more = response
                .get("has_more")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            let next = response
                .get("next_cursor")
                .and_then(Value::as_str)
                .filter(|v| !v.is_empty())
                .map(str::to_string);
            match next {
                Some(next) if has_more => cursor = Some(next),
                _ => break,
            }
        }
        tracing::debug!(count = pages.len(), "data source query finished");
        Ok(pages)
    }

    pub async fn create_page_comment(
        &self,
        page_id: &str,
        text: &str,
    ) -> AppResult<Map<String, Value>> {
        let body = json!({
            "parent": {"page_id": page_id.trim()},
            "rich_text": build_comment_rich_text(text)?,
        });
        self.post("comments", &body).await
    }
}
