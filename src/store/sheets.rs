//! # Spreadsheet REST Backend
//!
//! [`PartitionedLog`] over the Google Sheets v4 REST API. Each sheet (tab)
//! of one spreadsheet is a partition.
//!
//! | Operation | Request |
//! |-----------|---------|
//! | list | `GET  /v4/spreadsheets/{id}?fields=sheets.properties(sheetId,title)` |
//! | create | `POST /v4/spreadsheets/{id}:batchUpdate` with `addSheet` |
//! | count | `GET  /v4/spreadsheets/{id}/values/'{title}'!A:A` |
//! | delete | `POST /v4/spreadsheets/{id}:batchUpdate` with `deleteDimension` |
//! | append | `POST /v4/spreadsheets/{id}/values/'{title}'!A1:append` (user-entered input) |
//! | read | `GET  /v4/spreadsheets/{id}/values/'{title}'!{range}` |

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use super::{CellRange, PartitionInfo, PartitionedLog};
use crate::error::{Result, TrackerError};

/// Default API endpoint
pub const DEFAULT_API_BASE: &str = "https://sheets.googleapis.com";

#[derive(Debug, Deserialize)]
struct SpreadsheetResponse {
    #[serde(default)]
    sheets: Vec<Sheet>,
}

#[derive(Debug, Deserialize)]
struct Sheet {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SheetProperties {
    #[serde(default)]
    sheet_id: u64,
    title: String,
}

#[derive(Debug, Deserialize)]
struct BatchUpdateResponse {
    #[serde(default)]
    replies: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

/// Client for one spreadsheet, authorized with an OAuth bearer token.
pub struct SheetsStore {
    client: Client,
    base: Url,
    spreadsheet_id: String,
    access_token: String,
}

impl std::fmt::Debug for SheetsStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SheetsStore")
            .field("base", &self.base.as_str())
            .field("spreadsheet_id", &self.spreadsheet_id)
            .finish_non_exhaustive()
    }
}

impl SheetsStore {
    /// Create a client.
    ///
    /// # Arguments
    ///
    /// * `api_base` - API origin, normally [`DEFAULT_API_BASE`]
    /// * `spreadsheet_id` - Id of the spreadsheet holding every partition
    /// * `access_token` - OAuth token with the spreadsheets scope
    /// * `timeout` - Per-request timeout
    ///
    /// # Errors
    ///
    /// Returns error if `api_base` is not a valid base URL or the HTTP
    /// client cannot be built.
    pub fn new(
        api_base: &str,
        spreadsheet_id: &str,
        access_token: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let base = Url::parse(api_base)
            .map_err(|e| TrackerError::Store(format!("Invalid API base {}: {}", api_base, e)))?;
        if base.cannot_be_a_base() {
            return Err(TrackerError::Store(format!("Invalid API base {}", api_base)));
        }

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("family-tracker/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base,
            spreadsheet_id: spreadsheet_id.to_string(),
            access_token: access_token.to_string(),
        })
    }

    /// `{base}/v4/spreadsheets/{id}{suffix}` followed by extra path segments.
    fn url(&self, suffix: &str, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| TrackerError::Store("API base cannot hold a path".to_string()))?;
            path.pop_if_empty()
                .push("v4")
                .push("spreadsheets")
                .push(&format!("{}{}", self.spreadsheet_id, suffix));
            path.extend(segments);
        }
        Ok(url)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder, what: &str) -> Result<T> {
        let response = request.bearer_auth(&self.access_token).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TrackerError::Store(format!(
                "{} failed with {}: {}",
                what,
                status,
                body.trim()
            )));
        }
        Ok(response.json::<T>().await?)
    }

    async fn batch_update(&self, request: Value, what: &str) -> Result<BatchUpdateResponse> {
        let url = self.url(":batchUpdate", &[])?;
        let body = json!({ "requests": [request] });
        self.send(self.client.post(url).json(&body), what).await
    }

    async fn get_values(&self, range: &str) -> Result<Vec<Vec<String>>> {
        let url = self.url("", &["values", range])?;
        let response: ValueRange = self.send(self.client.get(url), "values.get").await?;
        Ok(response
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_text).collect())
            .collect())
    }

    async fn title_of(&self, partition_id: u64) -> Result<String> {
        self.list_partitions()
            .await?
            .into_iter()
            .find(|p| p.id == partition_id)
            .map(|p| p.title)
            .ok_or_else(|| TrackerError::Store(format!("Partition not found: {}", partition_id)))
    }
}

/// Quote a sheet title for use in an A1 range (`it's` → `'it''s'`).
pub fn quote_title(title: &str) -> String {
    format!("'{}'", title.replace('\'', "''"))
}

fn cell_text(value: Value) -> String {
    match value {
        Value::String(text) => text,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[async_trait]
impl PartitionedLog for SheetsStore {
    async fn list_partitions(&self) -> Result<Vec<PartitionInfo>> {
        let mut url = self.url("", &[])?;
        url.query_pairs_mut()
            .append_pair("fields", "sheets.properties(sheetId,title)");
        let response: SpreadsheetResponse =
            self.send(self.client.get(url), "spreadsheets.get").await?;

        Ok(response
            .sheets
            .into_iter()
            .map(|s| PartitionInfo {
                id: s.properties.sheet_id,
                title: s.properties.title,
            })
            .collect())
    }

    async fn create_partition(&self, name: &str) -> Result<PartitionInfo> {
        let request = json!({ "addSheet": { "properties": { "title": name } } });
        let response = self.batch_update(request, "addSheet").await?;

        let properties = response
            .replies
            .into_iter()
            .next()
            .and_then(|reply| reply.get("addSheet")?.get("properties").cloned())
            .ok_or_else(|| TrackerError::Store("addSheet reply missing properties".to_string()))?;
        let properties: SheetProperties = serde_json::from_value(properties)?;

        debug!("Created sheet {} ({})", properties.title, properties.sheet_id);
        Ok(PartitionInfo {
            id: properties.sheet_id,
            title: properties.title,
        })
    }

    async fn row_count(&self, partition_id: u64) -> Result<usize> {
        let title = self.title_of(partition_id).await?;
        let rows = self
            .get_values(&format!("{}!A:A", quote_title(&title)))
            .await?;
        Ok(rows.len())
    }

    async fn delete_rows(&self, partition_id: u64, start: usize, end: usize) -> Result<()> {
        let request = json!({
            "deleteDimension": {
                "range": {
                    "sheetId": partition_id,
                    "dimension": "ROWS",
                    "startIndex": start,
                    "endIndex": end,
                }
            }
        });
        self.batch_update(request, "deleteDimension").await?;
        Ok(())
    }

    async fn append_row(&self, partition: &str, values: &[String]) -> Result<()> {
        let range = format!("{}!A1:append", quote_title(partition));
        let mut url = self.url("", &["values", &range])?;
        url.query_pairs_mut()
            .append_pair("valueInputOption", "USER_ENTERED");

        let body = json!({ "values": [values] });
        let _: Value = self
            .send(self.client.post(url).json(&body), "values.append")
            .await?;
        Ok(())
    }

    async fn read_range(&self, partition: &str, range: &CellRange) -> Result<Vec<Vec<String>>> {
        self.get_values(&format!("{}!{}", quote_title(partition), range))
            .await
    }
}
