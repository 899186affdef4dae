use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::error::AppError;
use crate::token_cache::{TokenCache, TokenSource};

/// OAuth scope granting read/write access to spreadsheets.
pub const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";

const DEFAULT_BASE_URL: &str = "https://sheets.googleapis.com";

/// Row-level access to the tabs of one spreadsheet.
///
/// Row numbers are 1-based sheet rows; row 1 is the header.
#[async_trait]
pub trait SheetsApi: Send + Sync {
    /// Read columns `A..` through column `width` of every row, header included.
    /// Trailing empty cells of a row may be omitted.
    async fn read_rows(&self, sheet: &str, width: usize) -> Result<Vec<Vec<Value>>, AppError>;

    /// Append one row after the last row of the table.
    async fn append_row(&self, sheet: &str, row: Vec<Value>) -> Result<(), AppError>;

    /// Overwrite the cells of `row_number` starting at column A.
    async fn write_row(
        &self,
        sheet: &str,
        row_number: usize,
        row: Vec<Value>,
    ) -> Result<(), AppError>;

    /// Remove the whole row, shifting the rows below it up.
    async fn delete_row(&self, sheet: &str, row_number: usize) -> Result<(), AppError>;
}

/// Spreadsheet column letter for a 1-based column index (1 → `A`, 27 → `AA`).
pub fn column_letter(mut index: usize) -> String {
    let mut letters = Vec::new();
    while index > 0 {
        let rem = (index - 1) % 26;
        letters.push(b'A' + rem as u8);
        index = (index - 1) / 26;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

/// A1 range covering `width` columns from `row_from` (and optionally through `row_to`).
///
/// The sheet title is always quoted, with embedded `'` doubled.
pub fn a1_range(sheet: &str, width: usize, row_from: usize, row_to: Option<usize>) -> String {
    let last = column_letter(width.max(1));
    let title = format!("'{}'", sheet.replace('\'', "''"));
    match row_to {
        Some(to) => format!("{title}!A{row_from}:{last}{to}"),
        None => format!("{title}!A{row_from}:{last}"),
    }
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Debug, Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SheetProperties {
    sheet_id: i64,
    title: String,
}

/// Google Sheets v4 REST client authenticated with a cached OAuth token.
pub struct GoogleSheetsClient {
    http: reqwest::Client,
    base_url: String,
    spreadsheet_id: String,
    tokens: TokenCache,
    sheet_ids: Mutex<HashMap<String, i64>>,
}

impl GoogleSheetsClient {
    pub fn new(
        http: reqwest::Client,
        spreadsheet_id: impl Into<String>,
        token_source: Arc<dyn TokenSource>,
    ) -> Self {
        Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            spreadsheet_id: spreadsheet_id.into(),
            tokens: TokenCache::new(token_source),
            sheet_ids: Mutex::new(HashMap::new()),
        }
    }

    /// Point the client at another endpoint (e.g. an emulator).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn values_url(&self, range: &str) -> String {
        format!(
            "{}/v4/spreadsheets/{}/values/{}",
            self.base_url,
            self.spreadsheet_id,
            urlencoding::encode(range)
        )
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, AppError> {
        let token = self.tokens.get().await?;
        let response = request.bearer_auth(token).send().await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status == reqwest::StatusCode::UNAUTHORIZED {
            self.tokens.invalidate().await;
        }
        let body = response.text().await.unwrap_or_default();
        Err(AppError::Upstream(format!(
            "Sheets API returned {}: {}",
            status, body
        )))
    }

    async fn sheet_id(&self, sheet: &str) -> Result<i64, AppError> {
        if let Some(id) = self.cached_sheet_id(sheet) {
            return Ok(id);
        }

        let url = format!(
            "{}/v4/spreadsheets/{}",
            self.base_url, self.spreadsheet_id
        );
        let meta: SpreadsheetMeta = self
            .send(
                self.http
                    .get(url)
                    .query(&[("fields", "sheets.properties(sheetId,title)")]),
            )
            .await?
            .json()
            .await?;

        let mut ids = self
            .sheet_ids
            .lock()
            .map_err(|_| AppError::Internal("sheet id cache poisoned".into()))?;
        for entry in meta.sheets {
            ids.insert(entry.properties.title, entry.properties.sheet_id);
        }
        ids.get(sheet)
            .copied()
            .ok_or_else(|| AppError::NotFound(format!("Sheet '{}' not found", sheet)))
    }

    fn cached_sheet_id(&self, sheet: &str) -> Option<i64> {
        self.sheet_ids.lock().ok()?.get(sheet).copied()
    }
}

#[async_trait]
impl SheetsApi for GoogleSheetsClient {
    async fn read_rows(&self, sheet: &str, width: usize) -> Result<Vec<Vec<Value>>, AppError> {
        let range = a1_range(sheet, width, 1, None);
        let body: ValueRange = self
            .send(self.http.get(self.values_url(&range)).query(&[
                ("valueRenderOption", "UNFORMATTED_VALUE"),
                ("dateTimeRenderOption", "FORMATTED_STRING"),
            ]))
            .await?
            .json()
            .await?;
        Ok(body.values)
    }

    async fn append_row(&self, sheet: &str, row: Vec<Value>) -> Result<(), AppError> {
        let range = a1_range(sheet, row.len(), 1, None);
        let url = format!("{}:append", self.values_url(&range));
        self.send(
            self.http
                .post(url)
                .query(&[
                    ("valueInputOption", "RAW"),
                    ("insertDataOption", "INSERT_ROWS"),
                ])
                .json(&serde_json::json!({ "values": [row] })),
        )
        .await?;
        Ok(())
    }

    async fn write_row(
        &self,
        sheet: &str,
        row_number: usize,
        row: Vec<Value>,
    ) -> Result<(), AppError> {
        let range = a1_range(sheet, row.len(), row_number, Some(row_number));
        self.send(
            self.http
                .put(self.values_url(&range))
                .query(&[("valueInputOption", "RAW")])
                .json(&serde_json::json!({
                    "range": range,
                    "majorDimension": "ROWS",
                    "values": [row],
                })),
        )
        .await?;
        Ok(())
    }

    async fn delete_row(&self, sheet: &str, row_number: usize) -> Result<(), AppError> {
        let sheet_id = self.sheet_id(sheet).await?;
        let url = format!(
            "{}/v4/spreadsheets/{}:batchUpdate",
            self.base_url, self.spreadsheet_id
        );
        self.send(self.http.post(url).json(&serde_json::json!({
            "requests": [{
                "deleteDimension": {
                    "range": {
                        "sheetId": sheet_id,
                        "dimension": "ROWS",
                        "startIndex": row_number - 1,
                        "endIndex": row_number,
                    }
                }
            }]
        })))
        .await?;
        Ok(())
    }
}
