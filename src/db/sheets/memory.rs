use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use super::api::SheetsApi;
use crate::error::AppError;

/// An in-process spreadsheet used for demo mode and tests.
///
/// Mirrors the behaviour of the values API: reads are truncated to the
/// requested width, appends go after the last row, deletes shift rows up.
#[derive(Default)]
pub struct MemorySheets {
    tabs: Mutex<HashMap<String, Vec<Vec<Value>>>>,
}

impl MemorySheets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a tab with raw rows (header first).
    pub fn with_sheet(self, sheet: &str, rows: Vec<Vec<Value>>) -> Self {
        if let Ok(mut tabs) = self.tabs.lock() {
            tabs.insert(sheet.to_string(), rows);
        }
        self
    }

    /// Raw copy of a tab, for assertions.
    pub fn snapshot(&self, sheet: &str) -> Vec<Vec<Value>> {
        self.tabs
            .lock()
            .ok()
            .and_then(|tabs| tabs.get(sheet).cloned())
            .unwrap_or_default()
    }

    fn with_tabs<T>(
        &self,
        f: impl FnOnce(&mut HashMap<String, Vec<Vec<Value>>>) -> Result<T, AppError>,
    ) -> Result<T, AppError> {
        let mut tabs = self
            .tabs
            .lock()
            .map_err(|_| AppError::Internal("memory sheet poisoned".into()))?;
        f(&mut tabs)
    }
}

#[async_trait]
impl SheetsApi for MemorySheets {
    async fn read_rows(&self, sheet: &str, width: usize) -> Result<Vec<Vec<Value>>, AppError> {
        self.with_tabs(|tabs| {
            Ok(tabs
                .get(sheet)
                .map(|rows| {
                    rows.iter()
                        .map(|row| row.iter().take(width).cloned().collect())
                        .collect()
                })
                .unwrap_or_default())
        })
    }

    async fn append_row(&self, sheet: &str, row: Vec<Value>) -> Result<(), AppError> {
        self.with_tabs(|tabs| {
            tabs.entry(sheet.to_string()).or_default().push(row);
            Ok(())
        })
    }

    async fn write_row(
        &self,
        sheet: &str,
        row_number: usize,
        row: Vec<Value>,
    ) -> Result<(), AppError> {
        if row_number == 0 {
            return Err(AppError::BadRequest("Row numbers start at 1".into()));
        }
        self.with_tabs(|tabs| {
            let rows = tabs.entry(sheet.to_string()).or_default();
            if rows.len() < row_number {
                rows.resize(row_number, Vec::new());
            }
            rows[row_number - 1] = row;
            Ok(())
        })
    }

    async fn delete_row(&self, sheet: &str, row_number: usize) -> Result<(), AppError> {
        self.with_tabs(|tabs| {
            let rows = tabs
                .get_mut(sheet)
                .ok_or_else(|| AppError::NotFound(format!("Sheet '{}' not found", sheet)))?;
            if row_number == 0 || row_number > rows.len() {
                return Err(AppError::NotFound(format!(
                    "Row {} not found in '{}'",
                    row_number, sheet
                )));
            }
            rows.remove(row_number - 1);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_read_truncates_to_width() {
        let sheets = MemorySheets::new().with_sheet(
            "Tab",
            vec![vec![json!("a"), json!("b"), json!("c")]],
        );
        let rows = sheets.read_rows("Tab", 2).await.unwrap();
        assert_eq!(rows, vec![vec![json!("a"), json!("b")]]);
    }

    #[tokio::test]
    async fn test_write_delete_shift() {
        let sheets = MemorySheets::new();
        sheets.append_row("Tab", vec![json!("h")]).await.unwrap();
        sheets.append_row("Tab", vec![json!("1")]).await.unwrap();
        sheets.append_row("Tab", vec![json!("2")]).await.unwrap();

        sheets.write_row("Tab", 2, vec![json!("one")]).await.unwrap();
        sheets.delete_row("Tab", 2).await.unwrap();

        assert_eq!(sheets.snapshot("Tab"), vec![vec![json!("h")], vec![json!("2")]]);
        assert!(sheets.delete_row("Tab", 9).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_sheet_reads_empty() {
        let sheets = MemorySheets::new();
        assert!(sheets.read_rows("Nope", 3).await.unwrap().is_empty());
    }
}
