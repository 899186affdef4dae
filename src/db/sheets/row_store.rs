use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::Mutex;

use super::api::SheetsApi;
use crate::error::AppError;

/// One spreadsheet row keyed by header name.
pub type Record = Map<String, Value>;

const ID_COLUMN: &str = "id";

/// Treats one tab of a spreadsheet as a table of records.
///
/// The header row (sheet row 1) names the columns. Lookups by id are linear
/// scans. Mutations are serialized through an in-process lock so that the
/// read-modify-write cycles of concurrent requests do not interleave; writers
/// in other processes can still race.
pub struct RowStore {
    api: Arc<dyn SheetsApi>,
    sheet: String,
    columns: &'static [&'static str],
    write_lock: Mutex<()>,
}

impl RowStore {
    pub fn new(
        api: Arc<dyn SheetsApi>,
        sheet: impl Into<String>,
        columns: &'static [&'static str],
    ) -> Self {
        Self {
            api,
            sheet: sheet.into(),
            columns,
            write_lock: Mutex::new(()),
        }
    }

    pub fn sheet(&self) -> &str {
        &self.sheet
    }

    /// Write the header row into an empty tab, or check an existing one.
    ///
    /// Every write places cells in the configured column order, so the
    /// header has to start with exactly those columns.
    pub async fn ensure_header(&self) -> Result<(), AppError> {
        let _guard = self.write_lock.lock().await;
        let rows = self.read().await?;

        match rows.first() {
            None => {
                tracing::info!(sheet = %self.sheet, "writing header row to empty sheet");
                let header = self.columns.iter().map(|c| Value::from(*c)).collect();
                self.api.write_row(&self.sheet, 1, header).await
            }
            Some(header) => {
                let found: Vec<String> = header.iter().map(cell_to_string).collect();
                if found.iter().map(String::as_str).eq(self.columns.iter().copied()) {
                    Ok(())
                } else {
                    Err(AppError::Internal(format!(
                        "Sheet '{}' header {:?} does not match expected columns {:?}",
                        self.sheet, found, self.columns
                    )))
                }
            }
        }
    }

    /// Every data row as a record keyed by the header's column names.
    pub async fn get_all(&self) -> Result<Vec<Record>, AppError> {
        let rows = self.read().await?;
        Ok(rows_to_records(&rows))
    }

    /// 1-based sheet row holding `id`, accounting for the header row.
    pub async fn find_row_number(&self, id: &str) -> Result<Option<usize>, AppError> {
        let rows = self.read().await?;
        Ok(locate(&rows, id).map(|(row_number, _)| row_number))
    }

    /// Append a record. Cells follow the configured column order; fields
    /// missing from the record are written as empty strings.
    pub async fn append(&self, record: &Record) -> Result<(), AppError> {
        let _guard = self.write_lock.lock().await;
        self.api
            .append_row(&self.sheet, self.to_row(record))
            .await
    }

    /// Append after `check` accepted the current contents, atomically with
    /// respect to other writers in this process.
    pub async fn insert_with<F>(&self, record: &Record, check: F) -> Result<(), AppError>
    where
        F: FnOnce(&[Record]) -> Result<(), AppError>,
    {
        let _guard = self.write_lock.lock().await;
        let rows = self.read().await?;
        check(&rows_to_records(&rows))?;
        self.api
            .append_row(&self.sheet, self.to_row(record))
            .await
    }

    /// Overlay `partial` onto the stored row; columns it does not mention
    /// keep their current values. Returns the merged record.
    pub async fn update(&self, id: &str, partial: &Record) -> Result<Record, AppError> {
        self.update_with(id, |mut existing, _| {
            for (key, value) in partial {
                existing.insert(key.clone(), value.clone());
            }
            Ok(existing)
        })
        .await
    }

    /// Replace the row for `id` with whatever `f` derives from the existing
    /// record and the full table.
    pub async fn update_with<F>(&self, id: &str, f: F) -> Result<Record, AppError>
    where
        F: FnOnce(Record, &[Record]) -> Result<Record, AppError>,
    {
        let _guard = self.write_lock.lock().await;
        let rows = self.read().await?;
        let (row_number, existing) = locate(&rows, id).ok_or_else(|| self.not_found(id))?;

        let updated = f(existing, &rows_to_records(&rows))?;
        self.api
            .write_row(&self.sheet, row_number, self.to_row(&updated))
            .await?;
        Ok(updated)
    }

    /// Remove the row for `id` entirely.
    pub async fn delete(&self, id: &str) -> Result<(), AppError> {
        let _guard = self.write_lock.lock().await;
        let rows = self.read().await?;
        let (row_number, _) = locate(&rows, id).ok_or_else(|| self.not_found(id))?;
        self.api.delete_row(&self.sheet, row_number).await
    }

    async fn read(&self) -> Result<Vec<Vec<Value>>, AppError> {
        self.api.read_rows(&self.sheet, self.columns.len()).await
    }

    fn to_row(&self, record: &Record) -> Vec<Value> {
        self.columns
            .iter()
            .map(|c| record.get(*c).cloned().unwrap_or_else(|| Value::from("")))
            .collect()
    }

    fn not_found(&self, id: &str) -> AppError {
        AppError::NotFound(format!("No row with id '{}' in '{}'", id, self.sheet))
    }
}

/// Render a cell as text the way the sheet displays it.
pub fn cell_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn rows_to_records(rows: &[Vec<Value>]) -> Vec<Record> {
    let Some((header, data)) = rows.split_first() else {
        return Vec::new();
    };
    let header: Vec<String> = header.iter().map(cell_to_string).collect();
    data.iter().map(|row| row_to_record(&header, row)).collect()
}

fn row_to_record(header: &[String], row: &[Value]) -> Record {
    header
        .iter()
        .enumerate()
        .filter(|(_, name)| !name.is_empty())
        .map(|(i, name)| {
            let cell = row.get(i).cloned().unwrap_or_else(|| Value::from(""));
            (name.clone(), cell)
        })
        .collect()
}

fn locate(rows: &[Vec<Value>], id: &str) -> Option<(usize, Record)> {
    let (header, data) = rows.split_first()?;
    let header: Vec<String> = header.iter().map(cell_to_string).collect();
    let id_index = header.iter().position(|h| h == ID_COLUMN)?;

    data.iter().enumerate().find_map(|(i, row)| {
        let cell = row.get(id_index).map(cell_to_string).unwrap_or_default();
        // Data index 0 sits on sheet row 2, below the header.
        (cell == id).then(|| (i + 2, row_to_record(&header, row)))
    })
}
