use crate::rolesync::ledger::{CellGrid, CellHighlight, LedgerPage, LedgerSource};
use crate::rolesync::util::{api_url, truncate_with_ellipsis};
use anyhow::{Context, Result};
use reqwest::Url;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde_json::{Value, json};
use std::env;
use std::time::Duration;

const DEFAULT_API_BASE: &str = "https://sheets.googleapis.com/v4";
const REQUEST_TIMEOUT_SECS: u64 = 30;

pub struct SheetsClient {
    client: Client,
    api_base: String,
    access_token: String,
}

impl SheetsClient {
    pub fn new(api_base: &str, access_token: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            access_token: access_token.trim().to_string(),
        })
    }

    /// Reads `ROLESYNC_SHEETS_ACCESS_TOKEN` and the optional `ROLESYNC_SHEETS_API_BASE`.
    pub fn from_env() -> Result<Self> {
        let token = env::var("ROLESYNC_SHEETS_ACCESS_TOKEN")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .context("ROLESYNC_SHEETS_ACCESS_TOKEN is not set")?;
        let api_base = env::var("ROLESYNC_SHEETS_API_BASE")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        Self::new(&api_base, &token)
    }

    fn values_url(&self, ledger_id: &str, page: &LedgerPage, range: &str) -> Result<Url> {
        api_url(
            &self.api_base,
            &["spreadsheets", ledger_id, "values", &page_range(&page.title, range)],
        )
    }

    fn send(&self, what: &str, builder: RequestBuilder) -> Result<Response> {
        let response = builder
            .bearer_auth(&self.access_token)
            .send()
            .with_context(|| format!("sheets {what} request failed"))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            anyhow::bail!(
                "sheets {what} failed with status {status}: {}",
                truncate_with_ellipsis(&body, 200)
            );
        }
        Ok(response)
    }
}

/// `'Title'!A1:B2`, with single quotes in the title doubled.
pub fn page_range(title: &str, range: &str) -> String {
    format!("'{}'!{range}", title.replace('\'', "''"))
}

pub fn parse_pages(body: &Value) -> Result<Vec<LedgerPage>> {
    let sheets = body
        .get("sheets")
        .and_then(Value::as_array)
        .context("spreadsheet metadata missing sheets")?;
    let mut pages = Vec::with_capacity(sheets.len());
    for sheet in sheets {
        let props = sheet
            .get("properties")
            .context("sheet missing properties")?;
        let page_id = props.get("sheetId").and_then(Value::as_i64).unwrap_or(0);
        let title = props
            .get("title")
            .and_then(Value::as_str)
            .context("sheet missing title")?;
        let row_count = props
            .get("gridProperties")
            .and_then(|g| g.get("rowCount"))
            .and_then(Value::as_u64)
            .unwrap_or(0);
        pages.push(LedgerPage {
            page_id,
            title: title.to_string(),
            row_count: u32::try_from(row_count).unwrap_or(u32::MAX),
        });
    }
    Ok(pages)
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// `values` is omitted entirely when the range is empty.
pub fn parse_values(body: &Value) -> CellGrid {
    let rows = body
        .get("values")
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .map(|row| {
                    row.as_array()
                        .map(|cells| cells.iter().map(cell_text).collect())
                        .unwrap_or_default()
                })
                .collect()
        })
        .unwrap_or_default();
    CellGrid::new(rows)
}

pub fn format_requests(highlights: &[CellHighlight]) -> Value {
    let requests: Vec<Value> = highlights
        .iter()
        .map(|h| {
            let (red, green, blue, alpha) = h.color.rgba();
            json!({
                "repeatCell": {
                    "range": {
                        "sheetId": h.range.page_id,
                        "startRowIndex": h.range.row_start,
                        "endRowIndex": h.range.row_end,
                        "startColumnIndex": h.range.col_start,
                        "endColumnIndex": h.range.col_end
                    },
                    "cell": {
                        "userEnteredFormat": {
                            "backgroundColor": {
                                "red": red,
                                "green": green,
                                "blue": blue,
                                "alpha": alpha
                            }
                        }
                    },
                    "fields": "userEnteredFormat.backgroundColor"
                }
            })
        })
        .collect();
    json!({ "requests": requests })
}

impl LedgerSource for SheetsClient {
    fn pages(&self, ledger_id: &str) -> Result<Vec<LedgerPage>> {
        let mut url = api_url(&self.api_base, &["spreadsheets", ledger_id])?;
        url.query_pairs_mut().append_pair("fields", "sheets.properties");
        let response = self.send("metadata", self.client.get(url))?;
        let body: Value = response.json().context("spreadsheet metadata is not json")?;
        parse_pages(&body)
    }

    fn read_range(&self, ledger_id: &str, page: &LedgerPage, range: &str) -> Result<CellGrid> {
        let url = self.values_url(ledger_id, page, range)?;
        let response = self.send("values get", self.client.get(url))?;
        let body: Value = response.json().context("values response is not json")?;
        Ok(parse_values(&body))
    }

    fn write_range(
        &self,
        ledger_id: &str,
        page: &LedgerPage,
        range: &str,
        values: Vec<Vec<String>>,
    ) -> Result<()> {
        let mut url = self.values_url(ledger_id, page, range)?;
        url.query_pairs_mut().append_pair("valueInputOption", "RAW");
        let payload = json!({
            "range": page_range(&page.title, range),
            "majorDimension": "ROWS",
            "values": values
        });
        self.send("values update", self.client.put(url).json(&payload))?;
        Ok(())
    }

    fn batch_format_cells(&self, ledger_id: &str, highlights: &[CellHighlight]) -> Result<()> {
        if highlights.is_empty() {
            return Ok(());
        }
        let url = api_url(
            &self.api_base,
            &["spreadsheets", &format!("{ledger_id}:batchUpdate")],
        )?;
        let payload = format_requests(highlights);
        self.send("batch update", self.client.post(url).json(&payload))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rolesync::ledger::CellRange;
    use crate::rolesync::tier::HighlightColor;

    #[test]
    fn page_range_quotes_title() {
        assert_eq!(page_range("October", "B1:B3"), "'October'!B1:B3");
        assert_eq!(page_range("Bob's", "A7:D9"), "'Bob''s'!A7:D9");
    }

    #[test]
    fn parses_sheet_metadata() {
        let body = json!({
            "sheets": [
                {"properties": {"sheetId": 0, "title": "September", "gridProperties": {"rowCount": 1000}}},
                {"properties": {"sheetId": 123, "title": "October"}}
            ]
        });
        let pages = parse_pages(&body).expect("pages");
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].row_count, 1000);
        assert_eq!(pages[1].page_id, 123);
        assert_eq!(pages[1].row_count, 0);
    }

    #[test]
    fn parses_ragged_values() {
        let body = json!({
            "range": "'October'!A7:D9",
            "values": [["Foo#0001", "1", "2026/10/01", "1,500"], ["Bar#0002", 2]]
        });
        let grid = parse_values(&body);
        assert_eq!(grid.row_count(), 2);
        assert_eq!(grid.get(0, 3), "1,500");
        assert_eq!(grid.get(1, 1), "2");
        assert_eq!(grid.get(1, 3), "");
        assert_eq!(parse_values(&json!({"range": "x"})).row_count(), 0);
    }

    #[test]
    fn builds_repeat_cell_requests() {
        let body = format_requests(&[CellHighlight {
            range: CellRange {
                page_id: 9,
                row_start: 6,
                row_end: 7,
                col_start: 0,
                col_end: 4,
            },
            color: HighlightColor::Yellow,
        }]);
        let request = &body["requests"][0]["repeatCell"];
        assert_eq!(request["range"]["sheetId"], 9);
        assert_eq!(request["range"]["endColumnIndex"], 4);
        assert_eq!(request["fields"], "userEnteredFormat.backgroundColor");
        assert_eq!(
            request["cell"]["userEnteredFormat"]["backgroundColor"]["red"],
            1.0
        );
    }
}
