//! NTD agency ridership table.
//!
//! Input is the `MASTER` sheet of the FTA monthly adjusted database, either
//! the published workbook (`.xlsx`) or the sheet exported to CSV. Rows are
//! kept for one travel mode and one headquarters state, minus any excluded
//! agencies.

use std::io::Cursor;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use calamine::{Data, Reader, Xlsx, open_workbook_from_rs};
use csv::StringRecord;
use serde::Deserialize;
use tracing::info;

use super::TabularSource;
use crate::fetch::{HttpClient, fetch_location};
use crate::model::RidershipRecord;

#[derive(Debug, Deserialize)]
struct MasterRow {
    #[serde(rename = "5 digit NTD ID")]
    ntd_id: String,
    #[serde(rename = "Agency")]
    agency: String,
    #[serde(rename = "Mode")]
    mode: String,
    #[serde(rename = "HQ State")]
    hq_state: String,
    #[serde(rename = "Service Area Population", default)]
    service_area_population: Option<String>,
    #[serde(rename = "TOS", default)]
    tos: Option<String>,
    #[serde(rename = "Active", default)]
    active: Option<String>,
    #[serde(rename = "Passenger Miles FY", default)]
    passenger_miles: Option<String>,
    #[serde(rename = "Unlinked Passenger Trips FY", default)]
    unlinked_passenger_trips: Option<String>,
    #[serde(rename = "Fares FY", default)]
    fares: Option<String>,
    #[serde(rename = "Operating Expenses FY", default)]
    operating_expenses: Option<String>,
    #[serde(rename = "Average Cost per Trip FY", default)]
    avg_cost_per_trip: Option<String>,
    #[serde(rename = "Average Fares per Trip FY", default)]
    avg_fares_per_trip: Option<String>,
}

/// Parses spreadsheet-formatted numbers such as `$1,234.50`. Blank cells
/// and placeholders are missing values.
pub fn parse_amount(raw: Option<&str>) -> Option<f64> {
    let cleaned: String = raw?
        .chars()
        .filter(|c| !matches!(c, '$' | ',' | ' '))
        .collect();
    cleaned.parse().ok().filter(|v: &f64| v.is_finite())
}

fn non_empty(raw: Option<String>) -> Option<String> {
    raw.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

#[derive(Debug, Clone)]
pub struct RidershipFilter {
    pub mode: String,
    pub state: String,
    pub excluded_agencies: Vec<String>,
}

pub const MASTER_SHEET: &str = "MASTER";

/// Parses the `MASTER` sheet exported to CSV.
pub fn parse_ridership(bytes: &[u8], filter: &RidershipFilter) -> Result<Vec<RidershipRecord>> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let rows = rdr
        .deserialize::<MasterRow>()
        .map(|row| row.context("malformed ridership row"));
    filter_rows(rows, filter)
}

/// Parses the `MASTER` sheet of the FTA workbook. The first row names the
/// columns, as in the CSV export.
pub fn parse_ridership_xlsx(bytes: &[u8], filter: &RidershipFilter) -> Result<Vec<RidershipRecord>> {
    let mut workbook: Xlsx<_> =
        open_workbook_from_rs(Cursor::new(bytes)).context("ridership workbook is not valid xlsx")?;
    let range = workbook
        .worksheet_range(MASTER_SHEET)
        .with_context(|| format!("ridership workbook has no {MASTER_SHEET} sheet"))?;

    let mut sheet_rows = range.rows();
    let Some(header) = sheet_rows.next() else {
        bail!("{MASTER_SHEET} sheet is empty");
    };
    let headers: StringRecord = header.iter().map(cell_text).collect();

    let rows = sheet_rows.map(|row| {
        let record: StringRecord = row.iter().map(cell_text).collect();
        record
            .deserialize::<MasterRow>(Some(&headers))
            .context("malformed ridership row")
    });
    filter_rows(rows, filter)
}

/// Cell text as the CSV export would show it. Whole-number floats print
/// without a fraction, so NTD ids read back as `10004`.
fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty | Data::Error(_) => String::new(),
        other => other.to_string().trim().to_string(),
    }
}

fn filter_rows(
    rows: impl Iterator<Item = Result<MasterRow>>,
    filter: &RidershipFilter,
) -> Result<Vec<RidershipRecord>> {
    let mut kept = Vec::new();
    let mut total = 0usize;
    for row in rows {
        let row = row?;
        total += 1;

        if row.mode != filter.mode
            || row.hq_state != filter.state
            || filter.excluded_agencies.iter().any(|a| *a == row.agency)
        {
            continue;
        }

        kept.push(RidershipRecord {
            ntd_id: row.ntd_id,
            agency: row.agency,
            service_area_population: parse_amount(row.service_area_population.as_deref()),
            type_of_service: non_empty(row.tos),
            active: non_empty(row.active),
            passenger_miles: parse_amount(row.passenger_miles.as_deref()),
            unlinked_passenger_trips: parse_amount(row.unlinked_passenger_trips.as_deref()),
            fares: parse_amount(row.fares.as_deref()),
            operating_expenses: parse_amount(row.operating_expenses.as_deref()),
            avg_cost_per_trip: parse_amount(row.avg_cost_per_trip.as_deref()),
            avg_fares_per_trip: parse_amount(row.avg_fares_per_trip.as_deref()),
        });
    }

    info!(
        total,
        kept = kept.len(),
        mode = %filter.mode,
        state = %filter.state,
        "Ridership table filtered"
    );
    Ok(kept)
}

/// `true` when `location` names a workbook rather than a CSV export.
fn is_workbook(location: &str) -> bool {
    let path = location.split(['?', '#']).next().unwrap_or(location);
    path.to_ascii_lowercase().ends_with(".xlsx")
}

pub struct RidershipSource {
    client: Arc<dyn HttpClient>,
    location: String,
    filter: RidershipFilter,
}

impl RidershipSource {
    pub fn new(client: Arc<dyn HttpClient>, location: String, filter: RidershipFilter) -> Self {
        Self {
            client,
            location,
            filter,
        }
    }
}

#[async_trait]
impl TabularSource<Vec<RidershipRecord>> for RidershipSource {
    fn name(&self) -> &str {
        "ridership"
    }

    async fn fetch(&self) -> Result<Vec<RidershipRecord>> {
        let bytes = fetch_location(self.client.as_ref(), &self.location).await?;
        if is_workbook(&self.location) {
            parse_ridership_xlsx(&bytes, &self.filter)
        } else {
            parse_ridership(&bytes, &self.filter)
        }
    }
}
