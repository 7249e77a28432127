//! Census Data API tables: tract income, tract population and county
//! population estimates.
//!
//! The API answers with a JSON array of arrays. The first row names the
//! columns, the rest are values (strings or nulls). Geography columns
//! (`state`, `county`, `tract`) are appended after the requested variables.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use super::TabularSource;
use crate::fetch::{HttpClient, fetch_location};
use crate::model::{CountyPopulation, IncomeRecord, TractPopulation};

pub const MEDIAN_HOUSEHOLD_INCOME: &str = "B19013_001E";
pub const TOTAL_POPULATION: &str = "B01003_001E";

/// A parsed Census response with named columns.
#[derive(Debug, Clone, PartialEq)]
pub struct CensusTable {
    headers: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
}

impl CensusTable {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let raw: Vec<Vec<Value>> =
            serde_json::from_slice(bytes).context("Census response is not an array of rows")?;
        let mut rows = raw.into_iter();
        let headers = rows
            .next()
            .context("Census response has no header row")?
            .into_iter()
            .map(|v| match v {
                Value::String(s) => Ok(s),
                other => bail!("non-string Census header {other}"),
            })
            .collect::<Result<Vec<_>>>()?;

        let rows = rows
            .map(|row| {
                row.into_iter()
                    .map(|v| match v {
                        Value::Null => None,
                        Value::String(s) => Some(s),
                        other => Some(other.to_string()),
                    })
                    .collect()
            })
            .collect();

        Ok(Self { headers, rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn column(&self, name: &str) -> Result<usize> {
        self.headers
            .iter()
            .position(|h| h == name)
            .with_context(|| format!("Census table has no {name} column"))
    }

    /// Iterates rows as column-name lookups.
    pub fn records(&self) -> impl Iterator<Item = HashMap<&str, &str>> {
        self.rows.iter().map(|row| {
            self.headers
                .iter()
                .zip(row)
                .filter_map(|(h, v)| Some((h.as_str(), v.as_deref()?)))
                .collect()
        })
    }
}

/// 11-digit tract GEOID from the `state`, `county` and `tract` columns.
fn tract_geoid(record: &HashMap<&str, &str>) -> Option<String> {
    Some(format!(
        "{}{}{}",
        record.get("state")?,
        record.get("county")?,
        record.get("tract")?
    ))
}

pub fn income_records(table: &CensusTable) -> Result<Vec<IncomeRecord>> {
    table.column(MEDIAN_HOUSEHOLD_INCOME)?;
    table.column("tract")?;

    let rows: Vec<IncomeRecord> = table
        .records()
        .filter_map(|r| {
            Some(IncomeRecord {
                census_tract: tract_geoid(&r)?,
                median_household_income: r.get(MEDIAN_HOUSEHOLD_INCOME)?.parse().ok()?,
            })
        })
        .collect();
    log_parsed("income", rows.len(), table.len());
    Ok(rows)
}

pub fn tract_population_records(table: &CensusTable) -> Result<Vec<TractPopulation>> {
    table.column(TOTAL_POPULATION)?;
    table.column("tract")?;

    let rows: Vec<TractPopulation> = table
        .records()
        .filter_map(|r| {
            Some(TractPopulation {
                census_tract: tract_geoid(&r)?,
                population: r.get(TOTAL_POPULATION)?.parse().ok()?,
            })
        })
        .collect();
    log_parsed("tract_population", rows.len(), table.len());
    Ok(rows)
}

/// County estimates restricted to the vintage row named by `date_desc`.
pub fn county_population_records(
    table: &CensusTable,
    date_desc: &str,
) -> Result<Vec<CountyPopulation>> {
    for column in ["COUNTY", "DATE_DESC", "POP", "GEONAME"] {
        table.column(column)?;
    }

    let rows: Vec<CountyPopulation> = table
        .records()
        .filter(|r| r.get("DATE_DESC") == Some(&date_desc))
        .filter_map(|r| {
            Some(CountyPopulation {
                county: r.get("COUNTY")?.to_string(),
                geoname: r.get("GEONAME")?.to_string(),
                date_code: r.get("DATE_CODE").unwrap_or(&"").to_string(),
                date_desc: r.get("DATE_DESC")?.to_string(),
                density: r.get("DENSITY").and_then(|d| d.parse().ok()),
                population: r.get("POP")?.parse().ok()?,
            })
        })
        .collect();
    if rows.is_empty() && !table.is_empty() {
        warn!(date_desc, "No county rows matched the requested estimate date");
    }
    log_parsed("county_population", rows.len(), table.len());
    Ok(rows)
}

fn log_parsed(table: &str, rows: usize, total: usize) {
    if rows < total {
        warn!(table, rows, total, "Census rows dropped during parsing");
    }
    info!(table, rows, "Census table parsed");
}

/// A Census API table, fetched from `location` and converted to rows.
pub struct CensusSource<T> {
    name: &'static str,
    client: Arc<dyn HttpClient>,
    location: String,
    convert: Box<dyn Fn(&CensusTable) -> Result<Vec<T>> + Send + Sync>,
}

impl CensusSource<IncomeRecord> {
    pub fn income(client: Arc<dyn HttpClient>, location: String) -> Self {
        Self {
            name: "income",
            client,
            location,
            convert: Box::new(income_records),
        }
    }
}

impl CensusSource<TractPopulation> {
    pub fn tract_population(client: Arc<dyn HttpClient>, location: String) -> Self {
        Self {
            name: "tract_population",
            client,
            location,
            convert: Box::new(tract_population_records),
        }
    }
}

impl CensusSource<CountyPopulation> {
    pub fn county_population(client: Arc<dyn HttpClient>, location: String, date_desc: String) -> Self {
        Self {
            name: "county_population",
            client,
            location,
            convert: Box::new(move |table: &CensusTable| {
                county_population_records(table, &date_desc)
            }),
        }
    }
}

#[async_trait]
impl<T: Send + Sync + 'static> TabularSource<Vec<T>> for CensusSource<T> {
    fn name(&self) -> &str {
        self.name
    }

    async fn fetch(&self) -> Result<Vec<T>> {
        let bytes = fetch_location(self.client.as_ref(), &self.location).await?;
        let table = CensusTable::parse(&bytes).with_context(|| format!("parsing {}", self.name))?;
        (self.convert)(&table)
    }
}
