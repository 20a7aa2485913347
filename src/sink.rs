//! Rendering of the finalized [`Inventory`] into a tabular output.
//!
//! Each inventory entry becomes one [`InventoryRow`], rows are ordered by composite key. The
//! output is either CSV with a header row or a JSON array of the same rows.
use std::io::Write;
use std::str::FromStr;

use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use tracing::{info, instrument};

use crate::error::Error;
use crate::inventory::Inventory;
use crate::trace::RequestRecord;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Csv,
    Json,
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            _ => Err(Error::ConfigValue("inventory.format")),
        }
    }
}

const HEADER: [&str; 11] = [
    "composite_key",
    "client_id",
    "role",
    "topic",
    "auth",
    "principal",
    "ip_address",
    "timestamp",
    "source_file",
    "line_number",
    "raw_line",
];

/// Flat representation of a single inventory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InventoryRow {
    pub composite_key: String,
    pub client_id: String,
    pub role: &'static str,
    pub topic: String,
    pub auth: &'static str,
    pub principal: String,
    pub ip_address: String,
    pub timestamp: String,
    pub source_file: String,
    pub line_number: usize,
    pub raw_line: String,
}

impl TryFrom<&RequestRecord> for InventoryRow {
    type Error = time::error::Format;

    fn try_from(record: &RequestRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            composite_key: record.composite_key().to_owned(),
            client_id: record.client_id().to_owned(),
            role: record.role().as_str(),
            topic: record.topic().to_owned(),
            auth: record.auth().as_str(),
            principal: record.principal().to_owned(),
            ip_address: record
                .ip_address()
                .map(|ip| ip.to_string())
                .unwrap_or_default(),
            timestamp: record.timestamp().format(&Rfc3339)?,
            source_file: record.source_file().to_owned(),
            line_number: record.line_number(),
            raw_line: record.raw_line().to_owned(),
        })
    }
}

/// Converts all inventory entries into rows, ordered by composite key.
pub fn rows(inventory: &Inventory) -> Result<Vec<InventoryRow>, Error> {
    inventory
        .rows()
        .map(|record| InventoryRow::try_from(record).map_err(Error::from))
        .collect()
}

/// Writes the inventory to `writer` in the given `format`, returns the number of rows.
#[instrument(name = "emit", skip(inventory, writer))]
pub fn write_inventory<W: Write>(
    inventory: &Inventory,
    format: OutputFormat,
    writer: W,
) -> Result<usize, Error> {
    let rows = rows(inventory)?;

    match format {
        OutputFormat::Csv => {
            // header is written upfront so that an empty inventory still has one
            let mut csv = csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(writer);
            csv.write_record(HEADER)?;
            for row in rows.iter() {
                csv.serialize(row)?;
            }
            csv.flush()?;
        }
        OutputFormat::Json => {
            let mut writer = writer;
            serde_json::to_writer_pretty(&mut writer, &rows)?;
            writer.flush()?;
        }
    }

    info!(rows = rows.len(), "inventory written");
    Ok(rows.len())
}
