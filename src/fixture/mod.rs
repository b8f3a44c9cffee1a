//! Local JSON fixture of GBtr transactions.
//!
//! The fixture uses its own upper-case field names and carries an `OBJECT`
//! column the contract record does not have. Items are kept in that shape and
//! converted with [`FixtureItem::to_record`].

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::contracts::GBtr;

#[derive(Debug, thiserror::Error)]
pub enum FixtureError {
    #[error("failed to read fixture {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse fixture {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("fixture item {index} has no OBJ_UIT")]
    MissingUnit { index: usize },
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FixtureItem {
    #[serde(rename = "OBJ_UIT")]
    pub obj_uit: String,
    #[serde(rename = "OBJ_QTY")]
    pub obj_qty: f32,
    #[serde(rename = "TSENDER")]
    pub tsender: String,
    #[serde(rename = "TICK")]
    pub tick: i64,
    #[serde(rename = "OBJECT")]
    pub object: String,
    #[serde(rename = "TRECEIVER")]
    pub treceiver: String,
}

impl FixtureItem {
    /// Maps the item onto the contract record. `OBJECT` is dropped.
    pub fn to_record(&self, index: usize) -> Result<GBtr, FixtureError> {
        if self.obj_uit.trim().is_empty() {
            return Err(FixtureError::MissingUnit { index });
        }
        Ok(GBtr::new(
            self.obj_uit.clone(),
            self.obj_qty,
            self.tsender.clone(),
            self.tick,
            self.treceiver.clone(),
        ))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FixtureFile {
    #[serde(default)]
    pub items: Vec<FixtureItem>,
}

impl FixtureFile {
    pub fn parse(path: &Path, data: &[u8]) -> Result<Self, FixtureError> {
        serde_json::from_slice(data).map_err(|source| FixtureError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Converts every item, stopping at the first one that does not map.
    pub fn records(&self) -> Result<Vec<GBtr>, FixtureError> {
        self.items
            .iter()
            .enumerate()
            .map(|(i, item)| item.to_record(i))
            .collect()
    }
}

/// Reads the fixture file and returns its raw bytes along with the decoded
/// items, so callers can echo the file as loaded.
pub fn load_fixture(path: &Path) -> Result<(Vec<u8>, FixtureFile), FixtureError> {
    let data = fs::read(path).map_err(|source| FixtureError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let file = FixtureFile::parse(path, &data)?;
    Ok((data, file))
}
