//! CSV device inventory.
//!
//! Header columns: `host,username,password,port,identificacao,tipo,vendor`
//! with an optional trailing `secret`. `label`/`identification` and
//! `device_class`/`class` are accepted as well.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::core::models::DeviceRecord;
use crate::error::BackupError;

/// An inventory whose header row has already been read.
pub struct Inventory<R> {
    path: PathBuf,
    reader: csv::Reader<R>,
}

/// Opens the inventory at `path` and reads its header row.
///
/// Nothing is written anywhere before this succeeds, so a missing or
/// unreadable inventory leaves no trace on disk.
pub fn open(path: &Path) -> Result<Inventory<File>, BackupError> {
    let file = File::open(path).map_err(|source| BackupError::InputSourceMissing {
        path: path.to_path_buf(),
        source,
    })?;
    Inventory::from_reader(file, path)
}

/// Reads every well-formed row of the inventory at `path`.
pub fn load(path: &Path) -> Result<Vec<DeviceRecord>, BackupError> {
    open(path)?.records()
}

pub fn parse<R: Read>(reader: R) -> Result<Vec<DeviceRecord>, BackupError> {
    Inventory::from_reader(reader, Path::new("<inventory>"))?.records()
}

impl<R: Read> Inventory<R> {
    pub fn from_reader(reader: R, path: &Path) -> Result<Self, BackupError> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(reader);

        reader.headers().map_err(|e| unreadable(path, e))?;

        Ok(Self {
            path: path.to_path_buf(),
            reader,
        })
    }

    /// A read failure is fatal for the batch. Rows that fail to parse are
    /// skipped with a warning so one bad line does not cost the rest.
    pub fn records(mut self) -> Result<Vec<DeviceRecord>, BackupError> {
        let mut records = Vec::new();

        for (row, result) in self.reader.deserialize::<DeviceRecord>().enumerate() {
            match result {
                Ok(record) => records.push(record),
                Err(e) if matches!(e.kind(), csv::ErrorKind::Io(_)) => {
                    return Err(unreadable(&self.path, e));
                }
                Err(e) => {
                    // Header is line 1
                    warn!(line = row + 2, error = %e, "Skipping malformed inventory row");
                }
            }
        }

        debug!(path = %self.path.display(), devices = records.len(), "Inventory loaded");
        Ok(records)
    }
}

fn unreadable(path: &Path, error: csv::Error) -> BackupError {
    BackupError::InputSourceMissing {
        path: path.to_path_buf(),
        source: io::Error::from(error),
    }
}
