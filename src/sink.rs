//! Append-only metadata output
//!
//! Records go to a CSV file with a fixed header. Fields containing the
//! delimiter, quotes or newlines are quoted by the `csv` writer, so a reader
//! using the same dialect reproduces them byte-for-byte. A single mutex-guarded
//! writer serializes appends from concurrent workers.

use crate::error::Result;
use crate::types::ItemMetadata;
use csv::Writer;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Header written as the first record of every metadata file
pub const HEADER: [&str; 4] = ["Title", "Year", "Authors", "Asset-Link"];

/// Serialized writer for [`ItemMetadata`] records
pub struct MetadataSink {
    path: PathBuf,
    writer: Mutex<Writer<BufWriter<File>>>,
}

impl MetadataSink {
    /// Truncate (or create) `path` and write the header record
    pub fn initialize(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let file = File::create(path)?;
        let mut writer = Writer::from_writer(BufWriter::new(file));
        writer.write_record(HEADER)?;
        writer.flush()?;

        tracing::info!(path = %path.display(), "Initialized metadata file");
        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(writer),
        })
    }

    /// Append exactly one record and flush it to disk
    pub fn append(&self, record: &ItemMetadata) -> Result<()> {
        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        writer.write_record([
            record.title.as_str(),
            record.period_id.as_str(),
            record.authors.as_str(),
            record.asset_url.as_str(),
        ])?;
        writer.flush()?;

        tracing::debug!(title = %record.title, period = %record.period_id, "Metadata record written");
        Ok(())
    }

    /// Location of the metadata file
    pub fn path(&self) -> &Path {
        &self.path
    }
}
