//! Block-granular read-back utilities.
//!
//! The merge pass needs to see a finished fragment one block at a time so
//! block boundaries survive reprojection; tests use the same helpers to
//! verify finished files. One block = one Parquet row group.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use arrow::compute::concat_batches;
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use crate::error::Result;

/// Iterator yielding one `RecordBatch` per row group of a Parquet file.
pub struct BlockReader {
    path: PathBuf,
    num_groups: usize,
    next: usize,
}

impl BlockReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
        let num_groups = builder.metadata().num_row_groups();
        Ok(Self {
            path: path.as_ref().to_path_buf(),
            num_groups,
            next: 0,
        })
    }

    /// Number of blocks in the file.
    pub fn block_count(&self) -> usize {
        self.num_groups
    }

    fn read_group(&self, group: usize) -> Result<RecordBatch> {
        let file = File::open(&self.path)?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
        let rows = builder.metadata().row_group(group).num_rows() as usize;
        let schema = builder.schema().clone();
        let reader = builder
            .with_row_groups(vec![group])
            .with_batch_size(rows.max(1))
            .build()?;
        let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(concat_batches(&schema, &batches)?)
    }
}

impl Iterator for BlockReader {
    type Item = Result<RecordBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.num_groups {
            return None;
        }
        let group = self.next;
        self.next += 1;
        Some(self.read_group(group))
    }
}

/// Read a whole file into a single `RecordBatch`, concatenating all blocks
/// in file order.
pub fn read_file(path: impl AsRef<Path>) -> Result<RecordBatch> {
    let file = File::open(path.as_ref())?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let schema = builder.schema().clone();
    let reader = builder.build()?;
    let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(concat_batches(&schema, &batches)?)
}

/// Read a file's key/value metadata.
pub fn file_metadata(path: impl AsRef<Path>) -> Result<BTreeMap<String, String>> {
    let file = File::open(path.as_ref())?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let mut out = BTreeMap::new();
    if let Some(entries) = builder.metadata().file_metadata().key_value_metadata() {
        for entry in entries {
            if let Some(value) = &entry.value {
                out.insert(entry.key.clone(), value.clone());
            }
        }
    }
    Ok(out)
}
