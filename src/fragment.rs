//! Fragments: the buffering/schema-evolution unit.
//!
//! A fragment owns one temporary Parquet file and a set of
//! [`PhysicalColumn`] buffers. While no block has been flushed the schema is
//! open and new columns may appear (fanning out per source kind, with
//! collision-driven renames). The first flush commits the schema; from then
//! on the fragment only accepts rows it already has columns for, and the
//! dataset reacts to rejection by forking a successor that inherits the
//! column map, metadata, and pending rows.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arrow::array::{new_null_array, ArrayRef};
use arrow::datatypes::{FieldRef, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use chrono::Utc;
use parquet::arrow::ArrowWriter;
use parquet::format::KeyValue;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::column::PhysicalColumn;
use crate::error::{Error, Result};
use crate::options::Options;
use crate::reader::BlockReader;
use crate::value::{build_array, Value, ValueKind};

/// Identity columns pre-registered in every fragment, always first in the
/// schema, each a nullable string.
pub const RESULT_NAME_COLUMN: &str = "ResultName";
pub const RUN_ID_COLUMN: &str = "RunId";
pub const PARENT_ID_COLUMN: &str = "ParentId";
pub const STEP_ID_COLUMN: &str = "StepId";

/// File-level metadata keys.
pub const SCHEMA_VERSION_KEY: &str = "SchemaVersion";
pub const TIME_KEY: &str = "Time";
pub const WRITER_VERSION_KEY: &str = "WriterVersion";
pub const MAPPINGS_KEY: &str = "Mappings";

const SCHEMA_VERSION: &str = "1.0.0";

static NEXT_LINEAGE: AtomicU64 = AtomicU64::new(0);

/// A fragment whose file has been finalized and whose buffered state has
/// moved on to a successor. Only good for merging and deleting.
pub(crate) struct SealedFragment {
    path: PathBuf,
    lineage: u64,
}

impl SealedFragment {
    pub(crate) fn path(&self) -> &PathBuf {
        &self.path
    }
}

pub(crate) struct Fragment {
    path: PathBuf,
    options: Arc<Options>,
    /// Shared by every fragment forked from the same root; merge refuses
    /// fragments from a different lineage.
    lineage: u64,
    /// Registration order; identity columns first.
    columns: Vec<PhysicalColumn>,
    /// Logical name -> indexes into `columns`, one per source kind seen.
    by_logical: FxHashMap<String, Vec<usize>>,
    /// Uniqueness guard over every on-disk name ever handed out here.
    used_disk_names: FxHashSet<String>,
    /// On-disk name -> logical name, for every column whose names differ.
    rename_mappings: BTreeMap<String, String>,
    metadata: BTreeMap<String, String>,
    pending_rows: usize,
    file: Option<File>,
    writer: Option<ArrowWriter<File>>,
    schema: Option<SchemaRef>,
}

impl Fragment {
    pub(crate) fn create(path: PathBuf, options: Arc<Options>) -> Result<Self> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        let file = File::create(&path)?;
        let mut fragment = Self {
            path,
            options,
            lineage: NEXT_LINEAGE.fetch_add(1, Ordering::Relaxed),
            columns: Vec::new(),
            by_logical: FxHashMap::default(),
            used_disk_names: FxHashSet::default(),
            rename_mappings: BTreeMap::new(),
            metadata: BTreeMap::new(),
            pending_rows: 0,
            file: Some(file),
            writer: None,
            schema: None,
        };
        for name in [
            RESULT_NAME_COLUMN,
            RUN_ID_COLUMN,
            PARENT_ID_COLUMN,
            STEP_ID_COLUMN,
        ] {
            fragment.create_column(name, ValueKind::Utf8)?;
        }
        Ok(fragment)
    }

    pub(crate) fn is_committed(&self) -> bool {
        self.writer.is_some()
    }

    /// Absorb a row batch into the buffers.
    ///
    /// Returns `Ok(false)` when, and only when, the schema is committed and
    /// the batch needs a (logical name, source kind) pair with no column yet.
    /// Rejection mutates nothing; the caller recovers by forking. On
    /// acceptance the call may flush one or more blocks as a side effect.
    pub(crate) fn add_rows(
        &mut self,
        scalars: &BTreeMap<String, Value>,
        arrays: &BTreeMap<String, Vec<Value>>,
    ) -> Result<bool> {
        if self.is_committed() {
            for (name, value) in scalars {
                if self.column_for(name, value.kind()).is_none() {
                    return Ok(false);
                }
            }
            for (name, array) in arrays {
                if let Some(first) = array.first() {
                    if self.column_for(name, first.kind()).is_none() {
                        return Ok(false);
                    }
                }
            }
        } else {
            for (name, value) in scalars {
                if self.column_for(name, value.kind()).is_none() {
                    self.create_column(name, value.kind())?;
                }
            }
            for (name, array) in arrays {
                if let Some(first) = array.first() {
                    if self.column_for(name, first.kind()).is_none() {
                        self.create_column(name, first.kind())?;
                    }
                }
            }
        }

        let row_count = arrays.values().map(Vec::len).max().unwrap_or(0).max(1);
        let block_size = self.options.row_block_size;
        let mut start = 0;
        while start < row_count {
            let count = (block_size - self.pending_rows).min(row_count - start);
            for column in &mut self.columns {
                if let Some(array) = arrays.get(column.logical_name()) {
                    if array.first().map(Value::kind) == Some(column.source_kind()) {
                        column.push_array(array, start, count);
                        continue;
                    }
                }
                match scalars.get(column.logical_name()) {
                    Some(value) if value.kind() == column.source_kind() => {
                        column.push_scalar(Some(value), count);
                    }
                    _ => column.push_nulls(count),
                }
            }
            self.pending_rows += count;
            start += count;
            if self.pending_rows >= block_size {
                self.flush_block()?;
            }
        }
        Ok(true)
    }

    fn column_for(&self, logical: &str, kind: ValueKind) -> Option<usize> {
        self.by_logical
            .get(logical)?
            .iter()
            .copied()
            .find(|&idx| self.columns[idx].source_kind() == kind)
    }

    /// Register a column for a (logical name, source kind) pair.
    ///
    /// Collision policy, only reachable pre-commit: the first kind owns the
    /// plain name; when a second kind arrives the first column is renamed to
    /// `logical/Kind` (unless its descriptor is already frozen from an
    /// inherited schema) and the newcomer is created under its own suffixed
    /// name. Every on-disk name passes through [`Self::find_unique_name`].
    fn create_column(&mut self, logical: &str, kind: ValueKind) -> Result<()> {
        let existing: Vec<usize> = self.by_logical.get(logical).cloned().unwrap_or_default();

        if let [idx] = existing[..] {
            if !self.columns[idx].is_renamed() {
                let base = format!("{}/{}", logical, self.columns[idx].source_kind().name());
                let new_name = self.find_unique_name(&base)?;
                if self.columns[idx].try_set_disk_name(new_name.clone()) {
                    self.used_disk_names.insert(new_name.clone());
                    self.rename_mappings.insert(new_name, logical.to_string());
                }
            }
        }

        let base = if existing.is_empty() {
            logical.to_string()
        } else {
            format!("{}/{}", logical, kind.name())
        };
        let disk_name = self.find_unique_name(&base)?;
        self.used_disk_names.insert(disk_name.clone());
        if disk_name != logical {
            self.rename_mappings
                .insert(disk_name.clone(), logical.to_string());
        }

        let column = PhysicalColumn::new(
            logical,
            kind,
            disk_name,
            self.options.row_block_size,
            self.pending_rows,
        );
        let idx = self.columns.len();
        self.columns.push(column);
        self.by_logical
            .entry(logical.to_string())
            .or_default()
            .push(idx);
        Ok(())
    }

    /// Append an increasing numeric suffix until the name is free.
    fn find_unique_name(&self, base: &str) -> Result<String> {
        if !self.used_disk_names.contains(base) {
            return Ok(base.to_string());
        }
        for suffix in 1..=u32::MAX {
            let candidate = format!("{base}{suffix}");
            if !self.used_disk_names.contains(&candidate) {
                return Ok(candidate);
            }
        }
        Err(Error::Internal(format!(
            "on-disk name space exhausted for column {base}"
        )))
    }

    /// Materialize the schema and open the Parquet writer.
    ///
    /// This is the commit point: every column descriptor is frozen here, and
    /// from here on the fragment rejects rows needing new columns. Metadata
    /// entries inherited from a predecessor are kept as-is.
    pub(crate) fn commit_schema(&mut self) -> Result<()> {
        if self.writer.is_some() {
            return Ok(());
        }
        let fields: Vec<FieldRef> = self
            .columns
            .iter_mut()
            .map(PhysicalColumn::descriptor)
            .collect();
        let properties = self.options.writer_properties(&fields)?;
        let schema: SchemaRef = Arc::new(Schema::new(fields));
        let file = self
            .file
            .take()
            .ok_or_else(|| Error::Internal("fragment file already consumed".into()))?;
        let mut writer = ArrowWriter::try_new(file, Arc::clone(&schema), Some(properties))?;

        self.metadata
            .entry(SCHEMA_VERSION_KEY.to_string())
            .or_insert_with(|| SCHEMA_VERSION.to_string());
        self.metadata
            .entry(TIME_KEY.to_string())
            .or_insert_with(|| Utc::now().to_rfc3339());
        self.metadata
            .entry(WRITER_VERSION_KEY.to_string())
            .or_insert_with(|| env!("CARGO_PKG_VERSION").to_string());
        for (key, value) in &self.metadata {
            writer.append_key_value_metadata(KeyValue::new(key.clone(), value.clone()));
        }
        if !self.rename_mappings.is_empty() {
            let mappings = serde_json::to_string(&self.rename_mappings)
                .map_err(|e| Error::Internal(format!("failed to encode rename map: {e}")))?;
            writer.append_key_value_metadata(KeyValue::new(MAPPINGS_KEY.to_string(), mappings));
        }

        tracing::debug!(columns = schema.fields().len(), path = ?self.path, "committed schema");
        self.schema = Some(schema);
        self.writer = Some(writer);
        Ok(())
    }

    /// Flush the pending rows as one block (Parquet row group).
    pub(crate) fn flush_block(&mut self) -> Result<()> {
        self.commit_schema()?;
        if self.pending_rows == 0 {
            return Ok(());
        }
        let schema = self
            .schema
            .clone()
            .ok_or_else(|| Error::Internal("schema missing after commit".into()))?;
        let mut columns: Vec<ArrayRef> = Vec::with_capacity(self.columns.len());
        for column in &mut self.columns {
            let slots = column.take_block();
            debug_assert_eq!(slots.len(), self.pending_rows);
            columns.push(build_array(column.storage_kind(), &slots)?);
        }
        let batch = RecordBatch::try_new(schema, columns)?;
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| Error::Internal("writer missing after commit".into()))?;
        writer.write(&batch)?;
        writer.flush()?;
        tracing::debug!(rows = self.pending_rows, path = ?self.path, "flushed block");
        self.pending_rows = 0;
        Ok(())
    }

    /// Seal this fragment's file and hand its live state to a successor.
    ///
    /// The pending rows are *not* flushed here: they move, still buffered,
    /// into the successor and are eventually written under the successor's
    /// wider schema. The sealed file holds only complete blocks.
    pub(crate) fn fork(mut self, next_path: PathBuf) -> Result<(SealedFragment, Fragment)> {
        let writer = self
            .writer
            .take()
            .ok_or_else(|| Error::Internal("only a committed fragment can be forked".into()))?;
        writer.close()?;
        tracing::info!(path = ?self.path, pending = self.pending_rows, "sealed fragment");

        if let Some(dir) = next_path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        let file = File::create(&next_path)?;
        let successor = Fragment {
            path: next_path,
            options: Arc::clone(&self.options),
            lineage: self.lineage,
            columns: self.columns,
            by_logical: self.by_logical,
            used_disk_names: self.used_disk_names,
            rename_mappings: self.rename_mappings,
            metadata: self.metadata,
            pending_rows: self.pending_rows,
            file: Some(file),
            writer: None,
            schema: None,
        };
        Ok((
            SealedFragment {
                path: self.path,
                lineage: self.lineage,
            },
            successor,
        ))
    }

    /// Reproject a sealed fragment's blocks onto this fragment's schema.
    ///
    /// One output block per source block. Columns absent from the source get
    /// an all-null array; for full-size blocks the null array is cached and
    /// reused since most blocks are exactly `row_block_size` rows.
    pub(crate) fn merge_from(&mut self, other: &SealedFragment) -> Result<()> {
        if other.lineage != self.lineage {
            return Err(Error::InvalidArgumentError(
                "cannot merge fragments that do not share a common ancestor".into(),
            ));
        }
        self.commit_schema()?;
        let schema = self
            .schema
            .clone()
            .ok_or_else(|| Error::Internal("schema missing after commit".into()))?;

        let mut null_cache: FxHashMap<String, ArrayRef> = FxHashMap::default();
        for block in BlockReader::open(&other.path)? {
            let batch = block?;
            let rows = batch.num_rows();
            let mut columns: Vec<ArrayRef> = Vec::with_capacity(schema.fields().len());
            for field in schema.fields() {
                match batch.column_by_name(field.name()) {
                    Some(column) if column.data_type() == field.data_type() => {
                        columns.push(Arc::clone(column));
                    }
                    Some(column) => {
                        return Err(Error::Internal(format!(
                            "column {} changed type across fragments ({} vs {})",
                            field.name(),
                            column.data_type(),
                            field.data_type(),
                        )));
                    }
                    None if rows == self.options.row_block_size => {
                        let array = null_cache
                            .entry(field.name().clone())
                            .or_insert_with(|| new_null_array(field.data_type(), rows));
                        columns.push(Arc::clone(array));
                    }
                    None => columns.push(new_null_array(field.data_type(), rows)),
                }
            }
            let out = RecordBatch::try_new(Arc::clone(&schema), columns)?;
            let writer = self
                .writer
                .as_mut()
                .ok_or_else(|| Error::Internal("writer missing after commit".into()))?;
            writer.write(&out)?;
            writer.flush()?;
        }
        tracing::debug!(from = ?other.path, "merged fragment");
        Ok(())
    }

    /// Flush any pending rows and finalize the file. Returns its path.
    pub(crate) fn finish(mut self) -> Result<PathBuf> {
        self.flush_block()?;
        let writer = self
            .writer
            .take()
            .ok_or_else(|| Error::Internal("writer missing after flush".into()))?;
        writer.close()?;
        Ok(self.path)
    }
}
