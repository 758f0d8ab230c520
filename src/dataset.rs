//! Dataset: routes rows into a chain of fragments and stitches the chain
//! back into one file on close.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::fragment::{
    Fragment, SealedFragment, PARENT_ID_COLUMN, RESULT_NAME_COLUMN, RUN_ID_COLUMN, STEP_ID_COLUMN,
};
use crate::options::Options;
use crate::value::Value;

/// The kind of a logical row event; decides the namespace prefix applied to
/// caller-supplied keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowKind {
    Plan,
    Step,
    Result,
}

impl RowKind {
    fn scalar_prefix(&self) -> &'static str {
        match self {
            RowKind::Plan => "Plan/",
            // Result rows carry their step's parameters as scalars.
            RowKind::Step | RowKind::Result => "Step/",
        }
    }
}

const RESULT_PREFIX: &str = "Result/";

/// The identity tuple attached to every row; all parts optional.
#[derive(Debug, Clone, Default)]
pub struct RowIdentity {
    pub result_name: Option<String>,
    pub run_id: Option<String>,
    pub parent_id: Option<String>,
    pub step_id: Option<String>,
}

/// Incrementally builds one Parquet file from a stream of heterogeneous
/// rows whose column set can grow as rows arrive.
///
/// Rows go to the newest fragment. When the active fragment's schema is
/// already committed and a row needs a new column, the fragment is sealed
/// and a successor inheriting all columns discovered so far takes over.
/// [`close`](Self::close) reconciles the chain into a single file at the
/// target path, holding the union of all columns, rows in submission order.
///
/// Single-writer: one dataset is driven by one caller at a time; callers
/// needing concurrent ingestion must serialize externally.
pub struct Dataset {
    path: PathBuf,
    options: Arc<Options>,
    sealed: Vec<SealedFragment>,
    current: Option<Fragment>,
    next_fragment: usize,
}

impl Dataset {
    /// Create a dataset that will produce its file at `path` once closed.
    ///
    /// Fragments are buffered in `<path>-<n>.tmp` files next to the target;
    /// a fault before `close` completes leaves those behind and the caller
    /// is expected to discard them along with any partial output.
    pub fn create(path: impl Into<PathBuf>, options: Options) -> Result<Self> {
        if options.row_block_size == 0 {
            return Err(Error::InvalidArgumentError(
                "row_block_size must be positive".into(),
            ));
        }
        let mut dataset = Self {
            path: path.into(),
            options: Arc::new(options),
            sealed: Vec::new(),
            current: None,
            next_fragment: 0,
        };
        let first = Fragment::create(dataset.next_temp_path(), Arc::clone(&dataset.options))?;
        dataset.current = Some(first);
        Ok(dataset)
    }

    /// The final path of the output file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of fragments in the chain so far.
    pub fn fragment_count(&self) -> usize {
        self.sealed.len() + usize::from(self.current.is_some())
    }

    /// Add a result row: a step's published result table column values,
    /// producing `max(1, longest array)` rows.
    pub fn add_result_row(
        &mut self,
        result_name: impl Into<String>,
        run_id: impl Into<String>,
        parent_id: impl Into<String>,
        step_id: impl Into<String>,
        parameters: HashMap<String, Value>,
        results: HashMap<String, Vec<Value>>,
    ) -> Result<()> {
        let identity = RowIdentity {
            result_name: Some(result_name.into()),
            run_id: Some(run_id.into()),
            parent_id: Some(parent_id.into()),
            step_id: Some(step_id.into()),
        };
        self.add_row(RowKind::Result, identity, parameters, results)
    }

    /// Add a single step row without results.
    pub fn add_step_row(
        &mut self,
        run_id: impl Into<String>,
        parent_id: impl Into<String>,
        step_id: impl Into<String>,
        parameters: HashMap<String, Value>,
    ) -> Result<()> {
        let identity = RowIdentity {
            result_name: None,
            run_id: Some(run_id.into()),
            parent_id: Some(parent_id.into()),
            step_id: Some(step_id.into()),
        };
        self.add_row(RowKind::Step, identity, parameters, HashMap::new())
    }

    /// Add a single plan row.
    pub fn add_plan_row(
        &mut self,
        plan_id: impl Into<String>,
        parameters: HashMap<String, Value>,
    ) -> Result<()> {
        let identity = RowIdentity {
            run_id: Some(plan_id.into()),
            ..RowIdentity::default()
        };
        self.add_row(RowKind::Plan, identity, parameters, HashMap::new())
    }

    /// Add a row of any kind.
    ///
    /// Caller keys are namespaced (`Plan/`, `Step/`, `Result/`) and the
    /// identity columns injected. Retries through fragment rollover until
    /// the row is accepted; a fresh fragment accepts anything.
    pub fn add_row(
        &mut self,
        kind: RowKind,
        identity: RowIdentity,
        scalars: HashMap<String, Value>,
        arrays: HashMap<String, Vec<Value>>,
    ) -> Result<()> {
        if self.current.is_none() {
            return Err(Error::InvalidArgumentError("dataset is closed".into()));
        }

        let mut scalar_row: BTreeMap<String, Value> = scalars
            .into_iter()
            .map(|(key, value)| (format!("{}{key}", kind.scalar_prefix()), value))
            .collect();
        if let Some(name) = identity.result_name {
            scalar_row.insert(RESULT_NAME_COLUMN.to_string(), Value::Utf8(name));
        }
        if let Some(id) = identity.run_id {
            scalar_row.insert(RUN_ID_COLUMN.to_string(), Value::Utf8(id));
        }
        if let Some(id) = identity.parent_id {
            scalar_row.insert(PARENT_ID_COLUMN.to_string(), Value::Utf8(id));
        }
        if let Some(id) = identity.step_id {
            scalar_row.insert(STEP_ID_COLUMN.to_string(), Value::Utf8(id));
        }
        let array_row: BTreeMap<String, Vec<Value>> = arrays
            .into_iter()
            .map(|(key, values)| (format!("{RESULT_PREFIX}{key}"), values))
            .collect();

        loop {
            let current = self
                .current
                .as_mut()
                .ok_or_else(|| Error::Internal("active fragment missing".into()))?;
            if current.add_rows(&scalar_row, &array_row)? {
                return Ok(());
            }
            self.roll_fragment()?;
        }
    }

    /// Seal the active fragment and chain a successor forked from it.
    fn roll_fragment(&mut self) -> Result<()> {
        let current = self
            .current
            .take()
            .ok_or_else(|| Error::Internal("active fragment missing".into()))?;
        let next_path = self.next_temp_path();
        let (sealed, successor) = current.fork(next_path)?;
        tracing::info!(
            fragment = self.sealed.len() + 1,
            "schema grew; chained a new fragment"
        );
        self.sealed.push(sealed);
        self.current = Some(successor);
        Ok(())
    }

    /// Reconcile the fragment chain into the final file.
    ///
    /// Every sealed fragment is reprojected, oldest first, onto the final
    /// superset schema; the buffered tail rows are flushed last so the file
    /// holds all rows in exact submission order. The finished temp file is
    /// then renamed onto the target path and the other temp files removed.
    pub fn close(mut self) -> Result<()> {
        let current = self
            .current
            .take()
            .ok_or_else(|| Error::InvalidArgumentError("dataset is closed".into()))?;

        let final_path = if self.sealed.is_empty() {
            // Single fragment: already in submission order. Finishing also
            // commits the schema when the stream ended before any flush.
            current.finish()?
        } else {
            // The collector must not have blocks of its own, otherwise the
            // merged rows would land after them.
            let mut collector = if current.is_committed() {
                let next_path = self.next_temp_path();
                let (sealed, successor) = current.fork(next_path)?;
                self.sealed.push(sealed);
                successor
            } else {
                current
            };
            collector.commit_schema()?;
            for sealed in &self.sealed {
                collector.merge_from(sealed)?;
            }
            collector.finish()?
        };

        // Unix rename replaces the target in place; platforms that refuse
        // to clobber get a delete then a retry.
        if fs::rename(&final_path, &self.path).is_err() {
            match fs::remove_file(&self.path) {
                Ok(()) => {}
                Err(error) if error.kind() == io::ErrorKind::NotFound => {}
                Err(error) => return Err(error.into()),
            }
            fs::rename(&final_path, &self.path)?;
        }

        for sealed in &self.sealed {
            if let Err(error) = fs::remove_file(sealed.path()) {
                tracing::warn!(path = ?sealed.path(), %error, "failed to remove temp fragment");
            }
        }
        tracing::info!(path = ?self.path, "finalized dataset");
        Ok(())
    }

    fn next_temp_path(&mut self) -> PathBuf {
        let path = PathBuf::from(format!("{}-{}.tmp", self.path.display(), self.next_fragment));
        self.next_fragment += 1;
        path
    }
}
