//! Incremental Parquet writer for heterogeneous row streams with evolving
//! schemas.
//!
//! Rows arrive as loosely-typed name/value maps and the full column set is
//! not known up front: new columns appear as rows arrive, and the same
//! logical name may carry different value types over time. [`Dataset`]
//! absorbs such a stream and produces one Parquet file holding every row in
//! submission order under the union of all columns ever seen.
//!
//! Internally rows are buffered into fragments, each a temporary Parquet
//! file whose schema freezes at its first flush. When a committed fragment
//! cannot take a row that needs a new column, the dataset seals it and
//! chains a successor inheriting everything learned so far. Closing the
//! dataset reprojects the sealed fragments onto the final superset schema
//! and renames the result onto the target path.
//!
//! ```no_run
//! use std::collections::HashMap;
//! use rowsink::{Dataset, Options, Value};
//!
//! # fn main() -> rowsink::Result<()> {
//! let mut dataset = Dataset::create("run.parquet", Options::default())?;
//! dataset.add_result_row(
//!     "Voltage Sweep",
//!     "run-1",
//!     "plan-1",
//!     "step-1",
//!     HashMap::from([("Nominal".to_string(), Value::Float64(3.3))]),
//!     HashMap::from([(
//!         "Measured".to_string(),
//!         vec![Value::Float64(3.29), Value::Float64(3.31)],
//!     )]),
//! )?;
//! dataset.close()?;
//! # Ok(())
//! # }
//! ```

mod column;
mod dataset;
mod error;
mod fragment;
mod options;
mod reader;
mod value;

pub use dataset::{Dataset, RowIdentity, RowKind};
pub use error::{Error, Result};
pub use fragment::{
    MAPPINGS_KEY, PARENT_ID_COLUMN, RESULT_NAME_COLUMN, RUN_ID_COLUMN, SCHEMA_VERSION_KEY,
    STEP_ID_COLUMN, TIME_KEY, WRITER_VERSION_KEY,
};
pub use options::{CompressionCodec, Options};
pub use reader::{file_metadata, read_file, BlockReader};
pub use value::{Value, ValueKind};
