use std::collections::HashMap;

use arrow::array::{Array, Float64Array, Int32Array, StringArray};
use arrow::record_batch::RecordBatch;
use tempfile::TempDir;

use rowsink::{
    file_metadata, read_file, BlockReader, Dataset, Options, Value, MAPPINGS_KEY,
    RESULT_NAME_COLUMN, RUN_ID_COLUMN, SCHEMA_VERSION_KEY, STEP_ID_COLUMN, TIME_KEY,
    WRITER_VERSION_KEY,
};

fn scalars(entries: &[(&str, Value)]) -> HashMap<String, Value> {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn arrays(entries: &[(&str, Vec<Value>)]) -> HashMap<String, Vec<Value>> {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> &'a StringArray {
    batch
        .column_by_name(name)
        .unwrap_or_else(|| panic!("missing column {name}"))
        .as_any()
        .downcast_ref::<StringArray>()
        .unwrap()
}

fn int_column<'a>(batch: &'a RecordBatch, name: &str) -> &'a Int32Array {
    batch
        .column_by_name(name)
        .unwrap_or_else(|| panic!("missing column {name}"))
        .as_any()
        .downcast_ref::<Int32Array>()
        .unwrap()
}

#[test]
fn empty_dataset_produces_identity_only_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("empty.parquet");

    let dataset = Dataset::create(&path, Options::default()).unwrap();
    dataset.close().unwrap();

    let batch = read_file(&path).unwrap();
    assert_eq!(batch.num_rows(), 0);
    let schema = batch.schema();
    let names: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
    assert_eq!(names, ["ResultName", "RunId", "ParentId", "StepId"]);
}

#[test]
fn zero_block_size_is_rejected() {
    let dir = TempDir::new().unwrap();
    let options = Options {
        row_block_size: 0,
        ..Options::default()
    };
    let err = match Dataset::create(dir.path().join("x.parquet"), options) {
        Ok(_) => panic!("zero block size must be rejected"),
        Err(err) => err,
    };
    assert!(err.to_string().contains("row_block_size"));
}

#[test]
fn single_result_row_round_trips() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("single.parquet");

    let mut dataset = Dataset::create(&path, Options::default()).unwrap();
    dataset
        .add_result_row(
            "Voltage",
            "run-1",
            "plan-1",
            "step-1",
            scalars(&[("Nominal", Value::Float64(3.3))]),
            arrays(&[]),
        )
        .unwrap();
    dataset.close().unwrap();

    let batch = read_file(&path).unwrap();
    assert_eq!(batch.num_rows(), 1);
    assert_eq!(string_column(&batch, RESULT_NAME_COLUMN).value(0), "Voltage");
    assert_eq!(string_column(&batch, RUN_ID_COLUMN).value(0), "run-1");
    assert_eq!(string_column(&batch, STEP_ID_COLUMN).value(0), "step-1");
    let nominal = batch
        .column_by_name("Step/Nominal")
        .unwrap()
        .as_any()
        .downcast_ref::<Float64Array>()
        .unwrap();
    assert_eq!(nominal.value(0), 3.3);
}

#[test]
fn plan_and_step_rows_use_their_prefixes() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("kinds.parquet");

    let mut dataset = Dataset::create(&path, Options::default()).unwrap();
    dataset
        .add_plan_row("plan-1", scalars(&[("Name", Value::from("Nightly"))]))
        .unwrap();
    dataset
        .add_step_row(
            "run-1",
            "plan-1",
            "step-1",
            scalars(&[("Verdict", Value::Enum("Pass".into()))]),
        )
        .unwrap();
    dataset.close().unwrap();

    let batch = read_file(&path).unwrap();
    assert_eq!(batch.num_rows(), 2);
    let plan_name = string_column(&batch, "Plan/Name");
    assert_eq!(plan_name.value(0), "Nightly");
    assert!(plan_name.is_null(1));
    let verdict = string_column(&batch, "Step/Verdict");
    assert!(verdict.is_null(0));
    assert_eq!(verdict.value(1), "Pass");
    // Plan rows leave the step identity columns null.
    assert!(string_column(&batch, STEP_ID_COLUMN).is_null(0));
    assert_eq!(string_column(&batch, STEP_ID_COLUMN).value(1), "step-1");
}

#[test]
fn type_collision_renames_both_columns_and_records_mappings() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("collide.parquet");

    let mut dataset = Dataset::create(&path, Options::default()).unwrap();
    dataset
        .add_step_row(
            "run-1",
            "plan-1",
            "step-1",
            scalars(&[("X", Value::Int32(7))]),
        )
        .unwrap();
    dataset
        .add_step_row(
            "run-1",
            "plan-1",
            "step-2",
            scalars(&[("X", Value::from("seven"))]),
        )
        .unwrap();
    dataset.close().unwrap();

    let batch = read_file(&path).unwrap();
    assert_eq!(batch.num_rows(), 2);
    assert!(batch.column_by_name("Step/X").is_none());

    let ints = int_column(&batch, "Step/X/Int32");
    assert_eq!(ints.value(0), 7);
    assert!(ints.is_null(1));
    let strings = string_column(&batch, "Step/X/Utf8");
    assert!(strings.is_null(0));
    assert_eq!(strings.value(1), "seven");

    let metadata = file_metadata(&path).unwrap();
    let mappings: HashMap<String, String> =
        serde_json::from_str(&metadata[MAPPINGS_KEY]).unwrap();
    assert_eq!(mappings["Step/X/Int32"], "Step/X");
    assert_eq!(mappings["Step/X/Utf8"], "Step/X");
}

#[test]
fn enum_column_created_by_collision_keeps_its_values() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("enum_collide.parquet");

    let mut dataset = Dataset::create(&path, Options::default()).unwrap();
    dataset
        .add_step_row(
            "run-1",
            "plan-1",
            "step-1",
            scalars(&[("Verdict", Value::Int32(7))]),
        )
        .unwrap();
    dataset
        .add_step_row(
            "run-1",
            "plan-1",
            "step-2",
            scalars(&[("Verdict", Value::Enum("Pass".into()))]),
        )
        .unwrap();
    dataset.close().unwrap();

    let batch = read_file(&path).unwrap();
    assert_eq!(batch.num_rows(), 2);
    let ints = int_column(&batch, "Step/Verdict/Int32");
    assert_eq!(ints.value(0), 7);
    assert!(ints.is_null(1));
    // The suffixed enum column stores its own values as strings.
    let verdicts = string_column(&batch, "Step/Verdict/Enum");
    assert!(verdicts.is_null(0));
    assert_eq!(verdicts.value(1), "Pass");
}

#[test]
fn blocks_split_at_the_configured_size() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("blocks.parquet");
    let options = Options {
        row_block_size: 3,
        ..Options::default()
    };

    let mut dataset = Dataset::create(&path, options).unwrap();
    for i in 0..7i32 {
        dataset
            .add_step_row(
                "run-1",
                "plan-1",
                format!("step-{i}"),
                scalars(&[("Seq", Value::Int32(i))]),
            )
            .unwrap();
    }
    dataset.close().unwrap();

    let reader = BlockReader::open(&path).unwrap();
    assert_eq!(reader.block_count(), 3);
    let sizes: Vec<usize> = reader.map(|b| b.unwrap().num_rows()).collect();
    assert_eq!(sizes, [3, 3, 1]);

    let batch = read_file(&path).unwrap();
    let seq = int_column(&batch, "Step/Seq");
    let read: Vec<i32> = (0..batch.num_rows()).map(|i| seq.value(i)).collect();
    assert_eq!(read, [0, 1, 2, 3, 4, 5, 6]);
}

#[test]
fn uneven_result_arrays_pad_with_nulls() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("arrays.parquet");

    let long: Vec<Value> = (0..50).map(Value::Int32).collect();
    let short: Vec<Value> = (0..25).map(|i| Value::Float64(f64::from(i) / 2.0)).collect();

    let mut dataset = Dataset::create(&path, Options::default()).unwrap();
    dataset
        .add_result_row(
            "Sweep",
            "run-1",
            "plan-1",
            "step-1",
            scalars(&[("Gain", Value::Float64(1.5))]),
            arrays(&[("Index", long), ("Level", short)]),
        )
        .unwrap();
    dataset.close().unwrap();

    let batch = read_file(&path).unwrap();
    assert_eq!(batch.num_rows(), 50);

    let index = int_column(&batch, "Result/Index");
    assert_eq!(index.value(0), 0);
    assert_eq!(index.value(49), 49);

    let level = batch
        .column_by_name("Result/Level")
        .unwrap()
        .as_any()
        .downcast_ref::<Float64Array>()
        .unwrap();
    assert_eq!(level.value(24), 12.0);
    assert!(level.is_null(25));
    assert!(level.is_null(49));

    // Scalars repeat across every expanded row.
    let gain = batch
        .column_by_name("Step/Gain")
        .unwrap()
        .as_any()
        .downcast_ref::<Float64Array>()
        .unwrap();
    assert_eq!(gain.value(0), 1.5);
    assert_eq!(gain.value(49), 1.5);
    let names = string_column(&batch, RESULT_NAME_COLUMN);
    assert_eq!(names.value(49), "Sweep");
}

#[test]
fn empty_arrays_still_produce_one_row() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("empty_array.parquet");

    let mut dataset = Dataset::create(&path, Options::default()).unwrap();
    dataset
        .add_result_row(
            "NoData",
            "run-1",
            "plan-1",
            "step-1",
            scalars(&[]),
            arrays(&[("Samples", Vec::new())]),
        )
        .unwrap();
    dataset.close().unwrap();

    let batch = read_file(&path).unwrap();
    assert_eq!(batch.num_rows(), 1);
    // An empty array carries no type, so no column is registered for it.
    assert!(batch.column_by_name("Result/Samples").is_none());
}

#[test]
fn schema_growth_after_flush_chains_and_reconciles_fragments() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("chained.parquet");
    let options = Options {
        row_block_size: 2,
        ..Options::default()
    };

    let mut dataset = Dataset::create(&path, options).unwrap();
    // Two rows fill a block, committing the first fragment's schema.
    for i in 0..2i32 {
        dataset
            .add_step_row(
                "run-1",
                "plan-1",
                format!("step-{i}"),
                scalars(&[("Seq", Value::Int32(i))]),
            )
            .unwrap();
    }
    assert_eq!(dataset.fragment_count(), 1);

    // A new column cannot enter a committed schema; the dataset must chain.
    dataset
        .add_step_row(
            "run-1",
            "plan-1",
            "step-2",
            scalars(&[("Seq", Value::Int32(2)), ("Extra", Value::from("x"))]),
        )
        .unwrap();
    assert_eq!(dataset.fragment_count(), 2);
    dataset.close().unwrap();

    let batch = read_file(&path).unwrap();
    assert_eq!(batch.num_rows(), 3);
    let seq = int_column(&batch, "Step/Seq");
    let read: Vec<i32> = (0..3).map(|i| seq.value(i)).collect();
    assert_eq!(read, [0, 1, 2]);
    let extra = string_column(&batch, "Step/Extra");
    assert!(extra.is_null(0));
    assert!(extra.is_null(1));
    assert_eq!(extra.value(2), "x");

    // Temp fragments are cleaned up after close.
    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(leftovers, ["chained.parquet"]);
}

#[test]
fn repeated_schema_growth_preserves_submission_order() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("multi.parquet");
    let options = Options {
        row_block_size: 2,
        ..Options::default()
    };

    let mut dataset = Dataset::create(&path, options).unwrap();
    for i in 0..10i32 {
        // Every fourth row introduces a fresh column, forcing a new
        // fragment whenever the current schema is already committed.
        let mut row = scalars(&[("Seq", Value::Int32(i))]);
        if i % 4 == 0 {
            row.insert(format!("Col{i}"), Value::Int32(i * 100));
        }
        dataset
            .add_step_row("run-1", "plan-1", format!("step-{i}"), row)
            .unwrap();
    }
    assert!(dataset.fragment_count() > 1);
    dataset.close().unwrap();

    let batch = read_file(&path).unwrap();
    assert_eq!(batch.num_rows(), 10);
    let seq = int_column(&batch, "Step/Seq");
    let read: Vec<i32> = (0..10).map(|i| seq.value(i)).collect();
    assert_eq!(read, (0..10).collect::<Vec<_>>());

    for i in [0i32, 4, 8] {
        let col = int_column(&batch, &format!("Step/Col{i}"));
        assert_eq!(col.value(i as usize), i * 100);
        assert_eq!(col.null_count(), 9);
    }
}

#[test]
fn file_metadata_carries_version_time_and_writer() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("meta.parquet");

    let mut dataset = Dataset::create(&path, Options::default()).unwrap();
    dataset
        .add_step_row("run-1", "plan-1", "step-1", scalars(&[]))
        .unwrap();
    dataset.close().unwrap();

    let metadata = file_metadata(&path).unwrap();
    assert_eq!(metadata[SCHEMA_VERSION_KEY], "1.0.0");
    assert_eq!(metadata[WRITER_VERSION_KEY], env!("CARGO_PKG_VERSION"));
    assert!(chrono::DateTime::parse_from_rfc3339(&metadata[TIME_KEY]).is_ok());
    // No renames happened, so no mapping entry is written.
    assert!(!metadata.contains_key(MAPPINGS_KEY));
}

#[test]
fn close_overwrites_an_existing_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("target.parquet");
    std::fs::write(&path, b"stale").unwrap();

    let mut dataset = Dataset::create(&path, Options::default()).unwrap();
    dataset
        .add_step_row("run-1", "plan-1", "step-1", scalars(&[]))
        .unwrap();
    dataset.close().unwrap();

    let batch = read_file(&path).unwrap();
    assert_eq!(batch.num_rows(), 1);
}

#[test]
fn mixed_kinds_into_string_column_follow_the_coercion_rule() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("coerce.parquet");

    let mut dataset = Dataset::create(&path, Options::default()).unwrap();
    // Verdict is seen as Enum first, so its column normalizes to string
    // storage under the plain name.
    dataset
        .add_step_row(
            "run-1",
            "plan-1",
            "step-1",
            scalars(&[("Verdict", Value::Enum("Pass".into()))]),
        )
        .unwrap();
    dataset
        .add_step_row(
            "run-1",
            "plan-1",
            "step-2",
            scalars(&[("Verdict", Value::Enum("Fail".into()))]),
        )
        .unwrap();
    dataset.close().unwrap();

    let batch = read_file(&path).unwrap();
    let verdict = string_column(&batch, "Step/Verdict");
    assert_eq!(verdict.value(0), "Pass");
    assert_eq!(verdict.value(1), "Fail");
}
