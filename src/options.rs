//! Writer configuration.

use arrow::datatypes::{DataType, FieldRef};
use parquet::basic::{Compression, Encoding, GzipLevel, ZstdLevel};
use parquet::file::properties::WriterProperties;
use parquet::schema::types::ColumnPath;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Compression codec applied to every block of the output file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompressionCodec {
    None,
    Snappy,
    Gzip,
    Zstd,
}

/// Configuration for the dataset writer.
///
/// Pure data; immutable after construction and shared by reference across
/// the dataset's lifetime. `row_block_size` is a throughput/latency
/// trade-off, not a correctness knob: rows are flushed in blocks of at most
/// this many rows, and the schema freezes at the first flush.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Options {
    /// Maximum rows per block (Parquet row group). Default 10 000.
    pub row_block_size: usize,
    /// Compression codec. Default Snappy.
    pub compression: CompressionCodec,
    /// Level for level-aware codecs (Gzip, Zstd); codec default when `None`.
    pub compression_level: Option<i32>,
    /// Dictionary encoding toggle. Default true.
    pub dictionary_enabled: bool,
    /// Dictionary page size threshold in bytes.
    pub dictionary_page_size_limit: usize,
    /// Use DELTA_BINARY_PACKED encoding for integer columns. Default false.
    pub delta_binary_packed: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            row_block_size: 10_000,
            compression: CompressionCodec::Snappy,
            compression_level: None,
            dictionary_enabled: true,
            dictionary_page_size_limit: 1024 * 1024,
            delta_binary_packed: false,
        }
    }
}

impl Options {
    /// Compile these options into Parquet writer properties for a schema.
    ///
    /// The schema is needed up front because the delta-encoding toggle is
    /// applied per integer column rather than as a blanket default.
    pub(crate) fn writer_properties(&self, fields: &[FieldRef]) -> Result<WriterProperties> {
        let compression = match self.compression {
            CompressionCodec::None => Compression::UNCOMPRESSED,
            CompressionCodec::Snappy => Compression::SNAPPY,
            CompressionCodec::Gzip => match self.compression_level {
                Some(level) => Compression::GZIP(GzipLevel::try_new(level as u32)?),
                None => Compression::GZIP(GzipLevel::default()),
            },
            CompressionCodec::Zstd => match self.compression_level {
                Some(level) => Compression::ZSTD(ZstdLevel::try_new(level)?),
                None => Compression::ZSTD(ZstdLevel::default()),
            },
        };

        let mut builder = WriterProperties::builder()
            .set_compression(compression)
            .set_max_row_group_size(self.row_block_size.max(1))
            .set_dictionary_enabled(self.dictionary_enabled)
            .set_dictionary_page_size_limit(self.dictionary_page_size_limit);

        if self.delta_binary_packed {
            for field in fields {
                if is_integer(field.data_type()) {
                    builder = builder.set_column_encoding(
                        ColumnPath::from(field.name().as_str()),
                        Encoding::DELTA_BINARY_PACKED,
                    );
                }
            }
        }

        Ok(builder.build())
    }
}

fn is_integer(data_type: &DataType) -> bool {
    matches!(
        data_type,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
    )
}
