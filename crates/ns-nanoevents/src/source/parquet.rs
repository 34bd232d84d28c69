//! Parquet-backed column source.
//!
//! Each top-level Parquet column is one branch. Supported Arrow types:
//!
//! | Arrow type                        | Branch                        |
//! |-----------------------------------|-------------------------------|
//! | `Boolean`, `UInt8`                | flat `bool` / `uint8`         |
//! | `Int8`, `Int16`, `UInt16`         | flat `int32` (widened)        |
//! | `Int32`, `UInt32`, `Int64`, `UInt64` | flat integer               |
//! | `Float16`, `Float32`, `Float64`   | flat float (`f16` widened)    |
//! | `List<T>` / `LargeList<T>`        | jagged (nesting allowed)      |
//!
//! Reads project a single column and use the reader's row offset/limit, so
//! only the requested entry range of the requested branch is decoded.
//! Columns of other types are skipped; null values are a read error.
//!
//! # Parquet key-value metadata
//!
//! | Key    | Value                                   |
//! |--------|-----------------------------------------|
//! | `uuid` | stable identifier used in partition keys |
//!
//! Files without a `uuid` get one derived from the Arrow schema and the row
//! count.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{Array as ArrowArray, ArrayRef, AsArray, ListArray, PrimitiveArray};
use arrow::buffer::{OffsetBuffer, ScalarBuffer};
use arrow::datatypes::{
    ArrowPrimitiveType, DataType, Field, Float32Type, Float64Type, Int32Type, Int64Type, Schema,
    SchemaRef, UInt8Type, UInt32Type, UInt64Type,
};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::{ArrowWriter, ProjectionMask};
use parquet::basic::Compression;
use parquet::file::metadata::KeyValue;
use parquet::file::properties::WriterProperties;
use parquet::file::reader::ChunkReader;

use super::{BranchInfo, ColumnSource, PreloadedSource, check_range, content_uuid};
use crate::array::{Array, Buffer};
use crate::error::{NanoEventsError, Result};
use crate::form::Primitive;

/// Parquet key-value metadata key holding the source uuid.
pub const META_KEY_UUID: &str = "uuid";

const BATCH_SIZE: usize = 65_536;

enum ParquetData {
    File(PathBuf),
    Bytes(Bytes),
}

/// Column source reading a Parquet file lazily, one branch at a time.
pub struct ParquetSource {
    data: ParquetData,
    branches: Vec<BranchInfo>,
    /// Branch name -> (Arrow column, position in `branches`).
    column_index: HashMap<String, (usize, usize)>,
    entries: u64,
    uuid: String,
    object_path: String,
}

impl std::fmt::Debug for ParquetSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParquetSource")
            .field("object_path", &self.object_path)
            .field("entries", &self.entries)
            .field("branches", &self.branches.len())
            .finish()
    }
}

impl ParquetSource {
    /// Open a Parquet file. Only the footer is read here.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(&path)?)?;
        let object_path = path.display().to_string();
        Self::from_builder(&builder, ParquetData::File(path), object_path)
    }

    /// Read Parquet data from an in-memory buffer.
    pub fn from_bytes(data: impl Into<Bytes>) -> Result<Self> {
        let data: Bytes = data.into();
        let builder = ParquetRecordBatchReaderBuilder::try_new(data.clone())?;
        Self::from_builder(&builder, ParquetData::Bytes(data), "<memory>".to_string())
    }

    fn from_builder<T: ChunkReader + 'static>(
        builder: &ParquetRecordBatchReaderBuilder<T>,
        data: ParquetData,
        object_path: String,
    ) -> Result<Self> {
        let schema: SchemaRef = Arc::clone(builder.schema());
        let file_meta = builder.metadata().file_metadata();
        let entries = u64::try_from(file_meta.num_rows()).unwrap_or(0);

        let mut branches = Vec::with_capacity(schema.fields().len());
        let mut column_index = HashMap::new();
        for (i, field) in schema.fields().iter().enumerate() {
            match branch_info(field) {
                Ok(info) => {
                    column_index.insert(info.name.clone(), (i, branches.len()));
                    branches.push(info);
                }
                Err(e) => log::warn!("skipping Parquet column '{}': {e}", field.name()),
            }
        }

        let explicit_uuid = file_meta.key_value_metadata().and_then(|kvs| {
            kvs.iter().find(|kv| kv.key == META_KEY_UUID).and_then(|kv| kv.value.clone())
        });
        let uuid = match explicit_uuid {
            Some(u) => u,
            None => schema_uuid(&schema, entries),
        };

        log::debug!("opened Parquet source {object_path}: {entries} entries, {} branches", branches.len());
        Ok(Self { data, branches, column_index, entries, uuid, object_path })
    }

    fn read_column<T: ChunkReader + 'static>(
        builder: ParquetRecordBatchReaderBuilder<T>,
        column: usize,
        start: u64,
        stop: u64,
    ) -> Result<Option<ArrayRef>> {
        let mask = ProjectionMask::roots(builder.parquet_schema(), [column]);
        let reader = builder
            .with_projection(mask)
            .with_batch_size(BATCH_SIZE)
            .with_offset(start as usize)
            .with_limit((stop - start) as usize)
            .build()?;
        let mut parts: Vec<ArrayRef> = Vec::new();
        for batch in reader {
            parts.push(Arc::clone(batch?.column(0)));
        }
        match parts.len() {
            0 => Ok(None),
            1 => Ok(parts.pop()),
            _ => {
                let refs: Vec<&dyn ArrowArray> = parts.iter().map(|a| a.as_ref()).collect();
                Ok(Some(arrow::compute::concat(&refs)?))
            }
        }
    }
}

impl ColumnSource for ParquetSource {
    fn num_entries(&self) -> u64 {
        self.entries
    }

    fn branches(&self) -> Vec<BranchInfo> {
        self.branches.clone()
    }

    fn read(&self, name: &str, start: u64, stop: u64) -> Result<Array> {
        check_range(start, stop, self.entries)?;
        let (column, branch) = *self
            .column_index
            .get(name)
            .ok_or_else(|| NanoEventsError::BranchNotFound(name.to_string()))?;
        let arrow_array = if start == stop {
            None
        } else {
            match &self.data {
                ParquetData::File(path) => {
                    let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)?;
                    Self::read_column(builder, column, start, stop)?
                }
                ParquetData::Bytes(bytes) => {
                    let builder = ParquetRecordBatchReaderBuilder::try_new(bytes.clone())?;
                    Self::read_column(builder, column, start, stop)?
                }
            }
        };
        match arrow_array {
            Some(a) => from_arrow(&a),
            None => empty_like(&self.branches[branch]),
        }
    }

    fn uuid(&self) -> &str {
        &self.uuid
    }

    fn object_path(&self) -> &str {
        &self.object_path
    }
}

/// Content uuid of a file without an explicit one: fields (name, type,
/// nullability, sorted metadata), sorted schema metadata and row count.
fn schema_uuid(schema: &Schema, entries: u64) -> String {
    let mut parts: Vec<String> = schema.fields().iter().map(|f| canonical_field(f)).collect();
    let metadata: BTreeMap<&String, &String> = schema.metadata().iter().collect();
    parts.extend(metadata.into_iter().map(|(k, v)| format!("{k}={v}")));
    parts.push(entries.to_string());
    let refs: Vec<&str> = parts.iter().map(String::as_str).collect();
    content_uuid(&refs)
}

fn canonical_field(field: &Field) -> String {
    let mut out =
        format!("{}:{}:{}", field.name(), canonical_type(field.data_type()), field.is_nullable());
    let metadata: BTreeMap<&String, &String> = field.metadata().iter().collect();
    for (k, v) in metadata {
        out.push_str(&format!(";{k}={v}"));
    }
    out
}

fn canonical_type(dt: &DataType) -> String {
    match dt {
        DataType::List(inner) => format!("list<{}>", canonical_field(inner)),
        DataType::LargeList(inner) => format!("large_list<{}>", canonical_field(inner)),
        DataType::Struct(fields) => {
            let inner: Vec<String> = fields.iter().map(|f| canonical_field(f)).collect();
            format!("struct<{}>", inner.join(","))
        }
        other => format!("{other:?}"),
    }
}

fn primitive_of(dt: &DataType) -> Option<Primitive> {
    Some(match dt {
        DataType::Boolean => Primitive::Bool,
        DataType::UInt8 => Primitive::Uint8,
        DataType::Int8 | DataType::Int16 | DataType::UInt16 | DataType::Int32 => Primitive::Int32,
        DataType::UInt32 => Primitive::Uint32,
        DataType::Int64 => Primitive::Int64,
        DataType::UInt64 => Primitive::Uint64,
        DataType::Float16 | DataType::Float32 => Primitive::Float32,
        DataType::Float64 => Primitive::Float64,
        _ => return None,
    })
}

fn branch_info(field: &Field) -> Result<BranchInfo> {
    let mut depth = 0;
    let mut dt = field.data_type();
    loop {
        match dt {
            DataType::List(inner) | DataType::LargeList(inner) => {
                depth += 1;
                dt = inner.data_type();
            }
            other => {
                let primitive = primitive_of(other).ok_or_else(|| {
                    NanoEventsError::TypeMismatch(format!("unsupported Arrow type {other:?}"))
                })?;
                let doc = field.metadata().get("doc").cloned();
                return Ok(BranchInfo { name: field.name().clone(), primitive, list_depth: depth, doc });
            }
        }
    }
}

fn empty_like(info: &BranchInfo) -> Result<Array> {
    let mut array = Array::Numpy(match info.primitive {
        Primitive::Bool => Buffer::from(Vec::<bool>::new()),
        Primitive::Uint8 => Buffer::from(Vec::<u8>::new()),
        Primitive::Int32 => Buffer::from(Vec::<i32>::new()),
        Primitive::Uint32 => Buffer::from(Vec::<u32>::new()),
        Primitive::Int64 => Buffer::from(Vec::<i64>::new()),
        Primitive::Uint64 => Buffer::from(Vec::<u64>::new()),
        Primitive::Float32 => Buffer::from(Vec::<f32>::new()),
        Primitive::Float64 => Buffer::from(Vec::<f64>::new()),
    });
    for _ in 0..info.list_depth {
        array = Array::list(vec![0], array)?;
    }
    Ok(array)
}

fn primitive_values<T: ArrowPrimitiveType>(a: &ArrayRef) -> Vec<T::Native> {
    a.as_primitive::<T>().values().to_vec()
}

fn list_to_array<O: arrow::array::OffsetSizeTrait>(a: &ArrayRef) -> Result<Array> {
    let list = a.as_list::<O>();
    let raw: Vec<i64> = list.offsets().iter().map(|o| o.as_usize() as i64).collect();
    let first = raw.first().copied().unwrap_or(0);
    let last = raw.last().copied().unwrap_or(0);
    let offsets: Vec<i64> = raw.iter().map(|o| o - first).collect();
    let values = list.values().slice(first as usize, (last - first) as usize);
    Array::list(offsets, from_arrow(&values)?)
}

/// Convert an Arrow array into a NanoEvents array.
pub fn from_arrow(a: &ArrayRef) -> Result<Array> {
    if a.null_count() > 0 {
        return Err(NanoEventsError::TypeMismatch(format!(
            "Arrow column has {} null values; missing values are not supported",
            a.null_count()
        )));
    }
    let buffer = match a.data_type() {
        DataType::Boolean => Buffer::from(a.as_boolean().values().iter().collect::<Vec<bool>>()),
        DataType::UInt8 => Buffer::from(primitive_values::<UInt8Type>(a)),
        DataType::Int8 | DataType::Int16 | DataType::UInt16 => {
            let widened = arrow::compute::cast(a, &DataType::Int32)?;
            Buffer::from(primitive_values::<Int32Type>(&widened))
        }
        DataType::Int32 => Buffer::from(primitive_values::<Int32Type>(a)),
        DataType::UInt32 => Buffer::from(primitive_values::<UInt32Type>(a)),
        DataType::Int64 => Buffer::from(primitive_values::<Int64Type>(a)),
        DataType::UInt64 => Buffer::from(primitive_values::<UInt64Type>(a)),
        DataType::Float16 => {
            let widened = arrow::compute::cast(a, &DataType::Float32)?;
            Buffer::from(primitive_values::<Float32Type>(&widened))
        }
        DataType::Float32 => Buffer::from(primitive_values::<Float32Type>(a)),
        DataType::Float64 => Buffer::from(primitive_values::<Float64Type>(a)),
        DataType::List(_) => return list_to_array::<i32>(a),
        DataType::LargeList(_) => return list_to_array::<i64>(a),
        other => {
            return Err(NanoEventsError::TypeMismatch(format!(
                "unsupported Arrow type {other:?}"
            )));
        }
    };
    Ok(Array::Numpy(buffer))
}

fn to_arrow(array: &Array) -> Result<ArrayRef> {
    Ok(match array {
        Array::Numpy(b) => match b {
            Buffer::Bool(v) => Arc::new(arrow::array::BooleanArray::from(v.to_vec())),
            Buffer::UInt8(v) => Arc::new(PrimitiveArray::<UInt8Type>::from(v.to_vec())),
            Buffer::Int32(v) => Arc::new(PrimitiveArray::<Int32Type>::from(v.to_vec())),
            Buffer::UInt32(v) => Arc::new(PrimitiveArray::<UInt32Type>::from(v.to_vec())),
            Buffer::Int64(v) => Arc::new(PrimitiveArray::<Int64Type>::from(v.to_vec())),
            Buffer::UInt64(v) => Arc::new(PrimitiveArray::<UInt64Type>::from(v.to_vec())),
            Buffer::Float32(v) => Arc::new(PrimitiveArray::<Float32Type>::from(v.to_vec())),
            Buffer::Float64(v) => Arc::new(PrimitiveArray::<Float64Type>::from(v.to_vec())),
        },
        Array::ListOffset { offsets, content } => {
            let values = to_arrow(content)?;
            let narrow = offsets
                .iter()
                .map(|&o| {
                    i32::try_from(o).map_err(|_| {
                        NanoEventsError::Validation(format!("list offset {o} overflows int32"))
                    })
                })
                .collect::<Result<Vec<i32>>>()?;
            let field = Arc::new(Field::new_list_field(values.data_type().clone(), false));
            Arc::new(ListArray::try_new(
                field,
                OffsetBuffer::new(ScalarBuffer::from(narrow)),
                values,
                None,
            )?)
        }
        _ => {
            return Err(NanoEventsError::TypeMismatch(
                "only primitive and list columns can be written to Parquet".into(),
            ));
        }
    })
}

fn source_to_batch(source: &PreloadedSource) -> Result<RecordBatch> {
    let mut fields = Vec::new();
    let mut arrays = Vec::new();
    for info in source.branches() {
        let column = source
            .column(&info.name)
            .ok_or_else(|| NanoEventsError::BranchNotFound(info.name.clone()))?;
        let arrow_array = to_arrow(column)?;
        let mut field = Field::new(&info.name, arrow_array.data_type().clone(), false);
        if let Some(doc) = &info.doc {
            field = field.with_metadata(HashMap::from([("doc".to_string(), doc.clone())]));
        }
        fields.push(field);
        arrays.push(arrow_array);
    }
    let schema = Arc::new(Schema::new(fields));
    if arrays.is_empty() {
        return Ok(RecordBatch::new_empty(schema));
    }
    Ok(RecordBatch::try_new(schema, arrays)?)
}

fn writer_properties(source: &PreloadedSource) -> WriterProperties {
    WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .set_key_value_metadata(Some(vec![KeyValue::new(
            META_KEY_UUID.to_string(),
            source.uuid().to_string(),
        )]))
        .build()
}

/// Write a preloaded source to a Parquet file (Snappy-compressed).
pub fn write_parquet(path: impl AsRef<Path>, source: &PreloadedSource) -> Result<()> {
    let batch = source_to_batch(source)?;
    let file = File::create(path.as_ref())?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(writer_properties(source)))?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(())
}

/// Write a preloaded source to Parquet bytes in memory.
pub fn write_parquet_bytes(source: &PreloadedSource) -> Result<Vec<u8>> {
    let batch = source_to_batch(source)?;
    let mut buf = Vec::new();
    {
        let mut writer =
            ArrowWriter::try_new(&mut buf, batch.schema(), Some(writer_properties(source)))?;
        writer.write(&batch)?;
        writer.close()?;
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn preloaded() -> PreloadedSource {
        PreloadedSource::new(vec![
            ("run".to_string(), Array::from_vec(vec![1u32, 1, 1, 2])),
            ("nJet".to_string(), Array::from_vec(vec![2u32, 0, 1, 3])),
            (
                "Jet_pt".to_string(),
                Array::from_rows(vec![vec![40.0f32, 20.0], vec![], vec![33.0], vec![1.0, 2.0, 3.0]]),
            ),
            (
                "Jet_idx".to_string(),
                Array::list(
                    vec![0, 2, 2, 3, 6],
                    Array::from_rows(vec![vec![0i32], vec![], vec![1, 2], vec![], vec![], vec![4]]),
                )
                .unwrap(),
            ),
        ])
        .unwrap()
        .with_uuid("0000-test")
        .with_doc("run", "run number")
    }

    #[test]
    fn bytes_roundtrip_preserves_layout_and_metadata() {
        let bytes = write_parquet_bytes(&preloaded()).unwrap();
        let src = ParquetSource::from_bytes(bytes).unwrap();
        assert_eq!(src.num_entries(), 4);
        assert_eq!(src.uuid(), "0000-test");

        let infos = src.branches();
        assert_eq!(infos.len(), 4);
        assert_eq!(infos[0].doc.as_deref(), Some("run number"));
        assert_eq!(infos[2].list_depth, 1);
        assert_eq!(infos[3].list_depth, 2);
        assert_eq!(infos[2].primitive, Primitive::Float32);
    }

    #[test]
    fn reads_entry_ranges_with_rebased_offsets() {
        let src = ParquetSource::from_bytes(write_parquet_bytes(&preloaded()).unwrap()).unwrap();
        let pt = src.read("Jet_pt", 2, 4).unwrap();
        assert_eq!(pt.to_f64_rows().unwrap(), vec![vec![33.0], vec![1.0, 2.0, 3.0]]);

        let nested = src.read("Jet_idx", 1, 4).unwrap();
        nested.validate().unwrap();
        assert_eq!(nested.len(), 3);
        assert_eq!(nested.value_at(1), serde_json::json!([[1, 2]]));
        assert_eq!(nested.value_at(2), serde_json::json!([[], [], [4]]));

        let empty = src.read("Jet_pt", 2, 2).unwrap();
        assert_eq!(empty.len(), 0);
        assert!(src.read("Jet_pt", 3, 5).is_err());
    }

    #[test]
    fn uuid_falls_back_to_schema_hash() {
        let batch = source_to_batch(&preloaded()).unwrap();
        let mut buf = Vec::new();
        {
            let mut writer = ArrowWriter::try_new(&mut buf, batch.schema(), None).unwrap();
            writer.write(&batch).unwrap();
            writer.close().unwrap();
        }
        let a = ParquetSource::from_bytes(buf.clone()).unwrap();
        let b = ParquetSource::from_bytes(buf).unwrap();
        assert_eq!(a.uuid(), b.uuid());
        assert_eq!(a.uuid().len(), 36);
    }

    #[test]
    fn schema_uuid_is_canonical() {
        let run = Field::new("run", DataType::UInt32, false)
            .with_metadata(HashMap::from([("doc".to_string(), "run number".to_string())]));
        let pt = Field::new(
            "Jet_pt",
            DataType::List(Arc::new(Field::new_list_field(DataType::Float32, false))),
            false,
        );
        let metadata = HashMap::from([
            ("b".to_string(), "2".to_string()),
            ("a".to_string(), "1".to_string()),
        ]);
        let schema = Schema::new(vec![run, pt]).with_metadata(metadata);
        assert_eq!(schema_uuid(&schema, 4), "865aa3a4-d2de-960b-7af4-ddc09bcb2c74");
        assert_ne!(schema_uuid(&schema, 5), schema_uuid(&schema, 4));
    }

    fn write_batch(batch: &RecordBatch) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut writer = ArrowWriter::try_new(&mut buf, batch.schema(), None).unwrap();
            writer.write(batch).unwrap();
            writer.close().unwrap();
        }
        buf
    }

    #[test]
    fn empty_range_after_skipped_column() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("label", DataType::Utf8, false),
            Field::new("x", DataType::Float32, false),
            Field::new("n", DataType::List(Arc::new(Field::new_list_field(DataType::Int64, true))), false),
        ]));
        let label: ArrayRef = Arc::new(arrow::array::StringArray::from(vec!["a", "b"]));
        let x: ArrayRef = Arc::new(PrimitiveArray::<Float32Type>::from(vec![1.5f32, 2.5]));
        let n: ArrayRef = Arc::new(ListArray::from_iter_primitive::<Int64Type, _, _>(vec![
            Some(vec![Some(1i64)]),
            Some(vec![]),
        ]));
        let batch = RecordBatch::try_new(schema, vec![label, x, n]).unwrap();
        let src = ParquetSource::from_bytes(write_batch(&batch)).unwrap();
        assert_eq!(src.branches().len(), 2);

        let x = src.read("x", 1, 1).unwrap();
        assert_eq!(x.len(), 0);
        assert_eq!(x.buffer().unwrap(), &Buffer::from(Vec::<f32>::new()));
        let n = src.read("n", 2, 2).unwrap();
        assert!(matches!(n, Array::ListOffset { .. }));
        assert_eq!(n.len(), 0);
        assert!(matches!(src.read("label", 0, 1), Err(NanoEventsError::BranchNotFound(_))));
    }

    #[test]
    fn null_values_are_rejected() {
        let schema = Arc::new(Schema::new(vec![Field::new("x", DataType::Float32, true)]));
        let with_null: ArrayRef =
            Arc::new(PrimitiveArray::<Float32Type>::from(vec![Some(1.0f32), None]));
        let batch = RecordBatch::try_new(Arc::clone(&schema), vec![with_null]).unwrap();
        let src = ParquetSource::from_bytes(write_batch(&batch)).unwrap();
        assert!(matches!(src.read("x", 0, 2), Err(NanoEventsError::TypeMismatch(_))));
        assert_eq!(src.read("x", 0, 1).unwrap().to_f64_vec().unwrap(), vec![1.0]);

        // Nullable but fully populated columns read normally.
        let full: ArrayRef = Arc::new(PrimitiveArray::<Float32Type>::from(vec![Some(3.0f32)]));
        let batch = RecordBatch::try_new(schema, vec![full]).unwrap();
        let src = ParquetSource::from_bytes(write_batch(&batch)).unwrap();
        assert_eq!(src.read("x", 0, 1).unwrap().to_f64_vec().unwrap(), vec![3.0]);
    }

    #[test]
    fn narrow_integers_are_widened() {
        let schema = Arc::new(Schema::new(vec![Field::new("q", DataType::Int16, false)]));
        let col: ArrayRef = Arc::new(PrimitiveArray::<arrow::datatypes::Int16Type>::from(vec![-1i16, 7]));
        let batch = RecordBatch::try_new(schema, vec![col]).unwrap();
        let mut buf = Vec::new();
        {
            let mut writer = ArrowWriter::try_new(&mut buf, batch.schema(), None).unwrap();
            writer.write(&batch).unwrap();
            writer.close().unwrap();
        }
        let src = ParquetSource::from_bytes(buf).unwrap();
        assert_eq!(src.branches()[0].primitive, Primitive::Int32);
        let q = src.read("q", 0, 2).unwrap();
        assert_eq!(q.buffer().unwrap(), &Buffer::from(vec![-1i32, 7]));
    }
}
