//! Materialized columnar arrays.
//!
//! [`Array`] is the data-bearing counterpart of [`Form`](crate::form::Form):
//! flat buffers, jagged lists (flat content + `n + 1` offsets), fixed-size
//! lists, optional values and records. Buffers are `Arc`-shared so cache hits
//! and projections never copy column data.

use std::sync::Arc;

use serde_json::Value;

use crate::error::{NanoEventsError, Result};
use crate::form::{PARAM_RECORD, Parameters, Primitive};

/// Typed flat buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum Buffer {
    /// `bool` values.
    Bool(Arc<[bool]>),
    /// `u8` values.
    UInt8(Arc<[u8]>),
    /// `i32` values.
    Int32(Arc<[i32]>),
    /// `u32` values.
    UInt32(Arc<[u32]>),
    /// `i64` values.
    Int64(Arc<[i64]>),
    /// `u64` values.
    UInt64(Arc<[u64]>),
    /// `f32` values.
    Float32(Arc<[f32]>),
    /// `f64` values.
    Float64(Arc<[f64]>),
}

macro_rules! each_buffer {
    ($buf:expr, $v:ident => $body:expr) => {
        match $buf {
            Buffer::Bool($v) => $body,
            Buffer::UInt8($v) => $body,
            Buffer::Int32($v) => $body,
            Buffer::UInt32($v) => $body,
            Buffer::Int64($v) => $body,
            Buffer::UInt64($v) => $body,
            Buffer::Float32($v) => $body,
            Buffer::Float64($v) => $body,
        }
    };
}

macro_rules! buffer_from_vec {
    ($t:ty, $variant:ident) => {
        impl From<Vec<$t>> for Buffer {
            fn from(v: Vec<$t>) -> Self {
                Buffer::$variant(Arc::from(v))
            }
        }
    };
}

buffer_from_vec!(bool, Bool);
buffer_from_vec!(u8, UInt8);
buffer_from_vec!(i32, Int32);
buffer_from_vec!(u32, UInt32);
buffer_from_vec!(i64, Int64);
buffer_from_vec!(u64, UInt64);
buffer_from_vec!(f32, Float32);
buffer_from_vec!(f64, Float64);

impl Buffer {
    /// Number of elements.
    pub fn len(&self) -> usize {
        each_buffer!(self, v => v.len())
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element type.
    pub fn primitive(&self) -> Primitive {
        match self {
            Buffer::Bool(_) => Primitive::Bool,
            Buffer::UInt8(_) => Primitive::Uint8,
            Buffer::Int32(_) => Primitive::Int32,
            Buffer::UInt32(_) => Primitive::Uint32,
            Buffer::Int64(_) => Primitive::Int64,
            Buffer::UInt64(_) => Primitive::Uint64,
            Buffer::Float32(_) => Primitive::Float32,
            Buffer::Float64(_) => Primitive::Float64,
        }
    }

    /// Size of the buffer in bytes.
    pub fn nbytes(&self) -> usize {
        self.len() * self.primitive().byte_size()
    }

    /// Element `i` converted to `f64`.
    pub fn get_f64(&self, i: usize) -> f64 {
        match self {
            Buffer::Bool(v) => f64::from(u8::from(v[i])),
            Buffer::UInt8(v) => f64::from(v[i]),
            Buffer::Int32(v) => f64::from(v[i]),
            Buffer::UInt32(v) => f64::from(v[i]),
            Buffer::Int64(v) => v[i] as f64,
            Buffer::UInt64(v) => v[i] as f64,
            Buffer::Float32(v) => f64::from(v[i]),
            Buffer::Float64(v) => v[i],
        }
    }

    /// All elements converted to `f64`.
    pub fn to_f64(&self) -> Vec<f64> {
        (0..self.len()).map(|i| self.get_f64(i)).collect()
    }

    /// All elements converted to `i64`. Fails for floating-point buffers.
    pub fn to_i64(&self) -> Result<Vec<i64>> {
        Ok(match self {
            Buffer::Bool(v) => v.iter().map(|&b| i64::from(b)).collect(),
            Buffer::UInt8(v) => v.iter().map(|&x| i64::from(x)).collect(),
            Buffer::Int32(v) => v.iter().map(|&x| i64::from(x)).collect(),
            Buffer::UInt32(v) => v.iter().map(|&x| i64::from(x)).collect(),
            Buffer::Int64(v) => v.to_vec(),
            Buffer::UInt64(v) => v
                .iter()
                .map(|&x| {
                    i64::try_from(x).map_err(|_| {
                        NanoEventsError::Validation(format!("uint64 value {x} overflows int64"))
                    })
                })
                .collect::<Result<Vec<_>>>()?,
            Buffer::Float32(_) | Buffer::Float64(_) => {
                return Err(NanoEventsError::TypeMismatch(format!(
                    "expected an integer buffer, got {:?}",
                    self.primitive()
                )));
            }
        })
    }

    /// Copy of elements `[start, stop)`.
    pub fn slice(&self, start: usize, stop: usize) -> Buffer {
        match self {
            Buffer::Bool(v) => Buffer::Bool(Arc::from(&v[start..stop])),
            Buffer::UInt8(v) => Buffer::UInt8(Arc::from(&v[start..stop])),
            Buffer::Int32(v) => Buffer::Int32(Arc::from(&v[start..stop])),
            Buffer::UInt32(v) => Buffer::UInt32(Arc::from(&v[start..stop])),
            Buffer::Int64(v) => Buffer::Int64(Arc::from(&v[start..stop])),
            Buffer::UInt64(v) => Buffer::UInt64(Arc::from(&v[start..stop])),
            Buffer::Float32(v) => Buffer::Float32(Arc::from(&v[start..stop])),
            Buffer::Float64(v) => Buffer::Float64(Arc::from(&v[start..stop])),
        }
    }

    fn json_at(&self, i: usize) -> Value {
        match self {
            Buffer::Bool(v) => Value::Bool(v[i]),
            Buffer::UInt8(v) => Value::from(v[i]),
            Buffer::Int32(v) => Value::from(v[i]),
            Buffer::UInt32(v) => Value::from(v[i]),
            Buffer::Int64(v) => Value::from(v[i]),
            Buffer::UInt64(v) => Value::from(v[i]),
            Buffer::Float32(v) => Value::from(f64::from(v[i])),
            Buffer::Float64(v) => Value::from(v[i]),
        }
    }
}

/// A materialized array tree.
#[derive(Debug, Clone)]
pub enum Array {
    /// Flat primitive values.
    Numpy(Buffer),
    /// Jagged lists. `offsets.len() == len + 1`; entry `i` is
    /// `content[offsets[i]..offsets[i + 1]]`.
    ListOffset {
        /// Entry boundaries into `content`.
        offsets: Arc<[i64]>,
        /// Flattened list elements.
        content: Arc<Array>,
    },
    /// Fixed-size lists of `size` elements.
    Regular {
        /// Elements per entry.
        size: usize,
        /// Flattened list elements (`len * size`).
        content: Arc<Array>,
    },
    /// Optional values; `index[i] < 0` is missing, otherwise it selects `content[index[i]]`.
    IndexedOption {
        /// Selection into `content`.
        index: Arc<[i64]>,
        /// Selected layout.
        content: Arc<Array>,
    },
    /// Named fields of equal length.
    Record {
        /// Field names.
        fields: Vec<String>,
        /// Field values, parallel to `fields`.
        contents: Vec<Array>,
        /// Number of records (kept explicitly for field-less records).
        length: usize,
        /// Parameters copied from the form (behavior name, collection name).
        parameters: Parameters,
    },
}

impl From<Buffer> for Array {
    fn from(b: Buffer) -> Self {
        Array::Numpy(b)
    }
}

impl Array {
    /// Flat array from a vector.
    pub fn from_vec<T>(values: Vec<T>) -> Self
    where
        Buffer: From<Vec<T>>,
    {
        Array::Numpy(Buffer::from(values))
    }

    /// Jagged array from per-entry rows.
    pub fn from_rows<T>(rows: Vec<Vec<T>>) -> Self
    where
        Buffer: From<Vec<T>>,
    {
        let mut offsets = Vec::with_capacity(rows.len() + 1);
        offsets.push(0i64);
        let mut flat = Vec::new();
        for row in rows {
            flat.extend(row);
            offsets.push(flat.len() as i64);
        }
        Array::ListOffset {
            offsets: Arc::from(offsets),
            content: Arc::new(Array::from_vec(flat)),
        }
    }

    /// Jagged array with validated offsets.
    pub fn list(offsets: Vec<i64>, content: Array) -> Result<Self> {
        validate_offsets(&offsets, content.len())?;
        Ok(Array::ListOffset { offsets: Arc::from(offsets), content: Arc::new(content) })
    }

    /// Jagged array over already-shared offsets.
    pub fn list_shared(offsets: Arc<[i64]>, content: Array) -> Result<Self> {
        validate_offsets(&offsets, content.len())?;
        Ok(Array::ListOffset { offsets, content: Arc::new(content) })
    }

    /// Record array from named fields. All fields must have the same length.
    pub fn record(fields: Vec<(String, Array)>, parameters: Parameters) -> Result<Self> {
        let length = fields.first().map(|(_, a)| a.len()).unwrap_or(0);
        Self::record_with_length(fields, length, parameters)
    }

    /// Record array with an explicit length (needed for field-less records).
    pub fn record_with_length(
        fields: Vec<(String, Array)>,
        length: usize,
        parameters: Parameters,
    ) -> Result<Self> {
        let mut names = Vec::with_capacity(fields.len());
        let mut contents = Vec::with_capacity(fields.len());
        for (name, array) in fields {
            if array.len() != length {
                return Err(NanoEventsError::Validation(format!(
                    "record field '{name}' has length {}, expected {length}",
                    array.len()
                )));
            }
            names.push(name);
            contents.push(array);
        }
        Ok(Array::Record { fields: names, contents, length, parameters })
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        match self {
            Array::Numpy(b) => b.len(),
            Array::ListOffset { offsets, .. } => offsets.len().saturating_sub(1),
            Array::Regular { size, content } => {
                if *size == 0 {
                    0
                } else {
                    content.len() / size
                }
            }
            Array::IndexedOption { index, .. } => index.len(),
            Array::Record { length, .. } => *length,
        }
    }

    /// Whether there are no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Approximate heap size in bytes.
    pub fn nbytes(&self) -> usize {
        match self {
            Array::Numpy(b) => b.nbytes(),
            Array::ListOffset { offsets, content } => offsets.len() * 8 + content.nbytes(),
            Array::Regular { content, .. } => content.nbytes(),
            Array::IndexedOption { index, content } => index.len() * 8 + content.nbytes(),
            Array::Record { contents, .. } => contents.iter().map(Array::nbytes).sum(),
        }
    }

    /// Flat buffer, if this is a `Numpy` array.
    pub fn buffer(&self) -> Option<&Buffer> {
        match self {
            Array::Numpy(b) => Some(b),
            _ => None,
        }
    }

    /// Offsets, if this is a `ListOffset` array.
    pub fn offsets(&self) -> Option<&[i64]> {
        match self {
            Array::ListOffset { offsets, .. } => Some(offsets),
            _ => None,
        }
    }

    /// Parameters of the innermost record, if any.
    pub fn parameters(&self) -> Option<&Parameters> {
        match self.innermost() {
            Array::Record { parameters, .. } => Some(parameters),
            _ => None,
        }
    }

    /// Behavior name of the innermost record.
    pub fn behavior_name(&self) -> Option<&str> {
        self.parameters().and_then(|p| p.get(PARAM_RECORD)).map(String::as_str)
    }

    /// Field names of the innermost record.
    pub fn fields(&self) -> Vec<&str> {
        match self.innermost() {
            Array::Record { fields, .. } => fields.iter().map(String::as_str).collect(),
            _ => Vec::new(),
        }
    }

    /// The innermost layout below list and option layers.
    pub fn innermost(&self) -> &Array {
        match self {
            Array::ListOffset { content, .. }
            | Array::Regular { content, .. }
            | Array::IndexedOption { content, .. } => content.innermost(),
            other => other,
        }
    }

    /// Content below all list layers (option layers are kept).
    pub fn flat_content(&self) -> &Array {
        match self {
            Array::ListOffset { content, .. } | Array::Regular { content, .. } => {
                content.flat_content()
            }
            other => other,
        }
    }

    /// Per-entry lengths of the outermost list.
    pub fn counts(&self) -> Result<Vec<usize>> {
        match self {
            Array::ListOffset { offsets, .. } => {
                Ok(offsets.windows(2).map(|w| (w[1] - w[0]) as usize).collect())
            }
            Array::Regular { size, .. } => Ok(vec![*size; self.len()]),
            _ => Err(NanoEventsError::TypeMismatch("counts requested for a non-list array".into())),
        }
    }

    /// Project `field` through list, regular and option layers.
    pub fn project(&self, field: &str) -> Result<Array> {
        match self {
            Array::ListOffset { offsets, content } => Ok(Array::ListOffset {
                offsets: Arc::clone(offsets),
                content: Arc::new(content.project(field)?),
            }),
            Array::Regular { size, content } => {
                Ok(Array::Regular { size: *size, content: Arc::new(content.project(field)?) })
            }
            Array::IndexedOption { index, content } => Ok(Array::IndexedOption {
                index: Arc::clone(index),
                content: Arc::new(content.project(field)?),
            }),
            Array::Record { fields, contents, .. } => fields
                .iter()
                .position(|f| f == field)
                .map(|i| contents[i].clone())
                .ok_or_else(|| NanoEventsError::FieldNotFound(field.to_string())),
            Array::Numpy(_) => Err(NanoEventsError::FieldNotFound(field.to_string())),
        }
    }

    /// Copy of entries `[start, stop)`; offsets are rebased to start at 0.
    pub fn slice_entries(&self, start: usize, stop: usize) -> Result<Array> {
        if start > stop || stop > self.len() {
            return Err(NanoEventsError::Validation(format!(
                "slice [{start}, {stop}) out of bounds for array of length {}",
                self.len()
            )));
        }
        Ok(match self {
            Array::Numpy(b) => Array::Numpy(b.slice(start, stop)),
            Array::ListOffset { offsets, content } => {
                let lo = offsets[start];
                let hi = offsets[stop];
                let rebased: Vec<i64> = offsets[start..=stop].iter().map(|o| o - lo).collect();
                Array::ListOffset {
                    offsets: Arc::from(rebased),
                    content: Arc::new(content.slice_entries(lo as usize, hi as usize)?),
                }
            }
            Array::Regular { size, content } => Array::Regular {
                size: *size,
                content: Arc::new(content.slice_entries(start * size, stop * size)?),
            },
            Array::IndexedOption { index, content } => Array::IndexedOption {
                index: Arc::from(&index[start..stop]),
                content: Arc::clone(content),
            },
            Array::Record { fields, contents, parameters, .. } => Array::Record {
                fields: fields.clone(),
                contents: contents
                    .iter()
                    .map(|c| c.slice_entries(start, stop))
                    .collect::<Result<Vec<_>>>()?,
                length: stop - start,
                parameters: parameters.clone(),
            },
        })
    }

    /// Check structural invariants recursively.
    pub fn validate(&self) -> Result<()> {
        match self {
            Array::Numpy(_) => Ok(()),
            Array::ListOffset { offsets, content } => {
                validate_offsets(offsets, content.len())?;
                content.validate()
            }
            Array::Regular { size, content } => {
                if *size > 0 && content.len() % size != 0 {
                    return Err(NanoEventsError::Validation(format!(
                        "regular array content length {} is not a multiple of {size}",
                        content.len()
                    )));
                }
                content.validate()
            }
            Array::IndexedOption { index, content } => {
                let n = content.len() as i64;
                if let Some(bad) = index.iter().find(|&&i| i >= n) {
                    return Err(NanoEventsError::Validation(format!(
                        "option index {bad} out of range for content of length {n}"
                    )));
                }
                content.validate()
            }
            Array::Record { fields, contents, length, .. } => {
                for (name, c) in fields.iter().zip(contents) {
                    if c.len() != *length {
                        return Err(NanoEventsError::Validation(format!(
                            "record field '{name}' has length {}, expected {length}",
                            c.len()
                        )));
                    }
                    c.validate()?;
                }
                Ok(())
            }
        }
    }

    /// Numeric values of a flat (optionally optional) array; missing values become `NaN`.
    pub fn to_f64_vec(&self) -> Result<Vec<f64>> {
        match self {
            Array::Numpy(b) => Ok(b.to_f64()),
            Array::IndexedOption { index, content } => {
                let values = content.to_f64_vec()?;
                Ok(index.iter().map(|&i| if i < 0 { f64::NAN } else { values[i as usize] }).collect())
            }
            _ => Err(NanoEventsError::TypeMismatch(
                "expected a flat numeric array".into(),
            )),
        }
    }

    /// A singly-jagged numeric array as per-entry rows.
    pub fn to_f64_rows(&self) -> Result<Vec<Vec<f64>>> {
        match self {
            Array::ListOffset { offsets, content } => {
                let flat = content.to_f64_vec()?;
                Ok(offsets
                    .windows(2)
                    .map(|w| flat[w[0] as usize..w[1] as usize].to_vec())
                    .collect())
            }
            Array::Regular { size, content } => {
                let flat = content.to_f64_vec()?;
                Ok(flat.chunks((*size).max(1)).map(<[f64]>::to_vec).collect())
            }
            _ => Err(NanoEventsError::TypeMismatch("expected a jagged numeric array".into())),
        }
    }

    /// Entry `i` as a JSON value (records become objects, missing values `null`).
    pub fn value_at(&self, i: usize) -> Value {
        match self {
            Array::Numpy(b) => b.json_at(i),
            Array::ListOffset { offsets, content } => {
                let (lo, hi) = (offsets[i] as usize, offsets[i + 1] as usize);
                Value::Array((lo..hi).map(|j| content.value_at(j)).collect())
            }
            Array::Regular { size, content } => {
                Value::Array((i * size..(i + 1) * size).map(|j| content.value_at(j)).collect())
            }
            Array::IndexedOption { index, content } => {
                if index[i] < 0 {
                    Value::Null
                } else {
                    content.value_at(index[i] as usize)
                }
            }
            Array::Record { fields, contents, .. } => Value::Object(
                fields.iter().zip(contents).map(|(f, c)| (f.clone(), c.value_at(i))).collect(),
            ),
        }
    }

    /// All entries as JSON values.
    pub fn to_json_values(&self) -> Vec<Value> {
        (0..self.len()).map(|i| self.value_at(i)).collect()
    }

    /// Resolve a global index into `target`.
    ///
    /// `target` is a (possibly jagged) collection; its list layers are stripped
    /// so that `index` addresses the flattened elements. `index` may have any
    /// number of list layers above an integer leaf. The result keeps the
    /// index's list structure with `IndexedOption` leaves: negative indices
    /// become missing values.
    pub fn apply_global_index(target: &Array, index: &Array) -> Result<Array> {
        let flat = Arc::new(target.flat_content().clone());
        Self::apply_flat_index(&flat, index)
    }

    fn apply_flat_index(flat: &Arc<Array>, index: &Array) -> Result<Array> {
        match index {
            Array::ListOffset { offsets, content } => Ok(Array::ListOffset {
                offsets: Arc::clone(offsets),
                content: Arc::new(Self::apply_flat_index(flat, content)?),
            }),
            Array::Regular { size, content } => Ok(Array::Regular {
                size: *size,
                content: Arc::new(Self::apply_flat_index(flat, content)?),
            }),
            Array::Numpy(b) => {
                let idx = b.to_i64()?;
                let n = flat.len() as i64;
                if let Some(bad) = idx.iter().find(|&&i| i >= n) {
                    return Err(NanoEventsError::Validation(format!(
                        "global index {bad} out of range for target of length {n}"
                    )));
                }
                Ok(Array::IndexedOption { index: Arc::from(idx), content: Arc::clone(flat) })
            }
            _ => Err(NanoEventsError::TypeMismatch(
                "global index must be an integer array with list layers only".into(),
            )),
        }
    }
}

fn validate_offsets(offsets: &[i64], content_len: usize) -> Result<()> {
    match (offsets.first(), offsets.last()) {
        (Some(&0), Some(&last)) if last as usize == content_len => {}
        _ => {
            return Err(NanoEventsError::Validation(format!(
                "offsets must start at 0 and end at content length {content_len}"
            )));
        }
    }
    if offsets.windows(2).any(|w| w[1] < w[0]) {
        return Err(NanoEventsError::Validation("offsets must be non-decreasing".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jets() -> Array {
        let pt = Array::from_rows(vec![vec![50.0f32, 30.0], vec![], vec![20.0]]);
        let eta = Array::from_rows(vec![vec![0.5f32, -1.0], vec![], vec![2.0]]);
        let offsets = pt.offsets().unwrap().to_vec();
        let rec = Array::record(
            vec![
                ("pt".into(), pt.flat_content().clone()),
                ("eta".into(), eta.flat_content().clone()),
            ],
            Parameters::new(),
        )
        .unwrap();
        Array::list(offsets, rec).unwrap()
    }

    #[test]
    fn from_rows_builds_offsets() {
        let a = Array::from_rows(vec![vec![1i32, 2], vec![], vec![3]]);
        assert_eq!(a.len(), 3);
        assert_eq!(a.offsets().unwrap(), &[0, 2, 2, 3]);
        assert_eq!(a.counts().unwrap(), vec![2, 0, 1]);
    }

    #[test]
    fn list_rejects_bad_offsets() {
        assert!(Array::list(vec![1, 2], Array::from_vec(vec![1i32, 2])).is_err());
        assert!(Array::list(vec![0, 2, 1], Array::from_vec(vec![1i32])).is_err());
        assert!(Array::list(vec![0, 3], Array::from_vec(vec![1i32])).is_err());
    }

    #[test]
    fn project_through_lists() {
        let pt = jets().project("pt").unwrap();
        assert_eq!(pt.to_f64_rows().unwrap(), vec![vec![50.0, 30.0], vec![], vec![20.0]]);
        assert!(jets().project("phi").is_err());
    }

    #[test]
    fn slice_entries_rebases_offsets() {
        let s = jets().slice_entries(1, 3).unwrap();
        assert_eq!(s.offsets().unwrap(), &[0, 0, 1]);
        assert_eq!(s.project("eta").unwrap().to_f64_rows().unwrap(), vec![vec![], vec![2.0]]);
        assert!(jets().slice_entries(2, 4).is_err());
    }

    #[test]
    fn global_index_resolves_with_missing() {
        let idx = Array::from_rows(vec![vec![2i64, -1], vec![0]]);
        let linked = Array::apply_global_index(&jets(), &idx).unwrap();
        linked.validate().unwrap();
        let pt = linked.project("pt").unwrap();
        let rows = pt.to_f64_rows().unwrap();
        assert_eq!(rows[0][0], 20.0);
        assert!(rows[0][1].is_nan());
        assert_eq!(rows[1], vec![50.0]);

        let bad = Array::from_rows(vec![vec![7i64]]);
        assert!(Array::apply_global_index(&jets(), &bad).is_err());
    }

    #[test]
    fn json_values_have_nulls_and_objects() {
        let idx = Array::from_rows(vec![vec![-1i64]]);
        let linked = Array::apply_global_index(&jets(), &idx).unwrap();
        assert_eq!(linked.value_at(0), serde_json::json!([null]));
        let first = jets().value_at(2);
        assert_eq!(first, serde_json::json!([{"pt": 20.0, "eta": 2.0}]));
    }

    #[test]
    fn integer_conversion_rejects_floats() {
        assert!(Buffer::from(vec![1.0f32]).to_i64().is_err());
        assert_eq!(Buffer::from(vec![3u8, 4]).to_i64().unwrap(), vec![3, 4]);
    }
}
