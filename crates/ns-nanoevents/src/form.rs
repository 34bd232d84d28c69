//! Layout descriptors for lazily materialized event columns.
//!
//! A [`Form`] describes the *shape* of an array tree without holding any
//! data. Every buffer-bearing node carries a `form_key`: a small program
//! that the internal form-key interpreter evaluates against a column source
//! to produce that buffer on demand.
//!
//! Forms serialize to JSON in an awkward-array compatible layout:
//!
//! ```json
//! {"class": "ListOffsetArray", "form_key": "nJet,!load,!counts2offsets",
//!  "content": {"class": "RecordArray", "fields": ["pt"], "contents": [...]}}
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{NanoEventsError, Result};

/// Form parameter naming the behavior (mixin) of a record.
pub const PARAM_RECORD: &str = "__record__";
/// Form parameter carrying branch documentation.
pub const PARAM_DOC: &str = "__doc__";
/// Form parameter carrying the collection name of a record.
pub const PARAM_COLLECTION: &str = "collection_name";
/// Form parameter naming the collection a global-index field points into.
pub const PARAM_TARGET: &str = "target_collection";

/// Ordered string parameters attached to a form node.
pub type Parameters = BTreeMap<String, String>;

/// Primitive element type of a flat buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Primitive {
    /// Boolean (1 byte).
    Bool,
    /// Unsigned 8-bit integer.
    Uint8,
    /// Signed 32-bit integer.
    Int32,
    /// Unsigned 32-bit integer.
    Uint32,
    /// Signed 64-bit integer.
    Int64,
    /// Unsigned 64-bit integer.
    Uint64,
    /// 32-bit float.
    Float32,
    /// 64-bit float.
    Float64,
}

impl Primitive {
    /// Size in bytes of one element.
    pub fn byte_size(self) -> usize {
        match self {
            Primitive::Bool | Primitive::Uint8 => 1,
            Primitive::Int32 | Primitive::Uint32 | Primitive::Float32 => 4,
            Primitive::Int64 | Primitive::Uint64 | Primitive::Float64 => 8,
        }
    }

    /// Whether the type is an integer (and therefore usable as an index or count).
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            Primitive::Uint8
                | Primitive::Int32
                | Primitive::Uint32
                | Primitive::Int64
                | Primitive::Uint64
        )
    }
}

/// Shape descriptor of a (lazy) array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "class")]
pub enum Form {
    /// Flat primitive buffer.
    NumpyArray {
        /// Element type.
        primitive: Primitive,
        /// Program producing the buffer.
        form_key: String,
        /// Node parameters.
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        parameters: Parameters,
    },
    /// Variable-length lists; `form_key` produces the `int64` offsets.
    ListOffsetArray {
        /// List element layout.
        content: Box<Form>,
        /// Program producing the offsets buffer.
        form_key: String,
        /// Node parameters.
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        parameters: Parameters,
    },
    /// Fixed-length lists of `size` elements.
    RegularArray {
        /// Number of elements per list.
        size: usize,
        /// List element layout.
        content: Box<Form>,
        /// Node parameters.
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        parameters: Parameters,
    },
    /// Optional values; `form_key` produces an `int64` index where `-1` is missing.
    IndexedOptionArray {
        /// Indexed layout.
        content: Box<Form>,
        /// Program producing the index buffer.
        form_key: String,
        /// Node parameters.
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        parameters: Parameters,
    },
    /// Named fields of equal length.
    RecordArray {
        /// Field names (unique).
        fields: Vec<String>,
        /// Field layouts, parallel to `fields`.
        contents: Vec<Form>,
        /// Node parameters.
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        parameters: Parameters,
    },
}

impl Form {
    /// Flat buffer node.
    pub fn numpy(primitive: Primitive, form_key: impl Into<String>) -> Self {
        Form::NumpyArray { primitive, form_key: form_key.into(), parameters: Parameters::new() }
    }

    /// Jagged list node.
    pub fn list(form_key: impl Into<String>, content: Form) -> Self {
        Form::ListOffsetArray {
            content: Box::new(content),
            form_key: form_key.into(),
            parameters: Parameters::new(),
        }
    }

    /// Fixed-size list node.
    pub fn regular(size: usize, content: Form) -> Self {
        Form::RegularArray { size, content: Box::new(content), parameters: Parameters::new() }
    }

    /// Option node.
    pub fn option(form_key: impl Into<String>, content: Form) -> Self {
        Form::IndexedOptionArray {
            content: Box::new(content),
            form_key: form_key.into(),
            parameters: Parameters::new(),
        }
    }

    /// Record node. Fails on duplicate field names.
    pub fn record(fields: Vec<(String, Form)>) -> Result<Self> {
        let mut names = Vec::with_capacity(fields.len());
        let mut contents = Vec::with_capacity(fields.len());
        for (name, form) in fields {
            if names.contains(&name) {
                return Err(NanoEventsError::Schema(format!("duplicate record field '{name}'")));
            }
            names.push(name);
            contents.push(form);
        }
        Ok(Form::RecordArray { fields: names, contents, parameters: Parameters::new() })
    }

    /// Node parameters.
    pub fn parameters(&self) -> &Parameters {
        match self {
            Form::NumpyArray { parameters, .. }
            | Form::ListOffsetArray { parameters, .. }
            | Form::RegularArray { parameters, .. }
            | Form::IndexedOptionArray { parameters, .. }
            | Form::RecordArray { parameters, .. } => parameters,
        }
    }

    /// Mutable node parameters.
    pub fn parameters_mut(&mut self) -> &mut Parameters {
        match self {
            Form::NumpyArray { parameters, .. }
            | Form::ListOffsetArray { parameters, .. }
            | Form::RegularArray { parameters, .. }
            | Form::IndexedOptionArray { parameters, .. }
            | Form::RecordArray { parameters, .. } => parameters,
        }
    }

    /// Builder-style parameter setter.
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters_mut().insert(key.into(), value.into());
        self
    }

    /// Look up a parameter on this node.
    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters().get(key).map(String::as_str)
    }

    /// The innermost non-list, non-option node.
    pub fn innermost(&self) -> &Form {
        match self {
            Form::ListOffsetArray { content, .. }
            | Form::RegularArray { content, .. }
            | Form::IndexedOptionArray { content, .. } => content.innermost(),
            other => other,
        }
    }

    /// Mutable access to the innermost non-list, non-option node.
    pub fn innermost_mut(&mut self) -> &mut Form {
        match self {
            Form::ListOffsetArray { content, .. }
            | Form::RegularArray { content, .. }
            | Form::IndexedOptionArray { content, .. } => content.innermost_mut(),
            other => other,
        }
    }

    /// Behavior name of the (innermost) record, if any.
    pub fn behavior_name(&self) -> Option<&str> {
        self.innermost().parameter(PARAM_RECORD)
    }

    /// Whether the outermost node is a list.
    pub fn is_list(&self) -> bool {
        matches!(self, Form::ListOffsetArray { .. } | Form::RegularArray { .. })
    }

    /// Whether the innermost node is a record.
    pub fn is_record(&self) -> bool {
        matches!(self.innermost(), Form::RecordArray { .. })
    }

    /// Number of list layers above the innermost node.
    pub fn list_depth(&self) -> usize {
        match self {
            Form::ListOffsetArray { content, .. } | Form::RegularArray { content, .. } => {
                1 + content.list_depth()
            }
            Form::IndexedOptionArray { content, .. } => content.list_depth(),
            _ => 0,
        }
    }

    /// Field names of the innermost record (empty for non-records).
    pub fn fields(&self) -> Vec<&str> {
        match self.innermost() {
            Form::RecordArray { fields, .. } => fields.iter().map(String::as_str).collect(),
            _ => Vec::new(),
        }
    }

    /// Direct field lookup on a record node.
    pub fn field(&self, name: &str) -> Option<&Form> {
        match self {
            Form::RecordArray { fields, contents, .. } => {
                fields.iter().position(|f| f == name).map(|i| &contents[i])
            }
            _ => None,
        }
    }

    /// Project a field through list and option layers, keeping those layers.
    pub fn project(&self, name: &str) -> Result<Form> {
        match self {
            Form::ListOffsetArray { content, form_key, .. } => {
                Ok(Form::list(form_key.clone(), content.project(name)?))
            }
            Form::RegularArray { size, content, .. } => {
                Ok(Form::regular(*size, content.project(name)?))
            }
            Form::IndexedOptionArray { content, form_key, .. } => {
                Ok(Form::option(form_key.clone(), content.project(name)?))
            }
            Form::RecordArray { .. } => self
                .field(name)
                .cloned()
                .ok_or_else(|| NanoEventsError::FieldNotFound(name.to_string())),
            Form::NumpyArray { .. } => Err(NanoEventsError::FieldNotFound(name.to_string())),
        }
    }

    /// All form keys in this subtree, depth first.
    pub fn form_keys(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_keys(&mut out);
        out
    }

    fn collect_keys<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Form::NumpyArray { form_key, .. } => out.push(form_key),
            Form::ListOffsetArray { content, form_key, .. }
            | Form::IndexedOptionArray { content, form_key, .. } => {
                out.push(form_key);
                content.collect_keys(out);
            }
            Form::RegularArray { content, .. } => content.collect_keys(out),
            Form::RecordArray { contents, .. } => {
                for c in contents {
                    c.collect_keys(out);
                }
            }
        }
    }

    /// Replace the outermost list layer's content, keeping everything else.
    ///
    /// Returns the content of a `ListOffsetArray`; errors for other nodes.
    pub fn strip_list(&self) -> Result<Form> {
        match self {
            Form::ListOffsetArray { content, .. } => {
                let mut inner = (**content).clone();
                // Branch documentation lives on the outer node; carry it inward.
                if let Some(doc) = self.parameter(PARAM_DOC) {
                    inner.parameters_mut().entry(PARAM_DOC.to_string()).or_insert(doc.to_string());
                }
                Ok(inner)
            }
            other => Err(NanoEventsError::Schema(format!(
                "expected a jagged branch, got {}",
                other.class_name()
            ))),
        }
    }

    /// Rewrite the innermost numpy leaf.
    pub fn map_leaf(&self, f: &impl Fn(Primitive, &str) -> (Primitive, String)) -> Form {
        match self {
            Form::NumpyArray { primitive, form_key, parameters } => {
                let (p, k) = f(*primitive, form_key);
                Form::NumpyArray { primitive: p, form_key: k, parameters: parameters.clone() }
            }
            Form::ListOffsetArray { content, form_key, parameters } => Form::ListOffsetArray {
                content: Box::new(content.map_leaf(f)),
                form_key: form_key.clone(),
                parameters: parameters.clone(),
            },
            Form::RegularArray { size, content, parameters } => Form::RegularArray {
                size: *size,
                content: Box::new(content.map_leaf(f)),
                parameters: parameters.clone(),
            },
            Form::IndexedOptionArray { content, form_key, parameters } => {
                Form::IndexedOptionArray {
                    content: Box::new(content.map_leaf(f)),
                    form_key: form_key.clone(),
                    parameters: parameters.clone(),
                }
            }
            Form::RecordArray { .. } => self.clone(),
        }
    }

    /// Class name as used in the JSON representation.
    pub fn class_name(&self) -> &'static str {
        match self {
            Form::NumpyArray { .. } => "NumpyArray",
            Form::ListOffsetArray { .. } => "ListOffsetArray",
            Form::RegularArray { .. } => "RegularArray",
            Form::IndexedOptionArray { .. } => "IndexedOptionArray",
            Form::RecordArray { .. } => "RecordArray",
        }
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse from JSON.
    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jet_form() -> Form {
        let rec = Form::record(vec![
            ("pt".into(), Form::numpy(Primitive::Float32, "Jet_pt,!load,!content")),
            ("eta".into(), Form::numpy(Primitive::Float32, "Jet_eta,!load,!content")),
        ])
        .unwrap()
        .with_parameter(PARAM_RECORD, "Jet");
        Form::list("nJet,!load,!counts2offsets", rec)
    }

    #[test]
    fn json_uses_class_tag() {
        let json = jet_form().to_json().unwrap();
        assert!(json.contains("\"class\": \"ListOffsetArray\""));
        assert!(json.contains("\"primitive\": \"float32\""));
        let back = Form::from_json(&json).unwrap();
        assert_eq!(back, jet_form());
    }

    #[test]
    fn project_keeps_list_layers() {
        let pt = jet_form().project("pt").unwrap();
        assert_eq!(pt.list_depth(), 1);
        assert_eq!(pt.form_keys(), vec!["nJet,!load,!counts2offsets", "Jet_pt,!load,!content"]);
        assert!(jet_form().project("phi").is_err());
    }

    #[test]
    fn behavior_name_looks_through_lists() {
        assert_eq!(jet_form().behavior_name(), Some("Jet"));
        assert_eq!(jet_form().fields(), vec!["pt", "eta"]);
    }

    #[test]
    fn duplicate_fields_rejected() {
        let err = Form::record(vec![
            ("a".into(), Form::numpy(Primitive::Bool, "a,!load")),
            ("a".into(), Form::numpy(Primitive::Bool, "b,!load")),
        ]);
        assert!(err.is_err());
    }
}
