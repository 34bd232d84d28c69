//! Schemas: turn the flat branch list into a structured event form.
//!
//! Every source is first described by a *base form*: a record with one
//! field per branch, each field addressing its buffers with `!load`
//! programs. A [`Schema`] rewrites that record into collections, attaches
//! behavior names and adds derived global-index fields.

mod base;
mod delphes;
mod nanoaod;
mod pfnano;
mod physlite;
mod treemaker;

use std::sync::Arc;

pub use base::BaseSchema;
pub use delphes::DelphesSchema;
pub use nanoaod::NanoAODSchema;
pub use pfnano::PFNanoAODSchema;
pub use physlite::PHYSLITESchema;
pub use treemaker::TreeMakerSchema;

use crate::behavior::Behavior;
use crate::error::{NanoEventsError, Result};
use crate::form::{Form, PARAM_COLLECTION, PARAM_DOC, PARAM_RECORD, PARAM_TARGET, Primitive};
use crate::source::BranchInfo;

/// Interpretation of a base form.
pub trait Schema: Send + Sync + std::fmt::Debug {
    /// Short lowercase name (`"nanoaod"`, `"delphes"`, ...).
    fn name(&self) -> &'static str;

    /// Build the event form from the base form.
    fn build(&self, base: &Form) -> Result<Form>;

    /// Behaviors referenced by the built form.
    fn behavior(&self) -> Behavior;
}

/// Look up a schema with default options by name (case-insensitive).
pub fn schema_from_name(name: &str) -> Result<Arc<dyn Schema>> {
    Ok(match name.to_ascii_lowercase().as_str() {
        "base" => Arc::new(BaseSchema),
        "nanoaod" => Arc::new(NanoAODSchema::default()),
        "pfnanoaod" => Arc::new(PFNanoAODSchema::default()),
        "treemaker" => Arc::new(TreeMakerSchema),
        "physlite" => Arc::new(PHYSLITESchema),
        "delphes" => Arc::new(DelphesSchema),
        other => {
            return Err(NanoEventsError::Schema(format!(
                "unknown schema '{other}' (expected base, nanoaod, pfnanoaod, treemaker, physlite or delphes)"
            )));
        }
    })
}

/// Base form for a list of branches.
pub fn base_form(branches: &[BranchInfo]) -> Result<Form> {
    let mut fields = Vec::with_capacity(branches.len());
    for info in branches {
        if info.name.is_empty() || info.name.contains(',') || info.name.starts_with('!') {
            return Err(NanoEventsError::Schema(format!(
                "branch name '{}' cannot be used in a form key",
                info.name
            )));
        }
        let mut form = branch_form(&format!("{},!load", info.name), info.primitive, info.list_depth);
        if let Some(doc) = &info.doc {
            form.parameters_mut().insert(PARAM_DOC.to_string(), doc.clone());
        }
        fields.push((info.name.clone(), form));
    }
    Form::record(fields)
}

fn branch_form(program: &str, primitive: Primitive, depth: usize) -> Form {
    if depth == 0 {
        return Form::numpy(primitive, program);
    }
    Form::list(
        format!("{program},!offsets"),
        branch_form(&format!("{program},!content"), primitive, depth - 1),
    )
}

/// Branch fields of a base form, in order.
pub(crate) fn base_fields(base: &Form) -> Result<Vec<(String, Form)>> {
    match base {
        Form::RecordArray { fields, contents, .. } => {
            Ok(fields.iter().cloned().zip(contents.iter().cloned()).collect())
        }
        other => Err(NanoEventsError::Schema(format!(
            "base form must be a RecordArray, got {}",
            other.class_name()
        ))),
    }
}

/// Record tagged with a behavior and collection name.
pub(crate) fn collection_record(
    collection: &str,
    mixin: &str,
    fields: Vec<(String, Form)>,
) -> Result<Form> {
    Ok(Form::record(fields)?
        .with_parameter(PARAM_RECORD, mixin)
        .with_parameter(PARAM_COLLECTION, collection))
}

/// `int64` leaf of a global index into `target`.
pub(crate) fn global_index(program: impl Into<String>, target: &str) -> Form {
    Form::numpy(Primitive::Int64, program).with_parameter(PARAM_TARGET, target)
}

/// Program turning a local-index branch into a global index.
pub(crate) fn local2global_key(branch: &str, target_offsets: &str) -> String {
    format!("{branch},!load,{target_offsets},!local2global")
}

/// Offsets program from a counts branch.
pub(crate) fn counts_offsets_key(counter: &str) -> String {
    format!("{counter},!load,!counts2offsets")
}

/// Offsets program of a jagged field form, if it is jagged.
pub(crate) fn outer_offsets_key(form: &Form) -> Option<&str> {
    match form {
        Form::ListOffsetArray { form_key, .. } => Some(form_key.as_str()),
        _ => None,
    }
}

/// Same list structure as `shape`, with the innermost node replaced by `leaf`.
pub(crate) fn replace_leaf(shape: &Form, leaf: Form) -> Form {
    let mut out = shape.clone();
    *out.innermost_mut() = leaf;
    out
}

/// Zip fields of equal list depth into lists of records.
///
/// The list layers of the first field are kept; every field contributes its
/// innermost node to the record.
pub(crate) fn zip_innermost(fields: Vec<(String, Form)>, parameters: &[(&str, &str)]) -> Result<Form> {
    let Some((_, first)) = fields.first() else {
        return Err(NanoEventsError::Schema("cannot zip zero fields".into()));
    };
    let shape = first.clone();
    let depth = shape.list_depth();
    let mut inner = Vec::with_capacity(fields.len());
    for (name, form) in fields {
        if form.list_depth() != depth {
            return Err(NanoEventsError::Schema(format!(
                "cannot zip field '{name}' of depth {} with depth {depth}",
                form.list_depth()
            )));
        }
        inner.push((name, form.innermost().clone()));
    }
    let mut record = Form::record(inner)?;
    for (k, v) in parameters {
        record = record.with_parameter(*k, *v);
    }
    Ok(replace_leaf(&shape, record))
}

/// Push a field into the record of a (possibly jagged) collection form.
pub(crate) fn push_field(collection: &mut Form, name: &str, field: Form) -> Result<()> {
    match collection.innermost_mut() {
        Form::RecordArray { fields, contents, .. } => {
            if fields.iter().any(|f| f == name) {
                return Err(NanoEventsError::Schema(format!("duplicate record field '{name}'")));
            }
            fields.push(name.to_string());
            contents.push(field);
            Ok(())
        }
        other => Err(NanoEventsError::Schema(format!(
            "cannot add field '{name}' to a {}",
            other.class_name()
        ))),
    }
}

/// Ordered grouping of `(key, item)` pairs by first appearance of `key`.
pub(crate) struct Groups<T> {
    order: Vec<String>,
    items: std::collections::HashMap<String, Vec<T>>,
}

impl<T> Groups<T> {
    pub(crate) fn new() -> Self {
        Self { order: Vec::new(), items: std::collections::HashMap::new() }
    }

    pub(crate) fn push(&mut self, key: &str, item: T) {
        if !self.items.contains_key(key) {
            self.order.push(key.to_string());
        }
        self.items.entry(key.to_string()).or_default().push(item);
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.items.contains_key(key)
    }

    pub(crate) fn into_ordered(mut self) -> Vec<(String, Vec<T>)> {
        self.order
            .into_iter()
            .map(|k| {
                let v = self.items.remove(&k).unwrap_or_default();
                (k, v)
            })
            .collect()
    }
}
