//! Lazy event views.
//!
//! [`NanoEvents`] holds the schema-built form of a partition and reads
//! buffers only when a field is requested. Reads go through the
//! form-key interpreter and the shared runtime cache.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::array::Array;
use crate::behavior::{Behavior, LorentzVector, VectorKind};
use crate::error::{NanoEventsError, Result};
use crate::form::{Form, PARAM_COLLECTION, PARAM_TARGET};
use crate::mapping::KeyMapping;

/// Events of one partition.
#[derive(Clone)]
pub struct NanoEvents {
    form: Arc<Form>,
    mapping: Arc<KeyMapping>,
    behavior: Arc<Behavior>,
    metadata: Arc<Map<String, Value>>,
}

impl std::fmt::Debug for NanoEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NanoEvents")
            .field("entries", &self.len())
            .field("fields", &self.fields())
            .finish()
    }
}

impl NanoEvents {
    pub(crate) fn new(
        form: Arc<Form>,
        mapping: Arc<KeyMapping>,
        behavior: Arc<Behavior>,
        metadata: Arc<Map<String, Value>>,
    ) -> Self {
        Self { form, mapping, behavior, metadata }
    }

    /// Number of events.
    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    /// Whether the partition has no events.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Top-level field names.
    pub fn fields(&self) -> Vec<&str> {
        self.form.fields()
    }

    /// Form of the whole event record.
    pub fn form(&self) -> &Form {
        &self.form
    }

    /// Behaviors of the schema that built the form.
    pub fn behavior(&self) -> &Behavior {
        &self.behavior
    }

    /// User metadata passed to the factory.
    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    fn field_form(&self, name: &str) -> Result<&Form> {
        self.form.field(name).ok_or_else(|| NanoEventsError::FieldNotFound(name.to_string()))
    }

    /// Materialize a top-level field.
    pub fn get(&self, name: &str) -> Result<Array> {
        self.mapping.materialize(self.field_form(name)?)
    }

    /// View on a collection (a record field, jagged or one per event).
    pub fn collection(&self, name: &str) -> Result<Collection<'_>> {
        let form = self.field_form(name)?;
        if !form.is_record() {
            return Err(NanoEventsError::TypeMismatch(format!("'{name}' is not a collection")));
        }
        Ok(Collection { events: self, name: name.to_string(), form })
    }

    /// Materialize every field (in parallel).
    pub fn materialize(&self) -> Result<Array> {
        self.mapping.materialize(&self.form)
    }
}

/// Closest match of one object in another collection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Nearest {
    /// Index within the event into the other collection.
    pub index: Option<usize>,
    /// Distance to that object.
    pub delta_r: Option<f64>,
}

/// Named view on a collection of [`NanoEvents`].
#[derive(Debug, Clone)]
pub struct Collection<'a> {
    events: &'a NanoEvents,
    name: String,
    form: &'a Form,
}

impl Collection<'_> {
    /// Field name of the collection in the events.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Collection name as recorded by the schema (falls back to the field name).
    pub fn collection_name(&self) -> &str {
        self.form.innermost().parameter(PARAM_COLLECTION).unwrap_or(self.name.as_str())
    }

    /// Record behavior (`__record__`), if any.
    pub fn behavior_name(&self) -> Option<&str> {
        self.form.behavior_name()
    }

    /// Field names of one object.
    pub fn fields(&self) -> Vec<&str> {
        self.form.fields()
    }

    /// Form of the collection, list layers included.
    pub fn form(&self) -> &Form {
        self.form
    }

    /// Whether the collection has a variable number of objects per event.
    pub fn is_jagged(&self) -> bool {
        self.form.is_list()
    }

    /// One field, keeping the per-event list structure.
    pub fn field(&self, name: &str) -> Result<Array> {
        let projected = self.form.project(name).map_err(|_| {
            NanoEventsError::FieldNotFound(format!("{}.{name}", self.name))
        })?;
        self.events.mapping.materialize(&projected)
    }

    /// Objects per event. Reads only the offsets.
    pub fn counts(&self) -> Result<Vec<usize>> {
        match self.form {
            Form::ListOffsetArray { form_key, .. } => {
                let offsets = self.events.mapping.evaluate(form_key)?;
                let offsets = offsets
                    .buffer()
                    .ok_or_else(|| NanoEventsError::TypeMismatch("offsets must be flat".into()))?
                    .to_i64()?;
                Ok(offsets.windows(2).map(|w| (w[1] - w[0]) as usize).collect())
            }
            _ => Ok(vec![1; self.events.len()]),
        }
    }

    fn kind(&self) -> VectorKind {
        self.behavior_name().map_or(VectorKind::None, |b| self.events.behavior.kind_of(b))
    }

    /// Four-vectors per event.
    pub fn p4(&self) -> Result<Vec<Vec<LorentzVector>>> {
        let counts = self.counts()?;
        let total: usize = counts.iter().sum();
        let present = self.fields();
        let vectors = self.kind().build(total, |aliases| {
            let Some(name) = aliases.iter().find(|a| present.contains(*a)) else {
                return Ok(None);
            };
            Ok(Some(self.field(name)?.flat_content().to_f64_vec()?))
        })?;
        let mut out = Vec::with_capacity(counts.len());
        let mut it = vectors.into_iter();
        for c in counts {
            out.push(it.by_ref().take(c).collect());
        }
        Ok(out)
    }

    /// Resolve a cross reference.
    ///
    /// `attribute` is a behavior attribute (`matched_gen`, `children`, ...)
    /// or the name of a global-index field (`genPartIdxG`). The result has
    /// the list structure of the index with optional target records as
    /// leaves (missing where the index is negative).
    pub fn linked(&self, attribute: &str) -> Result<Array> {
        let field = self
            .behavior_name()
            .and_then(|b| self.events.behavior.link_field(b, attribute))
            .unwrap_or(attribute);
        let field_form = self.form.innermost().field(field).ok_or_else(|| {
            NanoEventsError::FieldNotFound(format!("{}.{field}", self.name))
        })?;
        let target = field_form.innermost().parameter(PARAM_TARGET).ok_or_else(|| {
            NanoEventsError::TypeMismatch(format!("{}.{field} is not a global index", self.name))
        })?;
        let index = self.field(field)?;
        let target = self.events.get(target)?;
        Array::apply_global_index(&target, &index)
    }

    /// For each object, the closest object of `other` in the same event.
    ///
    /// Candidates farther than `threshold` (if given) are ignored.
    pub fn nearest(&self, other: &Collection<'_>, threshold: Option<f64>) -> Result<Vec<Vec<Nearest>>> {
        let mine = self.p4()?;
        let theirs = other.p4()?;
        if mine.len() != theirs.len() {
            return Err(NanoEventsError::Validation(format!(
                "{} has {} events but {} has {}",
                self.name,
                mine.len(),
                other.name,
                theirs.len()
            )));
        }
        Ok(mine
            .iter()
            .zip(&theirs)
            .map(|(objects, candidates)| {
                objects
                    .iter()
                    .map(|o| {
                        let best = candidates
                            .iter()
                            .enumerate()
                            .map(|(j, c)| (j, o.delta_r(c)))
                            .filter(|(_, dr)| threshold.is_none_or(|t| *dr <= t))
                            .min_by(|a, b| a.1.total_cmp(&b.1));
                        Nearest { index: best.map(|(j, _)| j), delta_r: best.map(|(_, dr)| dr) }
                    })
                    .collect()
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use approx::assert_relative_eq;

    use super::*;
    use crate::cache::ColumnCache;
    use crate::factory::AccessLog;
    use crate::schemas::{NanoAODSchema, Schema, base_form};
    use crate::source::{ColumnSource, PreloadedSource};

    fn events(log: Option<AccessLog>) -> NanoEvents {
        let source = PreloadedSource::new(vec![
            ("run".to_string(), Array::from_vec(vec![1u32, 1])),
            ("luminosityBlock".to_string(), Array::from_vec(vec![1u32, 1])),
            ("event".to_string(), Array::from_vec(vec![1u64, 2])),
            ("nJet".to_string(), Array::from_vec(vec![2u32, 1])),
            ("Jet_pt".to_string(), Array::from_rows(vec![vec![50.0f32, 30.0], vec![20.0]])),
            ("Jet_eta".to_string(), Array::from_rows(vec![vec![0.0f32, 1.0], vec![-1.0]])),
            ("Jet_phi".to_string(), Array::from_rows(vec![vec![0.0f32, 2.0], vec![0.5]])),
            ("Jet_mass".to_string(), Array::from_rows(vec![vec![5.0f32, 4.0], vec![3.0]])),
            ("Jet_genJetIdx".to_string(), Array::from_rows(vec![vec![1i32, -1], vec![0]])),
            ("nGenJet".to_string(), Array::from_vec(vec![2u32, 1])),
            ("GenJet_pt".to_string(), Array::from_rows(vec![vec![48.0f32, 52.0], vec![21.0]])),
            ("GenJet_eta".to_string(), Array::from_rows(vec![vec![1.0f32, 0.05], vec![-1.1]])),
            ("GenJet_phi".to_string(), Array::from_rows(vec![vec![2.0f32, 0.0], vec![0.4]])),
            ("MET_pt".to_string(), Array::from_vec(vec![15.0f32, 40.0])),
            ("MET_phi".to_string(), Array::from_vec(vec![0.0f32, 1.0])),
        ])
        .unwrap();
        let schema = NanoAODSchema::default();
        let form = schema.build(&base_form(&source.branches()).unwrap()).unwrap();
        let mapping = KeyMapping::new(
            Arc::new(source),
            0,
            2,
            "test/Events/0-2".into(),
            Arc::new(ColumnCache::default()),
            log,
        );
        NanoEvents::new(
            Arc::new(form),
            Arc::new(mapping),
            Arc::new(schema.behavior()),
            Arc::new(Map::new()),
        )
    }

    #[test]
    fn collection_reads_are_lazy() {
        let log: AccessLog = Arc::new(Mutex::new(Vec::new()));
        let ev = events(Some(Arc::clone(&log)));
        let jets = ev.collection("Jet").unwrap();
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(jets.counts().unwrap(), vec![2, 1]);
        assert_eq!(*log.lock().unwrap(), vec!["nJet".to_string()]);
        assert_eq!(jets.field("pt").unwrap().to_f64_rows().unwrap(), vec![vec![50.0, 30.0], vec![20.0]]);
        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[test]
    fn singleton_collections() {
        let ev = events(None);
        let met = ev.collection("MET").unwrap();
        assert!(!met.is_jagged());
        assert_eq!(met.counts().unwrap(), vec![1, 1]);
        let p4 = met.p4().unwrap();
        assert_relative_eq!(p4[1][0].pt(), 40.0, epsilon = 1e-5);
        assert_relative_eq!(p4[1][0].phi(), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn p4_splits_per_event() {
        let ev = events(None);
        let p4 = ev.collection("Jet").unwrap().p4().unwrap();
        assert_eq!(p4.iter().map(Vec::len).collect::<Vec<_>>(), vec![2, 1]);
        assert_relative_eq!(p4[0][1].eta(), 1.0, epsilon = 1e-6);
        assert_relative_eq!(p4[1][0].mass(), 3.0, epsilon = 1e-4);
    }

    #[test]
    fn linked_resolves_matched_gen() {
        let ev = events(None);
        let jets = ev.collection("Jet").unwrap();
        let genjets = jets.linked("matched_gen").unwrap();
        let values = genjets.to_json_values();
        assert_eq!(values[0][0]["pt"], serde_json::json!(52.0));
        assert!(values[0][1].is_null());
        assert_eq!(values[1][0]["pt"], serde_json::json!(21.0));
        // the raw field name works too
        assert_eq!(jets.linked("genJetIdxG").unwrap().to_json_values(), values);
        assert!(jets.linked("pt").is_err());
    }

    #[test]
    fn nearest_with_threshold() {
        let ev = events(None);
        let jets = ev.collection("Jet").unwrap();
        let genjets = ev.collection("GenJet").unwrap();
        let nearest = jets.nearest(&genjets, Some(0.2)).unwrap();
        assert_eq!(nearest[0][0].index, Some(1));
        assert_relative_eq!(nearest[0][0].delta_r.unwrap(), 0.05, epsilon = 1e-6);
        assert_eq!(nearest[0][1].index, Some(0));
        assert_eq!(nearest[1][0].index, Some(0));

        let strict = jets.nearest(&genjets, Some(0.01)).unwrap();
        assert_eq!(strict[0][0], Nearest { index: None, delta_r: None });
    }

    #[test]
    fn materialize_everything() {
        let ev = events(None);
        let all = ev.materialize().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all.fields(), ev.fields());
        assert!(ev.get("nJet").is_err());
        assert!(ev.collection("run").is_err());
    }
}
