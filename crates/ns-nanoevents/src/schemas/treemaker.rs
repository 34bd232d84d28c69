//! TreeMaker ntuples (CMS SUSY analyses).
//!
//! Lorentz vectors are stored as split ROOT `TLorentzVector` coordinates,
//! `{X}.fCoordinates.fPt` etc. Each such prefix becomes collection `X`;
//! `{X}_{field}` branches with the same list depth join it.

use std::collections::HashMap;

use crate::behavior::Behavior;
use crate::error::Result;
use crate::form::Form;

use super::{
    Groups, Schema, base_fields, collection_record, global_index, local2global_key,
    outer_offsets_key,
};

const COORDINATES: [(&str, &str); 7] = [
    ("fPt", "pt"),
    ("fEta", "eta"),
    ("fPhi", "phi"),
    ("fE", "energy"),
    ("fX", "x"),
    ("fY", "y"),
    ("fZ", "z"),
];

/// TreeMaker schema.
#[derive(Debug, Clone, Copy, Default)]
pub struct TreeMakerSchema;

impl Schema for TreeMakerSchema {
    fn name(&self) -> &'static str {
        "treemaker"
    }

    fn build(&self, base: &Form) -> Result<Form> {
        let fields = base_fields(base)?;

        let mut vectors: Groups<(String, Form)> = Groups::new();
        for (name, form) in &fields {
            let Some((coll, coord)) = name.split_once(".fCoordinates.") else { continue };
            if let Some((_, field)) = COORDINATES.iter().find(|(c, _)| *c == coord) {
                vectors.push(coll, (field.to_string(), form.clone()));
            }
        }

        // Collection -> (list depth, offsets program).
        let mut shapes: HashMap<String, (usize, Option<String>)> = HashMap::new();
        let mut members: Groups<(String, Form)> = Groups::new();
        for (coll, coords) in vectors.into_ordered() {
            let Some((_, first)) = coords.first() else { continue };
            let shape = (first.list_depth(), outer_offsets_key(first).map(str::to_string));
            shapes.insert(coll.clone(), shape);
            for item in coords {
                members.push(&coll, item);
            }
        }

        enum Slot {
            Branch(String, Form),
            Collection(String),
        }
        let mut slots = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for (name, form) in &fields {
            if let Some((coll, coord)) = name.split_once(".fCoordinates.") {
                if shapes.contains_key(coll) && COORDINATES.iter().any(|(c, _)| *c == coord) {
                    if seen.insert(coll.to_string()) {
                        slots.push(Slot::Collection(coll.to_string()));
                    }
                    continue;
                }
            }
            if let Some((coll, field)) = name.split_once('_') {
                if let Some((depth, _)) = shapes.get(coll) {
                    if form.list_depth() == *depth && !field.is_empty() {
                        members.push(coll, (field.to_string(), form.clone()));
                        continue;
                    }
                }
            }
            slots.push(Slot::Branch(name.clone(), form.clone()));
        }

        let mut grouped: HashMap<String, Vec<(String, Form)>> =
            members.into_ordered().into_iter().collect();

        if let (Some(items), Some((_, Some(offsets)))) =
            (grouped.get_mut("GenParticles"), shapes.get("GenParticles"))
        {
            if items.iter().any(|(f, _)| f == "ParentIdx") {
                items.push((
                    "ParentIdxG".to_string(),
                    global_index(local2global_key("GenParticles_ParentIdx", offsets), "GenParticles"),
                ));
            }
        }

        let mut out = Vec::with_capacity(slots.len());
        for slot in slots {
            match slot {
                Slot::Branch(name, form) => out.push((name, form)),
                Slot::Collection(coll) => {
                    let Some(items) = grouped.remove(&coll) else { continue };
                    let offsets = shapes.get(&coll).and_then(|(_, o)| o.clone());
                    let mixin = if items.iter().any(|(f, _)| f == "pt") {
                        "PtEtaPhiELorentzVector"
                    } else if items.iter().any(|(f, _)| f == "x") {
                        "ThreeVector"
                    } else {
                        "NanoCollection"
                    };
                    let form = match offsets {
                        Some(key) => {
                            let element = items
                                .into_iter()
                                .map(|(f, form)| Ok((f, form.strip_list()?)))
                                .collect::<Result<Vec<_>>>()?;
                            Form::list(key, collection_record(&coll, mixin, element)?)
                        }
                        None => collection_record(&coll, mixin, items)?,
                    };
                    out.push((coll, form));
                }
            }
        }
        Form::record(out)
    }

    fn behavior(&self) -> Behavior {
        Behavior::treemaker()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::{PARAM_TARGET, Primitive};
    use crate::schemas::testing;

    fn base() -> Form {
        testing::base(&[
            ("RunNum", Primitive::Uint32, 0),
            ("Jets.fCoordinates.fPt", Primitive::Float64, 1),
            ("Jets.fCoordinates.fEta", Primitive::Float64, 1),
            ("Jets.fCoordinates.fPhi", Primitive::Float64, 1),
            ("Jets.fCoordinates.fE", Primitive::Float64, 1),
            ("Jets_bDiscriminatorCSV", Primitive::Float64, 1),
            ("Jets_ID", Primitive::Bool, 0),
            ("PrimaryVertices.fCoordinates.fX", Primitive::Float64, 1),
            ("PrimaryVertices.fCoordinates.fY", Primitive::Float64, 1),
            ("PrimaryVertices.fCoordinates.fZ", Primitive::Float64, 1),
            ("GenParticles.fCoordinates.fPt", Primitive::Float64, 1),
            ("GenParticles.fCoordinates.fEta", Primitive::Float64, 1),
            ("GenParticles.fCoordinates.fPhi", Primitive::Float64, 1),
            ("GenParticles.fCoordinates.fE", Primitive::Float64, 1),
            ("GenParticles_ParentIdx", Primitive::Int32, 1),
            ("HT", Primitive::Float64, 0),
        ])
    }

    #[test]
    fn coordinates_become_vector_collections() {
        let form = TreeMakerSchema.build(&base()).unwrap();
        assert_eq!(
            form.fields(),
            vec!["RunNum", "Jets", "Jets_ID", "PrimaryVertices", "GenParticles", "HT"]
        );
        let jets = form.field("Jets").unwrap();
        assert_eq!(jets.behavior_name(), Some("PtEtaPhiELorentzVector"));
        assert_eq!(jets.fields(), vec!["pt", "eta", "phi", "energy", "bDiscriminatorCSV"]);
        assert_eq!(outer_offsets_key(jets), Some("Jets.fCoordinates.fPt,!load,!offsets"));
        assert_eq!(form.field("PrimaryVertices").unwrap().behavior_name(), Some("ThreeVector"));
    }

    #[test]
    fn parent_index_is_global() {
        let form = TreeMakerSchema.build(&base()).unwrap();
        let particles = form.field("GenParticles").unwrap().innermost();
        let parent = particles.field("ParentIdxG").unwrap();
        assert_eq!(
            parent.form_keys(),
            vec!["GenParticles_ParentIdx,!load,GenParticles.fCoordinates.fPt,!load,!offsets,!local2global"]
        );
        assert_eq!(parent.parameter(PARAM_TARGET), Some("GenParticles"));
    }
}
