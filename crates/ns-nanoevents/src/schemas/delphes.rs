//! Delphes fast-simulation trees.
//!
//! Split Delphes branches look like `Jet/Jet.PT` (or `Jet.PT`), with a
//! `Jet_size` counts branch. Field names keep their Delphes spelling.

use std::collections::HashMap;

use crate::behavior::Behavior;
use crate::error::Result;
use crate::form::Form;

use super::{
    Groups, Schema, base_fields, collection_record, counts_offsets_key, global_index,
    local2global_key, outer_offsets_key,
};

const DROPPED: [&str; 2] = ["fBits", "fUniqueID"];

const PARTICLE_LINKS: [&str; 4] = ["M1", "M2", "D1", "D2"];

fn mixin_for(collection: &str) -> &'static str {
    match collection {
        "Jet" | "GenJet" | "FatJet" | "GenFatJet" | "ParticleFlowJet04" | "CaloJet02" => "Jet",
        "Electron" => "Electron",
        "Muon" => "Muon",
        "Photon" => "Photon",
        "MissingET" | "GenMissingET" | "PuppiMissingET" => "MissingET",
        "Particle" => "Particle",
        "Track" | "EFlowTrack" => "Track",
        "Tower" | "EFlowPhoton" | "EFlowNeutralHadron" => "Tower",
        _ => "NanoCollection",
    }
}

/// `(collection, field)` of a split Delphes branch.
fn split_branch(name: &str) -> Option<(&str, &str)> {
    let leaf = name.split_once('/').map_or(name, |(_, leaf)| leaf);
    let (coll, field) = leaf.split_once('.')?;
    (!coll.is_empty() && !field.is_empty()).then_some((coll, field))
}

/// Delphes schema.
#[derive(Debug, Clone, Copy, Default)]
pub struct DelphesSchema;

impl Schema for DelphesSchema {
    fn name(&self) -> &'static str {
        "delphes"
    }

    fn build(&self, base: &Form) -> Result<Form> {
        let fields = base_fields(base)?;
        let names: Vec<&str> = fields.iter().map(|(n, _)| n.as_str()).collect();

        enum Slot {
            Branch(String, Form),
            Collection(String),
        }
        let mut slots = Vec::new();
        // (field, branch, form) per collection
        let mut groups: Groups<(String, String, Form)> = Groups::new();
        for (name, form) in &fields {
            let Some((coll, field)) = split_branch(name) else {
                if name.strip_suffix("_size").is_some_and(|c| {
                    names.iter().any(|n| split_branch(n).is_some_and(|(nc, _)| nc == c))
                }) {
                    continue;
                }
                slots.push(Slot::Branch(name.clone(), form.clone()));
                continue;
            };
            if DROPPED.contains(&field) {
                continue;
            }
            if !groups.contains(coll) {
                slots.push(Slot::Collection(coll.to_string()));
            }
            groups.push(coll, (field.to_string(), name.clone(), form.clone()));
        }

        let mut built: HashMap<String, (Vec<(String, Form)>, Option<String>)> = HashMap::new();
        let mut branches: HashMap<(String, String), String> = HashMap::new();
        for (coll, items) in groups.into_ordered() {
            let counter = format!("{coll}_size");
            let offsets = if names.contains(&counter.as_str()) {
                Some(counts_offsets_key(&counter))
            } else {
                items.iter().find_map(|(_, _, f)| outer_offsets_key(f)).map(str::to_string)
            };
            let mut element = Vec::with_capacity(items.len());
            for (field, branch, form) in items {
                let form = match &offsets {
                    Some(_) if form.is_list() => form.strip_list()?,
                    Some(_) => {
                        log::warn!("{branch} is not jagged like its collection; skipping");
                        continue;
                    }
                    None => form,
                };
                branches.insert((coll.clone(), field.clone()), branch);
                element.push((field, form));
            }
            built.insert(coll, (element, offsets));
        }

        if let Some(particle_offsets) = built.get("Particle").and_then(|(_, o)| o.clone()) {
            for link in PARTICLE_LINKS {
                let Some(branch) = branches.get(&("Particle".to_string(), link.to_string())) else {
                    continue;
                };
                let field = global_index(local2global_key(branch, &particle_offsets), "Particle");
                if let Some((element, _)) = built.get_mut("Particle") {
                    element.push((format!("{link}IdxG"), field));
                }
            }
        }

        let mut out = Vec::with_capacity(slots.len());
        for slot in slots {
            match slot {
                Slot::Branch(name, form) => out.push((name, form)),
                Slot::Collection(coll) => {
                    let Some((element, offsets)) = built.remove(&coll) else { continue };
                    let record = collection_record(&coll, mixin_for(&coll), element)?;
                    let form = match offsets {
                        Some(key) => Form::list(key, record),
                        None => record,
                    };
                    out.push((coll, form));
                }
            }
        }
        Form::record(out)
    }

    fn behavior(&self) -> Behavior {
        Behavior::delphes()
    }
}
