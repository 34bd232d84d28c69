//! CMS NanoAOD.
//!
//! Branches named `{Collection}_{field}` are grouped by collection. A
//! `n{Collection}` counts branch makes the collection jagged; collections
//! without one become one record per event (`MET`, `HLT`, `Flag`, ...).
//! Local indices listed in the cross-reference table get a `{field}G`
//! global-index companion pointing into the target collection.

use std::collections::{HashMap, HashSet};

use crate::behavior::Behavior;
use crate::error::{NanoEventsError, Result};
use crate::form::Form;

use super::{
    Groups, Schema, base_fields, collection_record, counts_offsets_key, global_index,
    local2global_key, outer_offsets_key,
};

const EVENT_IDS: [&str; 3] = ["run", "luminosityBlock", "event"];

const DEFAULT_MIXIN: &str = "NanoCollection";

/// Lookup tables driving the NanoAOD layout; extended by PF NanoAOD.
#[derive(Debug)]
pub(crate) struct NanoTables {
    /// Collection -> behavior name.
    pub(crate) mixins: &'static [(&'static str, &'static str)],
    /// Local-index branch -> target collection.
    pub(crate) cross_refs: &'static [(&'static str, &'static str)],
    /// Fixed-size index lists assembled from several global indices.
    pub(crate) nested: &'static [(&'static str, &'static [&'static str])],
}

pub(crate) const NANO_TABLES: NanoTables = NanoTables {
    mixins: &[
        ("CaloMET", "MissingET"),
        ("ChsMET", "MissingET"),
        ("GenMET", "MissingET"),
        ("MET", "MissingET"),
        ("METFixEE2017", "MissingET"),
        ("PuppiMET", "MissingET"),
        ("RawMET", "MissingET"),
        ("RawPuppiMET", "MissingET"),
        ("TkMET", "MissingET"),
        ("Electron", "Electron"),
        ("LowPtElectron", "LowPtElectron"),
        ("Muon", "Muon"),
        ("Photon", "Photon"),
        ("FsrPhoton", "FsrPhoton"),
        ("Tau", "Tau"),
        ("Jet", "Jet"),
        ("FatJet", "FatJet"),
        ("SubJet", "SubJet"),
        ("GenJet", "GenJet"),
        ("GenJetAK8", "GenJetAK8"),
        ("GenPart", "GenParticle"),
        ("GenVisTau", "GenVisTau"),
        ("GenDressedLepton", "PtEtaPhiMCandidate"),
        ("GenIsolatedPhoton", "PtEtaPhiMCandidate"),
        ("TrigObj", "PtEtaPhiMCandidate"),
        ("PV", "Vertex"),
        ("SV", "SecondaryVertex"),
    ],
    cross_refs: &[
        ("Electron_genPartIdx", "GenPart"),
        ("Electron_jetIdx", "Jet"),
        ("Electron_photonIdx", "Photon"),
        ("LowPtElectron_electronIdx", "Electron"),
        ("LowPtElectron_genPartIdx", "GenPart"),
        ("LowPtElectron_photonIdx", "Photon"),
        ("FatJet_genJetAK8Idx", "GenJetAK8"),
        ("FatJet_subJetIdx1", "SubJet"),
        ("FatJet_subJetIdx2", "SubJet"),
        ("FsrPhoton_muonIdx", "Muon"),
        ("GenPart_genPartIdxMother", "GenPart"),
        ("GenVisTau_genPartIdxMother", "GenPart"),
        ("Jet_electronIdx1", "Electron"),
        ("Jet_electronIdx2", "Electron"),
        ("Jet_genJetIdx", "GenJet"),
        ("Jet_muonIdx1", "Muon"),
        ("Jet_muonIdx2", "Muon"),
        ("Muon_fsrPhotonIdx", "FsrPhoton"),
        ("Muon_genPartIdx", "GenPart"),
        ("Muon_jetIdx", "Jet"),
        ("Photon_electronIdx", "Electron"),
        ("Photon_genPartIdx", "GenPart"),
        ("Photon_jetIdx", "Jet"),
        ("Tau_genPartIdx", "GenPart"),
        ("Tau_jetIdx", "Jet"),
    ],
    nested: &[
        ("Jet_electronIdxG", &["Jet_electronIdx1G", "Jet_electronIdx2G"]),
        ("Jet_muonIdxG", &["Jet_muonIdx1G", "Jet_muonIdx2G"]),
        ("FatJet_subJetIdxG", &["FatJet_subJetIdx1G", "FatJet_subJetIdx2G"]),
    ],
};

/// CMS NanoAOD schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NanoAODSchema {
    /// Log a warning when a cross-reference target collection is absent.
    pub warn_missing_crossrefs: bool,
    /// Fail when `run`, `luminosityBlock` or `event` is absent (warn otherwise).
    pub error_missing_event_ids: bool,
}

impl Default for NanoAODSchema {
    fn default() -> Self {
        Self { warn_missing_crossrefs: true, error_missing_event_ids: true }
    }
}

impl NanoAODSchema {
    /// Schema with the default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Log a warning for cross-references whose target collection is absent.
    pub fn warn_missing_crossrefs(mut self, warn: bool) -> Self {
        self.warn_missing_crossrefs = warn;
        self
    }

    /// Fail when `run`, `luminosityBlock` or `event` is missing (warn otherwise).
    pub fn error_missing_event_ids(mut self, error: bool) -> Self {
        self.error_missing_event_ids = error;
        self
    }

    /// Mixin name for a collection (later tables take precedence).
    pub(crate) fn mixin_for(tables: &[&NanoTables], collection: &str) -> &'static str {
        tables
            .iter()
            .rev()
            .flat_map(|t| t.mixins.iter())
            .find(|(c, _)| *c == collection)
            .map_or(DEFAULT_MIXIN, |(_, m)| *m)
    }

    /// Top-level fields of the NanoAOD layout.
    pub(crate) fn build_fields(
        &self,
        base: &Form,
        tables: &[&NanoTables],
    ) -> Result<Vec<(String, Form)>> {
        let fields = base_fields(base)?;
        let names: HashSet<&str> = fields.iter().map(|(n, _)| n.as_str()).collect();

        for id in EVENT_IDS {
            if !names.contains(id) {
                if self.error_missing_event_ids {
                    return Err(NanoEventsError::Schema(format!(
                        "event id branch '{id}' is missing"
                    )));
                }
                log::warn!("event id branch '{id}' is missing");
            }
        }

        let prefixes: HashSet<&str> = names
            .iter()
            .filter_map(|n| n.split_once('_').map(|(p, _)| p))
            .filter(|p| !p.is_empty())
            .collect();
        let mut counters: HashMap<String, String> = HashMap::new();
        for (name, form) in &fields {
            if let Some(prefix) = name.strip_prefix('n') {
                if prefixes.contains(prefix) && form.list_depth() == 0 {
                    counters.insert(prefix.to_string(), name.clone());
                }
            }
        }
        let consumed: HashSet<&str> = counters.values().map(String::as_str).collect();

        enum Slot {
            Branch(String, Form),
            Collection(String),
        }
        let mut slots = Vec::new();
        let mut groups: Groups<(String, Form)> = Groups::new();
        for (name, form) in &fields {
            if consumed.contains(name.as_str()) {
                continue;
            }
            match name.split_once('_') {
                Some((prefix, field)) if !prefix.is_empty() && !field.is_empty() => {
                    if !groups.contains(prefix) {
                        slots.push(Slot::Collection(prefix.to_string()));
                    }
                    groups.push(prefix, (field.to_string(), form.clone()));
                }
                _ => slots.push(Slot::Branch(name.clone(), form.clone())),
            }
        }

        // Element-level fields and offsets program per collection.
        let mut collections: Collections = HashMap::new();
        let mut stray = Vec::new();
        for (prefix, items) in groups.into_ordered() {
            let offsets = match counters.get(&prefix) {
                Some(counter) => Some(counts_offsets_key(counter)),
                None if items.iter().all(|(_, f)| f.is_list()) => {
                    items.first().and_then(|(_, f)| outer_offsets_key(f)).map(str::to_string)
                }
                None => None,
            };
            let mut element_fields = Vec::with_capacity(items.len());
            for (field, form) in items {
                match &offsets {
                    Some(_) if form.is_list() => element_fields.push((field, form.strip_list()?)),
                    Some(_) => {
                        log::warn!("{prefix}_{field} is not jagged; keeping it at top level");
                        stray.push((format!("{prefix}_{field}"), form));
                    }
                    None => element_fields.push((field, form)),
                }
            }
            collections.insert(prefix, (element_fields, offsets));
        }

        // Global indices added so far: full name -> (program, target).
        let mut globals: HashMap<String, (String, String)> = HashMap::new();
        for (src, target) in tables.iter().flat_map(|t| t.cross_refs.iter()) {
            if !names.contains(src) {
                continue;
            }
            let Some((coll, field)) = src.split_once('_') else { continue };
            if offsets_of(&collections, coll).is_none() {
                log::warn!("cross-reference source {src} is not in a jagged collection");
                continue;
            }
            let Some(target_offsets) = offsets_of(&collections, *target) else {
                if self.warn_missing_crossrefs {
                    log::warn!("cross-reference {src} points to missing collection {target}");
                }
                continue;
            };
            let program = local2global_key(src, &target_offsets);
            let name = format!("{field}G");
            if let Some((items, _)) = collections.get_mut(coll) {
                items.push((name.clone(), global_index(program.clone(), target)));
            }
            globals.insert(format!("{src}G"), (program, target.to_string()));
        }

        for (nested, parts) in tables.iter().flat_map(|t| t.nested.iter()) {
            let resolved: Option<Vec<&(String, String)>> =
                parts.iter().map(|p| globals.get(*p)).collect();
            let Some(resolved) = resolved else { continue };
            let Some((coll, field)) = nested.split_once('_') else { continue };
            let programs: Vec<&str> = resolved.iter().map(|(p, _)| p.as_str()).collect();
            let target = &resolved[0].1;
            let leaf = global_index(format!("{},!nestedindex", programs.join(",")), target);
            if let Some((items, _)) = collections.get_mut(coll) {
                items.push((field.to_string(), Form::regular(parts.len(), leaf)));
            }
        }

        if let (Some((parents, _)), true) =
            (globals.get("GenPart_genPartIdxMotherG"), names.contains("GenPart_pdgId"))
        {
            let parents = parents.clone();
            let pdg = "GenPart_pdgId,!load,!content";
            let distinct = format!("{parents},{pdg},!distinctparent");
            let deep = format!("{parents},{pdg},!distinctchildrendeep");
            let children_of = |p: &str| {
                Form::list(
                    format!("{p},!children,!offsets"),
                    global_index(format!("{p},!children,!content"), "GenPart"),
                )
            };
            let special = vec![
                ("distinctParentIdxG".to_string(), global_index(distinct.clone(), "GenPart")),
                ("childrenIdxG".to_string(), children_of(&parents)),
                ("distinctChildrenIdxG".to_string(), children_of(&distinct)),
                (
                    "distinctChildrenDeepIdxG".to_string(),
                    Form::list(
                        format!("{deep},!offsets"),
                        global_index(format!("{deep},!content"), "GenPart"),
                    ),
                ),
            ];
            if let Some((items, _)) = collections.get_mut("GenPart") {
                items.extend(special);
            }
        }

        let mut out = Vec::with_capacity(slots.len() + stray.len());
        for slot in slots {
            match slot {
                Slot::Branch(name, form) => out.push((name, form)),
                Slot::Collection(name) => {
                    let Some((items, offsets)) = collections.remove(&name) else { continue };
                    let record = collection_record(&name, Self::mixin_for(tables, &name), items)?;
                    let form = match offsets {
                        Some(key) => Form::list(key, record),
                        None => record,
                    };
                    out.push((name, form));
                }
            }
        }
        out.extend(stray);
        Ok(out)
    }
}

type Collections = HashMap<String, (Vec<(String, Form)>, Option<String>)>;

fn offsets_of(collections: &Collections, name: &str) -> Option<String> {
    collections.get(name).and_then(|(_, o)| o.clone())
}

impl Schema for NanoAODSchema {
    fn name(&self) -> &'static str {
        "nanoaod"
    }

    fn build(&self, base: &Form) -> Result<Form> {
        Form::record(self.build_fields(base, &[&NANO_TABLES])?)
    }

    fn behavior(&self) -> Behavior {
        Behavior::nanoaod()
    }
}
