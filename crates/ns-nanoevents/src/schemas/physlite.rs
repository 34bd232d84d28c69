//! ATLAS PHYSLITE.
//!
//! Branches are `{Container}AuxDyn.{field}` (or `Aux.`), where the container
//! may carry an `Analysis` prefix that is dropped from the collection name.
//! Element links are split into `{link}.m_persKey` / `{link}.m_persIndex`
//! sub-branches; they are zipped back into one record field, and links into
//! known containers also get a `{link}IdxG` global index.

use std::collections::HashMap;

use crate::behavior::Behavior;
use crate::error::Result;
use crate::form::Form;

use super::{
    Groups, Schema, base_fields, collection_record, global_index, local2global_key,
    outer_offsets_key, replace_leaf, zip_innermost,
};

const LINKS: [(&str, &str, &str); 7] = [
    ("Electrons", "trackParticleLinks", "GSFTrackParticles"),
    ("Electrons", "caloClusterLinks", "egammaClusters"),
    ("Photons", "caloClusterLinks", "egammaClusters"),
    ("Muons", "inDetTrackParticleLink", "InDetTrackParticles"),
    ("Muons", "combinedTrackParticleLink", "CombinedMuonTrackParticles"),
    (
        "Muons",
        "extrapolatedMuonSpectrometerTrackParticleLink",
        "ExtrapolatedMuonTrackParticles",
    ),
    ("Muons", "muonSpectrometerTrackParticleLink", "MuonSpectrometerTrackParticles"),
];

const PERS_INDEX: &str = "m_persIndex";

fn mixin_for(collection: &str) -> &'static str {
    match collection {
        "Electrons" => "Electron",
        "Muons" => "Muon",
        "Jets" | "LargeRJets" => "Jet",
        "TauJets" => "Tau",
        "Photons" => "Photon",
        "TruthParticles" | "TruthBoson" | "TruthTop" | "TruthBottom" | "TruthElectrons"
        | "TruthMuons" | "TruthTaus" | "TruthPhotons" | "TruthNeutrinos" => "TruthParticle",
        c if c.ends_with("TrackParticles") => "TrackParticle",
        _ => "NanoCollection",
    }
}

/// `(collection, field, sub-field)` of a PHYSLITE branch name.
fn split_branch(name: &str) -> Option<(&str, &str, Option<&str>)> {
    let (container, rest) = name.split_once("AuxDyn.").or_else(|| name.split_once("Aux."))?;
    let collection = container.strip_prefix("Analysis").unwrap_or(container);
    if collection.is_empty() || rest.is_empty() {
        return None;
    }
    Some(match rest.split_once('.') {
        Some((field, sub)) => (collection, field, Some(sub)),
        None => (collection, rest, None),
    })
}

struct Part {
    branch: String,
    sub: Option<String>,
    form: Form,
}

/// PHYSLITE schema.
#[derive(Debug, Clone, Copy, Default)]
pub struct PHYSLITESchema;

impl Schema for PHYSLITESchema {
    fn name(&self) -> &'static str {
        "physlite"
    }

    fn build(&self, base: &Form) -> Result<Form> {
        let fields = base_fields(base)?;

        enum Slot {
            Branch(String, Form),
            Collection(String),
        }
        let mut slots = Vec::new();
        let mut collections: Groups<(String, Part)> = Groups::new();
        for (name, form) in fields {
            let parsed = split_branch(&name)
                .map(|(c, f, s)| (c.to_string(), f.to_string(), s.map(str::to_string)));
            match parsed {
                Some((coll, field, sub)) => {
                    if !collections.contains(&coll) {
                        slots.push(Slot::Collection(coll.clone()));
                    }
                    collections.push(&coll, (field, Part { branch: name, sub, form }));
                }
                None => slots.push(Slot::Branch(name, form)),
            }
        }

        // Element-level fields, offsets and link index branches per collection.
        let mut built: HashMap<String, (Vec<(String, Form)>, Option<String>)> = HashMap::new();
        let mut link_branches: HashMap<(String, String), (String, Form)> = HashMap::new();
        for (coll, parts) in collections.into_ordered() {
            let offsets = parts
                .iter()
                .find_map(|(_, p)| outer_offsets_key(&p.form))
                .map(str::to_string);
            let mut by_field: Groups<Part> = Groups::new();
            for (field, mut part) in parts {
                if offsets.is_some() {
                    if !part.form.is_list() {
                        log::warn!("{} is not jagged like its collection; skipping", part.branch);
                        continue;
                    }
                    part.form = part.form.strip_list()?;
                }
                by_field.push(&field, part);
            }
            let mut element = Vec::new();
            for (field, mut parts) in by_field.into_ordered() {
                if parts.len() == 1 && parts[0].sub.is_none() {
                    let part = parts.remove(0);
                    element.push((field, part.form));
                    continue;
                }
                if let Some(p) = parts.iter().find(|p| p.sub.as_deref() == Some(PERS_INDEX)) {
                    link_branches
                        .insert((coll.clone(), field.clone()), (p.branch.clone(), p.form.clone()));
                }
                let named = parts
                    .into_iter()
                    .map(|p| (p.sub.unwrap_or_else(|| field.clone()), p.form))
                    .collect();
                element.push((field, zip_innermost(named, &[])?));
            }
            built.insert(coll, (element, offsets));
        }

        for (coll, link, target) in LINKS {
            let Some((branch, shape)) = link_branches.get(&(coll.to_string(), link.to_string()))
            else {
                continue;
            };
            let Some(target_offsets) = built.get(target).and_then(|(_, o)| o.clone()) else {
                log::debug!("link {coll}.{link} target {target} not present");
                continue;
            };
            let leaf = global_index(local2global_key(branch, &target_offsets), target);
            if let Some((element, _)) = built.get_mut(coll) {
                element.push((format!("{link}IdxG"), replace_leaf(shape, leaf)));
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
        Behavior::physlite()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::{PARAM_TARGET, Primitive};
    use crate::schemas::testing;

    fn base() -> Form {
        testing::base(&[
            ("EventInfoAuxDyn.runNumber", Primitive::Uint32, 0),
            ("EventInfoAuxDyn.eventNumber", Primitive::Uint64, 0),
            ("AnalysisElectronsAuxDyn.pt", Primitive::Float32, 1),
            ("AnalysisElectronsAuxDyn.eta", Primitive::Float32, 1),
            ("AnalysisElectronsAuxDyn.trackParticleLinks.m_persKey", Primitive::Uint32, 2),
            ("AnalysisElectronsAuxDyn.trackParticleLinks.m_persIndex", Primitive::Uint32, 2),
            ("GSFTrackParticlesAuxDyn.qOverP", Primitive::Float32, 1),
            ("GSFTrackParticlesAuxDyn.theta", Primitive::Float32, 1),
            ("AnalysisMuonsAuxDyn.pt", Primitive::Float32, 1),
            ("AnalysisMuonsAuxDyn.inDetTrackParticleLink.m_persIndex", Primitive::Uint32, 1),
        ])
    }

    #[test]
    fn split_branch_names() {
        assert_eq!(split_branch("AnalysisJetsAuxDyn.pt"), Some(("Jets", "pt", None)));
        assert_eq!(
            split_branch("AnalysisMuonsAuxDyn.inDetTrackParticleLink.m_persKey"),
            Some(("Muons", "inDetTrackParticleLink", Some("m_persKey")))
        );
        assert_eq!(split_branch("EventInfoAux.mcChannelNumber"), Some(("EventInfo", "mcChannelNumber", None)));
        assert_eq!(split_branch("plain"), None);
    }

    #[test]
    fn containers_and_links() {
        let form = PHYSLITESchema.build(&base()).unwrap();
        assert_eq!(form.fields(), vec!["EventInfo", "Electrons", "GSFTrackParticles", "Muons"]);
        assert!(!form.field("EventInfo").unwrap().is_list());
        assert_eq!(form.field("GSFTrackParticles").unwrap().behavior_name(), Some("TrackParticle"));

        let electrons = form.field("Electrons").unwrap();
        assert_eq!(electrons.behavior_name(), Some("Electron"));
        let el = electrons.innermost();
        let links = el.field("trackParticleLinks").unwrap();
        assert_eq!(links.list_depth(), 1);
        assert_eq!(links.fields(), vec!["m_persKey", "m_persIndex"]);

        let idx = el.field("trackParticleLinksIdxG").unwrap();
        assert_eq!(idx.list_depth(), 1);
        assert_eq!(idx.innermost().parameter(PARAM_TARGET), Some("GSFTrackParticles"));
        assert_eq!(
            idx.innermost().form_keys(),
            vec!["AnalysisElectronsAuxDyn.trackParticleLinks.m_persIndex,!load,GSFTrackParticlesAuxDyn.qOverP,!load,!offsets,!local2global"]
        );

        // InDetTrackParticles is absent: raw link kept, no global index.
        let mu = form.field("Muons").unwrap().innermost();
        assert!(mu.field("inDetTrackParticleLink").is_some());
        assert!(mu.field("inDetTrackParticleLinkIdxG").is_none());
    }
}
