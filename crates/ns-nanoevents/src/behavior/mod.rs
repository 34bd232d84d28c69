//! Record behaviors (mixins).
//!
//! A schema tags every collection record with a `__record__` name. The
//! [`Behavior`] registry maps that name to a [`Mixin`]: how the record
//! encodes its kinematics, and which global-index fields implement
//! cross-collection attributes such as `matched_gen` or `children`.

mod vector;

use std::collections::BTreeMap;

pub use vector::{LorentzVector, VectorKind, wrap_phi};

/// Behavior attached to a record name.
#[derive(Debug, Clone, PartialEq)]
pub struct Mixin {
    /// Record name (`__record__` value).
    pub name: String,
    /// Kinematic encoding.
    pub kind: VectorKind,
    /// Attribute name -> global-index field name.
    pub links: BTreeMap<String, String>,
}

impl Mixin {
    /// Mixin without links.
    pub fn new(name: impl Into<String>, kind: VectorKind) -> Self {
        Self { name: name.into(), kind, links: BTreeMap::new() }
    }

    /// Add a cross-reference attribute backed by a global-index field.
    pub fn link(mut self, attribute: impl Into<String>, field: impl Into<String>) -> Self {
        self.links.insert(attribute.into(), field.into());
        self
    }
}

/// Registry of mixins by record name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Behavior {
    mixins: BTreeMap<String, Mixin>,
}

impl Behavior {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a mixin.
    pub fn register(&mut self, mixin: Mixin) {
        self.mixins.insert(mixin.name.clone(), mixin);
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, mixin: Mixin) -> Self {
        self.register(mixin);
        self
    }

    /// Mixin registered under `name`.
    pub fn get(&self, name: &str) -> Option<&Mixin> {
        self.mixins.get(name)
    }

    /// Kinematic kind of a record name (`None` when unregistered).
    pub fn kind_of(&self, name: &str) -> VectorKind {
        self.get(name).map_or(VectorKind::None, |m| m.kind)
    }

    /// Global-index field implementing `attribute` on `name` records.
    pub fn link_field(&self, name: &str, attribute: &str) -> Option<&str> {
        self.get(name)?.links.get(attribute).map(String::as_str)
    }

    /// Registered record names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.mixins.keys().map(String::as_str)
    }

    /// Number of registered mixins.
    pub fn len(&self) -> usize {
        self.mixins.len()
    }

    /// Whether no mixin is registered.
    pub fn is_empty(&self) -> bool {
        self.mixins.is_empty()
    }

    /// No behaviors.
    pub fn base() -> Self {
        Self::default()
    }

    /// CMS NanoAOD record behaviors.
    pub fn nanoaod() -> Self {
        use VectorKind::*;
        let mut b = Self::new().with(Mixin::new("NanoCollection", None));
        b.register(Mixin::new("MissingET", Polar2));
        b.register(Mixin::new("Vertex", Cartesian3));
        b.register(Mixin::new("SecondaryVertex", PtEtaPhiM));
        b.register(Mixin::new("PtEtaPhiMCandidate", PtEtaPhiM));
        b.register(Mixin::new("GenVisTau", PtEtaPhiM).link("parent", "genPartIdxMotherG"));
        b.register(
            Mixin::new("Electron", PtEtaPhiM)
                .link("matched_gen", "genPartIdxG")
                .link("matched_jet", "jetIdxG")
                .link("matched_photon", "photonIdxG"),
        );
        b.register(
            Mixin::new("LowPtElectron", PtEtaPhiM)
                .link("matched_gen", "genPartIdxG")
                .link("matched_electron", "electronIdxG")
                .link("matched_photon", "photonIdxG"),
        );
        b.register(
            Mixin::new("Muon", PtEtaPhiM)
                .link("matched_gen", "genPartIdxG")
                .link("matched_jet", "jetIdxG")
                .link("matched_fsrPhoton", "fsrPhotonIdxG"),
        );
        b.register(
            Mixin::new("Photon", PtEtaPhiM)
                .link("matched_gen", "genPartIdxG")
                .link("matched_jet", "jetIdxG")
                .link("matched_electron", "electronIdxG"),
        );
        b.register(Mixin::new("FsrPhoton", PtEtaPhiM).link("matched_muon", "muonIdxG"));
        b.register(
            Mixin::new("Tau", PtEtaPhiM)
                .link("matched_gen", "genPartIdxG")
                .link("matched_jet", "jetIdxG"),
        );
        b.register(
            Mixin::new("Jet", PtEtaPhiM)
                .link("matched_gen", "genJetIdxG")
                .link("matched_muons", "muonIdxG")
                .link("matched_electrons", "electronIdxG"),
        );
        b.register(
            Mixin::new("FatJet", PtEtaPhiM)
                .link("matched_gen", "genJetAK8IdxG")
                .link("subjets", "subJetIdxG"),
        );
        b.register(Mixin::new("SubJet", PtEtaPhiM));
        b.register(Mixin::new("GenJet", PtEtaPhiM));
        b.register(Mixin::new("GenJetAK8", PtEtaPhiM));
        b.register(
            Mixin::new("GenParticle", PtEtaPhiM)
                .link("parent", "genPartIdxMotherG")
                .link("distinct_parent", "distinctParentIdxG")
                .link("children", "childrenIdxG")
                .link("distinct_children", "distinctChildrenIdxG")
                .link("distinct_children_deep", "distinctChildrenDeepIdxG"),
        );
        b
    }

    /// NanoAOD plus particle-flow candidate behaviors.
    pub fn pfnanoaod() -> Self {
        use VectorKind::*;
        let mut b = Self::nanoaod();
        b.register(Mixin::new("PFCand", PtEtaPhiM));
        b.register(
            Mixin::new("AssociatedPFCand", None).link("jet", "jetIdxG").link("pf", "pFCandsIdxG"),
        );
        b.register(Mixin::new("AssociatedSV", None).link("jet", "jetIdxG").link("sv", "sVIdxG"));
        for name in ["Jet", "FatJet"] {
            if let Some(mut m) = b.get(name).cloned() {
                m.links.insert("constituents".into(), "pFCandsIdxG".into());
                b.register(m);
            }
        }
        b
    }

    /// TreeMaker (CMS SUSY ntuple) behaviors.
    pub fn treemaker() -> Self {
        Self::new()
            .with(Mixin::new("NanoCollection", VectorKind::None))
            .with(Mixin::new("PtEtaPhiELorentzVector", VectorKind::PtEtaPhiE).link("parent", "ParentIdxG"))
            .with(Mixin::new("ThreeVector", VectorKind::Cartesian3))
    }

    /// ATLAS PHYSLITE behaviors.
    pub fn physlite() -> Self {
        use VectorKind::*;
        let mut b = Self::new().with(Mixin::new("NanoCollection", None));
        b.register(
            Mixin::new("Electron", PtEtaPhiM)
                .link("track_particles", "trackParticleLinksIdxG")
                .link("calo_clusters", "caloClusterLinksIdxG"),
        );
        b.register(
            Mixin::new("Muon", PtEtaPhiM)
                .link("track_particle", "inDetTrackParticleLinkIdxG")
                .link("combined_track", "combinedTrackParticleLinkIdxG")
                .link("extrapolated_track", "extrapolatedMuonSpectrometerTrackParticleLinkIdxG")
                .link("spectrometer_track", "muonSpectrometerTrackParticleLinkIdxG"),
        );
        b.register(Mixin::new("Photon", PtEtaPhiM).link("calo_clusters", "caloClusterLinksIdxG"));
        b.register(Mixin::new("Jet", PtEtaPhiM));
        b.register(Mixin::new("Tau", PtEtaPhiM));
        b.register(Mixin::new("TrackParticle", QOverPThetaPhi));
        b.register(Mixin::new("TruthParticle", PtEtaPhiM));
        b
    }

    /// Delphes fast-simulation behaviors.
    pub fn delphes() -> Self {
        use VectorKind::*;
        let mut b = Self::new().with(Mixin::new("NanoCollection", None));
        for name in ["Jet", "Electron", "Muon", "Photon", "Track"] {
            b.register(Mixin::new(name, PtEtaPhiM));
        }
        b.register(Mixin::new("Tower", PtEtaPhiE));
        b.register(Mixin::new("MissingET", Polar2));
        b.register(
            Mixin::new("Particle", PtEtaPhiM)
                .link("mother1", "M1IdxG")
                .link("mother2", "M2IdxG")
                .link("daughter1", "D1IdxG")
                .link("daughter2", "D2IdxG"),
        );
        b
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nanoaod_registry() {
        let b = Behavior::nanoaod();
        assert_eq!(b.kind_of("Jet"), VectorKind::PtEtaPhiM);
        assert_eq!(b.kind_of("MissingET"), VectorKind::Polar2);
        assert_eq!(b.kind_of("Unknown"), VectorKind::None);
        assert_eq!(b.link_field("Electron", "matched_gen"), Some("genPartIdxG"));
        assert_eq!(b.link_field("GenParticle", "children"), Some("childrenIdxG"));
        assert_eq!(b.link_field("Jet", "constituents"), None);
    }

    #[test]
    fn pfnano_extends_jets() {
        let b = Behavior::pfnanoaod();
        assert_eq!(b.link_field("Jet", "constituents"), Some("pFCandsIdxG"));
        assert_eq!(b.link_field("Jet", "matched_gen"), Some("genJetIdxG"));
        assert_eq!(b.link_field("AssociatedPFCand", "pf"), Some("pFCandsIdxG"));
        assert!(b.len() > Behavior::nanoaod().len());
    }

    #[test]
    fn base_is_empty() {
        assert!(Behavior::base().is_empty());
        assert_eq!(Behavior::base().names().count(), 0);
    }
}
