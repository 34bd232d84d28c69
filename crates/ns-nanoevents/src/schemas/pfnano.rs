//! NanoAOD with particle-flow candidates (PFNano).
//!
//! Adds the `PFCands` collection, the jet-to-candidate association tables
//! (`JetPFCands`, `FatJetPFCands`, `JetSVs`, `FatJetSVs`) and, per jet, the
//! list of its association-table rows (`pFCandsIdxG`) derived from
//! `{Jet}_nConstituents`.

use crate::behavior::Behavior;
use crate::error::Result;
use crate::form::Form;

use super::nanoaod::{NANO_TABLES, NanoAODSchema, NanoTables};
use super::{Schema, counts_offsets_key, global_index, push_field};

const PF_TABLES: NanoTables = NanoTables {
    mixins: &[
        ("PFCands", "PFCand"),
        ("JetPFCands", "AssociatedPFCand"),
        ("FatJetPFCands", "AssociatedPFCand"),
        ("JetSVs", "AssociatedSV"),
        ("FatJetSVs", "AssociatedSV"),
    ],
    cross_refs: &[
        ("JetPFCands_pFCandsIdx", "PFCands"),
        ("JetPFCands_jetIdx", "Jet"),
        ("FatJetPFCands_pFCandsIdx", "PFCands"),
        ("FatJetPFCands_jetIdx", "FatJet"),
        ("JetSVs_sVIdx", "SV"),
        ("JetSVs_jetIdx", "Jet"),
        ("FatJetSVs_sVIdx", "SV"),
        ("FatJetSVs_jetIdx", "FatJet"),
    ],
    nested: &[],
};

/// Jet collection -> its candidate association table.
const CONSTITUENTS: [(&str, &str); 2] = [("Jet", "JetPFCands"), ("FatJet", "FatJetPFCands")];

/// PFNano schema: [`NanoAODSchema`] plus particle-flow collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PFNanoAODSchema {
    /// Options of the underlying NanoAOD layout.
    pub nano: NanoAODSchema,
}

impl PFNanoAODSchema {
    /// PFNano layout over the given NanoAOD options.
    pub fn new(nano: NanoAODSchema) -> Self {
        Self { nano }
    }
}

impl Schema for PFNanoAODSchema {
    fn name(&self) -> &'static str {
        "pfnanoaod"
    }

    fn build(&self, base: &Form) -> Result<Form> {
        let branch_names: Vec<String> = base.fields().into_iter().map(str::to_string).collect();
        let mut fields = self.nano.build_fields(base, &[&NANO_TABLES, &PF_TABLES])?;

        for (jet, table) in CONSTITUENTS {
            let counts = format!("{jet}_nConstituents");
            let table_counter = format!("n{table}");
            if !branch_names.contains(&counts) || !branch_names.contains(&table_counter) {
                continue;
            }
            let Some((_, collection)) = fields.iter_mut().find(|(n, _)| n == jet) else {
                continue;
            };
            let index = Form::list(
                format!("{counts},!load,!content,!counts2offsets"),
                global_index(
                    format!(
                        "{counts},!load,{},!counts2nestedindex",
                        counts_offsets_key(&table_counter)
                    ),
                    table,
                ),
            );
            push_field(collection, "pFCandsIdxG", index)?;
        }
        Form::record(fields)
    }

    fn behavior(&self) -> Behavior {
        Behavior::pfnanoaod()
    }
}
