//! Crate-root re-exports: identity with the defining modules and the exact
//! export list.

use std::any::TypeId;

use ns_nanoevents::{
    BaseSchema, DelphesSchema, NanoAODSchema, NanoEventsFactory, PFNanoAODSchema, PHYSLITESchema,
    PUBLIC_API, TreeMakerSchema, factory, schemas,
};

#[test]
fn reexports_are_the_defining_types() {
    assert_eq!(TypeId::of::<NanoEventsFactory>(), TypeId::of::<factory::NanoEventsFactory>());
    assert_eq!(TypeId::of::<BaseSchema>(), TypeId::of::<schemas::BaseSchema>());
    assert_eq!(TypeId::of::<NanoAODSchema>(), TypeId::of::<schemas::NanoAODSchema>());
    assert_eq!(TypeId::of::<PFNanoAODSchema>(), TypeId::of::<schemas::PFNanoAODSchema>());
    assert_eq!(TypeId::of::<TreeMakerSchema>(), TypeId::of::<schemas::TreeMakerSchema>());
    assert_eq!(TypeId::of::<PHYSLITESchema>(), TypeId::of::<schemas::PHYSLITESchema>());
    assert_eq!(TypeId::of::<DelphesSchema>(), TypeId::of::<schemas::DelphesSchema>());
}

#[test]
fn export_list_is_exact() {
    assert_eq!(
        PUBLIC_API,
        [
            "NanoEventsFactory",
            "BaseSchema",
            "NanoAODSchema",
            "PFNanoAODSchema",
            "TreeMakerSchema",
            "PHYSLITESchema",
            "DelphesSchema",
        ]
    );
    let mut unique = PUBLIC_API.to_vec();
    unique.sort_unstable();
    unique.dedup();
    assert_eq!(unique.len(), PUBLIC_API.len());
}

#[test]
fn schema_names_match_lookup() {
    use ns_nanoevents::schemas::{Schema, schema_from_name};

    let by_type: [(&str, Box<dyn Schema>); 6] = [
        ("base", Box::new(BaseSchema)),
        ("nanoaod", Box::new(NanoAODSchema::default())),
        ("pfnanoaod", Box::new(PFNanoAODSchema::default())),
        ("treemaker", Box::new(TreeMakerSchema)),
        ("physlite", Box::new(PHYSLITESchema)),
        ("delphes", Box::new(DelphesSchema)),
    ];
    for (name, schema) in by_type {
        assert_eq!(schema.name(), name);
        assert_eq!(schema_from_name(name).unwrap().name(), name);
    }
}

fn assert_send_sync<T: Send + Sync>() {}

#[test]
fn shared_types_are_send_sync() {
    assert_send_sync::<NanoEventsFactory>();
    assert_send_sync::<ns_nanoevents::events::NanoEvents>();
    assert_send_sync::<NanoAODSchema>();
    assert_send_sync::<PFNanoAODSchema>();
}
