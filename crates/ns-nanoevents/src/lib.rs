//! # ns-nanoevents
//!
//! Lazy, schema-driven event views over flat and jagged columnar branches.
//!
//! A column source (in-memory arrays or a Parquet file) exposes one branch
//! per column. A schema turns the flat branch list into a nested form:
//! `Jet_pt`/`Jet_eta` plus the `nJet` counter become a jagged `Jet`
//! collection, `Jet_genJetIdx` gets a global `genJetIdxG` cross-reference,
//! and so on. Nothing is read until a field is materialized; every loaded
//! buffer lands in a shared runtime cache keyed by partition.
//!
//! The crate root re-exports the factory and the schema types. Everything
//! else is reachable through its module.
//!
//! ## Example
//!
//! ```
//! use ns_nanoevents::array::Array;
//! use ns_nanoevents::factory::FactoryOptions;
//! use ns_nanoevents::source::PreloadedSource;
//! use ns_nanoevents::{NanoAODSchema, NanoEventsFactory};
//!
//! let source = PreloadedSource::new(vec![
//!     ("run".to_string(), Array::from_vec(vec![1u32, 1])),
//!     ("luminosityBlock".to_string(), Array::from_vec(vec![3u32, 3])),
//!     ("event".to_string(), Array::from_vec(vec![10u64, 11])),
//!     ("nJet".to_string(), Array::from_vec(vec![2u32, 0])),
//!     ("Jet_pt".to_string(), Array::from_rows(vec![vec![40.0f32, 25.0], vec![]])),
//! ])
//! .unwrap();
//!
//! let factory = NanoEventsFactory::from_preloaded(
//!     source,
//!     FactoryOptions::new().schema(NanoAODSchema::default()),
//! )
//! .unwrap();
//! let events = factory.events();
//! let jets = events.collection("Jet").unwrap();
//! assert_eq!(jets.counts().unwrap(), vec![2, 0]);
//! assert_eq!(jets.field("pt").unwrap().to_f64_rows().unwrap(), vec![vec![40.0, 25.0], vec![]]);
//! ```
//!
//! The form-key interpreter and its kernels are internal:
//!
//! ```compile_fail
//! use ns_nanoevents::mapping::KeyMapping;
//! ```
//!
//! ```compile_fail
//! use ns_nanoevents::transforms::counts2offsets;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod array;
pub mod behavior;
pub mod cache;
pub mod error;
pub mod events;
pub mod factory;
pub mod form;
pub mod schemas;
pub mod source;

mod mapping;
mod transforms;

pub use factory::NanoEventsFactory;
pub use schemas::{
    BaseSchema, DelphesSchema, NanoAODSchema, PFNanoAODSchema, PHYSLITESchema, TreeMakerSchema,
};

/// Names re-exported at the crate root.
pub const PUBLIC_API: [&str; 7] = [
    "NanoEventsFactory",
    "BaseSchema",
    "NanoAODSchema",
    "PFNanoAODSchema",
    "TreeMakerSchema",
    "PHYSLITESchema",
    "DelphesSchema",
];
