//! Factories over Parquet files and bytes.

#![cfg(feature = "parquet-io")]

use std::path::PathBuf;

use approx::assert_relative_eq;

use ns_nanoevents::array::Array;
use ns_nanoevents::factory::FactoryOptions;
use ns_nanoevents::form::PARAM_DOC;
use ns_nanoevents::source::{ColumnSource, PreloadedSource, write_parquet, write_parquet_bytes};
use ns_nanoevents::{BaseSchema, NanoEventsFactory, TreeMakerSchema};

fn tmp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("ns_nanoevents_{}_{name}.parquet", std::process::id()))
}

fn delphes_source() -> PreloadedSource {
    PreloadedSource::new(vec![
        ("Jet_size".to_string(), Array::from_vec(vec![2i32, 0, 1])),
        ("Jet.PT".to_string(), Array::from_rows(vec![vec![55.0f32, 31.0], vec![], vec![70.0]])),
        ("Jet.Eta".to_string(), Array::from_rows(vec![vec![0.3f32, -0.7], vec![], vec![1.1]])),
        ("Jet.Phi".to_string(), Array::from_rows(vec![vec![0.2f32, 2.9], vec![], vec![-1.0]])),
        ("Jet.Mass".to_string(), Array::from_rows(vec![vec![8.0f32, 5.0], vec![], vec![9.0]])),
        ("MissingET.MET".to_string(), Array::from_rows(vec![vec![12.0f32], vec![40.0], vec![3.0]])),
        ("MissingET.Phi".to_string(), Array::from_rows(vec![vec![0.1f32], vec![-2.0], vec![1.0]])),
    ])
    .unwrap()
    .with_uuid("delphes-1")
    .with_doc("Jet.PT", "jet transverse momentum")
}

#[test]
fn delphes_from_file_with_json_options() {
    let path = tmp_path("delphes");
    write_parquet(&path, &delphes_source()).unwrap();

    let opts = FactoryOptions::from_json(
        r#"{"schema": "delphes", "entry_stop": 2, "metadata": {"sample": "ttbar"}}"#,
    )
    .unwrap();
    let f = NanoEventsFactory::from_parquet(&path, opts).unwrap();
    assert_eq!(f.entry_range(), (0, 2));
    assert!(f.partition_key().starts_with("delphes-1/"));
    assert!(f.partition_key().ends_with("/0-2"));

    let events = f.events();
    assert_eq!(events.metadata()["sample"], "ttbar");
    let jets = events.collection("Jet").unwrap();
    assert_eq!(jets.behavior_name(), Some("Jet"));
    assert_eq!(jets.counts().unwrap(), vec![2, 0]);
    assert_eq!(jets.field("PT").unwrap().to_f64_rows().unwrap(), vec![vec![55.0, 31.0], vec![]]);

    let p4 = jets.p4().unwrap();
    assert_relative_eq!(p4[0][0].pt(), 55.0, epsilon = 1e-4);
    assert_relative_eq!(p4[0][1].phi(), 2.9, epsilon = 1e-5);

    let met = events.collection("MissingET").unwrap();
    assert_eq!(met.behavior_name(), Some("MissingET"));
    assert_eq!(met.field("MET").unwrap().to_f64_rows().unwrap(), vec![vec![12.0], vec![40.0]]);

    std::fs::remove_file(&path).ok();
}

#[test]
fn branch_docs_survive_parquet() {
    let bytes = write_parquet_bytes(&delphes_source()).unwrap();
    let f = NanoEventsFactory::from_parquet_bytes(bytes, FactoryOptions::new().schema(BaseSchema))
        .unwrap();
    let pt = f.form().field("Jet.PT").unwrap();
    assert_eq!(pt.parameter(PARAM_DOC), Some("jet transverse momentum"));
    assert_eq!(f.form().field("Jet.Eta").unwrap().parameter(PARAM_DOC), None);
}

#[test]
fn treemaker_from_bytes() {
    let source = PreloadedSource::new(vec![
        ("RunNum".to_string(), Array::from_vec(vec![1u32, 1])),
        ("Jets.fCoordinates.fPt".to_string(), Array::from_rows(vec![vec![100.0f64], vec![60.0, 45.0]])),
        ("Jets.fCoordinates.fEta".to_string(), Array::from_rows(vec![vec![0.0f64], vec![1.0, -1.0]])),
        ("Jets.fCoordinates.fPhi".to_string(), Array::from_rows(vec![vec![0.5f64], vec![1.0, 2.0]])),
        ("Jets.fCoordinates.fE".to_string(), Array::from_rows(vec![vec![101.0f64], vec![95.0, 70.0]])),
        ("Jets_jetId".to_string(), Array::from_rows(vec![vec![1i32], vec![1, 0]])),
    ])
    .unwrap();
    let bytes = write_parquet_bytes(&source).unwrap();

    let f = NanoEventsFactory::from_parquet_bytes(
        bytes,
        FactoryOptions::new().schema(TreeMakerSchema).entry_start(1),
    )
    .unwrap();
    // No explicit uuid: the content-derived one is written and read back.
    assert!(f.partition_key().starts_with(source.uuid()));

    let events = f.events();
    let jets = events.collection("Jets").unwrap();
    assert_eq!(jets.behavior_name(), Some("PtEtaPhiELorentzVector"));
    assert_eq!(jets.fields(), vec!["pt", "eta", "phi", "energy", "jetId"]);
    let p4 = jets.p4().unwrap();
    assert_eq!(p4.len(), 1);
    assert_relative_eq!(p4[0][1].energy(), 70.0, epsilon = 1e-9);
    assert_relative_eq!(p4[0][0].eta(), 1.0, epsilon = 1e-9);
}

#[test]
fn empty_partition_past_skipped_column() {
    use std::sync::Arc;

    use arrow::array::{ArrayRef, Float32Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};
    use arrow::record_batch::RecordBatch;
    use parquet::arrow::ArrowWriter;

    let schema = Arc::new(Schema::new(vec![
        Field::new("label", DataType::Utf8, false),
        Field::new("x", DataType::Float32, false),
    ]));
    let label: ArrayRef = Arc::new(StringArray::from(vec!["a", "b"]));
    let x: ArrayRef = Arc::new(Float32Array::from(vec![1.0f32, 2.0]));
    let batch = RecordBatch::try_new(schema, vec![label, x]).unwrap();
    let mut bytes = Vec::new();
    {
        let mut writer = ArrowWriter::try_new(&mut bytes, batch.schema(), None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();
    }

    let f = NanoEventsFactory::from_parquet_bytes(
        bytes,
        FactoryOptions::new().schema(BaseSchema).entry_start(2),
    )
    .unwrap();
    assert_eq!(f.entry_range(), (2, 2));
    assert_eq!(f.form().fields(), vec!["x"]);
    let events = f.events();
    assert_eq!(events.len(), 0);
    assert_eq!(events.get("x").unwrap().len(), 0);
}
