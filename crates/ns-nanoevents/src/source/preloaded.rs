//! In-memory column source.

use std::collections::{BTreeMap, HashMap};

use super::{BranchInfo, ColumnSource, check_range, content_uuid};
use crate::array::Array;
use crate::error::{NanoEventsError, Result};

/// Already-materialized branches held in memory.
///
/// Useful for tests, for data produced by other tools, and as the staging
/// format for [`write_parquet`](super::write_parquet).
#[derive(Debug, Clone)]
pub struct PreloadedSource {
    columns: BTreeMap<String, Array>,
    order: Vec<String>,
    docs: HashMap<String, String>,
    entries: u64,
    uuid: String,
    object_path: String,
}

impl PreloadedSource {
    /// Build from named columns. All columns must have the same number of entries.
    pub fn new(columns: impl IntoIterator<Item = (String, Array)>) -> Result<Self> {
        let mut map = BTreeMap::new();
        let mut order = Vec::new();
        let mut entries: Option<usize> = None;
        for (name, array) in columns {
            if name.is_empty() || name.contains(',') || name.starts_with('!') {
                return Err(NanoEventsError::Validation(format!(
                    "invalid branch name '{name}'"
                )));
            }
            BranchInfo::from_array(&name, &array)?;
            array.validate()?;
            match entries {
                Some(n) if n != array.len() => {
                    return Err(NanoEventsError::Validation(format!(
                        "branch '{name}' has {} entries, expected {n}",
                        array.len()
                    )));
                }
                None => entries = Some(array.len()),
                _ => {}
            }
            if map.insert(name.clone(), array).is_some() {
                return Err(NanoEventsError::Validation(format!("duplicate branch '{name}'")));
            }
            order.push(name);
        }
        let entries = entries.unwrap_or(0) as u64;
        let count = entries.to_string();
        let mut parts: Vec<&str> = map.keys().map(String::as_str).collect();
        parts.push(&count);
        let uuid = content_uuid(&parts);
        Ok(Self {
            columns: map,
            order,
            docs: HashMap::new(),
            entries,
            uuid,
            object_path: "/Events".to_string(),
        })
    }

    /// Override the content-derived uuid.
    pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = uuid.into();
        self
    }

    /// Set the object path reported in partition keys.
    pub fn with_object_path(mut self, path: impl Into<String>) -> Self {
        self.object_path = path.into();
        self
    }

    /// Attach documentation to a branch.
    pub fn with_doc(mut self, branch: impl Into<String>, doc: impl Into<String>) -> Self {
        self.docs.insert(branch.into(), doc.into());
        self
    }

    /// Direct access to a stored column.
    pub fn column(&self, name: &str) -> Option<&Array> {
        self.columns.get(name)
    }

    /// Branch names in insertion order.
    pub fn names(&self) -> &[String] {
        &self.order
    }
}

impl ColumnSource for PreloadedSource {
    fn num_entries(&self) -> u64 {
        self.entries
    }

    fn branches(&self) -> Vec<BranchInfo> {
        self.order
            .iter()
            .filter_map(|name| {
                let array = self.columns.get(name)?;
                let mut info = BranchInfo::from_array(name, array).ok()?;
                info.doc = self.docs.get(name).cloned();
                Some(info)
            })
            .collect()
    }

    fn read(&self, name: &str, start: u64, stop: u64) -> Result<Array> {
        check_range(start, stop, self.entries)?;
        let array = self
            .columns
            .get(name)
            .ok_or_else(|| NanoEventsError::BranchNotFound(name.to_string()))?;
        if start == 0 && stop == self.entries {
            return Ok(array.clone());
        }
        array.slice_entries(start as usize, stop as usize)
    }

    fn uuid(&self) -> &str {
        &self.uuid
    }

    fn object_path(&self) -> &str {
        &self.object_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> PreloadedSource {
        PreloadedSource::new(vec![
            ("run".to_string(), Array::from_vec(vec![1u32, 1, 2])),
            ("Jet_pt".to_string(), Array::from_rows(vec![vec![10.0f32], vec![], vec![5.0, 6.0]])),
        ])
        .unwrap()
    }

    #[test]
    fn reads_sub_ranges() {
        let s = source();
        assert_eq!(s.num_entries(), 3);
        let pt = s.read("Jet_pt", 1, 3).unwrap();
        assert_eq!(pt.to_f64_rows().unwrap(), vec![vec![], vec![5.0, 6.0]]);
        assert!(s.read("Jet_pt", 2, 4).is_err());
        assert!(matches!(s.read("nope", 0, 1), Err(NanoEventsError::BranchNotFound(_))));
    }

    #[test]
    fn rejects_mismatched_lengths() {
        let err = PreloadedSource::new(vec![
            ("a".to_string(), Array::from_vec(vec![1i32])),
            ("b".to_string(), Array::from_vec(vec![1i32, 2])),
        ]);
        assert!(err.is_err());
    }

    #[test]
    fn rejects_program_like_names() {
        assert!(PreloadedSource::new(vec![("a,b".to_string(), Array::from_vec(vec![1i32]))]).is_err());
        assert!(PreloadedSource::new(vec![("!load".to_string(), Array::from_vec(vec![1i32]))]).is_err());
    }

    #[test]
    fn branches_keep_order_and_docs() {
        let s = source().with_doc("run", "run number");
        let names: Vec<String> = s.branches().into_iter().map(|b| b.name).collect();
        assert_eq!(names, vec!["run", "Jet_pt"]);
        assert_eq!(s.branches()[0].doc.as_deref(), Some("run number"));
    }

    #[test]
    fn uuid_depends_on_content() {
        let a = source();
        let b = PreloadedSource::new(vec![("run".to_string(), Array::from_vec(vec![1u32]))]).unwrap();
        assert_ne!(a.uuid(), b.uuid());
        assert_eq!(a.with_uuid("fixed").uuid(), "fixed");
    }
}
