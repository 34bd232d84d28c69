//! Kernels behind the form-key operations.
//!
//! All kernels work on flattened buffers for the whole entry range, so a
//! "global" index addresses the flattened content of a collection and a
//! "local" index addresses elements within one event.

use std::sync::Arc;

use crate::array::{Array, Buffer};
use crate::error::{NanoEventsError, Result};

/// `[0, c0, c0 + c1, ...]` from per-entry counts.
pub(crate) fn counts2offsets(counts: &Buffer) -> Result<Vec<i64>> {
    let counts = counts.to_i64()?;
    let mut offsets = Vec::with_capacity(counts.len() + 1);
    let mut acc = 0i64;
    offsets.push(acc);
    for (i, c) in counts.into_iter().enumerate() {
        if c < 0 {
            return Err(NanoEventsError::Validation(format!("negative count {c} at entry {i}")));
        }
        acc += c;
        offsets.push(acc);
    }
    Ok(offsets)
}

/// Offsets of a jagged value as an `int64` buffer.
pub(crate) fn offsets_of(list: &Array) -> Result<Array> {
    match list {
        Array::ListOffset { offsets, .. } => Ok(Array::Numpy(Buffer::Int64(Arc::clone(offsets)))),
        _ => Err(NanoEventsError::TypeMismatch("!offsets applied to a non-list value".into())),
    }
}

/// Content of a jagged value.
pub(crate) fn content_of(list: &Array) -> Result<Array> {
    match list {
        Array::ListOffset { content, .. } => Ok(content.as_ref().clone()),
        _ => Err(NanoEventsError::TypeMismatch("!content applied to a non-list value".into())),
    }
}

/// Leaf buffer of a list-only array plus, per outer entry, the range of leaf
/// elements belonging to it.
fn leaf_ranges(index: &Array) -> Result<(&Buffer, Vec<(usize, usize)>)> {
    let Array::ListOffset { offsets, content } = index else {
        return Err(NanoEventsError::TypeMismatch(
            "local index must be jagged along the event axis".into(),
        ));
    };
    let mut ranges: Vec<(usize, usize)> =
        offsets.windows(2).map(|w| (w[0] as usize, w[1] as usize)).collect();
    let mut node: &Array = content;
    loop {
        match node {
            Array::Numpy(b) => return Ok((b, ranges)),
            Array::ListOffset { offsets, content } => {
                for r in &mut ranges {
                    *r = (offsets[r.0] as usize, offsets[r.1] as usize);
                }
                node = content.as_ref();
            }
            Array::Regular { size, content } => {
                for r in &mut ranges {
                    *r = (r.0 * size, r.1 * size);
                }
                node = content.as_ref();
            }
            _ => {
                return Err(NanoEventsError::TypeMismatch(
                    "local index leaf must be an integer buffer".into(),
                ));
            }
        }
    }
}

/// Turn an event-local index into a global index into the target collection.
///
/// `index` is jagged along the event axis (and may be jagged again below it);
/// the result is parallel to its flattened leaf. Out-of-range locals map to `-1`.
pub(crate) fn local2global(index: &Array, target_offsets: &[i64]) -> Result<Vec<i64>> {
    let (leaf, ranges) = leaf_ranges(index)?;
    if target_offsets.len() != ranges.len() + 1 {
        return Err(NanoEventsError::Validation(format!(
            "index covers {} events but target offsets cover {}",
            ranges.len(),
            target_offsets.len().saturating_sub(1)
        )));
    }
    let local = leaf.to_i64()?;
    let mut out = vec![-1i64; local.len()];
    for (event, &(lo, hi)) in ranges.iter().enumerate() {
        let start = target_offsets[event];
        let count = target_offsets[event + 1] - start;
        for k in lo..hi {
            let l = local[k];
            if l >= 0 && l < count {
                out[k] = start + l;
            }
        }
    }
    Ok(out)
}

/// Interleave `k` index arrays of equal length into one flat array of `k * n`.
pub(crate) fn nestedindex(indexers: &[Vec<i64>]) -> Result<Vec<i64>> {
    let Some(first) = indexers.first() else {
        return Err(NanoEventsError::Validation("nestedindex needs at least one index".into()));
    };
    let n = first.len();
    if indexers.iter().any(|ix| ix.len() != n) {
        return Err(NanoEventsError::Validation(
            "nestedindex inputs must have equal lengths".into(),
        ));
    }
    let k = indexers.len();
    let mut out = vec![0i64; n * k];
    for (j, ix) in indexers.iter().enumerate() {
        for (i, &v) in ix.iter().enumerate() {
            out[i * k + j] = v;
        }
    }
    Ok(out)
}

/// Global index `0..total` for a doubly-jagged "constituents" layout.
///
/// `counts` is jagged along the event axis (e.g. `Jet_nConstituents`); the
/// constituents of event `e` must exactly fill the target range of event `e`.
pub(crate) fn counts2nestedindex(counts: &Array, target_offsets: &[i64]) -> Result<Vec<i64>> {
    let (leaf, ranges) = leaf_ranges(counts)?;
    if target_offsets.len() != ranges.len() + 1 {
        return Err(NanoEventsError::Validation(format!(
            "counts cover {} events but target offsets cover {}",
            ranges.len(),
            target_offsets.len().saturating_sub(1)
        )));
    }
    let counts = leaf.to_i64()?;
    for (event, &(lo, hi)) in ranges.iter().enumerate() {
        let owned: i64 = counts[lo..hi].iter().sum();
        let available = target_offsets[event + 1] - target_offsets[event];
        if owned != available {
            return Err(NanoEventsError::Validation(format!(
                "event {event}: constituent counts sum to {owned} but target has {available}"
            )));
        }
    }
    let first = target_offsets[0];
    let last = target_offsets[target_offsets.len() - 1];
    Ok((first..last).collect())
}

/// For each object `i`, the objects `j` whose parent is `i`.
///
/// Returns `(offsets, content)` with `offsets.len() == parents.len() + 1`.
pub(crate) fn children(parents: &[i64]) -> (Vec<i64>, Vec<i64>) {
    let n = parents.len();
    let mut counts = vec![0i64; n];
    for &p in parents {
        if p >= 0 && (p as usize) < n {
            counts[p as usize] += 1;
        }
    }
    let mut offsets = Vec::with_capacity(n + 1);
    offsets.push(0i64);
    for c in &counts {
        offsets.push(offsets[offsets.len() - 1] + c);
    }
    let mut fill: Vec<i64> = offsets[..n].to_vec();
    let mut content = vec![0i64; offsets[n] as usize];
    for (j, &p) in parents.iter().enumerate() {
        if p >= 0 && (p as usize) < n {
            let slot = &mut fill[p as usize];
            content[*slot as usize] = j as i64;
            *slot += 1;
        }
    }
    (offsets, content)
}

/// First ancestor with a different PDG id, or `-1`.
pub(crate) fn distinct_parent(parents: &[i64], pdg_id: &[i64]) -> Result<Vec<i64>> {
    let n = parents.len();
    if pdg_id.len() != n {
        return Err(NanoEventsError::Validation(format!(
            "parents ({n}) and pdgId ({}) lengths differ",
            pdg_id.len()
        )));
    }
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let mut p = parents[i];
        // A well-formed decay chain is acyclic; bound the walk anyway.
        let mut steps = 0;
        while p >= 0 && (p as usize) < n && pdg_id[p as usize] == pdg_id[i] && steps < n {
            p = parents[p as usize];
            steps += 1;
        }
        out.push(if p >= 0 && (p as usize) < n && steps < n { p } else { -1 });
    }
    Ok(out)
}

/// Children lists that descend through same-PDG-id copies of the parent.
///
/// Returns `(offsets, content)` like [`children`].
pub(crate) fn distinct_children_deep(
    parents: &[i64],
    pdg_id: &[i64],
) -> Result<(Vec<i64>, Vec<i64>)> {
    let n = parents.len();
    if pdg_id.len() != n {
        return Err(NanoEventsError::Validation(format!(
            "parents ({n}) and pdgId ({}) lengths differ",
            pdg_id.len()
        )));
    }
    let (child_offsets, child_content) = children(parents);
    let mut offsets = Vec::with_capacity(n + 1);
    offsets.push(0i64);
    let mut content = Vec::new();
    let mut stack = Vec::new();
    for i in 0..n {
        stack.clear();
        stack.extend(
            child_content[child_offsets[i] as usize..child_offsets[i + 1] as usize].iter().rev(),
        );
        let mut visited = 0usize;
        while let Some(c) = stack.pop() {
            visited += 1;
            if visited > n {
                break;
            }
            let cu = c as usize;
            if pdg_id[cu] == pdg_id[i] {
                let grand = &child_content[child_offsets[cu] as usize..child_offsets[cu + 1] as usize];
                stack.extend(grand.iter().rev());
            } else {
                content.push(c);
            }
        }
        offsets.push(content.len() as i64);
    }
    Ok((offsets, content))
}
