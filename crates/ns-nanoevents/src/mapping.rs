//! Form-key interpreter.
//!
//! A form key is a postfix program over comma-separated tokens. Plain tokens
//! push a branch name; `!op` tokens pop their arguments and push a result:
//!
//! ```text
//! Jet_genJetIdx,!load,nGenJet,!load,!counts2offsets,!local2global
//! ```
//!
//! Programs are parsed into an expression tree. Each array-valued node is
//! identified by its own sub-program (a contiguous token range in postfix
//! order) and memoized in the runtime cache under
//! `"{partition_key}/{sub-program}"`, so offsets shared by many fields are
//! computed once per partition.

use std::sync::Arc;

use rayon::prelude::*;

use crate::array::{Array, Buffer};
use crate::cache::ColumnCache;
use crate::error::{NanoEventsError, Result};
use crate::factory::AccessLog;
use crate::form::Form;
use crate::source::ColumnSource;
use crate::transforms;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Load,
    Offsets,
    Content,
    Counts2Offsets,
    Local2Global,
    NestedIndex,
    Counts2NestedIndex,
    Children,
    DistinctParent,
    DistinctChildrenDeep,
}

impl Op {
    fn parse(token: &str) -> Option<Self> {
        Some(match token {
            "!load" => Op::Load,
            "!offsets" => Op::Offsets,
            "!content" => Op::Content,
            "!counts2offsets" => Op::Counts2Offsets,
            "!local2global" => Op::Local2Global,
            "!nestedindex" => Op::NestedIndex,
            "!counts2nestedindex" => Op::Counts2NestedIndex,
            "!children" => Op::Children,
            "!distinctparent" => Op::DistinctParent,
            "!distinctchildrendeep" => Op::DistinctChildrenDeep,
            _ => return None,
        })
    }

    /// Number of popped arguments; `None` consumes the whole stack.
    fn arity(self) -> Option<usize> {
        match self {
            Op::NestedIndex => None,
            Op::Local2Global
            | Op::Counts2NestedIndex
            | Op::DistinctParent
            | Op::DistinctChildrenDeep => Some(2),
            _ => Some(1),
        }
    }
}

#[derive(Debug)]
enum Expr {
    Branch(String),
    Apply { op: Op, args: Vec<Expr>, program: String },
}

impl Expr {
    fn parse(key: &str) -> Result<Expr> {
        let bad = |reason: String| NanoEventsError::FormKey { key: key.to_string(), reason };
        let tokens: Vec<&str> = key.split(',').collect();
        // (expression, first token index)
        let mut stack: Vec<(Expr, usize)> = Vec::new();
        for (i, token) in tokens.iter().enumerate() {
            if token.is_empty() {
                return Err(bad(format!("empty token at position {i}")));
            }
            if !token.starts_with('!') {
                stack.push((Expr::Branch(token.to_string()), i));
                continue;
            }
            let op = Op::parse(token).ok_or_else(|| bad(format!("unknown operation '{token}'")))?;
            let n = op.arity().unwrap_or(stack.len());
            if n == 0 || stack.len() < n {
                return Err(bad(format!("stack underflow at '{token}'")));
            }
            let popped = stack.split_off(stack.len() - n);
            let first = popped[0].1;
            let args = popped.into_iter().map(|(e, _)| e).collect();
            let program = tokens[first..=i].join(",");
            stack.push((Expr::Apply { op, args, program }, first));
        }
        if stack.len() != 1 {
            return Err(bad(format!("program leaves {} values on the stack", stack.len())));
        }
        Ok(stack.remove(0).0)
    }
}

/// Evaluates form keys for one partition of a source.
pub(crate) struct KeyMapping {
    source: Arc<dyn ColumnSource>,
    start: u64,
    stop: u64,
    partition_key: String,
    cache: Arc<ColumnCache>,
    access_log: Option<AccessLog>,
}

impl KeyMapping {
    pub(crate) fn new(
        source: Arc<dyn ColumnSource>,
        start: u64,
        stop: u64,
        partition_key: String,
        cache: Arc<ColumnCache>,
        access_log: Option<AccessLog>,
    ) -> Self {
        Self { source, start, stop, partition_key, cache, access_log }
    }

    /// Number of entries in the partition.
    pub(crate) fn len(&self) -> usize {
        (self.stop - self.start) as usize
    }

    /// Evaluate one form key to an array.
    pub(crate) fn evaluate(&self, key: &str) -> Result<Arc<Array>> {
        match Expr::parse(key)? {
            Expr::Branch(name) => Err(NanoEventsError::FormKey {
                key: key.to_string(),
                reason: format!("program yields the branch name '{name}', not an array"),
            }),
            expr => self.eval(&expr, key),
        }
    }

    fn eval(&self, expr: &Expr, key: &str) -> Result<Arc<Array>> {
        let Expr::Apply { op, args, program } = expr else {
            return Err(NanoEventsError::FormKey {
                key: key.to_string(),
                reason: "branch name used where an array is expected".into(),
            });
        };
        let cache_key = format!("{}/{}", self.partition_key, program);
        if let Some(hit) = self.cache.get(&cache_key) {
            return Ok(hit);
        }
        log::debug!("evaluating {cache_key}");

        let fail = |reason: String| NanoEventsError::FormKey { key: key.to_string(), reason };
        let result = match op {
            Op::Load => {
                let Expr::Branch(name) = &args[0] else {
                    return Err(fail("!load expects a branch name".into()));
                };
                if let Some(log) = &self.access_log {
                    log.lock().unwrap_or_else(|p| p.into_inner()).push(name.clone());
                }
                log::debug!("loading branch {name} [{}, {})", self.start, self.stop);
                self.source.read(name, self.start, self.stop)?
            }
            Op::Offsets => transforms::offsets_of(&*self.eval(&args[0], key)?)?,
            Op::Content => transforms::content_of(&*self.eval(&args[0], key)?)?,
            Op::Counts2Offsets => {
                let counts = self.eval(&args[0], key)?;
                let buf = flat_buffer(&counts, "!counts2offsets").map_err(fail)?;
                Array::from_vec(transforms::counts2offsets(buf)?)
            }
            Op::Local2Global => {
                let index = self.eval(&args[0], key)?;
                let target = self.eval_i64(&args[1], key)?;
                Array::from_vec(transforms::local2global(&index, &target)?)
            }
            Op::NestedIndex => {
                let indexers = args
                    .iter()
                    .map(|a| self.eval_i64(a, key))
                    .collect::<Result<Vec<_>>>()?;
                Array::from_vec(transforms::nestedindex(&indexers)?)
            }
            Op::Counts2NestedIndex => {
                let counts = self.eval(&args[0], key)?;
                let target = self.eval_i64(&args[1], key)?;
                Array::from_vec(transforms::counts2nestedindex(&counts, &target)?)
            }
            Op::Children => {
                let parents = self.eval_i64(&args[0], key)?;
                let (offsets, content) = transforms::children(&parents);
                Array::list(offsets, Array::from_vec(content))?
            }
            Op::DistinctParent => {
                let parents = self.eval_i64(&args[0], key)?;
                let pdg_id = self.eval_i64(&args[1], key)?;
                Array::from_vec(transforms::distinct_parent(&parents, &pdg_id)?)
            }
            Op::DistinctChildrenDeep => {
                let parents = self.eval_i64(&args[0], key)?;
                let pdg_id = self.eval_i64(&args[1], key)?;
                let (offsets, content) = transforms::distinct_children_deep(&parents, &pdg_id)?;
                Array::list(offsets, Array::from_vec(content))?
            }
        };
        Ok(self.cache.insert(&cache_key, result))
    }

    fn eval_i64(&self, expr: &Expr, key: &str) -> Result<Vec<i64>> {
        let array = self.eval(expr, key)?;
        let buf = flat_buffer(&array, "integer argument")
            .map_err(|reason| NanoEventsError::FormKey { key: key.to_string(), reason })?;
        buf.to_i64()
    }

    /// Materialize a form into an array.
    pub(crate) fn materialize(&self, form: &Form) -> Result<Array> {
        self.materialize_node(form, self.len())
    }

    /// `length` is the expected node length, needed for field-less records.
    fn materialize_node(&self, form: &Form, length: usize) -> Result<Array> {
        match form {
            Form::NumpyArray { form_key, .. } => {
                let array = self.evaluate(form_key)?;
                match array.as_ref() {
                    Array::Numpy(_) => Ok(array.as_ref().clone()),
                    other => Err(NanoEventsError::FormKey {
                        key: form_key.clone(),
                        reason: format!("expected a flat buffer, got {}-deep value", depth(other)),
                    }),
                }
            }
            Form::ListOffsetArray { content, form_key, .. } => {
                let offsets = self.shared_i64(form_key)?;
                let inner_len = offsets.last().copied().unwrap_or(0).max(0) as usize;
                let content = self.materialize_node(content, inner_len)?;
                Array::list_shared(offsets, content)
            }
            Form::RegularArray { size, content, .. } => {
                let content = self.materialize_node(content, length * size)?;
                Ok(Array::Regular { size: *size, content: Arc::new(content) })
            }
            Form::IndexedOptionArray { content, form_key, .. } => {
                let index = self.shared_i64(form_key)?;
                let inner_len = index.iter().copied().max().map_or(0, |m| (m + 1).max(0) as usize);
                let content = self.materialize_node(content, inner_len)?;
                Ok(Array::IndexedOption { index, content: Arc::new(content) })
            }
            Form::RecordArray { fields, contents, parameters } => {
                let arrays = contents
                    .par_iter()
                    .map(|c| self.materialize_node(c, length))
                    .collect::<Result<Vec<_>>>()?;
                let length = arrays.first().map_or(length, Array::len);
                Array::record_with_length(
                    fields.iter().cloned().zip(arrays).collect(),
                    length,
                    parameters.clone(),
                )
            }
        }
    }

    fn shared_i64(&self, key: &str) -> Result<Arc<[i64]>> {
        let array = self.evaluate(key)?;
        match array.as_ref() {
            Array::Numpy(Buffer::Int64(v)) => Ok(Arc::clone(v)),
            Array::Numpy(b) => Ok(Arc::from(b.to_i64()?)),
            other => Err(NanoEventsError::FormKey {
                key: key.to_string(),
                reason: format!("expected an index buffer, got {}-deep value", depth(other)),
            }),
        }
    }
}

fn flat_buffer<'a>(array: &'a Array, what: &str) -> std::result::Result<&'a Buffer, String> {
    array.buffer().ok_or_else(|| format!("{what} must be a flat buffer"))
}

fn depth(array: &Array) -> usize {
    match array {
        Array::ListOffset { content, .. } | Array::Regular { content, .. } => 1 + depth(content),
        Array::IndexedOption { content, .. } => depth(content),
        _ => 0,
    }
}
