//! The schedule model: a per-function description of how the loop nest
//! realising a pipeline should be shaped, kept entirely separate from
//! the functional definitions in the graph.
//!
//! Each function carries an ordered list of loop dimensions (innermost
//! first), a record of the splits that produced them, a compute level
//! and an optional storage level. Directives validate incrementally, so
//! an invalid call leaves the schedule unchanged.

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::error::{Error, Result};
use crate::graph::Graph;
use crate::ir::LoopKind;

/// Where in the consumer loop nest a function is computed or stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopLevel {
    /// Expanded into each use site; no loops or storage of its own.
    Inlined,
    /// Outside all consumer loops.
    Root,
    /// Inside the loop over `dim` of `func`.
    At { func: String, dim: String }
}

impl fmt::Display for LoopLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LoopLevel::Inlined => write!(f, "inlined"),
            LoopLevel::Root => write!(f, "root"),
            LoopLevel::At { func, dim } => write!(f, "{}.{}", func, dim)
        }
    }
}

/// One application of `split`. `outer` and `inner` replace `of` in the
/// dimension list, and lowering reconstructs the original variable as
/// `min + outer * factor + inner`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    pub of: String,
    pub outer: String,
    pub inner: String,
    pub factor: i64
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dim {
    pub name: String,
    pub kind: LoopKind,
    /// Declared vector width. Only set when `kind` is `Vector`.
    pub width: Option<i64>
}

impl Dim {
    fn serial(name: &str) -> Dim {
        Dim { name: name.to_string(), kind: LoopKind::Serial, width: None }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FuncSchedule {
    /// Loop dimensions, innermost first.
    pub dims: Vec<Dim>,
    /// Splits in the order they were applied.
    pub splits: Vec<Split>,
    pub compute_level: LoopLevel,
    /// `None` means storage sits at the compute level.
    pub store_level: Option<LoopLevel>
}

impl FuncSchedule {
    fn new(args: &[String], compute_level: LoopLevel) -> FuncSchedule {
        FuncSchedule {
            dims: args.iter().map(|a| Dim::serial(a)).collect(),
            splits: Vec::new(),
            compute_level,
            store_level: None
        }
    }

    pub fn dim_position(&self, name: &str) -> Option<usize> {
        self.dims.iter().position(|d| d.name == name)
    }

    pub fn dim(&self, name: &str) -> Option<&Dim> {
        self.dims.iter().find(|d| d.name == name)
    }

    fn dim_mut(&mut self, name: &str) -> Option<&mut Dim> {
        self.dims.iter_mut().find(|d| d.name == name)
    }

    /// The storage level actually in effect.
    pub fn storage_level(&self) -> &LoopLevel {
        self.store_level.as_ref().unwrap_or(&self.compute_level)
    }

    /// Maps a (possibly split) dimension back to the original function
    /// argument it iterates a piece of.
    pub fn root_var(&self, name: &str) -> String {
        let mut current = name.to_string();
        loop {
            match self
                .splits
                .iter()
                .find(|s| s.outer == current || s.inner == current)
            {
                Some(split) => current = split.of.clone(),
                None => return current
            }
        }
    }
}

/// A complete schedule for one graph. Functions not named by any
/// directive keep their defaults: outputs and functions with update
/// definitions are computed at root, everything else is inlined.
#[derive(Debug, Clone, PartialEq)]
pub struct Schedule {
    funcs: HashMap<String, FuncSchedule>,
    outputs: HashSet<String>,
    materialized: HashSet<String>
}

impl Schedule {
    pub fn new(graph: &Graph) -> Schedule {
        let outputs: HashSet<String> = graph.outputs().iter().cloned().collect();
        let mut materialized = outputs.clone();
        let mut funcs = HashMap::new();
        for func in graph.funcs() {
            if !func.updates.is_empty() {
                materialized.insert(func.name.clone());
            }
            let level = if materialized.contains(&func.name) {
                LoopLevel::Root
            } else {
                LoopLevel::Inlined
            };
            funcs.insert(func.name.clone(), FuncSchedule::new(&func.arg_names(), level));
        }
        Schedule { funcs, outputs, materialized }
    }

    pub fn func(&self, name: &str) -> Option<&FuncSchedule> {
        self.funcs.get(name)
    }

    pub fn expect_func(&self, name: &str) -> &FuncSchedule {
        &self.funcs[name]
    }

    fn func_mut(&mut self, name: &str) -> Result<&mut FuncSchedule> {
        match self.funcs.get_mut(name) {
            Some(f) => Ok(f),
            None => Err(Error::UnknownFunction {
                func: name.to_string(),
                referenced_by: "schedule".to_string()
            })
        }
    }

    /// Splits `var` of `func` into `var.outer` and `var.inner`, where the
    /// inner loop runs over `factor` iterations.
    pub fn split(&mut self, func: &str, var: &str, factor: i64) -> Result<&mut Schedule> {
        if factor <= 0 {
            return Err(Error::InvalidSplit {
                func: func.to_string(),
                var: var.to_string(),
                factor
            });
        }
        let sched = self.func_mut(func)?;
        let position = match sched.dim_position(var) {
            Some(p) => p,
            None => {
                return Err(Error::UnknownVariable {
                    func: func.to_string(),
                    var: var.to_string()
                })
            }
        };
        let outer = format!("{}.outer", var);
        let inner = format!("{}.inner", var);
        sched.splits.push(Split {
            of: var.to_string(),
            outer: outer.clone(),
            inner: inner.clone(),
            factor
        });
        sched.dims.splice(
            position..position + 1,
            vec![Dim::serial(&inner), Dim::serial(&outer)]
        );
        Ok(self)
    }

    /// Replaces the loop order of `func`. `order` lists every current
    /// dimension exactly once, innermost first.
    pub fn reorder(&mut self, func: &str, order: &[&str]) -> Result<&mut Schedule> {
        let sched = self.func_mut(func)?;
        let current: Vec<String> = sched.dims.iter().map(|d| d.name.clone()).collect();
        let mut expected: Vec<String> = current.clone();
        expected.sort();
        let mut actual: Vec<String> = order.iter().map(|s| s.to_string()).collect();
        actual.sort();
        // A repeated axis must not slip through as its deduplicated set.
        if order.len() != sched.dims.len() || expected != actual {
            return Err(Error::ReorderArityMismatch {
                func: func.to_string(),
                expected: current,
                actual: order.iter().map(|s| s.to_string()).collect()
            });
        }
        let old = std::mem::replace(&mut sched.dims, Vec::new());
        for name in order {
            let dim = old.iter().find(|d| &d.name == name).unwrap().clone();
            sched.dims.push(dim);
        }
        Ok(self)
    }

    /// Splits `var` by `width` and marks the inner piece as a vector
    /// loop. The guard emitted for non-dividing splits keeps the vector
    /// extent equal to `width`.
    pub fn vectorize(&mut self, func: &str, var: &str, width: i64) -> Result<&mut Schedule> {
        self.split(func, var, width)?;
        let inner = format!("{}.inner", var);
        let dim = self.func_mut(func)?.dim_mut(&inner).unwrap();
        dim.kind = LoopKind::Vector;
        dim.width = Some(width);
        Ok(self)
    }

    /// Marks an existing dimension as a vector loop without splitting.
    /// Lowering rejects this if the loop's extent is not a constant.
    pub fn vector(&mut self, func: &str, var: &str) -> Result<&mut Schedule> {
        self.mark(func, var, LoopKind::Vector)
    }

    pub fn parallel(&mut self, func: &str, var: &str) -> Result<&mut Schedule> {
        self.mark(func, var, LoopKind::Parallel)
    }

    pub fn unroll(&mut self, func: &str, var: &str) -> Result<&mut Schedule> {
        self.mark(func, var, LoopKind::Unrolled)
    }

    fn mark(&mut self, func: &str, var: &str, kind: LoopKind) -> Result<&mut Schedule> {
        let sched = self.func_mut(func)?;
        match sched.dim_mut(var) {
            Some(dim) => {
                dim.kind = kind;
                dim.width = None;
                Ok(self)
            },
            None => Err(Error::UnknownVariable {
                func: func.to_string(),
                var: var.to_string()
            })
        }
    }

    pub fn compute_root(&mut self, func: &str) -> Result<&mut Schedule> {
        self.set_compute_level(func, LoopLevel::Root)
    }

    /// Computes `func` inside the loop over `dim` of `host`.
    pub fn compute_at(&mut self, func: &str, host: &str, dim: &str) -> Result<&mut Schedule> {
        self.check_site(func, host, dim)?;
        self.set_compute_level(
            func,
            LoopLevel::At { func: host.to_string(), dim: dim.to_string() }
        )
    }

    pub fn inline(&mut self, func: &str) -> Result<&mut Schedule> {
        if self.materialized.contains(func) {
            return Err(Error::CannotInline { func: func.to_string() });
        }
        let sched = self.func_mut(func)?;
        sched.compute_level = LoopLevel::Inlined;
        sched.store_level = None;
        Ok(self)
    }

    pub fn store_root(&mut self, func: &str) -> Result<&mut Schedule> {
        self.set_store_level(func, LoopLevel::Root)
    }

    /// Allocates storage for `func` inside the loop over `dim` of `host`.
    /// Storage must sit at or outside the compute level.
    pub fn store_at(&mut self, func: &str, host: &str, dim: &str) -> Result<&mut Schedule> {
        self.check_site(func, host, dim)?;
        self.set_store_level(
            func,
            LoopLevel::At { func: host.to_string(), dim: dim.to_string() }
        )
    }

    fn set_compute_level(&mut self, func: &str, level: LoopLevel) -> Result<&mut Schedule> {
        if self.outputs.contains(func) && level != LoopLevel::Root {
            return Err(Error::CannotInline { func: func.to_string() });
        }
        let previous = self.func_mut(func)?.compute_level.clone();
        self.func_mut(func)?.compute_level = level;
        if let Err(e) = self.check_storage_nesting(func) {
            self.func_mut(func)?.compute_level = previous;
            return Err(e);
        }
        Ok(self)
    }

    fn set_store_level(&mut self, func: &str, level: LoopLevel) -> Result<&mut Schedule> {
        let previous = self.func_mut(func)?.store_level.clone();
        self.func_mut(func)?.store_level = Some(level);
        if let Err(e) = self.check_storage_nesting(func) {
            self.func_mut(func)?.store_level = previous;
            return Err(e);
        }
        Ok(self)
    }

    fn check_site(&self, func: &str, host: &str, dim: &str) -> Result<()> {
        let sched = match self.funcs.get(host) {
            Some(s) => s,
            None => {
                return Err(Error::UnknownFunction {
                    func: host.to_string(),
                    referenced_by: func.to_string()
                })
            }
        };
        if sched.dim(dim).is_none() {
            return Err(Error::UnknownVariable {
                func: host.to_string(),
                var: dim.to_string()
            });
        }
        Ok(())
    }

    /// Rejects storage placed strictly inside the compute level when both
    /// name a dimension of the same host. Cross-host nesting is checked
    /// during lowering, once the loop tree is known.
    fn check_storage_nesting(&self, func: &str) -> Result<()> {
        let sched = &self.funcs[func];
        let store = match &sched.store_level {
            Some(level) => level,
            None => return Ok(())
        };
        let invalid = Error::InvalidStorageNesting {
            func: func.to_string(),
            store: store.to_string(),
            compute: sched.compute_level.to_string()
        };
        match (store, &sched.compute_level) {
            (LoopLevel::Root, _) => Ok(()),
            (LoopLevel::Inlined, _) | (_, LoopLevel::Inlined) => Err(invalid),
            (LoopLevel::At { .. }, LoopLevel::Root) => Err(invalid),
            (
                LoopLevel::At { func: sf, dim: sd },
                LoopLevel::At { func: cf, dim: cd }
            ) => {
                if sf != cf {
                    return Ok(());
                }
                let host = &self.funcs[sf];
                let store_pos = host.dim_position(sd);
                let compute_pos = host.dim_position(cd);
                match (store_pos, compute_pos) {
                    (Some(s), Some(c)) if s >= c => Ok(()),
                    _ => Err(invalid)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Definition, Func, Source, Var};
    use crate::graph::GraphBuilder;

    fn chain() -> Graph {
        var!(x, y);
        source!(input);
        func!(f(x, y) = at!(input; &x, &y) + 1);
        func!(g(x, y) = at!(f; &x, &y) * 2);
        let mut builder = GraphBuilder::new("chain");
        builder.define(f).unwrap();
        builder.define(g).unwrap();
        builder.close(&["g"]).unwrap()
    }

    #[test]
    fn test_default_levels() {
        let graph = chain();
        let schedule = Schedule::new(&graph);
        assert_eq!(schedule.expect_func("f").compute_level, LoopLevel::Inlined);
        assert_eq!(schedule.expect_func("g").compute_level, LoopLevel::Root);
    }

    #[test]
    fn test_update_func_defaults_to_root() {
        var!(x);
        func!(h(x) = Definition::Const(0));
        func!(out(x) = at!(h; &x));
        let mut builder = GraphBuilder::new("scan");
        builder.define(h.clone()).unwrap();
        builder
            .update("h", vec![(&x).into()], at!(h; &x) + 1)
            .unwrap();
        builder.define(out).unwrap();
        let graph = builder.close(&["out"]).unwrap();
        let schedule = Schedule::new(&graph);
        assert_eq!(schedule.expect_func("h").compute_level, LoopLevel::Root);
        assert_eq!(schedule.expect_func("out").compute_level, LoopLevel::Root);
    }

    #[test]
    fn test_split_replaces_dim() {
        let graph = chain();
        let mut schedule = Schedule::new(&graph);
        schedule.split("g", "x", 8).unwrap();
        let dims: Vec<&str> = schedule
            .expect_func("g")
            .dims
            .iter()
            .map(|d| d.name.as_str())
            .collect();
        assert_eq!(dims, vec!["x.inner", "x.outer", "y"]);
        assert_eq!(schedule.expect_func("g").root_var("x.inner"), "x");
        assert_eq!(schedule.expect_func("g").root_var("x.outer"), "x");
        assert_eq!(schedule.expect_func("g").root_var("y"), "y");
    }

    #[test]
    fn test_split_rejects_non_positive_factor() {
        let graph = chain();
        let mut schedule = Schedule::new(&graph);
        let err = schedule.split("g", "x", 0).unwrap_err();
        assert_eq!(
            err,
            Error::InvalidSplit { func: "g".to_string(), var: "x".to_string(), factor: 0 }
        );
    }

    #[test]
    fn test_split_rejects_unknown_var() {
        let graph = chain();
        let mut schedule = Schedule::new(&graph);
        assert!(schedule.split("g", "z", 4).is_err());
        // The consumed dimension is gone.
        schedule.split("g", "x", 4).unwrap();
        assert!(schedule.split("g", "x", 4).is_err());
    }

    #[test]
    fn test_reorder_requires_exact_dim_set() {
        let graph = chain();
        let mut schedule = Schedule::new(&graph);
        schedule.reorder("g", &["y", "x"]).unwrap();
        let dims: Vec<&str> = schedule
            .expect_func("g")
            .dims
            .iter()
            .map(|d| d.name.as_str())
            .collect();
        assert_eq!(dims, vec!["y", "x"]);
        assert!(schedule.reorder("g", &["x"]).is_err());
        assert!(schedule.reorder("g", &["x", "x"]).is_err());
        assert!(schedule.reorder("g", &["x", "y", "z"]).is_err());
    }

    #[test]
    fn test_reorder_rejects_repeated_axis() {
        let graph = chain();
        let mut schedule = Schedule::new(&graph);
        // A repeated axis alongside the full set must not pass as the
        // deduplicated set, and a rejected call leaves the dims alone.
        assert!(schedule.reorder("g", &["x", "x", "y"]).is_err());
        assert!(schedule.reorder("g", &["y", "x", "y"]).is_err());
        assert_eq!(schedule.expect_func("g").dims.len(), 2);
    }

    #[test]
    fn test_vectorize_splits_and_marks() {
        let graph = chain();
        let mut schedule = Schedule::new(&graph);
        schedule.vectorize("g", "x", 4).unwrap();
        let dim = schedule.expect_func("g").dim("x.inner").unwrap();
        assert_eq!(dim.kind, LoopKind::Vector);
        assert_eq!(dim.width, Some(4));
    }

    #[test]
    fn test_storage_must_enclose_compute() {
        let graph = chain();
        let mut schedule = Schedule::new(&graph);
        schedule.compute_at("f", "g", "y").unwrap();
        schedule.store_root("f").unwrap();

        // Same level is allowed.
        schedule.store_at("f", "g", "y").unwrap();

        // Strictly inside the compute level is not.
        let err = schedule.store_at("f", "g", "x").unwrap_err();
        match err {
            Error::InvalidStorageNesting { func, .. } => assert_eq!(func, "f"),
            other => panic!("unexpected error {:?}", other)
        }

        // A rejected directive leaves the schedule unchanged.
        assert_eq!(
            schedule.expect_func("f").storage_level(),
            &LoopLevel::At { func: "g".to_string(), dim: "y".to_string() }
        );
    }

    #[test]
    fn test_outputs_cannot_be_inlined() {
        let graph = chain();
        let mut schedule = Schedule::new(&graph);
        assert_eq!(
            schedule.inline("g").unwrap_err(),
            Error::CannotInline { func: "g".to_string() }
        );
        schedule.inline("f").unwrap();
    }

    #[test]
    fn test_compute_at_unknown_host_dim() {
        let graph = chain();
        let mut schedule = Schedule::new(&graph);
        assert_eq!(
            schedule.compute_at("f", "g", "t").unwrap_err(),
            Error::UnknownVariable { func: "g".to_string(), var: "t".to_string() }
        );
    }
}
