//! Bounds inference: given the region of each output that the caller
//! wants realised, derive the region of every function and input that
//! must be computed or read.
//!
//! Inference runs in a single pass over the graph in reverse topological
//! order. When a function is visited all of its consumers have already
//! been visited, so its required region is final: the union, per axis,
//! of the intervals its consumers read, plus its declared region if it
//! is an output. Regions are symbolic, so an output sized by parameters
//! `w` and `h` yields producer regions like `[-1, h]`.

use std::collections::HashMap;

use tracing::debug;

use crate::ast::{Func, VarExpr};
use crate::error::{Error, Result};
use crate::graph::Graph;
use crate::interval::{bounds_of, Interval};

/// An axis-aligned box of integer coordinates, one interval per
/// dimension of the function or input it describes.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub intervals: Vec<Interval>
}

impl Region {
    pub fn new(intervals: Vec<Interval>) -> Region {
        Region { intervals }
    }

    /// The region `[0, e0) x [0, e1) x ...`.
    pub fn with_extents<E: Into<VarExpr>>(extents: Vec<E>) -> Region {
        Region::new(extents.into_iter().map(Interval::with_extent).collect())
    }

    pub fn dims(&self) -> usize {
        self.intervals.len()
    }

    /// Per-axis union. Both regions must describe the same function, so
    /// their dimensionalities agree.
    pub fn union(&self, other: &Region) -> Region {
        assert_eq!(self.dims(), other.dims());
        Region::new(
            self.intervals
                .iter()
                .zip(&other.intervals)
                .map(|(a, b)| a.union(b))
                .collect()
        )
    }
}

/// The result of inference: a required region for every function and
/// input reachable from the outputs.
#[derive(Debug, Clone, PartialEq)]
pub struct Bounds {
    regions: HashMap<String, Region>
}

impl Bounds {
    pub fn region(&self, name: &str) -> Option<&Region> {
        self.regions.get(name)
    }

    pub fn expect_region(&self, name: &str) -> &Region {
        &self.regions[name]
    }
}

pub fn infer(graph: &Graph, output_bounds: &HashMap<String, Region>) -> Result<Bounds> {
    let mut regions: HashMap<String, Region> = HashMap::new();
    for name in graph.outputs() {
        match output_bounds.get(name) {
            Some(region) => {
                let func = graph.expect_func(name);
                if region.dims() != func.args.len() {
                    return Err(Error::AccessArityMismatch {
                        caller: name.clone(),
                        callee: name.clone(),
                        expected: func.args.len(),
                        actual: region.dims()
                    });
                }
                regions.insert(name.clone(), region.clone());
            },
            None => return Err(Error::MissingOutputBound { func: name.clone() })
        }
    }

    let order = graph.topological_names();
    for name in order.iter().rev() {
        let func = graph.expect_func(name);
        // Unreachable functions get no region and generate no loops.
        let region = match regions.get(name.as_str()) {
            Some(r) => r.clone(),
            None => continue
        };
        check_non_empty(func, &region)?;
        debug!(func = name.as_str(), dims = region.dims(), "inferred region");

        let env = realization_env(func, &region)?;
        for (callee, required) in required_regions(func, &env)? {
            match regions.get(&callee) {
                Some(existing) => {
                    let merged = existing.union(&required);
                    regions.insert(callee, merged);
                },
                None => {
                    regions.insert(callee, required);
                }
            }
        }
    }

    Ok(Bounds { regions })
}

fn check_non_empty(func: &Func, region: &Region) -> Result<()> {
    for (arg, interval) in func.args.iter().zip(&region.intervals) {
        if interval.is_provably_empty() {
            return Err(Error::EmptyRegion {
                func: func.name.clone(),
                var: arg.name().to_string()
            });
        }
    }
    Ok(())
}

/// The variable intervals in scope while `func` is realised over
/// `region`: its arguments span the region, and each free variable of
/// an update definition spans the axis it indexes.
///
/// A free update variable must appear bare as one of the update's
/// indices. An index like `x + 1` gives no axis to pin `x` to, so it is
/// rejected as unbounded.
pub(crate) fn realization_env(
    func: &Func,
    region: &Region
) -> Result<HashMap<String, Interval>> {
    let mut env = HashMap::new();
    for (arg, interval) in func.args.iter().zip(&region.intervals) {
        env.insert(arg.name().to_string(), interval.clone());
    }
    for update in &func.updates {
        for var in update.free_vars() {
            let position = update
                .indices
                .iter()
                .position(|ix| *ix == VarExpr::Var(var.clone()));
            match position {
                Some(i) => {
                    env.insert(var.clone(), region.intervals[i].clone());
                },
                None => return Err(Error::UnboundedInterval { var })
            }
        }
    }
    Ok(env)
}

/// The region of every function or input that `func` reads, given
/// intervals for the variables in scope. Self-reads in update
/// definitions are skipped: they land inside the region already being
/// realised.
pub(crate) fn required_regions(
    func: &Func,
    env: &HashMap<String, Interval>
) -> Result<HashMap<String, Region>> {
    let mut required: HashMap<String, Region> = HashMap::new();
    for access in func.accesses() {
        if access.source == func.name {
            continue;
        }
        let mut intervals = Vec::with_capacity(access.args.len());
        for arg in &access.args {
            intervals.push(bounds_of(arg, env)?);
        }
        let region = Region::new(intervals);
        match required.get(&access.source) {
            Some(existing) => {
                let merged = existing.union(&region);
                required.insert(access.source.clone(), merged);
            },
            None => {
                required.insert(access.source.clone(), region);
            }
        }
    }
    Ok(required)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Definition, Param, Source, Var};
    use crate::graph::GraphBuilder;

    fn two_stage_blur() -> Graph {
        var!(x, y);
        source!(input);
        func!(blur(x, y) = (at!(input; &x - 1, &y) + at!(input; &x, &y) + at!(input; &x + 1, &y)) / 3);
        func!(out(x, y) = (at!(blur; &x, &y - 1) + at!(blur; &x, &y) + at!(blur; &x, &y + 1)) / 3);
        let mut builder = GraphBuilder::new("blur3");
        builder.define(blur).unwrap();
        builder.define(out).unwrap();
        builder.close(&["out"]).unwrap()
    }

    fn output_region(graph: &Graph, region: Region) -> HashMap<String, Region> {
        let mut bounds = HashMap::new();
        bounds.insert(graph.outputs()[0].clone(), region);
        bounds
    }

    #[test]
    fn test_constant_output_bounds_propagate() {
        let graph = two_stage_blur();
        let outputs = output_region(&graph, Region::with_extents(vec![8, 8]));
        let bounds = infer(&graph, &outputs).unwrap();

        assert_eq!(
            bounds.expect_region("blur").intervals,
            vec![Interval::new(0, 7), Interval::new(-1, 8)]
        );
        assert_eq!(
            bounds.expect_region("input").intervals,
            vec![Interval::new(-1, 8), Interval::new(-1, 8)]
        );
    }

    #[test]
    fn test_symbolic_output_bounds_propagate() {
        let graph = two_stage_blur();
        param!(w);
        param!(h);
        let outputs = output_region(
            &graph,
            Region::with_extents(vec![VarExpr::from(&w), VarExpr::from(&h)])
        );
        let bounds = infer(&graph, &outputs).unwrap();

        let blur = bounds.expect_region("blur");
        assert_eq!(blur.intervals[0], Interval::new(0, VarExpr::from(&w) - 1));
        assert_eq!(blur.intervals[1], Interval::new(-1, VarExpr::from(&h)));
        assert_eq!(blur.intervals[1].extent(), VarExpr::from(&h) + 2);

        let input = bounds.expect_region("input");
        assert_eq!(input.intervals[0], Interval::new(-1, VarExpr::from(&w)));
        assert_eq!(input.intervals[1], Interval::new(-1, VarExpr::from(&h)));
    }

    #[test]
    fn test_union_of_consumers_is_final_after_one_pass() {
        // a and b pull g in opposite directions; g's region must be the
        // union of both, settled the first time g is visited.
        var!(x);
        source!(input);
        func!(g(x) = at!(input; &x) + 1);
        func!(a(x) = at!(g; &x - 2));
        func!(b(x) = at!(g; &x + 3));
        func!(out(x) = at!(a; &x) + at!(b; &x));
        let mut builder = GraphBuilder::new("diamond");
        builder.define(g).unwrap();
        builder.define(a).unwrap();
        builder.define(b).unwrap();
        builder.define(out).unwrap();
        let graph = builder.close(&["out"]).unwrap();

        let outputs = output_region(&graph, Region::with_extents(vec![10]));
        let bounds = infer(&graph, &outputs).unwrap();
        assert_eq!(
            bounds.expect_region("g").intervals,
            vec![Interval::new(-2, 12)]
        );

        // g's settled region feeds its own reads exactly once, so the
        // input region already reflects the union.
        assert_eq!(
            bounds.expect_region("input").intervals,
            vec![Interval::new(-2, 12)]
        );
    }

    #[test]
    fn test_missing_output_bound_is_rejected() {
        let graph = two_stage_blur();
        match infer(&graph, &HashMap::new()) {
            Err(Error::MissingOutputBound { func }) => assert_eq!(func, "out"),
            _ => panic!("expected MissingOutputBound")
        }
    }

    #[test]
    fn test_empty_output_region_is_rejected() {
        let graph = two_stage_blur();
        let outputs = output_region(
            &graph,
            Region::new(vec![Interval::new(0, 7), Interval::new(5, 4)])
        );
        match infer(&graph, &outputs) {
            Err(Error::EmptyRegion { func, var }) => {
                assert_eq!((func.as_str(), var.as_str()), ("out", "y"))
            },
            _ => panic!("expected EmptyRegion")
        }
    }

    #[test]
    fn test_update_free_vars_span_their_axis() {
        var!(x);
        source!(input);
        func!(g(x) = at!(input; &x) * 2);
        func!(h(x) = Definition::Const(0));
        func!(out(x) = at!(h; &x));
        let mut builder = GraphBuilder::new("scan");
        builder.define(g.clone()).unwrap();
        builder.define(h.clone()).unwrap();
        builder
            .update("h", vec![(&x).into()], at!(g; &x - 1))
            .unwrap();
        builder.define(out).unwrap();
        let graph = builder.close(&["out"]).unwrap();

        let outputs = output_region(&graph, Region::with_extents(vec![10]));
        let bounds = infer(&graph, &outputs).unwrap();
        assert_eq!(bounds.expect_region("h").intervals, vec![Interval::new(0, 9)]);
        assert_eq!(bounds.expect_region("g").intervals, vec![Interval::new(-1, 8)]);
        assert_eq!(
            bounds.expect_region("input").intervals,
            vec![Interval::new(-1, 8)]
        );
    }

    #[test]
    fn test_update_var_must_index_an_axis_directly() {
        var!(x);
        func!(h(x) = Definition::Const(0));
        let mut builder = GraphBuilder::new("bad");
        builder.define(h.clone()).unwrap();
        builder
            .update("h", vec![&x + 1], at!(h; &x + 1) * 2)
            .unwrap();
        let graph = builder.close(&["h"]).unwrap();

        let outputs = output_region(&graph, Region::with_extents(vec![4]));
        match infer(&graph, &outputs) {
            Err(Error::UnboundedInterval { var }) => assert_eq!(var, "x"),
            _ => panic!("expected UnboundedInterval")
        }
    }
}
