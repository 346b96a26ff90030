//! The producer/consumer graph of function definitions.
//!
//! Building is append-only: `define` registers pure definitions,
//! `update` appends mutating definitions, and `close` freezes the graph,
//! at which point call edges are extracted from the definitions, inputs
//! are inferred, and cycles between distinct functions are rejected.

use std::collections::{HashMap, HashSet};

use crate::ast::*;
use crate::error::{Error, Result};

pub struct GraphBuilder {
    name: String,
    funcs: Vec<Func>,
    index: HashMap<String, usize>
}

impl GraphBuilder {
    pub fn new(name: &str) -> GraphBuilder {
        GraphBuilder {
            name: name.to_string(),
            funcs: vec![],
            index: HashMap::new()
        }
    }

    /// Registers a pure definition. Each name can be defined once.
    pub fn define(&mut self, func: Func) -> Result<&mut Self> {
        if self.index.contains_key(&func.name) {
            return Err(Error::DuplicateDefinition { func: func.name });
        }
        self.index.insert(func.name.clone(), self.funcs.len());
        self.funcs.push(func);
        Ok(self)
    }

    /// Appends an update definition to an already-defined function.
    /// The indices and value may only mention the function's own
    /// variables; the value may read the function itself.
    pub fn update(&mut self, name: &str, indices: Vec<VarExpr>, value: Definition) -> Result<&mut Self> {
        let idx = match self.index.get(name) {
            Some(idx) => *idx,
            None => {
                return Err(Error::UnknownFunction {
                    func: name.to_string(),
                    referenced_by: "update".to_string()
                });
            }
        };
        let update = Update { indices, value };
        let args = self.funcs[idx].arg_names();
        for var in update.free_vars() {
            if !args.contains(&var) {
                return Err(Error::UnknownVariable {
                    func: name.to_string(),
                    var
                });
            }
        }
        self.funcs[idx].updates.push(update);
        Ok(self)
    }

    /// Freezes the graph. `outputs` designates the functions whose
    /// declared bounds will seed bounds inference.
    pub fn close(self, outputs: &[&str]) -> Result<Graph> {
        let GraphBuilder { name, funcs, index } = self;

        for output in outputs {
            if !index.contains_key(*output) {
                return Err(Error::UnknownFunction {
                    func: output.to_string(),
                    referenced_by: "outputs".to_string()
                });
            }
        }

        // Every access to a defined function must match its arity, and
        // accesses to the same undefined source must agree on theirs.
        let mut input_dims: HashMap<String, usize> = HashMap::new();
        for func in &funcs {
            for access in func.accesses() {
                if let Some(callee) = index.get(&access.source).map(|i| &funcs[*i]) {
                    if access.args.len() != callee.args.len() {
                        return Err(Error::AccessArityMismatch {
                            caller: func.name.clone(),
                            callee: callee.name.clone(),
                            expected: callee.args.len(),
                            actual: access.args.len()
                        });
                    }
                } else {
                    let dims = input_dims.entry(access.source.clone()).or_insert(access.args.len());
                    if *dims != access.args.len() {
                        return Err(Error::AccessArityMismatch {
                            caller: func.name.clone(),
                            callee: access.source.clone(),
                            expected: *dims,
                            actual: access.args.len()
                        });
                    }
                }
            }
        }

        // A function may only reference itself from its update values.
        for func in &funcs {
            if func.definition.sources().contains(&func.name) {
                return Err(Error::CyclicDependency {
                    path: vec![func.name.clone(), func.name.clone()]
                });
            }
        }

        // Call edges between distinct functions, deduplicated.
        let mut callees: Vec<Vec<usize>> = vec![vec![]; funcs.len()];
        for (i, func) in funcs.iter().enumerate() {
            let mut seen = HashSet::new();
            for source in func.sources() {
                if source == func.name {
                    continue;
                }
                if let Some(&j) = index.get(&source) {
                    if seen.insert(j) {
                        callees[i].push(j);
                    }
                }
            }
        }

        let topo = topological_order(&funcs, &callees)?;

        // The buffers that are read but not computed must be provided
        // as inputs.
        let func_names: HashSet<String> = funcs.iter().map(|f| f.name.clone()).collect();
        let reads: HashSet<String> = funcs.iter().flat_map(|f| f.sources()).collect();
        let mut inputs: Vec<String> = reads.difference(&func_names).cloned().collect();
        inputs.sort();

        let params: HashSet<String> = funcs.iter().flat_map(|f| f.params()).collect();
        let mut params: Vec<String> = params.iter().cloned().collect();
        params.sort();

        let outputs = outputs.iter().map(|o| o.to_string()).collect();

        Ok(Graph { name, funcs, index, callees, topo, inputs, outputs, params, input_dims })
    }
}

/// Depth-first post-order: producers appear before their consumers.
/// A back edge on the stack is a true cycle between distinct functions.
fn topological_order(funcs: &[Func], callees: &[Vec<usize>]) -> Result<Vec<usize>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark { Unvisited, OnStack, Done }

    fn visit(
        i: usize,
        funcs: &[Func],
        callees: &[Vec<usize>],
        marks: &mut Vec<Mark>,
        path: &mut Vec<usize>,
        order: &mut Vec<usize>
    ) -> Result<()> {
        match marks[i] {
            Mark::Done => return Ok(()),
            Mark::OnStack => {
                let start = path.iter().position(|&p| p == i).unwrap_or(0);
                let mut cycle: Vec<String> =
                    path[start..].iter().map(|&p| funcs[p].name.clone()).collect();
                cycle.push(funcs[i].name.clone());
                return Err(Error::CyclicDependency { path: cycle });
            },
            Mark::Unvisited => { }
        }
        marks[i] = Mark::OnStack;
        path.push(i);
        for &j in &callees[i] {
            visit(j, funcs, callees, marks, path, order)?;
        }
        path.pop();
        marks[i] = Mark::Done;
        order.push(i);
        Ok(())
    }

    let mut marks = vec![Mark::Unvisited; funcs.len()];
    let mut order = vec![];
    let mut path = vec![];
    for i in 0..funcs.len() {
        visit(i, funcs, callees, &mut marks, &mut path, &mut order)?;
    }
    Ok(order)
}

/// An immutable pipeline description: functions, call edges, inferred
/// inputs, and a valid evaluation order. Shared read-only by bounds
/// inference and any number of lowering runs.
pub struct Graph {
    name: String,
    funcs: Vec<Func>,
    index: HashMap<String, usize>,
    callees: Vec<Vec<usize>>,
    /// Indices into funcs, producers before consumers.
    topo: Vec<usize>,
    inputs: Vec<String>,
    outputs: Vec<String>,
    params: Vec<String>,
    input_dims: HashMap<String, usize>
}

impl Graph {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn funcs(&self) -> &[Func] {
        &self.funcs
    }

    pub fn func(&self, name: &str) -> Option<&Func> {
        self.index.get(name).map(|&i| &self.funcs[i])
    }

    /// Panics on an undefined name; every reference has already been
    /// validated when the graph was closed.
    pub(crate) fn expect_func(&self, name: &str) -> &Func {
        self.func(name)
            .unwrap_or_else(|| panic!("undefined function `{}`", name))
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    pub fn is_output(&self, name: &str) -> bool {
        self.outputs.iter().any(|o| o == name)
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn input_dimensions(&self, name: &str) -> Option<usize> {
        self.input_dims.get(name).copied()
    }

    /// Function names with producers before consumers.
    pub fn topological_names(&self) -> Vec<String> {
        self.topo.iter().map(|&i| self.funcs[i].name.clone()).collect()
    }

    /// The defined functions `name` reads from.
    pub fn callees(&self, name: &str) -> Vec<&str> {
        match self.index.get(name) {
            Some(&i) => self.callees[i].iter().map(|&j| self.funcs[j].name.as_str()).collect(),
            None => vec![]
        }
    }

    /// The defined functions that read from `name`.
    pub fn callers(&self, name: &str) -> Vec<&str> {
        match self.index.get(name) {
            Some(&target) => self
                .callees
                .iter()
                .enumerate()
                .filter(|(_, callees)| callees.contains(&target))
                .map(|(i, _)| self.funcs[i].name.as_str())
                .collect(),
            None => vec![]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_stage_blur() -> GraphBuilder {
        var!(x, y);
        source!(input);
        func!(blur(x, y) = (at!(input; &x - 1, &y) + at!(input; &x, &y) + at!(input; &x + 1, &y)) / 3);
        func!(out(x, y) = (at!(blur; &x, &y - 1) + at!(blur; &x, &y) + at!(blur; &x, &y + 1)) / 3);
        let mut builder = GraphBuilder::new("blur3");
        builder.define(blur).unwrap();
        builder.define(out).unwrap();
        builder
    }

    #[test]
    fn test_inputs_are_inferred_from_reads() {
        let graph = two_stage_blur().close(&["out"]).unwrap();
        assert_eq!(graph.inputs(), &["input".to_string()]);
        assert_eq!(graph.input_dimensions("input"), Some(2));
    }

    #[test]
    fn test_topological_order_puts_producers_first() {
        let graph = two_stage_blur().close(&["out"]).unwrap();
        assert_eq!(graph.topological_names(), vec!["blur", "out"]);
        assert_eq!(graph.callers("blur"), vec!["out"]);
        assert_eq!(graph.callees("out"), vec!["blur"]);
    }

    #[test]
    fn test_duplicate_definition_is_rejected() {
        var!(x, y);
        source!(input);
        let mut builder = GraphBuilder::new("dup");
        func!(f(x, y) = at!(input; &x, &y));
        builder.define(f).unwrap();
        func!(f(x, y) = at!(input; &x, &y) + 1);
        match builder.define(f) {
            Err(Error::DuplicateDefinition { func }) => assert_eq!(func, "f"),
            _ => panic!("expected DuplicateDefinition")
        }
    }

    #[test]
    fn test_unknown_output_is_rejected() {
        match two_stage_blur().close(&["missing"]) {
            Err(Error::UnknownFunction { func, .. }) => assert_eq!(func, "missing"),
            _ => panic!("expected UnknownFunction")
        }
    }

    #[test]
    fn test_mutual_recursion_is_rejected_at_close() {
        var!(x, y);
        let a = Func::new("a", vec![x.clone(), y.clone()], Definition::Access(Access::new("b", vec![(&x).into(), (&y).into()])));
        let b = Func::new("b", vec![x.clone(), y.clone()], Definition::Access(Access::new("a", vec![(&x).into(), (&y).into()])));
        let mut builder = GraphBuilder::new("cycle");
        builder.define(a).unwrap();
        builder.define(b).unwrap();
        match builder.close(&["a"]) {
            Err(Error::CyclicDependency { path }) => {
                assert!(path.contains(&"a".to_string()) && path.contains(&"b".to_string()));
            },
            _ => panic!("expected CyclicDependency")
        }
    }

    #[test]
    fn test_pure_self_reference_is_rejected() {
        var!(x, y);
        let f = Func::new("f", vec![x.clone(), y.clone()], Definition::Access(Access::new("f", vec![(&x).into(), (&y).into()])));
        let mut builder = GraphBuilder::new("selfref");
        builder.define(f).unwrap();
        match builder.close(&["f"]) {
            Err(Error::CyclicDependency { path }) => {
                assert_eq!(path, vec!["f".to_string(), "f".to_string()])
            },
            _ => panic!("expected CyclicDependency")
        }
    }

    #[test]
    fn test_self_reference_in_update_is_allowed() {
        var!(x, y);
        source!(input);
        func!(f(x, y) = at!(input; &x, &y));
        let mut builder = GraphBuilder::new("scan");
        builder.define(f.clone()).unwrap();
        builder
            .update("f", vec![(&x).into(), VarExpr::Const(0)], at!(f; &x, 0) * 2)
            .unwrap();
        let graph = builder.close(&["f"]).unwrap();
        assert_eq!(graph.func("f").unwrap().updates.len(), 1);
    }

    #[test]
    fn test_update_before_define_is_rejected() {
        var!(x);
        let mut builder = GraphBuilder::new("bad");
        match builder.update("g", vec![(&x).into()], Definition::Const(0)) {
            Err(Error::UnknownFunction { func, .. }) => assert_eq!(func, "g"),
            _ => panic!("expected UnknownFunction")
        }
    }

    #[test]
    fn test_access_arity_is_checked() {
        var!(x, y);
        source!(input);
        func!(g(x, y) = at!(input; &x, &y));
        func!(out(x, y) = at!(g; &x));
        let mut builder = GraphBuilder::new("arity");
        builder.define(g).unwrap();
        builder.define(out).unwrap();
        match builder.close(&["out"]) {
            Err(Error::AccessArityMismatch { caller, callee, expected, actual }) => {
                assert_eq!((caller.as_str(), callee.as_str()), ("out", "g"));
                assert_eq!((expected, actual), (2, 1));
            },
            _ => panic!("expected AccessArityMismatch")
        }
    }
}
