//! A reference interpreter for lowered loop nests, plus a naive
//! evaluator that runs a graph directly from its definitions.
//!
//! The interpreter executes every loop serially, whatever its kind, so
//! a lowered pipeline can be checked for value equivalence against the
//! naive evaluator under any schedule.

use std::collections::HashMap;

use tracing::debug;

use crate::ast::{Definition, VarExpr};
use crate::bounds::{self, realization_env, Region};
use crate::buffer::{Buffer, Points};
use crate::error::{Error, Result};
use crate::graph::Graph;
use crate::interval::Interval;
use crate::ir::{Cond, Stmt};

fn eval_expr(
    expr: &VarExpr,
    env: &HashMap<String, i64>,
    params: &HashMap<String, i64>
) -> Result<i64> {
    match expr {
        VarExpr::Var(v) => env
            .get(v)
            .copied()
            .ok_or_else(|| Error::MissingBinding { name: v.clone() }),
        VarExpr::Const(c) => Ok(*c),
        VarExpr::Param(p) => params
            .get(p)
            .copied()
            .ok_or_else(|| Error::MissingBinding { name: p.clone() }),
        VarExpr::Add(l, r) => Ok(eval_expr(l, env, params)? + eval_expr(r, env, params)?),
        VarExpr::Sub(l, r) => Ok(eval_expr(l, env, params)? - eval_expr(r, env, params)?),
        VarExpr::Mul(l, r) => Ok(eval_expr(l, env, params)? * eval_expr(r, env, params)?),
        VarExpr::Div(l, r) => {
            let d = eval_expr(r, env, params)?;
            if d == 0 {
                return Err(Error::DivisionByZero);
            }
            Ok(eval_expr(l, env, params)?.div_euclid(d))
        },
        VarExpr::Min(l, r) => {
            Ok(eval_expr(l, env, params)?.min(eval_expr(r, env, params)?))
        },
        VarExpr::Max(l, r) => {
            Ok(eval_expr(l, env, params)?.max(eval_expr(r, env, params)?))
        }
    }
}

fn eval_value(
    definition: &Definition,
    buffers: &HashMap<String, Buffer>,
    env: &HashMap<String, i64>,
    params: &HashMap<String, i64>
) -> Result<i64> {
    match definition {
        Definition::Access(access) => {
            let buffer = buffers
                .get(&access.source)
                .ok_or_else(|| Error::MissingBinding { name: access.source.clone() })?;
            let mut indices = Vec::with_capacity(access.args.len());
            for arg in &access.args {
                indices.push(eval_expr(arg, env, params)?);
            }
            buffer.get(&indices)
        },
        Definition::Const(c) => Ok(*c),
        Definition::Param(p) => params
            .get(p)
            .copied()
            .ok_or_else(|| Error::MissingBinding { name: p.clone() }),
        Definition::Add(l, r) => {
            Ok(eval_value(l, buffers, env, params)? + eval_value(r, buffers, env, params)?)
        },
        Definition::Mul(l, r) => {
            Ok(eval_value(l, buffers, env, params)? * eval_value(r, buffers, env, params)?)
        },
        Definition::Sub(l, r) => {
            Ok(eval_value(l, buffers, env, params)? - eval_value(r, buffers, env, params)?)
        },
        Definition::Div(l, r) => {
            let d = eval_value(r, buffers, env, params)?;
            if d == 0 {
                return Err(Error::DivisionByZero);
            }
            Ok(eval_value(l, buffers, env, params)?.div_euclid(d))
        }
    }
}

/// Executes lowered IR against a set of named buffers.
pub struct Interpreter {
    buffers: HashMap<String, Buffer>,
    params: HashMap<String, i64>
}

impl Interpreter {
    pub fn new() -> Interpreter {
        Interpreter {
            buffers: HashMap::new(),
            params: HashMap::new()
        }
    }

    /// Binds an input or output buffer by its name.
    pub fn bind(&mut self, buffer: Buffer) -> &mut Interpreter {
        self.buffers.insert(buffer.name().to_string(), buffer);
        self
    }

    pub fn bind_param(&mut self, name: &str, value: i64) -> &mut Interpreter {
        self.params.insert(name.to_string(), value);
        self
    }

    pub fn buffer(&self, name: &str) -> Option<&Buffer> {
        self.buffers.get(name)
    }

    pub fn run(&mut self, stmt: &Stmt) -> Result<()> {
        let mut env = HashMap::new();
        self.exec(stmt, &mut env)
    }

    fn exec(&mut self, stmt: &Stmt, env: &mut HashMap<String, i64>) -> Result<()> {
        match stmt {
            Stmt::Loop { var, min, extent, body, .. } => {
                // Every loop kind runs serially here; kinds only mark
                // intent for a backend.
                let min = eval_expr(min, env, &self.params)?;
                let extent = eval_expr(extent, env, &self.params)?;
                let saved = env.get(var).copied();
                for i in 0..extent.max(0) {
                    env.insert(var.clone(), min + i);
                    self.exec(body, env)?;
                }
                match saved {
                    Some(v) => env.insert(var.clone(), v),
                    None => env.remove(var)
                };
                Ok(())
            },
            Stmt::Allocate { name, extents, body, .. } => {
                let mut sizes = Vec::with_capacity(extents.len());
                for extent in extents {
                    sizes.push(eval_expr(extent, env, &self.params)?.max(0));
                }
                debug!(buffer = name.as_str(), ?sizes, "allocate");
                let saved = self.buffers.remove(name);
                self.buffers.insert(name.clone(), Buffer::new(name, sizes));
                let result = self.exec(body, env);
                match saved {
                    Some(b) => self.buffers.insert(name.clone(), b),
                    None => self.buffers.remove(name)
                };
                result
            },
            Stmt::Store { target, indices, value } => {
                let value = eval_value(value, &self.buffers, env, &self.params)?;
                let mut evaluated = Vec::with_capacity(indices.len());
                for index in indices {
                    evaluated.push(eval_expr(index, env, &self.params)?);
                }
                let buffer = self
                    .buffers
                    .get_mut(target)
                    .ok_or_else(|| Error::MissingBinding { name: target.clone() })?;
                buffer.set(&evaluated, value)
            },
            Stmt::If { cond, then, otherwise } => {
                let Cond::Le(l, r) = cond;
                if eval_expr(l, env, &self.params)? <= eval_expr(r, env, &self.params)? {
                    self.exec(then, env)
                } else if let Some(otherwise) = otherwise {
                    self.exec(otherwise, env)
                } else {
                    Ok(())
                }
            },
            Stmt::Block(children) => {
                for child in children {
                    self.exec(child, env)?;
                }
                Ok(())
            }
        }
    }
}

fn concrete(interval: &Interval, params: &HashMap<String, i64>) -> Result<(i64, i64)> {
    let empty = HashMap::new();
    let min = eval_expr(&interval.min, &empty, params)?;
    let max = eval_expr(&interval.max, &empty, params)?;
    Ok((min, (max - min + 1).max(0)))
}

/// Evaluates a graph directly, one function at a time in topological
/// order, every function materialized over its full inferred region.
/// Slow and schedule-free: the baseline lowered pipelines are checked
/// against.
pub fn reference(
    graph: &Graph,
    output_bounds: &HashMap<String, Region>,
    inputs: Vec<Buffer>,
    params: &HashMap<String, i64>
) -> Result<HashMap<String, Buffer>> {
    let bounds = bounds::infer(graph, output_bounds)?;
    let mut buffers: HashMap<String, Buffer> = inputs
        .into_iter()
        .map(|b| (b.name().to_string(), b))
        .collect();

    for name in graph.topological_names() {
        let func = graph.expect_func(&name);
        let region = match bounds.region(&name) {
            Some(r) => r,
            None => continue
        };
        let mut mins = Vec::new();
        let mut extents = Vec::new();
        for interval in &region.intervals {
            let (min, extent) = concrete(interval, params)?;
            mins.push(min);
            extents.push(extent);
        }

        let mut buffer = Buffer::with_mins(&name, mins, extents);
        for point in buffer.points() {
            let mut env = HashMap::new();
            for (arg, value) in func.args.iter().zip(&point) {
                env.insert(arg.name().to_string(), *value);
            }
            let value = eval_value(&func.definition, &buffers, &env, params)?;
            buffer.set(&point, value)?;
        }
        buffers.insert(name.clone(), buffer);

        let var_intervals = realization_env(func, region)?;
        for update in &func.updates {
            let vars = update.free_vars();
            let mut mins = Vec::new();
            let mut extents = Vec::new();
            for var in &vars {
                let (min, extent) = concrete(&var_intervals[var], params)?;
                mins.push(min);
                extents.push(extent);
            }
            for values in Points::new(mins, extents) {
                let env: HashMap<String, i64> =
                    vars.iter().cloned().zip(values).collect();
                let value = eval_value(&update.value, &buffers, &env, params)?;
                let mut indices = Vec::new();
                for index in &update.indices {
                    indices.push(eval_expr(index, &env, params)?);
                }
                buffers
                    .get_mut(&name)
                    .unwrap()
                    .set(&indices, value)?;
            }
        }
    }
    Ok(buffers)
}
