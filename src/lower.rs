//! Lowering: combines a graph with a schedule and produces the loop
//! nest that realises the outputs over their requested regions.
//!
//! The walk is driven by compute levels. Every materialized function is
//! attached either at the root or inside a loop of its host, producers
//! ahead of the code that reads them. Inlined functions disappear
//! before any loops are built: each access to one is replaced by its
//! definition with the call coordinates substituted in.
//!
//! Regions are site-relative. A function computed inside `out.y` gets a
//! fresh region for every `y`, expressed in terms of the loop variable,
//! while its allocation is sized at its storage level, where fewer
//! loops are in scope. Stores and loads into allocated buffers are
//! rebased so that index zero is the allocation's origin; graph inputs
//! and outputs always keep absolute coordinates.
//!
//! Lowering mutates nothing on failure: every check runs before the
//! first IR node is built, so a rejected schedule leaves only an error.

use std::collections::{HashMap, HashSet};

use tracing::{debug, trace};

use crate::ast::{Definition, Func, VarExpr};
use crate::bounds::{self, realization_env, required_regions, Region};
use crate::error::{Error, Result};
use crate::graph::Graph;
use crate::interval::{bounds_of, Interval};
use crate::ir::{Cond, ElementType, LoopKind, Stmt};
use crate::schedule::{FuncSchedule, LoopLevel, Schedule};

/// A resolved position in the loop tree. Unlike `LoopLevel` this can
/// never be `Inlined`: inlined functions have no position.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Site {
    Root,
    At { func: String, dim: String }
}

pub fn lower(
    graph: &Graph,
    schedule: &Schedule,
    output_bounds: &HashMap<String, Region>
) -> Result<Stmt> {
    // Validates the output bounds and that every reachable region is
    // well formed before any site-relative work starts.
    bounds::infer(graph, output_bounds)?;
    let lower = Lower::new(graph, schedule, output_bounds)?;
    lower.build()
}

struct Lower<'a> {
    graph: &'a Graph,
    schedule: &'a Schedule,
    /// Materialized functions with inlined callees expanded away.
    funcs: HashMap<String, Func>,
    /// Materialized functions, producers first.
    order: Vec<String>,
    compute_sites: HashMap<String, Site>,
    store_sites: HashMap<String, Site>,
    /// Loops enclosing each function's compute attachment, outermost
    /// first, including the attachment loop itself.
    chains: HashMap<String, Vec<(String, String)>>,
    /// Functions computed inside a given host loop, producers first.
    compute_children: HashMap<(String, String), Vec<String>>,
    /// Buffers allocated inside a given host loop, producers first.
    store_children: HashMap<(String, String), Vec<String>>,
    compute_regions: HashMap<String, Region>,
    store_regions: HashMap<String, Region>
}

impl<'a> Lower<'a> {
    fn new(
        graph: &'a Graph,
        schedule: &'a Schedule,
        output_bounds: &'a HashMap<String, Region>
    ) -> Result<Lower<'a>> {
        let (funcs, order) = expand_inlined(graph, schedule);

        let mut lower = Lower {
            graph,
            schedule,
            funcs,
            order,
            compute_sites: HashMap::new(),
            store_sites: HashMap::new(),
            chains: HashMap::new(),
            compute_children: HashMap::new(),
            store_children: HashMap::new(),
            compute_regions: HashMap::new(),
            store_regions: HashMap::new()
        };
        lower.resolve_sites()?;
        lower.resolve_chains()?;
        lower.check_storage()?;
        lower.check_races()?;
        lower.resolve_regions(output_bounds)?;
        lower.prune_unreachable();
        Ok(lower)
    }

    /// Drops materialized functions that no output transitively reads.
    /// They have no required region, so there is nothing to realise.
    fn prune_unreachable(&mut self) {
        let live: HashSet<String> = self.compute_regions.keys().cloned().collect();
        self.order.retain(|n| live.contains(n));
        self.funcs.retain(|n, _| live.contains(n));
        for children in self.compute_children.values_mut() {
            children.retain(|n| live.contains(n));
        }
        for children in self.store_children.values_mut() {
            children.retain(|n| live.contains(n));
        }
    }

    fn resolve_sites(&mut self) -> Result<()> {
        for name in &self.order {
            let fsched = self.schedule.expect_func(name);
            let compute = self.resolve_site(name, &fsched.compute_level)?;
            let store = self.resolve_site(name, fsched.storage_level())?;
            if let Site::At { func, dim } = &compute {
                self.compute_children
                    .entry((func.clone(), dim.clone()))
                    .or_insert_with(Vec::new)
                    .push(name.clone());
            }
            if self.is_temp(name) {
                if let Site::At { func, dim } = &store {
                    self.store_children
                        .entry((func.clone(), dim.clone()))
                        .or_insert_with(Vec::new)
                        .push(name.clone());
                }
            }
            self.compute_sites.insert(name.clone(), compute);
            self.store_sites.insert(name.clone(), store);
        }
        Ok(())
    }

    fn resolve_site(&self, func: &str, level: &LoopLevel) -> Result<Site> {
        match level {
            LoopLevel::Root | LoopLevel::Inlined => Ok(Site::Root),
            LoopLevel::At { func: host, dim } => {
                if !self.funcs.contains_key(host) {
                    return Err(Error::InlinedHost {
                        func: func.to_string(),
                        host: host.clone(),
                        dim: dim.clone()
                    });
                }
                // A later split may have consumed the named dimension.
                if self.schedule.expect_func(host).dim(dim).is_none() {
                    return Err(Error::UnknownVariable {
                        func: host.clone(),
                        var: dim.clone()
                    });
                }
                Ok(Site::At { func: host.clone(), dim: dim.clone() })
            }
        }
    }

    /// Computes, for every materialized function, the chain of loops
    /// enclosing its compute attachment. Rejects compute-at cycles.
    fn resolve_chains(&mut self) -> Result<()> {
        for name in self.order.clone() {
            let mut path = Vec::new();
            self.chain_of(&name, &mut path)?;
        }
        Ok(())
    }

    fn chain_of(&mut self, func: &str, path: &mut Vec<String>) -> Result<Vec<(String, String)>> {
        if let Some(chain) = self.chains.get(func) {
            return Ok(chain.clone());
        }
        if path.iter().any(|p| p == func) {
            path.push(func.to_string());
            return Err(Error::CyclicDependency { path: path.clone() });
        }
        path.push(func.to_string());
        let chain = match self.compute_sites[func].clone() {
            Site::Root => Vec::new(),
            Site::At { func: host, dim } => {
                let mut chain = self.chain_of(&host, path)?;
                chain.extend(self.host_loops(&host, &dim));
                chain
            }
        };
        path.pop();
        self.chains.insert(func.to_string(), chain.clone());
        Ok(chain)
    }

    /// The loops of `host` from its outermost dimension down to and
    /// including `dim`, outermost first.
    fn host_loops(&self, host: &str, dim: &str) -> Vec<(String, String)> {
        let fsched = self.schedule.expect_func(host);
        let pos = fsched.dim_position(dim).unwrap();
        (pos..fsched.dims.len())
            .rev()
            .map(|i| (host.to_string(), fsched.dims[i].name.clone()))
            .collect()
    }

    /// Loops enclosing a site, outermost first, the site's own loop last.
    fn site_loops(&self, site: &Site) -> Vec<(String, String)> {
        match site {
            Site::Root => Vec::new(),
            Site::At { func, dim } => {
                let mut loops = self.chains[func].clone();
                loops.extend(self.host_loops(func, dim));
                loops
            }
        }
    }

    /// Every allocated buffer must stay live across all of its readers:
    /// the storage loop has to enclose the compute attachment of every
    /// consumer, and reads from a host's update definitions sit outside
    /// the host's pure nest entirely.
    fn check_storage(&self) -> Result<()> {
        for name in &self.order {
            if !self.is_temp(name) {
                continue;
            }
            let store = &self.store_sites[name];
            let (host, store_dim) = match store {
                Site::Root => continue,
                Site::At { func, dim } => (func.clone(), dim.clone())
            };
            let invalid = |consumer_level: String| Error::InvalidStorageNesting {
                func: name.clone(),
                store: self.schedule.expect_func(name).storage_level().to_string(),
                compute: consumer_level
            };

            let own_loops = self.site_loops(&self.compute_sites[name]);
            if !own_loops.contains(&(host.clone(), store_dim.clone())) {
                return Err(invalid(
                    self.schedule.expect_func(name).compute_level.to_string()
                ));
            }

            for consumer in self.consumers_of(name) {
                if consumer == host {
                    if self.funcs[&consumer]
                        .updates
                        .iter()
                        .any(|u| u.value.sources().contains(name))
                    {
                        return Err(invalid(format!("{} (update)", consumer)));
                    }
                    continue;
                }
                let chain = self.site_loops(&self.compute_sites[&consumer]);
                if !chain.contains(&(host.clone(), store_dim.clone())) {
                    return Err(invalid(
                        self.schedule.expect_func(&consumer).compute_level.to_string()
                    ));
                }
            }
        }
        Ok(())
    }

    /// A buffer written under a parallel loop that sits strictly inside
    /// its allocation is shared between that loop's iterations.
    fn check_races(&self) -> Result<()> {
        for name in &self.order {
            if !self.is_temp(name) {
                continue;
            }
            let compute_loops = self.site_loops(&self.compute_sites[name]);
            let inside_alloc: &[(String, String)] = match &self.store_sites[name] {
                Site::Root => &compute_loops,
                Site::At { func, dim } => {
                    let pos = compute_loops
                        .iter()
                        .position(|l| l == &(func.clone(), dim.clone()))
                        .unwrap();
                    &compute_loops[pos + 1..]
                }
            };
            for (host, dim) in inside_alloc {
                let kind = self.schedule.expect_func(host).dim(dim).unwrap().kind;
                if kind == LoopKind::Parallel {
                    return Err(Error::RaceHazard {
                        func: name.clone(),
                        var: format!("{}.{}", host, dim)
                    });
                }
            }
        }
        Ok(())
    }

    fn resolve_regions(&mut self, output_bounds: &HashMap<String, Region>) -> Result<()> {
        let mut sites: Vec<Site> = Vec::new();
        for name in &self.order {
            for site in [&self.compute_sites[name], &self.store_sites[name]] {
                if !sites.contains(site) {
                    sites.push(site.clone());
                }
            }
        }
        for site in sites {
            let table = self.regions_for_site(&site, output_bounds)?;
            for name in &self.order {
                let region = match table.get(name) {
                    Some(r) => r.clone(),
                    None => continue
                };
                if self.compute_sites[name] == site {
                    trace!(func = name.as_str(), "compute region resolved");
                    self.compute_regions.insert(name.clone(), region.clone());
                }
                if self.store_sites[name] == site {
                    self.store_regions.insert(name.clone(), region);
                }
            }
        }
        Ok(())
    }

    /// One full required-region pass with the loops enclosing `site`
    /// treated as fixed points. Consumers run before producers, so each
    /// function's region is final when its own reads are pushed down.
    fn regions_for_site(
        &self,
        site: &Site,
        output_bounds: &HashMap<String, Region>
    ) -> Result<HashMap<String, Region>> {
        let bound: HashSet<(String, String)> = self.site_loops(site).into_iter().collect();
        let mut table: HashMap<String, Region> = HashMap::new();
        for output in self.graph.outputs() {
            table.insert(output.clone(), output_bounds[output].clone());
        }
        for name in self.order.iter().rev() {
            let func = &self.funcs[name];
            let region = match table.get(name) {
                Some(r) => r.clone(),
                None => continue
            };
            let env = self.site_env(func, &region, &bound)?;
            for (callee, required) in required_regions(func, &env)? {
                match table.get(&callee) {
                    Some(existing) => {
                        let merged = existing.union(&required);
                        table.insert(callee, merged);
                    },
                    None => {
                        table.insert(callee, required);
                    }
                }
            }
        }
        Ok(table)
    }

    /// Intervals for a function's variables relative to a set of bound
    /// loops. An argument whose loops are all bound collapses to a
    /// point; one whose loops are all free keeps its full interval; a
    /// partially bound split argument is reconstructed from its pieces.
    fn site_env(
        &self,
        func: &Func,
        region: &Region,
        bound: &HashSet<(String, String)>
    ) -> Result<HashMap<String, Interval>> {
        let fsched = self.schedule.expect_func(&func.name);
        let extents = component_extents(fsched, region, func);
        let mut env = HashMap::new();

        for (i, arg) in func.args.iter().enumerate() {
            let comps: Vec<String> = fsched
                .dims
                .iter()
                .map(|d| d.name.clone())
                .filter(|d| fsched.root_var(d) == arg.name())
                .collect();
            let bound_count = comps
                .iter()
                .filter(|c| bound.contains(&(func.name.clone(), (*c).clone())))
                .count();

            let interval = if bound_count == 0 {
                region.intervals[i].clone()
            } else if bound_count == comps.len() {
                Interval::point(arg_expr(func, fsched, arg.name(), &region.intervals[i]))
            } else {
                let mut comp_env = HashMap::new();
                for comp in &comps {
                    let qualified = qualify(&func.name, comp);
                    if bound.contains(&(func.name.clone(), comp.clone())) {
                        comp_env.insert(qualified.clone(), Interval::point(VarExpr::var(&qualified)));
                    } else {
                        comp_env.insert(
                            qualified,
                            Interval::new(0, extents[comp].clone() - 1)
                        );
                    }
                }
                let rel = bounds_of(&rel_expr(func, fsched, arg.name()), &comp_env)?;
                rel.add(&Interval::point(region.intervals[i].min.clone()))
            };
            env.insert(arg.name().to_string(), interval);
        }

        // Update variables range over the whole axis they index,
        // whatever is bound: the update nest never hosts attachments.
        for (var, interval) in realization_env(func, region)? {
            if func.arg_position(&var).is_none() || func.updates.iter().any(|u| {
                u.indices.contains(&VarExpr::Var(var.clone()))
            }) {
                env.insert(var, interval);
            }
        }
        Ok(env)
    }

    fn build(&self) -> Result<Stmt> {
        let mut stmts = Vec::new();
        for name in &self.order {
            if self.compute_sites[name] == Site::Root {
                stmts.push(self.realize(name)?);
            }
        }
        let mut body = Stmt::block(stmts);
        for name in self.order.iter().rev() {
            if self.is_temp(name) && self.store_sites[name] == Site::Root {
                body = self.allocate(name, body);
            }
        }
        Ok(body)
    }

    fn allocate(&self, name: &str, body: Stmt) -> Stmt {
        let region = &self.store_regions[name];
        Stmt::Allocate {
            name: name.to_string(),
            element_type: ElementType::I64,
            extents: region.intervals.iter().map(|i| i.extent()).collect(),
            body: Box::new(body)
        }
    }

    /// Emits the pure loop nest of `name` followed by one nest per
    /// update definition.
    fn realize(&self, name: &str) -> Result<Stmt> {
        let func = &self.funcs[name];
        let fsched = self.schedule.expect_func(name);
        let region = &self.compute_regions[name];
        debug!(func = name, "lowering");

        let mut stmts = vec![self.pure_nest(func, fsched, region)?];
        for update in &func.updates {
            stmts.push(self.update_nest(func, update, region));
        }
        Ok(Stmt::block(stmts))
    }

    fn pure_nest(&self, func: &Func, fsched: &FuncSchedule, region: &Region) -> Result<Stmt> {
        let extents = component_extents(fsched, region, func);

        // One guard per split whose factor does not provably divide the
        // extent it tiles, attached just inside the innermost loop that
        // binds all of the variables it mentions.
        let mut guards: Vec<(usize, Cond)> = Vec::new();
        for split in &fsched.splits {
            if let Some(e) = extents[&split.of].as_const() {
                if e % split.factor == 0 {
                    continue;
                }
            }
            let ready = subtree_leaves(fsched, &split.of)
                .iter()
                .map(|leaf| fsched.dim_position(leaf).unwrap())
                .min()
                .unwrap();
            let cond = Cond::Le(
                rel_expr(func, fsched, &split.of),
                (extents[&split.of].clone() - 1).simplify()
            );
            guards.push((ready, cond));
        }

        let mut body = self.pure_store(func, fsched, region);
        for (pos, dim) in fsched.dims.iter().enumerate() {
            let site = (func.name.clone(), dim.name.clone());

            let mut stmts = Vec::new();
            if let Some(children) = self.compute_children.get(&site) {
                for child in children {
                    stmts.push(self.realize(child)?);
                }
            }
            stmts.push(body);
            body = Stmt::block(stmts);

            for (_, cond) in guards.iter().filter(|(ready, _)| *ready == pos) {
                body = Stmt::guarded(cond.clone(), body);
            }
            if let Some(stored) = self.store_children.get(&site) {
                for temp in stored.iter().rev() {
                    body = self.allocate(temp, body);
                }
            }

            let (min, extent) = match func.arg_position(&dim.name) {
                Some(i) => (region.intervals[i].min.clone(), region.intervals[i].extent()),
                None => (VarExpr::Const(0), extents[&dim.name].clone())
            };
            if dim.kind == LoopKind::Vector && extent.as_const().is_none() {
                return Err(Error::NonConstantVectorExtent {
                    func: func.name.clone(),
                    var: dim.name.clone()
                });
            }
            body = Stmt::Loop {
                var: qualify(&func.name, &dim.name),
                min,
                extent,
                kind: dim.kind,
                body: Box::new(body)
            };
        }
        Ok(body)
    }

    fn pure_store(&self, func: &Func, fsched: &FuncSchedule, region: &Region) -> Stmt {
        let mut env = HashMap::new();
        let mut indices = Vec::new();
        for (i, arg) in func.args.iter().enumerate() {
            let expr = arg_expr(func, fsched, arg.name(), &region.intervals[i]);
            env.insert(arg.name().to_string(), expr.clone());
            indices.push(expr);
        }
        let value = self.rebase(func.definition.substitute(&env));
        Stmt::Store {
            target: func.name.clone(),
            indices: self.rebase_indices(&func.name, indices),
            value
        }
    }

    fn update_nest(&self, func: &Func, update: &crate::ast::Update, region: &Region) -> Stmt {
        let mut axes: Vec<(usize, String)> = Vec::new();
        let mut env = HashMap::new();
        for var in update.free_vars() {
            let axis = update
                .indices
                .iter()
                .position(|ix| *ix == VarExpr::Var(var.clone()))
                .unwrap();
            env.insert(var.clone(), VarExpr::var(&qualify(&func.name, &var)));
            axes.push((axis, var));
        }
        axes.sort();

        let indices = update
            .indices
            .iter()
            .map(|ix| ix.substitute(&env).simplify())
            .collect();
        let value = self.rebase(update.value.substitute(&env));
        let mut body = Stmt::Store {
            target: func.name.clone(),
            indices: self.rebase_indices(&func.name, indices),
            value
        };
        for (axis, var) in axes {
            let interval = &region.intervals[axis];
            body = Stmt::Loop {
                var: qualify(&func.name, &var),
                min: interval.min.clone(),
                extent: interval.extent(),
                kind: LoopKind::Serial,
                body: Box::new(body)
            };
        }
        body
    }

    /// Shifts loads from allocated buffers to allocation-origin
    /// coordinates. Inputs and outputs stay absolute.
    fn rebase(&self, definition: Definition) -> Definition {
        definition.map_accesses(&|access| {
            let mut access = access.clone();
            access.args = self.rebase_indices(&access.source, access.args);
            Definition::Access(access)
        })
    }

    fn rebase_indices(&self, target: &str, indices: Vec<VarExpr>) -> Vec<VarExpr> {
        if !self.is_temp(target) {
            return indices.into_iter().map(|ix| ix.simplify()).collect();
        }
        let mins = &self.store_regions[target].intervals;
        indices
            .into_iter()
            .zip(mins)
            .map(|(ix, interval)| (ix - interval.min.clone()).simplify())
            .collect()
    }

    fn is_temp(&self, name: &str) -> bool {
        self.funcs.contains_key(name) && !self.graph.is_output(name)
    }

    fn consumers_of(&self, name: &str) -> Vec<String> {
        self.order
            .iter()
            .filter(|f| {
                f.as_str() != name && self.funcs[*f].sources().contains(&name.to_string())
            })
            .cloned()
            .collect()
    }
}

/// Replaces every access to an inlined function with that function's
/// definition, call coordinates substituted for its arguments. Returns
/// the surviving functions and their topological order.
fn expand_inlined(graph: &Graph, schedule: &Schedule) -> (HashMap<String, Func>, Vec<String>) {
    let mut inlined: HashMap<String, Definition> = HashMap::new();
    let mut funcs = HashMap::new();
    let mut order = Vec::new();

    for name in graph.topological_names() {
        let func = graph.expect_func(&name);
        let expand = |definition: &Definition| {
            definition.map_accesses(&|access| match inlined.get(&access.source) {
                Some(producer_def) => {
                    let producer = graph.expect_func(&access.source);
                    let env: HashMap<String, VarExpr> = producer
                        .args
                        .iter()
                        .map(|a| a.name().to_string())
                        .zip(access.args.iter().cloned())
                        .collect();
                    producer_def.substitute(&env)
                },
                None => Definition::Access(access.clone())
            })
        };
        let definition = expand(&func.definition);
        if schedule.expect_func(&name).compute_level == LoopLevel::Inlined {
            inlined.insert(name, definition);
        } else {
            let mut expanded = func.clone();
            expanded.definition = definition;
            for update in &mut expanded.updates {
                update.value = expand(&update.value);
            }
            funcs.insert(name.clone(), expanded);
            order.push(name);
        }
    }
    (funcs, order)
}

fn qualify(func: &str, dim: &str) -> String {
    format!("{}.{}", func, dim)
}

/// The zero-based reconstruction of a (possibly split) variable from
/// the loop variables of its pieces.
fn rel_expr(func: &Func, fsched: &FuncSchedule, name: &str) -> VarExpr {
    match fsched.splits.iter().find(|s| s.of == name) {
        Some(split) => {
            rel_expr(func, fsched, &split.outer) * split.factor
                + rel_expr(func, fsched, &split.inner)
        },
        None => VarExpr::var(&qualify(&func.name, name))
    }
}

/// The absolute coordinate an argument takes inside the loop nest.
fn arg_expr(func: &Func, fsched: &FuncSchedule, arg: &str, interval: &Interval) -> VarExpr {
    if fsched.splits.iter().any(|s| s.of == arg) {
        (interval.min.clone() + rel_expr(func, fsched, arg)).simplify()
    } else {
        VarExpr::var(&qualify(&func.name, arg))
    }
}

/// Extent of every named loop piece: a split's inner piece runs for the
/// factor, its outer piece for the extent rounded up to whole tiles.
fn component_extents(
    fsched: &FuncSchedule,
    region: &Region,
    func: &Func
) -> HashMap<String, VarExpr> {
    let mut extents = HashMap::new();
    for (i, arg) in func.args.iter().enumerate() {
        extents.insert(arg.name().to_string(), region.intervals[i].extent());
    }
    for split in &fsched.splits {
        // Div has no operator; it only ever appears in lowered extents.
        let e = extents[&split.of].clone();
        let tiles = VarExpr::Div(
            Box::new(e + (split.factor - 1)),
            Box::new(VarExpr::Const(split.factor))
        );
        extents.insert(split.outer.clone(), tiles.simplify());
        extents.insert(split.inner.clone(), VarExpr::Const(split.factor));
    }
    extents
}

fn subtree_leaves(fsched: &FuncSchedule, name: &str) -> Vec<String> {
    match fsched.splits.iter().find(|s| s.of == name) {
        Some(split) => {
            let mut leaves = subtree_leaves(fsched, &split.outer);
            leaves.extend(subtree_leaves(fsched, &split.inner));
            leaves
        },
        None => vec![name.to_string()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Param, Source, Var};
    use crate::graph::GraphBuilder;
    use crate::pretty_print::PrettyPrint;

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

    fn pointwise() -> Graph {
        var!(x, y);
        source!(input);
        func!(out(x, y) = at!(input; &x, &y) + 1);
        let mut builder = GraphBuilder::new("point");
        builder.define(out).unwrap();
        builder.close(&["out"]).unwrap()
    }

    fn output_region(graph: &Graph, region: Region) -> HashMap<String, Region> {
        let mut bounds = HashMap::new();
        bounds.insert(graph.outputs()[0].clone(), region);
        bounds
    }

    fn count_loops(stmt: &Stmt) -> usize {
        stmt.count_nodes(&|s| matches!(s, Stmt::Loop { .. }))
    }

    fn count_allocs(stmt: &Stmt) -> usize {
        stmt.count_nodes(&|s| matches!(s, Stmt::Allocate { .. }))
    }

    fn count_guards(stmt: &Stmt) -> usize {
        stmt.count_nodes(&|s| matches!(s, Stmt::If { .. }))
    }

    fn find_loop<'a>(stmt: &'a Stmt, name: &str) -> Option<&'a Stmt> {
        match stmt {
            Stmt::Loop { var, body, .. } => {
                if var == name {
                    Some(stmt)
                } else {
                    find_loop(body, name)
                }
            },
            Stmt::Allocate { body, .. } => find_loop(body, name),
            Stmt::If { then, otherwise, .. } => find_loop(then, name)
                .or_else(|| otherwise.as_ref().and_then(|e| find_loop(e, name))),
            Stmt::Block(children) => children.iter().find_map(|c| find_loop(c, name)),
            Stmt::Store { .. } => None
        }
    }

    #[test]
    fn test_default_pointwise_nest() {
        let graph = pointwise();
        let schedule = Schedule::new(&graph);
        let bounds = output_region(&graph, Region::with_extents(vec![4, 4]));
        let stmt = lower(&graph, &schedule, &bounds).unwrap();

        let expected = "\
for out.y in [0, 0 + 4) {
  for out.x in [0, 0 + 4) {
    out[out.x, out.y] = input(out.x, out.y) + 1
  }
}";
        assert_eq!(stmt.pretty_print(), expected);
    }

    #[test]
    fn test_inlined_producer_leaves_no_loops() {
        let graph = two_stage_blur();
        let schedule = Schedule::new(&graph);
        let bounds = output_region(&graph, Region::with_extents(vec![8, 8]));
        let stmt = lower(&graph, &schedule, &bounds).unwrap();

        // blur is inlined by default, so only out's two loops survive
        // and its expanded body reads input directly.
        assert_eq!(count_loops(&stmt), 2);
        assert_eq!(count_allocs(&stmt), 0);
        assert!(stmt.pretty_print().contains("input(out.x - 1, out.y - 1)"));
    }

    #[test]
    fn test_compute_root_allocates_the_full_region() {
        let graph = two_stage_blur();
        let mut schedule = Schedule::new(&graph);
        schedule.compute_root("blur").unwrap();

        param!(w);
        param!(h);
        let bounds = output_region(
            &graph,
            Region::with_extents(vec![VarExpr::from(&w), VarExpr::from(&h)])
        );
        let stmt = lower(&graph, &schedule, &bounds).unwrap();

        match &stmt {
            Stmt::Allocate { name, extents, body, .. } => {
                assert_eq!(name, "blur");
                assert_eq!(extents, &vec![VarExpr::param("w"), VarExpr::param("h") + 2]);
                // Producer loops precede consumer loops.
                match body.as_ref() {
                    Stmt::Block(stmts) => {
                        assert!(matches!(&stmts[0], Stmt::Loop { var, .. } if var == "blur.y"));
                        assert!(matches!(&stmts[1], Stmt::Loop { var, .. } if var == "out.y"));
                    },
                    other => panic!("expected a block under the allocation, got {:?}", other)
                }
            },
            other => panic!("expected an allocation at root, got {:?}", other)
        }

        // blur's stores are rebased to the allocation origin, so its
        // y index is blur.y + 1, and out's loads shift the same way.
        let printed = stmt.pretty_print();
        assert!(printed.contains("blur[blur.x, blur.y + 1]"));
        assert!(printed.contains("blur(out.x, out.y + 1)"));
    }

    #[test]
    fn test_compute_at_allocates_per_iteration() {
        let graph = two_stage_blur();
        let mut schedule = Schedule::new(&graph);
        schedule.compute_at("blur", "out", "y").unwrap();

        let bounds = output_region(&graph, Region::with_extents(vec![8, 8]));
        let stmt = lower(&graph, &schedule, &bounds).unwrap();

        // The allocation sits inside out.y and covers three rows.
        let out_y = find_loop(&stmt, "out.y").unwrap();
        match out_y {
            Stmt::Loop { body, .. } => match body.as_ref() {
                Stmt::Allocate { name, extents, .. } => {
                    assert_eq!(name, "blur");
                    assert_eq!(extents, &vec![VarExpr::Const(8), VarExpr::Const(3)]);
                },
                other => panic!("expected allocation inside out.y, got {:?}", other)
            },
            _ => unreachable!()
        }
        // blur's loops appear inside out.y, before out.x.
        assert!(find_loop(&stmt, "blur.y").is_some());
        assert_eq!(count_loops(&stmt), 4);
    }

    #[test]
    fn test_split_reconstructs_and_guards() {
        let graph = pointwise();
        let mut schedule = Schedule::new(&graph);
        schedule.split("out", "x", 4).unwrap();

        let bounds = output_region(&graph, Region::with_extents(vec![10, 2]));
        let stmt = lower(&graph, &schedule, &bounds).unwrap();

        // 10 does not divide by 4: three tiles and a guard.
        match find_loop(&stmt, "out.x.outer").unwrap() {
            Stmt::Loop { extent, .. } => assert_eq!(extent, &VarExpr::Const(3)),
            _ => unreachable!()
        }
        match find_loop(&stmt, "out.x.inner").unwrap() {
            Stmt::Loop { extent, .. } => assert_eq!(extent, &VarExpr::Const(4)),
            _ => unreachable!()
        }
        assert_eq!(count_guards(&stmt), 1);
        assert!(stmt
            .pretty_print()
            .contains("(out.x.outer * 4) + out.x.inner <= 9"));

        // A dividing split needs no guard.
        let bounds = output_region(&graph, Region::with_extents(vec![8, 2]));
        let stmt = lower(&graph, &schedule, &bounds).unwrap();
        assert_eq!(count_guards(&stmt), 0);
    }

    #[test]
    fn test_split_outer_extent_rounds_up_symbolically() {
        let graph = pointwise();
        let mut schedule = Schedule::new(&graph);
        schedule.split("out", "x", 4).unwrap();

        param!(w);
        let bounds = output_region(
            &graph,
            Region::with_extents(vec![VarExpr::from(&w), VarExpr::Const(2)])
        );
        let stmt = lower(&graph, &schedule, &bounds).unwrap();

        // ceil(w / 4) tiles, kept symbolic until the caller binds w.
        match find_loop(&stmt, "out.x.outer").unwrap() {
            Stmt::Loop { extent, .. } => assert_eq!(
                extent,
                &VarExpr::Div(
                    Box::new(VarExpr::param("w") + 3),
                    Box::new(VarExpr::Const(4))
                )
            ),
            _ => unreachable!()
        }
    }

    #[test]
    fn test_vectorize_marks_the_inner_loop() {
        let graph = pointwise();
        let mut schedule = Schedule::new(&graph);
        schedule.vectorize("out", "x", 4).unwrap();

        let bounds = output_region(&graph, Region::with_extents(vec![16, 2]));
        let stmt = lower(&graph, &schedule, &bounds).unwrap();
        match find_loop(&stmt, "out.x.inner").unwrap() {
            Stmt::Loop { extent, kind, .. } => {
                assert_eq!(extent, &VarExpr::Const(4));
                assert_eq!(*kind, LoopKind::Vector);
            },
            _ => unreachable!()
        }
    }

    #[test]
    fn test_vector_loop_needs_constant_extent() {
        let graph = pointwise();
        let mut schedule = Schedule::new(&graph);
        schedule.vector("out", "x").unwrap();

        param!(w);
        let bounds = output_region(
            &graph,
            Region::with_extents(vec![VarExpr::from(&w), VarExpr::Const(2)])
        );
        match lower(&graph, &schedule, &bounds) {
            Err(Error::NonConstantVectorExtent { func, var }) => {
                assert_eq!((func.as_str(), var.as_str()), ("out", "x"))
            },
            other => panic!("expected NonConstantVectorExtent, got {:?}", other)
        }
    }

    #[test]
    fn test_reorder_swaps_the_nest() {
        let graph = pointwise();
        let mut schedule = Schedule::new(&graph);
        schedule.reorder("out", &["y", "x"]).unwrap();

        let bounds = output_region(&graph, Region::with_extents(vec![4, 4]));
        let stmt = lower(&graph, &schedule, &bounds).unwrap();
        match &stmt {
            Stmt::Loop { var, .. } => assert_eq!(var, "out.x"),
            other => panic!("expected a loop at root, got {:?}", other)
        }
    }

    #[test]
    fn test_parallel_consumer_of_shared_storage_is_a_race() {
        let graph = two_stage_blur();
        let mut schedule = Schedule::new(&graph);
        schedule.compute_at("blur", "out", "y").unwrap();
        schedule.store_root("blur").unwrap();
        schedule.parallel("out", "y").unwrap();

        let bounds = output_region(&graph, Region::with_extents(vec![8, 8]));
        match lower(&graph, &schedule, &bounds) {
            Err(Error::RaceHazard { func, var }) => {
                assert_eq!((func.as_str(), var.as_str()), ("blur", "out.y"))
            },
            other => panic!("expected RaceHazard, got {:?}", other)
        }
    }

    #[test]
    fn test_private_storage_under_a_parallel_loop_is_fine() {
        let graph = two_stage_blur();
        let mut schedule = Schedule::new(&graph);
        schedule.compute_at("blur", "out", "y").unwrap();
        schedule.parallel("out", "y").unwrap();

        let bounds = output_region(&graph, Region::with_extents(vec![8, 8]));
        assert!(lower(&graph, &schedule, &bounds).is_ok());
    }

    #[test]
    fn test_storage_must_cover_every_consumer() {
        var!(x, y);
        source!(input);
        func!(g(x, y) = at!(input; &x, &y) + 1);
        func!(a(x, y) = at!(g; &x, &y) * 2);
        func!(b(x, y) = at!(g; &x, &y) * 3);
        let mut builder = GraphBuilder::new("diamond");
        builder.define(g).unwrap();
        builder.define(a).unwrap();
        builder.define(b).unwrap();
        let graph = builder.close(&["a", "b"]).unwrap();

        let mut schedule = Schedule::new(&graph);
        schedule.compute_at("g", "a", "y").unwrap();

        let mut bounds = HashMap::new();
        bounds.insert("a".to_string(), Region::with_extents(vec![4, 4]));
        bounds.insert("b".to_string(), Region::with_extents(vec![4, 4]));

        // g's buffer lives inside a's loop over y, but b reads it from
        // the root.
        match lower(&graph, &schedule, &bounds) {
            Err(Error::InvalidStorageNesting { func, .. }) => assert_eq!(func, "g"),
            other => panic!("expected InvalidStorageNesting, got {:?}", other)
        }
    }

    #[test]
    fn test_compute_at_an_inlined_host_is_rejected() {
        var!(x, y);
        source!(input);
        func!(f(x, y) = at!(input; &x, &y) + 1);
        func!(g(x, y) = at!(f; &x, &y) * 2);
        func!(out(x, y) = at!(g; &x, &y) - 1);
        let mut builder = GraphBuilder::new("chain");
        builder.define(f).unwrap();
        builder.define(g).unwrap();
        builder.define(out).unwrap();
        let graph = builder.close(&["out"]).unwrap();

        let mut schedule = Schedule::new(&graph);
        // g stays inlined, so it has no loop for f to attach to.
        schedule.compute_at("f", "g", "y").unwrap();

        let bounds = output_region(&graph, Region::with_extents(vec![4, 4]));
        match lower(&graph, &schedule, &bounds) {
            Err(Error::InlinedHost { func, host, .. }) => {
                assert_eq!((func.as_str(), host.as_str()), ("f", "g"))
            },
            other => panic!("expected InlinedHost, got {:?}", other)
        }
    }

    #[test]
    fn test_update_definitions_run_after_the_pure_nest() {
        var!(x);
        source!(input);
        func!(f(x) = at!(input; &x));
        let mut builder = GraphBuilder::new("double_edge");
        builder.define(f.clone()).unwrap();
        builder
            .update("f", vec![(&x).into()], at!(f; &x) * 2)
            .unwrap();
        let graph = builder.close(&["f"]).unwrap();

        let schedule = Schedule::new(&graph);
        let bounds = output_region(&graph, Region::with_extents(vec![4]));
        let stmt = lower(&graph, &schedule, &bounds).unwrap();

        let expected = "\
for f.x in [0, 0 + 4) {
  f[f.x] = input(f.x)
}
for f.x in [0, 0 + 4) {
  f[f.x] = f(f.x) * 2
}";
        assert_eq!(stmt.pretty_print(), expected);
    }
}
