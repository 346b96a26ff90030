//! The functional language pipelines are written in.

use std::collections::HashMap;
use std::fmt;
use std::ops::{Add, Div, Mul, Sub};

use crate::pretty_print::*;

// [NOTE: AST terminology]
//
//                 VarExpr
//                   |
//                 v~~~v
// f(x, y) = g(x + 1, y - 1) + g(x - 1, y) + 2
//           ^~~~~~~~~~~~~~^
//                   |
//                 Access
//
//           ^~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~^
//                           |
//                      Definition

/// A named symbolic integer axis. It has no value until a loop binds it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Var {
    pub(crate) name: String
}

impl Var {
    pub fn new(name: &str) -> Var {
        Var { name: name.to_string() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// An expression defining the coordinate to access a buffer at.
///
/// `Param` is a named scalar resolved by the caller before or during
/// execution. `Div` only appears in lowered loop extents; there is no
/// operator for building it from user code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VarExpr {
    Var(String),
    Const(i64),
    Param(String),
    Add(Box<VarExpr>, Box<VarExpr>),
    Sub(Box<VarExpr>, Box<VarExpr>),
    Mul(Box<VarExpr>, Box<VarExpr>),
    Div(Box<VarExpr>, Box<VarExpr>),
    Min(Box<VarExpr>, Box<VarExpr>),
    Max(Box<VarExpr>, Box<VarExpr>)
}

impl VarExpr {
    pub fn var(name: &str) -> VarExpr {
        VarExpr::Var(name.to_string())
    }

    pub fn param(name: &str) -> VarExpr {
        VarExpr::Param(name.to_string())
    }

    pub fn min<U: Into<VarExpr>, V: Into<VarExpr>>(a: U, b: V) -> VarExpr {
        VarExpr::Min(Box::new(a.into()), Box::new(b.into()))
    }

    pub fn max<U: Into<VarExpr>, V: Into<VarExpr>>(a: U, b: V) -> VarExpr {
        VarExpr::Max(Box::new(a.into()), Box::new(b.into()))
    }

    pub fn clamp<E, L, U>(e: E, lo: L, hi: U) -> VarExpr
    where
        E: Into<VarExpr>,
        L: Into<VarExpr>,
        U: Into<VarExpr>
    {
        VarExpr::min(VarExpr::max(e, lo), hi)
    }

    pub fn as_const(&self) -> Option<i64> {
        match self {
            VarExpr::Const(c) => Some(*c),
            _ => None
        }
    }

    pub(crate) fn substitute(&self, env: &HashMap<String, VarExpr>) -> VarExpr {
        let rec = |e: &VarExpr| Box::new(e.substitute(env));
        match self {
            VarExpr::Var(v) => match env.get(v) {
                Some(e) => e.clone(),
                None => self.clone()
            },
            VarExpr::Const(_) | VarExpr::Param(_) => self.clone(),
            VarExpr::Add(l, r) => VarExpr::Add(rec(l), rec(r)),
            VarExpr::Sub(l, r) => VarExpr::Sub(rec(l), rec(r)),
            VarExpr::Mul(l, r) => VarExpr::Mul(rec(l), rec(r)),
            VarExpr::Div(l, r) => VarExpr::Div(rec(l), rec(r)),
            VarExpr::Min(l, r) => VarExpr::Min(rec(l), rec(r)),
            VarExpr::Max(l, r) => VarExpr::Max(rec(l), rec(r))
        }
    }

    pub(crate) fn collect_vars(&self, out: &mut Vec<String>) {
        match self {
            VarExpr::Var(v) => {
                if !out.contains(v) {
                    out.push(v.clone());
                }
            },
            VarExpr::Const(_) | VarExpr::Param(_) => { },
            VarExpr::Add(l, r)
            | VarExpr::Sub(l, r)
            | VarExpr::Mul(l, r)
            | VarExpr::Div(l, r)
            | VarExpr::Min(l, r)
            | VarExpr::Max(l, r) => {
                l.collect_vars(out);
                r.collect_vars(out);
            }
        }
    }

    /// Strips a trailing `+ c` or `- c` so constant offsets can be merged.
    fn split_const(&self) -> (VarExpr, i64) {
        match self {
            VarExpr::Const(c) => (VarExpr::Const(0), *c),
            VarExpr::Add(l, r) => match r.as_const() {
                Some(c) => (*l.clone(), c),
                None => (self.clone(), 0)
            },
            VarExpr::Sub(l, r) => match r.as_const() {
                Some(c) => (*l.clone(), -c),
                None => (self.clone(), 0)
            },
            _ => (self.clone(), 0)
        }
    }

    fn add_const(self, c: i64) -> VarExpr {
        match (self, c) {
            (VarExpr::Const(a), c) => VarExpr::Const(a + c),
            (e, 0) => e,
            (e, c) if c > 0 => VarExpr::Add(Box::new(e), Box::new(VarExpr::Const(c))),
            (e, c) => VarExpr::Sub(Box::new(e), Box::new(VarExpr::Const(-c)))
        }
    }

    /// Folds constant arithmetic and merges constant offsets, so that
    /// e.g. `((h - 1) - (-1)) + 1` becomes `h + 1`. Not a full simplifier,
    /// just enough to keep inferred bounds readable and comparable.
    pub fn simplify(&self) -> VarExpr {
        match self {
            VarExpr::Var(_) | VarExpr::Const(_) | VarExpr::Param(_) => self.clone(),
            VarExpr::Add(l, r) => {
                let (le, lc) = l.simplify().split_const();
                let (re, rc) = r.simplify().split_const();
                let base = match (le, re) {
                    (VarExpr::Const(0), e) | (e, VarExpr::Const(0)) => e,
                    (a, b) => VarExpr::Add(Box::new(a), Box::new(b))
                };
                base.add_const(lc + rc)
            },
            VarExpr::Sub(l, r) => {
                let (le, lc) = l.simplify().split_const();
                let (re, rc) = r.simplify().split_const();
                let base = match (le, re) {
                    (e, VarExpr::Const(0)) => e,
                    (a, b) if a == b => VarExpr::Const(0),
                    (a, b) => VarExpr::Sub(Box::new(a), Box::new(b))
                };
                base.add_const(lc - rc)
            },
            VarExpr::Mul(l, r) => {
                let (l, r) = (l.simplify(), r.simplify());
                match (l.as_const(), r.as_const()) {
                    (Some(a), Some(b)) => VarExpr::Const(a * b),
                    (Some(0), _) | (_, Some(0)) => VarExpr::Const(0),
                    (Some(1), _) => r,
                    (_, Some(1)) => l,
                    _ => VarExpr::Mul(Box::new(l), Box::new(r))
                }
            },
            VarExpr::Div(l, r) => {
                let (l, r) = (l.simplify(), r.simplify());
                match (l.as_const(), r.as_const()) {
                    (Some(a), Some(b)) if b != 0 => VarExpr::Const(a.div_euclid(b)),
                    (_, Some(1)) => l,
                    _ => VarExpr::Div(Box::new(l), Box::new(r))
                }
            },
            VarExpr::Min(l, r) => {
                let (l, r) = (l.simplify(), r.simplify());
                if l == r {
                    return l;
                }
                let (le, lc) = l.split_const();
                let (re, rc) = r.split_const();
                if le == re {
                    le.add_const(lc.min(rc))
                } else {
                    VarExpr::Min(Box::new(l), Box::new(r))
                }
            },
            VarExpr::Max(l, r) => {
                let (l, r) = (l.simplify(), r.simplify());
                if l == r {
                    return l;
                }
                let (le, lc) = l.split_const();
                let (re, rc) = r.split_const();
                if le == re {
                    le.add_const(lc.max(rc))
                } else {
                    VarExpr::Max(Box::new(l), Box::new(r))
                }
            }
        }
    }
}

impl PrettyPrint for VarExpr {
    fn pretty_print(&self) -> String {
        match self {
            VarExpr::Var(v) => v.clone(),
            VarExpr::Const(c) => c.to_string(),
            VarExpr::Param(p) => p.clone(),
            VarExpr::Add(l, r) => combine_with_op("+", l, r),
            VarExpr::Sub(l, r) => combine_with_op("-", l, r),
            VarExpr::Mul(l, r) => combine_with_op("*", l, r),
            VarExpr::Div(l, r) => combine_with_op("/", l, r),
            VarExpr::Min(l, r) => format!("min({}, {})", l.pretty_print(), r.pretty_print()),
            VarExpr::Max(l, r) => format!("max({}, {})", l.pretty_print(), r.pretty_print())
        }
    }

    fn is_leaf(&self) -> bool {
        match self {
            VarExpr::Var(_) | VarExpr::Const(_) | VarExpr::Param(_)
            | VarExpr::Min(_, _) | VarExpr::Max(_, _) => true,
            _ => false
        }
    }
}

impl From<Var> for VarExpr {
    fn from(v: Var) -> VarExpr {
        VarExpr::Var(v.name)
    }
}

impl From<&Var> for VarExpr {
    fn from(v: &Var) -> VarExpr {
        VarExpr::Var(v.name.clone())
    }
}

impl From<i64> for VarExpr {
    fn from(c: i64) -> VarExpr {
        VarExpr::Const(c)
    }
}

impl From<&Param> for VarExpr {
    fn from(p: &Param) -> VarExpr {
        VarExpr::Param(p.name.clone())
    }
}

macro_rules! impl_var_expr_bin_op {
    ($trait_name:ident, $trait_op:ident, $ctor:expr) => {
        impl<R: Into<VarExpr>> $trait_name<R> for VarExpr {
            type Output = VarExpr;
            fn $trait_op(self, rhs: R) -> VarExpr {
                $ctor(Box::new(self), Box::new(rhs.into()))
            }
        }

        impl<R: Into<VarExpr>> $trait_name<R> for Var {
            type Output = VarExpr;
            fn $trait_op(self, rhs: R) -> VarExpr {
                $ctor(Box::new(self.into()), Box::new(rhs.into()))
            }
        }

        impl<R: Into<VarExpr>> $trait_name<R> for &Var {
            type Output = VarExpr;
            fn $trait_op(self, rhs: R) -> VarExpr {
                $ctor(Box::new(self.into()), Box::new(rhs.into()))
            }
        }

        impl $trait_name<VarExpr> for i64 {
            type Output = VarExpr;
            fn $trait_op(self, rhs: VarExpr) -> VarExpr {
                $ctor(Box::new(VarExpr::Const(self)), Box::new(rhs))
            }
        }

        impl $trait_name<Var> for i64 {
            type Output = VarExpr;
            fn $trait_op(self, rhs: Var) -> VarExpr {
                $ctor(Box::new(VarExpr::Const(self)), Box::new(rhs.into()))
            }
        }

        impl $trait_name<&Var> for i64 {
            type Output = VarExpr;
            fn $trait_op(self, rhs: &Var) -> VarExpr {
                $ctor(Box::new(VarExpr::Const(self)), Box::new(rhs.into()))
            }
        }
    };
}

impl_var_expr_bin_op!(Add, add, VarExpr::Add);
impl_var_expr_bin_op!(Sub, sub, VarExpr::Sub);
impl_var_expr_bin_op!(Mul, mul, VarExpr::Mul);

/// A runtime parameter of type i64, treated as a compile-time unknown.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Param {
    pub name: String
}

impl Param {
    pub fn new(name: &str) -> Param {
        Param { name: name.to_string() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Access {
    /// The stage from which we're reading.
    pub(crate) source: String,
    /// The coordinates to read from, one expression per dimension
    /// of the source, in terms of the calling function's variables.
    pub(crate) args: Vec<VarExpr>
}

impl Access {
    pub fn new(source: &str, args: Vec<VarExpr>) -> Access {
        let source = source.to_string();
        Access { source, args }
    }
}

impl PrettyPrint for Access {
    fn pretty_print(&self) -> String {
        let args: Vec<String> = self.args.iter().map(|a| a.pretty_print()).collect();
        format!("{}({})", self.source, args.join(", "))
    }

    fn is_leaf(&self) -> bool {
        true
    }
}

/// An expression defining the value to set a grid point to.
#[derive(Debug, Clone, PartialEq)]
pub enum Definition {
    Access(Access),
    // All intermediate calculations happen at type i64 for now
    Const(i64),
    Param(String),
    Add(Box<Definition>, Box<Definition>),
    Mul(Box<Definition>, Box<Definition>),
    Sub(Box<Definition>, Box<Definition>),
    Div(Box<Definition>, Box<Definition>)
}

impl Definition {
    pub(crate) fn sources(&self) -> Vec<String> {
        match self {
            Definition::Access(a) => vec![a.source.clone()],
            Definition::Const(_) => vec![],
            Definition::Param(_) => vec![],
            Definition::Add(l, r)
            | Definition::Mul(l, r)
            | Definition::Sub(l, r)
            | Definition::Div(l, r) => l.sources().into_iter().chain(r.sources()).collect()
        }
    }

    pub(crate) fn params(&self) -> Vec<String> {
        match self {
            Definition::Access(a) => {
                let mut params = vec![];
                for arg in &a.args {
                    collect_expr_params(arg, &mut params);
                }
                params
            },
            Definition::Const(_) => vec![],
            Definition::Param(p) => vec![p.clone()],
            Definition::Add(l, r)
            | Definition::Mul(l, r)
            | Definition::Sub(l, r)
            | Definition::Div(l, r) => l.params().into_iter().chain(r.params()).collect()
        }
    }

    pub(crate) fn accesses(&self) -> Vec<&Access> {
        match self {
            Definition::Access(a) => vec![a],
            Definition::Const(_) | Definition::Param(_) => vec![],
            Definition::Add(l, r)
            | Definition::Mul(l, r)
            | Definition::Sub(l, r)
            | Definition::Div(l, r) => l.accesses().into_iter().chain(r.accesses()).collect()
        }
    }

    /// Simultaneously replaces variables in every access coordinate.
    pub(crate) fn substitute(&self, env: &HashMap<String, VarExpr>) -> Definition {
        let rec = |d: &Definition| Box::new(d.substitute(env));
        match self {
            Definition::Access(a) => Definition::Access(Access {
                source: a.source.clone(),
                args: a.args.iter().map(|e| e.substitute(env)).collect()
            }),
            Definition::Const(_) | Definition::Param(_) => self.clone(),
            Definition::Add(l, r) => Definition::Add(rec(l), rec(r)),
            Definition::Mul(l, r) => Definition::Mul(rec(l), rec(r)),
            Definition::Sub(l, r) => Definition::Sub(rec(l), rec(r)),
            Definition::Div(l, r) => Definition::Div(rec(l), rec(r))
        }
    }

    pub(crate) fn collect_vars(&self, out: &mut Vec<String>) {
        match self {
            Definition::Access(a) => {
                for arg in &a.args {
                    arg.collect_vars(out);
                }
            },
            Definition::Const(_) | Definition::Param(_) => { },
            Definition::Add(l, r)
            | Definition::Mul(l, r)
            | Definition::Sub(l, r)
            | Definition::Div(l, r) => {
                l.collect_vars(out);
                r.collect_vars(out);
            }
        }
    }

    pub(crate) fn map_accesses<F>(&self, f: &F) -> Definition
    where
        F: Fn(&Access) -> Definition
    {
        let rec = |d: &Definition| Box::new(d.map_accesses(f));
        match self {
            Definition::Access(a) => f(a),
            Definition::Const(_) | Definition::Param(_) => self.clone(),
            Definition::Add(l, r) => Definition::Add(rec(l), rec(r)),
            Definition::Mul(l, r) => Definition::Mul(rec(l), rec(r)),
            Definition::Sub(l, r) => Definition::Sub(rec(l), rec(r)),
            Definition::Div(l, r) => Definition::Div(rec(l), rec(r))
        }
    }
}

fn collect_expr_params(e: &VarExpr, out: &mut Vec<String>) {
    match e {
        VarExpr::Param(p) => out.push(p.clone()),
        VarExpr::Var(_) | VarExpr::Const(_) => { },
        VarExpr::Add(l, r)
        | VarExpr::Sub(l, r)
        | VarExpr::Mul(l, r)
        | VarExpr::Div(l, r)
        | VarExpr::Min(l, r)
        | VarExpr::Max(l, r) => {
            collect_expr_params(l, out);
            collect_expr_params(r, out);
        }
    }
}

impl PrettyPrint for Definition {
    fn pretty_print(&self) -> String {
        match self {
            Definition::Access(a) => a.pretty_print(),
            Definition::Const(c) => c.to_string(),
            Definition::Param(p) => p.clone(),
            Definition::Add(l, r) => combine_with_op("+", l, r),
            Definition::Sub(l, r) => combine_with_op("-", l, r),
            Definition::Mul(l, r) => combine_with_op("*", l, r),
            Definition::Div(l, r) => combine_with_op("/", l, r)
        }
    }

    fn is_leaf(&self) -> bool {
        match self {
            Definition::Access(_) | Definition::Const(_) | Definition::Param(_) => true,
            _ => false
        }
    }
}

macro_rules! impl_definition_bin_op {
    ($trait_name:ident, $trait_op:ident, $ctor:expr) => {
        impl $trait_name<Self> for Definition {
            type Output = Definition;
            fn $trait_op(self, rhs: Self) -> Definition {
                $ctor(Box::new(self), Box::new(rhs))
            }
        }

        impl $trait_name<i64> for Definition {
            type Output = Definition;
            fn $trait_op(self, rhs: i64) -> Definition {
                $ctor(Box::new(self), Box::new(Definition::Const(rhs)))
            }
        }

        impl $trait_name<Definition> for i64 {
            type Output = Definition;
            fn $trait_op(self, rhs: Definition) -> Definition {
                $ctor(Box::new(Definition::Const(self)), Box::new(rhs))
            }
        }

        impl $trait_name<&Param> for Definition {
            type Output = Definition;
            fn $trait_op(self, rhs: &Param) -> Definition {
                $ctor(Box::new(self), Box::new(Definition::Param(rhs.name.clone())))
            }
        }

        impl $trait_name<Definition> for &Param {
            type Output = Definition;
            fn $trait_op(self, rhs: Definition) -> Definition {
                $ctor(Box::new(Definition::Param(self.name.clone())), Box::new(rhs))
            }
        }
    };
}

impl_definition_bin_op!(Add, add, Definition::Add);
impl_definition_bin_op!(Sub, sub, Definition::Sub);
impl_definition_bin_op!(Mul, mul, Definition::Mul);
impl_definition_bin_op!(Div, div, Definition::Div);

/// A buffer provided as an input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub name: String
}

impl Source {
    pub fn new(name: &str) -> Source {
        Source { name: name.to_string() }
    }

    pub fn at(&self, args: Vec<VarExpr>) -> Definition {
        Definition::Access(Access::new(&self.name, args))
    }
}

/// A mutating pass over a function's own storage, applied after its
/// pure definition. Used for reductions and boundary fix-ups.
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    /// The coordinates written to, in terms of the function's variables.
    pub(crate) indices: Vec<VarExpr>,
    pub(crate) value: Definition
}

impl Update {
    /// The variables of the owning function this update ranges over.
    pub(crate) fn free_vars(&self) -> Vec<String> {
        let mut vars = vec![];
        for index in &self.indices {
            index.collect_vars(&mut vars);
        }
        self.value.collect_vars(&mut vars);
        vars
    }
}

#[derive(Debug, Clone)]
pub struct Func {
    pub(crate) name: String,
    pub(crate) args: Vec<Var>,
    pub(crate) definition: Definition,
    pub(crate) updates: Vec<Update>
}

impl Func {
    pub fn new(name: &str, args: Vec<Var>, definition: Definition) -> Func {
        Func {
            name: name.to_string(),
            args,
            definition,
            updates: vec![]
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[Var] {
        &self.args
    }

    /// Returns the names of all the sources mentioned in this func's
    /// pure and update definitions.
    pub fn sources(&self) -> Vec<String> {
        let mut sources = self.definition.sources();
        for update in &self.updates {
            sources.extend(update.value.sources());
        }
        sources
    }

    /// Every read made by this func's pure and update definitions.
    pub(crate) fn accesses(&self) -> Vec<&Access> {
        let mut accesses = self.definition.accesses();
        for update in &self.updates {
            accesses.extend(update.value.accesses());
        }
        accesses
    }

    /// Returns the names of all the params mentioned in this func's
    /// definitions.
    pub fn params(&self) -> Vec<String> {
        let mut params = self.definition.params();
        for update in &self.updates {
            params.extend(update.value.params());
        }
        params
    }

    pub fn at(&self, args: Vec<VarExpr>) -> Definition {
        Definition::Access(Access::new(&self.name, args))
    }

    pub(crate) fn arg_names(&self) -> Vec<String> {
        self.args.iter().map(|a| a.name.clone()).collect()
    }

    pub(crate) fn arg_position(&self, name: &str) -> Option<usize> {
        self.args.iter().position(|a| a.name == name)
    }
}

impl PrettyPrint for Func {
    fn pretty_print(&self) -> String {
        let args: Vec<String> = self.args.iter().map(|a| a.name.clone()).collect();
        format!("{}({}) = {}", self.name, args.join(", "), self.definition.pretty_print())
    }

    fn is_leaf(&self) -> bool {
        true
    }
}

/// Shorthand for declaring loop variables.
///
/// ```var!(x, y);``` is equivalent to
/// ```let x = Var::new("x"); let y = Var::new("y");```
#[macro_export]
macro_rules! var {
    ($($name:ident),+) => {
        $(let $name = Var::new(stringify!($name));)+
    }
}

/// Shorthand for creating a new `Source`.
///
/// ```source!(input);``` is equivalent to
/// ```let input = Source::new("input");```
#[macro_export]
macro_rules! source {
    ($name:ident) => {
        let $name = Source::new(stringify!($name));
    }
}

/// Shorthand for creating a new `Func`.
///
/// ```func!(g(x, y) = f.at(...));``` is equivalent to
/// ```let g = Func::new("g", vec![x.clone(), y.clone()], f.at(...));```
#[macro_export]
macro_rules! func {
    ($name:ident($($arg:ident),+) = $($rest:tt)*) => {
        let $name = Func::new(
            stringify!($name),
            vec![$($arg.clone()),+],
            $($rest)*
        );
    }
}

/// Shorthand for creating a new `Param`.
#[macro_export]
macro_rules! param {
    ($name:ident) => {
        let $name = Param::new(stringify!($name));
    }
}

/// Shorthand for reading a `Func` or `Source` at a list of coordinate
/// expressions.
///
/// ```at!(blur; &x, &y - 1)``` is equivalent to
/// ```blur.at(vec![VarExpr::from(&x), &y - 1])```
#[macro_export]
macro_rules! at {
    ($f:expr; $($ix:expr),+) => {
        $f.at(vec![$($crate::ast::VarExpr::from($ix)),+])
    }
}
