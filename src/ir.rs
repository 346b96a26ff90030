//! The loop nest intermediate representation produced by lowering.
//!
//! This tree is the compatibility contract with any backend: node kinds
//! and field sets here are what an external code generator consumes.
//! Loads appear as `Definition::Access` nodes inside stored values; the
//! indices of a load or store into an allocated buffer are relative to
//! the allocation's origin, while graph inputs and outputs are addressed
//! in absolute coordinates.

use std::fmt;

use crate::ast::{Definition, VarExpr};
use crate::pretty_print::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    U8,
    I32,
    I64,
    F32
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ElementType::U8 => "u8",
            ElementType::I32 => "i32",
            ElementType::I64 => "i64",
            ElementType::F32 => "f32"
        };
        write!(f, "{}", name)
    }
}

/// How a loop should be realised by the backend. The engine only marks
/// intent; it performs no vectorization or threading itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopKind {
    Serial,
    Vector,
    Parallel,
    Unrolled
}

impl fmt::Display for LoopKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            LoopKind::Serial => "serial",
            LoopKind::Vector => "vector",
            LoopKind::Parallel => "parallel",
            LoopKind::Unrolled => "unrolled"
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cond {
    /// `lhs <= rhs`
    Le(VarExpr, VarExpr)
}

impl PrettyPrint for Cond {
    fn pretty_print(&self) -> String {
        match self {
            Cond::Le(l, r) => format!("{} <= {}", l.pretty_print(), r.pretty_print())
        }
    }

    fn is_leaf(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Loop {
        var: String,
        min: VarExpr,
        extent: VarExpr,
        kind: LoopKind,
        body: Box<Stmt>
    },
    Allocate {
        name: String,
        element_type: ElementType,
        extents: Vec<VarExpr>,
        body: Box<Stmt>
    },
    Store {
        target: String,
        indices: Vec<VarExpr>,
        value: Definition
    },
    If {
        cond: Cond,
        then: Box<Stmt>,
        otherwise: Option<Box<Stmt>>
    },
    Block(Vec<Stmt>)
}

impl Stmt {
    /// Wraps a list of statements, collapsing a singleton list to avoid
    /// vacuous Block nodes.
    pub fn block(mut stmts: Vec<Stmt>) -> Stmt {
        if stmts.len() == 1 {
            stmts.remove(0)
        } else {
            Stmt::Block(stmts)
        }
    }

    pub fn guarded(cond: Cond, body: Stmt) -> Stmt {
        Stmt::If {
            cond,
            then: Box::new(body),
            otherwise: None
        }
    }

    /// Counts nodes matching a predicate; used by tests to assert on
    /// emitted shapes.
    pub fn count_nodes<F: Fn(&Stmt) -> bool>(&self, pred: &F) -> usize {
        let own = if pred(self) { 1 } else { 0 };
        own + match self {
            Stmt::Loop { body, .. } | Stmt::Allocate { body, .. } => body.count_nodes(pred),
            Stmt::If { then, otherwise, .. } => {
                then.count_nodes(pred)
                    + otherwise.as_ref().map_or(0, |e| e.count_nodes(pred))
            },
            Stmt::Block(children) => children.iter().map(|c| c.count_nodes(pred)).sum(),
            Stmt::Store { .. } => 0
        }
    }
}

impl PrettyPrint for Stmt {
    fn pretty_print(&self) -> String {
        match self {
            Stmt::Loop { var, min, extent, kind, body } => {
                let header = match kind {
                    LoopKind::Serial => "for".to_string(),
                    k => format!("for<{}>", k)
                };
                format!(
                    "{} {} in [{}, {} + {}) {{\n{}\n}}",
                    header,
                    var,
                    min.pretty_print(),
                    min.pretty_print(),
                    extent.pretty_print(),
                    indent_lines(&body.pretty_print(), 1)
                )
            },
            Stmt::Allocate { name, element_type, extents, body } => {
                let extents: Vec<String> = extents.iter().map(|e| e.pretty_print()).collect();
                format!(
                    "allocate {}[{}] {} {{\n{}\n}}",
                    name,
                    extents.join(" x "),
                    element_type,
                    indent_lines(&body.pretty_print(), 1)
                )
            },
            Stmt::Store { target, indices, value } => {
                let indices: Vec<String> = indices.iter().map(|i| i.pretty_print()).collect();
                format!("{}[{}] = {}", target, indices.join(", "), value.pretty_print())
            },
            Stmt::If { cond, then, otherwise } => {
                let mut s = format!(
                    "if {} {{\n{}\n}}",
                    cond.pretty_print(),
                    indent_lines(&then.pretty_print(), 1)
                );
                if let Some(otherwise) = otherwise {
                    s.push_str(&format!(
                        " else {{\n{}\n}}",
                        indent_lines(&otherwise.pretty_print(), 1)
                    ));
                }
                s
            },
            Stmt::Block(children) => {
                let children: Vec<String> = children.iter().map(|c| c.pretty_print()).collect();
                children.join("\n")
            }
        }
    }

    fn is_leaf(&self) -> bool {
        match self {
            Stmt::Store { .. } => true,
            _ => false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Access;

    #[test]
    fn test_pretty_print_loop_nest() {
        let store = Stmt::Store {
            target: "out".to_string(),
            indices: vec![VarExpr::var("out.x"), VarExpr::var("out.y")],
            value: Definition::Access(Access::new(
                "input",
                vec![VarExpr::var("out.x"), VarExpr::var("out.y")]
            ))
        };
        let nest = Stmt::Loop {
            var: "out.y".to_string(),
            min: VarExpr::Const(0),
            extent: VarExpr::param("h"),
            kind: LoopKind::Serial,
            body: Box::new(Stmt::Loop {
                var: "out.x".to_string(),
                min: VarExpr::Const(0),
                extent: VarExpr::param("w"),
                kind: LoopKind::Vector,
                body: Box::new(store)
            })
        };
        let expected = "\
for out.y in [0, 0 + h) {
  for<vector> out.x in [0, 0 + w) {
    out[out.x, out.y] = input(out.x, out.y)
  }
}";
        assert_eq!(nest.pretty_print(), expected);
    }

    #[test]
    fn test_block_collapses_singletons() {
        let s = Stmt::Store {
            target: "f".to_string(),
            indices: vec![VarExpr::Const(0)],
            value: Definition::Const(1)
        };
        assert_eq!(Stmt::block(vec![s.clone()]), s);
    }
}
