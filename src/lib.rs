//! A scheduling and lowering engine for image pipelines, in the style
//! of Halide. Algorithms are graphs of pure functions over symbolic
//! integer axes; a schedule decides how those functions become loops,
//! and lowering produces an explicit loop nest IR with allocations and
//! guards that a backend can consume.

#[macro_use]
pub mod ast;
pub mod pretty_print;
pub mod error;
pub mod interval;
pub mod graph;
pub mod schedule;
pub mod bounds;
pub mod ir;
pub mod lower;
pub mod buffer;
pub mod interp;
pub mod pipeline;

pub use crate::ast::*;
pub use crate::pretty_print::*;
pub use crate::error::{Error, Result};
pub use crate::interval::*;
pub use crate::graph::*;
pub use crate::schedule::*;
pub use crate::bounds::*;
pub use crate::ir::*;
pub use crate::lower::lower;
pub use crate::buffer::*;
pub use crate::interp::*;
pub use crate::pipeline::*;
