//! A `Pipeline` bundles a closed graph with its schedule and describes
//! the buffers and scalar parameters crossing its boundary, so a
//! backend can be handed one value instead of three.

use std::collections::HashMap;

use crate::bounds;
use crate::bounds::Region;
use crate::error::Result;
use crate::graph::Graph;
use crate::ir::{ElementType, Stmt};
use crate::lower;
use crate::schedule::Schedule;

/// Shape of one buffer crossing the pipeline boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferInfo {
    pub name: String,
    pub dimensions: usize,
    pub element_type: ElementType
}

/// Everything a caller needs to wire a pipeline up: its name, the
/// buffers it reads and writes, and the scalar parameters it expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub name: String,
    pub inputs: Vec<BufferInfo>,
    pub outputs: Vec<BufferInfo>,
    pub params: Vec<String>
}

pub struct Pipeline {
    graph: Graph,
    schedule: Schedule,
    input_types: HashMap<String, ElementType>,
    output_types: HashMap<String, ElementType>
}

impl Pipeline {
    /// Buffers default to `ElementType::I64`, matching the element
    /// type lowering assumes for intermediate storage.
    pub fn new(graph: Graph, schedule: Schedule) -> Pipeline {
        Pipeline {
            graph,
            schedule,
            input_types: HashMap::new(),
            output_types: HashMap::new()
        }
    }

    pub fn with_input_type(mut self, name: &str, element_type: ElementType) -> Pipeline {
        self.input_types.insert(name.to_string(), element_type);
        self
    }

    pub fn with_output_type(mut self, name: &str, element_type: ElementType) -> Pipeline {
        self.output_types.insert(name.to_string(), element_type);
        self
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn schedule_mut(&mut self) -> &mut Schedule {
        &mut self.schedule
    }

    pub fn metadata(&self) -> Metadata {
        let inputs = self
            .graph
            .inputs()
            .iter()
            .map(|name| BufferInfo {
                name: name.clone(),
                dimensions: self.graph.input_dimensions(name).unwrap_or(0),
                element_type: self.element_type(&self.input_types, name)
            })
            .collect();
        let outputs = self
            .graph
            .outputs()
            .iter()
            .map(|name| BufferInfo {
                name: name.clone(),
                dimensions: self.graph.expect_func(name).args.len(),
                element_type: self.element_type(&self.output_types, name)
            })
            .collect();
        Metadata {
            name: self.graph.name().to_string(),
            inputs,
            outputs,
            params: self.graph.params().to_vec()
        }
    }

    pub fn lower(&self, output_bounds: &HashMap<String, Region>) -> Result<Stmt> {
        lower::lower(&self.graph, &self.schedule, output_bounds)
    }

    /// The region of each graph input that must be populated before
    /// running the lowered pipeline over `output_bounds`.
    pub fn required_input_regions(
        &self,
        output_bounds: &HashMap<String, Region>
    ) -> Result<HashMap<String, Region>> {
        let bounds = bounds::infer(&self.graph, output_bounds)?;
        let mut required = HashMap::new();
        for name in self.graph.inputs() {
            if let Some(region) = bounds.region(name) {
                required.insert(name.clone(), region.clone());
            }
        }
        Ok(required)
    }

    fn element_type(&self, types: &HashMap<String, ElementType>, name: &str) -> ElementType {
        types.get(name).copied().unwrap_or(ElementType::I64)
    }
}
