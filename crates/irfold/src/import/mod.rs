//! Builds a [`Graph`] from decoded operator records.
//!
//! Operators whose native layout is channel-last produce [`DeferredValue`]s that remember
//! the permutation between the node's layout and the model's, and downstream operators
//! that commute with transposition consume them as they are. A `Transpose` is only
//! emitted where an operator needs a specific layout.

mod error;
mod model;
mod ops;

use std::collections::{BTreeMap, HashMap};

use crate::ir::{ConstantTensor, Dim, DimSymbol, Graph, NodeId, PartialShape, PartialTensor};
use crate::layout::{get_canonical_value, DeferredValue, Permutation, MAX_RANK};

pub use error::{ImportError, ImportStage, ImportWarning, Severity};
pub use model::{DimSpec, ModelDescription, OperatorRecord, TensorInfo};

pub type ImportResult<T> = Result<T, ImportError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportOptions {
    /// Keep permuted values deferred across layout-agnostic operators. When disabled every
    /// channel-last result is transposed back immediately.
    pub defer_layouts: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self { defer_layouts: true }
    }
}

/// A freshly imported graph together with the non-fatal diagnostics raised on the way.
#[derive(Debug, Clone)]
pub struct ImportedModel {
    pub graph: Graph,
    pub warnings: Vec<ImportWarning>,
}

pub fn import_model(description: &ModelDescription) -> ImportResult<ImportedModel> {
    import_model_with(description, ImportOptions::default())
}

pub fn import_model_with(description: &ModelDescription, options: ImportOptions) -> ImportResult<ImportedModel> {
    let mut importer = Importer::new(description, options);
    importer.import_inputs()?;
    importer.finish_stage(ImportStage::Inputs)?;
    for record in &description.operators {
        importer.import_operator(record)?;
    }
    importer.finish_stage(ImportStage::Operators)?;
    importer.import_outputs()?;
    importer.finish_stage(ImportStage::Outputs)?;
    log::debug!(
        "imported {} operators into {} nodes",
        description.operators.len(),
        importer.graph.live_count()
    );
    Ok(ImportedModel {
        graph: importer.graph,
        warnings: importer.warnings,
    })
}

pub(crate) struct Importer<'m> {
    graph: Graph,
    tensors: HashMap<&'m str, &'m TensorInfo>,
    values: HashMap<String, DeferredValue>,
    symbols: BTreeMap<String, DimSymbol>,
    warnings: Vec<ImportWarning>,
    escalated: usize,
    options: ImportOptions,
    inputs: &'m [String],
    outputs: &'m [String],
}

impl<'m> Importer<'m> {
    fn new(description: &'m ModelDescription, options: ImportOptions) -> Self {
        Self {
            graph: Graph::new(),
            tensors: description.tensors.iter().map(|t| (t.name.as_str(), t)).collect(),
            values: HashMap::new(),
            symbols: BTreeMap::new(),
            warnings: Vec::new(),
            escalated: 0,
            options,
            inputs: &description.inputs,
            outputs: &description.outputs,
        }
    }

    pub(crate) fn warn(&mut self, op: &str, severity: Severity, message: impl Into<String>) {
        let warning = ImportWarning {
            op: op.to_string(),
            message: message.into(),
            severity,
        };
        match severity {
            Severity::Info => log::debug!("{warning}"),
            Severity::Warning | Severity::Error => log::warn!("{warning}"),
        }
        self.warnings.push(warning);
    }

    fn finish_stage(&mut self, stage: ImportStage) -> ImportResult<()> {
        let errors: Vec<ImportWarning> = self.warnings[self.escalated..]
            .iter()
            .filter(|w| w.severity == Severity::Error)
            .cloned()
            .collect();
        self.escalated = self.warnings.len();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ImportError::Warnings { stage, warnings: errors })
        }
    }

    fn tensor_info(&self, name: &str) -> ImportResult<&'m TensorInfo> {
        self.tensors
            .get(name)
            .copied()
            .ok_or_else(|| ImportError::UnknownTensor { name: name.to_string() })
    }

    fn dim(&mut self, spec: &DimSpec) -> Dim {
        match spec {
            DimSpec::Static(v) => Dim::Static(*v),
            DimSpec::Symbolic(name) => {
                let next = DimSymbol(self.symbols.len() as u32);
                Dim::Symbolic(*self.symbols.entry(name.clone()).or_insert(next))
            }
        }
    }

    fn import_inputs(&mut self) -> ImportResult<()> {
        for name in self.inputs {
            let info = self.tensor_info(name)?;
            if info.data.is_some() {
                self.warn(name, Severity::Warning, "graph input carries constant data; the data is ignored");
            }
            let rank = Self::checked_rank(name, info.shape.len())?;
            let dims: Vec<Dim> = info.shape.iter().map(|d| self.dim(d)).collect();
            let node = self
                .graph
                .add_input(name.clone(), PartialTensor::new(Some(info.dtype), PartialShape::from_dims(dims)));
            self.values
                .insert(name.clone(), DeferredValue::canonical(node, rank, false));
        }
        Ok(())
    }

    fn import_outputs(&mut self) -> ImportResult<()> {
        let mut results = Vec::with_capacity(self.outputs.len());
        for name in self.outputs {
            let value = self.lookup(name)?;
            if self.graph.is_input(value.node) {
                self.warn(name, Severity::Info, "output forwards a graph input unchanged");
            }
            let node = self.canonical(&value);
            results.push((name.clone(), node));
        }
        self.graph.set_outputs(results);
        Ok(())
    }

    /// Value bound to `name`, materializing embedded tensor data on first use.
    fn lookup(&mut self, name: &str) -> ImportResult<DeferredValue> {
        if let Some(value) = self.values.get(name) {
            return Ok(*value);
        }
        let info = self.tensor_info(name)?;
        let Some(data) = &info.data else {
            return Err(ImportError::UnknownTensor { name: name.to_string() });
        };
        let shape = info.static_shape().ok_or_else(|| ImportError::MalformedTensor {
            name: name.to_string(),
            reason: "constant data needs a static shape".to_string(),
        })?;
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(ImportError::MalformedTensor {
                name: name.to_string(),
                reason: format!("shape {shape:?} needs {expected} values, found {}", data.len()),
            });
        }
        let rank = Self::checked_rank(name, shape.len())?;
        let tensor = ConstantTensor::from_f64(info.dtype, shape, data);
        let node = self.graph.add_constant(name, tensor);
        let value = DeferredValue::canonical(node, rank, true);
        self.values.insert(name.to_string(), value);
        Ok(value)
    }

    /// Binds the value produced for `record`'s result at `index`.
    ///
    /// Without layout deferral the value is brought back to the model's layout here.
    fn define(&mut self, record: &OperatorRecord, index: usize, value: DeferredValue) -> ImportResult<()> {
        let name = record.outputs.get(index).ok_or_else(|| ImportError::UnsupportedParameter {
            opcode: record.opcode.clone(),
            param: "outputs".to_string(),
            reason: format!("expected at least {} results", index + 1),
        })?;
        let value = if self.options.defer_layouts || value.is_canonical() {
            value
        } else {
            let node = self.canonical(&value);
            self.canonical_value(node, false)
        };
        self.values.insert(name.clone(), value);
        Ok(())
    }

    fn checked_rank(name: &str, rank: usize) -> ImportResult<usize> {
        if rank > MAX_RANK {
            return Err(ImportError::MalformedTensor {
                name: name.to_string(),
                reason: format!("rank {rank} exceeds the supported maximum of {MAX_RANK}"),
            });
        }
        Ok(rank)
    }

    /// Wraps an already canonical node, using its inferred rank.
    fn canonical_value(&self, node: NodeId, is_constant: bool) -> DeferredValue {
        let rank = self
            .graph
            .descriptor(node)
            .rank()
            .filter(|r| *r <= MAX_RANK)
            .unwrap_or(0);
        DeferredValue::canonical(node, rank, is_constant)
    }

    fn canonical(&mut self, value: &DeferredValue) -> NodeId {
        let identity = Permutation::identity(value.rank());
        get_canonical_value(&mut self.graph, value, &identity)
    }
}
