//! Line-oriented text dump of a graph, used in logs and test failure messages.

use std::fmt::{self, Write as _};

use super::argument::Argument;
use super::descriptor::{Dim, PartialTensor};
use super::graph::{Graph, NodeKind};

fn write_descriptor(out: &mut String, desc: &PartialTensor) {
    match desc.dtype {
        Some(dtype) => out.push_str(dtype.name()),
        None => out.push('?'),
    }
    match desc.shape.dims() {
        None => out.push_str("[*]"),
        Some(dims) => {
            out.push('[');
            for (i, dim) in dims.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                match dim {
                    Dim::Static(v) => {
                        let _ = write!(out, "{v}");
                    }
                    Dim::Symbolic(sym) => {
                        let _ = write!(out, "s{}", sym.0);
                    }
                    Dim::Unknown => out.push('?'),
                }
            }
            out.push(']');
        }
    }
}

fn write_argument(out: &mut String, arg: &Argument) {
    match arg {
        Argument::Int(v) => {
            let _ = write!(out, "{v}");
        }
        Argument::Float(v) => {
            let _ = write!(out, "{v:?}");
        }
        Argument::Bool(v) => {
            let _ = write!(out, "{v}");
        }
        Argument::Str(v) => {
            let _ = write!(out, "{v:?}");
        }
        Argument::Ints(v) => {
            let _ = write!(out, "{v:?}");
        }
        Argument::Floats(v) => {
            let _ = write!(out, "{v:?}");
        }
        Argument::Node(id) => {
            let _ = write!(out, "{id}");
        }
        Argument::Nodes(ids) => {
            out.push('(');
            for (i, id) in ids.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                let _ = write!(out, "{id}");
            }
            out.push(')');
        }
        Argument::List(items) => {
            out.push('{');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_argument(out, item);
            }
            out.push('}');
        }
        Argument::None => out.push_str("none"),
    }
}

impl Graph {
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for &id in self.order() {
            let node = self.node(id);
            match node.kind() {
                NodeKind::Input { name } => {
                    let _ = write!(out, "{id} = input {name:?} : ");
                    write_descriptor(&mut out, node.descriptor());
                }
                NodeKind::Constant { name } => {
                    let _ = write!(out, "{id} = constant {name:?} : ");
                    write_descriptor(&mut out, node.descriptor());
                }
                NodeKind::Operation { op, args } => {
                    let _ = write!(out, "{id} = {op}(");
                    for (i, arg) in args.iter().enumerate() {
                        if i > 0 {
                            out.push_str(", ");
                        }
                        write_argument(&mut out, arg);
                    }
                    out.push_str(") : ");
                    write_descriptor(&mut out, node.descriptor());
                }
                NodeKind::Output { results } => {
                    out.push_str("return");
                    for (i, (name, result)) in results.iter().enumerate() {
                        out.push_str(if i == 0 { " " } else { ", " });
                        let _ = write!(out, "{name}={result}");
                    }
                }
            }
            out.push('\n');
        }
        out
    }
}

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}
