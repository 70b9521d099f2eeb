//! Textual printing of the loop IR.
//!
//! Produces a compact human-readable form used by the CLI's `--emit=ir`
//! output and by logs; it is not meant to be parsed back.

use std::fmt::Write as _;

use crate::ir::{AccessMap, BodyOp, ElementType, FuncOp, ParallelBand};

/// A simple code formatter with indentation tracking.
#[derive(Debug)]
pub struct CodeFormatter {
    output: String,
    indent_level: usize,
    indent_str: String,
    at_line_start: bool,
}

impl CodeFormatter {
    /// Create a new formatter with the given indent string.
    pub fn new(indent_str: &str) -> Self {
        Self {
            output: String::new(),
            indent_level: 0,
            indent_str: indent_str.to_string(),
            at_line_start: true,
        }
    }

    /// Increase the indentation level.
    pub fn indent(&mut self) {
        self.indent_level += 1;
    }

    /// Decrease the indentation level.
    pub fn dedent(&mut self) {
        self.indent_level = self.indent_level.saturating_sub(1);
    }

    /// Write text at the current indentation.
    pub fn write(&mut self, s: &str) {
        if self.at_line_start && !s.is_empty() {
            for _ in 0..self.indent_level {
                self.output.push_str(&self.indent_str);
            }
            self.at_line_start = false;
        }
        self.output.push_str(s);
    }

    /// Write a full line and terminate it.
    pub fn writeln(&mut self, s: &str) {
        self.write(s);
        self.output.push('\n');
        self.at_line_start = true;
    }

    /// Consume the formatter and return the formatted text.
    pub fn finish(self) -> String {
        self.output
    }
}

/// Render a whole function.
pub fn print_func(func: &FuncOp) -> String {
    let mut fmt = CodeFormatter::new("  ");
    fmt.writeln(&format!("func @{} {{", func.name));
    fmt.indent();

    for buffer in &func.buffers {
        let dims: Vec<String> = buffer.dims.iter().map(|d| d.to_string()).collect();
        fmt.writeln(&format!(
            "buffer {} : {} x {}",
            buffer.name,
            dims.join("x"),
            element_name(buffer.element)
        ));
    }

    for band in &func.bands {
        print_band(func, band, &mut fmt);
    }

    fmt.dedent();
    fmt.writeln("}");
    fmt.finish()
}

fn print_band(func: &FuncOp, band: &ParallelBand, fmt: &mut CodeFormatter) {
    let names: Vec<&str> = band
        .ivs
        .iter()
        .map(|&iv| func.index_var(iv).name.as_str())
        .collect();
    let ranges: Vec<String> = band
        .ivs
        .iter()
        .map(|&iv| func.index_var(iv).range.to_string())
        .collect();
    let steps: Vec<String> = band
        .ivs
        .iter()
        .map(|&iv| func.index_var(iv).step.to_string())
        .collect();
    fmt.writeln(&format!(
        "band ({}) ranges = [{}] steps = [{}] {{",
        names.join(", "),
        ranges.join(", "),
        steps.join(", ")
    ));
    fmt.indent();

    for op in &band.body {
        fmt.writeln(&print_op(func, op));
    }

    fmt.dedent();
    fmt.writeln("}");
}

fn print_op(func: &FuncOp, op: &BodyOp) -> String {
    match op {
        BodyOp::Load {
            result,
            buffer,
            access,
        } => format!(
            "{} = load {}{}",
            result,
            func.buffer(*buffer).name,
            print_access(func, access)
        ),
        BodyOp::Binary {
            result,
            op,
            lhs,
            rhs,
        } => format!("{} = {} {}, {}", result, format!("{:?}", op).to_lowercase(), lhs, rhs),
        BodyOp::Reduce {
            agg,
            buffer,
            access,
            value,
        } => format!(
            "reduce {} {}{}, {}",
            format!("{:?}", agg).to_lowercase(),
            func.buffer(*buffer).name,
            print_access(func, access),
            value
        ),
        BodyOp::Gemm { c, a, b, tile } => {
            let mut s = String::new();
            let _ = write!(
                s,
                "gemm {} via {}, {} via {}, {} via {}, tile = {:?}",
                func.buffer(c.buffer).name,
                c.tile_map,
                func.buffer(a.buffer).name,
                a.tile_map,
                func.buffer(b.buffer).name,
                b.tile_map,
                tile
            );
            s
        }
        BodyOp::Yield => "yield".to_string(),
    }
}

fn print_access(func: &FuncOp, access: &AccessMap) -> String {
    let operands: Vec<&str> = access
        .operands
        .iter()
        .map(|&idx| func.index_var(idx).name.as_str())
        .collect();
    format!("[{}]({})", access.map, operands.join(", "))
}

fn element_name(e: ElementType) -> &'static str {
    match e {
        ElementType::Int => "int",
        ElementType::Float => "float",
        ElementType::Double => "double",
    }
}
