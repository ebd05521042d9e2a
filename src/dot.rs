//! Readable renderings of compiled programs: Graphviz DOT of the active
//! nodes and a straight-line text form. Both work off the variant-agnostic
//! [`Program`], so every genome flavour renders the same way.

use crate::compile::{Program, Step};
use std::fmt::Write;

/// Render the active graph as Graphviz DOT. Inputs are boxes, constants
/// are plain nodes, calls are ellipses; output slots are marked with a
/// double border.
#[must_use]
pub fn program_dot(program: &Program) -> String {
    let mut out = String::from("digraph program {\n  rankdir=BT;\n");
    for (i, step) in program.steps().iter().enumerate() {
        let (label, shape) = match step {
            Step::Input(idx) => (format!("in{idx}"), "box"),
            Step::Const(v) => (format!("{v}"), "plaintext"),
            Step::Call { op, .. } => (op.name().to_string(), "ellipse"),
        };
        let peripheries = if program.outputs().contains(&i) { 2 } else { 1 };
        let _ = writeln!(
            out,
            "  v{i} [label=\"{label}\" shape={shape} peripheries={peripheries}];"
        );
        if let Step::Call { args, .. } = step {
            for &arg in args {
                let _ = writeln!(out, "  v{arg} -> v{i};");
            }
        }
    }
    out.push_str("}\n");
    out
}

/// Render the straight-line form, one assignment per active node.
#[must_use]
pub fn program_text(program: &Program) -> String {
    let mut out = String::new();
    for (i, step) in program.steps().iter().enumerate() {
        let rhs = match step {
            Step::Input(idx) => format!("input {idx}"),
            Step::Const(v) => format!("const {v}"),
            Step::Call { op, args } => {
                let args: Vec<String> = args.iter().map(|a| format!("v{a}")).collect();
                format!("{} {}", op.name(), args.join(" "))
            }
        };
        let _ = writeln!(out, "v{i} = {rhs}");
    }
    let outs: Vec<String> = program.outputs().iter().map(|o| format!("v{o}")).collect();
    let _ = writeln!(out, "out: {}", outs.join(" "));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::Program;
    use crate::ops::Op;
    use crate::value::Value;

    fn sample() -> Program {
        Program::new(
            vec![
                Step::Input(0),
                Step::Const(Value::Float(2.0)),
                Step::Call {
                    op: Op::Mul,
                    args: vec![0, 1],
                },
            ],
            vec![2],
            1,
            false,
        )
        .unwrap()
    }

    #[test]
    fn test_dot_contains_nodes_and_edges() {
        let dot = program_dot(&sample());
        assert!(dot.starts_with("digraph"));
        assert!(dot.contains("label=\"in0\""));
        assert!(dot.contains("label=\"mul\""));
        assert!(dot.contains("v0 -> v2;"));
        assert!(dot.contains("peripheries=2"));
    }

    #[test]
    fn test_text_form() {
        let text = program_text(&sample());
        assert_eq!(text, "v0 = input 0\nv1 = const 2\nv2 = mul v0 v1\nout: v2\n");
    }
}
