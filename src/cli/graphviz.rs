use std::io::Write;

use anyhow::Result;
use bstr::ByteSlice;

use crate::graph::VariantGraph;

/// Long edge labels are elided to their flanks plus the byte count.
fn dot_label(label: &[u8]) -> String {
    if label.len() <= 20 {
        format!("{}", label.as_bstr())
    } else {
        format!(
            "{}\u{2026}{} ({})",
            label[..10].as_bstr(),
            label[label.len() - 10..].as_bstr(),
            label.len()
        )
    }
}

/// Render the graph as Graphviz DOT: one Mrecord node per graph node showing
/// `index | ref_pos | aligned_pos`, bold REF edges, labelled ALT edges.
pub fn write_graphviz<W: Write>(
    writer: &mut W,
    reference: &[u8],
    graph: &VariantGraph,
) -> Result<()> {
    writeln!(writer, "digraph variants {{")?;
    writeln!(writer, "\trankdir = LR;")?;
    writeln!(writer, "\trank = same;")?;

    for node in 0..graph.node_count() {
        writeln!(
            writer,
            "\t{node} [shape = Mrecord, label = \"{node} | {} | {}\"];",
            graph.ref_positions[node as usize], graph.aligned_positions[node as usize]
        )?;
    }
    writeln!(writer)?;

    for node in 0..graph.node_count().saturating_sub(1) {
        let lhs = graph.ref_positions[node as usize] as usize;
        let rhs = graph.ref_positions[node as usize + 1] as usize;
        writeln!(
            writer,
            "\t{node} -> {} [label = \"{}\", penwidth = 2.0];",
            node + 1,
            dot_label(&reference[lhs..rhs])
        )?;
    }
    writeln!(writer)?;

    for node in 0..graph.node_count() {
        for edge in graph.edges_out_of(node) {
            writeln!(
                writer,
                "\t{node} -> {} [label = \"{}\"];",
                graph.alt_edge_targets[edge as usize],
                dot_label(&graph.alt_edge_labels[edge as usize])
            )?;
        }
    }
    writeln!(writer, "}}")?;
    Ok(())
}
