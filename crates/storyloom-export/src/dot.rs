use storyloom_core::model::{Node, NodeStatus};
use storyloom_core::BranchGraph;

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

fn color(status: NodeStatus) -> &'static str {
    match status {
        NodeStatus::Audited => "palegreen",
        NodeStatus::Failed => "salmon",
        NodeStatus::Rejected => "orange",
        NodeStatus::InProgress | NodeStatus::Generated => "lightyellow",
        NodeStatus::Pending => "white",
    }
}

fn label(node: &Node) -> String {
    let summary = node
        .content
        .as_ref()
        .map(|c| c.summary.as_str())
        .unwrap_or(node.premise.as_str());
    let short: String = summary.chars().take(40).collect();
    let ellipsis = if summary.chars().count() > 40 { "..." } else { "" };
    format!("{}\\n{}{ellipsis}\\n[{}]", node.id, escape(&short), node.status)
}

/// Render the branch graph as DOT for Graphviz. Endings are double octagons,
/// merge points diamonds, and fill color follows the node status.
pub fn to_dot(graph: &BranchGraph) -> String {
    let mut dot = String::from("digraph story {\n  rankdir=LR;\n  node [style=filled];\n");

    for node in graph.nodes() {
        let shape = if graph.root() == Some(&node.id) {
            "doublecircle"
        } else if graph.outgoing(&node.id).is_empty() {
            "doubleoctagon"
        } else if graph.parents(&node.id).len() > 1 {
            "diamond"
        } else {
            "box"
        };
        dot.push_str(&format!(
            "  \"{}\" [label=\"{}\" shape={shape} fillcolor={}];\n",
            escape(node.id.as_str()),
            label(node),
            color(node.status)
        ));
    }

    for edge in graph.edges() {
        let mut label = escape(&edge.label);
        let mut style = "solid";
        if let Some(precondition) = &edge.precondition {
            label.push_str(&format!("\\n({})", escape(&precondition.to_string())));
            style = "dashed";
        }
        dot.push_str(&format!(
            "  \"{}\" -> \"{}\" [label=\"{label}\" style={style}];\n",
            escape(edge.source.as_str()),
            escape(edge.target.as_str())
        ));
    }

    dot.push_str("}\n");
    dot
}
