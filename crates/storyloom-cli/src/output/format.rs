use storyloom_core::BranchGraph;
use storyloom_pipeline::RunReport;

use super::OutputFormat;

pub fn format_run_report(report: &RunReport, fmt: OutputFormat) -> String {
    match fmt {
        OutputFormat::Json => serde_json::to_string_pretty(report).unwrap_or_default(),
        OutputFormat::Text => format_run_report_text(report),
    }
}

fn format_run_report_text(report: &RunReport) -> String {
    let p = &report.progress;
    let mut out = String::new();
    if report.recovered > 0 {
        out.push_str(&format!(
            "Recovered {} scene(s) from an interrupted run\n",
            report.recovered
        ));
    }
    out.push_str(&format!(
        "Generated {} level(s): {} attempt(s), {} accepted, {} rejected\n",
        report.levels, report.attempts, report.accepted, report.rejected
    ));
    out.push_str(&format!(
        "Scenes: {}/{} audited, {} failed\n",
        p.audited, p.total, p.failed
    ));
    for failure in &report.failures {
        out.push_str(&format!(
            "\u{2717} {} failed after {} attempt(s)\n  premise: {}\n",
            failure.node, failure.attempts, failure.premise
        ));
        for rejection in &failure.trail {
            out.push_str(&format!(
                "  attempt {} [{}]: {}\n",
                rejection.attempt, rejection.kind, rejection.reason
            ));
        }
    }
    if !report.blocked.is_empty() {
        let ids: Vec<&str> = report.blocked.iter().map(|n| n.as_str()).collect();
        out.push_str(&format!("Blocked behind failures: {}\n", ids.join(", ")));
    }
    if report.cancelled {
        out.push_str("Cancelled. Run `storyloom create` again to resume.\n");
    }
    out
}

pub fn format_graph(graph: &BranchGraph, fmt: OutputFormat) -> String {
    match fmt {
        OutputFormat::Json => serde_json::to_string_pretty(graph).unwrap_or_default(),
        OutputFormat::Text => format_graph_text(graph),
    }
}

fn format_graph_text(graph: &BranchGraph) -> String {
    let mut out = format!(
        "Story graph: {} scenes, {} choices\n\n",
        graph.len(),
        graph.edge_count()
    );
    for node in graph.nodes() {
        let summary = node
            .content
            .as_ref()
            .map(|c| c.summary.as_str())
            .unwrap_or(node.premise.as_str());
        out.push_str(&format!("  [{}] {} - {summary}\n", node.status, node.id));
    }
    if graph.edge_count() > 0 {
        out.push('\n');
        for edge in graph.edges() {
            let gate = edge
                .precondition
                .as_ref()
                .map(|p| format!(" if {p}"))
                .unwrap_or_default();
            out.push_str(&format!(
                "  {} --[{} {}{gate}]--> {}\n",
                edge.source, edge.id, edge.label, edge.target
            ));
        }
    }
    out.push_str("\nUse --dot to output Graphviz format\n");
    out
}
