//! Diagram output for execution graphs.
//!
//! Both renderers draw one cluster per thread in program order, plus the
//! cross-thread edges: spawn, reads-from, lock ordering, join, and the two
//! writes behind every conflict or race.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{Result, WeaveError};
use crate::graph::{EventId, EventKind, ExecutionGraph};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EdgeStyle {
    ProgramOrder,
    Spawn,
    ReadsFrom,
    Sync,
    Conflict,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Edge {
    pub from: EventId,
    pub to: EventId,
    pub style: EdgeStyle,
}

/// Every edge of the graph, program order first.
pub fn edges(graph: &ExecutionGraph) -> Vec<Edge> {
    let mut order = Vec::new();
    let mut cross = Vec::new();
    for (id, event) in graph.iter() {
        if let Some(prev) = event.prev {
            let style = if event.kind == EventKind::Start {
                EdgeStyle::Spawn
            } else {
                EdgeStyle::ProgramOrder
            };
            order.push(Edge { from: prev, to: id, style });
        }
        match &event.kind {
            EventKind::Read { source: Some(src), .. } => cross.push(Edge {
                from: *src,
                to: id,
                style: EdgeStyle::ReadsFrom,
            }),
            EventKind::Lock {
                ordered_after,
                conflict,
                ..
            } => {
                if let Some(release) = ordered_after {
                    cross.push(Edge {
                        from: *release,
                        to: id,
                        style: EdgeStyle::Sync,
                    });
                }
                if let Some(c) = conflict {
                    cross.push(Edge { from: id, to: c.sources.0, style: EdgeStyle::Conflict });
                    cross.push(Edge { from: id, to: c.sources.1, style: EdgeStyle::Conflict });
                }
            }
            EventKind::Join { from, conflict, .. } => {
                cross.push(Edge {
                    from: *from,
                    to: id,
                    style: EdgeStyle::Sync,
                });
                if let Some(c) = conflict {
                    cross.push(Edge { from: id, to: c.sources.0, style: EdgeStyle::Conflict });
                    cross.push(Edge { from: id, to: c.sources.1, style: EdgeStyle::Conflict });
                }
            }
            EventKind::Race { write, .. } => cross.push(Edge {
                from: id,
                to: *write,
                style: EdgeStyle::Conflict,
            }),
            _ => {}
        }
    }
    order.extend(cross);
    order
}

fn is_flagged(kind: &EventKind) -> bool {
    match kind {
        EventKind::Lock { conflict, .. } | EventKind::Join { conflict, .. } => conflict.is_some(),
        EventKind::Race { .. } => true,
        EventKind::Assert { passed, .. } => !passed,
        EventKind::End(status) => status.is_violation(),
        _ => false,
    }
}

pub trait GraphRenderer {
    fn render(&self, graph: &ExecutionGraph, out: &mut dyn Write) -> std::io::Result<()>;
}

/// Mermaid flowchart wrapped in a fenced code block.
#[derive(Clone, Copy, Debug, Default)]
pub struct MermaidRenderer;

fn mermaid_label(text: &str) -> String {
    text.replace('"', "#quot;")
}

impl GraphRenderer for MermaidRenderer {
    fn render(&self, graph: &ExecutionGraph, out: &mut dyn Write) -> std::io::Result<()> {
        writeln!(out, "```mermaid")?;
        writeln!(out, "flowchart TB")?;
        for (start, event) in graph.starts() {
            writeln!(out, "subgraph Thread {}", event.thread)?;
            writeln!(out, "\tdirection TB")?;
            for id in graph.thread_events(start) {
                if let Some(e) = graph.get(id) {
                    let label = mermaid_label(&e.kind.label());
                    if e.kind.is_pending() {
                        writeln!(out, "\te{}[/\"{}\"/]", id.0, label)?;
                    } else {
                        writeln!(out, "\te{}(\"{}\")", id.0, label)?;
                    }
                }
            }
            writeln!(out, "end")?;
        }
        for edge in edges(graph) {
            let arrow = match edge.style {
                EdgeStyle::ProgramOrder | EdgeStyle::Spawn | EdgeStyle::Sync => "-->",
                EdgeStyle::ReadsFrom => "-.->|rf|",
                EdgeStyle::Conflict => "-.->",
            };
            writeln!(out, "\te{} {} e{}", edge.from.0, arrow, edge.to.0)?;
        }
        for (id, event) in graph.iter() {
            if is_flagged(&event.kind) {
                writeln!(out, "\tstyle e{} fill:red", id.0)?;
            } else if event.kind.is_pending() {
                writeln!(out, "\tstyle e{} stroke-dasharray: 5 5", id.0)?;
            }
        }
        writeln!(out, "```")
    }
}

/// Graphviz digraph.
#[derive(Clone, Copy, Debug, Default)]
pub struct DotRenderer;

fn dot_label(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

impl GraphRenderer for DotRenderer {
    fn render(&self, graph: &ExecutionGraph, out: &mut dyn Write) -> std::io::Result<()> {
        writeln!(out, "digraph execution {{")?;
        writeln!(out, "  node [shape=box, style=rounded];")?;
        for (start, event) in graph.starts() {
            writeln!(out, "  subgraph cluster_{} {{", event.thread)?;
            writeln!(out, "    label=\"Thread {}\";", event.thread)?;
            for id in graph.thread_events(start) {
                if let Some(e) = graph.get(id) {
                    let mut attrs = format!("label=\"{}\"", dot_label(&e.kind.label()));
                    if is_flagged(&e.kind) {
                        attrs.push_str(", color=red, fontcolor=red");
                    } else if e.kind.is_pending() {
                        attrs.push_str(", style=dashed");
                    }
                    writeln!(out, "    e{} [{}];", id.0, attrs)?;
                }
            }
            writeln!(out, "  }}")?;
        }
        for edge in edges(graph) {
            let attrs = match edge.style {
                EdgeStyle::ProgramOrder => "",
                EdgeStyle::Spawn => " [style=bold]",
                EdgeStyle::Sync => " [color=blue]",
                EdgeStyle::ReadsFrom => " [style=dashed, label=\"rf\"]",
                EdgeStyle::Conflict => " [style=dashed, color=red]",
            };
            writeln!(out, "  e{} -> e{}{};", edge.from.0, edge.to.0, attrs)?;
        }
        writeln!(out, "}}")
    }
}

/// Picks a renderer from the output extension: `.dot` and `.gv` select
/// Graphviz, anything else Mermaid.
pub fn renderer_for(path: &Path) -> Box<dyn GraphRenderer> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("dot") | Some("gv") => Box::new(DotRenderer),
        _ => Box::new(MermaidRenderer),
    }
}

pub fn write_graph(graph: &ExecutionGraph, path: &Path) -> Result<()> {
    let file = File::create(path).map_err(|e| WeaveError::io(path, e))?;
    let mut out = BufWriter::new(file);
    renderer_for(path)
        .render(graph, &mut out)
        .and_then(|_| out.flush())
        .map_err(|e| WeaveError::io(path, e))
}

/// `dir/graph.md` with index 2 becomes `dir/graph_2.md`.
pub fn indexed_path(path: &Path, idx: usize) -> PathBuf {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("graph");
    let name = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{}_{}.{}", stem, idx, ext),
        None => format!("{}_{}", stem, idx),
    };
    path.with_file_name(name)
}
