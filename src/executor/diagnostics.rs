use std::collections::HashMap;
use std::fmt::{self, Write};
use std::sync::PoisonError;

use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;

use crate::blueprint::edge_label;
use crate::engine::Execution;
use crate::executor::Pipeline;

/// Execution times of the runners that ran during one cycle.
#[derive(Debug, Default)]
pub struct Diagnostics {
    /// Zero-based number of the cycle.
    pub cycle: u64,
    pub execution_times: HashMap<NodeIndex, Execution>,
}

impl Diagnostics {
    /// Total node time spent in the cycle.
    pub fn total(&self) -> std::time::Duration {
        self.execution_times.values().map(|exec| exec.duration).sum()
    }

    /// Renders the pipeline as a Mermaid graph, each runner coloured from
    /// green (fastest) to red (slowest). Runners that did not run in this
    /// cycle are light blue.
    pub fn render_mermaid(&self, pipeline: &Pipeline) -> String {
        let mut out = String::new();
        // writing into a String cannot fail
        let _ = self.write_mermaid(&mut out, pipeline);
        out
    }

    fn write_mermaid(&self, f: &mut impl Write, pipeline: &Pipeline) -> fmt::Result {
        writeln!(f, "graph LR")?;

        let times = &self.execution_times;
        let (mut min_time, mut max_time) = times
            .values()
            .map(|exec| exec.duration.as_secs_f64())
            .fold((f64::MAX, f64::MIN), |(lo, hi), secs| (lo.min(secs), hi.max(secs)));

        if min_time > max_time {
            min_time = 0.0;
            max_time = 0.0;
        }

        if (max_time - min_time).abs() < f64::EPSILON {
            max_time = min_time + 1.0;
        }

        let sinks: Vec<NodeIndex> = pipeline.sinks().iter().map(|handle| handle.index()).collect();

        for index in pipeline.graph.node_indices() {
            let name = pipeline.graph[index]
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .name()
                .replace('"', "\\\"");

            let (label, colour) = match times.get(&index) {
                Some(exec) => {
                    let t = (exec.duration.as_secs_f64() - min_time) / (max_time - min_time);
                    (format!("{:.2?}", exec.duration), heat(t))
                }
                None => ("Idle".to_string(), "#ADD8E6".to_string()),
            };

            writeln!(f, "    {}[\"{}\\n{}\"]", index.index(), name, label)?;
            writeln!(f, "    style {} fill:{}", index.index(), colour)?;

            if sinks.contains(&index) {
                writeln!(f, "    {} --> Sink", index.index())?;
            }
        }

        writeln!(f, "    Sink[Sink]")?;

        for edge in pipeline.graph.edge_references() {
            writeln!(
                f,
                "    {} -- \"{}\" --> {}",
                edge.source().index(),
                edge_label(edge.weight()),
                edge.target().index()
            )?;
        }

        Ok(())
    }
}

/// Maps `t` in `0.0..=1.0` onto green, yellow, red.
fn heat(t: f64) -> String {
    let t = t.clamp(0.0, 1.0);
    let (r, g) = if t < 0.5 {
        ((255.0 * t * 2.0) as u8, 255)
    } else {
        (255, (255.0 * (1.0 - (t - 0.5) * 2.0)) as u8)
    };

    format!("#{r:02X}{g:02X}00")
}
