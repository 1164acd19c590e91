mod diagnostics;

use std::collections::HashMap;
use std::sync::{MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use console::style;
use indicatif::ProgressStyle;
use petgraph::Graph;
use petgraph::graph::NodeIndex;
use petgraph::unionfind::UnionFind;
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::blueprint::{Link, NodeHandle};
use crate::config::Config;
use crate::context::Context;
use crate::engine::{Runner, SharedRunner};
use crate::error::RunnerError;

pub use diagnostics::Diagnostics;

/// A built graph of runners, driven one cycle at a time.
///
/// Each cycle resets every runner and then processes the sinks (runners
/// nobody consumes from) in the order they were added to the blueprint. Sinks pull their upstream
/// dependencies through their connectors, so every runner reachable from a
/// sink runs exactly once per cycle.
///
/// Dropping the pipeline runs [`Node::cleanup`](crate::Node::cleanup) on
/// every node.
pub struct Pipeline {
    ctx: Context,
    pub(crate) graph: Graph<SharedRunner, Link>,
    order: Vec<NodeIndex>,
    /// Sinks grouped by weakly connected component, in insertion order.
    components: Vec<Vec<NodeIndex>>,
    timeout: Option<Duration>,
    parallel: bool,
    progress: bool,
    cycles: u64,
}

impl Pipeline {
    pub(crate) fn new(ctx: Context, graph: Graph<SharedRunner, Link>, order: Vec<NodeIndex>) -> Self {
        let mut sets = UnionFind::new(graph.node_count());
        for edge in graph.raw_edges() {
            sets.union(edge.source().index(), edge.target().index());
        }

        let mut roots: HashMap<usize, usize> = HashMap::new();
        let mut components: Vec<Vec<NodeIndex>> = Vec::new();

        // sinks never depend on each other, drive them in insertion order
        for index in graph.node_indices() {
            let is_sink = graph
                .neighbors_directed(index, petgraph::Direction::Outgoing)
                .next()
                .is_none();

            if is_sink {
                let root = sets.find(index.index());
                let slot = *roots.entry(root).or_insert_with(|| {
                    components.push(Vec::new());
                    components.len() - 1
                });
                components[slot].push(index);
            }
        }

        Self {
            ctx,
            graph,
            order,
            components,
            timeout: None,
            parallel: false,
            progress: false,
            cycles: 0,
        }
    }

    /// Applies the driver settings of `config`. The trigger depth bound is
    /// part of the [`Context`] the runners were built with.
    pub fn with_config(mut self, config: &Config) -> Self {
        self.timeout = config.cycle_timeout();
        self.parallel = config.parallel;
        self.progress = config.progress;
        self
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Number of cycles completed without error.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn runner(&self, handle: NodeHandle) -> Option<&SharedRunner> {
        self.graph.node_weight(handle.index)
    }

    /// All runners, upstream first.
    pub fn runners(&self) -> impl Iterator<Item = &SharedRunner> {
        self.order.iter().map(|&index| &self.graph[index])
    }

    pub fn sinks(&self) -> Vec<NodeHandle> {
        self.components
            .iter()
            .flatten()
            .map(|&index| NodeHandle { index })
            .collect()
    }

    /// Resets every runner, so the next pass pulls fresh data everywhere.
    pub fn reset(&self) {
        for runner in self.runners() {
            runner
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .reset();
        }
    }

    /// Runs a single cycle over the whole graph.
    pub fn run_cycle(&mut self) -> Result<Diagnostics, RunnerError> {
        self.reset();

        let outer = self.ctx.deadline();
        if let Some(timeout) = self.timeout {
            let deadline = Instant::now() + timeout;
            self.ctx
                .set_deadline(Some(outer.map_or(deadline, |outer| outer.min(deadline))));
        }

        let since = Instant::now();
        let result = match self.parallel {
            true => self.drive_parallel(),
            false => self.drive(),
        };

        if self.timeout.is_some() {
            self.ctx.set_deadline(outer);
        }

        if let Err(e) = &result {
            tracing::warn!(cycle = self.cycles, runner = e.runner(), "cycle failed: {}", e);
        }

        result?;
        let diagnostics = self.collect(since);
        self.cycles += 1;
        Ok(diagnostics)
    }

    /// Runs `count` cycles, stopping at the first failure. Returns the
    /// diagnostics of the last cycle.
    pub fn run_cycles(&mut self, count: u64) -> Result<Diagnostics, RunnerError> {
        let span = tracing::span!(Level::INFO, "cycles");

        if self.progress {
            span.pb_set_length(count);
            span.pb_set_style(
                &ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("=>-"),
            );
            span.pb_set_message("Running cycles...");
        }

        let _enter = span.enter();
        let start = Instant::now();
        let mut diagnostics = Diagnostics::default();

        for _ in 0..count {
            diagnostics = self.run_cycle()?;
            span.pb_inc(1);
        }

        tracing::info!(
            "{} {} cycles in {:.2?}",
            style("Completed").green(),
            count,
            start.elapsed()
        );

        Ok(diagnostics)
    }

    fn drive(&self) -> Result<(), RunnerError> {
        for &sink in self.components.iter().flatten() {
            lock(&self.graph[sink])?.process()?;
        }

        Ok(())
    }

    /// Components share no runner, so each one is driven on its own rayon
    /// task without contending for locks.
    fn drive_parallel(&self) -> Result<(), RunnerError> {
        self.components.par_iter().try_for_each(|sinks| {
            for &sink in sinks {
                lock(&self.graph[sink])?.process()?;
            }

            Ok(())
        })
    }

    fn collect(&self, since: Instant) -> Diagnostics {
        let mut execution_times = HashMap::new();

        for index in self.graph.node_indices() {
            let runner = self.graph[index]
                .lock()
                .unwrap_or_else(PoisonError::into_inner);

            if let Some(execution) = runner.last_execution()
                && execution.start >= since
            {
                execution_times.insert(index, execution);
            }
        }

        Diagnostics {
            cycle: self.cycles,
            execution_times,
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("runners", &self.graph.node_count())
            .field("sinks", &self.components)
            .field("parallel", &self.parallel)
            .field("cycles", &self.cycles)
            .finish()
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        for &index in &self.order {
            self.graph[index]
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .cleanup();
        }
    }
}

fn lock(runner: &SharedRunner) -> Result<MutexGuard<'_, Runner>, RunnerError> {
    runner.lock().map_err(|poison| RunnerError::Poisoned {
        runner: poison.into_inner().name().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::blueprint::Blueprint;
    use crate::engine::{PortSpec, Ports, SequentialIds};
    use crate::node::{Node, NodeInfo};
    use crate::testing::{Add, Cancelling, Constant, Failing, Journal, entries, journal};

    /// Splits its input into two outputs.
    struct Split {
        journal: Journal,
    }

    impl Node for Split {
        fn info(&self) -> NodeInfo {
            NodeInfo::new("split", "", "1.0")
        }

        fn ports(&self) -> Vec<PortSpec> {
            vec![
                PortSpec::input::<i64>("in"),
                PortSpec::output::<i64>("lo"),
                PortSpec::output::<i64>("hi"),
            ]
        }

        fn process(&mut self, _: &Context, ports: &mut Ports) -> anyhow::Result<()> {
            self.journal.lock().unwrap().push("split".into());
            let value = *ports.input::<i64>("in")?;
            ports.set("lo", value)?;
            ports.set("hi", value * 10)?;
            Ok(())
        }
    }

    /// Fails only on its first run.
    struct Flaky {
        failed: Arc<Mutex<bool>>,
    }

    impl Node for Flaky {
        fn info(&self) -> NodeInfo {
            NodeInfo::new("flaky", "", "1.0")
        }

        fn ports(&self) -> Vec<PortSpec> {
            vec![PortSpec::output::<i64>("out")]
        }

        fn process(&mut self, _: &Context, ports: &mut Ports) -> anyhow::Result<()> {
            let mut failed = self.failed.lock().unwrap();
            if !*failed {
                *failed = true;
                anyhow::bail!("first run");
            }
            ports.set("out", 1_i64)?;
            Ok(())
        }
    }

    fn output(pipeline: &Pipeline, handle: NodeHandle) -> i64 {
        let runner = pipeline.runner(handle).unwrap().lock().unwrap();
        let value = runner.output("out").unwrap().get().unwrap();
        *value.downcast_ref::<i64>().unwrap()
    }

    fn chain(log: &Journal) -> (Pipeline, NodeHandle) {
        let mut blueprint = Blueprint::new();
        let a = blueprint.add_node(Constant::new("a", 2, log));
        let b = blueprint.add_node(Add::new("b", &["x"], log));
        let c = blueprint.add_node(Add::new("c", &["x"], log));
        blueprint.connect(a, "out", b, "x").unwrap();
        blueprint.connect(b, "out", c, "x").unwrap();

        let pipeline = blueprint.build(&Context::new(), &SequentialIds::new()).unwrap();
        (pipeline, c)
    }

    #[test]
    fn test_cycles_pull_chain_once_each() {
        let log = journal();
        let (mut pipeline, c) = chain(&log);

        assert_eq!(pipeline.sinks(), vec![c]);

        pipeline.run_cycle().unwrap();
        pipeline.run_cycle().unwrap();

        assert_eq!(entries(&log), ["a", "b", "c", "a", "b", "c"]);
        assert_eq!(output(&pipeline, c), 2);
        assert_eq!(pipeline.cycles(), 2);
    }

    #[test]
    fn test_multi_output_upstream_runs_once() {
        let log = journal();
        let mut blueprint = Blueprint::new();
        let source = blueprint.add_node(Constant::new("source", 3, &log));
        let split = blueprint.add_node(Split {
            journal: log.clone(),
        });
        let sum = blueprint.add_node(Add::new("sum", &["lo", "hi"], &log));
        blueprint.connect(source, "out", split, "in").unwrap();
        blueprint.connect(split, "lo", sum, "lo").unwrap();
        blueprint.connect(split, "hi", sum, "hi").unwrap();

        let mut pipeline = blueprint.build(&Context::new(), &SequentialIds::new()).unwrap();
        pipeline.run_cycle().unwrap();

        assert_eq!(entries(&log), ["source", "split", "sum"]);
        assert_eq!(output(&pipeline, sum), 33);
    }

    #[test]
    fn test_several_sinks_share_upstream() {
        let log = journal();
        let mut blueprint = Blueprint::new();
        let a = blueprint.add_node(Constant::new("a", 1, &log));
        let left = blueprint.add_node(Add::new("left", &["x"], &log));
        let right = blueprint.add_node(Add::new("right", &["x"], &log));
        blueprint.connect(a, "out", left, "x").unwrap();
        blueprint.connect(a, "out", right, "x").unwrap();

        let mut pipeline = blueprint.build(&Context::new(), &SequentialIds::new()).unwrap();
        pipeline.run_cycle().unwrap();

        assert_eq!(pipeline.sinks(), vec![left, right]);
        assert_eq!(entries(&log), ["a", "left", "right"]);
    }

    #[test]
    fn test_failure_stops_cycle_and_recovers() {
        let log = journal();
        let mut blueprint = Blueprint::new();
        let flaky = blueprint.add_node(Flaky {
            failed: Arc::default(),
        });
        let sink = blueprint.add_node(Add::new("sink", &["x"], &log));
        blueprint.connect(flaky, "out", sink, "x").unwrap();

        let mut pipeline = blueprint.build(&Context::new(), &SequentialIds::new()).unwrap();

        let err = pipeline.run_cycle().unwrap_err();
        assert!(err.runner().starts_with("flaky_1.0_"));
        assert!(entries(&log).is_empty());
        assert_eq!(pipeline.cycles(), 0);

        pipeline.run_cycle().unwrap();
        assert_eq!(entries(&log), ["sink"]);
        assert_eq!(output(&pipeline, sink), 1);
    }

    #[test]
    fn test_run_cycles_stops_on_error() {
        let log = journal();
        let mut blueprint = Blueprint::new();
        let broken = blueprint.add_node(Failing::new("broken"));
        let sink = blueprint.add_node(Add::new("sink", &["x"], &log));
        blueprint.connect(broken, "out", sink, "x").unwrap();

        let mut pipeline = blueprint.build(&Context::new(), &SequentialIds::new()).unwrap();
        let err = pipeline.run_cycles(5).unwrap_err();

        assert!(matches!(err, RunnerError::Node { .. }));
        assert_eq!(pipeline.cycles(), 0);
    }

    #[test]
    fn test_cancellation_stops_run() {
        let log = journal();
        let mut blueprint = Blueprint::new();
        let stop = blueprint.add_node(Cancelling);
        let sink = blueprint.add_node(Add::new("sink", &["x"], &log));
        blueprint.connect(stop, "out", sink, "x").unwrap();

        let ctx = Context::new();
        let mut pipeline = blueprint.build(&ctx, &SequentialIds::new()).unwrap();
        let err = pipeline.run_cycles(3).unwrap_err();

        assert!(err.is_interrupt());
        assert!(ctx.is_cancelled());
        assert!(entries(&log).is_empty());
    }

    #[test]
    fn test_cycle_timeout() {
        let log = journal();
        let (pipeline, _) = chain(&log);
        let config = Config {
            cycle_timeout_ms: Some(0),
            ..Config::default()
        };
        let mut pipeline = pipeline.with_config(&config);

        let err = pipeline.run_cycle().unwrap_err();
        assert!(matches!(err, RunnerError::DeadlineExceeded { .. }));
        assert!(pipeline.context().deadline().is_none());
    }

    #[test]
    fn test_cycle_timeout_keeps_outer_deadline() {
        let log = journal();
        let mut blueprint = Blueprint::new();
        let a = blueprint.add_node(Constant::new("a", 1, &log));
        let b = blueprint.add_node(Add::new("b", &["x"], &log));
        blueprint.connect(a, "out", b, "x").unwrap();

        let ctx = Context::new().with_timeout(Duration::from_secs(3600));
        let outer = ctx.deadline();
        let config = Config {
            cycle_timeout_ms: Some(500),
            ..Config::default()
        };
        let mut pipeline = blueprint
            .build(&ctx, &SequentialIds::new())
            .unwrap()
            .with_config(&config);

        pipeline.run_cycle().unwrap();
        pipeline.run_cycle().unwrap();
        assert_eq!(ctx.deadline(), outer);
    }

    #[test]
    fn test_outer_deadline_wins_when_earlier() {
        let log = journal();
        let (pipeline, _) = chain(&log);
        let config = Config {
            cycle_timeout_ms: Some(60_000),
            ..Config::default()
        };
        let mut pipeline = pipeline.with_config(&config);
        let outer = Instant::now();
        pipeline.context().set_deadline(Some(outer));

        let err = pipeline.run_cycle().unwrap_err();
        assert!(matches!(err, RunnerError::DeadlineExceeded { .. }));
        assert_eq!(pipeline.context().deadline(), Some(outer));
    }

    #[test]
    fn test_sinks_follow_insertion_order() {
        let log = journal();
        let mut blueprint = Blueprint::new();
        let first = blueprint.add_node(Add::new("first", &["x"], &log));
        let a = blueprint.add_node(Constant::new("a", 1, &log));
        let second = blueprint.add_node(Add::new("second", &["x"], &log));
        blueprint.connect(a, "out", second, "x").unwrap();
        blueprint.connect(a, "out", first, "x").unwrap();

        let mut pipeline = blueprint.build(&Context::new(), &SequentialIds::new()).unwrap();
        pipeline.run_cycle().unwrap();

        assert_eq!(pipeline.sinks(), vec![first, second]);
        assert_eq!(entries(&log), ["a", "first", "second"]);
    }

    #[test]
    fn test_parallel_components() {
        let log = journal();
        let mut blueprint = Blueprint::new();
        let mut sinks = Vec::new();

        for (source, sink) in [("a", "a2"), ("b", "b2"), ("c", "c2")] {
            let source = blueprint.add_node(Constant::new(source, 1, &log));
            let sink = blueprint.add_node(Add::new(sink, &["x"], &log));
            blueprint.connect(source, "out", sink, "x").unwrap();
            sinks.push(sink);
        }

        let config = Config {
            parallel: true,
            ..Config::default()
        };
        let mut pipeline = blueprint
            .build(&Context::new(), &SequentialIds::new())
            .unwrap()
            .with_config(&config);

        pipeline.run_cycles(2).unwrap();

        let entries = entries(&log);
        assert_eq!(entries.len(), 12);
        for (source, sink) in [("a", "a2"), ("b", "b2"), ("c", "c2")] {
            let runs: Vec<&str> = entries
                .iter()
                .map(String::as_str)
                .filter(|entry| entry.starts_with(source))
                .collect();
            assert_eq!(runs, [source, sink, source, sink]);
        }
        for sink in sinks {
            assert_eq!(output(&pipeline, sink), 1);
        }
    }

    #[test]
    fn test_diagnostics_cover_cycle() {
        let log = journal();
        let (mut pipeline, _) = chain(&log);

        let diagnostics = pipeline.run_cycle().unwrap();
        assert_eq!(diagnostics.cycle, 0);
        assert_eq!(diagnostics.execution_times.len(), 3);

        let diagram = diagnostics.render_mermaid(&pipeline);
        assert!(diagram.starts_with("graph LR\n"));
        assert!(diagram.contains("a_1.0_"));
        assert!(diagram.contains("-- \"out → x: i64\" -->"));
    }

    #[test]
    fn test_drop_cleans_up_every_node() {
        let log = journal();
        let (mut pipeline, _) = chain(&log);
        pipeline.run_cycle().unwrap();
        drop(pipeline);

        assert_eq!(entries(&log), ["a", "b", "c", "cleanup a"]);
    }
}
