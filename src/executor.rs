//! Pruning and parallel execution of the task graph.
//!
//! [`Plan::prune`] copies the tasks a target needs out of a [`Graph`] into a
//! petgraph DAG, with an edge from every dependency to its dependent.
//! [`Plan::execute`] then runs the DAG on the rayon thread pool, starting
//! each task as soon as everything it reads is available.

mod diagnostics;

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc::channel;
use std::time::{Duration, Instant};

use anyhow::{Context, anyhow};
use indicatif::ProgressStyle;
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::error::Error;
use crate::graph::Graph;
use crate::key::KeyLike;
use crate::task::{Dynamic, Input, Task};

pub use diagnostics::{Diagnostics, TaskExecution};

struct Node {
    key: KeyLike,
    task: Task,
    /// One entry per reference of `task`, in order.
    deps: Vec<NodeIndex>,
}

/// The part of a graph needed to compute one key.
pub struct Plan {
    graph: DiGraph<Node, ()>,
    target: NodeIndex,
}

impl Plan {
    /// Collects the task stored at `target` and, transitively, every task it
    /// references. References that resolve nowhere are reported together.
    pub fn prune(source: &Graph, target: &KeyLike) -> Result<Self, Error> {
        let (key, task) = source
            .lookup(target)
            .ok_or_else(|| Error::MissingKey(vec![target.clone()]))?;

        let mut graph = DiGraph::new();
        let mut indices = HashMap::new();
        let mut missing: Vec<KeyLike> = Vec::new();

        let root = graph.add_node(Node {
            key: key.clone(),
            task: task.clone(),
            deps: Vec::new(),
        });
        indices.insert(key.clone(), root);

        let mut stack = vec![root];

        while let Some(index) = stack.pop() {
            let refs: Vec<KeyLike> = graph[index].task.refs().into_iter().cloned().collect();
            let mut deps = Vec::with_capacity(refs.len());

            for reference in refs {
                let dep = match indices.get(&reference) {
                    Some(&dep) => dep,
                    None => {
                        let Some((key, task)) = source.lookup(&reference) else {
                            if !missing.contains(&reference) {
                                missing.push(reference);
                            }
                            continue;
                        };

                        let dep = graph.add_node(Node {
                            key: key.clone(),
                            task: task.clone(),
                            deps: Vec::new(),
                        });
                        indices.insert(key.clone(), dep);
                        stack.push(dep);
                        dep
                    }
                };

                graph.update_edge(dep, index, ());
                deps.push(dep);
            }

            graph[index].deps = deps;
        }

        if !missing.is_empty() {
            return Err(Error::MissingKey(missing));
        }

        Ok(Self {
            graph,
            target: root,
        })
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn target(&self) -> &KeyLike {
        &self.graph[self.target].key
    }

    pub fn keys(&self) -> impl Iterator<Item = &KeyLike> {
        self.graph.node_weights().map(|node| &node.key)
    }

    /// Every dependency edge, as (dependency, dependent).
    pub fn edges(&self) -> Vec<(KeyLike, KeyLike)> {
        self.graph
            .raw_edges()
            .iter()
            .map(|edge| {
                (
                    self.graph[edge.source()].key.clone(),
                    self.graph[edge.target()].key.clone(),
                )
            })
            .collect()
    }

    /// Runs every task of the plan and returns the value of the target.
    ///
    /// Tasks are spawned on the rayon pool once all their dependencies are
    /// done; this thread only schedules. The first failing task stops the
    /// scheduling of any task that has not started yet.
    pub fn execute(&self) -> anyhow::Result<(Dynamic, HashMap<KeyLike, TaskExecution>)> {
        // Cycles would leave tasks waiting forever.
        petgraph::algo::toposort(&self.graph, None).map_err(|cycle| {
            anyhow!(
                "cycle detected in task graph at {:?}",
                self.graph[cycle.node_id()].key
            )
        })?;

        let mut dependents: HashMap<NodeIndex, Vec<NodeIndex>> = HashMap::new();
        for edge in self.graph.raw_edges() {
            dependents
                .entry(edge.source())
                .or_default()
                .push(edge.target());
        }

        let mut dependency_counts: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|index| {
                (
                    index,
                    self.graph
                        .neighbors_directed(index, Direction::Incoming)
                        .count(),
                )
            })
            .collect();

        let total_tasks = self.graph.node_count() as u64;
        let mut completed_tasks = 0;

        let root_span = tracing::span!(Level::INFO, "computing", key = %self.target());
        root_span.pb_set_length(total_tasks);
        root_span.pb_set_style(
            &ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
                .progress_chars("=>-"),
        );
        root_span.pb_set_message(&format!("Computing {}", self.target()));
        let _enter = root_span.enter();

        let task_style = ProgressStyle::with_template("{spinner:.blue} {msg}")?;

        let mut results: HashMap<NodeIndex, Dynamic> = HashMap::new();
        let mut execution_times = HashMap::new();

        rayon::in_place_scope(|s| -> anyhow::Result<()> {
            let (result_sender, result_receiver) =
                channel::<(NodeIndex, anyhow::Result<Dynamic>, Instant, Duration)>();

            let spawn_task = |results: &HashMap<NodeIndex, Dynamic>, index: NodeIndex| {
                let node = &self.graph[index];
                let inputs: Option<Vec<Dynamic>> = node
                    .deps
                    .iter()
                    .map(|dep| results.get(dep).cloned())
                    .collect();

                let key = node.key.clone();
                let task = node.task.clone();
                let sender = result_sender.clone();
                let task_style = task_style.clone();

                s.spawn(move |_| {
                    let span = tracing::span!(Level::INFO, "task", key = %key);
                    span.pb_set_style(&task_style);
                    span.pb_set_message(&format!("Computing {key}"));
                    let _enter = span.enter();

                    let start_time = Instant::now();

                    // Operators are user code; a panic becomes this task's error.
                    let output = match inputs {
                        None => Err(anyhow!("dependencies of {key:?} are not available")),
                        Some(inputs) => {
                            match catch_unwind(AssertUnwindSafe(|| evaluate(&task, &inputs))) {
                                Ok(result) => result,
                                Err(panic) => Err(anyhow!(panic_message(panic.as_ref()))),
                            }
                        }
                    };

                    let elapsed = start_time.elapsed();

                    // The scheduler may already have stopped listening.
                    let _ = sender.send((index, output, start_time, elapsed));
                });
            };

            for index in self.graph.node_indices() {
                if dependency_counts.get(&index).copied().unwrap_or(0) == 0 {
                    spawn_task(&results, index);
                }
            }

            while completed_tasks < total_tasks {
                let (completed_index, output, start, duration) = result_receiver.recv()?;
                let key = &self.graph[completed_index].key;

                let output = output.with_context(|| format!("computing {key:?}"))?;
                results.insert(completed_index, output);
                execution_times.insert(key.clone(), TaskExecution { start, duration });
                completed_tasks += 1;
                root_span.pb_inc(1);

                if let Some(dependents_of_completed) = dependents.get(&completed_index) {
                    for &index in dependents_of_completed {
                        if let Some(count) = dependency_counts.get_mut(&index) {
                            *count -= 1;
                            if *count == 0 {
                                spawn_task(&results, index);
                            }
                        }
                    }
                }
            }

            Ok(())
        })?;

        let value = results
            .remove(&self.target)
            .ok_or_else(|| anyhow!("no result for {:?}", self.target()))?;

        Ok((value, execution_times))
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("Task panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("Task panicked: {s}")
    } else {
        String::from("Task panicked with unknown payload")
    }
}

fn resolve<'a>(
    inputs: &[Input],
    deps: &mut impl Iterator<Item = &'a Dynamic>,
) -> anyhow::Result<Vec<Dynamic>> {
    inputs
        .iter()
        .map(|input| match input {
            Input::Value(value) => Ok(value.clone()),
            Input::Ref(key) => deps
                .next()
                .cloned()
                .ok_or_else(|| anyhow!("unresolved reference {key:?}")),
        })
        .collect()
}

/// Computes one task from the values of its references, given in order.
fn evaluate(task: &Task, deps: &[Dynamic]) -> anyhow::Result<Dynamic> {
    let mut deps = deps.iter();

    match task {
        Task::Value(value) | Task::Quoted(value) => Ok(value.clone()),
        Task::Alias(key) => deps
            .next()
            .cloned()
            .ok_or_else(|| anyhow!("unresolved reference {key:?}")),
        Task::List(inputs) => Ok(crate::task::value(resolve(inputs, &mut deps)?)),
        Task::Call(call) => {
            let inputs = resolve(&call.inputs, &mut deps)?;
            call.op.call(&inputs, &call.kwargs)
        }
    }
}

/// Mermaid flowchart of the plan, target last.
impl Display for Plan {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "graph LR")?;

        for index in self.graph.node_indices() {
            let node = &self.graph[index];
            let name = node.key.to_string().replace('"', "\\\"");
            let label = match &node.task {
                Task::Call(call) => format!("{name}\\n{}", call.op.name()),
                _ => name,
            };
            writeln!(f, "    {:?}[\"{}\"]", index.index(), label)?;
        }

        writeln!(f, "    {:?} --> Output", self.target.index())?;
        writeln!(f, "    Output[Output]")?;

        for edge in self.graph.raw_edges() {
            writeln!(
                f,
                "    {:?} --> {:?}",
                edge.source().index(),
                edge.target().index()
            )?;
        }

        Ok(())
    }
}
