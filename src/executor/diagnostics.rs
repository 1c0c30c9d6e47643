use std::collections::{BTreeSet, HashMap};
use std::fmt::{Display, Formatter};
use std::time::{Duration, Instant};

use crate::key::KeyLike;

#[derive(Debug, Clone, Copy)]
pub struct TaskExecution {
    pub start: Instant,
    pub duration: Duration,
}

/// What one call to [`Computer::get_with_diagnostics`](crate::Computer::get_with_diagnostics)
/// did.
#[derive(Debug, Default, Clone)]
pub struct Diagnostics {
    /// Tasks in the graph.
    pub before: usize,
    /// Tasks left after pruning, all of which were executed.
    pub after: usize,
    pub execution_times: HashMap<KeyLike, TaskExecution>,
    /// (dependency, dependent) pairs of the executed plan.
    pub edges: Vec<(KeyLike, KeyLike)>,
}

impl Diagnostics {
    /// Time from the start of the first task to the end of the last.
    pub fn wall_time(&self) -> Duration {
        let start = self.execution_times.values().map(|t| t.start).min();
        let end = self
            .execution_times
            .values()
            .map(|t| t.start + t.duration)
            .max();

        match (start, end) {
            (Some(start), Some(end)) => end.duration_since(start),
            _ => Duration::ZERO,
        }
    }

    /// Mermaid flowchart of the executed tasks, coloured from green (fastest)
    /// to red (slowest).
    pub fn render_mermaid(&self) -> String {
        self.to_string()
    }
}

impl Display for Diagnostics {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "graph LR")?;

        let keys: BTreeSet<&KeyLike> = self
            .execution_times
            .keys()
            .chain(self.edges.iter().flat_map(|(a, b)| [a, b]))
            .collect();
        let ids: HashMap<&KeyLike, usize> = keys.iter().enumerate().map(|(i, k)| (*k, i)).collect();

        let times = &self.execution_times;
        let mut min_time = f64::MAX;
        let mut max_time = f64::MIN;

        for t in times.values() {
            let secs = t.duration.as_secs_f64();
            min_time = min_time.min(secs);
            max_time = max_time.max(secs);
        }

        if min_time > max_time {
            min_time = 0.0;
            max_time = 0.0;
        }

        // All tasks took the same time
        if (max_time - min_time).abs() < f64::EPSILON {
            max_time = min_time + 1.0;
        }

        for (id, key) in keys.iter().enumerate() {
            let name = key.to_string().replace('"', "\\\"");

            let (label_extra, color_code) = match times.get(*key) {
                Some(exec) => {
                    let t = (exec.duration.as_secs_f64() - min_time) / (max_time - min_time);

                    // Green -> yellow -> red
                    let (r, g, b) = if t < 0.5 {
                        ((255.0 * t * 2.0) as u8, 255, 0)
                    } else {
                        (255, (255.0 * (1.0 - (t - 0.5) * 2.0)) as u8, 0)
                    };

                    (
                        format!("{:.2?}", exec.duration),
                        format!("#{r:02X}{g:02X}{b:02X}"),
                    )
                }
                None => (String::from("not run"), String::from("#ADD8E6")),
            };

            writeln!(f, "    {id}[\"{name}\\n{label_extra}\"]")?;
            writeln!(f, "    style {id} fill:{color_code}")?;
        }

        for (source, target) in &self.edges {
            writeln!(f, "    {} --> {}", ids[source], ids[target])?;
        }

        Ok(())
    }
}
