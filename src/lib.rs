#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod cache;
mod computer;
mod config;
mod error;
mod executor;
mod graph;
mod hash;
mod item;
mod key;
mod registry;
mod task;

pub use crate::cache::{Cache, Cached, SharedConfig, arg_hash};
pub use crate::computer::{Aggregation, Computer, Grouping, Groups, Method};
pub use crate::config::Config;
pub use crate::error::*;
pub use crate::executor::{Diagnostics, Plan, TaskExecution};
pub use crate::graph::{CONFIG, Graph};
pub use crate::hash::Hash32;
pub use crate::item::{AddOptions, Added, Arg, Data, Item, Severity};
pub use crate::key::{Key, KeyExpr, KeyLike, KeySource, PartialSum, QuantityLike, ToKeyLike};
pub use crate::registry::Module;
pub use crate::task::{
    AddTasksFn, Call, Dynamic, Generated, Generator, Input, Kwargs, Operator, Task, input, kwarg,
    value,
};

/// Installs a global subscriber that prints log lines above the progress
/// bars of running computations. Filtering follows `RUST_LOG`, defaulting to
/// `info`.
#[cfg(feature = "logging")]
pub fn init_logging() -> Result<(), tracing_subscriber::util::TryInitError> {
    use tracing_indicatif::IndicatifLayer;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{EnvFilter, fmt};

    let indicatif_layer = IndicatifLayer::new();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(indicatif_layer.get_stderr_writer()))
        .with(indicatif_layer)
        .try_init()
}
