//! What the graph stores at each key.
//!
//! A [`Task`] is either a literal value or a [`Call`]: an [`Operator`] applied
//! to [`Input`]s, some of which reference other keys. Values travel between
//! tasks type-erased as [`Dynamic`]; operators downcast their inputs with
//! [`input`] and [`kwarg`].

use std::any::{Any, type_name};
use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use anyhow::anyhow;

use crate::computer::Computer;
use crate::error::Error;
use crate::item::{Added, Arg};
use crate::key::KeyLike;

/// A type-erased, thread-safe value.
pub type Dynamic = Arc<dyn Any + Send + Sync>;

/// Keyword arguments passed to an operator.
pub type Kwargs = BTreeMap<String, Dynamic>;

/// Wraps `value` as a [`Dynamic`].
pub fn value<T: Any + Send + Sync>(value: T) -> Dynamic {
    Arc::new(value)
}

/// Downcasts the positional input at `index`.
pub fn input<T: Any>(inputs: &[Dynamic], index: usize) -> anyhow::Result<&T> {
    let item = inputs
        .get(index)
        .ok_or_else(|| anyhow!("missing positional input {index}"))?;

    item.downcast_ref::<T>().ok_or_else(|| {
        anyhow!(
            "positional input {index} is not a {}",
            type_name::<T>()
        )
    })
}

/// Downcasts the keyword argument `name`, if present.
pub fn kwarg<'a, T: Any>(kwargs: &'a Kwargs, name: &str) -> anyhow::Result<Option<&'a T>> {
    match kwargs.get(name) {
        None => Ok(None),
        Some(item) => item
            .downcast_ref::<T>()
            .map(Some)
            .ok_or_else(|| anyhow!("keyword argument '{name}' is not a {}", type_name::<T>())),
    }
}

type OperatorFn = dyn Fn(&[Dynamic], &Kwargs) -> anyhow::Result<Dynamic> + Send + Sync;

/// Batch insertion hook of an [`Operator`], given the arguments that
/// followed the operator's name in [`Computer::add`].
pub type AddTasksFn =
    dyn Fn(&mut Computer, Vec<Arg>, Kwargs) -> Result<Added, Error> + Send + Sync;

/// A named callable that can appear at the head of a [`Call`].
#[derive(Clone)]
pub struct Operator {
    name: Arc<str>,
    func: Arc<OperatorFn>,
    add_tasks: Option<Arc<AddTasksFn>>,
}

impl Operator {
    pub fn new<F>(name: impl Into<Arc<str>>, func: F) -> Self
    where
        F: Fn(&[Dynamic], &Kwargs) -> anyhow::Result<Dynamic> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
            add_tasks: None,
        }
    }

    /// Attaches a hook that [`Computer::add`] calls instead of inserting a
    /// single task when this operator is named as the first argument.
    pub fn with_add_tasks<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut Computer, Vec<Arg>, Kwargs) -> Result<Added, Error> + Send + Sync + 'static,
    {
        self.add_tasks = Some(Arc::new(hook));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, inputs: &[Dynamic], kwargs: &Kwargs) -> anyhow::Result<Dynamic> {
        (self.func)(inputs, kwargs)
    }

    pub(crate) fn add_tasks(&self) -> Option<Arc<AddTasksFn>> {
        self.add_tasks.clone()
    }
}

impl Debug for Operator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "<operator {}>", self.name)
    }
}

/// What a [`Generator`] produces: nothing, or new tasks to merge into the
/// graph.
pub type Generated = Option<Vec<(KeyLike, Task)>>;

type PlainFn = dyn Fn(&[KeyLike], &Kwargs) -> anyhow::Result<Generated> + Send + Sync;
type WithComputerFn =
    dyn Fn(&mut Computer, &[KeyLike], &Kwargs) -> anyhow::Result<Generated> + Send + Sync;

#[derive(Clone)]
pub(crate) enum GeneratorFn {
    Plain(Arc<PlainFn>),
    WithComputer(Arc<WithComputerFn>),
}

/// A function that, given some existing keys, produces new tasks. Used with
/// [`Computer::apply`].
#[derive(Clone)]
pub struct Generator {
    pub(crate) name: Arc<str>,
    pub(crate) func: GeneratorFn,
}

impl Generator {
    pub fn new<F>(name: impl Into<Arc<str>>, func: F) -> Self
    where
        F: Fn(&[KeyLike], &Kwargs) -> anyhow::Result<Generated> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: GeneratorFn::Plain(Arc::new(func)),
        }
    }

    /// A generator that also receives the [`Computer`] it is applied to.
    pub fn with_computer<F>(name: impl Into<Arc<str>>, func: F) -> Self
    where
        F: Fn(&mut Computer, &[KeyLike], &Kwargs) -> anyhow::Result<Generated>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            func: GeneratorFn::WithComputer(Arc::new(func)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Debug for Generator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "<generator {}>", self.name)
    }
}

/// One element of a [`Call`] or [`Task::List`].
#[derive(Clone)]
pub enum Input {
    /// The result of another key.
    Ref(KeyLike),
    /// A literal, passed through untouched.
    Value(Dynamic),
}

impl Input {
    pub fn value<T: Any + Send + Sync>(value: T) -> Self {
        Input::Value(Arc::new(value))
    }
}

impl Debug for Input {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Input::Ref(key) => Debug::fmt(key, f),
            Input::Value(value) => f.write_str(&describe_value(value)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Call {
    pub op: Operator,
    pub inputs: Vec<Input>,
    pub kwargs: Kwargs,
}

#[derive(Clone)]
pub enum Task {
    /// A literal value.
    Value(Dynamic),
    /// A literal the executor must never look into.
    Quoted(Dynamic),
    /// The result of another key.
    Alias(KeyLike),
    /// A list whose references are resolved element-wise.
    List(Vec<Input>),
    /// An operator applied to inputs.
    Call(Call),
}

impl Task {
    pub fn value<T: Any + Send + Sync>(value: T) -> Self {
        Task::Value(Arc::new(value))
    }

    pub fn call(op: Operator, inputs: impl IntoIterator<Item = Input>) -> Self {
        Task::Call(Call {
            op,
            inputs: inputs.into_iter().collect(),
            kwargs: Kwargs::new(),
        })
    }

    /// Every key this task reads, in order.
    pub fn refs(&self) -> Vec<&KeyLike> {
        let inputs = match self {
            Task::Value(_) | Task::Quoted(_) => return Vec::new(),
            Task::Alias(key) => return vec![key],
            Task::List(inputs) => inputs,
            Task::Call(call) => &call.inputs,
        };

        inputs
            .iter()
            .filter_map(|input| match input {
                Input::Ref(key) => Some(key),
                Input::Value(_) => None,
            })
            .collect()
    }

    pub(crate) fn refs_mut(&mut self) -> Vec<&mut KeyLike> {
        let inputs = match self {
            Task::Value(_) | Task::Quoted(_) => return Vec::new(),
            Task::Alias(key) => return vec![key],
            Task::List(inputs) => inputs,
            Task::Call(call) => &mut call.inputs,
        };

        inputs
            .iter_mut()
            .filter_map(|input| match input {
                Input::Ref(key) => Some(key),
                Input::Value(_) => None,
            })
            .collect()
    }

    /// Wraps a literal so the executor treats it as opaque. Other tasks are
    /// returned unchanged.
    pub(crate) fn quote(self) -> Self {
        match self {
            Task::Value(value) => Task::Quoted(value),
            other => other,
        }
    }

    pub(crate) fn unquote(self) -> Self {
        match self {
            Task::Quoted(value) => Task::Value(value),
            other => other,
        }
    }
}

impl Debug for Task {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Task::Value(value) => f.write_str(&describe_value(value)),
            Task::Quoted(value) => write!(f, "quote({})", describe_value(value)),
            Task::Alias(key) => Debug::fmt(key, f),
            Task::List(inputs) => f.debug_list().entries(inputs).finish(),
            Task::Call(call) => {
                let mut tuple = f.debug_tuple(call.op.name());
                for input in &call.inputs {
                    tuple.field(input);
                }
                if !call.kwargs.is_empty() {
                    tuple.field(&call.kwargs.keys().collect::<Vec<_>>());
                }
                tuple.finish()
            }
        }
    }
}

/// A short, human-readable rendering of a type-erased value.
pub(crate) fn describe_value(value: &Dynamic) -> String {
    macro_rules! try_debug {
        ($($T:ty),*) => {
            $(
                if let Some(value) = value.downcast_ref::<$T>() {
                    return format!("{value:?}");
                }
            )*
        };
    }

    if let Some(value) = value.downcast_ref::<serde_json::Value>() {
        return value.to_string();
    }

    try_debug!(
        bool, i32, i64, u32, u64, usize, f32, f64, String, &'static str,
        Vec<String>
    );

    String::from("<opaque>")
}
