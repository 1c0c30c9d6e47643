//! Arguments to [`Computer::add`](crate::Computer::add) and the items of an
//! insertion queue.

use std::any::Any;
use std::convert::Infallible;
use std::fmt::{Debug, Formatter};
use std::str::FromStr;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::error::Error;
use crate::key::{Key, KeyLike};
use crate::task::{Dynamic, Generator, Kwargs, Operator, Task, describe_value};

/// One positional argument.
#[derive(Clone)]
pub enum Arg {
    /// Text: the name of an operator or method in first position, otherwise
    /// a reference parsed on insertion.
    Named(String),
    /// A reference to another key.
    Ref(KeyLike),
    /// A literal.
    Value(Dynamic),
    Op(Operator),
    Generator(Generator),
    /// A complete task, inserted as-is.
    Task(Task),
}

impl Arg {
    pub fn value<T: Any + Send + Sync>(value: T) -> Self {
        Arg::Value(Arc::new(value))
    }

    /// The reference this argument names.
    pub(crate) fn to_key(&self) -> Result<KeyLike, Error> {
        match self {
            Arg::Named(text) => Ok(KeyLike::parse(text)?),
            Arg::Ref(key) => Ok(key.clone()),
            other => Err(Error::usage(format!("expected a key, found {other:?}"))),
        }
    }

    pub(crate) fn downcast<T: Any>(&self) -> Option<&T> {
        match self {
            Arg::Value(value) => value.downcast_ref(),
            _ => None,
        }
    }
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Arg::Named(value.to_string())
    }
}

impl From<String> for Arg {
    fn from(value: String) -> Self {
        Arg::Named(value)
    }
}

impl From<Key> for Arg {
    fn from(value: Key) -> Self {
        Arg::Ref(value.into())
    }
}

impl From<&Key> for Arg {
    fn from(value: &Key) -> Self {
        Arg::Ref(value.into())
    }
}

impl From<KeyLike> for Arg {
    fn from(value: KeyLike) -> Self {
        Arg::Ref(value)
    }
}

impl From<Operator> for Arg {
    fn from(value: Operator) -> Self {
        Arg::Op(value)
    }
}

impl From<Generator> for Arg {
    fn from(value: Generator) -> Self {
        Arg::Generator(value)
    }
}

impl From<Task> for Arg {
    fn from(value: Task) -> Self {
        Arg::Task(value)
    }
}

impl Debug for Arg {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Arg::Named(text) => write!(f, "{text:?}"),
            Arg::Ref(key) => Debug::fmt(key, f),
            Arg::Value(value) => f.write_str(&describe_value(value)),
            Arg::Op(op) => Debug::fmt(op, f),
            Arg::Generator(generator) => Debug::fmt(generator, f),
            Arg::Task(task) => Debug::fmt(task, f),
        }
    }
}

/// The first argument of [`Computer::add`](crate::Computer::add), which
/// selects what the call does.
#[derive(Clone, Debug)]
pub enum Data {
    /// Items for the retrying queue.
    Queue(Vec<Item>),
    /// An operator name, a method name, or else a key in text form.
    Text(String),
    /// A key.
    Key(KeyLike),
}

impl From<&str> for Data {
    fn from(value: &str) -> Self {
        Data::Text(value.to_string())
    }
}

impl From<String> for Data {
    fn from(value: String) -> Self {
        Data::Text(value)
    }
}

impl From<Key> for Data {
    fn from(value: Key) -> Self {
        Data::Key(value.into())
    }
}

impl From<&Key> for Data {
    fn from(value: &Key) -> Self {
        Data::Key(value.into())
    }
}

impl From<KeyLike> for Data {
    fn from(value: KeyLike) -> Self {
        Data::Key(value)
    }
}

impl From<Vec<Item>> for Data {
    fn from(value: Vec<Item>) -> Self {
        Data::Queue(value)
    }
}

/// How a queue item that keeps failing is reported. At [`Severity::Error`]
/// and above the failure is also returned to the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn is_fatal(self) -> bool {
        self >= Severity::Error
    }

    pub(crate) fn log(self, message: &str) {
        match self {
            Severity::Debug => debug!("{message}"),
            Severity::Info => info!("{message}"),
            Severity::Warning => warn!("{message}"),
            Severity::Error | Severity::Critical => error!("{message}"),
        }
    }
}

/// Parses a level name, case-insensitively. `"raise"` and unknown names
/// mean [`Severity::Error`].
impl FromStr for Severity {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "debug" => Severity::Debug,
            "info" => Severity::Info,
            "warn" | "warning" => Severity::Warning,
            "critical" => Severity::Critical,
            _ => Severity::Error,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AddOptions {
    /// Refuse to overwrite, and check every reference.
    pub strict: bool,
    /// Also add every partial sum of the key.
    pub sums: bool,
    /// Policy for queue items that fail; `None` inherits the enclosing one.
    pub fail: Option<Severity>,
    /// Attempts per queue item.
    pub max_tries: usize,
}

impl Default for AddOptions {
    fn default() -> Self {
        Self {
            strict: false,
            sums: false,
            fail: None,
            max_tries: 1,
        }
    }
}

impl AddOptions {
    pub fn strict() -> Self {
        Self {
            strict: true,
            ..Self::default()
        }
    }

    /// Policy for the partial sums of a key added directly: the item's own,
    /// or [`Severity::Error`] regardless of any enclosing queue.
    pub fn sums_fail(&self) -> Severity {
        self.fail.unwrap_or(Severity::Error)
    }
}

/// The keys added by one call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Added {
    One(KeyLike),
    Many(Vec<KeyLike>),
}

impl Added {
    pub fn keys(&self) -> &[KeyLike] {
        match self {
            Added::One(key) => std::slice::from_ref(key),
            Added::Many(keys) => keys,
        }
    }

    pub fn into_vec(self) -> Vec<KeyLike> {
        match self {
            Added::One(key) => vec![key],
            Added::Many(keys) => keys,
        }
    }

    /// The single added key, or the first of several.
    pub fn first(&self) -> Option<&KeyLike> {
        self.keys().first()
    }
}

/// One call to [`Computer::add`](crate::Computer::add), deferred.
#[derive(Clone)]
pub struct Item {
    pub data: Data,
    pub args: Vec<Arg>,
    pub kwargs: Kwargs,
    pub options: AddOptions,
}

impl Item {
    pub fn new(data: impl Into<Data>) -> Self {
        Self {
            data: data.into(),
            args: Vec::new(),
            kwargs: Kwargs::new(),
            options: AddOptions::default(),
        }
    }

    pub fn arg(mut self, arg: impl Into<Arg>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I>(mut self, args: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Arg>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn kwarg<T: Any + Send + Sync>(mut self, name: &str, value: T) -> Self {
        self.kwargs.insert(name.to_string(), Arc::new(value));
        self
    }

    pub fn options(mut self, options: AddOptions) -> Self {
        self.options = options;
        self
    }

    pub fn strict(mut self) -> Self {
        self.options.strict = true;
        self
    }

    pub fn sums(mut self) -> Self {
        self.options.sums = true;
        self
    }

    pub fn fail(mut self, severity: Severity) -> Self {
        self.options.fail = Some(severity);
        self
    }

    pub fn max_tries(mut self, max_tries: usize) -> Self {
        self.options.max_tries = max_tries;
        self
    }
}

/// Positional arguments only.
impl<D: Into<Data>> From<(D, Vec<Arg>)> for Item {
    fn from((data, args): (D, Vec<Arg>)) -> Self {
        Item::new(data).args(args)
    }
}

/// Positional arguments and options.
impl<D: Into<Data>> From<((D, Vec<Arg>), AddOptions)> for Item {
    fn from(((data, args), options): ((D, Vec<Arg>), AddOptions)) -> Self {
        Item::new(data).args(args).options(options)
    }
}

impl Debug for Item {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut tuple = f.debug_tuple("");
        match &self.data {
            Data::Queue(items) => tuple.field(&format_args!("<queue of {}>", items.len())),
            Data::Text(text) => tuple.field(text),
            Data::Key(key) => tuple.field(key),
        };
        for arg in &self.args {
            tuple.field(arg);
        }
        tuple.finish()?;

        let kwargs: Vec<&String> = self.kwargs.keys().collect();
        write!(f, ", {kwargs:?}, {:?}", self.options)
    }
}
