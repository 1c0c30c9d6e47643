use tracing::debug;

use super::Computer;
use super::aggregate::{Aggregation, Grouping, Method};
use crate::error::Error;
use crate::item::{AddOptions, Added, Arg, Data, Item};
use crate::key::{Key, KeyLike, ToKeyLike};
use crate::task::{Call, Generator, GeneratorFn, Input, Kwargs, Task, value};

/// Methods reachable by name through [`Computer::add`].
const METHODS: &[&str] = &["add_single", "apply", "aggregate", "disaggregate"];

/// An element of a call or list: text is always a reference.
pub(super) fn to_input(arg: Arg) -> Result<Input, Error> {
    match arg {
        Arg::Named(text) => Ok(Input::Ref(KeyLike::parse(&text)?)),
        Arg::Ref(key) => Ok(Input::Ref(key)),
        Arg::Value(value) => Ok(Input::Value(value)),
        other => Err(Error::usage(format!("{other:?} can't be used as an input"))),
    }
}

impl Computer {
    /// Adds tasks to the graph; what `item` does depends on its data:
    ///
    /// - a queue of items is passed to the retrying batch inserter, with the
    ///   `max_tries` and `fail` options of `item`;
    /// - the name of a registered operator calls its batch hook if it has
    ///   one, and otherwise adds a task calling that operator at the key given
    ///   as the first argument;
    /// - the name of a method (`"add_single"`, `"apply"`, `"aggregate"` or
    ///   `"disaggregate"`) calls that method with the arguments;
    /// - anything else is a key, and the arguments are its task. With the
    ///   `sums` option, every partial sum of the key is also added.
    pub fn add(&mut self, item: impl Into<Item>) -> Result<Added, Error> {
        let Item {
            data,
            args,
            kwargs,
            options,
        } = item.into();

        let text = match data {
            Data::Queue(items) => {
                return self
                    .add_queue(items, options.max_tries, options.fail)
                    .map(Added::Many);
            }
            Data::Key(key) => return self.add_key(key, args, kwargs, options),
            Data::Text(text) => text,
        };

        if let Some(op) = self.get_operator(&text).cloned() {
            if let Some(hook) = op.add_tasks() {
                return hook(self, args, kwargs);
            }

            let mut args = args.into_iter();
            let key = args
                .next()
                .ok_or_else(|| Error::usage(format!("no key given for operator {text:?}")))?
                .to_key()?;

            let args = std::iter::once(Arg::Op(op)).chain(args).collect();
            return self.add_key(key, args, kwargs, options);
        }

        if METHODS.contains(&text.as_str()) {
            return self.add_method(&text, args, kwargs, options);
        }

        let key = KeyLike::parse(&text)?;
        self.add_key(key, args, kwargs, options)
    }

    fn add_key(
        &mut self,
        key: KeyLike,
        args: Vec<Arg>,
        kwargs: Kwargs,
        options: AddOptions,
    ) -> Result<Added, Error> {
        let task = self.task_from_args(args, kwargs)?;
        let options = AddOptions {
            fail: Some(options.sums_fail()),
            ..options
        };
        self.insert_task(key, task, options)
    }

    /// [`Computer::add_single`], followed by the partial sums of `key` if
    /// `options.sums` is set. The sums are queued under `options.fail`, so
    /// `None` inherits the policy of an enclosing queue.
    pub(super) fn insert_task(
        &mut self,
        key: KeyLike,
        task: Task,
        options: AddOptions,
    ) -> Result<Added, Error> {
        let key = self.add_single(key, task, options.strict)?;

        if !options.sums {
            return Ok(Added::One(key));
        }

        let full = key.to_key();
        let items = self.sum_items(&full)?;
        debug!("add {} partial sums of {full:?}", items.len());

        let mut added = vec![key];
        added.extend(self.add_queue(items, 1, options.fail)?);
        Ok(Added::Many(added))
    }

    /// One item per partial sum of `key`, summing with the `"sum"` operator.
    fn sum_items(&self, key: &Key) -> Result<Vec<Item>, Error> {
        let mut sums = key.iter_sums().peekable();
        if sums.peek().is_none() {
            return Ok(Vec::new());
        }

        let op = self.require_operator("sum")?;

        Ok(sums
            .map(|sum| {
                let mut kwargs = Kwargs::new();
                kwargs.insert(String::from("dimensions"), value(sum.sum_over));

                let task = Task::Call(Call {
                    op: op.clone(),
                    inputs: vec![Input::Ref(sum.source.into())],
                    kwargs,
                });
                Item::new(sum.key).arg(task)
            })
            .collect())
    }

    /// Builds a task from positional arguments:
    ///
    /// - an operator (or the name of a registered one) first calls it with
    ///   the remaining arguments and `kwargs`;
    /// - a lone [`Task`] is used as-is, a lone reference is an alias, and a
    ///   lone value is a literal;
    /// - several arguments make a list.
    pub(super) fn task_from_args(&self, args: Vec<Arg>, kwargs: Kwargs) -> Result<Task, Error> {
        let mut args = args.into_iter();
        let Some(first) = args.next() else {
            return Err(Error::usage("At least 1 argument required"));
        };

        let op = match &first {
            Arg::Op(op) => Some(op.clone()),
            Arg::Named(name) => self.get_operator(name).cloned(),
            _ => None,
        };

        if let Some(op) = op {
            return Ok(Task::Call(Call {
                op,
                inputs: args.map(to_input).collect::<Result<_, _>>()?,
                kwargs,
            }));
        }

        if !kwargs.is_empty() {
            return Err(Error::usage(format!(
                "keyword arguments {:?} given without an operator",
                kwargs.keys().collect::<Vec<_>>()
            )));
        }

        let rest: Vec<Arg> = args.collect();
        if !rest.is_empty() {
            return std::iter::once(first)
                .chain(rest)
                .map(to_input)
                .collect::<Result<_, _>>()
                .map(Task::List);
        }

        match first {
            Arg::Task(task) => Ok(task),
            Arg::Value(value) => Ok(Task::Value(value)),
            Arg::Named(_) | Arg::Ref(_) => Ok(Task::Alias(first.to_key()?)),
            other => Err(Error::usage(format!("{other:?} is not a task"))),
        }
    }

    /// Stores `task` at `key`, replacing any task already there.
    ///
    /// With `strict`, the key must be new and every reference in the task
    /// must resolve; references are rewritten to the form they are stored
    /// under.
    pub fn add_single(
        &mut self,
        key: impl ToKeyLike,
        mut task: Task,
        strict: bool,
    ) -> Result<KeyLike, Error> {
        let key = key.to_keylike()?;

        if strict {
            if self.graph.contains(&key) {
                return Err(Error::KeyExists(key));
            }

            let refs: Vec<KeyLike> = task.refs().into_iter().cloned().collect();
            let checked = self.check_keys(refs)?;
            for (slot, stored) in task.refs_mut().into_iter().zip(checked) {
                *slot = stored;
            }
        }

        self.graph.insert(key.clone(), task);
        Ok(key)
    }

    /// Resolves `keys`, calls `generator` with them and `kwargs`, and merges
    /// whatever tasks it returns into the graph.
    ///
    /// Returns the keys of the returned tasks; a generator that adds through
    /// the computer itself, or adds nothing, yields none.
    pub fn apply<I>(
        &mut self,
        generator: &Generator,
        keys: I,
        kwargs: &Kwargs,
    ) -> Result<Vec<KeyLike>, Error>
    where
        I: IntoIterator,
        I::Item: ToKeyLike,
    {
        let keys = self.check_keys(keys)?;

        let generated = match &generator.func {
            GeneratorFn::Plain(func) => func(&keys, kwargs),
            GeneratorFn::WithComputer(func) => func(self, &keys, kwargs),
        }
        .map_err(|source| Error::Generator {
            name: generator.name().to_string(),
            source,
        })?;

        let Some(tasks) = generated else {
            return Ok(Vec::new());
        };

        let added = tasks.iter().map(|(key, _)| key.clone()).collect();
        self.graph.update(tasks);
        Ok(added)
    }

    fn add_method(
        &mut self,
        name: &str,
        args: Vec<Arg>,
        kwargs: Kwargs,
        options: AddOptions,
    ) -> Result<Added, Error> {
        let mut args = args.into_iter();
        let mut next = |what: &str| {
            args.next()
                .ok_or_else(|| Error::usage(format!("{name}(): missing argument '{what}'")))
        };

        match name {
            "add_single" => {
                let key = next("key")?.to_key()?;
                let task = self.task_from_args(args.collect(), kwargs)?;
                self.add_single(key, task, options.strict).map(Added::One)
            }
            "apply" => {
                let Arg::Generator(generator) = next("generator")? else {
                    return Err(Error::usage("apply(): first argument must be a generator"));
                };
                let keys = args.map(|arg| arg.to_key()).collect::<Result<Vec<_>, _>>()?;
                self.apply(&generator, keys, &kwargs).map(Added::Many)
            }
            "aggregate" => {
                let qty = next("qty")?.to_key()?;
                let tag = text_arg(next("tag")?, "tag")?;
                let grouping = Grouping::try_from(next("dims_or_groups")?)?;

                let aggregation = Aggregation {
                    weights: kwargs.get("weights").cloned().map(Input::Value),
                    keep: kwargs
                        .get("keep")
                        .and_then(|keep| keep.downcast_ref::<bool>())
                        .copied()
                        .unwrap_or(true),
                    sums: options.sums,
                    fail: options.fail,
                };
                self.aggregate(qty, &tag, grouping, aggregation)
            }
            "disaggregate" => {
                let qty = next("qty")?.to_key()?;
                let new_dim = text_arg(next("new_dim")?, "new_dim")?;
                let method = match args.next() {
                    None => Method::default(),
                    Some(Arg::Op(op)) => Method::Op(op),
                    Some(Arg::Named(name)) => Method::Named(name),
                    Some(other) => {
                        return Err(Error::usage(format!(
                            "disaggregate(): {other:?} is not a method"
                        )));
                    }
                };
                self.disaggregate(qty, &new_dim, method, args.collect())
            }
            _ => Err(Error::usage(format!("no method {name:?}"))),
        }
    }
}

fn text_arg(arg: Arg, what: &str) -> Result<String, Error> {
    match arg {
        Arg::Named(text) => Ok(text),
        Arg::Value(value) => value
            .downcast_ref::<String>()
            .cloned()
            .ok_or_else(|| Error::usage(format!("'{what}' must be text"))),
        other => Err(Error::usage(format!("'{what}' must be text, not {other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::computer::tests::{base, computer};
    use crate::item::Severity;
    use crate::registry::Module;
    use crate::task::{Operator, input};

    fn k(text: &str) -> KeyLike {
        KeyLike::parse(text).unwrap()
    }

    #[test]
    fn test_task_from_args() {
        let c = computer();

        assert!(matches!(
            c.task_from_args(vec![], Kwargs::new()),
            Err(Error::Usage(message)) if message == "At least 1 argument required"
        ));

        let alias = c.task_from_args(vec!["a:x".into()], Kwargs::new()).unwrap();
        assert!(matches!(alias, Task::Alias(key) if key == k("a:x")));

        let literal = c.task_from_args(vec![Arg::value(1.5f64)], Kwargs::new()).unwrap();
        assert!(matches!(literal, Task::Value(_)));

        let list = c
            .task_from_args(vec!["a".into(), Arg::value(2i64)], Kwargs::new())
            .unwrap();
        assert_eq!(format!("{list:?}"), "['a', 2]");

        let call = c
            .task_from_args(vec!["product".into(), "a".into(), Arg::value(2i64)], Kwargs::new())
            .unwrap();
        assert_eq!(format!("{call:?}"), "product('a', 2)");

        let mut kwargs = Kwargs::new();
        kwargs.insert("scale".into(), value(2i64));
        assert!(matches!(
            c.task_from_args(vec!["a".into()], kwargs),
            Err(Error::Usage(_))
        ));
    }

    #[test]
    fn test_add_key() {
        let mut c = computer();

        let added = c.add(Item::new("a:x-y").arg(Arg::value(6i64))).unwrap();
        assert_eq!(added, Added::One(k("a:x-y")));

        // Operator given by name in first position
        c.add(Item::new("b").arg("product").arg("a:y-x").arg(Arg::value(7i64)))
            .unwrap();
        assert_eq!(*c.get_as::<i64>("b").unwrap(), 42);

        // Operator name as data: the key comes first
        let added = c
            .add(Item::new("product").arg("c").arg("b").arg(Arg::value(2i64)))
            .unwrap();
        assert_eq!(added, Added::One(k("c")));
        assert_eq!(*c.get_as::<i64>("c").unwrap(), 84);

        assert!(matches!(c.add(Item::new("product")), Err(Error::Usage(_))));
        assert!(matches!(
            c.add(Item::new("e:x--y").arg(Arg::value(0i64))),
            Err(Error::Key(_))
        ));
    }

    #[test]
    fn test_add_single_strict() {
        let mut c = computer();
        c.add(Item::new("a:x-y").arg(Arg::value(1i64))).unwrap();

        let task = c
            .task_from_args(vec!["product".into(), "a:y-x".into(), "a".into()], Kwargs::new())
            .unwrap();
        let key = c.add_single("b", task, true).unwrap();

        // References are rewritten to their stored form
        let stored = c.graph().get(&key).unwrap();
        assert_eq!(format!("{stored:?}"), "product(<a:x-y>, <a:x-y>)");

        let task = Task::call(
            c.get_operator("product").unwrap().clone(),
            [Input::Ref(k("p")), Input::Ref(k("a")), Input::Ref(k("q:z"))],
        );
        match c.add_single("c", task, true) {
            Err(Error::MissingKey(keys)) => assert_eq!(keys, [k("p"), k("q:z")]),
            other => panic!("unexpected {other:?}"),
        }
        assert!(!c.contains("c"));

        // Not strict: stored as given
        let task = Task::Alias(k("nowhere"));
        c.add_single("c", task, false).unwrap();
        assert!(c.contains("c"));

        assert!(matches!(
            c.add_single("a:y-x", Task::value(0i64), true),
            Err(Error::KeyExists(_))
        ));
    }

    #[test]
    fn test_sums() {
        let mut c = computer();
        let added = c
            .add(Item::new("bar:a-b-c-d").arg(Arg::value(1i64)).sums())
            .unwrap();

        assert_eq!(added.keys().len(), 16);
        assert_eq!(added.first(), Some(&k("bar:a-b-c-d")));
        assert!(added.keys().contains(&k("bar")));
        assert!(added.keys().contains(&k("bar:a-c")));
        assert!(c.contains("bar:d-c-b"));

        let Some(Task::Call(call)) = c.graph().get(&k("bar:b-d")) else {
            panic!("not a call");
        };
        assert_eq!(call.op.name(), "sum");
        assert_eq!(format!("{:?}", call.inputs), "[<bar:a-b-c-d>]");
        let dims = crate::task::kwarg::<Vec<String>>(&call.kwargs, "dimensions")
            .unwrap()
            .unwrap();
        assert_eq!(dims, &["a", "c"]);

        // No dimensions, nothing to sum, no operator needed
        let mut bare = Computer::new();
        let added = bare.add(Item::new("x").arg(Arg::value(1i64)).sums()).unwrap();
        assert_eq!(added, Added::Many(vec![k("x")]));

        // Without a "sum" operator
        assert!(matches!(
            bare.add(Item::new("y:i").arg(Arg::value(1i64)).sums()),
            Err(Error::Usage(_))
        ));
    }

    #[test]
    fn test_sums_in_quiet_queue() {
        let mut c = computer();
        let item = Item::new("bar:a-b").arg(Arg::value(1i64)).sums();

        let added = c.add_queue([item], 1, Some(Severity::Warning)).unwrap();
        assert_eq!(added.len(), 4);
        assert!(added.contains(&k("bar:b")));
        assert_eq!(c.fail_stack, [Severity::Error]);
    }

    #[test]
    fn test_add_tasks_hook() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);

        let op = Operator::new("ratio", |inputs, _| {
            Ok(value(input::<i64>(inputs, 0)? / input::<i64>(inputs, 1)?))
        })
        .with_add_tasks(move |c, args, _| {
            seen.fetch_add(1, Ordering::SeqCst);
            let mut keys = Vec::new();
            for arg in args {
                let key = arg.to_key()?;
                let out = KeyLike::Name(format!("{}-half", key.name()));
                let task = c.task_from_args(
                    vec![Arg::Named("ratio".into()), Arg::Ref(key), Arg::value(2i64)],
                    Kwargs::new(),
                )?;
                keys.push(c.add_single(out, task, true)?);
            }
            Ok(Added::Many(keys))
        });

        let mut c = computer();
        c.require_module(Module::new("ratios").with(op));
        c.add(Item::new("a").arg(Arg::value(10i64))).unwrap();
        c.add(Item::new("b").arg(Arg::value(4i64))).unwrap();

        let added = c.add(Item::new("ratio").arg("a").arg("b")).unwrap();
        assert_eq!(added.into_vec(), [k("a-half"), k("b-half")]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(*c.get_as::<i64>("b-half").unwrap(), 2);

        // In other positions, the operator is called as usual
        c.add(Item::new("c").arg("ratio").arg("a").arg("b")).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(*c.get_as::<i64>("c").unwrap(), 2);
    }

    #[test]
    fn test_add_by_method_name() {
        let mut c = computer();
        c.add(Item::new("a").arg(Arg::value(3i64))).unwrap();

        let added = c
            .add(Item::new("add_single").arg("b").arg("product").arg("a").arg("a"))
            .unwrap();
        assert_eq!(added, Added::One(k("b")));
        assert_eq!(*c.get_as::<i64>("b").unwrap(), 9);

        let generator = Generator::new("copy", |keys, _| {
            Ok(Some(
                keys.iter()
                    .map(|key| (KeyLike::Name(format!("{}-copy", key.name())), Task::Alias(key.clone())))
                    .collect(),
            ))
        });
        let added = c.add(Item::new("apply").arg(generator).arg("a").arg("b")).unwrap();
        assert_eq!(added.into_vec(), [k("a-copy"), k("b-copy")]);

        assert!(matches!(
            c.add(Item::new("apply").arg("a")),
            Err(Error::Usage(_))
        ));
        assert!(matches!(
            c.add(Item::new("add_single")),
            Err(Error::Usage(message)) if message.contains("'key'")
        ));
    }

    #[test]
    fn test_operator_shadows_method() {
        let mut c = computer();
        c.require_module(base().with_fn("apply", |_, _| Ok(value(0i64))));
        // A module with the same name is ignored, so "apply" stays a method
        assert!(c.get_operator("apply").is_none());

        c.require_module(Module::new("late").with_fn("apply", |_, _| Ok(value(0i64))));
        let added = c.add(Item::new("apply").arg("zero")).unwrap();
        assert_eq!(added, Added::One(k("zero")));
    }
}
