//! The orchestrator: owns a [`Graph`], builds tasks into it and computes
//! keys on request.

mod add;
mod aggregate;
mod queue;

use std::any::{Any, type_name};
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info};

use crate::cache::{Cached, SharedConfig};
use crate::config::Config;
use crate::error::Error;
use crate::executor::{Diagnostics, Plan};
use crate::graph::{CONFIG, Graph};
use crate::item::Severity;
use crate::key::{Key, KeyLike, ToKeyLike};
use crate::registry::Module;
use crate::task::{Dynamic, Input, Operator, Task, describe_value};

pub use aggregate::{Aggregation, Grouping, Groups, Method};

pub struct Computer {
    graph: Graph,
    default_key: Option<KeyLike>,
    modules: Vec<Module>,
    /// Failure policy of each enclosing queue; the bottom entry never leaves.
    fail_stack: Vec<Severity>,
    /// The configuration tree as last set by [`Computer::configure`].
    settings: SharedConfig,
}

impl Default for Computer {
    fn default() -> Self {
        Self::new()
    }
}

fn config_key() -> KeyLike {
    KeyLike::Name(CONFIG.to_string())
}

impl Computer {
    pub fn new() -> Self {
        let mut graph = Graph::new();
        graph.insert(config_key(), Task::value(serde_json::json!({})));

        Self {
            graph,
            default_key: None,
            modules: Vec::new(),
            fail_stack: vec![Severity::Error],
            settings: Arc::new(RwLock::new(serde_json::json!({}))),
        }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Applies `config`: sets the default key and merges every section into
    /// the configuration tree, replacing sections with the same name.
    pub fn configure(&mut self, config: Config) -> Result<(), Error> {
        if let Some(default) = &config.default {
            self.default_key = Some(KeyLike::parse(default)?);
        }

        for name in config.extra.keys() {
            info!("No handler for configuration section {name:?}; stored as-is");
        }

        let value = config
            .to_value()
            .map_err(|e| Error::usage(format!("invalid configuration: {e}")))?;

        let mut tree = self.config();
        if let (Some(tree), serde_json::Value::Object(sections)) = (tree.as_object_mut(), value) {
            tree.extend(sections);
        }

        *self.settings.write().unwrap_or_else(PoisonError::into_inner) = tree.clone();
        self.graph.insert(config_key(), Task::value(tree));
        Ok(())
    }

    /// A copy of the configuration tree.
    pub fn config(&self) -> serde_json::Value {
        match self.graph.get(&config_key()) {
            Some(Task::Value(value) | Task::Quoted(value)) => value
                .downcast_ref::<serde_json::Value>()
                .cloned()
                .unwrap_or_default(),
            _ => serde_json::json!({}),
        }
    }

    pub fn default_key(&self) -> Option<&KeyLike> {
        self.default_key.as_ref()
    }

    pub fn set_default_key(&mut self, key: impl ToKeyLike) -> Result<(), Error> {
        self.default_key = Some(key.to_keylike()?);
        Ok(())
    }

    /// Makes the operators of `module` available by name, ahead of those of
    /// every module required before it. A module whose name is already
    /// present is ignored.
    pub fn require_module(&mut self, module: Module) {
        if self.modules.iter().any(|m| m.name() == module.name()) {
            return;
        }
        self.modules.push(module);
    }

    pub fn get_operator(&self, name: &str) -> Option<&Operator> {
        self.modules.iter().rev().find_map(|module| module.get(name))
    }

    pub(crate) fn require_operator(&self, name: &str) -> Result<Operator, Error> {
        self.get_operator(name)
            .cloned()
            .ok_or_else(|| Error::usage(format!("No operator {name:?} in any module")))
    }

    pub fn keys(&self) -> impl Iterator<Item = &KeyLike> {
        self.graph.keys()
    }

    /// Whether `key` is in the graph, with its dimensions in any order.
    pub fn contains(&self, key: impl ToKeyLike) -> bool {
        key.to_keylike().is_ok_and(|key| self.graph.contains(&key))
    }

    /// The stored key with the most dimensions for the name and tag of
    /// `key`.
    pub fn full_key(&self, key: impl ToKeyLike) -> Result<Key, Error> {
        let key = key.to_keylike()?;
        self.graph
            .full_key(&key)
            .cloned()
            .ok_or(Error::NotFound(key))
    }

    fn resolve(&self, key: &KeyLike) -> Option<KeyLike> {
        self.graph
            .unsorted_key(key)
            .cloned()
            .or_else(|| self.graph.full_key(key).map(KeyLike::from))
    }

    /// The stored form of each key; fails naming every key that is not in
    /// the graph.
    pub fn check_keys<I>(&self, keys: I) -> Result<Vec<KeyLike>, Error>
    where
        I: IntoIterator,
        I::Item: ToKeyLike,
    {
        let keys = keys
            .into_iter()
            .map(|key| key.to_keylike())
            .collect::<Result<Vec<_>, _>>()?;

        let mut found = Vec::with_capacity(keys.len());
        let mut missing = Vec::new();

        for key in keys {
            match self.resolve(&key) {
                Some(stored) => found.push(stored),
                None => missing.push(key),
            }
        }

        if missing.is_empty() {
            Ok(found)
        } else {
            Err(Error::MissingKey(missing))
        }
    }

    /// Like [`Computer::check_keys`], with `None` in place of each missing
    /// key.
    pub fn resolve_keys<I>(&self, keys: I) -> Result<Vec<Option<KeyLike>>, Error>
    where
        I: IntoIterator,
        I::Item: ToKeyLike,
    {
        keys.into_iter()
            .map(|key| Ok(self.resolve(&key.to_keylike()?)))
            .collect()
    }

    /// [`Graph::infer`] applied to each key.
    pub fn infer_keys<I, S>(&self, keys: I, dims: &[S]) -> Result<Vec<KeyLike>, Error>
    where
        I: IntoIterator,
        I::Item: ToKeyLike,
        S: AsRef<str>,
    {
        keys.into_iter()
            .map(|key| Ok(self.graph.infer(&key.to_keylike()?, dims)))
            .collect()
    }

    /// Computes `key` and everything it depends on, and nothing else.
    pub fn get(&mut self, key: impl ToKeyLike) -> Result<Dynamic, Error> {
        let key = self.check_one(key)?;
        self.compute(&key).map(|(value, _)| value)
    }

    /// Computes the default key.
    pub fn get_default(&mut self) -> Result<Dynamic, Error> {
        let key = self
            .default_key
            .clone()
            .ok_or_else(|| Error::usage("no default result key set"))?;
        let key = self.check_one(key)?;
        self.compute(&key).map(|(value, _)| value)
    }

    /// [`Computer::get`], downcast to `T`.
    pub fn get_as<T: Any + Send + Sync>(&mut self, key: impl ToKeyLike) -> Result<Arc<T>, Error> {
        let key = self.check_one(key)?;
        let (value, _) = self.compute(&key)?;

        value.downcast::<T>().map_err(|_| {
            Error::usage(format!("result of {key:?} is not a {}", type_name::<T>()))
        })
    }

    /// [`Computer::get`], also reporting the size of the pruned graph and how
    /// long each task took.
    pub fn get_with_diagnostics(
        &mut self,
        key: impl ToKeyLike,
    ) -> Result<(Dynamic, Diagnostics), Error> {
        let key = self.check_one(key)?;
        self.compute(&key)
    }

    fn check_one(&self, key: impl ToKeyLike) -> Result<KeyLike, Error> {
        let key = key.to_keylike()?;
        self.check_keys([&key])?
            .pop()
            .ok_or(Error::MissingKey(vec![key]))
    }

    fn compute(&mut self, key: &KeyLike) -> Result<(Dynamic, Diagnostics), Error> {
        let graph = QuotedConfig::new(&mut self.graph);

        let before = graph.len();
        let plan = Plan::prune(&graph, key)?;
        let after = plan.len();
        debug!("prune {before} -> {after} keys");

        let (value, execution_times) = plan.execute().map_err(|source| Error::Computation {
            key: key.clone(),
            source,
        })?;

        let diagnostics = Diagnostics {
            before,
            after,
            execution_times,
            edges: plan.edges(),
        };

        Ok((value, diagnostics))
    }

    /// Mermaid flowchart of the tasks needed to compute `key`.
    pub fn visualize(&self, key: impl ToKeyLike) -> Result<String, Error> {
        let key = self.check_one(key)?;
        let plan = Plan::prune(&self.graph, &key)?;
        debug!("prune {} -> {} keys", self.graph.len(), plan.len());
        Ok(plan.to_string())
    }

    /// A text outline of the tasks that produce `key`, references expanded
    /// in place.
    pub fn describe(&self, key: impl ToKeyLike) -> Result<String, Error> {
        let key = self.check_one(key)?;
        let mut out = String::new();
        self.describe_into(&mut out, &key);
        Ok(out)
    }

    /// [`Computer::describe`] for every key, sorted, with `"all"` last.
    pub fn describe_all(&self) -> String {
        let all = KeyLike::Name(String::from("all"));
        let mut keys: Vec<&KeyLike> = self.graph.keys().filter(|key| **key != all).collect();
        keys.sort();
        if self.graph.contains(&all) {
            keys.push(&all);
        }

        let mut blocks = Vec::with_capacity(keys.len());
        for key in keys {
            let mut out = String::new();
            self.describe_into(&mut out, key);
            blocks.push(out);
        }
        blocks.join("\n")
    }

    fn describe_into(&self, out: &mut String, key: &KeyLike) {
        out.push_str(&format!("{key:?}:\n"));
        let mut path = vec![key.clone()];
        if let Some(task) = self.graph.get(key) {
            self.describe_task(out, task, 0, &mut path);
        }
    }

    fn describe_task(&self, out: &mut String, task: &Task, depth: usize, path: &mut Vec<KeyLike>) {
        let indent = "  ".repeat(depth);

        let inputs = match task {
            Task::Value(value) | Task::Quoted(value) => {
                out.push_str(&format!("{indent}- {}\n", describe_value(value)));
                return;
            }
            Task::Alias(key) => {
                self.describe_ref(out, key, depth, path);
                return;
            }
            Task::List(inputs) => inputs,
            Task::Call(call) => {
                out.push_str(&format!("{indent}- <{}>\n", call.op.name()));
                for (name, value) in &call.kwargs {
                    out.push_str(&format!("{indent}- {name}={}\n", describe_value(value)));
                }
                &call.inputs
            }
        };

        for input in inputs {
            match input {
                Input::Ref(key) => self.describe_ref(out, key, depth, path),
                Input::Value(value) => {
                    out.push_str(&format!("{indent}- {}\n", describe_value(value)));
                }
            }
        }
    }

    fn describe_ref(&self, out: &mut String, key: &KeyLike, depth: usize, path: &mut Vec<KeyLike>) {
        let indent = "  ".repeat(depth);

        if path.contains(key) {
            out.push_str(&format!("{indent}- {key:?} (cycle)\n"));
            return;
        }

        match self.graph.lookup(key) {
            None => out.push_str(&format!("{indent}- {key:?} (missing)\n")),
            Some((stored, task)) => {
                out.push_str(&format!("{indent}- {stored:?}:\n"));
                path.push(stored.clone());
                self.describe_task(out, task, depth + 1, path);
                path.pop();
            }
        }
    }

    /// Wraps `func` so its results are cached under the `cache_path` of the
    /// configuration. Every call reads `cache_path` and `cache_skip` as they
    /// are configured at that moment.
    pub fn cache<F>(&self, name: impl Into<String>, func: F) -> Cached<F> {
        Cached::with_config(name, Arc::clone(&self.settings), func)
    }

    fn current_fail(&self) -> Severity {
        self.fail_stack.last().copied().unwrap_or(Severity::Error)
    }
}

/// Keeps the configuration entry quoted while a graph is borrowed for
/// execution.
struct QuotedConfig<'a> {
    graph: &'a mut Graph,
}

impl<'a> QuotedConfig<'a> {
    fn new(graph: &'a mut Graph) -> Self {
        if let Some(task) = graph.remove(&config_key()) {
            graph.insert(config_key(), task.quote());
        }
        Self { graph }
    }
}

impl Drop for QuotedConfig<'_> {
    fn drop(&mut self) {
        if let Some(task) = self.graph.remove(&config_key()) {
            self.graph.insert(config_key(), task.unquote());
        }
    }
}

impl Deref for QuotedConfig<'_> {
    type Target = Graph;

    fn deref(&self) -> &Graph {
        self.graph
    }
}

impl DerefMut for QuotedConfig<'_> {
    fn deref_mut(&mut self) -> &mut Graph {
        self.graph
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;
    use crate::item::{AddOptions, Arg, Item};
    use crate::task::{Generator, Kwargs, input, value};

    pub(super) fn base() -> Module {
        Module::new("base")
            .with_fn("identity", |inputs, _| Ok(inputs[0].clone()))
            .with_fn("product", |inputs, _| {
                Ok(value(input::<i64>(inputs, 0)? * input::<i64>(inputs, 1)?))
            })
            .with_fn("sum", |inputs, _| Ok(inputs[0].clone()))
    }

    pub(super) fn computer() -> Computer {
        let mut c = Computer::new();
        c.require_module(base());
        c
    }

    fn k(text: &str) -> KeyLike {
        KeyLike::parse(text).unwrap()
    }

    #[test]
    fn test_configure() {
        let mut c = Computer::new();
        assert_eq!(c.config(), json!({}));

        c.configure(
            Config::new()
                .with_default("answer")
                .with_cache_path("/tmp/cache")
                .with_section("units", json!({"replace": {"kt": "t"}})),
        )
        .unwrap();

        assert_eq!(c.default_key(), Some(&k("answer")));
        assert_eq!(
            c.config(),
            json!({
                "default": "answer",
                "cache_path": "/tmp/cache",
                "units": {"replace": {"kt": "t"}}
            })
        );

        // Later sections replace earlier ones, others are kept
        c.configure(Config::new().with_section("units", json!(null))).unwrap();
        assert_eq!(c.config()["cache_path"], json!("/tmp/cache"));
        assert_eq!(c.config()["units"], json!(null));
    }

    #[test]
    fn test_get_default() {
        let mut c = computer();
        assert!(matches!(c.get_default(), Err(Error::Usage(_))));

        c.add(Item::new("answer").arg(Arg::value(42i64))).unwrap();
        c.configure(Config::new().with_default("answer")).unwrap();

        assert_eq!(c.get_default().unwrap().downcast_ref::<i64>(), Some(&42));
    }

    #[test]
    fn test_get_restores_config() {
        let mut c = computer();
        c.add(Item::new("fails").arg("product").arg("config").arg("config"))
            .unwrap();

        assert!(matches!(c.get("fails"), Err(Error::Computation { .. })));
        assert!(matches!(c.graph().get(&config_key()), Some(Task::Value(_))));

        // The configuration tree itself is an ordinary value
        let tree = c.get_as::<serde_json::Value>("config").unwrap();
        assert_eq!(*tree, json!({}));
        assert!(matches!(c.graph().get(&config_key()), Some(Task::Value(_))));
    }

    #[test]
    fn test_get_missing() {
        let mut c = computer();
        assert!(matches!(c.get("nothing"), Err(Error::MissingKey(keys)) if keys == [k("nothing")]));

        c.add(Item::new("orphan").arg("product").arg("a").arg("b")).unwrap();
        match c.get("orphan") {
            Err(Error::MissingKey(keys)) => assert_eq!(keys, [k("a"), k("b")]),
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_computation_error() {
        #[derive(Debug, thiserror::Error)]
        #[error("division by zero")]
        struct DivideByZero;

        let mut c = computer();
        c.add(Item::new("x").arg(Arg::value(1i64))).unwrap();
        c.add(
            Item::new("bad")
                .arg(Operator::new("divide", |_, _| Err(DivideByZero.into())))
                .arg("x"),
        )
        .unwrap();

        let err = c.get("bad").unwrap_err();
        let Error::Computation { key, source } = &err else {
            panic!("unexpected {err:?}");
        };
        assert_eq!(*key, k("bad"));
        assert!(source.downcast_ref::<DivideByZero>().is_some());
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_get_as() {
        let mut c = computer();
        c.add(Item::new("x:a-b").arg(Arg::value(6i64))).unwrap();
        c.add(Item::new("y").arg("product").arg("x:b-a").arg(Arg::value(7i64)))
            .unwrap();

        assert_eq!(*c.get_as::<i64>("y").unwrap(), 42);
        assert!(matches!(c.get_as::<f64>("y"), Err(Error::Usage(_))));

        // Bare names expand to the full key
        assert_eq!(*c.get_as::<i64>("x").unwrap(), 6);
    }

    #[test]
    fn test_get_with_diagnostics() {
        let mut c = computer();
        c.add(Item::new("a").arg(Arg::value(2i64))).unwrap();
        c.add(Item::new("b").arg("product").arg("a").arg("a")).unwrap();
        c.add(Item::new("unused").arg(Arg::value(0i64))).unwrap();

        let (value, diagnostics) = c.get_with_diagnostics("b").unwrap();
        assert_eq!(value.downcast_ref::<i64>(), Some(&4));
        assert_eq!(diagnostics.before, 4);
        assert_eq!(diagnostics.after, 2);
        assert_eq!(diagnostics.execution_times.len(), 2);
        assert!(diagnostics.render_mermaid().contains("0 --> 1"));
    }

    #[test]
    fn test_check_keys() {
        let mut c = computer();
        c.add(Item::new("foo:c-b-a").arg(Arg::value(1i64))).unwrap();
        c.add(Item::new("bar").arg(Arg::value(2i64))).unwrap();

        assert_eq!(
            c.check_keys(["foo:a-b-c", "foo", "bar"]).unwrap(),
            [k("foo:c-b-a"), k("foo:c-b-a"), k("bar")]
        );

        match c.check_keys(["foo:a-b-c", "baz", "qux:x"]) {
            Err(Error::MissingKey(keys)) => assert_eq!(keys, [k("baz"), k("qux:x")]),
            other => panic!("unexpected {other:?}"),
        }

        assert_eq!(
            c.resolve_keys(["baz", "bar"]).unwrap(),
            [None, Some(k("bar"))]
        );

        assert!(matches!(c.check_keys([":bad"]), Err(Error::Key(_))));
    }

    #[test]
    fn test_full_key() {
        let mut c = computer();
        c.add(Item::new("foo:a").arg(Arg::value(1i64))).unwrap();
        c.add(Item::new("foo:a-b-c").arg(Arg::value(1i64))).unwrap();
        c.add(Item::new("foo:a-b").arg(Arg::value(1i64))).unwrap();

        assert_eq!(c.full_key("foo").unwrap().to_string(), "foo:a-b-c");
        assert_eq!(c.full_key("foo:c").unwrap().to_string(), "foo:a-b-c");
        assert!(matches!(c.full_key("bar"), Err(Error::NotFound(_))));

        c.add(Item::new("foo:x-y-z-w").arg(Arg::value(1i64))).unwrap();
        assert_eq!(c.full_key("foo").unwrap().to_string(), "foo:x-y-z-w");

        assert_eq!(
            c.infer_keys(["foo", "config"], &["x", "y"]).unwrap(),
            [k("foo:x-y"), k("config")]
        );
    }

    #[test]
    fn test_require_module() {
        let mut c = computer();
        assert!(c.get_operator("product").is_some());
        assert!(c.get_operator("ratio").is_none());

        // Same name: ignored
        c.require_module(Module::new("base").with_fn("ratio", |_, _| Ok(value(0i64))));
        assert!(c.get_operator("ratio").is_none());

        // Later modules take precedence
        c.require_module(Module::new("extra").with_fn("product", |_, _| Ok(value(-1i64))));
        let op = c.get_operator("product").unwrap();
        let out = op.call(&[value(2i64), value(3i64)], &Kwargs::new()).unwrap();
        assert_eq!(out.downcast_ref::<i64>(), Some(&-1));
    }

    #[test]
    fn test_describe() {
        let mut c = computer();
        c.add(Item::new("a").arg(Arg::value(1i64))).unwrap();
        c.add(Item::new("b:x").arg("product").arg("a").arg(Arg::value(2i64)))
            .unwrap();
        c.add(Item::new("all").arg(Arg::Task(Task::List(vec![Input::Ref(k("b:x"))]))))
            .unwrap();

        assert_eq!(
            c.describe("b").unwrap(),
            "<b:x>:\n- <product>\n- 'a':\n  - 1\n- 2\n"
        );

        let all = c.describe_all();
        assert!(all.starts_with("'a':\n- 1\n\n'config':\n- {}\n"));
        assert!(all.ends_with("'all':\n- <b:x>:\n  - <product>\n  - 'a':\n    - 1\n  - 2\n"));
    }

    #[test]
    fn test_visualize() {
        let mut c = computer();
        c.add(Item::new("a").arg(Arg::value(1i64))).unwrap();
        c.add(Item::new("b").arg("product").arg("a").arg("a")).unwrap();

        let text = c.visualize("b").unwrap();
        assert!(text.starts_with("graph LR\n"));
        assert!(text.contains("b\\nproduct"));
        assert!(matches!(c.visualize("zzz"), Err(Error::MissingKey(_))));
    }

    #[test]
    fn test_cache() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = computer();
        c.configure(Config::new().with_cache_path(dir.path().to_str().unwrap()))
            .unwrap();

        let calls = AtomicUsize::new(0);
        let cached = c.cache("double", |x: &i64, _: &()| -> anyhow::Result<i64> {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(x * 2)
        });
        assert_eq!(cached.call(&21, &()).unwrap(), 42);
        assert_eq!(cached.call(&21, &()).unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cached.cache().unwrap().dir().as_str(), dir.path().to_str().unwrap());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);

        // Configured after wrapping, still applies
        c.configure(Config::new().with_cache_skip(true)).unwrap();
        assert_eq!(cached.call(&21, &()).unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let other = tempfile::tempdir().unwrap();
        c.configure(Config::new().with_cache_path(other.path().to_str().unwrap()))
            .unwrap();
        assert_eq!(cached.call(&5, &()).unwrap(), 10);
        assert_eq!(std::fs::read_dir(other.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_apply() {
        let mut c = computer();
        c.add(Item::new("foo").arg(Arg::value(42i64))).unwrap();
        c.add(Item::new("bar").arg(Arg::value(11i64))).unwrap();
        let n = c.keys().count();

        let product = c.get_operator("product").unwrap().clone();
        let plain = Generator::new("squares", move |keys, _| {
            Ok(Some(
                keys.iter()
                    .map(|key| {
                        let out = KeyLike::Name(format!("{}2", key.name()));
                        let task = Task::call(
                            product.clone(),
                            [Input::Ref(key.clone()), Input::Ref(key.clone())],
                        );
                        (out, task)
                    })
                    .collect(),
            ))
        });

        let added = c.apply(&plain, ["foo", "bar"], &Kwargs::new()).unwrap();
        assert_eq!(added, [k("foo2"), k("bar2")]);
        assert_eq!(c.keys().count(), n + 2);
        assert_eq!(*c.get_as::<i64>("bar2").unwrap(), 121);

        // Generators that take the computer add through it
        let with_computer = Generator::with_computer("double", |c, keys, kwargs| {
            let factor = crate::task::kwarg::<i64>(kwargs, "factor")?.copied().unwrap_or(2);
            for key in keys {
                c.add(
                    Item::new(format!("{}-x{factor}", key.name()))
                        .arg("product")
                        .arg(key.clone())
                        .arg(Arg::value(factor)),
                )?;
            }
            Ok(None)
        });

        let mut kwargs = Kwargs::new();
        kwargs.insert("factor".into(), value(3i64));
        assert!(c.apply(&with_computer, ["foo"], &kwargs).unwrap().is_empty());
        assert_eq!(*c.get_as::<i64>("foo-x3").unwrap(), 126);

        // Missing inputs are reported before the generator runs
        assert!(matches!(
            c.apply(&with_computer, ["nope"], &Kwargs::new()),
            Err(Error::MissingKey(_))
        ));

        // Generator failures name the generator
        let broken = Generator::new("broken", |_, _| anyhow::bail!("nothing to do"));
        assert!(matches!(
            c.apply(&broken, ["foo"], &Kwargs::new()),
            Err(Error::Generator { ref name, .. }) if name == "broken"
        ));
    }

    #[test]
    fn test_strict() {
        let mut c = computer();
        c.add(Item::new("a").arg(Arg::value(1i64))).unwrap();
        c.add(Item::new("a").arg(Arg::value(2i64)).options(AddOptions::strict()))
            .unwrap_err();

        assert!(matches!(
            c.add(Item::new("a").arg(Arg::value(2i64)).strict()),
            Err(Error::KeyExists(key)) if key == k("a")
        ));

        // Not strict: overwrite, and get sees it
        c.add(Item::new("a").arg(Arg::value(3i64))).unwrap();
        assert_eq!(*c.get_as::<i64>("a").unwrap(), 3);
    }
}
