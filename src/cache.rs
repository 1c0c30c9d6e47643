//! Results of expensive functions, stored on disk.
//!
//! A [`Cached`] function is keyed by its name and a [`Hash32`] of its
//! arguments in canonical JSON form. The first call with given arguments
//! stores the result as CBOR under the cache directory; later calls read it
//! back instead of calling the function. Nothing is ever deleted or
//! invalidated.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::sync::{Arc, PoisonError, RwLock};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use crate::error::CacheError;
use crate::hash::Hash32;

/// Hashed in place of the arguments of a call that has none.
const NO_ARGUMENTS: &[u8] = b"\0lazygraph:no-arguments";

/// `()` and other zero-sized values that serialize to `null`.
fn is_unit<T: ?Sized>(raw: &T, value: &serde_json::Value) -> bool {
    std::mem::size_of_val(raw) == 0 && value.is_null()
}

fn no_positional<A: ?Sized>(raw: &A, value: &serde_json::Value) -> bool {
    is_unit(raw, value) || matches!(value, serde_json::Value::Array(items) if items.is_empty())
}

fn no_keywords<K: ?Sized>(raw: &K, value: &serde_json::Value) -> bool {
    is_unit(raw, value) || matches!(value, serde_json::Value::Object(map) if map.is_empty())
}

/// Hash of the positional and keyword arguments of one call.
///
/// A call has no arguments when `args` is `()` or an empty sequence and
/// `kwargs` is `()` or an empty map; `None`, or a struct in place of the
/// positional list, is still an argument. JSON objects are written with their keys sorted, so the hash does not
/// depend on the order keyword arguments were collected in.
pub fn arg_hash<A, K>(args: &A, kwargs: &K) -> Result<Hash32, CacheError>
where
    A: Serialize + ?Sized,
    K: Serialize + ?Sized,
{
    let args_value = serde_json::to_value(args)?;
    let kwargs_value = serde_json::to_value(kwargs)?;

    if no_positional(args, &args_value) && no_keywords(kwargs, &kwargs_value) {
        return Ok(Hash32::hash(NO_ARGUMENTS));
    }

    Ok(Hash32::hash(format!("{args_value}{kwargs_value}")))
}

/// A configuration tree that wrapped functions read their [`Cache`] settings
/// from on every call.
pub type SharedConfig = Arc<RwLock<serde_json::Value>>;

/// Where and whether results are cached.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cache {
    dir: Utf8PathBuf,
    skip: bool,
}

impl Cache {
    pub fn new(dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            skip: false,
        }
    }

    /// Always recompute, overwriting stored results.
    pub fn skip(mut self, skip: bool) -> Self {
        self.skip = skip;
        self
    }

    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    /// Reads `cache_path` and `cache_skip` from a configuration tree. Without
    /// a `cache_path`, the current directory is used.
    pub fn from_config(tree: &serde_json::Value) -> Result<Self, CacheError> {
        let skip = tree
            .get("cache_skip")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);

        let dir = match tree.get("cache_path").and_then(serde_json::Value::as_str) {
            Some(path) if !path.is_empty() => Utf8PathBuf::from(path),
            _ => {
                let cwd = std::env::current_dir()
                    .and_then(|cwd| Utf8PathBuf::try_from(cwd).map_err(|e| e.into_io_error()))
                    .map_err(|source| CacheError::Io {
                        path: Utf8PathBuf::from("."),
                        source,
                    })?;
                warn!("'cache_path' configuration not set; using {cwd}");
                cwd
            }
        };

        Ok(Self { dir, skip })
    }

    /// Location of the stored result of `name` called with arguments
    /// hashing to `hash`.
    pub fn path(&self, name: &str, hash: Hash32) -> Utf8PathBuf {
        self.dir.join(format!("{name}-{hash}.cbor"))
    }

    pub fn wrap<F>(&self, name: impl Into<String>, func: F) -> Cached<F> {
        Cached {
            name: name.into(),
            settings: Settings::Fixed(self.clone()),
            func,
        }
    }
}

enum Settings {
    Fixed(Cache),
    Config(SharedConfig),
}

/// A function whose results are cached. See [`Cache::wrap`].
pub struct Cached<F> {
    name: String,
    settings: Settings,
    func: F,
}

impl<F> Cached<F> {
    /// Wraps `func` so each call reads `cache_path` and `cache_skip` from the
    /// current state of `config`.
    pub fn with_config(name: impl Into<String>, config: SharedConfig, func: F) -> Self {
        Self {
            name: name.into(),
            settings: Settings::Config(config),
            func,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The settings the next call will use.
    pub fn cache(&self) -> Result<Cache, CacheError> {
        match &self.settings {
            Settings::Fixed(cache) => Ok(cache.clone()),
            Settings::Config(config) => {
                let tree = config.read().unwrap_or_else(PoisonError::into_inner);
                Cache::from_config(&tree)
            }
        }
    }

    /// Calls the function, or returns the stored result of an earlier call
    /// with the same arguments.
    pub fn call<A, K, T>(&self, args: &A, kwargs: &K) -> Result<T, CacheError>
    where
        F: Fn(&A, &K) -> anyhow::Result<T>,
        A: Serialize + ?Sized,
        K: Serialize + ?Sized,
        T: Serialize + DeserializeOwned,
    {
        let cache = self.cache()?;
        let hash = arg_hash(args, kwargs)?;
        let path = cache.path(&self.name, hash);

        let hex = hash.to_hex();
        let short = format!("{}(<{}…>)", self.name, &hex[..8]);

        if !cache.skip && path.exists() {
            info!("Cache hit for {short}");
            return read(&path);
        }

        info!("Cache miss for {short}");
        let value = (self.func)(args, kwargs).map_err(|source| CacheError::Call {
            name: self.name.clone(),
            source,
        })?;

        write(&path, &value)?;
        Ok(value)
    }
}

fn read<T: DeserializeOwned>(path: &Utf8Path) -> Result<T, CacheError> {
    let file = File::open(path).map_err(|source| CacheError::Io {
        path: path.to_owned(),
        source,
    })?;

    ciborium::from_reader(BufReader::new(file)).map_err(|source| CacheError::Decode {
        path: path.to_owned(),
        source,
    })
}

fn write<T: Serialize>(path: &Utf8Path, value: &T) -> Result<(), CacheError> {
    let file = File::create(path).map_err(|source| CacheError::Io {
        path: path.to_owned(),
        source,
    })?;

    ciborium::into_writer(value, BufWriter::new(file)).map_err(|source| CacheError::Encode {
        path: path.to_owned(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn scratch() -> (tempfile::TempDir, Cache) {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        (dir, Cache::new(path))
    }

    fn artifacts(cache: &Cache) -> usize {
        std::fs::read_dir(cache.dir()).unwrap().count()
    }

    #[test]
    fn test_arg_hash() {
        let none: [i64; 0] = [];
        let empty = BTreeMap::<String, i64>::new();

        let h0 = arg_hash(&none, &empty).unwrap();
        assert_eq!(h0, arg_hash(&(), &()).unwrap());
        assert_ne!(h0, Hash32::hash(""));

        let h1 = arg_hash(&[1, 2], &empty).unwrap();
        assert_eq!(h1, arg_hash(&vec![1, 2], &empty).unwrap());
        assert_ne!(h1, arg_hash(&[2, 1], &empty).unwrap());

        // Keyword order is irrelevant
        let mut a = BTreeMap::new();
        a.insert("x", 1);
        a.insert("y", 2);
        let b: std::collections::HashMap<_, _> = [("y", 2), ("x", 1)].into_iter().collect();
        assert_eq!(arg_hash(&none, &a).unwrap(), arg_hash(&none, &b).unwrap());

        // None, or a struct in place of the positional list, is an argument
        #[derive(Serialize)]
        struct Options {}
        assert_ne!(arg_hash(&None::<i64>, &()).unwrap(), h0);
        assert_ne!(arg_hash(&Options {}, &()).unwrap(), h0);
        assert_ne!(arg_hash(&none, &none).unwrap(), h0);
        assert_ne!(
            arg_hash(&None::<i64>, &()).unwrap(),
            arg_hash(&Options {}, &()).unwrap()
        );

        // Paths hash as their text
        let path = Utf8PathBuf::from("data/in.csv");
        assert_eq!(
            arg_hash(&[&path], &empty).unwrap(),
            arg_hash(&["data/in.csv"], &empty).unwrap()
        );
    }

    #[test]
    fn test_hit_and_miss() {
        let (_dir, cache) = scratch();
        let calls = AtomicUsize::new(0);

        let cached = cache.wrap("load", |args: &[i64], _: &BTreeMap<String, i64>| -> anyhow::Result<i64> {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(args.iter().sum::<i64>())
        });

        let kwargs = BTreeMap::new();
        assert_eq!(cached.call(&[1i64, 2, 3][..], &kwargs).unwrap(), 6);
        assert_eq!(cached.call(&[1i64, 2, 3][..], &kwargs).unwrap(), 6);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(artifacts(&cache), 1);

        let stored = cache.path("load", arg_hash(&[1i64, 2, 3][..], &kwargs).unwrap());
        assert!(stored.exists());
        assert!(stored.file_name().unwrap().starts_with("load-"));
        assert_eq!(stored.extension(), Some("cbor"));
    }

    #[test]
    fn test_distinct_kwargs() {
        let (_dir, cache) = scratch();
        let calls = AtomicUsize::new(0);

        let cached = cache.wrap("scale", |args: &[f64; 1], kwargs: &BTreeMap<String, f64>| -> anyhow::Result<f64> {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(args[0] * kwargs.get("factor").copied().unwrap_or(1.0))
        });

        let mut kwargs = BTreeMap::new();
        kwargs.insert(String::from("factor"), 2.0);
        assert_eq!(cached.call(&[3.0], &kwargs).unwrap(), 6.0);

        kwargs.insert(String::from("factor"), 3.0);
        assert_eq!(cached.call(&[3.0], &kwargs).unwrap(), 9.0);

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(artifacts(&cache), 2);
    }

    #[test]
    fn test_skip() {
        let (_dir, cache) = scratch();
        let cache = cache.skip(true);
        let calls = AtomicUsize::new(0);

        let cached = cache.wrap("noargs", |_: &(), _: &()| -> anyhow::Result<String> {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(String::from("value"))
        });

        assert_eq!(cached.call(&(), &()).unwrap(), "value");
        assert_eq!(cached.call(&(), &()).unwrap(), "value");

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(artifacts(&cache), 1);
    }

    #[test]
    fn test_call_error() {
        let (_dir, cache) = scratch();
        let cached = cache.wrap("broken", |_: &(), _: &()| -> anyhow::Result<i64> {
            anyhow::bail!("no data")
        });

        let err = cached.call(&(), &()).unwrap_err();
        assert!(matches!(err, CacheError::Call { ref name, .. } if name == "broken"));
        assert_eq!(artifacts(&cache), 0);
    }

    #[test]
    fn test_from_config() {
        let tree = serde_json::json!({"cache_path": "/tmp/lazygraph", "cache_skip": true});
        let cache = Cache::from_config(&tree).unwrap();

        assert_eq!(cache.dir().as_str(), "/tmp/lazygraph");
        assert_eq!(cache, Cache::new("/tmp/lazygraph").skip(true));

        let fallback = Cache::from_config(&serde_json::json!({})).unwrap();
        assert!(fallback.dir().is_absolute());
        assert!(!fallback.skip);
    }
}
