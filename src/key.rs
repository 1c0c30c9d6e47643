//! Identifiers for the quantities stored in a [`Graph`](crate::Graph).
//!
//! A [`Key`] is a name, a list of dimensions and an optional tag, written as
//! `name:dim1-dim2:tag`. The dimension list keeps the order it was given in,
//! but two keys that differ only in the order of their dimensions compare and
//! hash equal, so either spelling finds the same entry.
//!
//! Plain strings without a `:` are *bare names*. [`KeyExpr::parse`] is the
//! single place that tells the two apart; [`KeyLike`] carries the result.

use std::cmp::Ordering;
use std::fmt::{self, Debug, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::ops::{Add, Div, Mul};
use std::str::FromStr;

use tracing::warn;

use crate::error::KeyError;

/// Anything that exposes a name and a list of dimensions, such as a labelled
/// array, and can therefore be turned into a [`Key`].
pub trait QuantityLike {
    fn name(&self) -> &str;
    fn dims(&self) -> Vec<String>;
}

/// The things a [`Key`] can be built from.
pub enum KeySource<'a> {
    /// Text in `name:dims:tag` syntax.
    Text(&'a str),
    /// Another key.
    Key(&'a Key),
    /// A quantity; only its name and dimensions are used.
    Quantity(&'a dyn QuantityLike),
}

impl<'a> From<&'a str> for KeySource<'a> {
    fn from(value: &'a str) -> Self {
        KeySource::Text(value)
    }
}

impl<'a> From<&'a String> for KeySource<'a> {
    fn from(value: &'a String) -> Self {
        KeySource::Text(value)
    }
}

impl<'a> From<&'a Key> for KeySource<'a> {
    fn from(value: &'a Key) -> Self {
        KeySource::Key(value)
    }
}

impl KeySource<'_> {
    fn into_parts(self) -> Result<(String, Vec<String>, Option<String>), KeyError> {
        match self {
            KeySource::Text(text) => {
                let key = Key::parse(text)?;
                Ok((key.name, key.dims, key.tag))
            }
            KeySource::Key(key) => Ok((key.name.clone(), key.dims.clone(), key.tag.clone())),
            KeySource::Quantity(qty) => Ok((qty.name().to_string(), qty.dims(), None)),
        }
    }

    fn describe(&self) -> String {
        match self {
            KeySource::Text(text) => format!("{text:?}"),
            KeySource::Key(key) => format!("{key:?}"),
            KeySource::Quantity(qty) => format!("quantity '{}'", qty.name()),
        }
    }
}

/// An immutable, hashable identifier for a quantity.
#[derive(Clone)]
pub struct Key {
    name: String,
    dims: Vec<String>,
    tag: Option<String>,
    /// `name:dims:tag` in the stored dimension order.
    repr: String,
    /// Same, with dimensions sorted. Equality, hashing and
    /// ordering all go through this.
    ident: String,
}

fn render<'a>(name: &str, dims: impl IntoIterator<Item = &'a str>, tag: Option<&str>) -> String {
    let mut out = String::from(name);
    let mut dims = dims.into_iter().peekable();

    if dims.peek().is_some() || tag.is_some() {
        out.push(':');
    }

    for (i, dim) in dims.enumerate() {
        if i > 0 {
            out.push('-');
        }
        out.push_str(dim);
    }

    if let Some(tag) = tag {
        out.push(':');
        out.push_str(tag);
    }

    out
}

impl Key {
    fn from_parts(name: String, dims: Vec<String>, tag: Option<String>) -> Self {
        let tag = tag.filter(|tag| !tag.is_empty());
        let repr = render(&name, dims.iter().map(String::as_str), tag.as_deref());

        let mut sorted: Vec<&str> = dims.iter().map(String::as_str).collect();
        sorted.sort_unstable();
        let ident = render(&name, sorted, tag.as_deref());

        Self {
            name,
            dims,
            tag,
            repr,
            ident,
        }
    }

    /// A key with no dimensions and no tag. `name` is taken as-is.
    pub fn bare(name: impl Into<String>) -> Self {
        Self::from_parts(name.into(), Vec::new(), None)
    }

    /// A key with the given dimensions and no tag. `name` is taken as-is.
    pub fn new<I, S>(name: impl Into<String>, dims: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_parts(name.into(), dims.into_iter().map(Into::into).collect(), None)
    }

    /// A key with the given dimensions and tag. `name` is taken as-is.
    pub fn tagged<I, S>(name: impl Into<String>, dims: I, tag: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_parts(
            name.into(),
            dims.into_iter().map(Into::into).collect(),
            Some(tag.into()),
        )
    }

    /// Parses `name[:dims[:tag]]`, where `dims` is a `-`-separated list of
    /// non-empty dimension names and neither `name` nor `tag` contain `:`.
    pub fn parse(text: &str) -> Result<Self, KeyError> {
        let invalid = || KeyError::InvalidExpression(text.to_string());

        let mut parts = text.splitn(3, ':');
        let name = parts.next().unwrap_or_default();
        let dims = parts.next().unwrap_or_default();
        let tag = parts.next().unwrap_or_default();

        if name.trim().is_empty() || tag.contains(':') {
            return Err(invalid());
        }

        let dims = if dims.is_empty() {
            Vec::new()
        } else {
            let dims: Vec<String> = dims.split('-').map(str::to_string).collect();
            if dims.iter().any(String::is_empty) {
                return Err(invalid());
            }
            for (i, dim) in dims.iter().enumerate() {
                if dims[..i].contains(dim) {
                    return Err(invalid());
                }
            }
            dims
        };

        Ok(Self::from_parts(
            name.to_string(),
            dims,
            Some(tag.to_string()),
        ))
    }

    /// Builds a key from `source`, adding `dims` and `tag` where the source
    /// has none. Supplying either when the source already carries one is a
    /// conflict rather than a silent override.
    pub fn from_source<'a, I, S>(
        source: impl Into<KeySource<'a>>,
        dims: I,
        tag: Option<&str>,
    ) -> Result<Self, KeyError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let source = source.into();
        let described = source.describe();
        let (name, parsed_dims, parsed_tag) = source.into_parts()?;
        let dims: Vec<String> = dims.into_iter().map(Into::into).collect();
        let tag = tag.filter(|tag| !tag.is_empty());

        if !parsed_dims.is_empty() && !dims.is_empty() {
            return Err(KeyError::Conflict {
                field: "dims",
                given: dims.join("-"),
                parsed: parsed_dims.join("-"),
                origin: described,
            });
        }

        if let (Some(parsed), Some(given)) = (&parsed_tag, tag) {
            return Err(KeyError::Conflict {
                field: "tag",
                given: given.to_string(),
                parsed: parsed.clone(),
                origin: described,
            });
        }

        let dims = if parsed_dims.is_empty() { dims } else { parsed_dims };
        let tag = parsed_tag.or_else(|| tag.map(str::to_string));

        Ok(Self::from_parts(name, dims, tag))
    }

    /// The key for a quantity: its name and dimensions, no tag.
    pub fn from_quantity(quantity: &dyn QuantityLike) -> Self {
        Self::from_parts(quantity.name().to_string(), quantity.dims(), None)
    }

    /// Builds a key from `source`, then drops `drop`, appends `append` and
    /// adds `tag`, in that order.
    pub fn with_parts<'a>(
        source: impl Into<KeySource<'a>>,
        drop: &[&str],
        append: &[&str],
        tag: Option<&str>,
    ) -> Result<Self, KeyError> {
        let base = Self::from_source(source, Vec::<String>::new(), None)?;
        let key = base.drop(drop).append(append);

        Ok(match tag {
            Some(tag) => key.add_tag(tag),
            None => key,
        })
    }

    /// A key whose dimensions are the union of those of `keys`, ordered by
    /// first appearance.
    pub fn product<'a>(
        name: impl Into<String>,
        keys: impl IntoIterator<Item = &'a Key>,
        tag: Option<&str>,
    ) -> Self {
        let mut dims: Vec<String> = Vec::new();

        for key in keys {
            for dim in &key.dims {
                if !dims.contains(dim) {
                    dims.push(dim.clone());
                }
            }
        }

        Self::from_parts(name.into(), dims, tag.map(str::to_string))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dims(&self) -> &[String] {
        &self.dims
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// The same key with its dimensions sorted alphabetically.
    pub fn sorted(&self) -> Self {
        let mut dims = self.dims.clone();
        dims.sort();
        Self::from_parts(self.name.clone(), dims, self.tag.clone())
    }

    pub fn rename(&self, name: impl Into<String>) -> Self {
        Self::from_parts(name.into(), self.dims.clone(), self.tag.clone())
    }

    /// The same key without the dimensions in `dims`.
    pub fn drop<S: AsRef<str>>(&self, dims: &[S]) -> Self {
        let remaining = self
            .dims
            .iter()
            .filter(|dim| !dims.iter().any(|drop| drop.as_ref() == dim.as_str()))
            .cloned()
            .collect();

        Self::from_parts(self.name.clone(), remaining, self.tag.clone())
    }

    /// The same key with zero dimensions.
    pub fn drop_all(&self) -> Self {
        Self::from_parts(self.name.clone(), Vec::new(), self.tag.clone())
    }

    /// The same key with `dims` added at the end.
    pub fn append<S: AsRef<str>>(&self, dims: &[S]) -> Self {
        let mut all = self.dims.clone();
        all.extend(dims.iter().map(|dim| dim.as_ref().to_string()));
        Self::from_parts(self.name.clone(), all, self.tag.clone())
    }

    /// The same key with `tag` added. An existing tag is kept and joined to
    /// the new one with `+`.
    pub fn add_tag(&self, tag: &str) -> Self {
        let tag = match (&self.tag, tag.is_empty()) {
            (Some(old), false) => Some(format!("{old}+{tag}")),
            (Some(old), true) => Some(old.clone()),
            (None, _) => Some(tag.to_string()),
        };
        Self::from_parts(self.name.clone(), self.dims.clone(), tag)
    }

    /// Every partial sum of this key: for `n` dimensions, the `2^n - 1` ways
    /// of keeping a strict subset of them and summing over the rest.
    ///
    /// Subsets are enumerated as binary numbers counting up from zero, with
    /// the first dimension as the most significant bit, so the first item is
    /// the total over every dimension.
    pub fn iter_sums(&self) -> impl Iterator<Item = PartialSum> + '_ {
        let n = self.dims.len();
        let total = match u32::try_from(n).ok().and_then(|n| 1u64.checked_shl(n)) {
            Some(all) => all - 1,
            None => {
                warn!("{self}: {n} dimensions are too many to enumerate partial sums");
                0
            }
        };

        (0..total).map(move |mask| {
            let mut kept = Vec::new();
            let mut summed = Vec::new();

            for (i, dim) in self.dims.iter().enumerate() {
                if mask & (1 << (n - 1 - i)) != 0 {
                    kept.push(dim.clone());
                } else {
                    summed.push(dim.clone());
                }
            }

            PartialSum {
                key: Self::from_parts(self.name.clone(), kept, self.tag.clone()),
                sum_over: summed,
                source: self.clone(),
            }
        })
    }
}

/// One entry yielded by [`Key::iter_sums`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartialSum {
    /// Key of the partial sum.
    pub key: Key,
    /// Dimensions aggregated away.
    pub sum_over: Vec<String>,
    /// The full key being summed.
    pub source: Key,
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.ident == other.ident
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ident.hash(state);
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        self.ident.cmp(&other.ident)
    }
}

impl Display for Key {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr)
    }
}

impl Debug for Key {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", self.repr)
    }
}

impl FromStr for Key {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Key::parse(s)
    }
}

impl Add<&str> for &Key {
    type Output = Key;

    fn add(self, tag: &str) -> Key {
        self.add_tag(tag)
    }
}

impl Add<&str> for Key {
    type Output = Key;

    fn add(self, tag: &str) -> Key {
        self.add_tag(tag)
    }
}

impl Mul<&str> for &Key {
    type Output = Key;

    fn mul(self, dim: &str) -> Key {
        self.append(&[dim])
    }
}

impl Mul<&str> for Key {
    type Output = Key;

    fn mul(self, dim: &str) -> Key {
        self.append(&[dim])
    }
}

impl Div<&str> for &Key {
    type Output = Key;

    fn div(self, dim: &str) -> Key {
        self.drop(&[dim])
    }
}

impl Div<&str> for Key {
    type Output = Key;

    fn div(self, dim: &str) -> Key {
        self.drop(&[dim])
    }
}

/// Conversion into a [`KeyLike`], parsing text where needed.
pub trait ToKeyLike {
    fn to_keylike(&self) -> Result<KeyLike, KeyError>;
}

impl ToKeyLike for str {
    fn to_keylike(&self) -> Result<KeyLike, KeyError> {
        KeyLike::parse(self)
    }
}

impl ToKeyLike for String {
    fn to_keylike(&self) -> Result<KeyLike, KeyError> {
        KeyLike::parse(self)
    }
}

impl ToKeyLike for Key {
    fn to_keylike(&self) -> Result<KeyLike, KeyError> {
        Ok(KeyLike::from(self))
    }
}

impl ToKeyLike for KeyLike {
    fn to_keylike(&self) -> Result<KeyLike, KeyError> {
        Ok(self.clone())
    }
}

impl<T: ToKeyLike + ?Sized> ToKeyLike for &T {
    fn to_keylike(&self) -> Result<KeyLike, KeyError> {
        (**self).to_keylike()
    }
}

/// Result of classifying a piece of text as a key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeyExpr {
    /// Text without any `:`, used verbatim (minus surrounding whitespace).
    BareName(String),
    /// Text in full key syntax.
    FullKey(Key),
}

impl KeyExpr {
    pub fn parse(text: &str) -> Result<Self, KeyError> {
        let trimmed = text.trim();

        if trimmed.is_empty() {
            return Err(KeyError::InvalidExpression(text.to_string()));
        }

        if !trimmed.contains(':') {
            return Ok(KeyExpr::BareName(trimmed.to_string()));
        }

        Key::parse(trimmed).map(KeyExpr::FullKey)
    }
}

/// A graph identifier: either a bare name or a structured [`Key`].
///
/// A key with neither dimensions nor tag is always represented as a bare
/// name, so `"foo"` and `Key::bare("foo")` identify the same entry.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyLike {
    Name(String),
    Key(Key),
}

impl KeyLike {
    pub fn parse(text: &str) -> Result<Self, KeyError> {
        Ok(match KeyExpr::parse(text)? {
            KeyExpr::BareName(name) => KeyLike::Name(name),
            KeyExpr::FullKey(key) => KeyLike::from(key),
        })
    }

    pub fn name(&self) -> &str {
        match self {
            KeyLike::Name(name) => name,
            KeyLike::Key(key) => key.name(),
        }
    }

    pub fn as_key(&self) -> Option<&Key> {
        match self {
            KeyLike::Name(_) => None,
            KeyLike::Key(key) => Some(key),
        }
    }

    /// The structured form; a bare name becomes a zero-dimensional key.
    pub fn to_key(&self) -> Key {
        match self {
            KeyLike::Name(name) => Key::bare(name.clone()),
            KeyLike::Key(key) => key.clone(),
        }
    }

    pub fn dims(&self) -> &[String] {
        match self {
            KeyLike::Name(_) => &[],
            KeyLike::Key(key) => key.dims(),
        }
    }

    /// The form under which this identifier is stored in the order-insensitive
    /// index.
    pub(crate) fn sorted(&self) -> Self {
        match self {
            KeyLike::Name(name) => KeyLike::Name(name.clone()),
            KeyLike::Key(key) => KeyLike::Key(key.sorted()),
        }
    }

    /// The zero-dimensional form, used by the full-key index.
    pub(crate) fn nodim(&self) -> Key {
        match self {
            KeyLike::Name(name) => Key::bare(name.clone()),
            KeyLike::Key(key) => key.drop_all(),
        }
    }
}

impl From<Key> for KeyLike {
    fn from(key: Key) -> Self {
        if key.dims.is_empty() && key.tag.is_none() {
            KeyLike::Name(key.name)
        } else {
            KeyLike::Key(key)
        }
    }
}

impl From<&Key> for KeyLike {
    fn from(key: &Key) -> Self {
        KeyLike::from(key.clone())
    }
}

impl FromStr for KeyLike {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        KeyLike::parse(s)
    }
}

impl TryFrom<&str> for KeyLike {
    type Error = KeyError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        KeyLike::parse(value)
    }
}

impl PartialEq<Key> for KeyLike {
    fn eq(&self, other: &Key) -> bool {
        *self == KeyLike::from(other)
    }
}

impl PartialEq<&str> for KeyLike {
    fn eq(&self, other: &&str) -> bool {
        KeyLike::parse(other).is_ok_and(|other| *self == other)
    }
}

impl PartialEq<&str> for Key {
    fn eq(&self, other: &&str) -> bool {
        Key::parse(other).is_ok_and(|other| *self == other)
    }
}

impl Display for KeyLike {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            KeyLike::Name(name) => f.write_str(name),
            KeyLike::Key(key) => Display::fmt(key, f),
        }
    }
}

impl Debug for KeyLike {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            KeyLike::Name(name) => write!(f, "'{name}'"),
            KeyLike::Key(key) => Debug::fmt(key, f),
        }
    }
}
