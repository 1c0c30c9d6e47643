use std::collections::BTreeMap;

use super::Computer;
use super::add::to_input;
use crate::error::Error;
use crate::item::{AddOptions, Added, Arg, Severity};
use crate::key::ToKeyLike;
use crate::task::{Call, Input, Kwargs, Operator, Task, value};

/// Group labels along one dimension: group name to member labels.
pub type Groups = BTreeMap<String, Vec<String>>;

/// What [`Computer::aggregate`] aggregates over.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Grouping {
    /// Dimensions summed away.
    Dims(Vec<String>),
    /// Labels summed into named groups, keyed by dimension. Only one
    /// dimension is supported.
    Groups(BTreeMap<String, Groups>),
}

impl From<&str> for Grouping {
    fn from(dim: &str) -> Self {
        Grouping::Dims(vec![dim.to_string()])
    }
}

impl From<String> for Grouping {
    fn from(dim: String) -> Self {
        Grouping::Dims(vec![dim])
    }
}

impl From<Vec<String>> for Grouping {
    fn from(dims: Vec<String>) -> Self {
        Grouping::Dims(dims)
    }
}

impl From<&[&str]> for Grouping {
    fn from(dims: &[&str]) -> Self {
        Grouping::Dims(dims.iter().map(|dim| dim.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for Grouping {
    fn from(dims: [&str; N]) -> Self {
        Grouping::from(&dims[..])
    }
}

impl From<BTreeMap<String, Groups>> for Grouping {
    fn from(groups: BTreeMap<String, Groups>) -> Self {
        Grouping::Groups(groups)
    }
}

/// A dimension name as text, or a [`Grouping`], dimension list or groups
/// mapping as a value.
impl TryFrom<Arg> for Grouping {
    type Error = Error;

    fn try_from(arg: Arg) -> Result<Self, Error> {
        if let Arg::Named(dim) = arg {
            return Ok(Grouping::from(dim));
        }

        if let Some(grouping) = arg.downcast::<Grouping>() {
            Ok(grouping.clone())
        } else if let Some(dims) = arg.downcast::<Vec<String>>() {
            Ok(Grouping::Dims(dims.clone()))
        } else if let Some(groups) = arg.downcast::<BTreeMap<String, Groups>>() {
            Ok(Grouping::Groups(groups.clone()))
        } else {
            Err(Error::usage(format!(
                "{arg:?} is neither dimensions nor groups"
            )))
        }
    }
}

/// Options of [`Computer::aggregate`].
#[derive(Clone, Debug)]
pub struct Aggregation {
    /// Passed to the `"sum"` operator after the quantity.
    pub weights: Option<Input>,
    /// Passed to the `"aggregate"` operator: also return the members of each
    /// group.
    pub keep: bool,
    /// Also add the partial sums of the new key.
    pub sums: bool,
    /// Policy for adding the partial sums.
    pub fail: Option<Severity>,
}

impl Default for Aggregation {
    fn default() -> Self {
        Self {
            weights: None,
            keep: true,
            sums: false,
            fail: None,
        }
    }
}

impl Aggregation {
    pub fn weights(mut self, weights: impl Into<Arg>) -> Result<Self, Error> {
        self.weights = Some(to_input(weights.into())?);
        Ok(self)
    }

    pub fn keep(mut self, keep: bool) -> Self {
        self.keep = keep;
        self
    }

    pub fn sums(mut self) -> Self {
        self.sums = true;
        self
    }

    pub fn fail(mut self, fail: Severity) -> Self {
        self.fail = Some(fail);
        self
    }
}

/// How [`Computer::disaggregate`] finds its operator.
#[derive(Clone, Debug)]
pub enum Method {
    /// The registered operator `disaggregate_{name}`.
    Named(String),
    Op(Operator),
}

impl Default for Method {
    fn default() -> Self {
        Method::Named(String::from("shares"))
    }
}

impl From<&str> for Method {
    fn from(name: &str) -> Self {
        Method::Named(name.to_string())
    }
}

impl From<Operator> for Method {
    fn from(op: Operator) -> Self {
        Method::Op(op)
    }
}

impl Computer {
    /// Adds the aggregate of `qty`, tagged with `tag`. `qty` is looked up
    /// as it is stored, and a bare name stored on its own is used as is.
    ///
    /// Over dimensions, the new key drops them and the task calls the
    /// `"sum"` operator with a `dimensions` keyword. Over groups, the key
    /// keeps its dimensions and the task calls the `"aggregate"` operator
    /// with the groups and [`Aggregation::keep`].
    ///
    /// The task is added strictly, so `qty` must already exist.
    pub fn aggregate(
        &mut self,
        qty: impl ToKeyLike,
        tag: &str,
        grouping: impl Into<Grouping>,
        aggregation: Aggregation,
    ) -> Result<Added, Error> {
        let qty = self.check_one(qty)?;
        let source = qty.to_key();

        let (key, task) = match grouping.into() {
            Grouping::Dims(dims) => {
                let mut inputs = vec![Input::Ref(qty)];
                inputs.extend(aggregation.weights);

                let mut kwargs = Kwargs::new();
                kwargs.insert(String::from("dimensions"), value(dims.clone()));

                let task = Task::Call(Call {
                    op: self.require_operator("sum")?,
                    inputs,
                    kwargs,
                });
                (source.drop(&dims).add_tag(tag), task)
            }
            Grouping::Groups(groups) => {
                if groups.len() > 1 {
                    return Err(Error::usage("aggregate() along more than one dimension"));
                }

                let task = Task::call(
                    self.require_operator("aggregate")?,
                    [
                        Input::Ref(qty),
                        Input::value(groups),
                        Input::value(aggregation.keep),
                    ],
                );
                (source.add_tag(tag), task)
            }
        };

        let options = AddOptions {
            strict: true,
            sums: aggregation.sums,
            fail: aggregation.fail,
            ..AddOptions::default()
        };
        self.insert_task(key.into(), task, options)
    }

    /// Adds `qty` disaggregated along the new dimension `new_dim`, calling
    /// the operator of `method` with `qty` followed by `args` (usually the
    /// key of the shares).
    ///
    /// The task is added strictly, so `qty` and `args` must already exist.
    pub fn disaggregate(
        &mut self,
        qty: impl ToKeyLike,
        new_dim: &str,
        method: impl Into<Method>,
        args: Vec<Arg>,
    ) -> Result<Added, Error> {
        let qty = self.check_one(qty)?;
        let key = qty.to_key().append(&[new_dim]);

        let op = match method.into() {
            Method::Op(op) => op,
            Method::Named(name) => {
                let name = format!("disaggregate_{name}");
                self.get_operator(&name)
                    .cloned()
                    .ok_or_else(|| Error::usage(format!("No disaggregation method '{name}'")))?
            }
        };

        let mut inputs = vec![Input::Ref(qty)];
        for arg in args {
            inputs.push(to_input(arg)?);
        }

        let options = AddOptions::strict();
        self.insert_task(key.into(), Task::call(op, inputs), options)
    }
}
