use std::collections::HashMap;

use crate::task::{Dynamic, Kwargs, Operator};

/// A named collection of [`Operator`]s.
///
/// A [`Computer`](crate::Computer) searches its modules from the most
/// recently required one backwards, so a later module can shadow an operator
/// of an earlier one.
#[derive(Clone, Debug, Default)]
pub struct Module {
    name: String,
    operators: HashMap<String, Operator>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            operators: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds `operator`, keyed by its own name.
    pub fn with(mut self, operator: Operator) -> Self {
        self.operators.insert(operator.name().to_string(), operator);
        self
    }

    /// Shorthand for [`Module::with`] and [`Operator::new`].
    pub fn with_fn<F>(self, name: &str, func: F) -> Self
    where
        F: Fn(&[Dynamic], &Kwargs) -> anyhow::Result<Dynamic> + Send + Sync + 'static,
    {
        self.with(Operator::new(name, func))
    }

    pub fn get(&self, name: &str) -> Option<&Operator> {
        self.operators.get(name)
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }
}
