use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};

use super::Computer;
use crate::error::Error;
use crate::item::{Added, Item, Severity};
use crate::key::KeyLike;

struct Pending {
    item: Item,
    /// Attempts so far, including the one in progress.
    count: usize,
}

#[derive(Debug)]
enum Step {
    Done(Added),
    /// Try again after the rest of the queue.
    Retry,
    /// Out of attempts; report and carry on.
    Discard(Error),
    /// Out of attempts; report and stop.
    Fail(Error),
    /// Not a key error: stop without retrying.
    Propagate(Error),
}

fn step(result: Result<Added, Error>, count: usize, max_tries: usize, fail: Severity) -> Step {
    match result {
        Ok(added) => Step::Done(added),
        Err(err) if !err.is_key_error() => Step::Propagate(err),
        Err(_) if count < max_tries => Step::Retry,
        Err(err) if fail.is_fatal() => Step::Fail(err),
        Err(err) => Step::Discard(err),
    }
}

/// Makes `fail` the policy of every queue nested in one attempt.
struct FailScope<'a> {
    computer: &'a mut Computer,
}

impl<'a> FailScope<'a> {
    fn new(computer: &'a mut Computer, fail: Severity) -> Self {
        computer.fail_stack.push(fail);
        Self { computer }
    }
}

impl Drop for FailScope<'_> {
    fn drop(&mut self) {
        self.computer.fail_stack.pop();
    }
}

impl Deref for FailScope<'_> {
    type Target = Computer;

    fn deref(&self) -> &Computer {
        self.computer
    }
}

impl DerefMut for FailScope<'_> {
    fn deref_mut(&mut self) -> &mut Computer {
        self.computer
    }
}

impl Computer {
    /// Adds every item, in order, through [`Computer::add`].
    ///
    /// An item that fails because a key is missing (or already present) goes
    /// to the back of the queue, up to `max_tries` attempts in all, so items
    /// may refer to keys added by later ones. After the last attempt the
    /// failure is logged at the `fail` severity; at [`Severity::Error`] and
    /// above it is also returned and the rest of the queue is abandoned.
    /// Without `fail`, the policy of the enclosing queue applies.
    ///
    /// Returns the keys of every item that was added.
    pub fn add_queue(
        &mut self,
        items: impl IntoIterator<Item = Item>,
        max_tries: usize,
        fail: Option<Severity>,
    ) -> Result<Vec<KeyLike>, Error> {
        let fail = fail.unwrap_or_else(|| self.current_fail());

        let mut queue: VecDeque<Pending> = items
            .into_iter()
            .map(|item| Pending { item, count: 1 })
            .collect();
        let mut added = Vec::new();

        while let Some(mut pending) = queue.pop_front() {
            let result = FailScope::new(self, fail).add(pending.item.clone());

            match step(result, pending.count, max_tries, fail) {
                Step::Done(keys) => added.extend(keys.into_vec()),
                Step::Retry => {
                    pending.count += 1;
                    queue.push_back(pending);
                }
                Step::Discard(err) => discarded(&pending, max_tries, fail, &err),
                Step::Fail(err) => {
                    discarded(&pending, max_tries, fail, &err);
                    return Err(err);
                }
                Step::Propagate(err) => return Err(err),
            }
        }

        Ok(added)
    }
}

fn discarded(pending: &Pending, max_tries: usize, fail: Severity, err: &Error) {
    fail.log(&format!(
        "Failed {} time(s), discarded (max {max_tries}):\n    {:?}\n    with {err:?}",
        pending.count, pending.item
    ));
}
