//! # Deferred Property Resolution
//!
//! Some property values live only on the remote side. A read of such a property
//! parks a continuation here, triggers a fetch, and returns to the event loop
//! without answering. The continuation runs when the matching value arrives.
//!
//! ## Correlation
//!
//! Every fetch is tagged with a monotonically increasing `FetchId`. A reply that
//! echoes its id resolves exactly that continuation. A reply without an id falls
//! back to arrival order: the oldest continuation for the property wins.
//!
//! ## Invariants
//! - Continuations for one property resolve in FIFO order unless an id says otherwise.
//! - Each continuation runs at most once.
//! - There is no timeout. A continuation whose value never arrives stays parked
//!   until `abandon_all` drops it.
//! - A reply that arrives but cannot be used still consumes its continuation,
//!   through `fail`, so later replies keep their FIFO position.

use std::collections::HashMap;
use std::collections::VecDeque;

use crate::error::BusError;
use crate::value::Value;

/// What a fetch delivers: the value, or the error to answer the read with.
pub type FetchOutcome = std::result::Result<Value, BusError>;

/// Work to run once a fetch settles.
pub type Continuation = Box<dyn FnOnce(FetchOutcome)>;

/// Correlation id carried by an outbound fetch.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct FetchId(pub u64);

impl std::fmt::Display for FetchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "fetch-{}", self.0)
    }
}

struct Waiter {
    id: FetchId,
    continuation: Continuation,
}

/// Per-property FIFO queues of parked continuations.
pub struct Resolver {
    queues: HashMap<String, VecDeque<Waiter>>,
    next_id: u64,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Resolver {
    pub fn new() -> Self {
        Self { queues: HashMap::new(), next_id: 1 }
    }

    /// Reserves the id for the next fetch. Reserve before sending, park after.
    pub fn allocate(&mut self) -> FetchId {
        let id = FetchId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Parks a continuation behind every earlier one for `property`.
    pub fn park(&mut self, property: &str, id: FetchId, continuation: Continuation) {
        self.queues
            .entry(property.to_string())
            .or_default()
            .push_back(Waiter { id, continuation });
    }

    /// Delivers a fetched value.
    ///
    /// With `Some(id)` only the continuation carrying that id is resolved; with
    /// `None` the oldest continuation for `property` is. Returns `false` when
    /// nothing was waiting.
    pub fn resolve(&mut self, property: &str, id: Option<FetchId>, value: Value) -> bool {
        self.settle(property, id, Ok(value))
    }

    /// Answers the matching continuation with an error. Matching is the same as `resolve`.
    pub fn fail(&mut self, property: &str, id: Option<FetchId>, error: BusError) -> bool {
        self.settle(property, id, Err(error))
    }

    fn settle(&mut self, property: &str, id: Option<FetchId>, outcome: FetchOutcome) -> bool {
        let Some(queue) = self.queues.get_mut(property) else { return false };

        let waiter = match id {
            Some(id) => queue
                .iter()
                .position(|w| w.id == id)
                .and_then(|index| queue.remove(index)),
            None => queue.pop_front(),
        };
        if queue.is_empty() {
            self.queues.remove(property);
        }

        match waiter {
            Some(waiter) => {
                (waiter.continuation)(outcome);
                true
            }
            None => false,
        }
    }

    /// Number of continuations parked for `property`.
    pub fn pending(&self, property: &str) -> usize {
        self.queues.get(property).map_or(0, VecDeque::len)
    }

    pub fn total_pending(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }

    /// Drops every parked continuation without running it. Returns how many were dropped.
    pub fn abandon_all(&mut self) -> usize {
        let count = self.total_pending();
        self.queues.clear();
        count
    }
}
