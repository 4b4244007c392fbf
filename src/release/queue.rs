//! Release Request Queue
//!
//! FIFO of peg-out requests waiting for a release transaction.

use bitcoin::{Amount, ScriptBuf};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// A pending peg-out: who gets paid and how much the user sent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRequest {
    pub destination: ScriptBuf,
    #[serde(with = "bitcoin::amount::serde::as_sat")]
    pub amount: Amount,
}

impl ReleaseRequest {
    pub fn new(destination: ScriptBuf, amount: Amount) -> Self {
        Self {
            destination,
            amount,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRequestQueue {
    entries: VecDeque<ReleaseRequest>,
}

impl ReleaseRequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, destination: ScriptBuf, amount: Amount) {
        self.entries.push_back(ReleaseRequest::new(destination, amount));
    }

    pub fn entries(&self) -> impl Iterator<Item = &ReleaseRequest> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Hand at most `max_iterations` requests to `handler` in FIFO order
    ///
    /// A request is dropped when the handler returns `Ok(true)` and moved to
    /// the back of the queue on `Ok(false)`. Errors stop processing.
    pub fn process<E>(
        &mut self,
        max_iterations: usize,
        mut handler: impl FnMut(&ReleaseRequest) -> Result<bool, E>,
    ) -> Result<usize, E> {
        let rounds = max_iterations.min(self.entries.len());
        let mut released = 0;

        for _ in 0..rounds {
            let Some(request) = self.entries.pop_front() else {
                break;
            };

            match handler(&request) {
                Ok(true) => released += 1,
                Ok(false) => self.entries.push_back(request),
                Err(e) => {
                    self.entries.push_front(request);
                    return Err(e);
                }
            }
        }

        Ok(released)
    }
}
