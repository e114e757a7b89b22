//! Call recording and fault injection.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;
use govsync_api::ApiError;
use serde_json::Value;

/// The five remote operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    List,
    Read,
    Create,
    Update,
    Delete,
}

impl Operation {
    #[must_use]
    pub fn is_write(self) -> bool {
        matches!(self, Self::Create | Self::Update | Self::Delete)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::List => write!(f, "LIST"),
            Self::Read => write!(f, "READ"),
            Self::Create => write!(f, "CREATE"),
            Self::Update => write!(f, "UPDATE"),
            Self::Delete => write!(f, "DELETE"),
        }
    }
}

/// One recorded call.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub operation: Operation,
    pub collection: String,
    pub id: Option<String>,
    pub body: Option<Value>,
}

/// Records calls and hands out injected failures.
#[derive(Debug, Default)]
pub struct Recorder {
    log: Mutex<Vec<Call>>,
    faults: DashMap<(Operation, String), VecDeque<ApiError>>,
}

impl Recorder {
    fn log(&self) -> MutexGuard<'_, Vec<Call>> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record(&self, call: Call) {
        self.log().push(call);
    }

    /// Queues `times` copies of `error` for the next calls of `operation` on `collection`.
    pub fn inject(&self, operation: Operation, collection: &str, error: ApiError, times: usize) {
        let mut queue = self
            .faults
            .entry((operation, collection.to_string()))
            .or_default();
        queue.extend(std::iter::repeat_n(error, times));
    }

    /// Pops the next injected failure, if any.
    pub fn take_fault(&self, operation: Operation, collection: &str) -> Option<ApiError> {
        self.faults
            .get_mut(&(operation, collection.to_string()))
            .and_then(|mut queue| queue.pop_front())
    }

    pub fn calls(&self) -> Vec<Call> {
        self.log().clone()
    }

    pub fn count(&self, operation: Operation, collection: &str) -> usize {
        self.log()
            .iter()
            .filter(|c| c.operation == operation && c.collection == collection)
            .count()
    }

    pub fn writes(&self) -> usize {
        self.log().iter().filter(|c| c.operation.is_write()).count()
    }

    pub fn clear(&self) {
        self.log().clear();
        self.faults.clear();
    }
}
