//! Hierarchical timing traces carried in responses and exceptions.

use crate::error::ProtocolError;
use crate::value;
use chrono::Utc;
use parking_lot::Mutex;
use rmpv::Value;
use std::sync::{Arc, OnceLock, Weak};

fn now_ns() -> i64 {
    // Nanosecond timestamps cover dates through 2262.
    Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}

/// A timed, labeled region in a hierarchical trace.
///
/// Traces form a tree: [`Trace::begin`] opens a sub-trace whose parent is
/// the receiver, and [`Trace::end`] stamps the end instant and appends the
/// sub-trace to its parent's child list. The handle is cheaply clonable;
/// clones refer to the same node.
///
/// The parent link is a weak back-reference used solely to locate the
/// parent for the append on end; a child never keeps its parent alive.
#[derive(Debug, Clone)]
pub struct Trace {
    inner: Arc<TraceInner>,
}

#[derive(Debug)]
struct TraceInner {
    description: String,
    start_ns: i64,
    end_ns: OnceLock<i64>,
    parent: Weak<TraceInner>,
    children: Mutex<Vec<Trace>>,
}

impl Trace {
    /// Starts a new root trace with start = now.
    pub fn new_root(description: impl Into<String>) -> Trace {
        Trace {
            inner: Arc::new(TraceInner {
                description: description.into(),
                start_ns: now_ns(),
                end_ns: OnceLock::new(),
                parent: Weak::new(),
                children: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Begins a sub-trace of the receiver with start = now.
    ///
    /// The sub-trace does not appear in the receiver's child list until it
    /// is ended.
    pub fn begin(&self, description: impl Into<String>) -> Trace {
        Trace {
            inner: Arc::new(TraceInner {
                description: description.into(),
                start_ns: now_ns(),
                end_ns: OnceLock::new(),
                parent: Arc::downgrade(&self.inner),
                children: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Ends the trace: stamps end = now and appends the receiver to its
    /// parent's child list. Ending a root only stamps the end instant.
    /// A second `end` is a no-op, so a child is appended exactly once.
    pub fn end(&self) {
        if self.inner.end_ns.set(now_ns()).is_err() {
            return;
        }

        if let Some(parent) = self.inner.parent.upgrade() {
            parent.children.lock().push(self.clone());
        }
    }

    /// Description of the traced region.
    pub fn description(&self) -> &str {
        &self.inner.description
    }

    /// Start instant in nanoseconds since the Unix epoch, UTC.
    pub fn start_ns(&self) -> i64 {
        self.inner.start_ns
    }

    /// End instant in nanoseconds since the Unix epoch, UTC. Falls back to
    /// the start instant while the trace has not ended.
    pub fn end_ns(&self) -> i64 {
        self.inner.end_ns.get().copied().unwrap_or(self.inner.start_ns)
    }

    /// Snapshot of the ended sub-traces.
    pub fn sub_traces(&self) -> Vec<Trace> {
        self.inner.children.lock().clone()
    }

    /// Serializes the trace to `[description, start_ns, end_ns, [sub…]]`.
    pub fn serialize(&self) -> Value {
        let children: Vec<Value> = self
            .inner
            .children
            .lock()
            .iter()
            .map(Trace::serialize)
            .collect();

        Value::Array(vec![
            Value::from(self.inner.description.as_str()),
            Value::from(self.inner.start_ns),
            Value::from(self.end_ns()),
            Value::Array(children),
        ])
    }

    /// Deserializes a trace from a dynamic value.
    ///
    /// Requires a sequence of at least four elements; elements beyond the
    /// fourth are ignored so that future revisions can append fields.
    pub fn deserialize(input: &Value) -> Result<Trace, ProtocolError> {
        let items = match input {
            Value::Array(items) => items,
            _ => return Err(ProtocolError::Deserialization),
        };

        if items.len() < 4 {
            return Err(ProtocolError::Deserialization);
        }

        let description = value::deserialize_string(&items[0])?;
        let start_ns = value::deserialize_i64(&items[1])?;
        let end_ns = value::deserialize_i64(&items[2])?;

        let children = match &items[3] {
            Value::Array(raw) => raw
                .iter()
                .map(Trace::deserialize)
                .collect::<Result<Vec<_>, _>>()?,
            _ => return Err(ProtocolError::Deserialization),
        };

        let end = OnceLock::new();
        let _ = end.set(end_ns);

        Ok(Trace {
            inner: Arc::new(TraceInner {
                description,
                start_ns,
                end_ns: end,
                parent: Weak::new(),
                children: Mutex::new(children),
            }),
        })
    }
}

impl PartialEq for Trace {
    fn eq(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.inner, &other.inner) {
            return true;
        }

        self.inner.description == other.inner.description
            && self.inner.start_ns == other.inner.start_ns
            && self.end_ns() == other.end_ns()
            && *self.inner.children.lock() == *other.inner.children.lock()
    }
}
