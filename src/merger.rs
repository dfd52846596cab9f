//! Strategies combining per-shard partial results

use std::cmp::Ordering;
use std::sync::Arc;

use shardbridge_core::Value;

/// Combines per-shard partial lists, given in shard-identity order, into one list
pub trait Merger: Send + Sync {
    fn merge(&self, partials: Vec<Vec<Value>>) -> Vec<Value>;
}

/// Concatenates partial lists in the order given
#[derive(Debug, Default, Clone, Copy)]
pub struct ConcatMerger;

impl Merger for ConcatMerger {
    fn merge(&self, partials: Vec<Vec<Value>>) -> Vec<Value> {
        partials.into_iter().flatten().collect()
    }
}

type Comparator = dyn Fn(&Value, &Value) -> Ordering + Send + Sync;

/// Ordered k-way merge of partial lists that are each already sorted.
///
/// Ties keep the element from the earlier partial list first.
#[derive(Clone)]
pub struct SortingMerger {
    comparator: Arc<Comparator>,
}

impl SortingMerger {
    pub fn new<F>(comparator: F) -> Self
    where
        F: Fn(&Value, &Value) -> Ordering + Send + Sync + 'static,
    {
        Self {
            comparator: Arc::new(comparator),
        }
    }

    /// Ascending order of one record field; rows without the field sort first
    pub fn by_field<S: Into<String>>(field: S) -> Self {
        let field = field.into();
        Self::new(move |a, b| {
            let left = a.field(&field).unwrap_or(&Value::Null);
            let right = b.field(&field).unwrap_or(&Value::Null);
            compare_values(left, right)
        })
    }

    /// Same ordering, reversed
    pub fn descending(self) -> Self {
        let comparator = self.comparator;
        Self::new(move |a, b| comparator(b, a))
    }
}

impl Merger for SortingMerger {
    fn merge(&self, partials: Vec<Vec<Value>>) -> Vec<Value> {
        let total = partials.iter().map(Vec::len).sum();
        let mut merged = Vec::with_capacity(total);
        let mut cursors: Vec<std::vec::IntoIter<Value>> =
            partials.into_iter().map(Vec::into_iter).collect();
        let mut heads: Vec<Option<Value>> = cursors.iter_mut().map(Iterator::next).collect();

        loop {
            let mut best: Option<usize> = None;
            for (i, head) in heads.iter().enumerate() {
                let candidate = match head {
                    Some(value) => value,
                    None => continue,
                };
                let beats_best = match best.and_then(|j| heads[j].as_ref()) {
                    Some(current) => (self.comparator)(candidate, current) == Ordering::Less,
                    None => true,
                };
                if beats_best {
                    best = Some(i);
                }
            }

            let Some(i) = best else { break };
            if let Some(value) = heads[i].take() {
                merged.push(value);
            }
            heads[i] = cursors[i].next();
        }

        merged
    }
}

/// Total order over values: null, booleans, numbers, strings, then everything else
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(value: &Value) -> u8 {
        match value {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) | Value::Float(_) => 2,
            Value::Str(_) => 3,
            _ => 4,
        }
    }

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::Str(x), Value::Str(y)) => x.cmp(y),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            _ => rank(a).cmp(&rank(b)),
        },
    }
}
