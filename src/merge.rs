//! Merge operator plugin.
//!
//! A `Merge` record stores an operand instead of a value. Reads resolve the
//! operands for a key against the newest base value (or its absence) by
//! folding them oldest-first through the column family's operator.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::Result;

/// A user-supplied merge function.
pub trait MergeOperator: Send + Sync {
    /// Stable name of the operator.
    fn name(&self) -> &str;

    /// Combine one operand with the existing value.
    fn merge(&self, key: &[u8], existing: Option<&[u8]>, operand: &[u8]) -> Result<Bytes>;

    /// Fold `operands` (oldest first) onto `existing`.
    fn full_merge(&self, key: &[u8], existing: Option<&[u8]>, operands: &[Bytes]) -> Result<Bytes> {
        let mut acc: Option<Bytes> = existing.map(Bytes::copy_from_slice);
        for operand in operands {
            acc = Some(self.merge(key, acc.as_deref(), operand)?);
        }
        Ok(acc.unwrap_or_default())
    }
}

impl fmt::Debug for dyn MergeOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergeOperator")
            .field("name", &self.name())
            .finish()
    }
}

type MergeFn = dyn Fn(&[u8], Option<&[u8]>, &[u8]) -> Vec<u8> + Send + Sync;

/// Merge operator backed by a closure.
///
/// ```rust,ignore
/// let append = FnMergeOperator::new("append", |_key, existing, operand| {
///     let mut out = existing.map(<[u8]>::to_vec).unwrap_or_default();
///     out.extend_from_slice(operand);
///     out
/// });
/// ```
pub struct FnMergeOperator {
    name: String,
    func: Box<MergeFn>,
}

impl FnMergeOperator {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&[u8], Option<&[u8]>, &[u8]) -> Vec<u8> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Box::new(func),
        }
    }

    /// Wrap into the shared form stored in column family options.
    pub fn shared(self) -> Arc<dyn MergeOperator> {
        Arc::new(self)
    }
}

impl MergeOperator for FnMergeOperator {
    fn name(&self) -> &str {
        &self.name
    }

    fn merge(&self, key: &[u8], existing: Option<&[u8]>, operand: &[u8]) -> Result<Bytes> {
        Ok(Bytes::from((self.func)(key, existing, operand)))
    }
}

impl fmt::Debug for FnMergeOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnMergeOperator")
            .field("name", &self.name)
            .finish()
    }
}

/// Joins the existing value and each operand with a delimiter.
#[derive(Debug, Clone)]
pub struct StringAppendOperator {
    delimiter: Vec<u8>,
}

impl StringAppendOperator {
    pub fn new(delimiter: impl Into<Vec<u8>>) -> Self {
        Self {
            delimiter: delimiter.into(),
        }
    }
}

impl MergeOperator for StringAppendOperator {
    fn name(&self) -> &str {
        "kvcore.StringAppendOperator"
    }

    fn merge(&self, _key: &[u8], existing: Option<&[u8]>, operand: &[u8]) -> Result<Bytes> {
        let mut out = Vec::with_capacity(
            existing.map_or(0, |e| e.len() + self.delimiter.len()) + operand.len(),
        );
        if let Some(existing) = existing {
            out.extend_from_slice(existing);
            out.extend_from_slice(&self.delimiter);
        }
        out.extend_from_slice(operand);
        Ok(Bytes::from(out))
    }
}
