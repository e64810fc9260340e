//! Per-node generic-resource (GRES) projection.
//!
//! A GRES layout is whatever the caller's scheduler already computed; this
//! module only projects it onto a single host index by per-node position,
//! without adopting any particular wire format for the layout itself.

use serde_json::Value;

use crate::error::CredError;

/// Projects a job- or step-wide GRES allocation to a single host.
pub trait GresExtractor: Send + Sync {
    fn extract_job(&self, job_alloc: &Value, host_index: usize) -> Result<Value, CredError>;
    fn extract_step(&self, step_alloc: &Value, host_index: usize) -> Result<Value, CredError>;
}

/// Default extractor: both allocations are a JSON array indexed by host
/// position; a missing entry is `GresMissing`, except an empty top-level
/// array which means "no gres requested" and projects to `null` per node.
pub struct ArrayIndexedGres;

impl GresExtractor for ArrayIndexedGres {
    fn extract_job(&self, job_alloc: &Value, host_index: usize) -> Result<Value, CredError> {
        project(job_alloc, host_index)
    }

    fn extract_step(&self, step_alloc: &Value, host_index: usize) -> Result<Value, CredError> {
        project(step_alloc, host_index)
    }
}

fn project(alloc: &Value, host_index: usize) -> Result<Value, CredError> {
    match alloc {
        Value::Null => Ok(Value::Null),
        Value::Array(entries) if entries.is_empty() => Ok(Value::Null),
        Value::Array(entries) => entries.get(host_index).cloned().ok_or(CredError::GresMissing),
        _ => Err(CredError::GresMissing),
    }
}
