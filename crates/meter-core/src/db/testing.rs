//! Store wrapper that fails selected operations
//!
//! Wraps a [`MemoryStore`]; every call passes through unless a fault armed
//! with [`FaultyStore::fail`] matches the operation and key.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Duration;

use super::kv::{KvStore, StoreError};
use super::memory::MemoryStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Op {
    GetFields,
    SetFields,
    IncrField,
    AddMember,
}

#[derive(Debug)]
struct Fault {
    op: Op,
    key_contains: String,
    remaining: usize,
}

#[derive(Debug, Default)]
pub(crate) struct FaultyStore {
    inner: MemoryStore,
    faults: Mutex<Vec<Fault>>,
}

impl FaultyStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` calls of `op` on keys containing `key_contains`
    pub(crate) fn fail(&self, op: Op, key_contains: &str, times: usize) {
        self.faults.lock().unwrap().push(Fault {
            op,
            key_contains: key_contains.to_string(),
            remaining: times,
        });
    }

    fn check(&self, op: Op, key: &str) -> Result<(), StoreError> {
        let mut faults = self.faults.lock().unwrap();
        let armed = faults
            .iter_mut()
            .find(|f| f.op == op && f.remaining > 0 && key.contains(&f.key_contains));
        match armed {
            Some(fault) => {
                fault.remaining -= 1;
                Err(StoreError::Unavailable(format!("timeout ({:?} {})", op, key)))
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl KvStore for FaultyStore {
    async fn get_fields(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        self.check(Op::GetFields, key)?;
        self.inner.get_fields(key).await
    }

    async fn set_fields(&self, key: &str, fields: &[(&str, String)]) -> Result<(), StoreError> {
        self.check(Op::SetFields, key)?;
        self.inner.set_fields(key, fields).await
    }

    async fn incr_field(
        &self,
        key: &str,
        field: &str,
        delta: i64,
        ttl: Option<Duration>,
    ) -> Result<i64, StoreError> {
        self.check(Op::IncrField, key)?;
        self.inner.incr_field(key, field, delta, ttl).await
    }

    async fn compare_and_set_field(
        &self,
        key: &str,
        field: &str,
        expected: i64,
        new: i64,
    ) -> Result<bool, StoreError> {
        self.inner
            .compare_and_set_field(key, field, expected, new)
            .await
    }

    async fn add_member(
        &self,
        key: &str,
        member: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        self.check(Op::AddMember, key)?;
        self.inner.add_member(key, member, ttl).await
    }

    async fn remove_member(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        self.inner.remove_member(key, member).await
    }

    async fn members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        self.inner.members(key).await
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.inner.keys_with_prefix(prefix).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.inner.delete(key).await
    }
}
