//! Generation buckets keyed by start depth

use std::collections::HashMap;
use std::sync::Arc;

use crate::nag::{Nag, NagId};

/// Tasks created together by one batch
#[derive(Debug, Default, Clone)]
pub struct Bucket {
    members: Vec<Arc<Nag>>,
}

impl Bucket {
    pub fn new(members: Vec<Arc<Nag>>) -> Self {
        Self { members }
    }

    pub fn members(&self) -> &[Arc<Nag>] {
        &self.members
    }

    pub fn contains(&self, id: NagId) -> bool {
        self.members.iter().any(|nag| nag.id() == id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// One slot per start depth
#[derive(Debug, Default)]
pub struct GenerationTable {
    buckets: HashMap<u32, Bucket>,
}

impl GenerationTable {
    /// Installs `bucket` under `key`. The previous bucket, if any, is returned
    /// untouched; its tasks keep running but can no longer be polled.
    pub fn replace(&mut self, key: u32, bucket: Bucket) -> Option<Bucket> {
        self.buckets.insert(key, bucket)
    }

    pub fn detach(&mut self, key: u32) -> Option<Bucket> {
        self.buckets.remove(&key)
    }

    pub fn get(&self, key: u32) -> Option<&Bucket> {
        self.buckets.get(&key)
    }

    /// Whether `id` belongs to the current bucket of `key`
    pub fn is_current(&self, key: u32, id: NagId) -> bool {
        self.buckets.get(&key).is_some_and(|bucket| bucket.contains(id))
    }

    pub fn clear(&mut self) {
        self.buckets.clear();
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
