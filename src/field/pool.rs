//! Per-kind object pools.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::object::{FieldObj, ObjectId, ObjectKind};
use super::FieldError;

/// First id handed out to non-user objects. Users keep their character id.
pub const OBJECT_ID_START: ObjectId = 10_000;

/// Hands out object ids shared by all pools of one field.
#[derive(Debug)]
pub struct IdAllocator {
    next: AtomicU32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self { next: AtomicU32::new(OBJECT_ID_START) }
    }

    pub fn next_id(&self) -> ObjectId {
        self.next.fetch_add(1, Ordering::AcqRel)
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

pub struct FieldPool {
    kind: ObjectKind,
    objects: RwLock<BTreeMap<ObjectId, Arc<FieldObj>>>,
}

impl FieldPool {
    pub fn new(kind: ObjectKind) -> Self {
        Self { kind, objects: RwLock::new(BTreeMap::new()) }
    }

    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    /// Add `obj`. Users keep their own id; everything else gets a fresh id
    /// from `ids`. Rejects an id already present in this pool.
    pub(crate) fn enter(&self, obj: &Arc<FieldObj>, ids: &IdAllocator) -> Result<ObjectId, FieldError> {
        if obj.kind() != ObjectKind::User {
            obj.set_id(ids.next_id());
        }
        let id = obj.id();
        let mut objects = self.objects.write();
        if objects.contains_key(&id) {
            return Err(FieldError::DuplicateObject { kind: self.kind, id });
        }
        objects.insert(id, Arc::clone(obj));
        Ok(id)
    }

    /// Remove `obj`. Only removes the exact instance that was entered.
    pub(crate) fn leave(&self, obj: &FieldObj) -> bool {
        let mut objects = self.objects.write();
        match objects.get(&obj.id()) {
            Some(current) if std::ptr::eq(Arc::as_ptr(current), obj) => {
                objects.remove(&obj.id());
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, id: ObjectId) -> Option<Arc<FieldObj>> {
        self.objects.read().get(&id).cloned()
    }

    pub fn contains(&self, obj: &FieldObj) -> bool {
        self.objects
            .read()
            .get(&obj.id())
            .is_some_and(|current| std::ptr::eq(Arc::as_ptr(current), obj))
    }

    /// Copy of the current membership, in id order.
    pub fn snapshot(&self) -> Vec<Arc<FieldObj>> {
        self.objects.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}
