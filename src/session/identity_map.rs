// ============================================================================
// Identity Map
// ============================================================================
//
// Arena of live record instances owned by one session. Records are addressed
// by generation-checked slot keys, and persisted records are additionally
// indexed by (type name, identity) so that one stored row maps to exactly one
// live instance.
//
// ============================================================================

use crate::core::{RecordId, Result};
use crate::record::{DynRecord, Record};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// Untyped address of an arena slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotKey {
    index: u32,
    generation: u32,
}

/// Typed handle to a live record in a session.
///
/// Two handles are equal exactly when they address the same live instance.
pub struct RecordHandle<T> {
    key: SlotKey,
    _marker: PhantomData<fn() -> T>,
}

impl<T> RecordHandle<T> {
    pub(crate) fn new(key: SlotKey) -> Self {
        Self {
            key,
            _marker: PhantomData,
        }
    }

    pub fn key(&self) -> SlotKey {
        self.key
    }
}

impl<T> Clone for RecordHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for RecordHandle<T> {}

impl<T> PartialEq for RecordHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl<T> Eq for RecordHandle<T> {}

impl<T> Hash for RecordHandle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl<T: Record> fmt::Debug for RecordHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RecordHandle<{}>({}v{})",
            T::TYPE_NAME,
            self.key.index,
            self.key.generation
        )
    }
}

struct Entry {
    record: Box<dyn DynRecord>,
    /// Last stored version observed by this session; 0 when unknown.
    version: u64,
    /// Identity the slot is indexed under. Fixed once assigned.
    id: Option<RecordId>,
    /// Tenant the stored row belongs to.
    tenant_ref: Option<RecordId>,
}

struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

#[derive(Default)]
pub struct IdentityMap {
    slots: Vec<Slot>,
    free: Vec<u32>,
    index: HashMap<(&'static str, RecordId), SlotKey>,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live instances.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.entry.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Place a record in the arena. Persisted records are indexed by identity.
    pub fn insert(&mut self, record: Box<dyn DynRecord>, version: u64) -> SlotKey {
        let meta = record.record_meta();
        let (id, tenant_ref) = (meta.id, meta.tenant_ref);
        let identity = id.map(|id| (record.type_name(), id));
        let entry = Entry {
            record,
            version,
            id,
            tenant_ref,
        };

        let key = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.entry = Some(entry);
                SlotKey {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some(entry),
                });
                SlotKey {
                    index: (self.slots.len() - 1) as u32,
                    generation: 0,
                }
            }
        };

        if let Some(identity) = identity {
            self.index.insert(identity, key);
        }
        key
    }

    pub fn lookup(&self, type_name: &'static str, id: RecordId) -> Option<SlotKey> {
        self.index.get(&(type_name, id)).copied()
    }

    /// Return the live instance for `(type_name, id)`, calling `loader` only
    /// when none is mapped yet.
    pub fn get_or_attach<F>(&mut self, type_name: &'static str, id: RecordId, loader: F) -> Result<SlotKey>
    where
        F: FnOnce() -> Result<(Box<dyn DynRecord>, u64)>,
    {
        if let Some(key) = self.lookup(type_name, id) {
            return Ok(key);
        }

        let (record, version) = loader()?;
        Ok(self.insert(record, version))
    }

    /// Index a slot under the identity storage just assigned to it.
    pub fn register(&mut self, key: SlotKey, id: RecordId) {
        if let Some(entry) = self.entry_mut(key) {
            entry.id = Some(id);
            entry.tenant_ref = entry.record.record_meta().tenant_ref;
            let type_name = entry.record.type_name();
            self.index.insert((type_name, id), key);
        }
    }

    /// Drop an identity from the index, leaving the instance in the arena
    /// as if it had never been stored.
    pub fn unregister(&mut self, type_name: &'static str, id: RecordId) {
        if let Some(key) = self.index.remove(&(type_name, id))
            && let Some(entry) = self.entry_mut(key)
        {
            entry.id = None;
            entry.tenant_ref = None;
        }
    }

    /// Remove a mapped instance without touching storage.
    pub fn evict(&mut self, type_name: &'static str, id: RecordId) -> Option<Box<dyn DynRecord>> {
        let key = self.lookup(type_name, id)?;
        self.remove(key)
    }

    /// Free a slot. Handles to it become stale.
    pub fn remove(&mut self, key: SlotKey) -> Option<Box<dyn DynRecord>> {
        let slot = self.slots.get_mut(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(key.index);

        if let Some(id) = entry.id {
            let identity = (entry.record.type_name(), id);
            if self.index.get(&identity) == Some(&key) {
                self.index.remove(&identity);
            }
        }
        Some(entry.record)
    }

    pub fn contains(&self, key: SlotKey) -> bool {
        self.entry(key).is_some()
    }

    pub fn get(&self, key: SlotKey) -> Option<&(dyn DynRecord + 'static)> {
        self.entry(key).map(|entry| entry.record.as_ref())
    }

    pub fn get_mut(&mut self, key: SlotKey) -> Option<&mut (dyn DynRecord + 'static)> {
        self.entry_mut(key).map(|entry| entry.record.as_mut())
    }

    pub fn typed<T: Record>(&self, key: SlotKey) -> Option<&T> {
        self.get(key)?.as_any().downcast_ref::<T>()
    }

    pub fn typed_mut<T: Record>(&mut self, key: SlotKey) -> Option<&mut T> {
        self.get_mut(key)?.as_any_mut().downcast_mut::<T>()
    }

    pub fn version(&self, key: SlotKey) -> Option<u64> {
        self.entry(key).map(|entry| entry.version)
    }

    pub fn set_version(&mut self, key: SlotKey, version: u64) {
        if let Some(entry) = self.entry_mut(key) {
            entry.version = version;
        }
    }

    /// Identity the slot was stored or loaded under, independent of the
    /// record's current metadata.
    pub fn persisted_id(&self, key: SlotKey) -> Option<RecordId> {
        self.entry(key)?.id
    }

    /// Tenant of the stored row, as last read or written.
    pub fn persisted_tenant(&self, key: SlotKey) -> Option<RecordId> {
        self.entry(key)?.tenant_ref
    }

    pub fn set_persisted_tenant(&mut self, key: SlotKey, tenant: Option<RecordId>) {
        if let Some(entry) = self.entry_mut(key) {
            entry.tenant_ref = tenant;
        }
    }

    /// Drop every instance. Only done when the owning session ends.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.index.clear();
    }

    fn entry(&self, key: SlotKey) -> Option<&Entry> {
        let slot = self.slots.get(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        slot.entry.as_ref()
    }

    fn entry_mut(&mut self, key: SlotKey) -> Option<&mut Entry> {
        let slot = self.slots.get_mut(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        slot.entry.as_mut()
    }
}
