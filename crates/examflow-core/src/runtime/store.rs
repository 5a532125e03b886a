// crates/examflow-core/src/runtime/store.rs
// ============================================================================
// Module: Examflow Session Stores
// Description: Item-session store and in-memory snapshot storage backend.
// Purpose: Hold per-occurrence item sessions and provide a reference storage backend.
// Dependencies: crate::core, crate::interfaces, crate::runtime, serde
// ============================================================================

//! ## Overview
//! The item-session store keys sessions by item occurrence, supporting both
//! eager instantiation at route construction and lazy instantiation on first
//! visit. An occurrence with no session yet reports `NotSelected`. The
//! in-memory storage backend implements the snapshot storage contract for
//! hosts and tests that do not bring their own persistence.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::ItemId;
use crate::core::state::SessionState;
use crate::interfaces::SessionStorage;
use crate::interfaces::StorageError;
use crate::runtime::item_session::ItemSession;
use crate::runtime::route::RouteItem;

// ============================================================================
// SECTION: Item Session Store
// ============================================================================

/// Item sessions keyed by item occurrence.
///
/// # Invariants
/// - At most one session per occurrence.
/// - An absent session means the occurrence is `NotSelected`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<ItemSession>", into = "Vec<ItemSession>")]
pub struct ItemSessionStore {
    /// Sessions keyed by item occurrence.
    sessions: BTreeMap<(ItemId, u32), ItemSession>,
}

impl From<Vec<ItemSession>> for ItemSessionStore {
    fn from(sessions: Vec<ItemSession>) -> Self {
        let mut store = Self::new();
        for session in sessions {
            store.insert(session);
        }
        store
    }
}

impl From<ItemSessionStore> for Vec<ItemSession> {
    fn from(store: ItemSessionStore) -> Self {
        store.sessions.into_values().collect()
    }
}

impl ItemSessionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the session for an occurrence.
    #[must_use]
    pub fn get(&self, item_id: &ItemId, occurrence: u32) -> Option<&ItemSession> {
        self.sessions.get(&(item_id.clone(), occurrence))
    }

    /// Returns mutable access to the session for an occurrence.
    pub fn get_mut(&mut self, item_id: &ItemId, occurrence: u32) -> Option<&mut ItemSession> {
        self.sessions.get_mut(&(item_id.clone(), occurrence))
    }

    /// Inserts a session for an occurrence, replacing any existing one.
    pub fn insert(&mut self, session: ItemSession) {
        self.sessions.insert((session.item_id().clone(), session.occurrence()), session);
    }

    /// Returns the session for a route item, instantiating it when absent.
    ///
    /// The declarations are only consulted when a new session is created.
    pub fn get_or_instantiate(
        &mut self,
        route_item: &RouteItem,
        responses: &[crate::core::variables::ResponseDeclaration],
        outcomes: &[crate::core::variables::OutcomeDeclaration],
    ) -> &mut ItemSession {
        let key = (route_item.item_id.clone(), route_item.occurrence);
        self.sessions.entry(key).or_insert_with(|| {
            ItemSession::instantiate(route_item, responses.to_vec(), outcomes.to_vec())
        })
    }

    /// Reports the lifecycle state for an occurrence.
    ///
    /// Occurrences without a session report [`SessionState::NotSelected`].
    #[must_use]
    pub fn state(&self, item_id: &ItemId, occurrence: u32) -> SessionState {
        self.get(item_id, occurrence)
            .map_or(SessionState::NotSelected, ItemSession::state)
    }

    /// Iterates over every instantiated session.
    pub fn iter(&self) -> impl Iterator<Item = &ItemSession> {
        self.sessions.values()
    }

    /// Iterates mutably over every instantiated session.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ItemSession> {
        self.sessions.values_mut()
    }

    /// Returns the number of instantiated sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns true when no session has been instantiated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

// ============================================================================
// SECTION: In-Memory Storage
// ============================================================================

/// In-memory snapshot storage for hosts and tests.
#[derive(Debug, Default)]
pub struct InMemorySessionStorage {
    /// Stored values keyed by snapshot key.
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl InMemorySessionStorage {
    /// Creates an empty storage backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the entry map, mapping a poisoned lock to a storage error.
    fn locked(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>>, StorageError> {
        self.entries
            .lock()
            .map_err(|_| StorageError::Read("session storage lock poisoned".to_string()))
    }
}

impl SessionStorage for InMemorySessionStorage {
    fn read(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let entries = self.locked()?;
        entries.get(key).cloned().ok_or_else(|| StorageError::Missing(key.to_string()))
    }

    fn write(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let mut entries = self.locked()?;
        entries.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let entries = self.locked()?;
        Ok(entries.contains_key(key))
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.locked()?;
        entries.remove(key);
        Ok(())
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
