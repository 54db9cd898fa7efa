//! In-process key service.
//!
//! Keys live in a map behind a mutex; ids are handed out sequentially
//! (`MK0001`, `MK0002`, ...) so tests can predict them. Every create and fetch
//! is recorded in order, which is how rotation tests check the keys a
//! decryption actually asked for.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use machina_core::{Key, KeyAttributes, Metadata};

use crate::{KeyService, KeyServiceError};

pub const DEFAULT_SERVER: &str = "memory://machina";

#[derive(Default)]
struct State {
    keys: HashMap<String, (Key, KeyAttributes)>,
    next_id: u64,
    created: Vec<String>,
    fetched: Vec<String>,
    denied: HashSet<String>,
}

pub struct MemoryKeyService {
    server: String,
    state: Mutex<State>,
}

impl MemoryKeyService {
    pub fn new() -> Self {
        Self::with_server(DEFAULT_SERVER)
    }

    pub fn with_server(server: impl Into<String>) -> Self {
        MemoryKeyService {
            server: server.into(),
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register an externally created key.
    pub fn insert(&self, key: Key) {
        let mut state = self.state();
        state.keys.insert(key.id().to_string(), (key, KeyAttributes::new()));
    }

    /// Make every later fetch of `id` fail with `Denied`.
    pub fn deny(&self, id: &str) {
        self.state().denied.insert(id.to_string());
    }

    /// Ids returned by `create_key`, oldest first.
    pub fn created(&self) -> Vec<String> {
        self.state().created.clone()
    }

    /// Ids requested through `fetch_key`, oldest first (repeats included).
    pub fn fetched(&self) -> Vec<String> {
        self.state().fetched.clone()
    }

    /// Attributes a key was created with.
    pub fn attributes(&self, id: &str) -> Option<KeyAttributes> {
        self.state().keys.get(id).map(|(_, attrs)| attrs.clone())
    }

    pub fn len(&self) -> usize {
        self.state().keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryKeyService {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyService for MemoryKeyService {
    fn server(&self) -> &str {
        &self.server
    }

    fn create_key(
        &self,
        attributes: &KeyAttributes,
        _metadata: &Metadata,
    ) -> Result<Key, KeyServiceError> {
        let mut state = self.state();
        state.next_id += 1;
        let id = format!("MK{:04}", state.next_id);
        let key = Key::new(&id, machina_crypto::generate_key_bytes(), &self.server);

        state.keys.insert(id.clone(), (key.clone(), attributes.clone()));
        state.created.push(id.clone());
        tracing::debug!(key_id = %id, "memory key service created key");
        Ok(key)
    }

    fn fetch_key(&self, id: &str, _metadata: &Metadata) -> Result<Key, KeyServiceError> {
        let mut state = self.state();
        state.fetched.push(id.to_string());

        if state.denied.contains(id) {
            return Err(KeyServiceError::Denied(id.to_string()));
        }
        state
            .keys
            .get(id)
            .map(|(key, _)| key.clone())
            .ok_or_else(|| KeyServiceError::NotFound(id.to_string()))
    }
}
