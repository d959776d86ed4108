//! Named database instances
//!
//! A [`Registry`] maps caller-chosen names to databases that are built on first
//! lookup. It is created once at startup and handed to whatever needs it; there
//! is no ambient global.
//!
//! ```rust,ignore
//! let registry = Registry::new();
//! registry.register("main", || Database::new(&config.settings));
//!
//! let db = registry.get("main")?;
//! db.lock().execute("SELECT 1", &[])?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::database::core::DatabaseError;
use crate::database::Database;

/// A database shared between registry users
pub type SharedDatabase = Arc<Mutex<Database>>;

type Factory = Box<dyn Fn() -> Result<Database, DatabaseError> + Send + Sync>;

/// One registered name; the inner lock serializes building it
struct Slot {
    factory: Option<Factory>,
    built: Mutex<Option<SharedDatabase>>,
}

impl Slot {
    fn deferred(factory: Factory) -> Self {
        Self {
            factory: Some(factory),
            built: Mutex::new(None),
        }
    }

    fn ready(db: SharedDatabase) -> Self {
        Self {
            factory: None,
            built: Mutex::new(Some(db)),
        }
    }
}

#[derive(Default)]
pub struct Registry {
    slots: Mutex<HashMap<String, Arc<Slot>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under `name`, replacing any previous entry
    pub fn register<F>(&self, name: &str, factory: F)
    where
        F: Fn() -> Result<Database, DatabaseError> + Send + Sync + 'static,
    {
        let previous = self
            .slots
            .lock()
            .insert(name.to_string(), Arc::new(Slot::deferred(Box::new(factory))));
        if previous.is_some() {
            warn!("Replaced database instance '{}'", name);
        }
    }

    /// Register an already built database
    pub fn insert(&self, name: &str, db: Database) -> SharedDatabase {
        let shared = Arc::new(Mutex::new(db));
        self.slots
            .lock()
            .insert(name.to_string(), Arc::new(Slot::ready(Arc::clone(&shared))));
        shared
    }

    /// Resolve `name`, building it on the first lookup
    ///
    /// Only the entry being built is locked while its factory runs, so a
    /// factory may resolve other names. Concurrent lookups of one name still
    /// build it once. A factory that resolves its own name deadlocks. A
    /// failing factory stays registered and is retried on the next lookup.
    pub fn get(&self, name: &str) -> Result<SharedDatabase, DatabaseError> {
        let slot = self
            .slots
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| DatabaseError::UnknownInstance(name.to_string()))?;

        let mut built = slot.built.lock();
        if let Some(shared) = built.as_ref() {
            return Ok(Arc::clone(shared));
        }

        let factory = slot
            .factory
            .as_ref()
            .ok_or_else(|| DatabaseError::UnknownInstance(name.to_string()))?;
        debug!("Building database instance '{}'", name);
        let shared = Arc::new(Mutex::new(factory()?));
        *built = Some(Arc::clone(&shared));
        info!("Database instance '{}' ready", name);
        Ok(shared)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.slots.lock().contains_key(name)
    }

    /// Whether `name` has been built already
    pub fn is_ready(&self, name: &str) -> bool {
        let Some(slot) = self.slots.lock().get(name).cloned() else {
            return false;
        };
        let ready = slot.built.lock().is_some();
        ready
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.slots.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Forget `name`; the database closes once its last user lets go
    pub fn remove(&self, name: &str) -> bool {
        self.slots.lock().remove(name).is_some()
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.slots.lock().clear();
    }
}
