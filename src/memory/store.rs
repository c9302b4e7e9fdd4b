// src/memory/store.rs — Memory persistence behind an injected store

use std::path::PathBuf;
use std::sync::Mutex;

use super::decay::{self, Memory, MemoryParams};
use crate::core::state;
use crate::core::types::Candidate;

/// Where memory lives between runs.
pub trait MemoryStore: Send + Sync {
    /// Missing state loads as empty memory.
    fn load(&self) -> anyhow::Result<Memory>;
    fn save(&self, memory: &Memory) -> anyhow::Result<()>;
}

/// JSON file store with atomic replace.
pub struct JsonMemoryStore {
    path: PathBuf,
}

impl JsonMemoryStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl MemoryStore for JsonMemoryStore {
    fn load(&self) -> anyhow::Result<Memory> {
        if !self.path.exists() {
            return Ok(Memory::default());
        }
        let content = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn save(&self, memory: &Memory) -> anyhow::Result<()> {
        state::write_snapshot(&self.path, memory)
    }
}

/// Process-local store.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Memory>,
}

impl MemoryStore for InMemoryStore {
    fn load(&self) -> anyhow::Result<Memory> {
        self.inner
            .lock()
            .map(|m| m.clone())
            .map_err(|_| anyhow::anyhow!("memory lock poisoned"))
    }

    fn save(&self, memory: &Memory) -> anyhow::Result<()> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| anyhow::anyhow!("memory lock poisoned"))?;
        *inner = memory.clone();
        Ok(())
    }
}

/// Memory shared by concurrent issues and ticks. Updates are serialized.
pub struct SharedMemory {
    store: Box<dyn MemoryStore>,
    params: MemoryParams,
    write_lock: Mutex<()>,
}

impl SharedMemory {
    pub fn new(store: Box<dyn MemoryStore>, params: MemoryParams) -> Self {
        Self {
            store,
            params,
            write_lock: Mutex::new(()),
        }
    }

    pub fn in_memory(params: MemoryParams) -> Self {
        Self::new(Box::<InMemoryStore>::default(), params)
    }

    /// Current memory; corrupt or unreadable state reads as empty.
    pub fn snapshot(&self) -> Memory {
        match self.store.load() {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("Memory unreadable, using empty memory: {}", e);
                Memory::default()
            }
        }
    }

    /// Decay then boost, persisted under the write lock.
    pub fn update(&self, fused: &Candidate, batch: &[Candidate]) -> anyhow::Result<Memory> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| anyhow::anyhow!("memory write lock poisoned"))?;
        let mut memory = self.snapshot();
        decay::learn(&mut memory, fused, batch, &self.params);
        self.store.save(&memory)?;
        Ok(memory)
    }
}
