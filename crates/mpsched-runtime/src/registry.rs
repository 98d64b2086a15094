//! Program registry — process-wide store of named, compiled scheduler programs.
//!
//! Readers (the decision path) load the current table through `ArcSwap`
//! and never wait on writers. Writers (load/remove/bind) serialize on a
//! mutex, build a new table, and publish it in one store, so a lookup sees
//! an entry either fully present or fully absent.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use mpsched_core::ReloadPolicy;
use mpsched_lang::{CompileOptions, CompiledProgram, Instr};

use crate::error::{RegistryError, RegistryResult};

/// A compiled, validated scheduler program. Immutable once registered.
#[derive(Debug)]
pub struct SchedulerProgram {
    name: String,
    version: u64,
    digest: String,
    instructions: Vec<Instr>,
    declared_registers: BTreeSet<u8>,
    slot_count: usize,
}

impl SchedulerProgram {
    pub(crate) fn new(compiled: CompiledProgram, version: u64, digest: String) -> Self {
        Self {
            name: compiled.name,
            version,
            digest,
            instructions: compiled.instructions,
            declared_registers: compiled.declared_registers,
            slot_count: compiled.slot_count,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// SHA-256 of the program source, hex encoded.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn instructions(&self) -> &[Instr] {
        &self.instructions
    }

    pub fn declared_registers(&self) -> &BTreeSet<u8> {
        &self.declared_registers
    }

    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    pub fn handle(&self) -> ProgramHandle {
        ProgramHandle {
            name: self.name.clone(),
            version: self.version,
            digest: self.digest.clone(),
            instructions: self.instructions.len(),
            registers: self.declared_registers.iter().copied().collect(),
        }
    }
}

/// Summary of a loaded program returned to control-plane callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgramHandle {
    pub name: String,
    pub version: u64,
    pub digest: String,
    pub instructions: usize,
    pub registers: Vec<u8>,
}

struct Entry {
    program: Arc<SchedulerProgram>,
    /// Connections currently bound. Shared across hot-swapped versions.
    bound: Arc<AtomicUsize>,
}

type Table = HashMap<String, Arc<Entry>>;

pub struct Registry {
    options: CompileOptions,
    reload: ReloadPolicy,
    table: ArcSwap<Table>,
    /// Serializes writers. Holds the last version issued per name, which
    /// survives removal and `clear` so versions stay monotonic for the
    /// registry's lifetime. One entry per distinct name ever loaded.
    writer: Mutex<HashMap<String, u64>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new(options: CompileOptions, reload: ReloadPolicy) -> Self {
        Self {
            options,
            reload,
            table: ArcSwap::from_pointee(HashMap::new()),
            writer: Mutex::new(HashMap::new()),
        }
    }

    /// Compile `source` and register it under its declared name.
    ///
    /// Loading the exact text already registered under that name is a no-op
    /// that returns the existing handle.
    pub fn load(&self, source: &str) -> RegistryResult<ProgramHandle> {
        let compiled = mpsched_lang::compile(source, &self.options)?;
        let digest = hex::encode(Sha256::digest(source.as_bytes()));
        let name = compiled.name.clone();

        let mut versions = self.writer.lock();
        let current = self.table.load_full();
        let bound = match (current.get(&name), self.reload) {
            (Some(existing), _) if existing.program.digest == digest => {
                debug!(%name, version = existing.program.version, "scheduler already loaded");
                return Ok(existing.program.handle());
            }
            (Some(_), ReloadPolicy::Reject) => {
                return Err(RegistryError::DuplicateSchedulerName(name));
            }
            (Some(existing), ReloadPolicy::HotSwap) => existing.bound.clone(),
            (None, _) => Arc::new(AtomicUsize::new(0)),
        };

        let version = versions.entry(name.clone()).or_insert(0);
        *version += 1;
        let program = Arc::new(SchedulerProgram::new(compiled, *version, digest));
        let handle = program.handle();

        let mut next = Table::clone(&current);
        let replaced = next
            .insert(name.clone(), Arc::new(Entry { program, bound }))
            .is_some();
        self.table.store(Arc::new(next));

        info!(
            %name,
            version = handle.version,
            instructions = handle.instructions,
            replaced,
            "scheduler loaded"
        );
        Ok(handle)
    }

    /// Remove a program. Rejected while any connection is bound to it.
    pub fn remove(&self, name: &str) -> RegistryResult<()> {
        let _writer = self.writer.lock();
        let current = self.table.load_full();
        let entry = current
            .get(name)
            .ok_or_else(|| RegistryError::SchedulerNotFound(name.to_string()))?;

        let bound = entry.bound.load(Ordering::Acquire);
        if bound > 0 {
            return Err(RegistryError::SchedulerInUse {
                name: name.to_string(),
                bound,
            });
        }

        let mut next = Table::clone(&current);
        next.remove(name);
        self.table.store(Arc::new(next));
        info!(%name, "scheduler removed");
        Ok(())
    }

    /// Current program under `name`. Never blocks on writers.
    pub fn lookup(&self, name: &str) -> Option<Arc<SchedulerProgram>> {
        self.table.load().get(name).map(|e| e.program.clone())
    }

    /// Take a binding reference on `name`.
    ///
    /// Serialized with `remove`, so a program can never be removed between
    /// the existence check and the reference being taken.
    pub fn acquire(&self, name: &str) -> RegistryResult<Arc<SchedulerProgram>> {
        let _writer = self.writer.lock();
        let current = self.table.load();
        let entry = current
            .get(name)
            .ok_or_else(|| RegistryError::SchedulerNotFound(name.to_string()))?;
        let bound = entry.bound.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(%name, bound, "scheduler reference acquired");
        Ok(entry.program.clone())
    }

    /// Drop a binding reference taken with `acquire`.
    pub fn release(&self, name: &str) {
        let current = self.table.load();
        let Some(entry) = current.get(name) else {
            warn!(%name, "release for unknown scheduler");
            return;
        };
        let prev = entry
            .bound
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        match prev {
            Ok(prev) => debug!(%name, bound = prev - 1, "scheduler reference released"),
            Err(_) => warn!(%name, "release without matching acquire"),
        }
    }

    /// Number of connections bound to `name`, if present.
    pub fn bound_count(&self, name: &str) -> Option<usize> {
        self.table
            .load()
            .get(name)
            .map(|e| e.bound.load(Ordering::Acquire))
    }

    /// Sorted names of all loaded programs.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.table.load().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.table.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every program regardless of bindings. Used on shutdown.
    ///
    /// Issued versions are kept, so a program loaded again afterwards gets a
    /// fresh version number.
    pub fn clear(&self) -> usize {
        let _writer = self.writer.lock();
        let dropped = self.table.swap(Arc::new(HashMap::new())).len();
        info!(dropped, "scheduler registry cleared");
        dropped
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }
}
