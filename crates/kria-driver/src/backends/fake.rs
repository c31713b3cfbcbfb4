// SPDX-License-Identifier: AGPL-3.0-only

//! In-memory register file
//!
//! Models the physical registers behind both address spaces. Aliases map a
//! co-processor-view address onto the host-view address of the same
//! register, so both sides observe each other's writes. Scripted reads
//! return a queued sequence before falling back to the stored value, which
//! is how tests make the DPU raise its done bit after N polls.

use crate::bus::HardwareBus;
use crate::error::{KriaError, Result};
use kria_chip::regs::REGISTER_BYTES;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Most recent bus writes kept in the write log; older entries are dropped.
pub const WRITE_LOG_LIMIT: usize = 4096;

/// Callback run after a write to a hooked address, outside the lock.
pub type WriteHook = Arc<dyn Fn(&FakeRegisterFile, u32) + Send + Sync>;

#[derive(Default)]
struct State {
    values: BTreeMap<u32, u32>,
    aliases: HashMap<u32, u32>,
    scripts: HashMap<u32, VecDeque<u32>>,
    reads: HashMap<u32, u64>,
    writes: VecDeque<(u32, u32)>,
    hooks: HashMap<u32, WriteHook>,
}

impl State {
    fn canonical(&self, addr: u32) -> u32 {
        self.aliases.get(&addr).copied().unwrap_or(addr)
    }
}

/// Fake register file implementing [`HardwareBus`].
#[derive(Default)]
pub struct FakeRegisterFile {
    state: Mutex<State>,
}

impl std::fmt::Debug for FakeRegisterFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("FakeRegisterFile")
            .field("values", &state.values)
            .field("aliases", &state.aliases.len())
            .field("writes", &state.writes.len())
            .finish_non_exhaustive()
    }
}

fn check_aligned(addr: u32) -> Result<()> {
    if addr % REGISTER_BYTES != 0 {
        return Err(KriaError::Misaligned {
            addr: u64::from(addr),
        });
    }
    Ok(())
}

impl FakeRegisterFile {
    /// Empty register file; every register reads 0.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make `alias` name the same register as `target`.
    pub fn alias(&self, alias: u32, target: u32) {
        self.lock().aliases.insert(alias, target);
    }

    /// Add every `(alias, target)` pair.
    pub fn alias_all(&self, pairs: impl IntoIterator<Item = (u32, u32)>) {
        let mut state = self.lock();
        for (alias, target) in pairs {
            state.aliases.insert(alias, target);
        }
    }

    /// Set a register without logging a write or running hooks.
    pub fn set(&self, addr: u32, value: u32) {
        let mut state = self.lock();
        let addr = state.canonical(addr);
        state.values.insert(addr, value);
    }

    /// Peek a register without counting a read or consuming a script.
    pub fn get(&self, addr: u32) -> u32 {
        let state = self.lock();
        let addr = state.canonical(addr);
        state.values.get(&addr).copied().unwrap_or(0)
    }

    /// Queue values returned by the next reads of `addr`.
    pub fn script_reads(&self, addr: u32, values: impl IntoIterator<Item = u32>) {
        let mut state = self.lock();
        let addr = state.canonical(addr);
        state.scripts.entry(addr).or_default().extend(values);
    }

    /// Run `hook` after every bus write to `addr` as written (not aliased).
    pub fn on_write(&self, addr: u32, hook: impl Fn(&Self, u32) + Send + Sync + 'static) {
        self.lock().hooks.insert(addr, Arc::new(hook));
    }

    /// Most recent bus writes (at most [`WRITE_LOG_LIMIT`]), in order, with
    /// addresses as written.
    pub fn writes(&self) -> Vec<(u32, u32)> {
        self.lock().writes.iter().copied().collect()
    }

    /// Bus writes to `addr` as written.
    pub fn writes_to(&self, addr: u32) -> Vec<u32> {
        self.lock()
            .writes
            .iter()
            .filter(|(a, _)| *a == addr)
            .map(|&(_, v)| v)
            .collect()
    }

    /// Forget logged writes.
    pub fn clear_writes(&self) {
        self.lock().writes.clear();
    }

    /// Bus reads of the register behind `addr`.
    pub fn reads(&self, addr: u32) -> u64 {
        let state = self.lock();
        let addr = state.canonical(addr);
        state.reads.get(&addr).copied().unwrap_or(0)
    }

    /// Current value of every register ever written or set.
    pub fn snapshot(&self) -> BTreeMap<u32, u32> {
        self.lock().values.clone()
    }
}

impl HardwareBus for FakeRegisterFile {
    fn read_register(&self, addr: u32) -> Result<u32> {
        check_aligned(addr)?;
        let mut state = self.lock();
        let addr = state.canonical(addr);
        *state.reads.entry(addr).or_default() += 1;
        let scripted = state.scripts.get_mut(&addr).and_then(VecDeque::pop_front);
        let value = scripted.unwrap_or_else(|| state.values.get(&addr).copied().unwrap_or(0));
        tracing::trace!("fake read {addr:#010x} = {value:#x}");
        Ok(value)
    }

    fn write_register(&self, addr: u32, value: u32) -> Result<()> {
        check_aligned(addr)?;
        let hook = {
            let mut state = self.lock();
            if state.writes.len() == WRITE_LOG_LIMIT {
                state.writes.pop_front();
            }
            state.writes.push_back((addr, value));
            let canonical = state.canonical(addr);
            state.values.insert(canonical, value);
            state.hooks.get(&addr).cloned()
        };
        tracing::trace!("fake write {addr:#010x} = {value:#x}");
        if let Some(hook) = hook {
            hook(self, value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_share_storage() {
        let fake = FakeRegisterFile::new();
        fake.alias(0x6000_0004, 0xA000_0004);
        fake.write_register(0x6000_0004, 1).unwrap();
        assert_eq!(fake.read_register(0xA000_0004).unwrap(), 1);
        assert_eq!(fake.reads(0x6000_0004), 1);
        assert_eq!(fake.writes(), vec![(0x6000_0004, 1)]);
    }

    #[test]
    fn scripted_reads_then_stored_value() {
        let fake = FakeRegisterFile::new();
        fake.set(0x10, 9);
        fake.script_reads(0x10, [1, 2]);
        let seen: Vec<u32> = (0..4).map(|_| fake.read_register(0x10).unwrap()).collect();
        assert_eq!(seen, vec![1, 2, 9, 9]);
    }

    #[test]
    fn hooks_fire_on_written_address_only() {
        let fake = FakeRegisterFile::new();
        fake.alias(0x6000_000C, 0xA000_000C);
        fake.on_write(0xA000_000C, |regs, v| regs.set(0xA000_0004, v));

        fake.write_register(0x6000_000C, 1).unwrap();
        assert_eq!(fake.get(0xA000_0004), 0);

        fake.write_register(0xA000_000C, 1).unwrap();
        assert_eq!(fake.get(0xA000_0004), 1);
    }

    #[test]
    fn write_log_keeps_most_recent_entries() {
        let fake = FakeRegisterFile::new();
        for i in 0..WRITE_LOG_LIMIT + 10 {
            fake.write_register(0x20, u32::try_from(i).unwrap()).unwrap();
        }
        let writes = fake.writes();
        assert_eq!(writes.len(), WRITE_LOG_LIMIT);
        assert_eq!(writes[0], (0x20, 10));
        assert_eq!(fake.get(0x20), u32::try_from(WRITE_LOG_LIMIT + 9).unwrap());
    }

    #[test]
    fn unaligned_access_is_rejected() {
        let fake = FakeRegisterFile::new();
        assert!(matches!(
            fake.read_register(0x2),
            Err(KriaError::Misaligned { addr: 2 })
        ));
        assert!(fake.write_register(0x7, 0).is_err());
        assert!(fake.writes().is_empty());
    }
}
