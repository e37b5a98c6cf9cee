use super::heap::ObjectId;
use super::types::ManagedHandle;
use crate::config::HandlePoolConfig;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolKind {
    /// Tracks the object without keeping it alive.
    Transient,
    /// Keeps the object alive until released or the runtime unloads.
    Lifetime,
}

/// Where the pools stand against the configured limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Pressure {
    Normal,
    HighWater,
    AtCap,
}

/// Two disjoint handle pools plus the reverse object lookup that keeps them disjoint.
pub struct HandlePools {
    next: u32,
    transient: HashMap<ManagedHandle, ObjectId>,
    lifetime: HashMap<ManagedHandle, ObjectId>,
    reverse: HashMap<ObjectId, (ManagedHandle, PoolKind)>,
    limits: HandlePoolConfig,
}

impl HandlePools {
    pub fn new(limits: HandlePoolConfig) -> Self {
        Self { next: 0, transient: HashMap::new(), lifetime: HashMap::new(), reverse: HashMap::new(), limits }
    }

    fn allocate(&mut self) -> ManagedHandle {
        loop {
            self.next = self.next.wrapping_add(1);
            if let Some(handle) = ManagedHandle::from_raw(self.next) {
                if !self.transient.contains_key(&handle) && !self.lifetime.contains_key(&handle) {
                    return handle;
                }
            }
        }
    }

    /// Registers `object` in `kind`. An object already tracked keeps its existing handle and pool.
    pub fn register(&mut self, object: ObjectId, kind: PoolKind) -> ManagedHandle {
        if let Some((handle, _)) = self.reverse.get(&object) {
            return *handle;
        }
        let handle = self.allocate();
        match kind {
            PoolKind::Transient => self.transient.insert(handle, object),
            PoolKind::Lifetime => self.lifetime.insert(handle, object),
        };
        self.reverse.insert(object, (handle, kind));
        handle
    }

    pub fn resolve(&self, handle: ManagedHandle) -> Option<ObjectId> {
        self.transient.get(&handle).or_else(|| self.lifetime.get(&handle)).copied()
    }

    pub fn pool_of(&self, handle: ManagedHandle) -> Option<PoolKind> {
        if self.transient.contains_key(&handle) {
            Some(PoolKind::Transient)
        } else if self.lifetime.contains_key(&handle) {
            Some(PoolKind::Lifetime)
        } else {
            None
        }
    }

    pub fn handle_for(&self, object: ObjectId) -> Option<(ManagedHandle, PoolKind)> {
        self.reverse.get(&object).copied()
    }

    pub fn release(&mut self, handle: ManagedHandle) -> Option<ObjectId> {
        let object = self.transient.remove(&handle).or_else(|| self.lifetime.remove(&handle))?;
        self.reverse.remove(&object);
        Some(object)
    }

    /// Releases every handle whose target fails `is_live`. Returns how many were released.
    pub fn sweep(&mut self, mut is_live: impl FnMut(ObjectId) -> bool) -> usize {
        let stale: Vec<ManagedHandle> = self
            .transient
            .iter()
            .chain(self.lifetime.iter())
            .filter(|(_, object)| !is_live(**object))
            .map(|(handle, _)| *handle)
            .collect();
        for handle in &stale {
            self.release(*handle);
        }
        stale.len()
    }

    /// Objects held by the lifetime pool; these are collection roots.
    pub fn lifetime_objects(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.lifetime.values().copied()
    }

    /// Drops every handle. The counter keeps running so handles from before stay invalid.
    pub fn clear(&mut self) -> usize {
        let count = self.len();
        self.transient.clear();
        self.lifetime.clear();
        self.reverse.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.transient.len() + self.lifetime.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn transient_len(&self) -> usize {
        self.transient.len()
    }

    pub fn lifetime_len(&self) -> usize {
        self.lifetime.len()
    }

    pub fn limits(&self) -> &HandlePoolConfig {
        &self.limits
    }

    pub(crate) fn pressure(&self) -> Pressure {
        let count = self.len();
        if count >= self.limits.hard_cap {
            Pressure::AtCap
        } else if count >= self.limits.high_water_mark {
            Pressure::HighWater
        } else {
            Pressure::Normal
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pools() -> HandlePools {
        HandlePools::new(HandlePoolConfig { high_water_mark: 2, hard_cap: 3 })
    }

    #[test]
    fn re_registering_returns_existing_handle() {
        let mut pools = pools();
        let object = ObjectId::from_bits(1);
        let first = pools.register(object, PoolKind::Transient);
        let second = pools.register(object, PoolKind::Lifetime);
        assert_eq!(first, second);
        assert_eq!(pools.pool_of(first), Some(PoolKind::Transient));
        assert_eq!(pools.transient_len(), 1);
        assert_eq!(pools.lifetime_len(), 0);
    }

    #[test]
    fn pools_stay_disjoint() {
        let mut pools = pools();
        let a = pools.register(ObjectId::from_bits(1), PoolKind::Transient);
        let b = pools.register(ObjectId::from_bits(2), PoolKind::Lifetime);
        assert_ne!(a, b);
        assert_eq!(pools.pool_of(a), Some(PoolKind::Transient));
        assert_eq!(pools.pool_of(b), Some(PoolKind::Lifetime));
        assert_eq!(pools.lifetime_objects().collect::<Vec<_>>(), vec![ObjectId::from_bits(2)]);
        assert_eq!(pools.release(a), Some(ObjectId::from_bits(1)));
        assert_eq!(pools.resolve(a), None);
        assert_eq!(pools.handle_for(ObjectId::from_bits(1)), None);
    }

    #[test]
    fn pressure_follows_limits() {
        let mut pools = pools();
        pools.register(ObjectId::from_bits(1), PoolKind::Transient);
        assert_eq!(pools.pressure(), Pressure::Normal);
        pools.register(ObjectId::from_bits(2), PoolKind::Transient);
        assert_eq!(pools.pressure(), Pressure::HighWater);
        pools.register(ObjectId::from_bits(3), PoolKind::Lifetime);
        assert_eq!(pools.pressure(), Pressure::AtCap);
    }

    #[test]
    fn sweep_releases_dead_targets_only() {
        let mut pools = pools();
        let keep = pools.register(ObjectId::from_bits(1), PoolKind::Transient);
        pools.register(ObjectId::from_bits(2), PoolKind::Transient);
        let swept = pools.sweep(|object| object == ObjectId::from_bits(1));
        assert_eq!(swept, 1);
        assert_eq!(pools.len(), 1);
        assert!(pools.resolve(keep).is_some());
    }

    #[test]
    fn handles_are_not_reused_after_clear() {
        let mut pools = pools();
        let before = pools.register(ObjectId::from_bits(1), PoolKind::Transient);
        pools.clear();
        let after = pools.register(ObjectId::from_bits(1), PoolKind::Transient);
        assert_ne!(before, after);
    }
}
