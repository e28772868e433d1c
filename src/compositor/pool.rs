/// Fixed-capacity set of particle slots.
///
/// All slots are allocated up front. Spawning claims the first free slot and
/// is a no-op when the pool is full; expiring frees the slot for reuse. The
/// backing storage never grows.
pub struct ParticlePool<T> {
    slots: Box<[Option<T>]>,
    active: usize,
}

impl<T> ParticlePool<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: std::iter::repeat_with(|| None).take(capacity).collect(),
            active: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn active_count(&self) -> usize {
        self.active
    }

    pub fn is_full(&self) -> bool {
        self.active == self.slots.len()
    }

    /// Place `particle` in the first inactive slot. Returns false, dropping
    /// the particle, when every slot is taken.
    pub fn spawn(&mut self, particle: T) -> bool {
        if self.is_full() {
            return false;
        }
        match self.slots.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => {
                *slot = Some(particle);
                self.active += 1;
                true
            }
            None => false,
        }
    }

    /// Run `step` on every active particle; those for which it returns false
    /// expire.
    pub fn update<F>(&mut self, mut step: F)
    where
        F: FnMut(&mut T) -> bool,
    {
        for slot in self.slots.iter_mut() {
            if let Some(particle) = slot {
                if !step(particle) {
                    *slot = None;
                    self.active -= 1;
                }
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.slots.iter().filter_map(Option::as_ref)
    }

    pub fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
        self.active = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawning_into_a_full_pool_is_a_no_op() {
        let mut pool = ParticlePool::new(3);
        assert!(pool.spawn(1));
        assert!(pool.spawn(2));
        assert!(pool.spawn(3));
        assert!(!pool.spawn(4));
        assert_eq!(pool.active_count(), 3);
        assert_eq!(pool.capacity(), 3);
        assert!(!pool.iter().any(|&p| p == 4));
    }

    #[test]
    fn expired_slots_are_reused() {
        let mut pool = ParticlePool::new(2);
        pool.spawn(10);
        pool.spawn(20);
        pool.update(|p| *p != 10);
        assert_eq!(pool.active_count(), 1);

        assert!(pool.spawn(30));
        let mut live: Vec<_> = pool.iter().copied().collect();
        live.sort();
        assert_eq!(live, vec![20, 30]);
    }

    #[test]
    fn update_mutates_in_place() {
        let mut pool = ParticlePool::new(4);
        pool.spawn(1.0_f32);
        pool.update(|life| {
            *life -= 0.25;
            *life > 0.0
        });
        assert_eq!(pool.iter().next(), Some(&0.75));

        pool.clear();
        assert_eq!(pool.active_count(), 0);
    }
}
