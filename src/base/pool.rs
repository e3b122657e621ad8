//! `SlotPool` is a reusable object pool addressed by index.
//!
//! Entries live in a dense array; released slots go onto a free-index stack and are handed out
//! again by the next `acquire`.  Each slot carries a generation counter so an id kept after its
//! entry was released is detected instead of silently aliasing the next occupant.
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId {
    index: u32,
    generation: u32,
}

impl SlotId {
    pub fn index(&self) -> usize {
        self.index as usize
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

#[derive(Debug)]
pub struct SlotPool<T> {
    name: &'static str,
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    capacity: Option<usize>,
    live: usize,
    next_uid: u64,
}

impl<T> SlotPool<T> {
    /// A pool that grows on demand.
    pub fn unbounded(name: &'static str) -> Self {
        Self {
            name,
            slots: Vec::new(),
            free: Vec::new(),
            capacity: None,
            live: 0,
            next_uid: 0,
        }
    }

    /// A pool with a fixed number of entries; `acquire` fails once all are in use.
    pub fn bounded(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            capacity: Some(capacity),
            live: 0,
            next_uid: 0,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn live(&self) -> usize {
        self.live
    }

    pub fn is_exhausted(&self) -> bool {
        self.capacity.is_some_and(|cap| self.live >= cap)
    }

    pub fn available(&self) -> Option<usize> {
        self.capacity.map(|cap| cap - self.live)
    }

    /// Monotonic id generator owned by the pool, used to stamp unique ids on new entries.
    pub fn next_uid(&mut self) -> u64 {
        self.next_uid += 1;
        self.next_uid
    }

    pub fn acquire(&mut self, value: T) -> Option<SlotId> {
        if self.is_exhausted() {
            return None;
        }
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            debug_assert!(slot.value.is_none());
            slot.value = Some(value);
            return Some(SlotId {
                index,
                generation: slot.generation,
            });
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        Some(SlotId {
            index,
            generation: 0,
        })
    }

    pub fn release(&mut self, id: SlotId) -> T {
        let name = self.name;
        let slot = self
            .slots
            .get_mut(id.index())
            .unwrap_or_else(|| panic!("{name}: release of unknown slot {id}"));
        assert_eq!(
            slot.generation, id.generation,
            "{name}: release of stale slot {id}"
        );
        let value = slot
            .value
            .take()
            .unwrap_or_else(|| panic!("{name}: double release of slot {id}"));
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.live -= 1;
        value
    }

    pub fn get(&self, id: SlotId) -> &T {
        self.slots
            .get(id.index())
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.value.as_ref())
            .unwrap_or_else(|| panic!("{}: access to dead slot {id}", self.name))
    }

    pub fn get_mut(&mut self, id: SlotId) -> &mut T {
        let name = self.name;
        self.slots
            .get_mut(id.index())
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.value.as_mut())
            .unwrap_or_else(|| panic!("{name}: access to dead slot {id}"))
    }

    pub fn contains(&self, id: SlotId) -> bool {
        self.slots
            .get(id.index())
            .is_some_and(|slot| slot.generation == id.generation && slot.value.is_some())
    }
}
