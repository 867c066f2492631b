//! Select result cache: a fixed 32-slot table mapping a short integer
//! handle to cached query output, with pinned retrieval,
//! grounded in `select-results.c`.

use std::sync::Mutex;

/// Number of cache slots. `id % NUM_SLOTS` locates a slot; `id` itself
/// (which advances by `NUM_SLOTS` on every reuse) disambiguates the
/// generation occupying that slot.
pub const NUM_SLOTS: u32 = 32;

#[derive(Default)]
struct Slot {
    data: Option<Vec<u8>>,
    id: u32,
    last_id: u32,
}

struct Inner {
    slots: [Slot; NUM_SLOTS as usize],
    next_id: u32,
}

/// Thread-safe, fixed-capacity cache for Select query results awaiting
/// paginated retrieval by the host.
pub struct SelectCache {
    inner: Mutex<Inner>,
}

impl Default for SelectCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectCache {
    pub fn new() -> Self {
        let mut slots: [Slot; NUM_SLOTS as usize] = Default::default();
        for (i, slot) in slots.iter_mut().enumerate() {
            slot.last_id = i as u32;
        }
        SelectCache {
            inner: Mutex::new(Inner { slots, next_id: 0 }),
        }
    }

    /// Store `data` under a new handle. If every slot is occupied, evicts
    /// the slot holding the smallest `id` (the oldest generation) — the
    /// returned handle is guaranteed to exceed every still-outstanding
    /// handle.
    pub fn store(&self, data: Vec<u8>) -> u32 {
        let mut inner = self.inner.lock().expect("select cache mutex poisoned");
        let start = inner.next_id;

        let mut oldest: Option<usize> = None;
        for step in 0..NUM_SLOTS {
            let idx = ((start + step) % NUM_SLOTS) as usize;
            if inner.slots[idx].data.is_none() {
                let id = inner.slots[idx].last_id + NUM_SLOTS;
                inner.slots[idx].data = Some(data);
                inner.slots[idx].id = id;
                inner.next_id = (idx as u32 + 1) % NUM_SLOTS;
                return id;
            }
            let is_oldest = match oldest {
                None => true,
                Some(o) => inner.slots[idx].id < inner.slots[o].id,
            };
            if is_oldest {
                oldest = Some(idx);
            }
            inner.next_id = (idx as u32 + 1) % NUM_SLOTS;
        }

        let idx = oldest.expect("cache has at least one slot");
        let id = inner.slots[idx].id + NUM_SLOTS;
        inner.slots[idx].data = Some(data);
        inner.slots[idx].id = id;
        id
    }

    /// Retrieve the entry for `id`. `do_not_remove` pins the slot — the
    /// caller gets a copy and the original stays cached. Otherwise the slot
    /// is freed (and the original buffer handed to the caller) unless
    /// `do_not_remove_if_size_gt` is set and the cached size exceeds
    /// `size_check`, in which case the entry is pinned anyway.
    pub fn retrieve(
        &self,
        id: u32,
        do_not_remove: bool,
        do_not_remove_if_size_gt: bool,
        size_check: usize,
    ) -> Option<Vec<u8>> {
        let mut inner = self.inner.lock().expect("select cache mutex poisoned");
        let idx = (id % NUM_SLOTS) as usize;
        let slot = &mut inner.slots[idx];
        if slot.data.is_none() || slot.id != id {
            return None;
        }

        let should_remove =
            !do_not_remove && (!do_not_remove_if_size_gt || slot.data.as_ref().unwrap().len() <= size_check);

        if should_remove {
            let data = slot.data.take();
            slot.last_id = slot.id;
            slot.id = 0;
            data
        } else {
            slot.data.clone()
        }
    }
}
