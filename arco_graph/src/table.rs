//! Ugen table and ID allocator (C4).
//!
//! Grounded on `original_source/arco/src/ugenid.h`/`ugenids.h` for the
//! table size and reserved sentinel ids, and on
//! `knaster_graph::graph::Graph`'s use of `slotmap::new_key_type!` for
//! node storage — this table keys its backing `SlotMap` the same way, but
//! (per `SPEC_FULL.md` §3) exposes plain, stable `i32` ids rather than
//! generational keys, since those ids cross the wire to and from the
//! control client and must be predictable, small integers.
//!
//! **Two-phase deletion.** `free` does not remove an entry immediately;
//! it queues the id onto `pending_free`. `collect_garbage` — called once
//! per block, after the inbox is fully drained and before any ugen is
//! pulled — is what actually drops the table's strong reference and
//! repairs the output/run sets. This tolerates the case `spec.md` §4.4
//! calls out: a `free` and a later message in the *same* inbox drain
//! still naming that id both get processed against a table that hasn't
//! mutated mid-batch.

use std::cell::RefCell;
use std::rc::Rc;

use arco_core::ugen::{Rate, UgenRef};
use arco_core::ugens::{Thru, Zero};
use slotmap::{SlotMap, new_key_type};

use crate::error::ArcoError;
use crate::sets::{OutputSet, RunSet};

new_key_type! {
    struct UgenKey;
}

pub type UgenId = i32;

/// Reserved ids, from `original_source/arco/src/ugenids.h`.
pub const ZERO_ID: UgenId = 0;
pub const ZEROB_ID: UgenId = 1;
pub const INPUT_ID: UgenId = 2;
pub const PREV_OUTPUT_ID: UgenId = 3;
pub const UGEN_BASE_ID: UgenId = 4;

/// From `original_source/arco/src/ugenid.h`.
pub const UGEN_TABLE_SIZE: usize = 5000;

/// Bounded map from small integer ids to ugens, backed by a `SlotMap` for
/// storage so prior-occupant cleanup is O(1) regardless of how sparse the
/// table gets.
#[derive(Debug)]
pub struct UgenTable {
    slots: Vec<Option<UgenKey>>,
    storage: SlotMap<UgenKey, UgenRef>,
    pending_free: Vec<UgenId>,
}

impl UgenTable {
    /// Construct an empty table sized `UGEN_TABLE_SIZE` and pre-install
    /// the four reserved sentinels: `ZERO_ID`/`ZEROB_ID` (audio- and
    /// block-rate silence) and `INPUT_ID`/`PREV_OUTPUT_ID` (`Thru` nodes
    /// fed directly by the audio I/O state machine via `write_direct`,
    /// sized to `device_chans`).
    pub fn new(device_chans: usize) -> Self {
        let mut table = Self {
            slots: vec![None; UGEN_TABLE_SIZE],
            storage: SlotMap::with_key(),
            pending_free: Vec::new(),
        };
        table
            .install(ZERO_ID, Rc::new(RefCell::new(Zero::new(ZERO_ID, Rate::Audio, 1))))
            .expect("reserved id in range");
        table
            .install(ZEROB_ID, Rc::new(RefCell::new(Zero::new(ZEROB_ID, Rate::Block, 1))))
            .expect("reserved id in range");
        table
            .install(INPUT_ID, Rc::new(RefCell::new(Thru::new(INPUT_ID, device_chans))))
            .expect("reserved id in range");
        table
            .install(PREV_OUTPUT_ID, Rc::new(RefCell::new(Thru::new(PREV_OUTPUT_ID, device_chans))))
            .expect("reserved id in range");
        table
    }

    fn slot_index(&self, id: UgenId) -> Result<usize, ArcoError> {
        if id < 0 || id as usize >= self.slots.len() {
            return Err(ArcoError::IdOutOfRange(id, self.slots.len()));
        }
        Ok(id as usize)
    }

    /// Install `ugen` at `id`, dropping the table's strong reference to
    /// any prior occupant. Per `spec.md` §4.2, only the audio thread calls
    /// this; the control client allocates the id beforehand and this
    /// table never generates one.
    pub fn install(&mut self, id: UgenId, ugen: UgenRef) -> Result<(), ArcoError> {
        let idx = self.slot_index(id)?;
        if let Some(old_key) = self.slots[idx].take() {
            self.storage.remove(old_key);
        }
        self.slots[idx] = Some(self.storage.insert(ugen));
        log::debug!("installed ugen {id}");
        Ok(())
    }

    pub fn lookup(&self, id: UgenId) -> Result<UgenRef, ArcoError> {
        let idx = self.slot_index(id)?;
        let key = self.slots[idx].ok_or(ArcoError::LookupFailure(id))?;
        Ok(self.storage[key].clone())
    }

    /// Lookup with a class-name check: `spec.md` §4.2's "class checks
    /// compare interned class-name pointers for O(1) type discrimination
    /// without RTTI" — here, `&'static str` equality plays that role.
    pub fn lookup_typed(&self, id: UgenId, expected: &'static str) -> Result<UgenRef, ArcoError> {
        let ugen = self.lookup(id)?;
        let found = ugen.borrow().classname();
        if found != expected {
            return Err(ArcoError::ClassMismatch { id, found, expected });
        }
        Ok(ugen)
    }

    pub fn contains(&self, id: UgenId) -> bool {
        self.slot_index(id).ok().and_then(|idx| self.slots[idx]).is_some()
    }

    /// Queue `id` for removal; see the module doc comment for why this is
    /// deferred rather than immediate.
    pub fn free(&mut self, id: UgenId) {
        self.pending_free.push(id);
    }

    /// Drop the table's reference to every id queued by `free` since the
    /// last call, repairing the output/run sets for any that were
    /// members (`spec.md` §4.8: "On ugen free ... the sets are repaired
    /// before the destructor completes"). Must run once per block, after
    /// the inbox is drained and before any ugen in the graph is pulled.
    pub fn collect_garbage(&mut self, output_set: &mut OutputSet, run_set: &mut RunSet) {
        let pending: Vec<UgenId> = self.pending_free.drain(..).collect();
        for id in pending {
            let idx = match self.slot_index(id) {
                Ok(idx) => idx,
                Err(_) => continue,
            };
            if let Some(key) = self.slots[idx].take() {
                self.storage.remove(key);
                output_set.remove(id);
                run_set.remove(id);
                log::trace!("freed ugen {id}");
            } else {
                log::warn!("free: no ugen at id {id}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arco_core::ugens::Const;

    #[test]
    fn sentinels_are_preinstalled() {
        let table = UgenTable::new(2);
        assert!(table.contains(ZERO_ID));
        assert!(table.contains(ZEROB_ID));
        assert!(table.contains(INPUT_ID));
        assert!(table.contains(PREV_OUTPUT_ID));
    }

    #[test]
    fn install_replaces_prior_occupant() {
        let mut table = UgenTable::new(2);
        let a: UgenRef = Rc::new(RefCell::new(Const::new(100, 1, &[1.0])));
        let b: UgenRef = Rc::new(RefCell::new(Const::new(100, 1, &[2.0])));
        table.install(100, a).unwrap();
        table.install(100, b).unwrap();
        assert_eq!(table.lookup(100).unwrap().borrow().base().output[0], 2.0);
    }

    #[test]
    fn lookup_typed_rejects_wrong_class() {
        let mut table = UgenTable::new(2);
        table.install(100, Rc::new(RefCell::new(Const::new(100, 1, &[0.0])))).unwrap();
        assert!(table.lookup_typed(100, "Thru").is_err());
        assert!(table.lookup_typed(100, "Const").is_ok());
    }

    #[test]
    fn free_is_deferred_until_collect_garbage() {
        let mut table = UgenTable::new(2);
        table.install(100, Rc::new(RefCell::new(Const::new(100, 1, &[0.0])))).unwrap();
        let mut output_set = OutputSet::new();
        let mut run_set = RunSet::new();
        run_set.insert(100);
        table.free(100);
        assert!(table.contains(100), "entry must survive until collect_garbage");
        table.collect_garbage(&mut output_set, &mut run_set);
        assert!(!table.contains(100));
        assert!(!run_set.contains(100));
    }

    #[test]
    fn out_of_range_id_is_an_error() {
        let table = UgenTable::new(2);
        assert!(table.lookup(UGEN_TABLE_SIZE as i32 + 1).is_err());
        assert!(table.lookup(-1).is_err());
    }
}
