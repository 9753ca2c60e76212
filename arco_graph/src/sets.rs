//! Output set and run set (C9).
//!
//! Grounded on `spec.md` §3/§4.8: small, ordered sets of ugen ids with
//! repair-on-free semantics. Kept as plain `Vec<UgenId>` with a linear
//! scan on insert/remove, per §4.2's own note that "sets are small".

use arco_core::ugen::Rate;

use crate::error::ArcoError;
use crate::table::{UgenId, UgenTable};

/// Ordered list of ugen ids whose outputs are summed to the device output
/// each block, in insertion order (the first contributor copies and
/// zero-fills for channel mismatch; later ones accumulate).
#[derive(Debug, Default)]
pub struct OutputSet {
    members: Vec<UgenId>,
}

impl OutputSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `id`, rejecting it if its ugen is not audio-rate (§3: "A
    /// ugen in the output set has `rate == audio`").
    pub fn insert(&mut self, id: UgenId, table: &UgenTable) -> Result<(), ArcoError> {
        let ugen = table.lookup(id)?;
        if ugen.borrow().base().rate != Rate::Audio {
            return Err(ArcoError::RateMismatch(id));
        }
        if !self.members.contains(&id) {
            self.members.push(id);
        }
        Ok(())
    }

    pub fn remove(&mut self, id: UgenId) {
        self.members.retain(|&m| m != id);
    }

    pub fn contains(&self, id: UgenId) -> bool {
        self.members.contains(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = UgenId> + '_ {
        self.members.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Ordered list of ugen ids pulled every block for side effects (feature
/// extractors, loggers) despite producing no output consumed by the mix.
#[derive(Debug, Default)]
pub struct RunSet {
    members: Vec<UgenId>,
}

impl RunSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: UgenId) {
        if !self.members.contains(&id) {
            self.members.push(id);
        }
    }

    pub fn remove(&mut self, id: UgenId) {
        self.members.retain(|&m| m != id);
    }

    pub fn contains(&self, id: UgenId) -> bool {
        self.members.contains(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = UgenId> + '_ {
        self.members.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arco_core::ugens::{Const, Thru};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn output_set_rejects_block_rate_members() {
        let mut table = UgenTable::new(2);
        let c: arco_core::ugen::UgenRef = Rc::new(RefCell::new(Const::new(100, 1, &[0.0])));
        table.install(100, c).unwrap();
        let mut set = OutputSet::new();
        assert!(set.insert(100, &table).is_err());
    }

    #[test]
    fn output_set_accepts_audio_rate_members_once() {
        let mut table = UgenTable::new(2);
        let t: arco_core::ugen::UgenRef = Rc::new(RefCell::new(Thru::new(100, 1)));
        table.install(100, t).unwrap();
        let mut set = OutputSet::new();
        set.insert(100, &table).unwrap();
        set.insert(100, &table).unwrap();
        assert_eq!(set.iter().count(), 1);
    }

    #[test]
    fn run_set_remove_compacts() {
        let mut set = RunSet::new();
        set.insert(1);
        set.insert(2);
        set.remove(1);
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![2]);
    }
}
