//! The ugen base contract (C5).
//!
//! Grounded on `original_source/arco/src/ugen.h`'s `Ugen` base class: a
//! shared block of state (`id`, `rate`, `chans`, `output`, `current_block`,
//! `flags`, `tail_blocks`, `action_id`) plus a `real_run` hook that
//! subclasses implement.
//!
//! **Resolved open question (refcount architecture, see DESIGN.md):** the
//! original keeps a hand-rolled `refcount`/`unref()` pair and a raw
//! `Ugen *` graph. Rust already has a reference-counted smart pointer with
//! exactly the ownership semantics `spec.md` §3 describes (table, input
//! slots and output/run sets are each "a strong reference"): [`UgenRef`] is
//! `Rc<RefCell<dyn Ugen>>`. Dropping the last `Rc` runs `Drop` on the
//! concrete ugen, which (via each ugen's generated field drop order)
//! releases its own input `UgenRef`s, which is exactly the recursive unref
//! chain the invariants in `spec.md` §3 require. `Ugen::refcount` reports
//! `Rc::strong_count` so the testable property in `spec.md` §8 item 2
//! still has a concrete number to assert against.

use std::cell::RefCell;
use std::rc::Rc;

use arco_primitives::seconds_to_blocks;
use bitflags::bitflags;

/// Shared pointer to a ugen. Cloning increments the reference count; the
/// audio thread is the only thread that ever touches the contents, so no
/// atomics are needed (§5: "only the audio thread mutates ugen state").
pub type UgenRef = Rc<RefCell<dyn Ugen>>;

/// The rate at which a ugen computes: once per sample, once per block
/// (held constant across the block by consumers), or never again after
/// construction (`Const`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rate {
    /// One sample per frame; `chans * BL` values in `output`.
    Audio,
    /// One value per block, held constant for the whole block; `chans`
    /// values in `output`.
    Block,
    /// One value, set directly by `const_set` and never recomputed;
    /// `current_block` is pinned so `run` is always a no-op.
    Const,
}

bitflags! {
    /// Bit flags from `original_source/arco/src/ugen.h` (`IN_RUN_SET`,
    /// `UGEN_MARK`, `CAN_TERMINATE`, `TERMINATING`, `TERMINATED`,
    /// `UGENTRACE`), plus `IN_OUTPUT_SET` which the original keeps as a
    /// separate bool but which fits the same bit set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct UgenFlags: u8 {
        const IN_RUN_SET    = 1 << 0;
        const IN_OUTPUT_SET = 1 << 1;
        const MARK          = 1 << 2;
        const CAN_TERMINATE = 1 << 3;
        const TERMINATING   = 1 << 4;
        const TERMINATED    = 1 << 5;
        const TRACE         = 1 << 6;
    }
}

/// The state shared by every ugen, embedded by value in each concrete
/// ugen struct (`Const`, `Thru`, `Delay`, ...).
#[derive(Debug)]
pub struct UgenBase {
    pub id: i32,
    pub rate: Rate,
    pub chans: usize,
    pub output: Vec<f32>,
    pub current_block: u64,
    pub flags: UgenFlags,
    pub tail_blocks: i32,
    pub action_id: i32,
}

impl UgenBase {
    /// Construct a fresh base; `id = -1` marks a ugen that is not (yet)
    /// installed in the table (mirrors passing `id = -1` in the original
    /// constructor for ugens created ahead of being bound into the table).
    pub fn new(id: i32, rate: Rate, chans: usize) -> Self {
        let output_len = match rate {
            Rate::Audio => chans * arco_primitives::BL,
            Rate::Block | Rate::Const => chans,
        };
        Self {
            id,
            rate,
            chans,
            output: vec![0.0; output_len],
            current_block: 0,
            flags: UgenFlags::empty(),
            tail_blocks: 0,
            action_id: 0,
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.flags.contains(UgenFlags::TERMINATED)
    }

    pub fn is_terminating(&self) -> bool {
        self.flags.contains(UgenFlags::TERMINATING)
    }
}

/// The dynamic-dispatch ugen contract (C5). Object safe: the ugen table
/// and every input slot hold a `Rc<RefCell<dyn Ugen>>`, so concrete
/// classes are discriminated by vtable, not generics, as design note §9
/// requires ("tagged variant with a per-class vtable ... do not use
/// runtime type information").
pub trait Ugen: std::fmt::Debug {
    fn base(&self) -> &UgenBase;
    fn base_mut(&mut self) -> &mut UgenBase;

    /// Stable class name, compared by the audio thread's message dispatch
    /// for type-checked ID lookups (`id_to_ugen` in the original).
    fn classname(&self) -> &'static str;

    /// Subclass-provided per-block computation. Must pull each input via
    /// `input.borrow_mut().run(block)`, then read it back with a fresh
    /// `borrow()`, and must write `chans` (block/const) or `chans * BL`
    /// (audio) samples into `self.base_mut().output`.
    fn real_run(&mut self);

    /// Write samples directly into the output buffer, bypassing
    /// `real_run`, and bump `current_block`. Only the device-input and
    /// previous-output sentinel `Thru` nodes override this; `arco_graph`'s
    /// audio I/O state machine calls it once per block instead of binding
    /// those nodes to a regular input. Default is a no-op.
    fn write_direct(&mut self, _block: u64, _samples: &[f32]) {}

    /// Escape hatch for `arco_graph`'s message dispatch: every concrete
    /// ugen implements this as `{ self }`. Once a message's target class
    /// has been confirmed with `classname()`, the dispatcher downcasts
    /// through this to call a class-specific setter (`repl_dur`,
    /// `set_speed`, ...) that has no home on this shared trait.
    /// Downcasting here is a call-site convenience after the class check
    /// already performed with `classname()`, not a substitute for it.
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any;

    /// Called at most once, the block a ugen's `TERMINATED` flag is set.
    /// The default implementation fires the configured `action_id` event;
    /// override to release ugen-specific resources (e.g. recplay's
    /// borrowed buffer) before or after calling through.
    fn on_terminate(&mut self) {}

    /// Only valid on `Rate::Const` ugens: write one channel directly. The
    /// default implementation is a no-op with a debug assertion so
    /// non-const ugens calling this by mistake fail loudly in tests
    /// without panicking in release audio callbacks.
    fn const_set(&mut self, chan: usize, value: f32) {
        debug_assert!(
            self.base().rate == Rate::Const,
            "const_set called on non-const ugen {}",
            self.classname()
        );
        if chan < self.base().chans {
            self.base_mut().output[chan] = value;
        }
    }

    /// The pull entry point. Idempotent within a block: a second call with
    /// the same `block` index returns without recomputing, satisfying the
    /// testable property in `spec.md` §8 item 1.
    fn run(&mut self, block: u64) {
        if self.base().rate == Rate::Const {
            return;
        }
        if block > self.base().current_block {
            self.base_mut().current_block = block;
            if self.base().is_terminated() {
                let n = self.base().output.len();
                self.base_mut().output[..n].fill(0.0);
            } else {
                self.real_run();
            }
        }
    }

    /// Mark that this ugen should keep running for `tail_seconds` after an
    /// input terminates, instead of terminating on the same block.
    fn term(&mut self, tail_seconds: f64) {
        let base = self.base_mut();
        if !base.flags.intersects(UgenFlags::TERMINATING | UgenFlags::TERMINATED) {
            base.tail_blocks = seconds_to_blocks(tail_seconds) as i32;
            base.flags.insert(UgenFlags::CAN_TERMINATE);
        }
    }

    /// Begin (or continue) terminating. On the call where `tail_blocks`
    /// was already zero or negative, sets `TERMINATED` and fires
    /// `on_terminate` exactly once.
    fn terminate(&mut self) {
        let already_terminated = self.base().is_terminated();
        if already_terminated {
            return;
        }
        let base = self.base_mut();
        base.flags.insert(UgenFlags::TERMINATING);
        let was_due = base.tail_blocks <= 0;
        base.tail_blocks -= 1;
        if was_due {
            base.flags.insert(UgenFlags::TERMINATED);
            let n = base.output.len();
            base.output[..n].fill(0.0);
            self.on_terminate();
        }
    }
}

/// Raise the output's sentinel `can_terminate` ugens check their input
/// against. Returns true if `input`'s `TERMINATED` flag is set.
pub fn input_terminated(input: &UgenRef) -> bool {
    input.borrow().base().is_terminated()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Dummy {
        base: UgenBase,
        run_count: u32,
    }
    impl Ugen for Dummy {
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
        fn base(&self) -> &UgenBase {
            &self.base
        }
        fn base_mut(&mut self) -> &mut UgenBase {
            &mut self.base
        }
        fn classname(&self) -> &'static str {
            "Dummy"
        }
        fn real_run(&mut self) {
            self.run_count += 1;
            self.base.output.fill(1.0);
        }
    }

    #[test]
    fn run_is_idempotent_within_a_block() {
        let mut d = Dummy {
            base: UgenBase::new(-1, Rate::Audio, 1),
            run_count: 0,
        };
        d.run(1);
        d.run(1);
        assert_eq!(d.run_count, 1);
        d.run(2);
        assert_eq!(d.run_count, 2);
    }

    #[test]
    fn terminated_ugen_outputs_zero() {
        let mut d = Dummy {
            base: UgenBase::new(-1, Rate::Audio, 1),
            run_count: 0,
        };
        d.run(1);
        assert!(d.base.output.iter().all(|&s| s == 1.0));
        d.terminate(); // tail_blocks defaults to 0: terminates immediately
        assert!(d.base.is_terminated());
        d.run(2);
        assert!(d.base.output.iter().all(|&s| s == 0.0));
        assert_eq!(d.run_count, 1, "real_run must not run once terminated");
    }

    #[test]
    fn term_delays_termination_by_configured_tail() {
        let mut d = Dummy {
            base: UgenBase::new(-1, Rate::Audio, 1),
            run_count: 0,
        };
        let one_block_secs = arco_primitives::BL as f64 / arco_primitives::AR as f64;
        d.term(one_block_secs); // tail_blocks = 1
        d.terminate(); // first call: not yet due (tail_blocks was 1)
        assert!(!d.base.is_terminated());
        d.terminate(); // second call: tail_blocks was 0, now due
        assert!(d.base.is_terminated());
    }

    #[test]
    fn on_terminate_fires_exactly_once() {
        #[derive(Debug)]
        struct Counting {
            base: UgenBase,
            terminate_calls: u32,
        }
        impl Ugen for Counting {
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
            fn base(&self) -> &UgenBase {
                &self.base
            }
            fn base_mut(&mut self) -> &mut UgenBase {
                &mut self.base
            }
            fn classname(&self) -> &'static str {
                "Counting"
            }
            fn real_run(&mut self) {}
            fn on_terminate(&mut self) {
                self.terminate_calls += 1;
            }
        }
        let mut c = Counting {
            base: UgenBase::new(-1, Rate::Audio, 1),
            terminate_calls: 0,
        };
        c.terminate();
        c.terminate();
        c.terminate();
        assert_eq!(c.terminate_calls, 1);
    }
}
