//! Control-message inbox (C7).
//!
//! Grounded on `spec.md` §4.4: drained exactly once per audio callback,
//! before any ugen is pulled, strictly in producer send order. The
//! drain loop shape (loop `pop()` until empty) mirrors the
//! drain-before-process pattern in
//! `knaster_graph::graph_gen::GraphGen::process`, simplified from that
//! code's chunked `read_chunk` since message volume here is much lower
//! than per-sample task data.
//!
//! The original builds a per-class table of `(address, type string,
//! handler)` tuples at static-init time and dispatches by string lookup.
//! `Message` is already a typed Rust enum by the time it reaches this
//! inbox, so that registry collapses into the one `match` below; see
//! `DESIGN.md`.

use std::rc::Rc;
use std::cell::RefCell;

use arco_core::ugens::{Const, Delay, Allpass, Mix, Sum, RecPlay, Tableosc, MathBinary, MathUnary, Vu, SpectralCentroid, SpectralRolloff, Probe, StrPlay, FileRec};
use arco_core::ugen::UgenRef;
use rtrb::Consumer;

use crate::fileio_worker::FileIoHub;
use crate::message::{Message, ParamSlot};
use crate::sets::{OutputSet, RunSet};
use crate::table::UgenTable;

pub struct Inbox {
    consumer: Consumer<Message>,
}

impl Inbox {
    pub fn new(consumer: Consumer<Message>) -> Self {
        Self { consumer }
    }

    /// Drain every message currently queued, applying each to `table`,
    /// `output_set` and `run_set` in arrival order. Must run before
    /// `table.collect_garbage` and before any ugen in the graph is
    /// pulled for the block.
    pub fn drain(
        &mut self,
        table: &mut UgenTable,
        output_set: &mut OutputSet,
        run_set: &mut RunSet,
        fileio: &mut FileIoHub,
    ) {
        while let Ok(message) = self.consumer.pop() {
            apply(message, table, output_set, run_set, fileio);
        }
    }
}

fn apply(
    message: Message,
    table: &mut UgenTable,
    output_set: &mut OutputSet,
    run_set: &mut RunSet,
    fileio: &mut FileIoHub,
) {
    match message {
        Message::Reset => {
            log::info!("reset requested; caller must rebuild the table");
        }
        Message::PrintTree => {
            log::info!("output set: {:?}", output_set.iter().collect::<Vec<_>>());
        }
        Message::Free(ids) => {
            for id in ids {
                table.free(id);
            }
        }
        Message::Open { .. } | Message::Close => {
            log::debug!("{message:?} forwarded to the audio backend state machine");
        }
        Message::AddToOutput(id) => {
            if let Err(e) = output_set.insert(id, table) {
                log::warn!("add to output set failed: {e}");
            }
        }
        Message::RemoveFromOutput(id) | Message::Mute(id) => {
            output_set.remove(id);
        }

        Message::ConstNew { id, chans, initial } => {
            table
                .install(id, Rc::new(RefCell::new(Const::new(id, chans, &initial))))
                .unwrap_or_else(|e| log::warn!("const/new failed: {e}"));
        }
        Message::ConstSet { id, chan, value } => {
            with_ugen(table, id, |ugen| {
                use arco_core::ugen::Ugen;
                ugen.const_set(chan, value);
            });
        }

        Message::ReplInput { id, param, source } => {
            let Ok(source_ugen) = table.lookup(source) else {
                log::warn!("repl_input: no source ugen {source}");
                return;
            };
            bind_param(table, id, param, source_ugen);
        }
        Message::SetConst { id, param, chan, value } => {
            set_param(table, id, param, chan, value);
        }

        Message::TableCreateTtd { id, index, samples } => {
            with_typed::<Tableosc, _>(table, id, "Tableosc", |t| t.create_ttd(index, &samples));
        }
        Message::TableCreateTas { id, index, amps, table_len } => {
            with_typed::<Tableosc, _>(table, id, "Tableosc", |t| t.create_tas(index, &amps, table_len));
        }
        Message::TableCreateTcs { id, index, amps, phases, table_len } => {
            with_typed::<Tableosc, _>(table, id, "Tableosc", |t| t.create_tcs(index, &amps, phases.as_slice(), table_len));
        }
        Message::TableoscSelect { id, index } => {
            with_typed::<Tableosc, _>(table, id, "Tableosc", |t| t.select_table(index));
        }

        Message::MixAddInput { id, source, gain } => {
            let (Ok(source_ugen), Ok(gain_ugen)) = (table.lookup(source), table.lookup(gain)) else {
                log::warn!("mix/add_input: source or gain id missing");
                return;
            };
            with_typed::<Mix, _>(table, id, "Mix", |m| m.add_input(source_ugen, gain_ugen));
        }
        Message::MixRemoveInput { id, source } => {
            with_typed::<Mix, _>(table, id, "Mix", |m| m.remove_input(source));
        }
        Message::SumAddInput { id, source } => {
            let Ok(source_ugen) = table.lookup(source) else {
                log::warn!("sum/add_input: source id missing");
                return;
            };
            with_typed::<Sum, _>(table, id, "Sum", |s| s.add_input(source_ugen));
        }
        Message::SumRemoveInput { id, source } => {
            with_typed::<Sum, _>(table, id, "Sum", |s| s.remove_input(source));
        }

        Message::RecPlayRecord { id, on } => {
            with_typed::<RecPlay, _>(table, id, "RecPlay", |r| r.record(on));
        }
        Message::RecPlayPlay { id, start_time_secs } => {
            with_typed::<RecPlay, _>(table, id, "RecPlay", |r| r.play(start_time_secs));
        }
        Message::RecPlayStop { id } => {
            with_typed::<RecPlay, _>(table, id, "RecPlay", |r| r.stop());
        }
        Message::RecPlaySetLoop { id, looping } => {
            with_typed::<RecPlay, _>(table, id, "RecPlay", |r| r.set_loop(looping));
        }
        Message::RecPlaySetSpeed { id, speed } => {
            with_typed::<RecPlay, _>(table, id, "RecPlay", |r| r.set_speed(speed));
        }
        Message::RecPlaySetFade { id, secs } => {
            with_typed::<RecPlay, _>(table, id, "RecPlay", |r| r.set_fade(secs));
        }

        Message::ProbeStart { id, reply_addr, period_secs } => {
            if let Ok(ugen) = table.lookup(id) {
                use arco_core::ugen::Ugen;
                let mut borrowed = ugen.borrow_mut();
                let classname = borrowed.classname();
                let any = borrowed.as_any_mut();
                match classname {
                    "Vu" => any.downcast_mut::<Vu>().unwrap().start(&reply_addr, period_secs),
                    "SpectralCentroid" => any.downcast_mut::<SpectralCentroid>().unwrap().start(&reply_addr),
                    "SpectralRolloff" => any.downcast_mut::<SpectralRolloff>().unwrap().start(&reply_addr),
                    other => log::warn!("probe/start: {other} does not support start()"),
                }
                drop(borrowed);
                run_set.insert(id);
            } else {
                log::warn!("probe/start: no ugen {id}");
            }
        }
        Message::ProbeThresh { id, threshold, direction, max_wait_secs } => {
            with_typed::<Probe, _>(table, id, "Probe", |p| p.thresh(threshold, direction, max_wait_secs));
        }
        Message::ProbeSample { id, period_secs, frames, chan, nchans, stride } => {
            with_typed::<Probe, _>(table, id, "Probe", |p| p.probe(period_secs, frames, chan, nchans, stride));
            run_set.insert(id);
        }
        Message::ProbeStop { id } => {
            with_typed::<Probe, _>(table, id, "Probe", |p| p.stop());
            run_set.remove(id);
        }

        Message::StrplayNew { id, chans, filename, start, end, cycle, mix, expand } => {
            let handle = id as u64;
            let port = fileio.make_port();
            let ugen = StrPlay::new(id, chans, handle, &filename, start, end, cycle, mix, expand, port);
            table
                .install(id, Rc::new(RefCell::new(ugen)))
                .unwrap_or_else(|e| log::warn!("strplay/new failed: {e}"));
            run_set.insert(id);
        }
        Message::StrplayPlay { id, play } => {
            with_typed::<StrPlay, _>(table, id, "StrPlay", |s| s.play(play));
        }
        Message::StrplayQuit { id } => {
            with_typed::<StrPlay, _>(table, id, "StrPlay", |s| s.play(false));
            run_set.remove(id);
            table.free(id);
        }
        Message::FilerecNew { id, chans, filename, input } => {
            let Ok(input_ugen) = table.lookup(input) else {
                log::warn!("filerec/new: no input ugen {input}");
                return;
            };
            let handle = id as u64;
            let port = fileio.make_port();
            let ugen = FileRec::new(id, chans, handle, &filename, input_ugen, port);
            table
                .install(id, Rc::new(RefCell::new(ugen)))
                .unwrap_or_else(|e| log::warn!("filerec/new failed: {e}"));
            run_set.insert(id);
        }
        Message::FilerecRecord { id, on } => {
            with_typed::<FileRec, _>(table, id, "FileRec", |f| f.record(on));
        }
        Message::FilerecStop { id } => {
            with_typed::<FileRec, _>(table, id, "FileRec", |f| f.record(false));
            run_set.remove(id);
            table.free(id);
        }
    }
}

fn with_ugen(table: &UgenTable, id: i32, f: impl FnOnce(&mut dyn arco_core::ugen::Ugen)) {
    match table.lookup(id) {
        Ok(ugen) => f(&mut *ugen.borrow_mut()),
        Err(e) => log::warn!("message dropped: {e}"),
    }
}

fn with_typed<T: 'static, F: FnOnce(&mut T)>(table: &UgenTable, id: i32, classname: &'static str, f: F) {
    match table.lookup_typed(id, classname) {
        Ok(ugen) => {
            use arco_core::ugen::Ugen;
            let mut borrowed = ugen.borrow_mut();
            let any = borrowed.as_any_mut();
            match any.downcast_mut::<T>() {
                Some(concrete) => f(concrete),
                None => log::warn!("as_any_mut downcast to {classname} failed for ugen {id}"),
            }
        }
        Err(e) => log::warn!("message dropped: {e}"),
    }
}

fn bind_param(table: &UgenTable, id: i32, param: ParamSlot, source: UgenRef) {
    let Ok(ugen) = table.lookup(id) else {
        log::warn!("bind_param: no ugen {id}");
        return;
    };
    use arco_core::ugen::Ugen;
    let mut borrowed = ugen.borrow_mut();
    let classname = borrowed.classname();
    let any = borrowed.as_any_mut();
    let ok = match (classname, param) {
        ("Delay", ParamSlot::Input) => { any.downcast_mut::<Delay>().unwrap().repl_input(source); true }
        ("Delay", ParamSlot::Dur) => { any.downcast_mut::<Delay>().unwrap().repl_dur(source); true }
        ("Delay", ParamSlot::Fb) => { any.downcast_mut::<Delay>().unwrap().repl_fb(source); true }
        ("Allpass", ParamSlot::Input) => { any.downcast_mut::<Allpass>().unwrap().repl_input(source); true }
        ("Allpass", ParamSlot::Dur) => { any.downcast_mut::<Allpass>().unwrap().repl_dur(source); true }
        ("Allpass", ParamSlot::Gain) => { any.downcast_mut::<Allpass>().unwrap().repl_gain(source); true }
        ("Tableosc", ParamSlot::Freq) => { any.downcast_mut::<Tableosc>().unwrap().repl_freq(source); true }
        ("Tableosc", ParamSlot::Amp) => { any.downcast_mut::<Tableosc>().unwrap().repl_amp(source); true }
        ("MathBinary", ParamSlot::X1) => { any.downcast_mut::<MathBinary>().unwrap().repl_x1(source); true }
        ("MathBinary", ParamSlot::X2) => { any.downcast_mut::<MathBinary>().unwrap().repl_x2(source); true }
        ("MathUnary", ParamSlot::X1) => { any.downcast_mut::<MathUnary>().unwrap().repl_x1(source); true }
        ("RecPlay", ParamSlot::Input) => { any.downcast_mut::<RecPlay>().unwrap().repl_input(source); true }
        ("RecPlay", ParamSlot::Gain) => { any.downcast_mut::<RecPlay>().unwrap().repl_gain(source); true }
        ("Vu", ParamSlot::Input) => { any.downcast_mut::<Vu>().unwrap().repl_input(source); true }
        ("SpectralCentroid", ParamSlot::Input) => { any.downcast_mut::<SpectralCentroid>().unwrap().repl_input(source); true }
        ("SpectralRolloff", ParamSlot::Input) => { any.downcast_mut::<SpectralRolloff>().unwrap().repl_input(source); true }
        _ => false,
    };
    if !ok {
        log::warn!("bind_param: {classname} has no {param:?} slot");
    }
}

fn set_param(table: &UgenTable, id: i32, param: ParamSlot, chan: usize, value: f32) {
    let Ok(ugen) = table.lookup(id) else {
        log::warn!("set_param: no ugen {id}");
        return;
    };
    use arco_core::ugen::Ugen;
    let mut borrowed = ugen.borrow_mut();
    let classname = borrowed.classname();
    let any = borrowed.as_any_mut();
    let ok = match (classname, param) {
        ("Delay", ParamSlot::Dur) => { any.downcast_mut::<Delay>().unwrap().set_dur(chan, value); true }
        ("Delay", ParamSlot::Fb) => { any.downcast_mut::<Delay>().unwrap().set_fb(chan, value); true }
        ("Delay", ParamSlot::Max) => { any.downcast_mut::<Delay>().unwrap().set_max(value); true }
        ("Tableosc", ParamSlot::Freq) => { any.downcast_mut::<Tableosc>().unwrap().set_freq_const(value); true }
        ("Tableosc", ParamSlot::Amp) => { any.downcast_mut::<Tableosc>().unwrap().set_amp_const(value); true }
        _ => false,
    };
    if !ok {
        log::warn!("set_param: {classname} has no settable {param:?} slot");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arco_core::ugens::Thru;

    fn channel() -> (rtrb::Producer<Message>, Consumer<Message>) {
        rtrb::RingBuffer::new(16)
    }

    #[test]
    fn const_new_installs_a_ugen() {
        let mut table = UgenTable::new(2);
        let mut output_set = OutputSet::new();
        let mut run_set = RunSet::new();
        let mut fileio = FileIoHub::new_detached();
        let (mut producer, consumer) = channel();
        let mut inbox = Inbox::new(consumer);
        producer.push(Message::ConstNew { id: 100, chans: 1, initial: vec![0.5] }).unwrap();
        inbox.drain(&mut table, &mut output_set, &mut run_set, &mut fileio);
        assert_eq!(table.lookup(100).unwrap().borrow().base().output[0], 0.5);
    }

    #[test]
    fn free_is_deferred_through_the_inbox_too() {
        let mut table = UgenTable::new(2);
        let mut output_set = OutputSet::new();
        let mut run_set = RunSet::new();
        let mut fileio = FileIoHub::new_detached();
        let (mut producer, consumer) = channel();
        let mut inbox = Inbox::new(consumer);
        table
            .install(100, Rc::new(RefCell::new(Thru::new(100, 1))))
            .unwrap();
        producer.push(Message::Free(vec![100])).unwrap();
        inbox.drain(&mut table, &mut output_set, &mut run_set, &mut fileio);
        assert!(table.contains(100), "collect_garbage has not run yet");
        table.collect_garbage(&mut output_set, &mut run_set);
        assert!(!table.contains(100));
    }

    #[test]
    fn lookup_failure_is_dropped_not_panicked() {
        let mut table = UgenTable::new(2);
        let mut output_set = OutputSet::new();
        let mut run_set = RunSet::new();
        let mut fileio = FileIoHub::new_detached();
        let (mut producer, consumer) = channel();
        let mut inbox = Inbox::new(consumer);
        producer.push(Message::ConstSet { id: 999, chan: 0, value: 1.0 }).unwrap();
        inbox.drain(&mut table, &mut output_set, &mut run_set, &mut fileio);
    }
}
