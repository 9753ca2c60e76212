//! Control service (part of C8/C12): the outbound half of the control
//! connection. `spec.md` §4.4 calls this out as the destination for
//! probe reports; §6 names it by the `ctrl_service` argument to
//! `/arco/open`.
//!
//! Grounded on `arco_core::ugens::probes::ProbeReport` (the payload) and
//! on the object-safe, swappable-backend shape of
//! `knaster_graph::audio_backend::AudioBackend` — here applied to the
//! notification sink instead of the audio device.

use arco_core::ugens::ProbeReport;

/// Sink for notifications the audio thread needs to hand to a remote
/// client: probe reports today, any future `/arco/...` reply in the same
/// shape tomorrow. Implementations must not block; `spec.md` §5 requires
/// the audio thread to never wait on this.
pub trait ControlService {
    fn send_report(&mut self, report: ProbeReport);
}

/// Development/test sink: logs every report instead of forwarding it
/// anywhere. Also the until-a-real-transport-exists default, since
/// `spec.md` leaves the wire encoding of the control connection itself
/// unspecified ("a subset" of addresses, no transport mandated).
#[derive(Debug, Default)]
pub struct LoggingControlService;

impl ControlService for LoggingControlService {
    fn send_report(&mut self, report: ProbeReport) {
        log::debug!("probe report to {}: {:?}", report.reply_addr, report.values);
    }
}

/// Drains every run-set probe's pending reports into `service`, in run-set
/// order. Called once per block by the audio I/O state machine, after the
/// inbox has been drained and every run-set ugen has been pulled.
pub fn flush_probe_reports(
    table: &crate::table::UgenTable,
    run_set: &crate::sets::RunSet,
    service: &mut dyn ControlService,
) {
    use arco_core::ugen::Ugen;
    use arco_core::ugens::{Onset, Probe, SpectralCentroid, SpectralRolloff, Vu};

    for id in run_set.iter() {
        let Ok(ugen) = table.lookup(id) else { continue };
        let mut borrowed = ugen.borrow_mut();
        let classname = borrowed.classname();
        let any = borrowed.as_any_mut();
        let reports = match classname {
            "Vu" => any.downcast_mut::<Vu>().map(|u| u.take_reports()),
            "Onset" => any.downcast_mut::<Onset>().map(|u| u.take_reports()),
            "SpectralCentroid" => any.downcast_mut::<SpectralCentroid>().map(|u| u.take_reports()),
            "SpectralRolloff" => any.downcast_mut::<SpectralRolloff>().map(|u| u.take_reports()),
            "Probe" => any.downcast_mut::<Probe>().map(|u| u.take_reports()),
            _ => None,
        };
        drop(borrowed);
        if let Some(reports) = reports {
            for report in reports {
                service.send_report(report);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sets::RunSet;
    use crate::table::UgenTable;
    use arco_core::ugen::UgenRef;
    use arco_core::ugens::{Const, Vu};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct CollectingService {
        reports: Vec<ProbeReport>,
    }
    impl ControlService for CollectingService {
        fn send_report(&mut self, report: ProbeReport) {
            self.reports.push(report);
        }
    }

    #[test]
    fn flush_drains_reports_from_run_set_probes_only() {
        let mut table = UgenTable::new(2);
        let input: UgenRef = Rc::new(RefCell::new(Const::new(100, 1, &[0.9])));
        table.install(100, input.clone()).unwrap();
        let mut vu = Vu::new(101, 1);
        vu.repl_input(input);
        vu.start("/client/vu", 0.0);
        table.install(101, Rc::new(RefCell::new(vu))).unwrap();
        let mut run_set = RunSet::new();
        run_set.insert(101);

        table.lookup(101).unwrap().borrow_mut().run(1);

        let mut service = CollectingService::default();
        flush_probe_reports(&table, &run_set, &mut service);
        assert_eq!(service.reports.len(), 1);
        assert_eq!(service.reports[0].reply_addr, "/client/vu");
    }
}
