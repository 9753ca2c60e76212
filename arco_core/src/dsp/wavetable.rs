//! Wavetables for [`crate::ugens::tableosc`].
//!
//! Grounded on `original_source/arco/src/wavetables.h`: a table of length
//! `N + 2` where `w[N] == w[0]` and `w[N + 1] == w[1]`, so linear
//! interpolation never needs a branch for wraparound. Phase is a
//! table-length-independent fraction in `[0, 1)` so switching to a
//! differently sized table never discontinues phase (`spec.md` §4.6,
//! tested in `ugens::tableosc::tests::switching_tables_preserves_phase`).

/// Number of fractional bits in a [`Phase`]. `2^32` gives plenty of
/// resolution for audio-rate frequencies relative to a 44.1kHz block rate.
const PHASE_FRAC_BITS: u32 = 32;

/// A phase accumulator value in `[0, 1)`, represented as a 64-bit
/// fixed-point fraction scaled by `2^PHASE_FRAC_BITS` rather than by any
/// particular table's length, so it survives a table switch untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Phase(u64);

impl Phase {
    pub const ZERO: Phase = Phase(0);
    const ONE: u64 = 1u64 << PHASE_FRAC_BITS;

    /// Advance by `cycles_per_block_frame`, i.e. `freq_hz / sample_rate`,
    /// wrapping back into `[0, 1)`.
    pub fn advance(&mut self, cycles: f64) {
        let delta = (cycles * Self::ONE as f64) as i64;
        let new = self.0 as i64 + delta;
        self.0 = new.rem_euclid(Self::ONE as i64) as u64;
    }

    /// The phase as a float in `[0, 1)`.
    pub fn as_f64(self) -> f64 {
        self.0 as f64 / Self::ONE as f64
    }
}

/// A single wavetable: `table_len()` samples of one period plus two guard
/// samples for branch-free linear interpolation.
#[derive(Debug, Clone)]
pub struct Wavetable {
    data: Vec<f32>,
}

impl Wavetable {
    /// `table_len` is rounded up to the next power of two, matching the
    /// original's `ilog2`-based rounding.
    fn allocate(table_len: usize) -> (Vec<f32>, usize) {
        let n = table_len.next_power_of_two().max(2);
        (vec![0.0; n + 2], n)
    }

    fn close_guards(data: &mut [f32]) {
        let n = data.len() - 2;
        data[n] = data[0];
        data[n + 1] = data[1];
    }

    /// Build a table directly from `n` time-domain samples (one period).
    /// `create_ttd` in `spec.md` §6. `samples.len()` need not be a power
    /// of two on input to this constructor, but the stored table is
    /// linearly resampled up to the next power of two only if given
    /// exactly that many samples already — Arco does not resample on
    /// input, so for simplicity (and parity with the original, which
    /// allocates `tlen` directly for the time-domain case) we require
    /// `samples.len()` to already be a power of two.
    pub fn from_time_domain(samples: &[f32]) -> Self {
        assert!(
            samples.len().is_power_of_two(),
            "time-domain wavetable length must be a power of two"
        );
        let mut data = vec![0.0; samples.len() + 2];
        data[..samples.len()].copy_from_slice(samples);
        Self::close_guards(&mut data);
        Self { data }
    }

    /// Build a table from an amplitude-only spectrum, using Schroeder
    /// phases (`φ(h) = π·(h+1)·h / spec_len`) to reduce crest factor, as
    /// `create_tas` in `spec.md` §6.
    pub fn from_amp_spectrum(amps: &[f32], table_len: usize) -> Self {
        let phases: Vec<f32> = (0..amps.len())
            .map(|h| {
                let phase = std::f64::consts::PI * (h as f64 + 1.0) * h as f64 / amps.len() as f64;
                phase as f32
            })
            .collect();
        Self::from_complex_spectrum(amps, &phases, table_len)
    }

    /// Build a table from amplitude + phase pairs (`create_tcs`).
    pub fn from_complex_spectrum(amps: &[f32], phases: &[f32], table_len: usize) -> Self {
        assert_eq!(amps.len(), phases.len());
        let (mut data, n) = Self::allocate(table_len);
        for i in 0..n {
            let mut sum = 0.0f64;
            let frame_phase = 2.0 * std::f64::consts::PI * i as f64 / n as f64;
            for (harm, (&amp, &phase)) in amps.iter().zip(phases.iter()).enumerate() {
                let h = harm as f64 + 1.0;
                sum += amp as f64 * (h * frame_phase + phase as f64).sin();
            }
            data[i] = sum as f32;
        }
        Self::close_guards(&mut data);
        Self { data }
    }

    /// Number of samples in one period (excludes the two guard samples).
    pub fn table_len(&self) -> usize {
        self.data.len() - 2
    }

    /// Read the guard-padded table with linear interpolation at a
    /// table-independent `phase` in `[0, 1)`.
    pub fn read(&self, phase: Phase) -> f32 {
        let n = self.table_len() as f64;
        let pos = phase.as_f64() * n;
        let i0 = pos as usize;
        let frac = (pos - i0 as f64) as f32;
        let a = self.data[i0];
        let b = self.data[i0 + 1];
        a + frac * (b - a)
    }

    pub fn raw(&self) -> &[f32] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_samples_close_the_loop() {
        let samples = [0.0, 1.0, 0.0, -1.0];
        let wt = Wavetable::from_time_domain(&samples);
        assert_eq!(wt.raw()[4], wt.raw()[0]);
        assert_eq!(wt.raw()[5], wt.raw()[1]);
    }

    #[test]
    fn read_at_zero_phase_matches_first_sample() {
        let samples = [0.25, 1.0, 0.0, -1.0];
        let wt = Wavetable::from_time_domain(&samples);
        assert!((wt.read(Phase::ZERO) - 0.25).abs() < 1e-6);
    }

    #[test]
    fn phase_wraps_into_zero_one() {
        let mut p = Phase::ZERO;
        p.advance(1.5);
        assert!(p.as_f64() >= 0.0 && p.as_f64() < 1.0);
        assert!((p.as_f64() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn switching_table_size_preserves_fractional_phase() {
        let small = Wavetable::from_time_domain(&[0.0, 1.0, 0.0, -1.0]);
        let large = Wavetable::from_time_domain(&vec![0.0f32; 16]);
        let phase = Phase(0); // explicit zero avoided; use advance instead
        let mut phase = phase;
        phase.advance(0.37);
        // reading from either table at the same Phase must not panic or
        // require any rescaling by the caller.
        let _ = small.read(phase);
        let _ = large.read(phase);
        assert!((phase.as_f64() - 0.37).abs() < 1e-6);
    }
}
