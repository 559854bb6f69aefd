//! Stereo reverb tail: a fixed four-line feedback-delay network.
//!
//! Delay lengths are mutually prime-ish millisecond values; the per-line
//! feedback gain is derived from the configured decay time with the RT60
//! relation g = 10^(−3·delay/tail). Buffers are sized once at `configure`;
//! `set_tail` only recomputes gains, so the audio thread can retune it.

/// Per-line delay lengths in milliseconds.
const DELAY_MS: [f32; 4] = [29.7, 37.1, 41.1, 43.7];

/// Minimum supported decay, keeps feedback gains well below 1.
const MIN_TAIL_SECONDS: f32 = 0.05;

#[derive(Debug, Clone)]
struct DelayLine {
    buffer: Vec<f32>,
    write_index: usize,
}

impl DelayLine {
    fn new(len: usize) -> Self {
        Self {
            buffer: vec![0.0; len.max(1)],
            write_index: 0,
        }
    }

    #[inline]
    fn read(&self) -> f32 {
        self.buffer[self.write_index]
    }

    #[inline]
    fn write_and_advance(&mut self, value: f32) {
        self.buffer[self.write_index] = value;
        self.write_index += 1;
        if self.write_index == self.buffer.len() {
            self.write_index = 0;
        }
    }

    fn clear(&mut self) {
        self.buffer.iter_mut().for_each(|v| *v = 0.0);
        self.write_index = 0;
    }
}

/// Four-line FDN with a Householder feedback matrix.
#[derive(Debug, Clone)]
pub struct ReverbTail {
    lines: [DelayLine; 4],
    feedback: [f32; 4],
    delay_seconds: [f32; 4],
}

impl ReverbTail {
    /// Allocate delay lines for `sample_rate` and derive feedback gains for
    /// `tail_seconds`.
    pub fn new(sample_rate: f64, tail_seconds: f32) -> Self {
        let mut delay_seconds = [0.0f32; 4];
        let lines = std::array::from_fn(|i| {
            let seconds = DELAY_MS[i] / 1000.0;
            delay_seconds[i] = seconds;
            DelayLine::new((f64::from(seconds) * sample_rate).round() as usize)
        });

        let mut reverb = Self {
            lines,
            feedback: [0.0; 4],
            delay_seconds,
        };
        reverb.set_tail_seconds(tail_seconds);
        reverb
    }

    /// Retune the decay time. Allocation-free.
    pub fn set_tail_seconds(&mut self, tail_seconds: f32) {
        let tail = tail_seconds.max(MIN_TAIL_SECONDS);
        for i in 0..4 {
            self.feedback[i] = 10.0f32.powf(-3.0 * self.delay_seconds[i] / tail);
        }
    }

    /// Feed one mono input sample, returning the (wet_l, wet_r) tail pair.
    #[inline]
    pub fn process(&mut self, input: f32) -> (f32, f32) {
        let outputs = [
            self.lines[0].read(),
            self.lines[1].read(),
            self.lines[2].read(),
            self.lines[3].read(),
        ];

        // Householder mixing: reflect the output vector about its mean.
        let half_sum = (outputs[0] + outputs[1] + outputs[2] + outputs[3]) * 0.5;

        for i in 0..4 {
            let reflected = outputs[i] - half_sum;
            self.lines[i].write_and_advance(input + reflected * self.feedback[i]);
        }

        let wet_l = (outputs[0] + outputs[2]) * 0.5;
        let wet_r = (outputs[1] + outputs[3]) * 0.5;
        (wet_l, wet_r)
    }

    /// Silence the tail (transport stop).
    pub fn reset(&mut self) {
        for line in &mut self.lines {
            line.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_in_silence_out() {
        let mut reverb = ReverbTail::new(48_000.0, 1.5);
        for _ in 0..10_000 {
            let (l, r) = reverb.process(0.0);
            assert_eq!(l, 0.0);
            assert_eq!(r, 0.0);
        }
    }

    #[test]
    fn impulse_produces_a_decaying_tail() {
        let mut reverb = ReverbTail::new(48_000.0, 0.8);
        reverb.process(1.0);

        let window = 4_800; // 100 ms
        let early: f32 = (0..window)
            .map(|_| {
                let (l, r) = reverb.process(0.0);
                l.abs() + r.abs()
            })
            .sum();
        assert!(early > 0.0, "tail never appeared");

        // Skip ahead ~2 s, well past the decay time.
        for _ in 0..(2 * 48_000) {
            reverb.process(0.0);
        }
        let late: f32 = (0..window)
            .map(|_| {
                let (l, r) = reverb.process(0.0);
                l.abs() + r.abs()
            })
            .sum();
        assert!(late < early * 0.05, "early={early} late={late}");
    }

    #[test]
    fn longer_tail_decays_slower() {
        let measure = |tail: f32| {
            let mut reverb = ReverbTail::new(48_000.0, tail);
            reverb.process(1.0);
            for _ in 0..48_000 {
                reverb.process(0.0);
            }
            (0..4_800)
                .map(|_| {
                    let (l, r) = reverb.process(0.0);
                    l.abs() + r.abs()
                })
                .sum::<f32>()
        };
        assert!(measure(3.0) > measure(0.5));
    }

    #[test]
    fn reset_silences_the_tail() {
        let mut reverb = ReverbTail::new(48_000.0, 2.0);
        reverb.process(1.0);
        reverb.reset();
        let (l, r) = reverb.process(0.0);
        assert_eq!((l, r), (0.0, 0.0));
    }
}
