//! Waveform synthesis for the audio backend.
//!
//! Parameters are shared with the realtime callback through atomics; the
//! callback never locks or allocates.

use std::f64::consts::PI;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use crate::axis::map_range;
use crate::encode::{SignalParameters, Waveform};

/// Lock-free parameter slot written by the runtime and read by the callback.
#[derive(Debug, Clone)]
pub struct SharedSignal {
    inner: Arc<SignalSlots>,
}

#[derive(Debug)]
struct SignalSlots {
    waveform: AtomicU8,
    frequency: AtomicU64,
    amplitude: AtomicU64,
    balance: AtomicU64,
}

impl SharedSignal {
    pub fn new(params: SignalParameters) -> Self {
        let shared = Self {
            inner: Arc::new(SignalSlots {
                waveform: AtomicU8::new(0),
                frequency: AtomicU64::new(0),
                amplitude: AtomicU64::new(0),
                balance: AtomicU64::new(0),
            }),
        };
        shared.store(&params);
        shared
    }

    pub fn store(&self, params: &SignalParameters) {
        let slots = &self.inner;
        slots
            .waveform
            .store(waveform_to_u8(params.waveform), Ordering::Relaxed);
        slots
            .frequency
            .store(params.frequency.to_bits(), Ordering::Relaxed);
        slots
            .amplitude
            .store(params.amplitude.to_bits(), Ordering::Relaxed);
        slots.balance.store(params.balance.to_bits(), Ordering::Relaxed);
    }

    pub fn load(&self) -> SignalParameters {
        let slots = &self.inner;
        SignalParameters {
            waveform: waveform_from_u8(slots.waveform.load(Ordering::Relaxed)),
            frequency: f64::from_bits(slots.frequency.load(Ordering::Relaxed)),
            amplitude: f64::from_bits(slots.amplitude.load(Ordering::Relaxed)),
            balance: f64::from_bits(slots.balance.load(Ordering::Relaxed)),
        }
    }
}

fn waveform_to_u8(waveform: Waveform) -> u8 {
    match waveform {
        Waveform::Sine => 0,
        Waveform::Square => 1,
        Waveform::Triangle => 2,
        Waveform::Sawtooth => 3,
    }
}

fn waveform_from_u8(value: u8) -> Waveform {
    match value {
        1 => Waveform::Square,
        2 => Waveform::Triangle,
        3 => Waveform::Sawtooth,
        _ => Waveform::Sine,
    }
}

/// Value of `waveform` at `phase`, where one period spans a phase of 2.
pub fn sample(waveform: Waveform, phase: f64) -> f64 {
    let phase = phase.rem_euclid(2.0);
    match waveform {
        Waveform::Sine => (PI * phase).sin(),
        Waveform::Square => {
            if phase - 1.0 >= 0.0 {
                1.0
            } else {
                -1.0
            }
        }
        Waveform::Sawtooth => phase - 1.0,
        Waveform::Triangle => {
            let mut value = 2.0 * phase;
            if value > 1.0 {
                value = 2.0 - value;
            }
            if value < -1.0 {
                value = -2.0 - value;
            }
            value
        }
    }
}

/// Left and right gains for a balance in `[-1, 1]`.
pub fn balance_gains(balance: f64) -> (f64, f64) {
    let left = map_range(balance, -1.0, 1.0, 2.0, 0.0).clamp(0.0, 1.0);
    let right = map_range(balance, -1.0, 1.0, 0.0, 2.0).clamp(0.0, 1.0);
    (left, right)
}

/// Phase-continuous stereo oscillator.
#[derive(Debug)]
pub struct SignalGenerator {
    signal: SharedSignal,
    sample_rate: f64,
    phase: f64,
}

impl SignalGenerator {
    pub fn new(signal: SharedSignal, sample_rate: u32) -> Self {
        Self {
            signal,
            sample_rate: sample_rate.max(1) as f64,
            phase: 0.0,
        }
    }

    /// Fill an interleaved buffer; channels past the second repeat the mix.
    pub fn fill<T, F>(&mut self, out: &mut [T], channels: usize, convert: F)
    where
        F: Fn(f32) -> T,
    {
        let params = self.signal.load();
        let (left_gain, right_gain) = balance_gains(params.balance);
        let step = 2.0 * params.frequency / self.sample_rate;
        let channels = channels.max(1);

        for frame in out.chunks_mut(channels) {
            let value = sample(params.waveform, self.phase) * params.amplitude;
            self.phase = (self.phase + step).rem_euclid(2.0);

            let left = (value * left_gain) as f32;
            let right = (value * right_gain) as f32;
            for (channel, slot) in frame.iter_mut().enumerate() {
                *slot = match channel {
                    0 => convert(left),
                    1 => convert(right),
                    _ => convert((left + right) * 0.5),
                };
            }
        }
    }
}

pub fn f32_to_i16(v: f32) -> i16 {
    (v.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

pub fn f32_to_u16(v: f32) -> u16 {
    let normalized = (v.clamp(-1.0, 1.0) + 1.0) * 0.5;
    (normalized * u16::MAX as f32) as u16
}
