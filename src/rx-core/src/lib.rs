// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

pub mod lifecycle;
pub mod mode;
pub mod radio;
pub mod ring;
pub mod sample;

pub type DynResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

pub use lifecycle::{RunState, SessionGate};
pub use mode::RxMode;
pub use radio::freq::{Freq, FreqRange};
pub use ring::{
    ring_buffer, FilledSlot, FreeSlot, RingError, RingStats, SlotConsumer, SlotProducer,
};
pub use sample::SampleFormat;
