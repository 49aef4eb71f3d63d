//! Per-queue buffering of pending entries.
//!
//! Each logical queue owns a bounded FIFO [`QueueBuffer`], a retry tracker and
//! its counters, bundled in a [`QueueSlot`]. Slots are created on first
//! reference and live in a [`QueueRegistry`].

mod buffer;
mod entry;
mod registry;

pub use buffer::{BackpressureSignal, BufferTiming, PushOutcome, QueueBuffer};
pub use entry::Entry;
pub use registry::{QueueRegistry, QueueSlot};
