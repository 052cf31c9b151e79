//! Audio handling: jitter buffering, ring buffers, DSP and output sinks

pub mod buffer;
pub mod dsp;
pub mod jitter;
pub mod output;
#[cfg(feature = "audio-cpal")]
pub mod output_cpal;
pub mod pool;

#[cfg(test)]
mod tests;

pub use buffer::SampleRing;
pub use jitter::{JitterBuffer, JitterEntry, JitterStats, PushOutcome};
pub use output::{
    MixScratch, OutputBackend, OutputError, OutputStream, RingBufferBackend, RingStream,
    StreamFormat, StreamKey,
};
#[cfg(feature = "audio-cpal")]
pub use output_cpal::CpalOutput;
pub use pool::BufferPool;
