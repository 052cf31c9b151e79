//! Rendering of decoded audio into output streams

mod engine;

pub use engine::{RenderEngine, RenderStats, WriteOutcome};

#[cfg(test)]
mod tests;
