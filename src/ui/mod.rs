//! Reply model and its Discord rendering.

pub mod embeds;
pub mod reply;

pub use reply::{Reply, Tone};
