pub mod nurture;

pub use nurture::{NurtureAgent, NURTURE_AGENT};
