pub mod channel;
pub mod resilience;
pub mod time;

pub use channel::{ChannelId, Pin};
