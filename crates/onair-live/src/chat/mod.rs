//! Chat & moderation channel.

mod channel;
pub mod filter;
mod throttle;

pub use channel::ChatChannel;
pub use filter::WordFilter;
pub use throttle::SendThrottle;

pub(crate) use channel::post_system_message;

#[cfg(test)]
mod tests;
