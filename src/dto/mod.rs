//! Wire shapes exchanged with the event backend over HTTP and the push channel.

pub mod api;
pub mod round;
pub mod validation;
pub mod ws;
