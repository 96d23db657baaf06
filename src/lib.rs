//! Library crate for live-shake, exposing the attendee client to the binary and tests.

pub mod clock;
pub mod config;
pub mod dao;
pub mod dto;
pub mod error;
pub mod services;
pub mod state;
