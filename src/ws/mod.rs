//! Realtime match channel

pub mod handler;
pub mod protocol;
