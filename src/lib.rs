#![cfg_attr(not(test), no_std)]

pub mod clock;
pub mod commands;
pub mod config;
pub mod hardware;
pub mod modbus;
pub mod sensors;

#[cfg(test)]
mod testing;
