//! Subsystem modules for the Nexus bot.

pub mod agents;
pub mod comms;
pub mod memory;
