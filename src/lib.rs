//! SMS ⇄ email bridge: forwards SMS to a mailbox and picks replies back up.

pub mod activity_log;
pub mod channels;
pub mod cli;
pub mod config;
pub mod error;
pub mod setup;
