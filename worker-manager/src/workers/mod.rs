//! Built-in workers.

pub mod battery;
pub mod commands;
pub mod external_ip;
pub mod latency;
pub mod system;
pub mod version;
