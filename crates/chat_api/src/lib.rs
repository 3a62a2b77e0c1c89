mod commands;
mod service;
mod worker;

pub use commands::*;
pub use service::*;
pub use worker::*;
