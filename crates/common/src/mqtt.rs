mod client;
mod publisher;
mod topic;

pub use client::*;
pub use publisher::*;
pub use topic::*;
