mod service;
mod store;
mod worker;

pub use service::*;
pub use store::*;
pub use worker::*;
