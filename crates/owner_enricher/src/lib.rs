mod enrichment_service;
mod worker;

pub use enrichment_service::*;
pub use worker::*;
