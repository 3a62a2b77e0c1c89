mod scan;
mod worker;

pub use scan::*;
pub use worker::*;
