mod device;
mod directory;
mod envelope;
mod result;

pub use device::*;
pub use directory::*;
pub use envelope::*;
pub use result::*;
