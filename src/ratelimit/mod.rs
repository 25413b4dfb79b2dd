//! Rate limiting: the admission gate and its periodic refill.

mod gate;
mod refill;

pub use gate::{Gate, Permit};
pub use refill::{DriverState, Refill, RefillDriver};
