//! Health model and the threshold state machine.

mod state;
mod threshold;

pub use state::*;
pub use threshold::*;
