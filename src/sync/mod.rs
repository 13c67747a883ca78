//! Late-join synchronization: where in the program "now" is

pub mod clock;
pub mod translate;

pub use clock::{ProgramClock, ProgramPosition};
pub use translate::to_byte_offset;
