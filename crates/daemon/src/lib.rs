mod cycle;
mod utils;

pub use cycle::*;
pub use utils::*;
