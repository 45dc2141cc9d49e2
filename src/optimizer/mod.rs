//! Update rules and the drivers that feed them accumulated gradients.
mod driver;
mod optimization;
#[cfg(test)]
mod test;

pub use self::driver::*;
pub use self::optimization::*;
