pub mod account;
pub mod schedule;

pub use account::*;
pub use schedule::*;
