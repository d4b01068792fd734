pub mod activate;
pub mod admit_transfer;
pub mod unvested;

pub use activate::*;
pub use admit_transfer::*;
pub use unvested::*;
