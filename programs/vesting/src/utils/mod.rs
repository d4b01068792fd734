pub mod amount;
pub mod time;
