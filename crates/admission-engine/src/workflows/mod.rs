pub mod admission;
pub mod intake;
