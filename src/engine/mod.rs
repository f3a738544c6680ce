pub mod controller;
pub mod evolution;

pub use controller::*;
pub use evolution::*;
