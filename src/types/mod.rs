pub mod decision;
pub mod observation;

pub use decision::*;
pub use observation::*;
