pub mod enums;
pub mod run;

pub use enums::*;
pub use run::*;
