pub mod announcement;
pub mod tag;

pub use announcement::*;
pub use tag::*;
