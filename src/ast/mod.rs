pub mod expression;
pub mod predicate;

pub use expression::*;
pub use predicate::*;
