pub mod identifier;
pub mod predicate;
pub mod statement;
