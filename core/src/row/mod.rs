pub mod dynamic;
pub mod shape;
pub mod value;
