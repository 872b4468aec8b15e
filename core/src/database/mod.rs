pub mod buffer;
pub mod client;
pub mod schema;
#[cfg(test)]
pub mod testing;
