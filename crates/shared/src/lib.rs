pub mod contract;
pub mod domain;
pub mod error;
pub mod protocol;
pub mod records;

#[cfg(test)]
#[path = "tests/records_tests.rs"]
mod tests;
