pub mod bus;
pub mod cache;
pub mod db;
pub mod processor;
