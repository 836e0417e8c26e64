pub mod page;
pub mod ports;
