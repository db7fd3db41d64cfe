pub mod client;
pub mod events;
pub mod outcome;
pub mod tools;
pub mod transport;
