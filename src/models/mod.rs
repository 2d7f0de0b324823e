pub mod analysis;
pub mod job;
pub mod result;
pub mod session;
