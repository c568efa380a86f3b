pub mod manifest;
pub mod policy;
pub mod run;
pub mod scheduler;
pub mod shared;
pub mod store;
pub mod trace;
