pub mod config;
pub mod deployment;
pub mod error;
pub mod invocation;
pub mod io;
pub mod password;
pub mod plan;
pub mod prereqs;
pub mod provision;
pub mod report;
pub mod runner;

pub use error::{Result, StackError};
