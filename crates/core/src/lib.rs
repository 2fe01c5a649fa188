pub mod context;
pub mod count;
pub mod error;
pub mod fs;
pub mod job;
pub mod listing;
pub mod models;
pub mod progress;
pub mod tasks;

pub use crate::context::{ContextHandle, MainContext};
pub use crate::error::{CountError, Error, Result};
pub use crate::job::DeepCountJob;
pub use crate::models::*;
pub use crate::tasks::{CancelToken, Priority, TaskHandle, TaskRunner};
