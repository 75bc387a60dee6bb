//! Built-in tasks.

pub mod relayed_data;

pub use relayed_data::{RelayedDataTask, RELAYED_DATA_TASK_NAME};
