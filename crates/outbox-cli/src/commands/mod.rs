pub mod common;
pub mod discard;
pub mod enqueue;
pub mod list;
pub mod retry;
pub mod run;
pub mod status;
pub mod sync;
