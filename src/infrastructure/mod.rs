pub mod notify;
pub mod queue;
pub mod storage;
