pub mod ai;
pub mod identity;
pub mod reports;
pub mod storage;
