pub mod models;
pub mod navigation;
pub mod permissions;
pub mod quiz;
pub mod serial;
pub mod submission;
