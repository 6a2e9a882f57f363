pub mod config;
pub mod device;
pub mod dispatch;
pub mod session;
pub mod simulation;
