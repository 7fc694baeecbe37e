//! Domain model: entities, value objects, the lifecycle guard and the ports
//! the application layer depends on. Nothing in here performs I/O.

pub mod event;
pub mod lifecycle;
pub mod money;
pub mod order;
pub mod package;
pub mod patch;
pub mod ports;
pub mod provider;
pub mod submission;
pub mod subscription;
