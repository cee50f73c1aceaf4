// Managers Module
//
// Focused managers that keep one concern out of the pipeline:
// - MonitorChannels: broadcast/watch channels observed by UI and alert layers

pub mod broadcast_manager;

pub use broadcast_manager::MonitorChannels;
