//! Controller subsystem: device lifecycle and acquisition loops
//!
//! 1. [`connection_manager`] - discovery, registration and removal
//! 2. [`polling`] / [`waiting`] - the two acquisition loops
//! 3. [`event_processor`] - classification and publishing of updates
//! 4. [`controller_handle`] - public API and lifecycle management
//!
//! # Architecture
//!
//! ```text
//! Backend ──► ConnectionManager ──► polled set   ──► polling loop ─┐
//!                    │          └─► waitable set ──► waiting loop ─┤
//!                    │                                             ▼
//!                    └──────────── ControllersChangedEvent ──► EventHub
//! ```
//!
//! Every device belongs to exactly one set for its connected lifetime.

pub mod connection_manager;
pub mod controller_handle;
pub mod event_processor;
mod loop_thread;
mod polling;
pub mod registry;
mod waiting;

pub use connection_manager::ConnectionManager;
pub use controller_handle::{ControllerError, ControllerHandle, ControllerSettings};
pub use event_processor::{EventPublisher, EVENT_SENDER};
pub use registry::{DeviceRegistry, DeviceSet};
