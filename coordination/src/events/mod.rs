//! Run progress events
//!
//! The coordinator and executor publish a [`ProgressEvent`] at every step
//! of a run. Subscribers (a CLI progress line, a dashboard, a test) attach
//! to the shared [`EventBus`]; publishing never blocks and never fails a run.
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │ Coordinator  │────▶│  Event Bus   │────▶│  Subscribers │
//! │  Executor    │     │  (broadcast) │     │   (recv)     │
//! └──────────────┘     └──────────────┘     └──────────────┘
//! ```

pub mod bus;
pub mod types;

pub use bus::{
    EventBus, EventBusError, EventBusExt, EventBusResult, EventFilter, FilteredReceiver,
    SharedEventBus,
};
pub use types::ProgressEvent;
