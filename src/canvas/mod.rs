//! The Canvas Store: a durable event/graph log shared across sessions.

pub mod model;
pub mod store;

pub use model::{Canvas, CanvasView, Edge, Event, Node, ViewCounts, ViewFilter, ViewFilters};
pub use store::{AttachResult, CanvasList, CanvasStore, RecordedEvent};
