//! Template document rendering.
//!
//! Rendering walks the node/slot graph from the document root. Each node is
//! rendered by the [`NodeRenderer`] registered for its type; renderers that own
//! slots recurse through [`RendererRegistry::render_slot`]. Missing nodes,
//! missing slots and unregistered types render as nothing, so a damaged
//! document degrades instead of failing the job.

mod builtins;
mod context;
mod element;
mod registry;

pub use builtins::{
    COLUMNS, CONDITIONAL, CONTAINER, LOOP, PAGE_BREAK, PAGE_FOOTER, PAGE_HEADER, TABLE, TEXT,
};
pub use context::RenderContext;
pub use element::{Element, RenderedDocument};
pub use registry::{MAX_RENDER_DEPTH, NodeRenderer, RendererRegistry};
