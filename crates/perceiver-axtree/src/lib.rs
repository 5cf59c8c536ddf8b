//! PageScope tree perceiver.
//!
//! Retrieves the structural DOM tree, the layout snapshot and one
//! accessibility tree per frame from an inspected page, correlates them by
//! backend node id, classifies interactivity and assigns stable short
//! references to every emitted element.

pub mod ax;
pub mod compound;
pub mod errors;
pub mod events;
pub mod fetch;
pub mod layout;
pub mod merge;
pub mod metrics;
pub mod model;
pub mod perceiver;
pub mod refs;
pub mod serialize;

pub use errors::PerceiverError;
pub use fetch::{FetchOptions, TreeFetcher, BASE_COMPUTED_STYLES, EXTENDED_COMPUTED_STYLES};
pub use merge::{classify_interactive, merge_trees};
pub use model::{
    AxFacet, AxNode, Bounds, CompoundChild, DomNode, EnrichedElement, FetchedTrees, FilterMode,
    MergeOptions, StateProperty,
};
pub use perceiver::TreePerceiver;
pub use refs::RefRegistry;
pub use serialize::{to_json, to_text};
