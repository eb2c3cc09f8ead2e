//! Simulated instances placed on layered maps.
//!
//! Objects are loaded from XML definitions, instantiated into a [`Model`] and
//! advanced tick by tick. Instances report what changed each round through
//! [`InstanceChangeInfo`] and registered listeners.

pub mod content;
pub mod instance;
pub mod location;
pub mod map;
pub mod object;
pub mod time;

pub use content::{
    load_object_registry, parse_objects_document, ContentErrorCode, ContentLoadError,
    SourceLocation,
};
pub use instance::{
    Instance, InstanceActionListener, InstanceChangeInfo, InstanceChangeListener, InstanceError,
    InstanceRef,
};
pub use location::{LayerId, Location, Point};
pub use map::{InstanceChange, Layer, Map, MapId, Model, ModelError};
pub use object::{Action, ActionId, Object, ObjectId, ObjectRegistry, RenderableKind};
pub use time::{FixedTimeHierarchy, TimeHierarchy, TimeProvider};
