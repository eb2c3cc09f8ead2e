mod loader;

pub use loader::{
    load_object_registry, parse_objects_document, ContentErrorCode, ContentLoadError,
    SourceLocation,
};
