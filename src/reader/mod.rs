pub mod decorator;
pub mod facet;
pub mod slot;

pub use decorator::{DecoratedReader, ReaderDecorator};
pub use facet::{
    FacetCounts, FacetHandler, FieldFacetHandler, RangeFacetHandlerFactory,
    RuntimeFacetHandlerFactory,
};
pub use slot::ReaderSlot;
