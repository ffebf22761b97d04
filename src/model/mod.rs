//! # Property Graph Model
//!
//! Clean DTOs that define the property graph (nodes, relationships, paths, values).
//! These types cross every boundary: storage ↔ planner ↔ execution ↔ user.
//!
//! Design rule: no storage, planner, or execution types here — this
//! module is pure data, no I/O, no state, no async.

pub mod node;
pub mod path;
pub mod property_map;
pub mod relationship;
pub mod type_;
pub mod value;

pub use node::{Node, NodeId};
pub use path::{Path, PathSegment};
pub use property_map::PropertyMap;
pub use relationship::{Direction, RelId, Relationship};
pub use type_::Type;
pub use value::{Crs, IsoDuration, Value, ZonedTime};
