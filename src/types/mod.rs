//! Type definitions

pub mod avl;
pub mod events;
pub mod geo;
pub mod matches;
pub mod messages;
pub mod schedule;
pub mod vehicle_state;

pub use avl::*;
pub use events::*;
pub use geo::*;
pub use matches::*;
pub use messages::*;
pub use schedule::*;
pub use vehicle_state::*;
