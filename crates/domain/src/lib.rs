//! LangOmni domain types.
//!
//! Pure data: the action request/result model, actor identifiers, the
//! broadcast event shape, and the read-only world records the engine looks up.
//! Nothing in this crate performs I/O.

pub mod action;
pub mod error;
pub mod event;
pub mod ids;
pub mod records;

pub use action::{ActionClass, ActionKind, ActionParams, ActionRequest, ActionResult};
pub use error::DomainError;
pub use event::GameEvent;
pub use ids::{ActorId, ConnectionId};
pub use records::{LocationRecord, NpcRecord, PlayerRecord};
