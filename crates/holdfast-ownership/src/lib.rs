//! Distributed ownership of hierarchical, transferable session state.
//!
//! Exactly one peer owns a resource at a time. Other peers subscribe to it,
//! and ownership is requested, released and handed off through a small
//! request/result handshake carried by each peer's event channel. A free
//! subresource can only be leased through the current owner of its super
//! resource, so ownership always flows down the tree.
//!
//! The [`Session`] is the context object for one local participant: it
//! holds the peer directory, the resource arena, the subscription registry
//! and the successor policy, and advances everything one [`Session::tick`]
//! at a time on a single logical thread.

pub mod config;
pub mod error;
mod handlers;
mod lifecycle;
pub mod policy;
pub mod resource;
pub mod session;
pub mod subscription;
pub mod tree;

pub use error::{OwnershipError, OwnershipResult};
pub use policy::TransferPolicy;
pub use resource::{
    OwnershipRole, PendingKind, PendingRequest, Presence, ResourceBehavior, ResourceId,
    ResourceNode, StaticResource,
};
pub use session::{Session, SessionNotice, TickReport};
pub use subscription::{Subscription, SubscriptionId, SubscriptionRegistry};
pub use tree::ResourceTree;
