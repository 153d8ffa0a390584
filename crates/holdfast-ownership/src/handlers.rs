//! Handling of inbound protocol events.
//!
//! Requests are always answered with a result event, including refusals;
//! nothing that goes wrong on this side is reported to the requester any
//! other way. Results are matched against the request they answer through
//! the events the sender's acknowledgment just retired.

use crate::error::OwnershipResult;
use crate::policy;
use crate::resource::{PendingKind, PendingRequest, ResourceId};
use crate::session::{Session, SessionNotice};
use holdfast_types::error::HoldfastError;
use holdfast_types::peer::PeerId;
use holdfast_wire::{
    Event, EventId, EventKind, ReleaseOutcome, RequestOutcome, ResourcePath, TransferOutcome,
};
use tracing::{debug, error, warn};

/// How a result relates to the resource's pending slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Answer {
    /// It answers the request currently pending.
    Current,
    /// It answers a request that was abandoned or since re-issued.
    Late,
}

impl Session {
    pub(crate) fn handle_event(&mut self, event: &Event) -> OwnershipResult<()> {
        let from = event.from;
        match &event.kind {
            EventKind::ResourceRequest { resource } => match self.tree.resolve(resource) {
                Some(id) => self.requested(id, from, event.id),
                None => {
                    self.reply_request(from, event.id, resource.clone(), RequestOutcome::Error);
                    Err(unknown(resource))
                }
            },
            EventKind::ReleaseRequest {
                resource,
                subscribers,
            } => match self.tree.resolve(resource) {
                Some(id) => self.released(id, from, event.id, subscribers),
                None => {
                    self.reply_release(from, event.id, resource.clone(), ReleaseOutcome::Error);
                    Err(unknown(resource))
                }
            },
            EventKind::TransferRequest {
                resource,
                subscribers,
            } => match self.tree.resolve(resource) {
                Some(id) => self.transfered(id, from, event.id, subscribers),
                None => {
                    self.reply_transfer(from, event.id, resource.clone(), TransferOutcome::Error);
                    Err(unknown(resource))
                }
            },
            EventKind::NewOwner { resource, owner } => self.new_owner(resource, *owner),
            EventKind::LeaseState { resource, leases } => self.lease_state(resource, leases),
            EventKind::RequestResult {
                request,
                resource,
                outcome,
            } => self.resolve_request(from, *request, resource, *outcome),
            EventKind::ReleaseResult {
                request,
                resource,
                outcome,
            } => self.resolve_release(from, *request, resource, *outcome),
            EventKind::TransferResult {
                request,
                resource,
                outcome,
            } => self.resolve_transfer(from, *request, resource, *outcome),
        }
    }

    /// Someone (possibly the local peer) asked for `id`.
    fn requested(&mut self, id: ResourceId, from: PeerId, request: EventId) -> OwnershipResult<()> {
        let resource = self.tree.path_of(id);
        let is_super = self.is_super(id);
        let node = self.tree.node(id)?;
        let (owner, free, available) = (node.owner, node.is_free(), node.is_available());
        let owned_here = owner == Some(self.local);

        if free && is_super {
            // Owner first: the requester treats the reply as final.
            self.set_owner(id, Some(from))?;
            self.reply_request(from, request, resource.clone(), RequestOutcome::Leased);
            debug!(peer = %self.local, resource = %resource, to = %from, "Leased resource");
            Ok(())
        } else if is_super && owner == Some(from) {
            // The lessee lost track of its lease and asks again.
            self.reply_request(from, request, resource.clone(), RequestOutcome::Leased);
            debug!(peer = %self.local, resource = %resource, to = %from, "Re-granted lease");
            Ok(())
        } else if owned_here {
            if from == self.local {
                warn!(resource = %resource, "Requested a resource this peer already owns");
                self.reply_request(from, request, resource, RequestOutcome::Error);
                return Ok(());
            }
            if !available {
                self.reply_request(from, request, resource, RequestOutcome::Error);
                return Ok(());
            }
            // Reply before subscribing so the requester is ready for state.
            self.reply_request(from, request, resource, RequestOutcome::Subscribed);
            self.subscribed(id, from)
        } else {
            debug!(peer = %self.local, resource = %resource, from = %from, "Refusing request");
            self.reply_request(from, request, resource, RequestOutcome::Error);
            Ok(())
        }
    }

    /// Someone gave up `id`: either its owner returning it to us as super
    /// owner, or a subscriber of ours.
    fn released(
        &mut self,
        id: ResourceId,
        from: PeerId,
        request: EventId,
        subscribers: &[PeerId],
    ) -> OwnershipResult<()> {
        let resource = self.tree.path_of(id);
        let is_super = self.is_super(id);
        let owner = self.tree.node(id)?.owner;

        if is_super && owner == Some(from) {
            let candidates: Vec<PeerId> = subscribers
                .iter()
                .copied()
                .filter(|peer| *peer != from)
                .collect();
            match policy::choose(self.policy.as_ref(), &resource, &candidates) {
                Some(successor) => {
                    self.set_owner(id, Some(successor))?;
                    let remaining: Vec<PeerId> = candidates
                        .iter()
                        .copied()
                        .filter(|peer| *peer != successor)
                        .collect();
                    let transfer = self.queue_event(
                        successor,
                        EventKind::TransferRequest {
                            resource: resource.clone(),
                            subscribers: remaining,
                        },
                    );
                    let issued_tick = self.tick;
                    let node = self.tree.node_mut(id)?;
                    if node.pending.is_none() {
                        node.pending = Some(PendingRequest {
                            kind: PendingKind::Transfer,
                            event_id: transfer,
                            to: successor,
                            issued_tick,
                        });
                    }
                    debug!(
                        peer = %self.local,
                        resource = %resource,
                        from = %from,
                        successor = %successor,
                        "Ownership handed to subscriber"
                    );
                }
                None => self.set_owner(id, None)?,
            }
            self.reply_release(from, request, resource, ReleaseOutcome::Released);
            Ok(())
        } else if owner == Some(self.local) {
            match self.subscriptions.find(id, from) {
                Ok(handle) => {
                    self.subscriptions.remove(handle)?;
                    debug!(peer = %self.local, resource = %resource, subscriber = %from, "Unsubscribed");
                    self.reply_release(from, request, resource, ReleaseOutcome::Unsubscribed);
                    Ok(())
                }
                Err(err) => {
                    self.reply_release(from, request, resource, ReleaseOutcome::Error);
                    Err(err.into())
                }
            }
        } else {
            debug!(peer = %self.local, resource = %resource, from = %from, "Refusing release");
            self.reply_release(from, request, resource, ReleaseOutcome::Error);
            Ok(())
        }
    }

    /// The super owner appointed us owner of `id` and hands over the
    /// remaining subscribers.
    fn transfered(
        &mut self,
        id: ResourceId,
        from: PeerId,
        request: EventId,
        subscribers: &[PeerId],
    ) -> OwnershipResult<()> {
        let resource = self.tree.path_of(id);
        let from_super = self.parent_owner(id) == Some(from);
        let node = self.tree.node(id)?;
        let accepted = node.is_available() && node.owner == Some(self.local) && from_super;

        if !accepted {
            debug!(
                peer = %self.local,
                resource = %resource,
                available = node.is_available(),
                owner = node.owner == Some(self.local),
                from_super,
                "Refusing transfer"
            );
            self.reply_transfer(from, request, resource, TransferOutcome::Error);
            return Ok(());
        }

        let local = self.local;
        let absorbed = subscribers
            .iter()
            .copied()
            .filter(|peer| *peer != local)
            .try_for_each(|peer| self.subscribed(id, peer));
        let outcome = match absorbed {
            Ok(()) => TransferOutcome::Ok,
            Err(_) => TransferOutcome::Error,
        };
        self.reply_transfer(from, request, resource, outcome);
        absorbed
    }

    /// The super owner changed the owner of a subresource.
    fn new_owner(&mut self, resource: &ResourcePath, owner: Option<PeerId>) -> OwnershipResult<()> {
        if let Some(id) = self.tree.resolve(resource) {
            return self.set_owner(id, owner);
        }
        // Not materialized yet: keep it for when the super resource activates.
        let parent = resource.parent().and_then(|parent| self.tree.resolve(&parent));
        match (parent, resource.identifier()) {
            (Some(parent), Some(identifier)) => {
                let lease = &mut self.tree.node_mut(parent)?.incoming_lease;
                match lease.iter_mut().find(|(name, _)| name == identifier) {
                    Some(entry) => entry.1 = owner,
                    None => lease.push((identifier.to_string(), owner)),
                }
                debug!(resource = %resource, owner = ?owner, "Buffered owner of unloaded subresource");
                Ok(())
            }
            _ => Err(unknown(resource)),
        }
    }

    fn lease_state(
        &mut self,
        resource: &ResourcePath,
        leases: &[(String, Option<PeerId>)],
    ) -> OwnershipResult<()> {
        let id = self.tree.resolve(resource).ok_or_else(|| unknown(resource))?;
        let node = self.tree.node_mut(id)?;
        if node.is_active() {
            self.apply_lease(id, leases.to_vec())
        } else {
            node.incoming_lease = leases.to_vec();
            Ok(())
        }
    }

    fn resolve_request(
        &mut self,
        from: PeerId,
        request: EventId,
        resource: &ResourcePath,
        outcome: RequestOutcome,
    ) -> OwnershipResult<()> {
        let supersedes = outcome != RequestOutcome::Error;
        let (id, answer) = self.correlate(from, request, resource, PendingKind::Request, supersedes)?;
        if answer == Answer::Late && self.tree.node(id)?.is_available() {
            debug!(peer = %self.local, resource = %resource, event_id = %request, "Request already settled");
            return Ok(());
        }
        match outcome {
            RequestOutcome::Leased => {
                self.set_owner(id, Some(self.local))?;
                self.available(id)
            }
            RequestOutcome::Subscribed => {
                self.set_owner(id, Some(from))?;
                self.available(id)
            }
            RequestOutcome::Error => {
                error!(peer = %self.local, resource = %resource, to = %from, "Request failed");
                self.notify(SessionNotice::RequestFailed {
                    resource: resource.clone(),
                });
                Ok(())
            }
        }
    }

    fn resolve_release(
        &mut self,
        from: PeerId,
        request: EventId,
        resource: &ResourcePath,
        outcome: ReleaseOutcome,
    ) -> OwnershipResult<()> {
        let supersedes = outcome != ReleaseOutcome::Error;
        let (id, answer) = self.correlate(from, request, resource, PendingKind::Release, supersedes)?;
        if answer == Answer::Late && !self.tree.node(id)?.is_available() {
            debug!(peer = %self.local, resource = %resource, event_id = %request, "Release already settled");
            return Ok(());
        }
        match outcome {
            ReleaseOutcome::Released | ReleaseOutcome::Unsubscribed => {
                // The super owner has handed them to the successor.
                let handed_off = self.subscriptions.remove_resource(id);
                if !handed_off.is_empty() {
                    debug!(resource = %resource, count = handed_off.len(), "Subscribers handed off");
                }
                if self.is_owner(id) {
                    self.set_owner(id, None)?;
                }
                self.unavailable(id)
            }
            ReleaseOutcome::Error => {
                error!(peer = %self.local, resource = %resource, to = %from, "Release failed");
                self.notify(SessionNotice::ReleaseFailed {
                    resource: resource.clone(),
                });
                Ok(())
            }
        }
    }

    fn resolve_transfer(
        &mut self,
        from: PeerId,
        request: EventId,
        resource: &ResourcePath,
        outcome: TransferOutcome,
    ) -> OwnershipResult<()> {
        self.correlate(from, request, resource, PendingKind::Transfer, false)?;
        match outcome {
            TransferOutcome::Ok => {
                debug!(peer = %self.local, resource = %resource, to = %from, "Transfer accepted");
            }
            TransferOutcome::Error => {
                error!(peer = %self.local, resource = %resource, to = %from, "Transfer failed");
                self.notify(SessionNotice::TransferFailed {
                    resource: resource.clone(),
                    peer: from,
                });
            }
        }
        Ok(())
    }

    /// Find the request a result from `from` answers and clear the matching
    /// pending slot.
    ///
    /// A result for a request that already timed out is `Late`. With
    /// `supersedes`, a result for an earlier request of the same kind also
    /// settles a newer one still pending, and is `Late` too. Any other
    /// mismatch with the pending request is rejected.
    fn correlate(
        &mut self,
        from: PeerId,
        request: EventId,
        resource: &ResourcePath,
        kind: PendingKind,
        supersedes: bool,
    ) -> OwnershipResult<(ResourceId, Answer)> {
        let original = self.peers.channel_mut(from).find_recently_acked(request)?;
        let answers = matches!(
            (kind, &original.kind),
            (PendingKind::Request, EventKind::ResourceRequest { .. })
                | (PendingKind::Release, EventKind::ReleaseRequest { .. })
                | (PendingKind::Transfer, EventKind::TransferRequest { .. })
        );
        if !answers || original.kind.resource() != resource {
            return Err(HoldfastError::NotFound(format!(
                "{kind} {request} of {resource} sent to {from}"
            ))
            .into());
        }

        let id = self.tree.resolve(resource).ok_or_else(|| unknown(resource))?;
        let node = self.tree.node_mut(id)?;
        match node.pending {
            Some(pending)
                if pending.kind == kind && pending.event_id == request && pending.to == from =>
            {
                node.pending = None;
                Ok((id, Answer::Current))
            }
            // Transfers only occupy the slot when it was free.
            Some(_) if kind == PendingKind::Transfer => Ok((id, Answer::Current)),
            Some(pending) if supersedes && pending.kind == kind => {
                node.pending = None;
                warn!(
                    resource = %resource,
                    event_id = %request,
                    pending = %pending.event_id,
                    "Result for an earlier request settles the re-issued one"
                );
                Ok((id, Answer::Late))
            }
            Some(pending) => Err(HoldfastError::NotFound(format!(
                "{kind} result for {resource} does not match pending {} {}",
                pending.kind, pending.event_id
            ))
            .into()),
            None => {
                warn!(resource = %resource, event_id = %request, "Result for an abandoned request");
                Ok((id, Answer::Late))
            }
        }
    }

    fn reply_request(
        &mut self,
        to: PeerId,
        request: EventId,
        resource: ResourcePath,
        outcome: RequestOutcome,
    ) {
        self.queue_event(
            to,
            EventKind::RequestResult {
                request,
                resource,
                outcome,
            },
        );
    }

    fn reply_release(
        &mut self,
        to: PeerId,
        request: EventId,
        resource: ResourcePath,
        outcome: ReleaseOutcome,
    ) {
        self.queue_event(
            to,
            EventKind::ReleaseResult {
                request,
                resource,
                outcome,
            },
        );
    }

    fn reply_transfer(
        &mut self,
        to: PeerId,
        request: EventId,
        resource: ResourcePath,
        outcome: TransferOutcome,
    ) {
        self.queue_event(
            to,
            EventKind::TransferResult {
                request,
                resource,
                outcome,
            },
        );
    }
}

fn unknown(resource: &ResourcePath) -> crate::error::OwnershipError {
    HoldfastError::NotFound(format!("resource {resource}")).into()
}
