//! In-process lobby simulation.
//!
//! Participant 0 hosts the lobby. Every other participant subscribes to it,
//! then requests one world: the first to ask leases it, later ones end up
//! subscribed. Once every world is live, the owner of the first world fully
//! releases it and the lobby host appoints a successor among its
//! subscribers.

use holdfast_ownership::{OwnershipError, OwnershipResult, PendingKind, Session, SessionNotice, StaticResource};
use holdfast_types::config::ProtocolConfig;
use holdfast_types::error::{HoldfastError, HoldfastResult};
use holdfast_types::peer::{Peer, PeerId};
use holdfast_wire::{MemoryHub, MemoryTransport, ResourcePath};
use tracing::{debug, info, warn};

pub const LOBBY: &str = "lobby";

/// Worlds under the lobby, each with its rooms.
pub const WORLDS: &[(&str, &[&str])] = &[
    ("SU", &["SU_A01", "SU_A02"]),
    ("HI", &["HI_B01", "HI_B02"]),
    ("CC", &["CC_C01"]),
];

pub fn lobby_tree() -> StaticResource {
    StaticResource::new(LOBBY).with_children(WORLDS.iter().map(|(world, rooms)| {
        StaticResource::new(*world).with_children(rooms.iter().map(|room| StaticResource::new(*room)))
    }))
}

fn lobby_path() -> ResourcePath {
    ResourcePath::root(LOBBY)
}

/// Two participants per world, cycling through [`WORLDS`].
fn world_for(index: usize) -> Option<ResourcePath> {
    if index == 0 {
        return None;
    }
    let (world, _) = WORLDS[(index - 1) / 2 % WORLDS.len()];
    Some(lobby_path().child(world))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulationOptions {
    pub peers: usize,
    pub ticks: u64,
    pub lossy: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandOff {
    pub from: PeerId,
    /// Owner of the world as the lobby host saw it afterwards.
    pub to: Option<PeerId>,
}

#[derive(Debug, Clone, Default)]
pub struct SimulationStats {
    pub ticks: u64,
    pub packets_in: usize,
    pub packets_out: usize,
    pub packets_dropped: usize,
    pub events_processed: usize,
    pub defects: usize,
    pub retries: usize,
    pub handoff: Option<HandOff>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Phase {
    Joining,
    HandingOff { releaser: usize, world: ResourcePath },
    Done,
}

pub struct Participant {
    pub session: Session,
    io: MemoryTransport,
    world: Option<ResourcePath>,
    retry: Vec<ResourcePath>,
}

impl Participant {
    /// React to a resource becoming usable: a live lobby lets us ask for
    /// our world, a world is loaded as soon as we have it.
    fn on_available(&mut self, resource: &ResourcePath) -> OwnershipResult<()> {
        let Some(id) = self.session.resolve(resource) else {
            return Ok(());
        };
        if self.session.node(id)?.is_active() {
            return Ok(());
        }
        if *resource == lobby_path() {
            self.session.activate(id)?;
            if let Some(world) = &self.world {
                let world = self
                    .session
                    .resolve(world)
                    .ok_or_else(|| HoldfastError::NotFound(world.to_string()))?;
                self.session.request(world)?;
            }
        } else if Some(resource) == self.world.as_ref() {
            self.session.activate(id)?;
        }
        Ok(())
    }

    fn has_live_world(&self) -> bool {
        match &self.world {
            None => true,
            Some(world) => self
                .session
                .resolve(world)
                .and_then(|id| self.session.node(id).ok())
                .is_some_and(|node| node.is_active()),
        }
    }

    /// Re-issue requests that failed or timed out. Returns how many went out.
    fn retry_requests(&mut self) -> usize {
        let mut sent = 0;
        for path in std::mem::take(&mut self.retry) {
            let Some(id) = self.session.resolve(&path) else {
                continue;
            };
            let idle = self
                .session
                .node(id)
                .is_ok_and(|node| !node.is_pending() && !node.is_available());
            if !idle {
                continue;
            }
            match self.session.request(id) {
                Ok(()) => sent += 1,
                Err(e) => warn!(peer = %self.session.local(), resource = %path, error = %e, "Retry failed"),
            }
        }
        sent
    }
}

pub struct Simulation {
    hub: MemoryHub,
    participants: Vec<Participant>,
    options: SimulationOptions,
    phase: Phase,
    stats: SimulationStats,
}

impl Simulation {
    pub fn new(config: &ProtocolConfig, options: SimulationOptions) -> HoldfastResult<Self> {
        if options.peers < 2 {
            return Err(HoldfastError::Config(format!(
                "a simulation needs at least 2 peers, got {}",
                options.peers
            )));
        }

        let hub = MemoryHub::new();
        let ids: Vec<PeerId> = (0..options.peers).map(|i| PeerId(i as u64 + 1)).collect();
        let mut participants = Vec::with_capacity(ids.len());
        for (index, id) in ids.iter().copied().enumerate() {
            let mut peer_config = config.clone();
            peer_config.local_name = format!("peer-{}", id.0);
            let mut session = Session::new(id, peer_config);
            for other in ids.iter().copied().filter(|other| *other != id) {
                session.add_peer(Peer::remote(other, format!("peer-{}", other.0)));
            }

            if index == 0 {
                let lobby = session.host_root(lobby_tree().boxed()).map_err(into_config)?;
                session.activate(lobby).map_err(into_config)?;
            } else {
                let lobby = session
                    .add_root(lobby_tree().boxed(), Some(ids[0]))
                    .map_err(into_config)?;
                session.request(lobby).map_err(into_config)?;
            }

            participants.push(Participant {
                session,
                io: hub.endpoint(id),
                world: world_for(index),
                retry: Vec::new(),
            });
        }
        info!(peers = options.peers, lossy = options.lossy, "Simulation ready");

        Ok(Self {
            hub,
            participants,
            options,
            phase: Phase::Joining,
            stats: SimulationStats::default(),
        })
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn stats(&self) -> &SimulationStats {
        &self.stats
    }

    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    /// Tick until the hand-off completes or the tick limit is reached.
    pub fn run(&mut self) -> &SimulationStats {
        while !self.is_done() && self.stats.ticks < self.options.ticks {
            self.step();
        }
        if !self.is_done() {
            warn!(ticks = self.stats.ticks, "Simulation hit the tick limit");
        }
        &self.stats
    }

    fn step(&mut self) {
        self.stats.ticks += 1;
        let tick = self.stats.ticks;
        for (index, participant) in self.participants.iter().enumerate() {
            let drop_now = self.options.lossy && (tick + index as u64) % 4 == 0;
            self.hub.set_lossy(participant.session.local(), drop_now);
        }

        for index in 0..self.participants.len() {
            let participant = &mut self.participants[index];
            let report = participant.session.tick(&mut participant.io);
            let notices = participant.session.take_notices();

            self.stats.packets_in += report.packets_in;
            self.stats.packets_out += report.packets_out;
            self.stats.packets_dropped += report.packets_dropped;
            self.stats.events_processed += report.events_processed;
            self.stats.defects += report.defects.len();

            for notice in notices {
                self.react(index, notice);
            }
            self.stats.retries += self.participants[index].retry_requests();
        }

        self.advance();
    }

    fn react(&mut self, index: usize, notice: SessionNotice) {
        let participant = &mut self.participants[index];
        let local = participant.session.local();
        match notice {
            SessionNotice::Available { resource } => {
                if let Err(e) = participant.on_available(&resource) {
                    warn!(peer = %local, resource = %resource, error = %e, "Could not use resource");
                }
            }
            SessionNotice::RequestFailed { resource }
            | SessionNotice::RequestTimedOut {
                resource,
                kind: PendingKind::Request,
            } => {
                debug!(peer = %local, resource = %resource, "Request will be retried");
                participant.retry.push(resource);
            }
            other => debug!(peer = %local, notice = ?other, "Session notice"),
        }
    }

    fn advance(&mut self) {
        match self.phase.clone() {
            Phase::Joining => {
                if !self.participants.iter().all(Participant::has_live_world) {
                    return;
                }
                let (first, _) = WORLDS[0];
                let world = lobby_path().child(first);
                let releaser = self.participants.iter().position(|p| {
                    p.session
                        .resolve(&world)
                        .is_some_and(|id| p.session.is_owner(id))
                });
                let Some(releaser) = releaser else {
                    info!("Nobody leased the first world, nothing to hand off");
                    self.phase = Phase::Done;
                    return;
                };

                let session = &mut self.participants[releaser].session;
                let result = session
                    .resolve(&world)
                    .ok_or_else(|| OwnershipError::from(HoldfastError::NotFound(world.to_string())))
                    .and_then(|id| session.fully_release(id));
                match result {
                    Ok(()) => {
                        info!(peer = %session.local(), resource = %world, tick = self.stats.ticks, "Handing off world");
                        self.phase = Phase::HandingOff { releaser, world };
                    }
                    Err(e) => {
                        warn!(peer = %session.local(), error = %e, "Hand-off could not start");
                        self.phase = Phase::Done;
                    }
                }
            }
            Phase::HandingOff { releaser, world } => {
                let participant = &self.participants[releaser];
                let released = participant
                    .session
                    .resolve(&world)
                    .and_then(|id| participant.session.node(id).ok())
                    .is_some_and(|node| !node.is_available() && !node.is_pending());
                if !released {
                    return;
                }
                let host = &self.participants[0].session;
                let to = host
                    .resolve(&world)
                    .and_then(|id| host.node(id).ok())
                    .and_then(|node| node.owner());
                let handoff = HandOff {
                    from: participant.session.local(),
                    to,
                };
                info!(from = %handoff.from, to = ?handoff.to, tick = self.stats.ticks, "Hand-off complete");
                self.stats.handoff = Some(handoff);
                self.phase = Phase::Done;
            }
            Phase::Done => {}
        }
    }
}

fn into_config(err: OwnershipError) -> HoldfastError {
    HoldfastError::Config(format!("simulation setup failed: {err}"))
}

/// One row per resource: path, owner, presence, subscribers, pending request.
pub fn resource_rows(session: &Session) -> Vec<[String; 5]> {
    let name = |peer: PeerId| session.peers().name_of(peer);
    let mut rows: Vec<[String; 5]> = session
        .tree()
        .ids()
        .into_iter()
        .filter_map(|id| session.node(id).ok().map(|node| (id, node)))
        .map(|(id, node)| {
            let subscribers: Vec<String> = session
                .subscriptions()
                .subscribers_of(id)
                .into_iter()
                .map(name)
                .collect();
            [
                session.path_of(id).to_string(),
                node.owner().map(name).unwrap_or_else(|| "-".to_string()),
                format!("{:?}", node.presence()).to_lowercase(),
                subscribers.join(", "),
                node.pending()
                    .map(|p| format!("{} -> {}", p.kind, name(p.to)))
                    .unwrap_or_default(),
            ]
        })
        .collect();
    rows.sort_by(|a, b| a[0].cmp(&b[0]));
    rows
}
