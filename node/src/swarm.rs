//! # Node Swarm
//!
//! One libp2p swarm over TCP/noise/yamux carries everything the node says
//! to other nodes:
//!
//! ```text
//!  gossipsub                 card topic
//!  identify                  /lango/id/1.0.0
//!  request/response (json)   /lango/handshake/1.1.0
//!  request/response (json)   /lango/handshake/1.0.0
//!  request/response (json)   /lango/a2a/1.0.0
//! ```
//!
//! The swarm lives in its own task; the rest of the node talks to it
//! through a [`SwarmHandle`], which is the [`GossipTransport`] discovery
//! publishes on, the [`HandshakeTransport`] handshakes run over and the
//! [`A2aTransport`] tool calls go out on.
//!
//! ```text
//!  SwarmHandle ──cmd──► swarm task ──► behaviours ──► remote
//!  GossipService ◄──envelopes── swarm task
//!  InboundHandlers ◄──request── swarm task ──► task per request ──reply──┐
//!                               swarm task ◄─────────────────────────────┘
//! ```
//!
//! The host key is the wallet key, so a peer's libp2p ID is derivable from
//! its DID. Noise has authenticated that ID before any request arrives.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use libp2p::multiaddr::Protocol;
use libp2p::request_response::{self, json, OutboundRequestId, ProtocolSupport, ResponseChannel};
use libp2p::swarm::dial_opts::DialOpts;
use libp2p::swarm::{NetworkBehaviour, SwarmEvent};
use libp2p::{
    gossipsub, identify, identity::Keypair, noise, tcp, yamux, Multiaddr, PeerId, StreamProtocol,
    Swarm,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Span};

use lango_p2p::capability::{A2aMessage, A2aTransport, GatewayError};
use lango_p2p::config::{A2A_PROTOCOL, AGENT_VERSION};
use lango_p2p::discovery::{DiscoveryError, GossipEnvelope, GossipTransport};
use lango_p2p::handshake::{HandshakeError, HandshakeMessage, HandshakeProtocol, HandshakeTransport};

use crate::inbound::InboundHandlers;
use crate::metrics::NodeMetrics;

const COMMAND_CHANNEL_CAPACITY: usize = 64;
const INBOUND_CHANNEL_CAPACITY: usize = 256;
const REPLY_CHANNEL_CAPACITY: usize = 256;
const IDLE_CONNECTION_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(NetworkBehaviour)]
pub struct NodeBehaviour {
    pub gossipsub: gossipsub::Behaviour,
    pub identify: identify::Behaviour,
    pub handshake: json::Behaviour<HandshakeMessage, HandshakeMessage>,
    pub handshake_legacy: json::Behaviour<HandshakeMessage, HandshakeMessage>,
    pub a2a: json::Behaviour<A2aMessage, A2aMessage>,
}

impl NodeBehaviour {
    fn handshake_for(
        &mut self,
        protocol: HandshakeProtocol,
    ) -> &mut json::Behaviour<HandshakeMessage, HandshakeMessage> {
        match protocol {
            HandshakeProtocol::V1_1 => &mut self.handshake,
            HandshakeProtocol::V1_0 => &mut self.handshake_legacy,
        }
    }
}

type Reply<T> = oneshot::Sender<Result<T, String>>;

enum Command {
    Publish {
        topic: String,
        data: Vec<u8>,
        reply: Reply<()>,
    },
    Dial {
        peer: PeerId,
        addr: Multiaddr,
        reply: Reply<()>,
    },
    Handshake {
        peer: PeerId,
        protocol: HandshakeProtocol,
        message: HandshakeMessage,
        reply: Reply<HandshakeMessage>,
    },
    Call {
        peer: PeerId,
        message: A2aMessage,
        reply: Reply<A2aMessage>,
    },
}

/// An answer from an inbound handler, on its way back to the swarm.
enum Outgoing {
    Handshake {
        protocol: HandshakeProtocol,
        channel: ResponseChannel<HandshakeMessage>,
        message: HandshakeMessage,
    },
    A2a {
        channel: ResponseChannel<A2aMessage>,
        message: A2aMessage,
    },
}

/// Cheap to clone; every clone talks to the same swarm task.
#[derive(Clone)]
pub struct SwarmHandle {
    commands: mpsc::Sender<Command>,
}

impl SwarmHandle {
    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T, String> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| "swarm task stopped".to_string())?;
        rx.await.map_err(|_| "swarm task dropped reply".to_string())?
    }

    /// Connect to `addr`, which must end in `/p2p/<peer id>`, and return the
    /// peer once the connection is up.
    pub async fn dial(&self, addr: Multiaddr) -> Result<PeerId> {
        let peer = peer_id_of(&addr)
            .with_context(|| format!("{addr} does not name a peer; append /p2p/<peer id>"))?;
        self.request(|reply| Command::Dial { peer, addr: addr.clone(), reply })
            .await
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("failed to dial {addr}"))?;
        Ok(peer)
    }
}

fn peer_id_of(addr: &Multiaddr) -> Option<PeerId> {
    addr.iter().find_map(|p| match p {
        Protocol::P2p(peer) => Some(peer),
        _ => None,
    })
}

#[async_trait]
impl GossipTransport for SwarmHandle {
    async fn publish(&self, topic: &str, data: Vec<u8>) -> Result<(), DiscoveryError> {
        let topic = topic.to_string();
        self.request(|reply| Command::Publish { topic, data, reply })
            .await
            .map_err(DiscoveryError::Transport)
    }
}

#[async_trait]
impl HandshakeTransport for SwarmHandle {
    async fn exchange(
        &self,
        peer: PeerId,
        protocol: HandshakeProtocol,
        message: HandshakeMessage,
    ) -> Result<HandshakeMessage, HandshakeError> {
        self.request(|reply| Command::Handshake {
            peer,
            protocol,
            message,
            reply,
        })
        .await
        .map_err(HandshakeError::Transport)
    }
}

#[async_trait]
impl A2aTransport for SwarmHandle {
    async fn call(&self, peer: PeerId, message: A2aMessage) -> Result<A2aMessage, GatewayError> {
        self.request(|reply| Command::Call { peer, message, reply })
            .await
            .map_err(GatewayError::Transport)
    }
}

/// How to bring the swarm up.
pub struct SwarmOptions {
    /// `None` for a dial-only swarm.
    pub listen: Option<Multiaddr>,
    pub topic: String,
    pub bootstrap: Vec<Multiaddr>,
    /// Per request/response round trip.
    pub request_timeout: Duration,
}

/// The running swarm.
pub struct NodeSwarm {
    pub handle: SwarmHandle,
    pub local_addrs: Vec<Multiaddr>,
    task: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl NodeSwarm {
    /// Build the swarm, listen, subscribe to the card topic, dial the
    /// bootstrap peers, and spawn the event loop.
    ///
    /// With `handlers` the node answers handshake and a2a requests;
    /// without, those protocols are outbound only. The receiver yields
    /// everything heard on the card topic; hand it to
    /// `GossipService::start`.
    pub fn spawn(
        keypair: Keypair,
        options: SwarmOptions,
        handlers: Option<Arc<InboundHandlers>>,
        metrics: Arc<NodeMetrics>,
    ) -> Result<(Self, mpsc::Receiver<GossipEnvelope>)> {
        let support = if handlers.is_some() {
            ProtocolSupport::Full
        } else {
            ProtocolSupport::Outbound
        };
        let mut swarm = build_swarm(keypair, support, options.request_timeout)?;
        let topic = gossipsub::IdentTopic::new(options.topic);
        swarm
            .behaviour_mut()
            .gossipsub
            .subscribe(&topic)
            .context("failed to subscribe to the card topic")?;
        if let Some(listen) = &options.listen {
            swarm
                .listen_on(listen.clone())
                .with_context(|| format!("failed to listen on {listen}"))?;
        }

        let span = info_span!("swarm", peer_id = %swarm.local_peer_id());
        for addr in &options.bootstrap {
            if let Err(e) = swarm.dial(addr.clone()) {
                warn!(parent: &span, addr = %addr, error = %e, "bootstrap dial failed");
            }
        }

        let (commands, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (inbound_tx, inbound) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        let (outgoing_tx, outgoing_rx) = mpsc::channel(REPLY_CHANNEL_CAPACITY);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let event_loop = EventLoop {
            swarm,
            topic,
            commands: command_rx,
            inbound: inbound_tx,
            outgoing_tx,
            outgoing: outgoing_rx,
            handlers,
            pending_dials: HashMap::new(),
            pending_handshakes: HashMap::new(),
            pending_calls: HashMap::new(),
            metrics,
            span,
        };
        let task = tokio::spawn(event_loop.run(shutdown_rx));

        let swarm = Self {
            handle: SwarmHandle { commands },
            local_addrs: options.listen.into_iter().collect(),
            task,
            shutdown,
        };
        Ok((swarm, inbound))
    }

    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

fn build_swarm(
    keypair: Keypair,
    support: ProtocolSupport,
    request_timeout: Duration,
) -> Result<Swarm<NodeBehaviour>> {
    let rr_config = || request_response::Config::default().with_request_timeout(request_timeout);
    let swarm = libp2p::SwarmBuilder::with_existing_identity(keypair)
        .with_tokio()
        .with_tcp(
            tcp::Config::default().nodelay(true),
            noise::Config::new,
            yamux::Config::default,
        )
        .context("failed to build TCP transport")?
        .with_behaviour(|key| {
            let config = gossipsub::ConfigBuilder::default()
                .heartbeat_interval(Duration::from_secs(1))
                .validation_mode(gossipsub::ValidationMode::Strict)
                .build()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
            let gossipsub =
                gossipsub::Behaviour::new(gossipsub::MessageAuthenticity::Signed(key.clone()), config)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
            let identify = identify::Behaviour::new(
                identify::Config::new("/lango/id/1.0.0".into(), key.public())
                    .with_agent_version(AGENT_VERSION.to_string()),
            );
            let handshake = json::Behaviour::new(
                [(StreamProtocol::new(HandshakeProtocol::V1_1.id()), support.clone())],
                rr_config(),
            );
            let handshake_legacy = json::Behaviour::new(
                [(StreamProtocol::new(HandshakeProtocol::V1_0.id()), support.clone())],
                rr_config(),
            );
            let a2a = json::Behaviour::new(
                [(StreamProtocol::new(A2A_PROTOCOL), support)],
                rr_config(),
            );
            Ok(NodeBehaviour {
                gossipsub,
                identify,
                handshake,
                handshake_legacy,
                a2a,
            })
        })
        .map_err(|e| anyhow::anyhow!("failed to build behaviour: {e}"))?
        .with_swarm_config(|c| c.with_idle_connection_timeout(IDLE_CONNECTION_TIMEOUT))
        .build();
    Ok(swarm)
}

struct EventLoop {
    swarm: Swarm<NodeBehaviour>,
    topic: gossipsub::IdentTopic,
    commands: mpsc::Receiver<Command>,
    inbound: mpsc::Sender<GossipEnvelope>,
    outgoing_tx: mpsc::Sender<Outgoing>,
    outgoing: mpsc::Receiver<Outgoing>,
    handlers: Option<Arc<InboundHandlers>>,
    pending_dials: HashMap<PeerId, Vec<Reply<()>>>,
    /// Request IDs are per behaviour, so the version is part of the key.
    pending_handshakes: HashMap<(HandshakeProtocol, OutboundRequestId), Reply<HandshakeMessage>>,
    pending_calls: HashMap<OutboundRequestId, Reply<A2aMessage>>,
    metrics: Arc<NodeMetrics>,
    span: Span,
}

impl EventLoop {
    async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(parent: &self.span, "swarm started");
        loop {
            tokio::select! {
                event = self.swarm.select_next_some() => self.on_swarm_event(event).await,
                command = self.commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => break,
                },
                Some(outgoing) = self.outgoing.recv() => self.on_outgoing(outgoing),
                _ = shutdown.changed() => break,
            }
        }
        info!(parent: &self.span, "swarm stopped");
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Publish { topic, data, reply } => {
                let topic = gossipsub::IdentTopic::new(topic);
                let result = self
                    .swarm
                    .behaviour_mut()
                    .gossipsub
                    .publish(topic, data)
                    .map(|_| ())
                    .map_err(|e| e.to_string());
                if result.is_err() {
                    self.metrics.gossip_publish_failures_total.inc();
                }
                let _ = reply.send(result);
            }
            Command::Dial { peer, addr, reply } => {
                if self.swarm.is_connected(&peer) {
                    let _ = reply.send(Ok(()));
                    return;
                }
                let opts = DialOpts::peer_id(peer).addresses(vec![addr]).build();
                match self.swarm.dial(opts) {
                    Ok(()) => self.pending_dials.entry(peer).or_default().push(reply),
                    Err(e) => {
                        let _ = reply.send(Err(e.to_string()));
                    }
                }
            }
            Command::Handshake {
                peer,
                protocol,
                message,
                reply,
            } => {
                let id = self
                    .swarm
                    .behaviour_mut()
                    .handshake_for(protocol)
                    .send_request(&peer, message);
                self.pending_handshakes.insert((protocol, id), reply);
            }
            Command::Call {
                peer,
                message,
                reply,
            } => {
                let id = self.swarm.behaviour_mut().a2a.send_request(&peer, message);
                self.pending_calls.insert(id, reply);
            }
        }
    }

    fn on_outgoing(&mut self, outgoing: Outgoing) {
        let sent = match outgoing {
            Outgoing::Handshake {
                protocol,
                channel,
                message,
            } => self
                .swarm
                .behaviour_mut()
                .handshake_for(protocol)
                .send_response(channel, message)
                .is_ok(),
            Outgoing::A2a { channel, message } => self
                .swarm
                .behaviour_mut()
                .a2a
                .send_response(channel, message)
                .is_ok(),
        };
        if !sent {
            debug!(parent: &self.span, "requester gone before the reply");
        }
    }

    async fn on_swarm_event(&mut self, event: SwarmEvent<NodeBehaviourEvent>) {
        match event {
            SwarmEvent::NewListenAddr { address, .. } => {
                info!(parent: &self.span, %address, "listening");
            }
            SwarmEvent::ConnectionEstablished { peer_id, .. } => {
                debug!(parent: &self.span, %peer_id, "connected");
                self.metrics.connected_peers.inc();
                for reply in self.pending_dials.remove(&peer_id).unwrap_or_default() {
                    let _ = reply.send(Ok(()));
                }
            }
            SwarmEvent::ConnectionClosed { peer_id, .. } => {
                debug!(parent: &self.span, %peer_id, "disconnected");
                self.metrics.connected_peers.dec();
            }
            SwarmEvent::OutgoingConnectionError { peer_id, error, .. } => {
                warn!(parent: &self.span, peer_id = ?peer_id, error = %error, "outgoing connection failed");
                if let Some(peer) = peer_id {
                    for reply in self.pending_dials.remove(&peer).unwrap_or_default() {
                        let _ = reply.send(Err(error.to_string()));
                    }
                }
            }
            SwarmEvent::Behaviour(NodeBehaviourEvent::Gossipsub(gossipsub::Event::Message {
                message,
                ..
            })) => {
                if message.topic != self.topic.hash() {
                    return;
                }
                self.metrics.gossip_messages_total.inc();
                let envelope = GossipEnvelope {
                    source: message.source,
                    data: message.data,
                };
                if self.inbound.send(envelope).await.is_err() {
                    debug!(parent: &self.span, "discovery stopped, card dropped");
                }
            }
            SwarmEvent::Behaviour(NodeBehaviourEvent::Identify(identify::Event::Received {
                peer_id,
                info,
                ..
            })) => {
                debug!(
                    parent: &self.span,
                    %peer_id,
                    agent = %info.agent_version,
                    addrs = info.listen_addrs.len(),
                    "identified"
                );
            }
            SwarmEvent::Behaviour(NodeBehaviourEvent::Handshake(event)) => {
                self.on_handshake_event(HandshakeProtocol::V1_1, event)
            }
            SwarmEvent::Behaviour(NodeBehaviourEvent::HandshakeLegacy(event)) => {
                self.on_handshake_event(HandshakeProtocol::V1_0, event)
            }
            SwarmEvent::Behaviour(NodeBehaviourEvent::A2a(event)) => self.on_a2a_event(event),
            _ => {}
        }
    }

    fn on_handshake_event(
        &mut self,
        protocol: HandshakeProtocol,
        event: request_response::Event<HandshakeMessage, HandshakeMessage>,
    ) {
        match event {
            request_response::Event::Message { peer, message, .. } => match message {
                request_response::Message::Request { request, channel, .. } => {
                    let Some(handlers) = self.handlers.clone() else {
                        return;
                    };
                    let outgoing = self.outgoing_tx.clone();
                    tokio::spawn(async move {
                        let message = handlers.handshake(peer, protocol, request).await;
                        let _ = outgoing
                            .send(Outgoing::Handshake {
                                protocol,
                                channel,
                                message,
                            })
                            .await;
                    });
                }
                request_response::Message::Response {
                    request_id,
                    response,
                } => {
                    if let Some(reply) = self.pending_handshakes.remove(&(protocol, request_id)) {
                        let _ = reply.send(Ok(response));
                    }
                }
            },
            request_response::Event::OutboundFailure {
                peer,
                request_id,
                error,
                ..
            } => {
                debug!(parent: &self.span, %peer, %protocol, error = %error, "handshake request failed");
                if let Some(reply) = self.pending_handshakes.remove(&(protocol, request_id)) {
                    let _ = reply.send(Err(error.to_string()));
                }
            }
            request_response::Event::InboundFailure { peer, error, .. } => {
                debug!(parent: &self.span, %peer, %protocol, error = %error, "inbound handshake stream failed");
            }
            request_response::Event::ResponseSent { .. } => {}
        }
    }

    fn on_a2a_event(&mut self, event: request_response::Event<A2aMessage, A2aMessage>) {
        match event {
            request_response::Event::Message { peer, message, .. } => match message {
                request_response::Message::Request { request, channel, .. } => {
                    let Some(handlers) = self.handlers.clone() else {
                        return;
                    };
                    let outgoing = self.outgoing_tx.clone();
                    tokio::spawn(async move {
                        // No reply drops the channel; the caller sees the failure.
                        if let Some(message) = handlers.a2a(peer, request).await {
                            let _ = outgoing.send(Outgoing::A2a { channel, message }).await;
                        }
                    });
                }
                request_response::Message::Response {
                    request_id,
                    response,
                } => {
                    if let Some(reply) = self.pending_calls.remove(&request_id) {
                        let _ = reply.send(Ok(response));
                    }
                }
            },
            request_response::Event::OutboundFailure {
                peer,
                request_id,
                error,
                ..
            } => {
                debug!(parent: &self.span, %peer, error = %error, "a2a request failed");
                if let Some(reply) = self.pending_calls.remove(&request_id) {
                    let _ = reply.send(Err(error.to_string()));
                }
            }
            request_response::Event::InboundFailure { peer, error, .. } => {
                debug!(parent: &self.span, %peer, error = %error, "inbound a2a stream failed");
            }
            request_response::Event::ResponseSent { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dial_address_must_name_the_peer() {
        let peer = PeerId::random();
        let named: Multiaddr = format!("/ip4/127.0.0.1/tcp/9740/p2p/{peer}").parse().unwrap();
        assert_eq!(peer_id_of(&named), Some(peer));

        let bare: Multiaddr = "/ip4/127.0.0.1/tcp/9740".parse().unwrap();
        assert_eq!(peer_id_of(&bare), None);
    }
}
