//! A federation node bound to a transport and a scheduler.

use std::collections::{BTreeMap, HashMap};

use faasnet_core::{PeerEndpoint, Process, Scheduler, TimerToken, Transport};
use tracing::{debug, warn};

use crate::codec::{ExecuteRequest, Message};
use crate::config::NodeConfig;
use crate::error::FederationResult;
use crate::federation::{
    Effect, ExecuteOutcome, FederationEngine, FederationStats, NodeState, QueryCompletion, Timer,
};
use crate::runtime::{ExecutionEngine, RuntimeHandle};
use crate::types::{ModuleName, QueryId};

type CompletionHook = Box<dyn FnMut(&QueryCompletion)>;

/// Drives a [`FederationEngine`] over concrete providers.
///
/// The node turns inbound frames and fired timers into engine calls, then
/// applies the resulting effects: messages are framed with a per-node
/// sequence number and handed to the [`Transport`], timers are armed on the
/// [`Scheduler`] under fresh tokens, and completions are stored until
/// collected with [`FaasNode::take_completion`].
pub struct FaasNode<E, T, S> {
    engine: FederationEngine<E>,
    transport: T,
    scheduler: S,
    next_sequence: u64,
    next_timer: u64,
    timers: HashMap<TimerToken, Timer>,
    completions: BTreeMap<QueryId, QueryCompletion>,
    on_complete: Option<CompletionHook>,
}

impl<E, T, S> std::fmt::Debug for FaasNode<E, T, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaasNode")
            .field("next_sequence", &self.next_sequence)
            .field("armed_timers", &self.timers.len())
            .field("completions", &self.completions.len())
            .finish_non_exhaustive()
    }
}

impl<E, T, S> FaasNode<E, T, S>
where
    E: ExecutionEngine,
    T: Transport,
    S: Scheduler,
{
    /// Create a node with a fresh runtime on `engine`.
    pub fn new(engine: E, transport: T, scheduler: S, config: NodeConfig) -> Self {
        let engine = FederationEngine::new(engine, config);
        debug!(runtime = %engine.runtime(), endpoint = %transport.local_endpoint(), "node created");
        Self {
            engine,
            transport,
            scheduler,
            next_sequence: 0,
            next_timer: 0,
            timers: HashMap::new(),
            completions: BTreeMap::new(),
            on_complete: None,
        }
    }

    /// Address this node sends from.
    pub fn endpoint(&self) -> PeerEndpoint {
        self.transport.local_endpoint()
    }

    /// Runtime handle, used as the node id.
    pub fn node_id(&self) -> RuntimeHandle {
        self.engine.runtime()
    }

    /// Add a peer to the end of the polling order.
    pub fn register_node(&mut self, endpoint: PeerEndpoint) {
        self.engine.register_peer(endpoint);
    }

    /// Load a module into this node's cache.
    ///
    /// Returns `true` if it was not present before.
    ///
    /// # Errors
    ///
    /// Fails on an invalid name or bytecode the engine rejects.
    pub fn register_module(&mut self, module: &str, bytes: &[u8]) -> FederationResult<bool> {
        let module = ModuleName::new(module)?;
        self.engine.register_module(&module, bytes)
    }

    /// Run `module::function(arg1, arg2)`, federating on a cache miss.
    ///
    /// # Errors
    ///
    /// Fails on invalid names, a failing local execution, or a full deferred
    /// queue. Network failures arrive later as a [`QueryCompletion`].
    pub fn execute_module(
        &mut self,
        module: &str,
        function: &str,
        arg1: i32,
        arg2: i32,
    ) -> FederationResult<ExecuteOutcome> {
        let request = ExecuteRequest::new(module, function, arg1, arg2)?;
        let outcome = self.engine.execute_module(request);
        self.flush();
        outcome
    }

    /// Remove and return the completion of `id`, once available.
    pub fn take_completion(&mut self, id: QueryId) -> Option<QueryCompletion> {
        self.completions.remove(&id)
    }

    /// Completions not yet taken, by query id.
    pub fn completions(&self) -> &BTreeMap<QueryId, QueryCompletion> {
        &self.completions
    }

    /// Call `hook` for every completion as it happens.
    pub fn set_on_complete(&mut self, hook: impl FnMut(&QueryCompletion) + 'static) {
        self.on_complete = Some(Box::new(hook));
    }

    /// Current protocol state.
    pub fn state(&self) -> NodeState {
        self.engine.state()
    }

    /// Protocol counters.
    pub fn stats(&self) -> &FederationStats {
        self.engine.stats()
    }

    /// The underlying state machine.
    pub fn engine(&self) -> &FederationEngine<E> {
        &self.engine
    }

    fn flush(&mut self) {
        for effect in self.engine.drain_effects() {
            match effect {
                Effect::Send { to, message } => self.send(to, &message),
                Effect::Schedule { delay, timer } => {
                    let token = TimerToken(self.next_timer);
                    self.next_timer += 1;
                    if let Err(err) = self.scheduler.schedule_after(delay, token) {
                        warn!(runtime = %self.node_id(), ?timer, error = %err, "failed to arm timer");
                        self.engine.stats_mut().driver_failures += 1;
                        continue;
                    }
                    self.timers.insert(token, timer);
                }
                Effect::Complete(completion) => {
                    if let Some(hook) = self.on_complete.as_mut() {
                        hook(&completion);
                    }
                    self.completions.insert(completion.id, completion);
                }
            }
        }
    }

    fn send(&mut self, to: PeerEndpoint, message: &Message) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let result = message
            .to_frame(sequence)
            .map_err(|e| e.to_string())
            .and_then(|frame| self.transport.send(&to, frame).map_err(|e| e.to_string()));
        match result {
            Ok(()) => {
                self.engine.stats_mut().frames_sent += 1;
                debug!(runtime = %self.node_id(), %to, %message, sequence, "sent");
            }
            Err(error) => {
                self.engine.stats_mut().driver_failures += 1;
                warn!(runtime = %self.node_id(), %to, %message, %error, "send failed");
            }
        }
    }
}

/// Inbound frames that fail validation surface as
/// [`FederationError::MalformedMessage`](crate::FederationError::MalformedMessage)
/// and are never answered.
fn decode_frame(frame: &[u8]) -> FederationResult<Message> {
    let (_, message) = Message::from_frame(frame)?;
    Ok(message)
}

impl<E, T, S> Process for FaasNode<E, T, S>
where
    E: ExecutionEngine,
    T: Transport,
    S: Scheduler,
{
    fn on_datagram(&mut self, from: PeerEndpoint, frame: &[u8]) {
        match decode_frame(frame) {
            Ok(message) => {
                self.engine.stats_mut().frames_received += 1;
                self.engine.handle_message(from, message);
                self.flush();
            }
            Err(err) => {
                self.engine.stats_mut().frames_malformed += 1;
                debug!(runtime = %self.node_id(), %from, error = %err, "dropping malformed frame");
            }
        }
    }

    fn on_timer(&mut self, token: TimerToken) {
        let Some(timer) = self.timers.remove(&token) else {
            debug!(runtime = %self.node_id(), %token, "unknown timer");
            return;
        };
        self.engine.handle_timer(timer);
        self.flush();
    }
}
