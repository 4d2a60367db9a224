use std::collections::VecDeque;
use std::time::Duration;

use faasnet_core::PeerEndpoint;
use tracing::{debug, info, warn};

use crate::cache::ModuleCache;
use crate::codec::{ExecuteRequest, Message};
use crate::config::NodeConfig;
use crate::directory::PeerDirectory;
use crate::error::{FederationError, FederationResult};
use crate::runtime::{ExecutionEngine, RuntimeHandle};
use crate::types::{ModuleName, QueryId};

use super::query::{
    Deferred, Effect, ExecuteOutcome, FederatedQuery, NodeState, Origin, Outstanding, Phase,
    QueryCompletion, Timer,
};
use super::stats::FederationStats;

enum Step {
    Wait,
    Exhausted,
    Send {
        peer: PeerEndpoint,
        attempt: u64,
        request: ExecuteRequest,
    },
}

/// Protocol state machine of one node.
///
/// The engine does no I/O. Every handler records its side effects in an
/// outbox that the driver drains with [`FederationEngine::drain_effects`] and
/// applies in order: frames to send, timers to arm, completions to deliver.
///
/// At most one [`FederatedQuery`] is in flight. Requests that arrive while it
/// runs wait in a bounded FIFO and are replayed when it concludes.
#[derive(Debug)]
pub struct FederationEngine<E> {
    cache: ModuleCache<E>,
    directory: PeerDirectory,
    config: NodeConfig,
    active: Option<FederatedQuery>,
    deferred: VecDeque<Deferred>,
    next_query: u64,
    outbox: Vec<Effect>,
    stats: FederationStats,
}

impl<E: ExecutionEngine> FederationEngine<E> {
    /// Create an idle engine with a fresh runtime on `engine`.
    pub fn new(engine: E, config: NodeConfig) -> Self {
        Self {
            cache: ModuleCache::new(engine),
            directory: PeerDirectory::new(),
            config,
            active: None,
            deferred: VecDeque::new(),
            next_query: 0,
            outbox: Vec::new(),
            stats: FederationStats::default(),
        }
    }

    /// Runtime handle of this node, doubling as its node id.
    pub fn runtime(&self) -> RuntimeHandle {
        self.cache.runtime()
    }

    /// The module cache.
    pub fn cache(&self) -> &ModuleCache<E> {
        &self.cache
    }

    /// Known peers.
    pub fn directory(&self) -> &PeerDirectory {
        &self.directory
    }

    /// Configuration in use.
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// The in-flight query, if any.
    pub fn active_query(&self) -> Option<&FederatedQuery> {
        self.active.as_ref()
    }

    /// Requests waiting behind the in-flight query.
    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    /// Current state.
    pub fn state(&self) -> NodeState {
        NodeState::from(self.active.as_ref())
    }

    /// Protocol counters.
    pub fn stats(&self) -> &FederationStats {
        &self.stats
    }

    pub(crate) fn stats_mut(&mut self) -> &mut FederationStats {
        &mut self.stats
    }

    /// Take every pending side effect, oldest first.
    pub fn drain_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.outbox)
    }

    /// Append a peer to the polling order.
    pub fn register_peer(&mut self, endpoint: PeerEndpoint) {
        debug!(runtime = %self.runtime(), peer = %endpoint, "peer registered");
        self.directory.register(endpoint);
    }

    /// Load a module into the local cache.
    ///
    /// Returns `true` if it was not present before.
    ///
    /// # Errors
    ///
    /// Fails if the engine rejects the bytecode.
    pub fn register_module(&mut self, module: &ModuleName, bytes: &[u8]) -> FederationResult<bool> {
        Ok(self.cache.ensure_registered(module, bytes)?)
    }

    /// Execute a function, locally when possible and through peers otherwise.
    ///
    /// A cached module answers synchronously with no network traffic. A miss
    /// returns [`ExecuteOutcome::Pending`]; the matching [`QueryCompletion`]
    /// is emitted later as an [`Effect::Complete`].
    ///
    /// # Errors
    ///
    /// - the cached module fails to execute
    /// - the deferred queue is full while another query is in flight
    pub fn execute_module(&mut self, request: ExecuteRequest) -> FederationResult<ExecuteOutcome> {
        if let Some(result) = self.cache.try_execute_local(
            &request.module,
            &request.function,
            request.arg1,
            request.arg2,
        )? {
            self.stats.local_hits += 1;
            info!(runtime = %self.runtime(), %request, result, "executed from cache");
            return Ok(ExecuteOutcome::Completed(result));
        }

        if self.active.is_some() {
            if self.deferred.len() >= self.config.deferred_capacity {
                return Err(FederationError::DeferredQueueFull {
                    capacity: self.config.deferred_capacity,
                });
            }
            let id = self.allocate_query();
            debug!(runtime = %self.runtime(), query = %id, %request, "local request deferred");
            self.stats.requests_deferred += 1;
            self.deferred.push_back(Deferred::Local { id, request });
            return Ok(ExecuteOutcome::Pending(id));
        }

        let id = self.allocate_query();
        self.start_query(id, request, Origin::Local);
        Ok(ExecuteOutcome::Pending(id))
    }

    /// Handle a decoded message from `from`.
    pub fn handle_message(&mut self, from: PeerEndpoint, message: Message) {
        debug!(runtime = %self.runtime(), %from, %message, "received");
        match message {
            Message::Execute(request) => self.on_execute_request(from, request),
            Message::ExecuteResult { module, result } => self.on_result(from, module, result),
            Message::LoadRequest { module } => self.on_load_request(from, module),
            Message::LoadResponse { module, bytes } => self.on_load_response(from, module, bytes),
            Message::NotFound { module } => self.on_not_found(from, module),
        }
    }

    /// Handle a timer armed through an [`Effect::Schedule`].
    pub fn handle_timer(&mut self, timer: Timer) {
        match timer {
            Timer::QueryStep { query } => self.query_step(query),
            Timer::ReplyTimeout { query, attempt } => self.on_reply_timeout(query, attempt),
        }
    }

    fn allocate_query(&mut self) -> QueryId {
        let id = QueryId(self.next_query);
        self.next_query += 1;
        id
    }

    fn send(&mut self, to: PeerEndpoint, message: Message) {
        self.outbox.push(Effect::Send { to, message });
    }

    fn schedule(&mut self, delay: Duration, timer: Timer) {
        self.outbox.push(Effect::Schedule { delay, timer });
    }

    fn start_query(&mut self, id: QueryId, request: ExecuteRequest, origin: Origin) {
        match origin {
            Origin::Local => {
                self.stats.queries_started += 1;
                info!(runtime = %self.runtime(), query = %id, %request, peers = self.directory.len(), "querying peers");
            }
            Origin::Relay { requester } => {
                self.stats.relays_started += 1;
                info!(runtime = %self.runtime(), query = %id, %request, %requester, peers = self.directory.len(), "relaying");
            }
        }
        self.active = Some(FederatedQuery::new(id, request, origin));
        self.query_step(id);
    }

    fn query_step(&mut self, id: QueryId) {
        let skip_requester = self.config.skip_requester;
        let step = {
            let Some(query) = self.active.as_mut().filter(|q| q.id == id) else {
                // concluded since this step was armed
                return;
            };
            let requester = query.origin.requester();
            let Phase::Polling {
                cursor,
                outstanding,
            } = &mut query.phase
            else {
                return;
            };

            if outstanding.is_some() {
                Step::Wait
            } else {
                let peers = self.directory.all();
                while skip_requester
                    && *cursor < peers.len()
                    && Some(peers[*cursor]) == requester
                {
                    *cursor += 1;
                }
                match peers.get(*cursor).copied() {
                    None => Step::Exhausted,
                    Some(peer) => {
                        *cursor += 1;
                        query.attempts += 1;
                        *outstanding = Some(Outstanding {
                            peer,
                            attempt: query.attempts,
                        });
                        Step::Send {
                            peer,
                            attempt: query.attempts,
                            request: query.request.clone(),
                        }
                    }
                }
            }
        };

        let tick = self.config.tick_interval;
        match step {
            Step::Wait => self.schedule(tick, Timer::QueryStep { query: id }),
            Step::Exhausted => self.conclude(None),
            Step::Send {
                peer,
                attempt,
                request,
            } => {
                debug!(runtime = %self.runtime(), query = %id, %peer, attempt, "polling peer");
                self.send(peer, Message::Execute(request));
                self.schedule(tick, Timer::QueryStep { query: id });
                if let Some(timeout) = self.config.reply_timeout {
                    self.schedule(timeout, Timer::ReplyTimeout { query: id, attempt });
                }
            }
        }
    }

    fn on_execute_request(&mut self, from: PeerEndpoint, request: ExecuteRequest) {
        if self.active.is_none() {
            self.serve_remote(from, request);
            return;
        }

        if self.deferred.len() >= self.config.deferred_capacity {
            warn!(runtime = %self.runtime(), %from, %request, capacity = self.config.deferred_capacity, "deferred queue full, refusing");
            self.stats.requests_rejected += 1;
            self.send(
                from,
                Message::NotFound {
                    module: request.module,
                },
            );
            return;
        }

        debug!(runtime = %self.runtime(), %from, %request, "remote request deferred");
        self.stats.requests_deferred += 1;
        self.deferred.push_back(Deferred::Remote { from, request });
    }

    fn serve_remote(&mut self, from: PeerEndpoint, request: ExecuteRequest) {
        match self.cache.try_execute_local(
            &request.module,
            &request.function,
            request.arg1,
            request.arg2,
        ) {
            Ok(Some(result)) => {
                self.stats.requests_served += 1;
                debug!(runtime = %self.runtime(), %from, %request, result, "served from cache");
                self.send(
                    from,
                    Message::ExecuteResult {
                        module: request.module,
                        result,
                    },
                );
            }
            Ok(None) => {
                let id = self.allocate_query();
                self.start_query(id, request, Origin::Relay { requester: from });
            }
            Err(err) => {
                warn!(runtime = %self.runtime(), %from, %request, error = %err, "execution failed, answering not found");
                self.send(
                    from,
                    Message::NotFound {
                        module: request.module,
                    },
                );
            }
        }
    }

    fn on_result(&mut self, from: PeerEndpoint, module: ModuleName, result: i32) {
        let attempt = {
            let Some(query) = self.active.as_mut() else {
                self.stats.stale_replies += 1;
                return;
            };
            let expected = matches!(
                query.phase,
                Phase::Polling { outstanding: Some(o), .. } if o.peer == from
            );
            if !expected || query.request.module != module {
                self.stats.stale_replies += 1;
                debug!(%from, %module, "result matches no outstanding request");
                return;
            }
            query.attempts += 1;
            query.attempts
        };

        if self.cache.is_registered(&module) {
            self.conclude(Some(result));
            return;
        }

        if let Some(query) = self.active.as_mut() {
            query.phase = Phase::Loading {
                result,
                outstanding: Outstanding {
                    peer: from,
                    attempt,
                },
            };
        }
        info!(runtime = %self.runtime(), %from, %module, result, "peer resolved, fetching module");
        self.send(from, Message::LoadRequest { module });
        if let Some(timeout) = self.config.reply_timeout {
            if let Some(query) = self.active.as_ref() {
                let query = query.id;
                self.schedule(timeout, Timer::ReplyTimeout { query, attempt });
            }
        }
    }

    fn on_load_request(&mut self, from: PeerEndpoint, module: ModuleName) {
        match self.cache.export_bytes(&module) {
            Ok(Some(bytes)) => {
                let response = Message::LoadResponse { module, bytes };
                if !response.fits_in_frame() {
                    // the requester already has its result and takes `n` as "deliver uncached"
                    self.stats.loads_oversized += 1;
                    warn!(runtime = %self.runtime(), %from, module = %response.module(), frame = response.frame_len(), "module too large for one datagram");
                    let module = response.module().clone();
                    self.send(from, Message::NotFound { module });
                    return;
                }
                self.stats.loads_served += 1;
                debug!(runtime = %self.runtime(), %from, module = %response.module(), frame = response.frame_len(), "serving module");
                self.send(from, response);
            }
            Ok(None) => self.send(from, Message::NotFound { module }),
            Err(err) => {
                warn!(runtime = %self.runtime(), %from, %module, error = %err, "export failed");
                self.send(from, Message::NotFound { module });
            }
        }
    }

    fn on_load_response(&mut self, from: PeerEndpoint, module: ModuleName, bytes: Vec<u8>) {
        match self.cache.ensure_registered(&module, &bytes) {
            Ok(true) => {
                self.stats.modules_cached += 1;
                info!(runtime = %self.runtime(), %from, %module, size = bytes.len(), "module cached");
            }
            Ok(false) => {}
            Err(err) => {
                warn!(runtime = %self.runtime(), %from, %module, error = %err, "could not cache module");
            }
        }

        let loaded = self.active.as_ref().and_then(|query| match query.phase {
            Phase::Loading {
                result,
                outstanding,
            } if outstanding.peer == from && query.request.module == module => Some(result),
            _ => None,
        });
        if let Some(result) = loaded {
            self.conclude(Some(result));
        }
    }

    fn on_not_found(&mut self, from: PeerEndpoint, module: ModuleName) {
        let Some(query) = self.active.as_mut() else {
            self.stats.stale_replies += 1;
            return;
        };
        if query.request.module != module {
            self.stats.stale_replies += 1;
            return;
        }

        match &mut query.phase {
            Phase::Polling { outstanding, .. } if outstanding.is_some_and(|o| o.peer == from) => {
                debug!(%from, %module, "peer does not have module");
                *outstanding = None;
            }
            Phase::Loading {
                result,
                outstanding,
            } if outstanding.peer == from => {
                // the peer answered but cannot ship the module; deliver uncached
                let result = *result;
                warn!(%from, %module, "module load refused");
                self.conclude(Some(result));
            }
            _ => self.stats.stale_replies += 1,
        }
    }

    fn on_reply_timeout(&mut self, id: QueryId, attempt: u64) {
        let Some(query) = self.active.as_mut().filter(|q| q.id == id) else {
            return;
        };
        match &mut query.phase {
            Phase::Polling { outstanding, .. } if outstanding.is_some_and(|o| o.attempt == attempt) => {
                warn!(query = %id, attempt, "no reply from peer, moving on");
                *outstanding = None;
                self.stats.reply_timeouts += 1;
            }
            Phase::Loading {
                result,
                outstanding,
            } if outstanding.attempt == attempt => {
                let result = *result;
                warn!(query = %id, attempt, "module load timed out, delivering uncached");
                self.stats.reply_timeouts += 1;
                self.conclude(Some(result));
            }
            _ => {}
        }
    }

    fn conclude(&mut self, outcome: Option<i32>) {
        let Some(query) = self.active.take() else {
            return;
        };
        let module = query.request.module.clone();

        match (query.origin, outcome) {
            (Origin::Local, Some(result)) => {
                self.stats.queries_resolved += 1;
                info!(runtime = %self.runtime(), query = %query.id, request = %query.request, result, "query resolved");
                self.outbox.push(Effect::Complete(QueryCompletion {
                    id: query.id,
                    request: query.request,
                    result: Ok(result),
                }));
            }
            (Origin::Local, None) => {
                self.stats.queries_exhausted += 1;
                warn!(runtime = %self.runtime(), query = %query.id, request = %query.request, "no peer has the module");
                self.outbox.push(Effect::Complete(QueryCompletion {
                    id: query.id,
                    request: query.request,
                    result: Err(FederationError::ModuleNotFoundAnywhere { module }),
                }));
            }
            (Origin::Relay { requester }, Some(result)) => {
                self.stats.relays_resolved += 1;
                info!(runtime = %self.runtime(), query = %query.id, %requester, result, "relay resolved");
                self.send(requester, Message::ExecuteResult { module, result });
            }
            (Origin::Relay { requester }, None) => {
                self.stats.relays_exhausted += 1;
                info!(runtime = %self.runtime(), query = %query.id, %requester, "relay exhausted");
                self.send(requester, Message::NotFound { module });
            }
        }

        self.drain_deferred();
    }

    fn drain_deferred(&mut self) {
        while self.active.is_none() {
            let Some(next) = self.deferred.pop_front() else {
                break;
            };
            match next {
                Deferred::Remote { from, request } => self.serve_remote(from, request),
                Deferred::Local { id, request } => self.resume_local(id, request),
            }
        }
    }

    fn resume_local(&mut self, id: QueryId, request: ExecuteRequest) {
        let result = self.cache.try_execute_local(
            &request.module,
            &request.function,
            request.arg1,
            request.arg2,
        );
        let result = match result {
            Ok(None) => {
                self.start_query(id, request, Origin::Local);
                return;
            }
            Ok(Some(value)) => {
                self.stats.local_hits += 1;
                Ok(value)
            }
            Err(err) => Err(FederationError::Engine(err)),
        };
        self.outbox.push(Effect::Complete(QueryCompletion {
            id,
            request,
            result,
        }));
    }
}
