use std::cell::RefCell;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::rc::Rc;
use std::time::Duration;

use faasnet_core::{
    PeerEndpoint, Process, Scheduler, SchedulerError, TimerToken, Transport, TransportError,
};
use tokio::net::UdpSocket;
use tokio::sync::{Notify, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, instrument};

use crate::config::NodeConfig;
use crate::error::{FederationError, FederationResult};
use crate::federation::{ExecuteOutcome, QueryCompletion};
use crate::node::FaasNode;
use crate::runtime::ExecutionEngine;
use crate::types::QueryId;
use crate::wire::MAX_FRAME_SIZE;

/// [`Transport`] over a tokio UDP socket.
///
/// Sends never wait: a datagram the kernel cannot take right now is reported
/// as an I/O error and the protocol treats it as lost.
#[derive(Debug, Clone)]
pub struct UdpTransport {
    socket: Rc<UdpSocket>,
    local: PeerEndpoint,
}

impl UdpTransport {
    /// Wrap a bound socket.
    pub fn new(socket: Rc<UdpSocket>) -> io::Result<Self> {
        let local = PeerEndpoint::from(socket.local_addr()?);
        Ok(Self { socket, local })
    }
}

impl Transport for UdpTransport {
    fn local_endpoint(&self) -> PeerEndpoint {
        self.local
    }

    fn send(&self, to: &PeerEndpoint, frame: Vec<u8>) -> Result<(), TransportError> {
        if frame.len() > MAX_FRAME_SIZE {
            return Err(TransportError::FrameTooLarge {
                size: frame.len(),
                max: MAX_FRAME_SIZE,
            });
        }
        self.socket.try_send_to(&frame, to.to_socket_addr())?;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct TimerQueue {
    heap: BinaryHeap<Reverse<(Instant, u64, TimerToken)>>,
    next_sequence: u64,
}

/// [`Scheduler`] backed by the tokio clock.
///
/// Timers are kept in a local heap; the owning [`UdpNode`] sleeps until the
/// earliest deadline and fires what is due.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    start: Instant,
    queue: Rc<RefCell<TimerQueue>>,
    notify: Rc<Notify>,
}

impl Default for TokioScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TokioScheduler {
    /// Create a scheduler whose clock starts now.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            queue: Rc::new(RefCell::new(TimerQueue::default())),
            notify: Rc::new(Notify::new()),
        }
    }

    /// Earliest armed deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.queue.borrow().heap.peek().map(|Reverse((at, _, _))| *at)
    }

    /// Pop one timer due at or before `now`.
    pub fn pop_due(&self, now: Instant) -> Option<TimerToken> {
        let mut queue = self.queue.borrow_mut();
        match queue.heap.peek() {
            Some(Reverse((at, _, _))) if *at <= now => {
                queue.heap.pop().map(|Reverse((_, _, token))| token)
            }
            _ => None,
        }
    }

    /// Armed timers.
    pub fn pending(&self) -> usize {
        self.queue.borrow().heap.len()
    }

    async fn changed(&self) {
        self.notify.notified().await;
    }
}

impl Scheduler for TokioScheduler {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    fn schedule_after(&self, delay: Duration, token: TimerToken) -> Result<(), SchedulerError> {
        {
            let mut queue = self.queue.borrow_mut();
            let sequence = queue.next_sequence;
            queue.next_sequence += 1;
            queue
                .heap
                .push(Reverse((Instant::now() + delay, sequence, token)));
        }
        self.notify.notify_one();
        Ok(())
    }
}

type Waiters = Rc<RefCell<HashMap<QueryId, oneshot::Sender<QueryCompletion>>>>;

/// A federation node listening on a real UDP socket.
///
/// Everything is single-threaded: run [`UdpNode::run`] and any
/// [`UdpNode::execute`] calls on the same `LocalSet`. Clones share the node.
pub struct UdpNode<E> {
    node: Rc<RefCell<FaasNode<E, UdpTransport, TokioScheduler>>>,
    socket: Rc<UdpSocket>,
    scheduler: TokioScheduler,
    waiters: Waiters,
}

impl<E> Clone for UdpNode<E> {
    fn clone(&self) -> Self {
        Self {
            node: self.node.clone(),
            socket: self.socket.clone(),
            scheduler: self.scheduler.clone(),
            waiters: self.waiters.clone(),
        }
    }
}

impl<E: ExecutionEngine + 'static> UdpNode<E> {
    /// Bind a socket on `ip` and [`NodeConfig::port`], and create a node on it.
    ///
    /// Port `0` lets the OS pick; [`UdpNode::local_endpoint`] reports the result.
    ///
    /// # Errors
    ///
    /// Fails if the socket cannot be bound.
    pub async fn bind(ip: IpAddr, engine: E, config: NodeConfig) -> io::Result<Self> {
        let socket = Rc::new(UdpSocket::bind(SocketAddr::new(ip, config.port)).await?);
        let transport = UdpTransport::new(socket.clone())?;
        let scheduler = TokioScheduler::new();
        let mut node = FaasNode::new(engine, transport, scheduler.clone(), config);

        let waiters: Waiters = Rc::new(RefCell::new(HashMap::new()));
        let hook_waiters = waiters.clone();
        node.set_on_complete(move |completion| {
            if let Some(tx) = hook_waiters.borrow_mut().remove(&completion.id) {
                let _ = tx.send(completion.clone());
            }
        });

        info!(endpoint = %node.endpoint(), "udp node bound");
        Ok(Self {
            node: Rc::new(RefCell::new(node)),
            socket,
            scheduler,
            waiters,
        })
    }

    /// Address the socket is bound to.
    pub fn local_endpoint(&self) -> PeerEndpoint {
        self.node.borrow().endpoint()
    }

    /// Add a peer to the polling order.
    pub fn register_node(&self, endpoint: PeerEndpoint) {
        self.node.borrow_mut().register_node(endpoint);
    }

    /// Load a module into this node's cache.
    ///
    /// # Errors
    ///
    /// See [`FaasNode::register_module`].
    pub fn register_module(&self, module: &str, bytes: &[u8]) -> FederationResult<bool> {
        self.node.borrow_mut().register_module(module, bytes)
    }

    /// Shared access to the node, for inspection.
    pub fn with_node<R>(
        &self,
        f: impl FnOnce(&FaasNode<E, UdpTransport, TokioScheduler>) -> R,
    ) -> R {
        f(&self.node.borrow())
    }

    /// Run `module::function(arg1, arg2)` and wait for the result.
    ///
    /// Only resolves while [`UdpNode::run`] is being polled on the same
    /// `LocalSet`.
    ///
    /// # Errors
    ///
    /// Every failure of [`FaasNode::execute_module`], plus
    /// [`FederationError::ModuleNotFoundAnywhere`] when no peer resolves it.
    pub async fn execute(
        &self,
        module: &str,
        function: &str,
        arg1: i32,
        arg2: i32,
    ) -> FederationResult<i32> {
        let id = {
            let mut node = self.node.borrow_mut();
            match node.execute_module(module, function, arg1, arg2)? {
                ExecuteOutcome::Completed(result) => return Ok(result),
                ExecuteOutcome::Pending(id) => {
                    if let Some(completion) = node.take_completion(id) {
                        return completion.result;
                    }
                    id
                }
            }
        };

        let (tx, rx) = oneshot::channel();
        self.waiters.borrow_mut().insert(id, tx);
        let completion = rx
            .await
            .map_err(|_| FederationError::Transport(TransportError::Shutdown))?;
        self.node.borrow_mut().take_completion(id);
        completion.result
    }

    /// Serve datagrams and timers until the socket fails.
    ///
    /// # Errors
    ///
    /// Returns the first receive error other than ICMP unreachable reports,
    /// which UDP sockets surface for earlier sends and are ignored.
    #[instrument(skip(self), fields(endpoint = %self.local_endpoint()))]
    pub async fn run(&self) -> io::Result<()> {
        let mut buf = vec![0u8; MAX_FRAME_SIZE];
        loop {
            let deadline = self.scheduler.next_deadline();
            let sleep = async {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((len, from)) => {
                        self.node
                            .borrow_mut()
                            .on_datagram(PeerEndpoint::from(from), &buf[..len]);
                    }
                    Err(err)
                        if matches!(
                            err.kind(),
                            io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset
                        ) =>
                    {
                        debug!(error = %err, "ignoring unreachable report");
                    }
                    Err(err) => return Err(err),
                },
                _ = sleep => {
                    let now = Instant::now();
                    while let Some(token) = self.scheduler.pop_due(now) {
                        self.node.borrow_mut().on_timer(token);
                    }
                }
                _ = self.scheduler.changed() => {}
            }
        }
    }
}
