//! Pinning as a request interceptor.
//!
//! For client stacks that cannot hook certificate verification, pinning runs
//! as a stage of an ordered request [`Pipeline`] once the connection is
//! established but before the request is written. An enforced violation
//! short-circuits the pipeline, so no application data reaches the peer.

use std::collections::HashMap;
use std::fmt;
use std::ptr;
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};

use rustls::pki_types::CertificateDer;
use thiserror::Error;

use crate::enforcer::{Action, PinEnforcer, PinningAdapter};
use crate::error::PinningFailure;

/// An established connection as seen by interceptors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Identifier unique among the client's live connections.
    pub id: u64,
    pub hostname: String,
    pub port: u16,
    /// Peer chain, leaf first.
    pub peer_certificates: Vec<CertificateDer<'static>>,
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Pinning(#[from] PinningFailure),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl ClientError {
    pub fn pinning_failure(&self) -> Option<&PinningFailure> {
        match self {
            ClientError::Pinning(failure) => Some(failure),
            _ => None,
        }
    }
}

/// A request on its way through the pipeline.
#[derive(Debug, Clone)]
pub struct Exchange<Req> {
    pub connection: Arc<ConnectionInfo>,
    pub request: Req,
}

/// One stage of a [`Pipeline`].
///
/// A stage either calls [`Next::proceed`] to pass the exchange on, or
/// returns without doing so to short-circuit everything after it.
pub trait Interceptor<Req, Resp>: Send + Sync {
    fn intercept(
        &self,
        exchange: Exchange<Req>,
        next: Next<'_, Req, Resp>,
    ) -> Result<Resp, ClientError>;
}

impl<Req, Resp, T> Interceptor<Req, Resp> for Arc<T>
where
    T: Interceptor<Req, Resp> + ?Sized,
{
    fn intercept(
        &self,
        exchange: Exchange<Req>,
        next: Next<'_, Req, Resp>,
    ) -> Result<Resp, ClientError> {
        (**self).intercept(exchange, next)
    }
}

type Transport<Req, Resp> = dyn Fn(Exchange<Req>) -> Result<Resp, ClientError> + Send + Sync;

/// The remainder of the pipeline after the current stage.
pub struct Next<'a, Req, Resp> {
    rest: &'a [Box<dyn Interceptor<Req, Resp>>],
    transport: &'a Transport<Req, Resp>,
}

impl<'a, Req, Resp> Next<'a, Req, Resp> {
    pub fn proceed(self, exchange: Exchange<Req>) -> Result<Resp, ClientError> {
        match self.rest.split_first() {
            Some((stage, rest)) => stage.intercept(
                exchange,
                Next {
                    rest,
                    transport: self.transport,
                },
            ),
            None => (self.transport)(exchange),
        }
    }
}

/// Ordered interceptors in front of a terminal transport.
pub struct Pipeline<Req, Resp> {
    interceptors: Vec<Box<dyn Interceptor<Req, Resp>>>,
    transport: Box<Transport<Req, Resp>>,
}

impl<Req, Resp> fmt::Debug for Pipeline<Req, Resp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("interceptors", &self.interceptors.len())
            .finish_non_exhaustive()
    }
}

impl<Req, Resp> Pipeline<Req, Resp> {
    pub fn new(
        transport: impl Fn(Exchange<Req>) -> Result<Resp, ClientError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            interceptors: Vec::new(),
            transport: Box::new(transport),
        }
    }

    /// Append a stage; stages run in the order they were added.
    pub fn with_interceptor(
        mut self,
        interceptor: impl Interceptor<Req, Resp> + 'static,
    ) -> Self {
        self.interceptors.push(Box::new(interceptor));
        self
    }

    pub fn execute(
        &self,
        connection: Arc<ConnectionInfo>,
        request: Req,
    ) -> Result<Resp, ClientError> {
        let next = Next {
            rest: &self.interceptors,
            transport: self.transport.as_ref(),
        };
        next.proceed(Exchange {
            connection,
            request,
        })
    }
}

struct Decision {
    connection: Weak<ConnectionInfo>,
    action: OnceLock<Action>,
}

impl Decision {
    fn is_for(&self, connection: &Arc<ConnectionInfo>) -> bool {
        ptr::eq(self.connection.as_ptr(), Arc::as_ptr(connection))
    }

    fn is_live(&self) -> bool {
        self.connection.strong_count() > 0
    }
}

/// Validates each connection's chain once and blocks requests on
/// connections that fail enforced pinning.
///
/// Decisions are tied to the `Arc<ConnectionInfo>` itself: every request on
/// a connection must share that `Arc`. A different `ConnectionInfo`, even
/// one reusing an id, is evaluated again, and decisions for dropped
/// connections are pruned automatically. [`release`](Self::release) drops a
/// decision eagerly.
pub struct PinningInterceptor {
    enforcer: Arc<PinEnforcer>,
    decisions: Mutex<HashMap<u64, Arc<Decision>>>,
}

impl fmt::Debug for PinningInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinningInterceptor")
            .field("enforcer", &self.enforcer)
            .field("connections", &self.tracked_connections())
            .finish()
    }
}

impl PinningInterceptor {
    pub fn new(enforcer: Arc<PinEnforcer>) -> Self {
        Self {
            enforcer,
            decisions: Mutex::new(HashMap::new()),
        }
    }

    /// Forget the decision for a closed connection.
    pub fn release(&self, connection_id: u64) -> bool {
        self.decisions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&connection_id)
            .is_some()
    }

    /// Number of live connections with a cached decision.
    pub fn tracked_connections(&self) -> usize {
        let mut decisions = self.decisions.lock().unwrap_or_else(PoisonError::into_inner);
        decisions.retain(|_, decision| decision.is_live());
        decisions.len()
    }

    fn decide(&self, connection: &Arc<ConnectionInfo>) -> Action {
        let decision = {
            let mut decisions = self.decisions.lock().unwrap_or_else(PoisonError::into_inner);
            match decisions.get(&connection.id) {
                Some(decision) if decision.is_for(connection) => Arc::clone(decision),
                _ => {
                    decisions.retain(|_, decision| decision.is_live());
                    let decision = Arc::new(Decision {
                        connection: Arc::downgrade(connection),
                        action: OnceLock::new(),
                    });
                    decisions.insert(connection.id, Arc::clone(&decision));
                    decision
                }
            }
        };

        // Validation runs outside the map lock; concurrent requests on the
        // same connection wait for the first one.
        decision
            .action
            .get_or_init(|| {
                self.enforcer.evaluate_chain(
                    &connection.hostname,
                    Some(connection.port),
                    connection.peer_certificates.as_slice(),
                )
            })
            .clone()
    }
}

impl<Req, Resp> Interceptor<Req, Resp> for PinningInterceptor {
    fn intercept(
        &self,
        exchange: Exchange<Req>,
        next: Next<'_, Req, Resp>,
    ) -> Result<Resp, ClientError> {
        match self.decide(&exchange.connection) {
            Action::Proceed => next.proceed(exchange),
            Action::Abort(failure) => Err(ClientError::Pinning(failure)),
        }
    }
}

impl PinningAdapter for PinningInterceptor {
    fn evaluate(&self, hostname: &str, chain: &[CertificateDer<'_>]) -> Action {
        self.enforcer.evaluate(hostname, chain)
    }
}
