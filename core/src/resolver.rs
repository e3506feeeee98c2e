//! Hostname resolution with an optional deadline.
//!
//! # Design
//! `Resolver` is the external lookup service; it answers exactly once with an
//! address or nothing. `ResolverGateway` puts a timer next to the lookup and
//! lets whichever finishes first report the outcome. The loser is dropped
//! without a second report.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use tokio::runtime::Handle;

use crate::once::OnceSlot;
use crate::timer::{TimerKey, TimerService};

/// Receives the address found for a host, or `None` when there is none.
pub type LookupCallback = Box<dyn FnOnce(Option<IpAddr>) + Send + 'static>;

/// External DNS lookup service. Must be reentrant.
pub trait Resolver: Send + Sync {
    fn lookup(&self, host: &str, on_result: LookupCallback);
}

/// Result of the resolution phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionOutcome {
    Resolved(IpAddr),
    NotFound,
    TimedOut,
}

impl From<Option<IpAddr>> for ResolutionOutcome {
    fn from(ip: Option<IpAddr>) -> Self {
        ip.map_or(ResolutionOutcome::NotFound, ResolutionOutcome::Resolved)
    }
}

/// DNS lookup raced against a deadline.
#[derive(Clone)]
pub struct ResolverGateway {
    resolver: Arc<dyn Resolver>,
    timer: Arc<dyn TimerService>,
}

impl ResolverGateway {
    pub fn new(resolver: Arc<dyn Resolver>, timer: Arc<dyn TimerService>) -> Self {
        Self { resolver, timer }
    }

    /// Resolves `host` and reports exactly one outcome.
    ///
    /// Without a timeout only the resolver's own answer is reported. With one,
    /// a timer under `key` competes with the lookup; a lookup answer arriving
    /// after the deadline is discarded.
    pub fn resolve<F>(&self, host: &str, timeout: Option<Duration>, key: TimerKey, on_outcome: F)
    where
        F: FnOnce(ResolutionOutcome) + Send + 'static,
    {
        let Some(timeout) = timeout else {
            self.resolver
                .lookup(host, Box::new(move |ip| on_outcome(ip.into())));
            return;
        };

        let slot = OnceSlot::new(on_outcome);
        let deadline = slot.clone();
        self.timer.after(
            timeout,
            key,
            Box::new(move || {
                if let Some(report) = deadline.take() {
                    report(ResolutionOutcome::TimedOut);
                }
            }),
        );

        let timer = Arc::clone(&self.timer);
        let name = host.to_string();
        self.resolver.lookup(
            host,
            Box::new(move |ip| {
                timer.cancel(key);
                match slot.take() {
                    Some(report) => report(ip.into()),
                    None => debug!("discarding DNS answer for {name} ({ip:?}) after its deadline"),
                }
            }),
        );
    }
}

/// `Resolver` backed by the system resolver through tokio.
#[derive(Debug, Clone)]
pub struct TokioResolver {
    handle: Handle,
}

impl TokioResolver {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }
}

impl Resolver for TokioResolver {
    fn lookup(&self, host: &str, on_result: LookupCallback) {
        if let Ok(ip) = host.parse::<IpAddr>() {
            on_result(Some(ip));
            return;
        }
        let host = host.to_string();
        self.handle.spawn(async move {
            let ip = match tokio::net::lookup_host((host.as_str(), 0)).await {
                Ok(mut addrs) => addrs.next().map(|addr| addr.ip()),
                Err(e) => {
                    debug!("lookup of {host} failed: {e}");
                    None
                }
            };
            on_result(ip);
        });
    }
}
