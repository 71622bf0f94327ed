//! Shared fixtures for the integration suites.

#![allow(dead_code)]

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::rc::Rc;

use geograin::directory::{ActivationAddress, ActivationId, GrainId};
use geograin::identity::{IdentityInterner, NodeIdentity};
use geograin::replication::{GrainStorage, InMemoryGrainStorage, LogViewAdaptor, UpdateOperation};
use geograin::ReplicationConfig;
use tokio::task::LocalSet;
use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber once, filtered by `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Run `future` inside a fresh `LocalSet`.
pub async fn run_local<F: Future>(future: F) -> F::Output {
    LocalSet::new().run_until(future).await
}

/// Counter increment.
#[derive(Debug, Clone, PartialEq)]
pub struct Increment(pub u64);

impl UpdateOperation<u64> for Increment {
    fn apply(&self, state: &mut u64) {
        *state += self.0;
    }
}

/// Appends a value to a list; makes application order observable.
#[derive(Debug, Clone, PartialEq)]
pub struct Push(pub u32);

impl UpdateOperation<Vec<u32>> for Push {
    fn apply(&self, state: &mut Vec<u32>) {
        state.push(self.0);
    }
}

pub fn counter_grain() -> GrainId {
    GrainId::new("Counter", "alice")
}

pub fn counter(
    storage: &Rc<InMemoryGrainStorage>,
    config: ReplicationConfig,
) -> LogViewAdaptor<u64, Increment> {
    LogViewAdaptor::new(
        counter_grain(),
        Rc::clone(storage) as Rc<dyn GrainStorage>,
        config,
    )
}

pub fn endpoint(last_octet: u8, port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, last_octet)), port)
}

pub fn silo(interner: &IdentityInterner, last_octet: u8, cluster: &str) -> NodeIdentity {
    NodeIdentity::new(interner, endpoint(last_octet, 11111), 42, Some(cluster))
}

pub fn activation(grain: &GrainId, silo: NodeIdentity, id: u64) -> ActivationAddress {
    ActivationAddress::new(grain.clone(), silo, ActivationId::new(id))
}
