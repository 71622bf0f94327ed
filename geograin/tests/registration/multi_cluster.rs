//! Registration between clusters wired together in-process.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};
use std::time::Duration;

use geograin::directory::{
    ActivationAddress, ActivationResponse, ActivationStatus, DirectoryPartition,
    GlobalSingleInstanceRegistrar, GrainId, HashedPrecedence, RegistrarManager,
    RegistrationStrategy, RemoteClusterDirectory,
};
use geograin::identity::IdentityInterner;
use geograin::{RegistrarConfig, RegistrarError};

use super::common::{activation, init_tracing, run_local, silo};

/// Routes ownership requests between registrars of one test.
#[derive(Debug, Default)]
struct Network {
    clusters: RefCell<BTreeMap<String, Weak<GlobalSingleInstanceRegistrar>>>,
    down: RefCell<Vec<String>>,
    latency: Cell<Duration>,
}

impl Network {
    fn join(&self, registrar: &Rc<GlobalSingleInstanceRegistrar>) {
        self.clusters
            .borrow_mut()
            .insert(registrar.cluster().to_string(), Rc::downgrade(registrar));
    }

    fn set_down(&self, cluster: &str, down: bool) {
        let mut clusters = self.down.borrow_mut();
        clusters.retain(|c| c != cluster);
        if down {
            clusters.push(cluster.to_string());
        }
    }
}

/// One cluster's view of the network.
#[derive(Debug)]
struct Link {
    network: Rc<Network>,
    peers: Vec<String>,
}

#[async_trait::async_trait(?Send)]
impl RemoteClusterDirectory for Link {
    fn remote_clusters(&self) -> Vec<String> {
        self.peers.clone()
    }

    async fn request_activation(
        &self,
        cluster: &str,
        address: &ActivationAddress,
        requesting_cluster: &str,
    ) -> Result<ActivationResponse, RegistrarError> {
        let latency = self.network.latency.get();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let unreachable = || RegistrarError::Remote {
            cluster: cluster.to_string(),
            reason: "unreachable".to_string(),
        };
        if self.network.down.borrow().iter().any(|c| c == cluster) {
            return Err(unreachable());
        }
        let peer = self
            .network
            .clusters
            .borrow()
            .get(cluster)
            .and_then(Weak::upgrade)
            .ok_or_else(unreachable)?;
        Ok(peer.process_activation_request(address, requesting_cluster))
    }
}

fn build(network: &Rc<Network>, names: &[&str]) -> Vec<Rc<GlobalSingleInstanceRegistrar>> {
    let registrars: Vec<_> = names
        .iter()
        .map(|name| {
            let link = Link {
                network: Rc::clone(network),
                peers: names
                    .iter()
                    .filter(|peer| *peer != name)
                    .map(|peer| peer.to_string())
                    .collect(),
            };
            Rc::new(GlobalSingleInstanceRegistrar::new(
                Rc::new(DirectoryPartition::new()),
                *name,
                Rc::new(link),
                Rc::new(HashedPrecedence),
                RegistrarConfig::builder()
                    .retry_delay(Duration::from_millis(100))
                    .build(),
            ))
        })
        .collect();
    for registrar in &registrars {
        network.join(registrar);
    }
    registrars
}

fn status(registrar: &GlobalSingleInstanceRegistrar, grain: &GrainId) -> Option<ActivationStatus> {
    registrar
        .partition()
        .lookup(grain)
        .and_then(|entry| entry.primary().map(|primary| primary.status))
}

fn grain() -> GrainId {
    GrainId::new("Leaderboard", "global")
}

#[tokio::test(start_paused = true)]
async fn test_second_cluster_uses_first_owner() {
    init_tracing();
    run_local(async {
        let interner = IdentityInterner::new();
        let network = Rc::new(Network::default());
        let registrars = build(&network, &["eu", "us"]);
        let (eu, us) = (&registrars[0], &registrars[1]);

        let eu_activation = activation(&grain(), silo(&interner, 1, "eu"), 1);
        let (winner, _) = eu.register(&eu_activation, true).await;
        assert_eq!(winner, eu_activation);
        assert_eq!(status(eu, &grain()), Some(ActivationStatus::Owned));

        let us_activation = activation(&grain(), silo(&interner, 2, "us"), 2);
        let (winner, _) = us.register(&us_activation, true).await;
        assert_eq!(winner, eu_activation, "us must use the eu activation");
        assert_eq!(status(us, &grain()), Some(ActivationStatus::Cached));
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_requests_elect_exactly_one_owner() {
    init_tracing();
    run_local(async {
        let interner = IdentityInterner::new();
        let network = Rc::new(Network::default());
        network.latency.set(Duration::from_millis(5));
        let registrars = build(&network, &["eu", "us", "asia"]);

        let addresses: Vec<ActivationAddress> = registrars
            .iter()
            .enumerate()
            .map(|(i, registrar)| {
                activation(&grain(), silo(&interner, i as u8 + 1, registrar.cluster()), i as u64)
            })
            .collect();

        let winners = futures::future::join_all(
            registrars
                .iter()
                .zip(&addresses)
                .map(|(registrar, address)| registrar.register(address, true)),
        )
        .await;

        let owners: Vec<_> = registrars
            .iter()
            .filter(|registrar| status(registrar, &grain()) == Some(ActivationStatus::Owned))
            .collect();
        assert_eq!(owners.len(), 1, "exactly one cluster owns the grain");

        let first = &winners[0].0;
        assert!(
            winners.iter().all(|(winner, _)| winner == first),
            "every cluster agrees on the activation: {winners:?}"
        );
        assert_eq!(first.cluster(), Some(owners[0].cluster()));
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_two_owning_clusters_are_reported_as_violation() {
    init_tracing();
    run_local(async {
        let interner = IdentityInterner::new();
        let network = Rc::new(Network::default());
        network.latency.set(Duration::from_millis(5));
        let registrars = build(&network, &["eu", "us", "asia"]);
        let (eu, us, asia) = (&registrars[0], &registrars[1], &registrars[2]);

        // A split brain left over from an earlier partition.
        let us_activation = activation(&grain(), silo(&interner, 2, "us"), 2);
        let asia_activation = activation(&grain(), silo(&interner, 3, "asia"), 3);
        us.partition()
            .add_single_activation(&us_activation, ActivationStatus::Owned);
        asia.partition()
            .add_single_activation(&asia_activation, ActivationStatus::Owned);

        let eu_activation = activation(&grain(), silo(&interner, 1, "eu"), 1);
        let (winner, _) = eu.register(&eu_activation, true).await;
        assert!(
            winner == us_activation || winner == asia_activation,
            "eu must adopt one of the owners, got {winner}"
        );
        assert_eq!(status(eu, &grain()), Some(ActivationStatus::Cached));

        let violations = eu.violations();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].claims, 2);
        assert_eq!(violations[0].grain, grain());
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_partitioned_cluster_settles_doubtful_then_resolves() {
    init_tracing();
    run_local(async {
        let interner = IdentityInterner::new();
        let network = Rc::new(Network::default());
        let registrars = build(&network, &["eu", "us"]);
        let eu = &registrars[0];

        network.set_down("us", true);
        let eu_activation = activation(&grain(), silo(&interner, 1, "eu"), 1);
        let (winner, _) = eu.register(&eu_activation, true).await;
        assert_eq!(winner, eu_activation);
        assert_eq!(status(eu, &grain()), Some(ActivationStatus::Doubtful));

        network.set_down("us", false);
        let maintainer = eu.maintainer();
        maintainer
            .notify_and_wait()
            .await
            .expect("maintenance cycle");
        assert_eq!(maintainer.work().settled(), 1);
        assert_eq!(status(eu, &grain()), Some(ActivationStatus::Owned));
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_manager_dispatches_by_declared_strategy() {
    run_local(async {
        let interner = IdentityInterner::new();
        let network = Rc::new(Network::default());
        let registrars = build(&network, &["eu", "us"]);
        let eu = Rc::clone(&registrars[0]);

        let local_partition = Rc::new(DirectoryPartition::new());
        let manager = RegistrarManager::new(Rc::clone(&local_partition)).with_registrar(Rc::clone(&eu));
        manager.update_membership([silo(&interner, 1, "eu"), silo(&interner, 3, "eu")]);

        let plain = activation(&GrainId::new("Session", "s-1"), silo(&interner, 1, "eu"), 10);
        let registrar = manager.registrar_for(None).expect("cluster-local installed");
        assert_eq!(registrar.strategy(), RegistrationStrategy::ClusterLocal);
        registrar.register(&plain, true).await;
        assert!(local_partition.lookup(&plain.grain).is_some());

        let global = activation(&grain(), silo(&interner, 1, "eu"), 11);
        let registrar = manager
            .registrar_for(Some(RegistrationStrategy::GlobalSingleInstance))
            .expect("global installed");
        let (winner, _) = registrar.register(&global, true).await;
        assert_eq!(winner, global);
        assert_eq!(status(&eu, &grain()), Some(ActivationStatus::Owned));

        let owner = manager.partition_owner(&grain()).expect("ring populated");
        assert_eq!(owner.cluster(), Some("eu"));

        assert!(registrar.unregister(&global, true));
        assert!(eu.partition().lookup(&grain()).is_none());
    })
    .await;
}
