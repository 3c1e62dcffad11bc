//! Cluster Integration Tests
//!
//! A coordinator and four storage nodes on the loopback interface, each
//! node with its own temporary directory.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use tempfile::TempDir;
use tokio::net::TcpListener;

use shardstore::adapters::InMemoryFileRepository;
use shardstore::config::{ClusterConfig, CoordinatorAddresses, NodeAddress, TimeoutConfig};
use shardstore::coordinator::Coordinator;
use shardstore::domain::{CodingParams, FileRepository, StorageMode};
use shardstore::fragment::{ChunkStore, FragmentId};
use shardstore::node::{NodeHandle, NodeIdentity, StorageNode};
use shardstore::protocol::MAX_DATA_FRAMES;
use shardstore::transport::CoordinatorChannels;
use shardstore::Error;

// =============================================================================
// Harness
// =============================================================================

struct Cluster {
    coordinator: Coordinator,
    config: Arc<ClusterConfig>,
    nodes: Vec<Option<NodeHandle>>,
    _dir: TempDir,
}

async fn loopback() -> TcpListener {
    TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind listener")
}

fn addr(listener: &TcpListener) -> String {
    listener
        .local_addr()
        .expect("Listener has no address")
        .to_string()
}

fn test_timeouts() -> TimeoutConfig {
    TimeoutConfig {
        connect_ms: 2_000,
        ack_ms: 1_000,
        read_ms: 300,
        probe_ms: 300,
        delegated_ms: 3_000,
        reconnect_ms: 50,
    }
}

type Bound = (Coordinator, Arc<ClusterConfig>, Vec<TcpListener>, TempDir);

/// Bind the coordinator without starting any node.
async fn coordinator_only(node_count: usize) -> Bound {
    let bound = coordinator_with(node_count, |_| {}).await;
    bound.1.validate().expect("Invalid test config");
    bound
}

/// Like `coordinator_only`, with the config adjusted and left unvalidated.
async fn coordinator_with(node_count: usize, adjust: impl FnOnce(&mut ClusterConfig)) -> Bound {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let (tasks, results, broadcast) = (loopback().await, loopback().await, loopback().await);

    let mut peer_listeners = Vec::new();
    for _ in 0..node_count {
        peer_listeners.push(loopback().await);
    }

    let mut config = ClusterConfig {
        coordinator: CoordinatorAddresses {
            task_address: addr(&tasks),
            result_address: addr(&results),
            broadcast_address: addr(&broadcast),
        },
        nodes: peer_listeners
            .iter()
            .enumerate()
            .map(|(index, l)| NodeAddress {
                index,
                peer_address: addr(l),
            })
            .collect(),
        max_chunks_per_file: 10,
        data_dir: dir.path().to_path_buf(),
        timeouts: test_timeouts(),
    };
    adjust(&mut config);
    let config = Arc::new(config);

    let channels = CoordinatorChannels::from_listeners(tasks, results, broadcast)
        .expect("Failed to start coordinator channels");
    let coordinator = Coordinator::with_channels(config.clone(), channels);
    (coordinator, config, peer_listeners, dir)
}

impl Cluster {
    async fn start(node_count: usize) -> Self {
        let (coordinator, config, peer_listeners, dir) = coordinator_only(node_count).await;

        let mut nodes = Vec::new();
        for (index, listener) in peer_listeners.into_iter().enumerate() {
            let node = StorageNode::open_with_listener(config.clone(), index, listener)
                .await
                .expect("Failed to open node");
            nodes.push(Some(node.spawn()));
        }

        coordinator
            .wait_for_cluster()
            .await
            .expect("Nodes did not connect");

        Self {
            coordinator,
            config,
            nodes,
            _dir: dir,
        }
    }

    async fn stop_node(&mut self, index: usize) {
        let handle = self.nodes[index].take().expect("Node already stopped");
        handle.shutdown().await.expect("Node did not stop cleanly");

        for _ in 0..100 {
            if !self.coordinator.connected_nodes().contains(&index) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("coordinator still sees node {}", index);
    }

    async fn restart_node(&mut self, index: usize) -> NodeIdentity {
        let peer_address = self
            .config
            .peer_address(index)
            .expect("Unknown node")
            .to_string();

        let mut listener = None;
        for _ in 0..100 {
            match TcpListener::bind(&peer_address).await {
                Ok(l) => {
                    listener = Some(l);
                    break;
                }
                Err(_) => tokio::time::sleep(Duration::from_millis(20)).await,
            }
        }
        let listener = listener.expect("Peer address never freed");

        let node = StorageNode::open_with_listener(self.config.clone(), index, listener)
            .await
            .expect("Failed to reopen node");
        let identity = node.identity().clone();
        self.nodes[index] = Some(node.spawn());

        self.coordinator
            .wait_for_nodes(&[index])
            .await
            .expect("Restarted node did not connect");
        identity
    }

    async fn chunk_store(&self, index: usize) -> ChunkStore {
        ChunkStore::open(self.config.node_dir(index), self.config.max_chunks_per_file)
            .await
            .expect("Failed to open chunk store")
    }
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

// =============================================================================
// Store / Retrieve
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_store_then_retrieve() {
    let mut cluster = Cluster::start(4).await;
    let data = payload(1_000);
    let params = CodingParams::rs(1);

    let ids = cluster
        .coordinator
        .store(&data, &params)
        .await
        .expect("Store failed");
    assert_eq!(ids.len(), 4);

    // fragment i lives on node i
    for (index, id) in ids.iter().enumerate() {
        let store = cluster.chunk_store(index).await;
        assert!(!store.read_fragment(id).await.expect("Read failed").is_empty());
    }

    let recovered = cluster
        .coordinator
        .retrieve(&ids, &params, data.len())
        .await
        .expect("Retrieve failed");
    assert_eq!(recovered, data);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_retrieve_with_one_node_down() {
    let mut cluster = Cluster::start(4).await;
    let data = payload(1_000);
    let params = CodingParams::rs(1);

    let ids = cluster
        .coordinator
        .store(&data, &params)
        .await
        .expect("Store failed");
    cluster.stop_node(3).await;

    let recovered = cluster
        .coordinator
        .retrieve(&ids, &params, data.len())
        .await
        .expect("Retrieve failed");
    assert_eq!(recovered, data);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_retrieve_with_two_nodes_down_fails() {
    let mut cluster = Cluster::start(4).await;
    let data = payload(1_000);
    let params = CodingParams::rs(1);

    let ids = cluster
        .coordinator
        .store(&data, &params)
        .await
        .expect("Store failed");
    cluster.stop_node(2).await;
    cluster.stop_node(3).await;

    let result = cluster.coordinator.retrieve(&ids, &params, data.len()).await;
    assert_matches!(
        result,
        Err(Error::InsufficientShards {
            available: 2,
            required: 3
        })
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_store_with_node_down_is_unresponsive() {
    let mut cluster = Cluster::start(4).await;
    cluster.stop_node(3).await;

    let result = cluster
        .coordinator
        .store(&payload(100), &CodingParams::rs(1))
        .await;
    assert_matches!(result, Err(Error::NodeUnresponsive { node: 3, .. }));
}

#[tokio::test]
async fn test_invalid_parameters_fail_before_network() {
    // no node is running, so any network wait would end in NodeUnresponsive
    let (mut coordinator, _config, _listeners, _dir) = coordinator_only(4).await;

    assert_matches!(
        coordinator.store(&payload(10), &CodingParams::rs(4)).await,
        Err(Error::InvalidParameter(_))
    );
    assert_matches!(
        coordinator.store(&[], &CodingParams::rs(1)).await,
        Err(Error::InvalidParameter(_))
    );
    assert_matches!(
        coordinator.store(&payload(10), &CodingParams::rlnc(1, 11)).await,
        Err(Error::InvalidParameter(_))
    );
    assert_matches!(
        coordinator
            .store(
                &payload(10),
                &CodingParams::rs(9).with_mode(StorageMode::ErasureCodingRsRandomWorker)
            )
            .await,
        Err(Error::InvalidParameter(_))
    );
}

#[tokio::test]
async fn test_oversized_chunk_count_rejected_before_network() {
    // the configured limit is above what one message can carry
    let (mut coordinator, _config, _listeners, _dir) =
        coordinator_with(4, |config| config.max_chunks_per_file = 100).await;

    assert_matches!(
        coordinator
            .store(&payload(10_000), &CodingParams::rlnc(1, MAX_DATA_FRAMES + 8))
            .await,
        Err(Error::InvalidParameter(_))
    );
}

// =============================================================================
// Other Modes
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rlnc_with_subfragments() {
    let mut cluster = Cluster::start(4).await;
    let data = payload(5_000);
    let params = CodingParams::rlnc(1, 3);

    let ids = cluster
        .coordinator
        .store(&data, &params)
        .await
        .expect("Store failed");

    let chunks = cluster
        .chunk_store(0)
        .await
        .read_fragment(&ids[0])
        .await
        .expect("Read failed");
    assert_eq!(chunks.len(), 3);

    cluster.stop_node(1).await;
    let recovered = cluster
        .coordinator
        .retrieve(&ids, &params, data.len())
        .await
        .expect("Retrieve failed");
    assert_eq!(recovered, data);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_raid1_survives_one_mirror_loss() {
    let mut cluster = Cluster::start(4).await;
    let data = payload(777);
    let params = CodingParams::raid1();

    let ids = cluster
        .coordinator
        .store(&data, &params)
        .await
        .expect("Store failed");
    cluster.stop_node(0).await;

    let recovered = cluster
        .coordinator
        .retrieve(&ids, &params, data.len())
        .await
        .expect("Retrieve failed");
    assert_eq!(recovered, data);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_delegated_store_roundtrip() {
    let mut cluster = Cluster::start(4).await;
    let repository = InMemoryFileRepository::new();
    let data = payload(2_048);
    let params = CodingParams::rs(1).with_mode(StorageMode::ErasureCodingRsRandomWorker);

    let id = cluster
        .coordinator
        .put_file(&repository, "blob.bin", "application/octet-stream", &data, &params)
        .await
        .expect("Delegated store failed");

    let record = repository
        .get_record(&id)
        .await
        .expect("Lookup failed")
        .expect("Record missing");
    assert_eq!(record.storage_mode, StorageMode::ErasureCodingRsRandomWorker);
    let fragment_ids = record.fragment_ids();
    assert_eq!(fragment_ids.len(), 4);

    // the worker placed fragment i on node i as well
    for (index, fragment_id) in fragment_ids.iter().enumerate() {
        let store = cluster.chunk_store(index).await;
        assert!(!store.read_fragment(fragment_id).await.expect("Read failed").is_empty());
    }

    cluster.stop_node(2).await;
    let (_, recovered) = cluster
        .coordinator
        .get_file(&repository, &id)
        .await
        .expect("Retrieve failed");
    assert_eq!(recovered, data);
}

// =============================================================================
// Repair
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_repair_restores_deleted_fragment() {
    let mut cluster = Cluster::start(4).await;
    let repository = InMemoryFileRepository::new();
    let data = payload(1_000);

    let id = cluster
        .coordinator
        .put_file(&repository, "a.txt", "text/plain", &data, &CodingParams::rs(1))
        .await
        .expect("Store failed");
    let record = repository
        .get_record(&id)
        .await
        .expect("Lookup failed")
        .expect("Record missing");
    let lost: FragmentId = record.fragment_ids()[2].clone();

    let node2 = cluster.chunk_store(2).await;
    assert_eq!(node2.remove_fragment(&lost).await.expect("Delete failed"), 1);

    let report = cluster
        .coordinator
        .repair_all(&repository)
        .await
        .expect("Repair failed");
    assert_eq!(report.files_checked, 1);
    assert_eq!(report.missing, vec![lost.clone()]);
    assert_eq!(report.repaired, vec![lost.clone()]);
    assert!(report.unrepairable.is_empty());
    assert!(!node2.read_fragment(&lost).await.expect("Read failed").is_empty());

    let (_, recovered) = cluster
        .coordinator
        .get_file(&repository, &id)
        .await
        .expect("Retrieve failed");
    assert_eq!(recovered, data);

    let again = cluster
        .coordinator
        .repair_all(&repository)
        .await
        .expect("Repair failed");
    assert!(again.is_clean());
    assert!(again.repaired.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_repair_places_fragment_of_down_node_elsewhere() {
    let mut cluster = Cluster::start(4).await;
    let repository = InMemoryFileRepository::new();
    let data = payload(1_500);

    let id = cluster
        .coordinator
        .put_file(&repository, "b.txt", "text/plain", &data, &CodingParams::rs(1))
        .await
        .expect("Store failed");
    cluster.stop_node(3).await;

    let report = cluster
        .coordinator
        .repair_mode(&repository, StorageMode::ErasureCodingRs)
        .await
        .expect("Repair failed");
    assert_eq!(report.missing.len(), 1);
    assert_eq!(report.repaired, report.missing);

    // node 3 is still down; losing another node is survivable again
    cluster.stop_node(1).await;
    let (_, recovered) = cluster
        .coordinator
        .get_file(&repository, &id)
        .await
        .expect("Retrieve failed");
    assert_eq!(recovered, data);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_repair_without_enough_survivors_is_unrepairable() {
    let mut cluster = Cluster::start(4).await;
    let repository = InMemoryFileRepository::new();

    cluster
        .coordinator
        .put_file(&repository, "c.txt", "text/plain", &payload(300), &CodingParams::rs(1))
        .await
        .expect("Store failed");
    cluster.stop_node(0).await;
    cluster.stop_node(1).await;

    let report = cluster
        .coordinator
        .repair_all(&repository)
        .await
        .expect("Repair failed");
    assert_eq!(report.missing.len(), 2);
    assert!(report.repaired.is_empty());
    assert_eq!(report.unrepairable, report.missing);
}

// =============================================================================
// Node Lifecycle
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_node_restart_keeps_identity_and_fragments() {
    let mut cluster = Cluster::start(4).await;
    let data = payload(900);
    let params = CodingParams::rs(1);

    let ids = cluster
        .coordinator
        .store(&data, &params)
        .await
        .expect("Store failed");
    let before = NodeIdentity::load_or_create(&cluster.config.node_dir(1))
        .await
        .expect("Identity missing");

    cluster.stop_node(1).await;
    let after = cluster.restart_node(1).await;
    assert_eq!(before, after);

    // node 1's fragment is now required
    cluster.stop_node(3).await;
    let recovered = cluster
        .coordinator
        .retrieve(&ids, &params, data.len())
        .await
        .expect("Retrieve failed");
    assert_eq!(recovered, data);
}
