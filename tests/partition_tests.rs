//! Partition subsystem driven directly: filtering, ownership, and the
//! routing tables, with multi-rank receivers running as threads.

use mesh_couple::com::{accept_connection, request_connection, Channel, TransportKind};
use mesh_couple::intra::{IntraComm, SingleRank, ThreadGroup};
use mesh_couple::mesh::{BoundingBox, Mesh, MeshId, MeshStore, VertexDistribution};
use mesh_couple::partition::{
    provided_communicate, provided_compute, received_communicate, received_compute, CommMaps,
    GeometricFilter,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeSet;

fn random_cloud(mesh_id: i32, n: usize, seed: u64) -> Mesh {
    let mut mesh = Mesh::new("Cloud", 3, false, MeshId(mesh_id)).unwrap();
    let mut rng = StdRng::seed_from_u64(seed);
    for _ in 0..n {
        mesh.create_vertex([rng.gen::<f64>(), rng.gen::<f64>(), rng.gen::<f64>()]);
    }
    mesh
}

fn provider_store(mesh_id: i32, n: usize, seed: u64) -> MeshStore {
    let mut store = MeshStore::new();
    store.insert(random_cloud(mesh_id, n, seed));
    store
}

fn receiver_store(mesh_id: i32) -> MeshStore {
    let mut store = MeshStore::new();
    store.insert(Mesh::new("Cloud", 3, false, MeshId(mesh_id)).unwrap());
    store
}

fn half_unit_box() -> BoundingBox {
    let mut bb = BoundingBox::new();
    bb.expand_by([0.0, 0.0, 0.0]);
    bb.expand_by([0.5, 0.5, 0.5]);
    bb
}

/// Filter correctness: a single receiving rank with region `[0, 0.5]³`
/// gets exactly the vertices inside the region inflated by the safety
/// factor.
#[test]
fn filter_first_keeps_only_the_inflated_region() {
    const N: usize = 1000;
    const SAFETY: f64 = 0.1;
    let mesh_id = 40;
    let acceptor = "filter-prov.m40";

    let provider = std::thread::spawn(move || {
        let mut store = provider_store(mesh_id, N, 7);
        let mut conn = accept_connection(&TransportKind::Local, acceptor, "recv", &[0]).unwrap();
        let chan = conn.master().unwrap();
        provided_communicate(&mut store, MeshId(mesh_id), &SingleRank, Some(chan.as_mut()))
            .unwrap();
        let maps =
            provided_compute(&store, MeshId(mesh_id), &SingleRank, Some(chan.as_mut())).unwrap();
        maps
    });

    let receiver = std::thread::spawn(move || {
        let mut store = receiver_store(mesh_id);
        let mut chan = request_connection(&TransportKind::Local, acceptor, "recv", 0).unwrap();
        let handshake = received_communicate(Some(chan.as_mut())).unwrap();
        received_compute(
            &mut store,
            MeshId(mesh_id),
            handshake,
            half_unit_box(),
            SAFETY,
            GeometricFilter::FilterFirst,
            &SingleRank,
            Some(chan.as_mut()),
        )
        .unwrap();
        store
    });

    let provider_maps = provider.join().unwrap();
    let store = receiver.join().unwrap();

    // the inflated box: side 0.5, pad = 0.1 * 0.5
    let mut inflated = half_unit_box();
    inflated.inflate(SAFETY, 3);

    let reference = random_cloud(mesh_id, N, 7);
    let expected: BTreeSet<usize> = reference
        .vertices()
        .iter()
        .enumerate()
        .filter(|(_, v)| inflated.contains(v.coords(), 3))
        .map(|(i, _)| i)
        .collect();

    let mesh = store.mesh(MeshId(mesh_id)).unwrap();
    let kept: BTreeSet<usize> = mesh.vertices().iter().map(|v| v.global_index()).collect();
    assert_eq!(kept, expected, "filter must keep exactly the inflated box");
    assert!(mesh.vertices().iter().all(|v| v.is_owner()));

    // the provider's routing table names the same vertices
    let sent: BTreeSet<usize> = provider_maps.comm_map[&0].iter().copied().collect();
    assert_eq!(sent, expected);
}

/// Equivalent to `Option<Box<dyn Channel>>::as_deref_mut`, written out
/// manually: the stdlib version pins the trait object's elided lifetime to
/// `'static`, which makes the borrow outlive the later move of `chan`.
fn chan_as_deref_mut(chan: &mut Option<Box<dyn Channel>>) -> Option<&mut dyn Channel> {
    match chan {
        Some(b) => Some(&mut **b),
        None => None,
    }
}

fn run_two_rank_partition(
    mesh_id: i32,
    acceptor: &'static str,
    filter: GeometricFilter,
    regions: [BoundingBox; 2],
) -> (Vec<VertexDistribution>, Vec<CommMaps>) {
    const N: usize = 200;

    let provider = std::thread::spawn(move || {
        let mut store = provider_store(mesh_id, N, 11);
        let mut conn = accept_connection(&TransportKind::Local, acceptor, "recv", &[0]).unwrap();
        let chan = conn.master().unwrap();
        provided_communicate(&mut store, MeshId(mesh_id), &SingleRank, Some(chan.as_mut()))
            .unwrap();
        provided_compute(&store, MeshId(mesh_id), &SingleRank, Some(chan.as_mut())).unwrap();
    });

    let handles: Vec<_> = ThreadGroup::create_group(2)
        .into_iter()
        .zip(regions)
        .map(|(comm, region)| {
            std::thread::spawn(move || {
                let mut store = receiver_store(mesh_id);
                let mut chan = comm
                    .is_master()
                    .then(|| request_connection(&TransportKind::Local, acceptor, "recv", 0).unwrap());
                let handshake = received_communicate(chan_as_deref_mut(&mut chan)).unwrap();
                let maps = received_compute(
                    &mut store,
                    MeshId(mesh_id),
                    handshake,
                    region,
                    0.0,
                    filter,
                    &comm,
                    chan_as_deref_mut(&mut chan),
                )
                .unwrap();
                let dist = store
                    .mesh(MeshId(mesh_id))
                    .unwrap()
                    .vertex_distribution()
                    .clone();
                (dist, maps)
            })
        })
        .collect();

    provider.join().unwrap();
    let mut dists = Vec::new();
    let mut maps = Vec::new();
    for h in handles {
        let (d, m) = h.join().unwrap();
        dists.push(d);
        maps.push(m);
    }
    (dists, maps)
}

/// Invariant: with no geometric reduction, the owned global indices of all
/// ranks partition `{0..N-1}` exactly.
#[test]
fn ownership_partitions_the_global_index_set() {
    let (dists, _) = run_two_rank_partition(
        41,
        "own-prov.m41",
        GeometricFilter::NoFilter,
        [BoundingBox::new(), BoundingBox::new()],
    );

    // both ranks agree on the full distribution
    assert_eq!(dists[0], dists[1]);
    let mut seen = BTreeSet::new();
    for rank in 0..2 {
        for &g in &dists[0].global[&rank] {
            assert!(seen.insert(g), "global index {g} owned twice");
        }
    }
    assert_eq!(seen, (0..200).collect::<BTreeSet<_>>());
    // fair share: 100 each
    assert_eq!(dists[0].owned_count(0), 100);
    assert_eq!(dists[0].owned_count(1), 100);
}

/// Partitioning the same mesh twice with the same rank count yields
/// identical per-rank owned index lists.
#[test]
fn ownership_assignment_is_deterministic() {
    let mut lower = BoundingBox::new();
    lower.expand_by([0.0, 0.0, 0.0]);
    lower.expand_by([1.0, 0.6, 1.0]);
    let mut upper = BoundingBox::new();
    upper.expand_by([0.0, 0.4, 0.0]);
    upper.expand_by([1.0, 1.0, 1.0]);

    let (first, _) = run_two_rank_partition(
        42,
        "det-prov.m42",
        GeometricFilter::BroadcastFilter,
        [lower, upper],
    );
    let (second, _) = run_two_rank_partition(
        43,
        "det-prov.m43",
        GeometricFilter::BroadcastFilter,
        [lower, upper],
    );

    assert_eq!(first[0].local, second[0].local);
    assert_eq!(first[0].global, second[0].global);
}

/// An empty filtered partition is non-fatal: the rank simply has no owned
/// vertices and an empty communication map.
#[test]
fn empty_filtered_partition_is_non_fatal() {
    let mut far_away = BoundingBox::new();
    far_away.expand_by([10.0, 10.0, 10.0]);
    far_away.expand_by([11.0, 11.0, 11.0]);
    let mut everything = BoundingBox::new();
    everything.expand_by([0.0, 0.0, 0.0]);
    everything.expand_by([1.0, 1.0, 1.0]);

    let (dists, maps) = run_two_rank_partition(
        44,
        "empty-prov.m44",
        GeometricFilter::BroadcastFilter,
        [everything, far_away],
    );

    assert_eq!(dists[0].owned_count(1), 0);
    assert_eq!(dists[0].owned_count(0), 200);
    assert!(maps[1].comm_map.is_empty());
}

/// Vertex offsets are the prefix sums of the owned counts.
#[test]
fn vertex_offsets_are_prefix_sums() {
    let (dists, _) = run_two_rank_partition(
        45,
        "offs-prov.m45",
        GeometricFilter::NoFilter,
        [BoundingBox::new(), BoundingBox::new()],
    );
    let d = &dists[0];
    let total: usize = (0..2).map(|r| d.owned_count(r)).sum();
    assert_eq!(total, 200);
    // offsets live on the mesh; reconstruct from the distribution
    let mut expected = vec![0];
    for r in 0..2 {
        expected.push(expected.last().unwrap() + d.owned_count(r));
    }
    assert_eq!(expected, vec![0, d.owned_count(0), 200]);
}
