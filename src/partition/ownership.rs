//! Deterministic vertex ownership assignment.

use std::collections::BTreeMap;

/// Assign exactly one owner rank to every candidate vertex.
///
/// `candidates` maps each rank to the ascending global indices its filter
/// accepted. For each vertex in globally sorted order, the candidate rank
/// with the smallest id that has not yet exceeded its fair share
/// (`⌈global_count / n_ranks⌉`) becomes the owner; if every candidate is at
/// its cap, the smallest candidate rank takes the vertex anyway, since the
/// exactly-one-owner invariant outranks balance. The result is independent
/// of message arrival order.
///
/// Returns, per rank, owner flags aligned with that rank's candidate list.
pub fn assign_owners(
    candidates: &BTreeMap<usize, Vec<usize>>,
    global_count: usize,
    n_ranks: usize,
) -> BTreeMap<usize, Vec<bool>> {
    let fair_share = global_count.div_ceil(n_ranks.max(1));

    // global index -> ranks whose filter accepted it (ascending)
    let mut by_vertex: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (&rank, globals) in candidates {
        for &g in globals {
            by_vertex.entry(g).or_default().push(rank);
        }
    }

    let mut owned_counts: BTreeMap<usize, usize> = BTreeMap::new();
    let mut owner_of: BTreeMap<usize, usize> = BTreeMap::new();
    for (&g, ranks) in &by_vertex {
        let owner = ranks
            .iter()
            .copied()
            .find(|r| owned_counts.get(r).copied().unwrap_or(0) < fair_share)
            .unwrap_or(ranks[0]);
        *owned_counts.entry(owner).or_insert(0) += 1;
        owner_of.insert(g, owner);
    }

    candidates
        .iter()
        .map(|(&rank, globals)| {
            let flags = globals.iter().map(|g| owner_of[g] == rank).collect();
            (rank, flags)
        })
        .collect()
}
