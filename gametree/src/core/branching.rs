//! Branch-point selection for the sampler.
//!
//! Deterministic given the injected RNG: tests drive it with a seeded
//! `StdRng` and real runs pass `rand::rng()`.

use rand::Rng;

use crate::core::types::{EngineError, NodeId};
use crate::tree::NodeTree;

/// Pick the branch points to expand after rolling out to `leaf`.
///
/// The remaining budget is `max_depth` minus the leaf's branching depth; with
/// no budget left there is nothing to pick. Otherwise sample up to that many
/// nodes uniformly without replacement from the upstream branchable set, and
/// return them ordered by ascending tree level so expansion proceeds
/// root-most first.
pub fn sample_branch_points(
    tree: &NodeTree,
    leaf: &NodeId,
    max_depth: usize,
    rng: &mut impl Rng,
) -> Result<Vec<NodeId>, EngineError> {
    let depth_remain = max_depth.saturating_sub(tree.depth(leaf)?);
    if depth_remain == 0 {
        return Ok(Vec::new());
    }
    let candidates = tree.upstream_branchable(leaf)?;
    let take = depth_remain.min(candidates.len());
    if take == 0 {
        return Ok(Vec::new());
    }

    let picked = rand::seq::index::sample(rng, candidates.len(), take);
    let mut leveled = Vec::with_capacity(take);
    for index in picked {
        let id = candidates[index].clone();
        let level = tree.level(&id)?;
        leveled.push((level, id));
    }
    leveled.sort_by_key(|(level, _)| *level);
    Ok(leveled.into_iter().map(|(_, id)| id).collect())
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    use super::*;
    use crate::core::types::BranchStatus;

    fn linear_tree(len: usize) -> (NodeTree, Vec<NodeId>) {
        let mut tree = NodeTree::new();
        let mut ids = vec![tree.insert_root().expect("root")];
        for _ in 1..len {
            let parent = ids.last().expect("non-empty").clone();
            ids.push(tree.new_child(&parent).expect("child"));
        }
        (tree, ids)
    }

    #[test]
    fn no_budget_left_yields_no_points() {
        let (mut tree, ids) = linear_tree(3);
        tree.get_mut(&ids[0]).expect("root").branch_status = BranchStatus::Branched;
        let mut rng = SmallRng::seed_from_u64(7);
        let points = sample_branch_points(&tree, &ids[2], 1, &mut rng).expect("sample");
        assert!(points.is_empty());
    }

    #[test]
    fn budget_caps_the_number_of_points() {
        let (tree, ids) = linear_tree(6);
        let mut rng = SmallRng::seed_from_u64(7);
        let points = sample_branch_points(&tree, &ids[5], 2, &mut rng).expect("sample");
        assert_eq!(points.len(), 2);
    }

    #[test]
    fn points_come_back_in_ascending_level_order() {
        let (tree, ids) = linear_tree(8);
        let mut rng = SmallRng::seed_from_u64(42);
        let points = sample_branch_points(&tree, &ids[7], 5, &mut rng).expect("sample");
        let levels: Vec<usize> = points
            .iter()
            .map(|id| tree.level(id).expect("level"))
            .collect();
        let mut sorted = levels.clone();
        sorted.sort_unstable();
        assert_eq!(levels, sorted);
    }

    #[test]
    fn small_candidate_sets_are_taken_whole() {
        let (tree, ids) = linear_tree(3);
        let mut rng = SmallRng::seed_from_u64(7);
        let mut points = sample_branch_points(&tree, &ids[2], 10, &mut rng).expect("sample");
        points.sort();
        // Only the strict ancestors of the leaf are candidates.
        let mut expected = vec![ids[0].clone(), ids[1].clone()];
        expected.sort();
        assert_eq!(points, expected);
    }
}
