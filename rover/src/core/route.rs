//! Route planning over unvisited stops.
//!
//! A nearest-neighbour tour from the current position, optionally tightened by
//! 2-opt, ranks the candidates. Selection then prefers an early bonus stop and
//! otherwise adds Poisson noise to the rank so the agent does not ping-pong
//! between two adjacent stops.

use std::time::Instant;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::core::geo::distance_deg;
use crate::core::poi_store::{PoiStore, VisitedSet};
use crate::core::types::{Millis, Position, Stop};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteConfig {
    /// How many top-ranked stops are checked for a bonus flag.
    pub bonus_window: usize,
    /// Mean of the Poisson draw used to pick a rank. `0` means strictly greedy.
    pub noise_mean: f64,
    /// Upper bound on 2-opt improvement passes. `0` skips refinement.
    pub refine_passes: u32,
    /// Wall-clock cap for refinement; callers turn it into a deadline.
    pub refine_budget_ms: u64,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            bonus_window: 5,
            noise_mean: 0.5,
            refine_passes: 50,
            refine_budget_ms: 50,
        }
    }
}

/// Pick the next stop to travel to, or `None` when there are no candidates.
///
/// `deadline` caps 2-opt refinement.
pub fn select_target<R: Rng + ?Sized>(
    position: &Position,
    candidates: &[&Stop],
    config: &RouteConfig,
    deadline: Instant,
    rng: &mut R,
) -> Option<String> {
    let ranked = rank_candidates(position, candidates, config, deadline);
    if ranked.is_empty() {
        return None;
    }

    let window = config.bonus_window.min(ranked.len());
    if let Some(&bonus) = ranked[..window]
        .iter()
        .find(|&&idx| candidates[idx].has_bonus)
    {
        return Some(candidates[bonus].id.clone());
    }

    let pick = sample_poisson(config.noise_mean, rng).min(ranked.len() - 1);
    Some(candidates[ranked[pick]].id.clone())
}

/// Candidate indices in tour order, nearest-first from `position`.
pub fn rank_candidates(
    position: &Position,
    candidates: &[&Stop],
    config: &RouteConfig,
    deadline: Instant,
) -> Vec<usize> {
    if candidates.is_empty() {
        return Vec::new();
    }
    let points: Vec<Position> = std::iter::once(*position)
        .chain(candidates.iter().map(|stop| stop.position))
        .collect();
    let matrix = distance_matrix(&points);
    let mut tour = nearest_neighbor_tour(&matrix);
    if config.refine_passes > 0 {
        two_opt(&mut tour, &matrix, config.refine_passes, deadline);
    }
    tour.into_iter().skip(1).map(|node| node - 1).collect()
}

/// True while `stop_id` is still a valid destination.
pub fn target_still_valid(stop_id: &str, store: &PoiStore, visited: &VisitedSet, now: Millis) -> bool {
    store
        .stop(stop_id)
        .is_some_and(|stop| !stop.is_cooling(now) && !visited.is_visited(stop_id, now))
}

fn distance_matrix(points: &[Position]) -> Vec<Vec<f64>> {
    points
        .iter()
        .map(|a| points.iter().map(|b| distance_deg(a, b)).collect())
        .collect()
}

/// Open tour starting at node 0.
fn nearest_neighbor_tour(matrix: &[Vec<f64>]) -> Vec<usize> {
    let n = matrix.len();
    let mut visited = vec![false; n];
    let mut tour = Vec::with_capacity(n);
    let mut current = 0;
    visited[0] = true;
    tour.push(0);
    for _ in 1..n {
        let next = (0..n)
            .filter(|&node| !visited[node])
            .min_by(|&a, &b| matrix[current][a].total_cmp(&matrix[current][b]));
        let Some(next) = next else { break };
        visited[next] = true;
        tour.push(next);
        current = next;
    }
    tour
}

/// Segment-reversal improvement on an open path with a fixed start.
///
/// Returns the total distance saved.
fn two_opt(tour: &mut [usize], matrix: &[Vec<f64>], max_passes: u32, deadline: Instant) -> f64 {
    let n = tour.len();
    let mut saved = 0.0;
    if n < 3 {
        return saved;
    }
    for _ in 0..max_passes {
        let mut improved = false;
        for i in 1..n - 1 {
            for j in i + 1..n {
                let before = matrix[tour[i - 1]][tour[i]]
                    + tour.get(j + 1).map_or(0.0, |&next| matrix[tour[j]][next]);
                let after = matrix[tour[i - 1]][tour[j]]
                    + tour.get(j + 1).map_or(0.0, |&next| matrix[tour[i]][next]);
                if after + 1e-12 < before {
                    tour[i..=j].reverse();
                    saved += before - after;
                    improved = true;
                }
            }
            if Instant::now() >= deadline {
                return saved;
            }
        }
        if !improved {
            break;
        }
    }
    saved
}

/// Knuth's multiplication method; fine for the small means used here.
fn sample_poisson<R: Rng + ?Sized>(mean: f64, rng: &mut R) -> usize {
    if mean <= 0.0 || !mean.is_finite() {
        return 0;
    }
    let limit = (-mean).exp();
    let mut k = 0;
    let mut p: f64 = rng.r#gen();
    while p > limit && k < 1_000 {
        k += 1;
        p *= rng.r#gen::<f64>();
    }
    k
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::core::poi_store::ScanResult;
    use crate::test_support::stop_at;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn greedy() -> RouteConfig {
        RouteConfig {
            noise_mean: 0.0,
            ..RouteConfig::default()
        }
    }

    fn budget() -> Instant {
        Instant::now() + Duration::from_millis(50)
    }

    fn path_length(matrix: &[Vec<f64>], tour: &[usize]) -> f64 {
        tour.windows(2).map(|w| matrix[w[0]][w[1]]).sum()
    }

    #[test]
    fn empty_candidates_select_nothing() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(
            select_target(&Position::new(0.0, 0.0), &[], &greedy(), budget(), &mut rng),
            None
        );
    }

    #[test]
    fn greedy_selection_picks_nearest_stop() {
        let far = stop_at("far", 0.01, 0.0);
        let near = stop_at("near", 0.001, 0.0);
        let mid = stop_at("mid", 0.005, 0.0);
        let mut rng = StdRng::seed_from_u64(7);
        let target = select_target(
            &Position::new(0.0, 0.0),
            &[&far, &near, &mid],
            &greedy(),
            budget(),
            &mut rng,
        );
        assert_eq!(target.as_deref(), Some("near"));
    }

    #[test]
    fn bonus_stop_in_window_wins() {
        let near = stop_at("near", 0.001, 0.0);
        let mut lured = stop_at("lured", 0.003, 0.0);
        lured.has_bonus = true;
        let mut rng = StdRng::seed_from_u64(3);
        let target = select_target(
            &Position::new(0.0, 0.0),
            &[&near, &lured],
            &greedy(),
            budget(),
            &mut rng,
        );
        assert_eq!(target.as_deref(), Some("lured"));
    }

    #[test]
    fn bonus_stop_outside_window_is_ignored() {
        let stops: Vec<Stop> = (1..=4)
            .map(|i| stop_at(&format!("s{i}"), 0.001 * f64::from(i), 0.0))
            .collect();
        let mut lured = stop_at("lured", 0.01, 0.0);
        lured.has_bonus = true;
        let mut refs: Vec<&Stop> = stops.iter().collect();
        refs.push(&lured);
        let config = RouteConfig {
            bonus_window: 2,
            ..greedy()
        };
        let mut rng = StdRng::seed_from_u64(3);
        let target = select_target(&Position::new(0.0, 0.0), &refs, &config, budget(), &mut rng);
        assert_eq!(target.as_deref(), Some("s1"));
    }

    #[test]
    fn noisy_selection_stays_in_bounds() {
        let a = stop_at("a", 0.001, 0.0);
        let b = stop_at("b", 0.002, 0.0);
        let config = RouteConfig {
            noise_mean: 50.0,
            ..RouteConfig::default()
        };
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..100 {
            let target = select_target(&Position::new(0.0, 0.0), &[&a, &b], &config, budget(), &mut rng)
                .expect("target");
            assert!(target == "a" || target == "b");
        }
    }

    #[test]
    fn two_opt_never_lengthens_the_tour() {
        let coords = [
            (0.0, 0.0),
            (0.0, 3.0),
            (1.0, 0.5),
            (0.2, 2.0),
            (1.5, 2.5),
            (0.7, 1.1),
        ];
        let points: Vec<Position> = coords.iter().map(|&(a, b)| Position::new(a, b)).collect();
        let matrix = distance_matrix(&points);
        let mut tour = nearest_neighbor_tour(&matrix);
        let before = path_length(&matrix, &tour);
        let far_future = Instant::now() + Duration::from_secs(60);
        two_opt(&mut tour, &matrix, 100, far_future);
        let after = path_length(&matrix, &tour);
        assert!(after <= before + 1e-12);
        assert_eq!(tour[0], 0);
        let mut sorted = tour.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn expired_deadline_still_ranks_every_candidate() {
        let stops = [
            stop_at("c", 0.003, 0.0),
            stop_at("a", 0.001, 0.0),
            stop_at("b", 0.002, 0.0),
        ];
        let refs: Vec<&Stop> = stops.iter().collect();
        let ranked = rank_candidates(
            &Position::new(0.0, 0.0),
            &refs,
            &RouteConfig::default(),
            Instant::now(),
        );
        assert_eq!(ranked, vec![1, 2, 0]);
    }

    #[test]
    fn poisson_mean_is_roughly_respected() {
        let mut rng = StdRng::seed_from_u64(42);
        let draws: usize = (0..2_000).map(|_| sample_poisson(2.0, &mut rng)).sum();
        let mean = draws as f64 / 2_000.0;
        assert!((mean - 2.0).abs() < 0.2, "mean was {mean}");
        assert_eq!(sample_poisson(0.0, &mut rng), 0);
    }

    #[test]
    fn planned_target_is_never_visited_or_cooling() {
        let mut store = PoiStore::new();
        let mut visited = VisitedSet::new(60_000);
        let mut cooling = stop_at("cooling", 0.0005, 0.0);
        cooling.cooldown_until = Some(10_000);
        store.ingest(ScanResult {
            stops: vec![stop_at("visited", 0.0001, 0.0), cooling, stop_at("open", 0.002, 0.0)],
            ..ScanResult::default()
        });
        visited.mark("visited", 0);

        let config = RouteConfig {
            noise_mean: 3.0,
            ..RouteConfig::default()
        };
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..50 {
            let candidates = store.candidates(1_000, &visited);
            let target = select_target(&Position::new(0.0, 0.0), &candidates, &config, budget(), &mut rng);
            assert_eq!(target.as_deref(), Some("open"));
        }
        assert!(!target_still_valid("visited", &store, &visited, 1_000));
        assert!(!target_still_valid("cooling", &store, &visited, 1_000));
        assert!(target_still_valid("cooling", &store, &visited, 10_000));
        assert!(!target_still_valid("gone", &store, &visited, 1_000));
    }
}
