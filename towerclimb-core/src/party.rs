use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::{Result, TowerError};

/// Size of the character pool and of each floor's roster. 14-choose-5
/// gives 2002 distinct rosters, which bounds how many floors can ever be
/// generated without repeating.
pub(crate) const CHARACTER_POOL: u8 = 14;
pub(crate) const ROSTER_SIZE: usize = 5;

/// Retry budget for finding a fresh roster. A tuning constant, not a
/// correctness guarantee: towers sized within the pool's combinatorics
/// never come close to it.
const ROTATION_ATTEMPTS: usize = 1000;

/// The party assigned to one floor, members sorted ascending, plus the
/// character who left relative to the previous floor.
#[derive(Debug, Clone)]
pub(crate) struct FloorParty {
    pub members: [u8; ROSTER_SIZE],
    pub departed: Option<u8>,
}

/// Generate the full roster sequence for the tower. Each floor differs
/// from its predecessor by exactly one member, the leaver is chosen
/// preferentially among characters who were already aboard two floors
/// back, and no roster (as a set) repeats anywhere in the run.
pub(crate) fn generate_rotation(rng: &mut StdRng, floors: u32) -> Result<Vec<FloorParty>> {
    let pool: Vec<u8> = (0..CHARACTER_POOL).collect();
    let mut sequence: Vec<FloorParty> = Vec::with_capacity(floors as usize);
    let mut seen: HashSet<[u8; ROSTER_SIZE]> = HashSet::new();

    for n in 0..floors as usize {
        if n == 0 {
            let mut members: Vec<u8> = pool.choose_multiple(rng, ROSTER_SIZE).copied().collect();
            members.sort_unstable();
            let members: [u8; ROSTER_SIZE] = members.try_into().expect("roster size");
            seen.insert(members);
            sequence.push(FloorParty { members, departed: None });
            continue;
        }

        let prev = sequence[n - 1].members;
        let absent: Vec<u8> = pool.iter().copied().filter(|c| !prev.contains(c)).collect();

        let mut accepted: Option<([u8; ROSTER_SIZE], u8)> = None;
        for _ in 0..ROTATION_ATTEMPTS {
            let Some(&newcomer) = absent.choose(rng) else {
                break;
            };
            let eligible: Vec<u8> = if n >= 2 {
                let two_back = sequence[n - 2].members;
                prev.iter().copied().filter(|c| two_back.contains(c)).collect()
            } else {
                prev.to_vec()
            };
            let Some(&leaver) = eligible.choose(rng) else {
                continue;
            };

            let mut candidate: Vec<u8> =
                prev.iter().copied().filter(|&c| c != leaver).collect();
            candidate.push(newcomer);
            candidate.sort_unstable();
            let candidate: [u8; ROSTER_SIZE] = candidate.try_into().expect("roster size");

            if !seen.contains(&candidate) {
                accepted = Some((candidate, leaver));
                break;
            }
        }

        let Some((members, leaver)) = accepted else {
            return Err(TowerError::GenerationInfeasible(format!(
                "no unused roster found for floor {} within {} attempts; \
                 the character pool is too small for this many floors",
                n, ROTATION_ATTEMPTS
            )));
        };
        seen.insert(members);
        sequence.push(FloorParty { members, departed: Some(leaver) });
    }

    Ok(sequence)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn rotation(seed: u64, floors: u32) -> Vec<FloorParty> {
        let mut rng = StdRng::seed_from_u64(seed);
        generate_rotation(&mut rng, floors).unwrap()
    }

    #[test]
    fn rosters_are_valid_five_of_fourteen() {
        for &floors in &[5u32, 20, 99] {
            for party in rotation(1, floors) {
                assert!(party.members.windows(2).all(|w| w[0] < w[1]));
                assert!(party.members.iter().all(|&c| c < CHARACTER_POOL));
            }
        }
    }

    #[test]
    fn no_roster_repeats_across_the_run() {
        for seed in 0..5u64 {
            let sequence = rotation(seed, 99);
            let mut seen = HashSet::new();
            for party in &sequence {
                assert!(seen.insert(party.members), "repeated roster {:?}", party.members);
            }
            assert_eq!(sequence.len(), 99);
        }
    }

    #[test]
    fn consecutive_floors_differ_by_exactly_one_member() {
        let sequence = rotation(7, 40);
        for pair in sequence.windows(2) {
            let kept = pair[1]
                .members
                .iter()
                .filter(|c| pair[0].members.contains(c))
                .count();
            assert_eq!(kept, ROSTER_SIZE - 1);
        }
    }

    #[test]
    fn departed_member_tracks_the_swap() {
        let sequence = rotation(42, 30);
        assert!(sequence[0].departed.is_none());
        for (n, party) in sequence.iter().enumerate().skip(1) {
            let leaver = party.departed.expect("every later floor records a leaver");
            assert!(!party.members.contains(&leaver));
            assert!(sequence[n - 1].members.contains(&leaver));
        }
    }

    #[test]
    fn leaver_had_their_turn_when_possible() {
        // From floor 2 on, the leaver must have been aboard two floors
        // back as well.
        let sequence = rotation(11, 50);
        for n in 2..sequence.len() {
            let leaver = sequence[n].departed.unwrap();
            assert!(sequence[n - 2].members.contains(&leaver));
        }
    }
}
