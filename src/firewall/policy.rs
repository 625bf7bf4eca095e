//! Open-port policy and rotation.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rand::seq::index;
use rand::Rng;
use tracing::{debug, info};

use super::types::RotationRecord;

/// Minimum number of open ports maintained by a rotation.
pub const MIN_OPEN_PORTS: usize = 2;

/// Ports closed per rotation (at most).
const MAX_CLOSE_PER_ROTATION: usize = 2;

/// The port universe plus the subset currently accepting connections.
#[derive(Debug, Clone)]
pub struct PolicyState {
    /// Known service ports, in configured order
    universe: Vec<u16>,
    /// Currently open ports
    open: BTreeSet<u16>,
    /// Completed rotations
    rotations: u64,
}

impl PolicyState {
    /// Create a policy over `universe` with nothing open yet.
    pub fn new(universe: &[u16]) -> Self {
        let mut seen = BTreeSet::new();
        let universe = universe.iter().copied().filter(|p| seen.insert(*p)).collect();

        Self {
            universe,
            open: BTreeSet::new(),
            rotations: 0,
        }
    }

    /// Replace the open set with `min(count, |universe|)` random universe ports.
    pub fn seed<R: Rng + ?Sized>(&mut self, count: usize, rng: &mut R) -> Vec<u16> {
        let amount = count.min(self.universe.len());
        self.open = index::sample(rng, self.universe.len(), amount)
            .into_iter()
            .map(|i| self.universe[i])
            .collect();

        info!(open_ports = ?self.open, "seeded open ports");
        self.open_ports()
    }

    /// Rotate the open set.
    ///
    /// Closes up to two random open ports, opens one or two random closed
    /// ports, then tops the open set up to [`MIN_OPEN_PORTS`] while the
    /// universe allows it.
    pub fn rotate<R: Rng + ?Sized>(&mut self, rng: &mut R, now: DateTime<Utc>) -> RotationRecord {
        self.rotations += 1;

        let mut closed = Vec::new();
        for _ in 0..MAX_CLOSE_PER_ROTATION.min(self.open.len()) {
            if let Some(port) = pick(self.open.iter().copied(), rng) {
                self.open.remove(&port);
                closed.push(port);
                debug!(port, "closed port");
            }
        }

        let mut opened = Vec::new();
        let to_open = rng.random_range(1..=2);
        for _ in 0..to_open {
            if let Some(port) = self.open_random_closed(rng) {
                opened.push(port);
            }
        }

        while self.open.len() < MIN_OPEN_PORTS {
            match self.open_random_closed(rng) {
                Some(port) => opened.push(port),
                None => break,
            }
        }

        RotationRecord {
            sequence: self.rotations,
            timestamp: now,
            closed,
            opened,
            open_ports: self.open_ports(),
        }
    }

    fn open_random_closed<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<u16> {
        let open = &self.open;
        let port = pick(self.universe.iter().copied().filter(|p| !open.contains(p)), rng)?;
        self.open.insert(port);
        debug!(port, "opened port");
        Some(port)
    }

    /// Whether `port` currently accepts connections.
    pub fn is_open(&self, port: u16) -> bool {
        self.open.contains(&port)
    }

    /// Whether `port` belongs to the universe.
    pub fn in_universe(&self, port: u16) -> bool {
        self.universe.contains(&port)
    }

    /// Sorted copy of the open set.
    pub fn open_ports(&self) -> Vec<u16> {
        self.open.iter().copied().collect()
    }

    /// Universe ports that are currently closed, in configured order.
    pub fn closed_ports(&self) -> Vec<u16> {
        self.universe
            .iter()
            .copied()
            .filter(|p| !self.open.contains(p))
            .collect()
    }

    pub fn universe(&self) -> &[u16] {
        &self.universe
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    pub fn rotation_count(&self) -> u64 {
        self.rotations
    }
}

/// Uniformly pick one item.
fn pick<I, R>(items: I, rng: &mut R) -> Option<u16>
where
    I: Iterator<Item = u16>,
    R: Rng + ?Sized,
{
    let candidates: Vec<u16> = items.collect();
    if candidates.is_empty() {
        return None;
    }
    Some(candidates[rng.random_range(0..candidates.len())])
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const UNIVERSE: [u16; 11] = [21, 22, 25, 53, 80, 443, 3306, 3389, 8080, 8443, 27017];

    #[test]
    fn test_seed_opens_three_universe_ports() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut policy = PolicyState::new(&UNIVERSE);

        let open = policy.seed(3, &mut rng);
        assert_eq!(open.len(), 3);
        assert!(open.iter().all(|p| UNIVERSE.contains(p)));
    }

    #[test]
    fn test_seed_small_universe_opens_everything() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut policy = PolicyState::new(&[80, 443, 8080]);

        assert_eq!(policy.seed(3, &mut rng), vec![80, 443, 8080]);
    }

    #[test]
    fn test_rotation_invariants_hold() {
        for seed in 0..50 {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut policy = PolicyState::new(&UNIVERSE);
            policy.seed(3, &mut rng);

            for _ in 0..100 {
                let record = policy.rotate(&mut rng, Utc::now());
                assert!(policy.open_count() >= MIN_OPEN_PORTS);
                assert!(policy.open_ports().iter().all(|p| UNIVERSE.contains(p)));
                assert!(record.closed.len() <= 2);
                assert_eq!(record.open_ports, policy.open_ports());
            }
        }
    }

    #[test]
    fn test_rotation_sequence_increments() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut policy = PolicyState::new(&UNIVERSE);
        policy.seed(3, &mut rng);

        assert_eq!(policy.rotate(&mut rng, Utc::now()).sequence, 1);
        assert_eq!(policy.rotate(&mut rng, Utc::now()).sequence, 2);
        assert_eq!(policy.rotation_count(), 2);
    }

    #[test]
    fn test_rotation_tops_up_from_empty() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut policy = PolicyState::new(&UNIVERSE);

        policy.rotate(&mut rng, Utc::now());
        assert!(policy.open_count() >= MIN_OPEN_PORTS);
    }

    #[test]
    fn test_exhausted_universe_is_noop() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut policy = PolicyState::new(&[8080]);
        policy.seed(3, &mut rng);

        let record = policy.rotate(&mut rng, Utc::now());
        assert_eq!(policy.open_ports(), vec![8080]);
        assert_eq!(record.open_ports, vec![8080]);

        let mut empty = PolicyState::new(&[]);
        let record = empty.rotate(&mut rng, Utc::now());
        assert!(record.open_ports.is_empty());
        assert!(record.opened.is_empty());
    }

    #[test]
    fn test_two_port_universe_stays_fully_open() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut policy = PolicyState::new(&[80, 443]);
        policy.seed(3, &mut rng);

        for _ in 0..20 {
            policy.rotate(&mut rng, Utc::now());
            assert_eq!(policy.open_ports(), vec![80, 443]);
        }
    }

    #[test]
    fn test_duplicate_universe_ports_collapse() {
        let policy = PolicyState::new(&[80, 80, 443]);
        assert_eq!(policy.universe(), &[80, 443]);
    }

    #[test]
    fn test_same_seed_same_rotations() {
        let run = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut policy = PolicyState::new(&UNIVERSE);
            policy.seed(3, &mut rng);
            (0..10)
                .map(|_| policy.rotate(&mut rng, DateTime::<Utc>::MIN_UTC).open_ports)
                .collect::<Vec<_>>()
        };

        assert_eq!(run(99), run(99));
    }
}
