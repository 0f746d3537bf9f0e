use std::collections::HashMap;
use std::sync::RwLock;

use lansync_core::entities::FileMeta;

/// Everything this node knows about the network: each peer's last index, the
/// per-hash name tally derived from it, and the manual overrides. One lock,
/// every mutation through the methods, so readers always see the tally in
/// step with the peer map.
pub struct NetworkState {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    /// PeerID -> last INDEX that peer sent.
    peers: HashMap<String, Vec<FileMeta>>,
    /// hash -> name -> votes. Always the pointwise sum over `peers`.
    tally: HashMap<String, HashMap<String, usize>>,
    /// hash -> operator override. Beats the tally.
    manual: HashMap<String, String>,
}

impl Inner {
    /// Full recount rather than an incremental diff: the tally invariant
    /// holds by construction no matter what changed.
    fn recount(&mut self) {
        let mut tally: HashMap<String, HashMap<String, usize>> = HashMap::new();
        for files in self.peers.values() {
            for f in files {
                *tally
                    .entry(f.hash.clone())
                    .or_default()
                    .entry(f.relative_path.clone())
                    .or_insert(0) += 1;
            }
        }
        self.tally = tally;
    }

    fn consensus_name(&self, hash: &str) -> Option<(String, bool)> {
        if let Some(name) = self.manual.get(hash) {
            return Some((name.clone(), true));
        }

        let names = self.tally.get(hash)?;
        let max = names.values().copied().max()?;
        // Smallest maximal name, so repeated calls over equal state agree.
        let mut winners: Vec<&String> = names
            .iter()
            .filter(|(_, count)| **count == max)
            .map(|(name, _)| name)
            .collect();
        winners.sort();
        Some((winners[0].clone(), winners.len() == 1))
    }
}

impl NetworkState {
    pub fn new() -> NetworkState {
        NetworkState {
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Replace a peer's index and bring the tally back in step.
    pub fn update_peer(&self, device_id: &str, files: Vec<FileMeta>) {
        let mut inner = self.inner.write().unwrap();
        inner.peers.insert(device_id.to_string(), files);
        inner.recount();
    }

    /// Unconditional overwrite: last writer wins, there is no vote clock.
    pub fn set_manual(&self, hash: &str, name: &str) {
        let mut inner = self.inner.write().unwrap();
        inner.manual.insert(hash.to_string(), name.to_string());
    }

    /// The name this hash should carry network-wide. `true` means decisive:
    /// either a manual override or a strictly unique maximum in the tally.
    pub fn consensus_name(&self, hash: &str) -> Option<(String, bool)> {
        self.inner.read().unwrap().consensus_name(hash)
    }

    /// One entry per content hash known anywhere, under its winning name,
    /// with size/mtime from whichever peer carries the hash. Sorted by name
    /// (hash as tiebreak, so equal inputs give equal output).
    pub fn global_view(&self) -> Vec<FileMeta> {
        let inner = self.inner.read().unwrap();
        let mut result: Vec<FileMeta> = Vec::new();

        for hash in inner.tally.keys() {
            let (winner, _) = match inner.consensus_name(hash) {
                Some(w) => w,
                None => continue,
            };
            let sample = inner
                .peers
                .values()
                .flatten()
                .find(|f| f.hash == *hash);
            if let Some(f) = sample {
                result.push(FileMeta {
                    relative_path: winner,
                    size: f.size,
                    mtime: f.mtime,
                    hash: hash.clone(),
                });
            }
        }

        result.sort_by(|a, b| {
            a.relative_path
                .cmp(&b.relative_path)
                .then_with(|| a.hash.cmp(&b.hash))
        });
        result
    }

    pub fn peer_count(&self) -> usize {
        self.inner.read().unwrap().peers.len()
    }

    pub fn has_peer(&self, device_id: &str) -> bool {
        self.inner.read().unwrap().peers.contains_key(device_id)
    }

    /// Raw vote counts for a hash; what the tally tests assert against.
    pub fn votes(&self, hash: &str, name: &str) -> usize {
        self.inner
            .read()
            .unwrap()
            .tally
            .get(hash)
            .and_then(|names| names.get(name))
            .copied()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod unit_tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    fn meta(path: &str, hash: &str) -> FileMeta {
        FileMeta {
            relative_path: String::from(path),
            size: 10,
            mtime: 1_700_000_000,
            hash: String::from(hash),
        }
    }

    #[test]
    fn test_tally_counts_peer_contributions() {
        let state = NetworkState::new();
        state.update_peer("a", vec![meta("report.txt", "h1")]);
        state.update_peer("b", vec![meta("final.txt", "h1")]);
        state.update_peer("c", vec![meta("report.txt", "h1")]);

        assert_eq!(state.votes("h1", "report.txt"), 2);
        assert_eq!(state.votes("h1", "final.txt"), 1);
        assert_eq!(state.votes("h1", "other.txt"), 0);
    }

    #[test]
    fn test_update_replaces_previous_index() {
        let state = NetworkState::new();
        state.update_peer("a", vec![meta("old.txt", "h1")]);
        state.update_peer("a", vec![meta("new.txt", "h1")]);

        // A re-sent index must not leave stale votes behind.
        assert_eq!(state.votes("h1", "old.txt"), 0);
        assert_eq!(state.votes("h1", "new.txt"), 1);
    }

    #[test]
    fn test_tally_is_commutative_in_peers() {
        let forward = NetworkState::new();
        forward.update_peer("a", vec![meta("x.txt", "h1")]);
        forward.update_peer("b", vec![meta("y.txt", "h1")]);

        let backward = NetworkState::new();
        backward.update_peer("b", vec![meta("y.txt", "h1")]);
        backward.update_peer("a", vec![meta("x.txt", "h1")]);

        assert_eq!(forward.consensus_name("h1"), backward.consensus_name("h1"));
        assert_eq!(forward.global_view(), backward.global_view());
    }

    #[test]
    fn test_tally_consistent_after_concurrent_updates() {
        let state = Arc::new(NetworkState::new());
        let mut handles = Vec::new();
        for p in 0..8 {
            let state = state.clone();
            handles.push(thread::spawn(move || {
                let id = format!("peer-{}", p);
                for _ in 0..50 {
                    state.update_peer(&id, vec![meta("shared.txt", "h1")]);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        // Eight peers, one vote each, however the updates interleaved.
        assert_eq!(state.votes("h1", "shared.txt"), 8);
    }

    #[test]
    fn test_majority_wins_decisively() {
        let state = NetworkState::new();
        state.update_peer("a", vec![meta("report.txt", "h1")]);
        state.update_peer("b", vec![meta("final.txt", "h1")]);
        state.update_peer("c", vec![meta("report.txt", "h1")]);

        assert_eq!(
            state.consensus_name("h1"),
            Some((String::from("report.txt"), true))
        );
    }

    #[test]
    fn test_even_split_is_a_tie() {
        let state = NetworkState::new();
        state.update_peer("a", vec![meta("a", "h1")]);
        state.update_peer("b", vec![meta("a", "h1")]);
        state.update_peer("c", vec![meta("b", "h1")]);
        state.update_peer("d", vec![meta("b", "h1")]);

        let (_, decisive) = state.consensus_name("h1").unwrap();
        assert!(!decisive);
    }

    #[test]
    fn test_manual_beats_any_tally() {
        let state = NetworkState::new();
        state.update_peer("a", vec![meta("a", "h1")]);
        state.update_peer("b", vec![meta("a", "h1")]);
        state.update_peer("c", vec![meta("b", "h1")]);
        state.update_peer("d", vec![meta("b", "h1")]);

        state.set_manual("h1", "chosen.txt");
        assert_eq!(
            state.consensus_name("h1"),
            Some((String::from("chosen.txt"), true))
        );
    }

    #[test]
    fn test_manual_last_writer_wins() {
        let state = NetworkState::new();
        state.set_manual("h1", "first.txt");
        state.set_manual("h1", "second.txt");
        assert_eq!(
            state.consensus_name("h1"),
            Some((String::from("second.txt"), true))
        );
    }

    #[test]
    fn test_unknown_hash_has_no_name() {
        let state = NetworkState::new();
        assert_eq!(state.consensus_name("missing"), None);
    }

    #[test]
    fn test_global_view_sorted_and_deduplicated() {
        let state = NetworkState::new();
        state.update_peer("a", vec![meta("zebra.txt", "h2"), meta("apple.txt", "h1")]);
        state.update_peer("b", vec![meta("apple.txt", "h1")]);

        let view = state.global_view();
        let names: Vec<&str> = view.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(names, vec!["apple.txt", "zebra.txt"]);

        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }

    #[test]
    fn test_global_view_uses_manual_winner() {
        let state = NetworkState::new();
        state.update_peer("a", vec![meta("old-name.txt", "h1")]);
        state.set_manual("h1", "override.txt");

        let view = state.global_view();
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].relative_path, "override.txt");
        assert_eq!(view[0].hash, "h1");
    }

    #[test]
    fn test_global_view_keeps_collisions_adjacent() {
        // Same winning name for two different hashes: both entries appear,
        // next to each other, in a stable order.
        let state = NetworkState::new();
        state.update_peer("a", vec![meta("x", "h1")]);
        state.update_peer("b", vec![meta("x", "h2")]);

        let view = state.global_view();
        assert_eq!(view.len(), 2);
        assert_eq!(view[0].relative_path, "x");
        assert_eq!(view[1].relative_path, "x");
        assert_eq!(view[0].hash, "h1");
        assert_eq!(view[1].hash, "h2");
        assert_eq!(view, state.global_view());
    }

    #[test]
    fn test_global_view_carries_representative_meta() {
        let state = NetworkState::new();
        state.update_peer(
            "a",
            vec![FileMeta {
                relative_path: String::from("a.txt"),
                size: 123,
                mtime: 456,
                hash: String::from("h1"),
            }],
        );

        let view = state.global_view();
        assert_eq!(view[0].size, 123);
        assert_eq!(view[0].mtime, 456);
    }
}
