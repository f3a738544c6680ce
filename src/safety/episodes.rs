use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalEpisode {
    pub state: String,
    pub action: String,
    pub reward: f64,
    pub next_state: String,
    pub timestamp: DateTime<Utc>,
}

impl HistoricalEpisode {
    pub fn new(state: &str, action: &str, reward: f64, next_state: &str) -> Self {
        Self {
            state: state.to_string(),
            action: action.to_string(),
            reward,
            next_state: next_state.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Fixed-capacity episode log; the oldest episode is evicted first.
#[derive(Debug, Clone)]
pub struct EpisodeBuffer {
    episodes: VecDeque<HistoricalEpisode>,
    capacity: usize,
}

impl EpisodeBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            episodes: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
        }
    }

    /// Append an episode, returning the evicted one if the buffer was full.
    pub fn push(&mut self, episode: HistoricalEpisode) -> Option<HistoricalEpisode> {
        let evicted = if self.episodes.len() >= self.capacity {
            self.episodes.pop_front()
        } else {
            None
        };
        self.episodes.push_back(episode);
        evicted
    }

    pub fn get(&self, index: usize) -> Option<&HistoricalEpisode> {
        self.episodes.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &HistoricalEpisode> {
        self.episodes.iter()
    }

    pub fn len(&self) -> usize {
        self.episodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.episodes.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.episodes.clear();
    }

    pub fn to_vec(&self) -> Vec<HistoricalEpisode> {
        self.episodes.iter().cloned().collect()
    }

    /// Replace the contents, keeping only the newest `capacity` episodes.
    pub fn replace(&mut self, episodes: Vec<HistoricalEpisode>) {
        let skip = episodes.len().saturating_sub(self.capacity);
        self.episodes = episodes.into_iter().skip(skip).collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oldest_evicted_first() {
        let mut buffer = EpisodeBuffer::new(3);
        for i in 0..3 {
            assert!(buffer.push(HistoricalEpisode::new(&format!("s{}", i), "a", 0.0, "x")).is_none());
        }
        let evicted = buffer.push(HistoricalEpisode::new("s3", "a", 0.0, "x")).unwrap();
        assert_eq!(evicted.state, "s0");
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.get(0).unwrap().state, "s1");
    }

    #[test]
    fn test_replace_keeps_newest() {
        let mut buffer = EpisodeBuffer::new(2);
        let episodes: Vec<_> = (0..5)
            .map(|i| HistoricalEpisode::new(&format!("s{}", i), "a", i as f64, "x"))
            .collect();
        buffer.replace(episodes);
        let states: Vec<_> = buffer.iter().map(|e| e.state.as_str()).collect();
        assert_eq!(states, vec!["s3", "s4"]);
    }
}
