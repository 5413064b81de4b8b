// Copyright 2016 Mozilla Foundation
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Four counters per hash-prefix directory (`spec.md` §3): local-hit,
//! local-miss, remote-hit, remote-miss. Aggregated by scanning the prefix
//! directories under the store root.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub local_hits: u64,
    pub local_misses: u64,
    pub remote_hits: u64,
    pub remote_misses: u64,
}

impl Stats {
    pub fn add(&mut self, delta: Stats) {
        self.local_hits += delta.local_hits;
        self.local_misses += delta.local_misses;
        self.remote_hits += delta.remote_hits;
        self.remote_misses += delta.remote_misses;
    }

    pub fn local_hit() -> Stats {
        Stats { local_hits: 1, ..Default::default() }
    }

    pub fn local_miss() -> Stats {
        Stats { local_misses: 1, ..Default::default() }
    }

    pub fn remote_hit() -> Stats {
        Stats { remote_hits: 1, ..Default::default() }
    }

    pub fn remote_miss() -> Stats {
        Stats { remote_misses: 1, ..Default::default() }
    }

    pub fn hit_rate(&self) -> f64 {
        let hits = (self.local_hits + self.remote_hits) as f64;
        let total = hits + (self.local_misses + self.remote_misses) as f64;
        if total == 0.0 {
            0.0
        } else {
            100.0 * hits / total
        }
    }
}

/// Load a prefix directory's `stats.json`, defaulting to zero if absent or
/// unparsable. Loss of a stats read is advisory-only, never fatal.
pub fn load(path: &std::path::Path) -> Stats {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

pub fn save(path: &std::path::Path, stats: &Stats) -> std::io::Result<()> {
    let json = serde_json::to_string(stats).unwrap();
    let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
    let tmp = crate::fs_util::TempFile::new(dir, "stats").map_err(|e| {
        std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
    })?;
    std::fs::write(tmp.path(), json)?;
    crate::fs_util::rename(tmp.path(), path)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
    tmp.forget();
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn hit_rate_of_empty_stats_is_zero() {
        assert_eq!(Stats::default().hit_rate(), 0.0);
    }

    #[test]
    fn hit_rate_computed_over_local_and_remote() {
        let mut s = Stats::default();
        s.add(Stats::local_hit());
        s.add(Stats::remote_hit());
        s.add(Stats::local_miss());
        assert!((s.hit_rate() - 66.666).abs() < 0.01);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");
        let mut s = Stats::default();
        s.add(Stats::local_hit());
        save(&path, &s).unwrap();
        assert_eq!(load(&path), s);
    }

    #[test]
    fn missing_stats_file_loads_as_default() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(load(&dir.path().join("nope.json")), Stats::default());
    }
}
