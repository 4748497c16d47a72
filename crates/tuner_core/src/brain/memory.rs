//! Lightweight in-process memory: ring buffer of observations, per-bucket
//! EWMA table, and a sweet-spot cache with TTL (C7).
//!
//! This module reads no clock of its own — every method that needs "now"
//! takes it as a parameter, so the whole crate stays free of hidden I/O and
//! is trivial to test deterministically.

use std::collections::{BTreeMap, VecDeque};

use super::contracts::{MemorySample, SweetSpot};

const SLO_P95_MS: f64 = 200.0;
const SLO_RECALL: f64 = 0.85;

pub struct MemoryConfig {
    pub ring_size: usize,
    pub alpha: f64,
    pub ttl_sec: f64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        MemoryConfig {
            ring_size: 100,
            alpha: 0.2,
            ttl_sec: 900.0,
        }
    }
}

pub struct Memory {
    ring_size: usize,
    alpha: f64,
    ttl_sec: f64,

    ring_buffer: VecDeque<MemorySample>,
    /// bucket_id -> (ef -> (ewma_p95, ewma_recall, count))
    ewma_data: BTreeMap<String, BTreeMap<i64, (f64, f64, u32)>>,
    sweet_spots: BTreeMap<String, SweetSpot>,
    last_update: BTreeMap<String, f64>,
}

impl Memory {
    pub fn new(config: MemoryConfig) -> Self {
        Memory {
            ring_size: config.ring_size,
            alpha: config.alpha,
            ttl_sec: config.ttl_sec,
            ring_buffer: VecDeque::new(),
            ewma_data: BTreeMap::new(),
            sweet_spots: BTreeMap::new(),
            last_update: BTreeMap::new(),
        }
    }

    /// Coarse traffic bucket, keyed off candidate-pool size.
    pub fn default_bucket_of(ncand_max: i64) -> &'static str {
        if ncand_max <= 800 {
            "small_candidates"
        } else if ncand_max <= 1200 {
            "medium_candidates"
        } else {
            "large_candidates"
        }
    }

    pub fn observe(&mut self, sample: MemorySample, now: f64) {
        let bucket_id = sample.bucket_id.clone();
        let ef = sample.ef;

        self.ring_buffer.push_back(sample.clone());
        while self.ring_buffer.len() > self.ring_size {
            self.ring_buffer.pop_front();
        }

        let bucket_ewma = self.ewma_data.entry(bucket_id.clone()).or_default();
        match bucket_ewma.get(&ef) {
            None => {
                bucket_ewma.insert(ef, (sample.p95_ms, sample.recall_at10, 1));
            }
            Some(&(old_p95, old_recall, count)) => {
                let new_p95 = self.alpha * sample.p95_ms + (1.0 - self.alpha) * old_p95;
                let new_recall = self.alpha * sample.recall_at10 + (1.0 - self.alpha) * old_recall;
                bucket_ewma.insert(ef, (new_p95, new_recall, count + 1));
            }
        }

        self.last_update.insert(bucket_id.clone(), now);
        self.update_sweet_spot(&bucket_id, now);
    }

    fn update_sweet_spot(&mut self, bucket_id: &str, now: f64) {
        let Some(bucket_ewma) = self.ewma_data.get(bucket_id) else {
            return;
        };

        let mut valid_efs: Vec<(i64, f64, f64)> = bucket_ewma
            .iter()
            .filter(|(_, (p95, recall, _))| *p95 <= SLO_P95_MS && *recall >= SLO_RECALL)
            .map(|(ef, (p95, recall, _))| (*ef, *p95, *recall))
            .collect();

        if valid_efs.is_empty() {
            if let Some(spot) = self.sweet_spots.get_mut(bucket_id) {
                spot.meets_slo = false;
            }
            return;
        }

        valid_efs.sort_by_key(|(ef, _, _)| *ef);
        let (sweet_ef, sweet_p95, sweet_recall) = valid_efs[0];
        let sweet_t = self.representative_t(bucket_id, sweet_ef);

        let age_s = now - self.last_update.get(bucket_id).copied().unwrap_or(now);
        self.sweet_spots.insert(
            bucket_id.to_string(),
            SweetSpot {
                ef: sweet_ef,
                t: sweet_t,
                meets_slo: true,
                age_s,
                ewma_p95: sweet_p95,
                ewma_recall: sweet_recall,
            },
        );

        tracing::debug!(bucket = bucket_id, sweet_ef, ewma_p95 = sweet_p95, ewma_recall = sweet_recall, "memory sweet spot updated");
    }

    fn representative_t(&self, bucket_id: &str, ef: i64) -> i64 {
        for sample in self.ring_buffer.iter().rev() {
            if sample.bucket_id == bucket_id && sample.ef == ef {
                return sample.t;
            }
        }
        500
    }

    /// Returns the cached sweet spot for `bucket_id`, or `None` if absent,
    /// not SLO-meeting, or stale per the TTL.
    pub fn query(&mut self, bucket_id: &str, now: f64) -> Option<SweetSpot> {
        let stale = self.is_stale(bucket_id, now, None);
        let spot = self.sweet_spots.get_mut(bucket_id)?;
        if stale {
            spot.meets_slo = false;
            return None;
        }
        if !spot.meets_slo {
            return None;
        }
        Some(*spot)
    }

    pub fn is_stale(&self, bucket_id: &str, now: f64, ttl_s: Option<f64>) -> bool {
        let ttl = ttl_s.unwrap_or(self.ttl_sec);
        match self.last_update.get(bucket_id) {
            None => true,
            Some(&last) => (now - last) > ttl,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(bucket: &str, ef: i64, p95: f64, recall: f64, ts: f64) -> MemorySample {
        MemorySample {
            bucket_id: bucket.to_string(),
            ef,
            t: 500,
            ncand_max: 1000,
            p95_ms: p95,
            recall_at10: recall,
            ts,
        }
    }

    #[test]
    fn bucket_thresholds_match_candidate_pool_size() {
        assert_eq!(Memory::default_bucket_of(500), "small_candidates");
        assert_eq!(Memory::default_bucket_of(1000), "medium_candidates");
        assert_eq!(Memory::default_bucket_of(1500), "large_candidates");
    }

    #[test]
    fn sweet_spot_picks_smallest_ef_meeting_slo() {
        let mut mem = Memory::new(MemoryConfig::default());
        mem.observe(sample("medium_candidates", 128, 150.0, 0.9, 0.0), 0.0);
        mem.observe(sample("medium_candidates", 96, 180.0, 0.88, 1.0), 1.0);
        mem.observe(sample("medium_candidates", 192, 210.0, 0.95, 2.0), 2.0);
        let spot = mem.query("medium_candidates", 2.0).unwrap();
        assert_eq!(spot.ef, 96);
    }

    #[test]
    fn sweet_spot_is_stale_after_ttl() {
        let mut mem = Memory::new(MemoryConfig {
            ring_size: 10,
            alpha: 0.2,
            ttl_sec: 100.0,
        });
        mem.observe(sample("small_candidates", 96, 150.0, 0.9, 0.0), 0.0);
        assert!(mem.query("small_candidates", 50.0).is_some());
        assert!(mem.query("small_candidates", 500.0).is_none());
    }

    #[test]
    fn no_observations_means_no_sweet_spot() {
        let mut mem = Memory::new(MemoryConfig::default());
        assert!(mem.query("small_candidates", 0.0).is_none());
    }
}
