//! Mergeable latency histogram
//!
//! Durations are bucketed on an exponential scale: bucket `n` covers durations
//! up to `1.1^n` microseconds. Anything at or below one microsecond lands in
//! bucket 0 and anything past the last boundary lands in the overflow bucket,
//! so recording never fails.
//!
//! Histograms built by independent workers are merged with
//! [`DurationHistogram::combine`], a pointwise sum that is commutative and
//! associative, so partial aggregates can be reduced in any order.

use std::iter::Sum;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Number of buckets, including the overflow bucket at the top
pub const BUCKET_COUNT: usize = 384;

/// Growth ratio between consecutive bucket boundaries
const BUCKET_RATIO: f64 = 1.1;

/// Duration of the first bucket boundary in nanoseconds
const BASE_DURATION_NS: f64 = 1000.0;

/// Approximate histogram of non-negative durations in nanoseconds
///
/// The bucket vector only grows as far as the highest bucket touched. Two
/// histograms are equal when their buckets match after trailing empty buckets
/// are ignored.
#[derive(Debug, Clone, Default)]
pub struct DurationHistogram {
    buckets: Vec<u64>,
}

impl DurationHistogram {
    /// Create an empty histogram
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a duration to its bucket index
    pub fn duration_to_bucket(duration_ns: u64) -> usize {
        let log = (duration_ns as f64 / BASE_DURATION_NS).ln();
        let unbounded = (log / BUCKET_RATIO.ln()).ceil();

        if unbounded.is_nan() || unbounded <= 0.0 {
            0
        } else if unbounded >= BUCKET_COUNT as f64 {
            BUCKET_COUNT - 1
        } else {
            unbounded as usize
        }
    }

    /// Record one observation of `duration_ns`
    pub fn increment_duration(&mut self, duration_ns: u64) -> &mut Self {
        self.increment_bucket(Self::duration_to_bucket(duration_ns), 1)
    }

    /// Add `count` observations directly to a bucket
    ///
    /// Out-of-range indices are clamped into the overflow bucket.
    pub fn increment_bucket(&mut self, bucket: usize, count: u64) -> &mut Self {
        if count == 0 {
            return self;
        }

        let bucket = bucket.min(BUCKET_COUNT - 1);
        if bucket >= self.buckets.len() {
            self.buckets.resize(bucket + 1, 0);
        }
        self.buckets[bucket] = self.buckets[bucket].saturating_add(count);
        self
    }

    /// Add every bucket of `other` into this histogram
    pub fn combine(&mut self, other: &DurationHistogram) -> &mut Self {
        if other.buckets.len() > self.buckets.len() {
            self.buckets.resize(other.buckets.len(), 0);
        }
        for (mine, theirs) in self.buckets.iter_mut().zip(&other.buckets) {
            *mine = mine.saturating_add(*theirs);
        }
        self
    }

    /// Bucket counts with trailing empty buckets removed
    pub fn buckets(&self) -> &[u64] {
        let len = self
            .buckets
            .iter()
            .rposition(|&count| count != 0)
            .map_or(0, |last| last + 1);
        &self.buckets[..len]
    }

    /// Total number of recorded observations
    pub fn total_count(&self) -> u64 {
        self.buckets
            .iter()
            .fold(0u64, |total, &count| total.saturating_add(count))
    }

    /// Whether nothing has been recorded
    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(|&count| count == 0)
    }

    /// Encode buckets as a compact array
    ///
    /// Trailing empty buckets are dropped and each run of two or more empty
    /// buckets is replaced by its negated length. A lone empty bucket stays `0`.
    pub fn to_compressed(&self) -> Vec<i64> {
        let mut output = Vec::new();
        let mut buffered_zeroes: i64 = 0;

        for &count in &self.buckets {
            if count == 0 {
                buffered_zeroes += 1;
                continue;
            }

            match buffered_zeroes {
                0 => {}
                1 => output.push(0),
                n => output.push(-n),
            }
            output.push(i64::try_from(count).unwrap_or(i64::MAX));
            buffered_zeroes = 0;
        }

        output
    }

    /// Decode the representation produced by [`Self::to_compressed`]
    pub fn from_compressed(values: &[i64]) -> Self {
        let mut histogram = Self::new();
        let mut bucket = 0usize;

        for &value in values {
            if value < 0 {
                bucket = bucket.saturating_add(value.unsigned_abs() as usize);
            } else {
                histogram.increment_bucket(bucket, value as u64);
                bucket = bucket.saturating_add(1);
            }
        }

        histogram
    }
}

impl PartialEq for DurationHistogram {
    fn eq(&self, other: &Self) -> bool {
        self.buckets() == other.buckets()
    }
}

impl Eq for DurationHistogram {}

impl Extend<u64> for DurationHistogram {
    fn extend<I: IntoIterator<Item = u64>>(&mut self, durations: I) {
        for duration_ns in durations {
            self.increment_duration(duration_ns);
        }
    }
}

impl FromIterator<u64> for DurationHistogram {
    fn from_iter<I: IntoIterator<Item = u64>>(durations: I) -> Self {
        let mut histogram = Self::new();
        histogram.extend(durations);
        histogram
    }
}

impl<'a> Sum<&'a DurationHistogram> for DurationHistogram {
    fn sum<I: Iterator<Item = &'a DurationHistogram>>(iter: I) -> Self {
        iter.fold(Self::new(), |mut total, histogram| {
            total.combine(histogram);
            total
        })
    }
}

impl Serialize for DurationHistogram {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_compressed().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for DurationHistogram {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let values = Vec::<i64>::deserialize(deserializer)?;
        Ok(Self::from_compressed(&values))
    }
}
