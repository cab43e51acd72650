use ahash::HashMap;
use std::{
    fmt,
    ops::{AddAssign, Index, IndexMut},
};

/// Running average that ignores NaN samples, so an empty reduction upstream
/// (e.g. a rollout segment with no completed episode) never poisons the
/// aggregate.
#[derive(Debug, Clone, Copy, Default)]
pub struct AvgTracker {
    total: f64,
    count: u64,
}

impl AvgTracker {
    pub fn new(total: f64, count: u64) -> Self {
        Self { total, count }
    }

    pub fn get(&self) -> f64 {
        if self.count > 0 {
            self.total / self.count as f64
        } else {
            f64::NAN
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn reset(&mut self) {
        self.total = 0.0;
        self.count = 0;
    }
}

impl AddAssign<f64> for AvgTracker {
    fn add_assign(&mut self, val: f64) {
        if !val.is_nan() {
            self.total += val;
            self.count += 1;
        }
    }
}

impl AddAssign<AvgTracker> for AvgTracker {
    fn add_assign(&mut self, other: AvgTracker) {
        if !other.total.is_nan() {
            self.total += other.total;
            self.count += other.count;
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Reportable {
    Val(f64),
    Avg(AvgTracker),
}

macro_rules! reportable_from_primitive {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Reportable {
                fn from(val: $t) -> Self {
                    Reportable::Val(val as f64)
                }
            }
        )*
    };
}

reportable_from_primitive!(usize, u32, u64, i32, i64, f32);

impl From<f64> for Reportable {
    fn from(val: f64) -> Self {
        Reportable::Val(val)
    }
}

impl From<AvgTracker> for Reportable {
    fn from(val: AvgTracker) -> Self {
        Reportable::Avg(val)
    }
}

impl Default for Reportable {
    fn default() -> Self {
        Reportable::Val(0.0)
    }
}

impl AddAssign<Reportable> for Reportable {
    fn add_assign(&mut self, other: Reportable) {
        match (self, other) {
            (Reportable::Val(a), Reportable::Val(b)) => *a += b,
            (Reportable::Avg(a), Reportable::Avg(b)) => *a += b,
            (a, b) => *a = b,
        }
    }
}

impl Reportable {
    /// Scalar view of the entry, whichever flavor it holds.
    pub fn value(&self) -> f64 {
        match self {
            Reportable::Val(val) => *val,
            Reportable::Avg(avg) => avg.get(),
        }
    }
}

/// Key-value metrics for one epoch. Entries are created on first
/// index-assignment; a key that was never written simply does not exist,
/// which is how "nothing to log" is represented.
#[derive(Debug, Default)]
pub struct Report {
    data: HashMap<String, Reportable>,
}

impl Report {
    pub fn get(&self, key: &str) -> Option<&Reportable> {
        self.data.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Reportable)> {
        self.data.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn remove(&mut self, key: &str) {
        self.data.remove(key);
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "--------------------Epoch report--------------------")?;
        let mut items: Vec<_> = self.data.iter().collect();
        items.sort_unstable_by(|a, b| a.0.cmp(b.0));

        for (key, val) in items {
            writeln!(f, "\t{}: {:.6}", key, val.value())?;
        }
        Ok(())
    }
}

impl Index<&str> for Report {
    type Output = Reportable;

    fn index(&self, key: &str) -> &Self::Output {
        &self.data[key]
    }
}

impl IndexMut<&str> for Report {
    fn index_mut(&mut self, key: &str) -> &mut Self::Output {
        self.data.entry(key.to_string()).or_default()
    }
}

impl AddAssign<&Report> for Report {
    fn add_assign(&mut self, other: &Report) {
        for (key, val) in other.data.iter() {
            self[key] += *val;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn avg_tracker_skips_nan() {
        let mut avg = AvgTracker::default();
        avg += 2.0;
        avg += f64::NAN;
        avg += 4.0;
        assert_eq!(avg.count(), 2);
        assert_eq!(avg.get(), 3.0);
    }

    #[test]
    fn empty_tracker_reports_nan() {
        assert!(AvgTracker::default().get().is_nan());
    }

    #[test]
    fn unwritten_key_is_absent() {
        let mut report = Report::default();
        report["written"] += 1.0.into();
        assert!(report.contains("written"));
        assert!(report.get("never written").is_none());
    }

    #[test]
    fn avg_entries_merge() {
        let mut report = Report::default();
        report["reward"] += AvgTracker::new(1.0, 1).into();
        report["reward"] += AvgTracker::new(3.0, 1).into();
        assert_eq!(report["reward"].value(), 2.0);
    }
}
