use std::fmt::Display;

/// Running summary of integer samples.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Stats {
    pub count: usize,
    pub min: usize,
    pub max: usize,
    pub sum: u64,
}

impl Stats {
    pub fn new_single(v: usize) -> Self {
        Stats {
            count: 1,
            min: v,
            max: v,
            sum: v as u64,
        }
    }

    pub fn add_sample(&mut self, value: usize) {
        self.count += 1;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.sum += value as u64;
    }

    pub fn add_samples(&mut self, values: impl IntoIterator<Item = usize>) {
        for v in values {
            self.add_sample(v);
        }
    }

    pub fn merge(&self, other: &Self) -> Self {
        Stats {
            count: self.count + other.count,
            min: self.min.min(other.min),
            max: self.max.max(other.max),
            sum: self.sum + other.sum,
        }
    }

    pub fn avg(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum as f64 / self.count as f64
        }
    }
}

impl Default for Stats {
    fn default() -> Self {
        Stats {
            count: 0,
            min: usize::MAX,
            max: 0,
            sum: 0,
        }
    }
}

impl Display for Stats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} - {}; avg {:.1}; {} samples",
            self.min,
            self.max,
            self.avg(),
            self.count
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert2::assert;

    #[test]
    fn new_single() {
        let s = Stats::new_single(10);
        assert!(s.count == 1);
        assert!(s.min == 10);
        assert!(s.max == 10);
        assert!(s.avg() == 10.0);
    }

    #[test]
    fn add_sample() {
        let mut s = Stats::default();
        s.add_sample(20);
        s.add_sample(40);
        assert!(s.count == 2);
        assert!(s.min == 20);
        assert!(s.max == 40);
        assert!(s.avg() == 30.0);
    }

    #[test]
    fn merge_stats() {
        let a = Stats::new_single(10);
        let mut b = Stats::new_single(30);
        b.add_sample(50);
        let m = a.merge(&b);
        assert!(m.count == 3);
        assert!(m.min == 10);
        assert!(m.max == 50);
        assert!(m.avg() == 30.0);
    }

    #[test]
    fn merge_with_default() {
        let default = Stats::default();
        let s = Stats::new_single(5);
        let merged = default.merge(&s);

        assert!(merged == s);
    }

    #[test]
    fn empty_has_zero_avg() {
        assert!(Stats::default().avg() == 0.0);
    }

    #[test]
    fn display_format() {
        let s = Stats::new_single(42);
        let output = format!("{}", s);
        assert!(output.contains("42 - 42"));
        assert!(output.contains("avg 42.0"));
        assert!(output.contains("1 samples"));
    }
}
