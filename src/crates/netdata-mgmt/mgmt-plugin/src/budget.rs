//! Time budget of a collection cycle.

use std::time::{Duration, Instant};

/// Time a collector may spend on one cycle before postponing the remaining
/// queries to the next one.
#[derive(Debug)]
pub struct CycleBudget {
    budget: Duration,
    deadline: Instant,
}

impl CycleBudget {
    pub fn new(budget: Duration) -> Self {
        Self {
            budget,
            deadline: Instant::now() + budget,
        }
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Start a new cycle with the full budget.
    pub fn restart(&mut self) {
        self.deadline = Instant::now() + self.budget;
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Zero once exhausted.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn fresh_budget_is_available() {
        let budget = CycleBudget::new(Duration::from_secs(10));
        assert!(!budget.is_exhausted());
        assert!(budget.remaining() > Duration::from_secs(9));
        assert_eq!(budget.budget(), Duration::from_secs(10));
    }

    #[test]
    fn budget_runs_out() {
        let budget = CycleBudget::new(Duration::from_micros(1));
        thread::sleep(Duration::from_millis(10));
        assert!(budget.is_exhausted());
        assert_eq!(budget.remaining(), Duration::ZERO);
    }

    #[test]
    fn restart_gives_the_full_budget_again() {
        let mut budget = CycleBudget::new(Duration::from_millis(100));
        thread::sleep(Duration::from_millis(60));
        assert!(budget.remaining() < Duration::from_millis(50));

        budget.restart();
        assert!(budget.remaining() > Duration::from_millis(50));
    }

    #[test]
    fn zero_budget_is_always_exhausted() {
        let mut budget = CycleBudget::new(Duration::ZERO);
        budget.restart();
        assert!(budget.is_exhausted());
    }
}
