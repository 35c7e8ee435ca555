//! Step boundaries of a sweep.

use fragbench_core::StepPercent;

use crate::error::{SweepError, SweepResult};

/// Reject parameters that cannot produce a meaningful sweep.
pub fn validate_plan(interval: u32, target: u32) -> SweepResult<()> {
    if interval == 0 {
        return Err(SweepError::InvalidPlan("interval must be positive".to_string()));
    }
    if target > 100 {
        return Err(SweepError::InvalidPlan(format!(
            "target {target}% exceeds 100%"
        )));
    }
    if target < interval {
        return Err(SweepError::InvalidPlan(format!(
            "target {target}% is below the interval {interval}%"
        )));
    }
    Ok(())
}

/// Yields multiples of the interval up to the target, always above the
/// occupancy measured after the previous step.
///
/// Steps strictly increase. When a fill overshoots one or more boundaries
/// those boundaries are skipped.
#[derive(Debug, Clone)]
pub struct StepPlanner {
    interval: u32,
    target: u32,
    next: u32,
}

impl StepPlanner {
    pub fn new(interval: u32, target: u32) -> SweepResult<Self> {
        validate_plan(interval, target)?;
        Ok(Self {
            interval,
            target,
            next: 1,
        })
    }

    /// The next step given the current occupancy, or `None` when done.
    pub fn next_step(&mut self, current: f64) -> Option<StepPercent> {
        let above = (current.max(0.0) / f64::from(self.interval)).floor() as u32 + 1;
        let index = self.next.max(above);
        let step = index.checked_mul(self.interval)?;
        if step > self.target {
            return None;
        }
        self.next = index + 1;
        Some(StepPercent(step))
    }
}

/// All steps of a sweep starting at `current`, assuming each fill lands
/// exactly on its boundary.
pub fn plan_steps(current: f64, interval: u32, target: u32) -> SweepResult<Vec<StepPercent>> {
    let mut planner = StepPlanner::new(interval, target)?;
    let mut steps = Vec::new();
    let mut occupancy = current;
    while let Some(step) = planner.next_step(occupancy) {
        occupancy = f64::from(step.0);
        steps.push(step);
    }
    Ok(steps)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn steps(values: &[u32]) -> Vec<StepPercent> {
        values.iter().copied().map(StepPercent).collect()
    }

    #[test]
    fn from_empty_device() {
        assert_eq!(plan_steps(0.0, 10, 30).unwrap(), steps(&[10, 20, 30]));
    }

    #[test]
    fn starts_above_current_occupancy() {
        assert_eq!(plan_steps(15.2, 10, 50).unwrap(), steps(&[20, 30, 40, 50]));
    }

    #[test]
    fn target_between_multiples() {
        assert_eq!(plan_steps(0.0, 10, 35).unwrap(), steps(&[10, 20, 30]));
    }

    #[test]
    fn already_past_target() {
        assert!(plan_steps(72.0, 10, 50).unwrap().is_empty());
    }

    #[test]
    fn overshoot_skips_boundaries() {
        let mut planner = StepPlanner::new(10, 50).unwrap();
        assert_eq!(planner.next_step(3.0), Some(StepPercent(10)));
        // The fill to 10% landed at 31%.
        assert_eq!(planner.next_step(31.0), Some(StepPercent(40)));
        assert_eq!(planner.next_step(40.1), Some(StepPercent(50)));
        assert_eq!(planner.next_step(50.0), None);
    }

    #[test]
    fn steps_never_repeat_when_occupancy_drops() {
        let mut planner = StepPlanner::new(10, 30).unwrap();
        assert_eq!(planner.next_step(0.0), Some(StepPercent(10)));
        assert_eq!(planner.next_step(2.0), Some(StepPercent(20)));
    }

    #[test]
    fn invalid_parameters() {
        assert!(matches!(plan_steps(0.0, 0, 30), Err(SweepError::InvalidPlan(_))));
        assert!(matches!(plan_steps(0.0, 10, 110), Err(SweepError::InvalidPlan(_))));
        assert!(matches!(plan_steps(0.0, 20, 10), Err(SweepError::InvalidPlan(_))));
    }
}
