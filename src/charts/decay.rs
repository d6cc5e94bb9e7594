//! Recency weights applied to a day's valid listens when scoring.

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct DecayStep {
    /// Days before the scoring date; 0 is the scoring date itself.
    pub day_offset: u32,
    pub weight: f64,
}

#[derive(Debug, Error, PartialEq)]
pub enum DecayScheduleError {
    #[error("decay schedule must contain at least one step")]
    Empty,
    #[error("day offset {0} appears more than once in the decay schedule")]
    DuplicateOffset(u32),
    #[error("weight {weight} for day offset {day_offset} is outside [0, 1]")]
    InvalidWeight { day_offset: u32, weight: f64 },
}

/// Ordered `(day_offset, weight)` pairs. Offsets missing from the schedule
/// weigh 0.
#[derive(Debug, Clone, PartialEq)]
pub struct DecaySchedule {
    steps: Vec<DecayStep>,
}

impl DecaySchedule {
    pub fn new(mut steps: Vec<DecayStep>) -> Result<Self, DecayScheduleError> {
        if steps.is_empty() {
            return Err(DecayScheduleError::Empty);
        }
        steps.sort_by_key(|s| s.day_offset);
        for pair in steps.windows(2) {
            if pair[0].day_offset == pair[1].day_offset {
                return Err(DecayScheduleError::DuplicateOffset(pair[0].day_offset));
            }
        }
        if let Some(bad) = steps.iter().find(|s| !(0.0..=1.0).contains(&s.weight)) {
            return Err(DecayScheduleError::InvalidWeight {
                day_offset: bad.day_offset,
                weight: bad.weight,
            });
        }
        Ok(Self { steps })
    }

    pub fn weight(&self, day_offset: u32) -> f64 {
        self.steps
            .binary_search_by_key(&day_offset, |s| s.day_offset)
            .map(|i| self.steps[i].weight)
            .unwrap_or(0.0)
    }

    /// Number of days, counting the scoring date, that can carry weight.
    pub fn span_days(&self) -> u32 {
        self.steps.last().map_or(0, |s| s.day_offset + 1)
    }

    pub fn steps(&self) -> &[DecayStep] {
        &self.steps
    }
}

impl Default for DecaySchedule {
    fn default() -> Self {
        Self {
            steps: [(0, 1.0), (1, 0.7), (2, 0.5), (3, 0.3), (4, 0.1)]
                .into_iter()
                .map(|(day_offset, weight)| DecayStep { day_offset, weight })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(day_offset: u32, weight: f64) -> DecayStep {
        DecayStep { day_offset, weight }
    }

    #[test]
    fn test_default_schedule_weights() {
        let schedule = DecaySchedule::default();
        assert_eq!(schedule.weight(0), 1.0);
        assert_eq!(schedule.weight(1), 0.7);
        assert_eq!(schedule.weight(2), 0.5);
        assert_eq!(schedule.weight(3), 0.3);
        assert_eq!(schedule.weight(4), 0.1);
        assert_eq!(schedule.weight(5), 0.0);
        assert_eq!(schedule.span_days(), 5);
    }

    #[test]
    fn test_steps_are_sorted_and_gaps_weigh_zero() {
        let schedule = DecaySchedule::new(vec![step(3, 0.2), step(0, 1.0)]).unwrap();
        assert_eq!(schedule.steps()[0].day_offset, 0);
        assert_eq!(schedule.weight(1), 0.0);
        assert_eq!(schedule.weight(3), 0.2);
        assert_eq!(schedule.span_days(), 4);
    }

    #[test]
    fn test_rejects_invalid_schedules() {
        assert_eq!(DecaySchedule::new(vec![]), Err(DecayScheduleError::Empty));
        assert_eq!(
            DecaySchedule::new(vec![step(1, 0.5), step(1, 0.4)]),
            Err(DecayScheduleError::DuplicateOffset(1))
        );
        assert!(matches!(
            DecaySchedule::new(vec![step(0, 1.5)]),
            Err(DecayScheduleError::InvalidWeight { day_offset: 0, .. })
        ));
    }
}
