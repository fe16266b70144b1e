//! Routing strategies: turning a strategy into a traffic schedule.

use cutover_core::{RoutingStrategy, TrafficStep};

use crate::error::{CutoverError, CutoverResult};

/// Check strategy parameters without building a schedule.
pub fn validate(strategy: &RoutingStrategy) -> CutoverResult<()> {
    match *strategy {
        RoutingStrategy::Canary { percentage, .. } if !(1..=99).contains(&percentage) => {
            Err(CutoverError::Validation(format!(
                "canary percentage must be between 1 and 99, got {percentage}"
            )))
        }
        RoutingStrategy::Linear {
            step_percentage, ..
        } if !(1..=100).contains(&step_percentage) => Err(CutoverError::Validation(format!(
            "linear step percentage must be between 1 and 100, got {step_percentage}"
        ))),
        _ => Ok(()),
    }
}

/// Compute the ordered traffic schedule for a strategy.
///
/// Targets are non-decreasing and the last one is always 100. The final
/// step carries no hold; green is still evaluated once it has all the
/// traffic, before the cutover completes.
pub fn compute_schedule(strategy: &RoutingStrategy) -> CutoverResult<Vec<TrafficStep>> {
    validate(strategy)?;

    let steps = match *strategy {
        RoutingStrategy::Canary {
            percentage,
            bake_minutes,
        } => {
            let bake = minutes_to_secs(bake_minutes);
            vec![
                TrafficStep {
                    index: 0,
                    target: percentage,
                    offset_secs: 0,
                    hold_secs: bake,
                },
                TrafficStep {
                    index: 1,
                    target: 100,
                    offset_secs: bake,
                    hold_secs: 0,
                },
            ]
        }
        RoutingStrategy::Linear {
            step_percentage,
            interval_minutes,
        } => {
            let interval = minutes_to_secs(interval_minutes);
            let count = step_count(step_percentage);
            (0..count)
                .map(|i| {
                    let last = i + 1 == count;
                    let target = ((i + 1) * u32::from(step_percentage)).min(100) as u8;
                    TrafficStep {
                        index: i as usize,
                        target,
                        offset_secs: interval.saturating_mul(u64::from(i)),
                        hold_secs: if last { 0 } else { interval },
                    }
                })
                .collect()
        }
        RoutingStrategy::AllAtOnce => vec![TrafficStep {
            index: 0,
            target: 100,
            offset_secs: 0,
            hold_secs: 0,
        }],
    };

    Ok(steps)
}

/// Number of linear steps needed to reach 100%.
fn step_count(step_percentage: u8) -> u32 {
    if step_percentage == 0 {
        return 1;
    }
    100u32.div_ceil(u32::from(step_percentage))
}

fn minutes_to_secs(minutes: u64) -> u64 {
    minutes.saturating_mul(60)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn targets(steps: &[TrafficStep]) -> Vec<u8> {
        steps.iter().map(|s| s.target).collect()
    }

    #[test]
    fn canary_shifts_then_completes() {
        let steps = compute_schedule(&RoutingStrategy::Canary {
            percentage: 10,
            bake_minutes: 5,
        })
        .unwrap();

        assert_eq!(targets(&steps), vec![10, 100]);
        assert_eq!(steps[0].hold_secs, 300);
        assert_eq!(steps[1].offset_secs, 300);
        assert_eq!(steps[1].hold_secs, 0);
    }

    #[test]
    fn linear_even_steps() {
        let steps = compute_schedule(&RoutingStrategy::Linear {
            step_percentage: 25,
            interval_minutes: 2,
        })
        .unwrap();

        assert_eq!(targets(&steps), vec![25, 50, 75, 100]);
        let offsets: Vec<u64> = steps.iter().map(|s| s.offset_secs).collect();
        assert_eq!(offsets, vec![0, 120, 240, 360]);
        assert_eq!(steps.last().unwrap().hold_secs, 0);
    }

    #[test]
    fn linear_uneven_last_step_clamps_to_100() {
        let steps = compute_schedule(&RoutingStrategy::Linear {
            step_percentage: 30,
            interval_minutes: 1,
        })
        .unwrap();
        assert_eq!(targets(&steps), vec![30, 60, 90, 100]);
    }

    #[test]
    fn linear_properties_hold_for_every_step_size() {
        for p in 1..=100u8 {
            let steps = compute_schedule(&RoutingStrategy::Linear {
                step_percentage: p,
                interval_minutes: 1,
            })
            .unwrap();

            assert_eq!(steps.len() as u32, 100u32.div_ceil(u32::from(p)), "p={p}");
            assert_eq!(steps.last().unwrap().target, 100, "p={p}");
            assert!(
                steps.windows(2).all(|w| w[0].target <= w[1].target),
                "targets not monotonic for p={p}"
            );
            assert!(
                steps.iter().enumerate().all(|(i, s)| s.index == i),
                "indices out of order for p={p}"
            );
        }
    }

    #[test]
    fn all_at_once_is_single_immediate_step() {
        let steps = compute_schedule(&RoutingStrategy::AllAtOnce).unwrap();
        assert_eq!(
            steps,
            vec![TrafficStep {
                index: 0,
                target: 100,
                offset_secs: 0,
                hold_secs: 0,
            }]
        );
    }

    #[test]
    fn invalid_parameters_rejected() {
        for strategy in [
            RoutingStrategy::Canary {
                percentage: 0,
                bake_minutes: 5,
            },
            RoutingStrategy::Canary {
                percentage: 100,
                bake_minutes: 5,
            },
            RoutingStrategy::Linear {
                step_percentage: 0,
                interval_minutes: 1,
            },
            RoutingStrategy::Linear {
                step_percentage: 101,
                interval_minutes: 1,
            },
        ] {
            let err = compute_schedule(&strategy).unwrap_err();
            assert!(matches!(err, CutoverError::Validation(_)), "{strategy:?}");
        }
    }

    #[test]
    fn step_count_calculation() {
        assert_eq!(step_count(10), 10);
        assert_eq!(step_count(33), 4);
        assert_eq!(step_count(100), 1);
        assert_eq!(step_count(0), 1);
    }
}
