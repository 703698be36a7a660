use pf_core::config::SchedulerConfig;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// SchedulePlan
// ---------------------------------------------------------------------------

/// Integer slot counts for one day of the horizon. `day` is an offset in
/// days from the start of the window (day 0 = tomorrow).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaySlots {
    pub day: u32,
    pub short: u32,
    pub long: u32,
}

/// Output of the planner: effective per-day rates, day-wise slot counts,
/// and supply flags. Purely arithmetic; materialization happens later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulePlan {
    pub horizon_days: u32,
    /// Effective posts/day actually planned for each form.
    pub rate_short: f64,
    pub rate_long: f64,
    pub total_short: u32,
    pub total_long: u32,
    /// Days carrying at least one slot, ascending.
    pub days: Vec<DaySlots>,
    /// Inventory exceeds what the max cadence can place in this horizon.
    pub can_extend_horizon: bool,
    /// Inventory cannot sustain the configured minimum cadence (runway
    /// warning; the plan still places everything it has).
    pub under_min_short: bool,
    pub under_min_long: bool,
}

impl SchedulePlan {
    pub fn is_empty(&self) -> bool {
        self.total_short == 0 && self.total_long == 0
    }
}

/// Compute the plan for the given inventory counts.
///
/// The per-day cadence is bounded above by `max_per_day_*`: at most
/// `round(max * D)` items of a form are placed. Whatever fits is spread
/// evenly across the horizon with fractional accumulators, which keeps day
/// 0 from swallowing the whole backlog and yields the familiar
/// every-`D/N`-days pattern. Shorts anchor the cadence starting tomorrow;
/// longs are phase-shifted by half their stride so they fall between the
/// short runs instead of stacking on the same days. Supply below
/// `min_per_day_*` cannot be fixed by planning harder; it is reported as a
/// runway flag instead.
pub fn compute_plan(n_short: u32, n_long: u32, config: &SchedulerConfig) -> SchedulePlan {
    let horizon_days = config.horizon_days().max(1);
    let d = horizon_days as f64;

    let cap_short = (config.max_per_day_short * d).round() as u32;
    let cap_long = (config.max_per_day_long * d).round() as u32;

    let total_short = n_short.min(cap_short);
    let total_long = n_long.min(cap_long);

    let short_by_day = spread(total_short, horizon_days, 0.0);
    let long_by_day = spread(total_long, horizon_days, 0.5);

    let mut days = Vec::new();
    for day in 0..horizon_days {
        let short = short_by_day[day as usize];
        let long = long_by_day[day as usize];
        if short > 0 || long > 0 {
            days.push(DaySlots { day, short, long });
        }
    }

    SchedulePlan {
        horizon_days,
        rate_short: total_short as f64 / d,
        rate_long: total_long as f64 / d,
        total_short,
        total_long,
        days,
        can_extend_horizon: n_short > cap_short || n_long > cap_long,
        under_min_short: (n_short as f64 / d) < config.min_per_day_short,
        under_min_long: (n_long as f64 / d) < config.min_per_day_long,
    }
}

/// Spread `total` slots over `days` days: slot `i` lands on day
/// `floor((i + phase) * days / total)`. Bresenham-style placement — the
/// cumulative error never exceeds one slot. Phase 0 starts the run on day
/// 0; phase 0.5 shifts it by half a stride, interleaving the run between
/// another form's slots.
fn spread(total: u32, days: u32, phase: f64) -> Vec<u32> {
    let mut by_day = vec![0u32; days as usize];
    if total == 0 {
        return by_day;
    }
    for i in 0..total {
        let day = ((i as f64 + phase) * days as f64 / total as f64) as u32;
        by_day[day.min(days - 1) as usize] += 1;
    }
    by_day
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(horizon_months: u32) -> SchedulerConfig {
        SchedulerConfig {
            horizon_months,
            ..SchedulerConfig::default()
        }
    }

    #[test]
    fn empty_inventory_gives_empty_plan() {
        let plan = compute_plan(0, 0, &config(2));
        assert!(plan.is_empty());
        assert!(plan.days.is_empty());
        assert!(!plan.can_extend_horizon);
        assert!(plan.under_min_short, "no supply is below the minimum cadence");
    }

    #[test]
    fn two_longs_land_mid_horizon() {
        // 2 long artifacts over a 30-day window: the half-stride phase puts
        // them a quarter and three quarters of the way in.
        let plan = compute_plan(0, 2, &config(1));
        let long_days: Vec<u32> = plan
            .days
            .iter()
            .filter(|d| d.long > 0)
            .map(|d| d.day)
            .collect();
        assert_eq!(long_days, vec![7, 22]);
        assert!((plan.rate_long - 2.0 / 30.0).abs() < 1e-9);
    }

    #[test]
    fn six_shorts_start_tomorrow_and_repeat_every_five_days() {
        let plan = compute_plan(6, 0, &config(1));
        let short_days: Vec<u32> = plan
            .days
            .iter()
            .filter(|d| d.short > 0)
            .map(|d| d.day)
            .collect();
        assert_eq!(short_days, vec![0, 5, 10, 15, 20, 25]);
        assert!((plan.rate_short - 0.2).abs() < 1e-9);
    }

    #[test]
    fn mixed_forms_interleave_without_stacking() {
        // The worked example: 6 shorts and 2 longs over a month. The first
        // short goes out tomorrow; the longs sit between the short runs.
        let plan = compute_plan(6, 2, &config(1));
        assert_eq!(plan.days[0].day, 0, "first slot is tomorrow");
        assert_eq!(plan.days[0].short, 1);

        let short_days: Vec<u32> = plan
            .days
            .iter()
            .filter(|d| d.short > 0)
            .map(|d| d.day)
            .collect();
        let long_days: Vec<u32> = plan
            .days
            .iter()
            .filter(|d| d.long > 0)
            .map(|d| d.day)
            .collect();
        assert_eq!(short_days, vec![0, 5, 10, 15, 20, 25]);
        assert_eq!(long_days, vec![7, 22]);
        // No day carries both forms in this shape.
        assert!(plan.days.iter().all(|d| d.short == 0 || d.long == 0));
    }

    #[test]
    fn totals_are_preserved() {
        for (n_short, n_long) in [(1, 1), (6, 2), (29, 5), (90, 30)] {
            let plan = compute_plan(n_short, n_long, &config(1));
            let placed_short: u32 = plan.days.iter().map(|d| d.short).sum();
            let placed_long: u32 = plan.days.iter().map(|d| d.long).sum();
            assert_eq!(placed_short, plan.total_short);
            assert_eq!(placed_long, plan.total_long);
        }
    }

    #[test]
    fn oversupply_is_capped_at_max_rate_and_flagged() {
        // 200 shorts cannot fit a 30-day window at 3/day.
        let plan = compute_plan(200, 0, &config(1));
        assert_eq!(plan.total_short, 90);
        assert!(plan.can_extend_horizon);
        assert!((plan.rate_short - 3.0).abs() < 1e-9);
    }

    #[test]
    fn cadence_upper_bound_holds_per_day() {
        let cfg = config(1);
        let plan = compute_plan(500, 100, &cfg);
        for day in &plan.days {
            assert!(day.short <= cfg.max_per_day_short.ceil() as u32);
            assert!(day.long <= cfg.max_per_day_long.ceil() as u32);
        }
    }

    #[test]
    fn sustained_supply_meets_minimum_cadence() {
        // 60 shorts over 30 days sustains 2/day, above the min of 1.
        let cfg = config(1);
        let plan = compute_plan(60, 0, &cfg);
        assert!(!plan.under_min_short);
        for day in 0..plan.horizon_days {
            let slots = plan
                .days
                .iter()
                .find(|d| d.day == day)
                .map(|d| d.short)
                .unwrap_or(0);
            assert!(slots >= cfg.min_per_day_short.floor() as u32);
        }
    }

    #[test]
    fn undersupply_sets_runway_flag() {
        let plan = compute_plan(3, 1, &config(2));
        assert!(plan.under_min_short);
        assert!(plan.under_min_long);
        assert!(!plan.can_extend_horizon);
    }
}
