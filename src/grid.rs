use crate::config::setting_list;
use crate::models::{StrategyRun, TrailingReference};
use crate::param_utils::{
    exit_policy_from_parameters, R_MULTIPLE, TIME_EXIT_DAYS, TRIGGER_R_MULTIPLE,
};
use anyhow::{anyhow, Context, Result};
use std::collections::{BTreeSet, HashMap};

const DEFAULT_R_MULTIPLES: [f64; 3] = [2.0, 3.0, 4.0];
const DEFAULT_TIME_EXIT_DAYS: [Option<usize>; 4] = [Some(10), Some(20), Some(30), None];
const DEFAULT_TRIGGER_R_MULTIPLES: [f64; 2] = [1.5, 2.0];
const DEFAULT_TRAILING_PERIODS: [usize; 2] = [20, 50];

/// Pattern × exit-policy parameter grid.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyGrid {
    pub patterns: Vec<String>,
    pub r_multiples: Vec<f64>,
    pub time_exit_days: Vec<Option<usize>>,
    pub trigger_r_multiples: Vec<f64>,
    pub trailing_references: Vec<TrailingReference>,
}

impl StrategyGrid {
    pub fn with_defaults(patterns: Vec<String>) -> Self {
        Self {
            patterns,
            r_multiples: DEFAULT_R_MULTIPLES.to_vec(),
            time_exit_days: DEFAULT_TIME_EXIT_DAYS.to_vec(),
            trigger_r_multiples: DEFAULT_TRIGGER_R_MULTIPLES.to_vec(),
            trailing_references: DEFAULT_TRAILING_PERIODS
                .iter()
                .map(|p| TrailingReference::MovingAverage(*p))
                .collect(),
        }
    }

    /// Read `GRID_*` settings, falling back to the default grid. Without
    /// `GRID_PATTERNS` every pattern present in the signal set is used.
    pub fn from_settings(
        settings: &HashMap<String, String>,
        available_patterns: &BTreeSet<String>,
    ) -> Result<Self> {
        let patterns = setting_list(settings, "GRID_PATTERNS")
            .map(|list| list.into_iter().map(|p| p.to_ascii_lowercase()).collect())
            .unwrap_or_else(|| available_patterns.iter().cloned().collect());
        let mut grid = Self::with_defaults(patterns);

        if let Some(values) = setting_list(settings, "GRID_R_MULTIPLES") {
            grid.r_multiples = parse_numbers(&values, "GRID_R_MULTIPLES")?;
        }
        if let Some(values) = setting_list(settings, "GRID_TIME_EXIT_DAYS") {
            grid.time_exit_days = values
                .iter()
                .map(|value| parse_time_exit(value))
                .collect::<Result<Vec<_>>>()
                .context("Invalid GRID_TIME_EXIT_DAYS")?;
        }
        if let Some(values) = setting_list(settings, "GRID_TRIGGER_R_MULTIPLES") {
            grid.trigger_r_multiples = parse_numbers(&values, "GRID_TRIGGER_R_MULTIPLES")?;
        }
        if let Some(values) = setting_list(settings, "GRID_TRAILING_REFERENCES") {
            grid.trailing_references = values
                .iter()
                .map(|value| value.parse::<TrailingReference>())
                .collect::<Result<Vec<_>>>()
                .context("Invalid GRID_TRAILING_REFERENCES")?;
        }

        Ok(grid)
    }

    /// Keep only the listed patterns (case-insensitive).
    pub fn restrict_patterns(&mut self, allowed: &[String]) {
        let allowed: BTreeSet<String> = allowed.iter().map(|p| p.to_ascii_lowercase()).collect();
        self.patterns.retain(|p| allowed.contains(&p.to_ascii_lowercase()));
    }

    /// Expand into runs: per pattern, every fixed-target combination followed
    /// by every trailing-stop combination.
    pub fn runs(&self) -> Result<Vec<StrategyRun>> {
        let mut runs = Vec::new();
        for pattern in &self.patterns {
            for r_multiple in &self.r_multiples {
                for time_exit in &self.time_exit_days {
                    let mut params = HashMap::new();
                    params.insert(R_MULTIPLE.to_string(), *r_multiple);
                    if let Some(days) = time_exit {
                        params.insert(TIME_EXIT_DAYS.to_string(), *days as f64);
                    }
                    let policy = exit_policy_from_parameters("fixed", &params, None)?;
                    runs.push(StrategyRun::new(pattern, policy));
                }
            }
            for trigger in &self.trigger_r_multiples {
                for reference in &self.trailing_references {
                    let mut params = HashMap::new();
                    params.insert(TRIGGER_R_MULTIPLE.to_string(), *trigger);
                    let policy =
                        exit_policy_from_parameters("trailing", &params, Some(reference.clone()))?;
                    runs.push(StrategyRun::new(pattern, policy));
                }
            }
        }
        Ok(runs)
    }
}

fn parse_numbers(values: &[String], key: &str) -> Result<Vec<f64>> {
    values
        .iter()
        .map(|value| {
            value
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| anyhow!("Setting {} must be a list of numbers (value: {})", key, value))
        })
        .collect()
}

fn parse_time_exit(value: &str) -> Result<Option<usize>> {
    match value.to_ascii_lowercase().as_str() {
        "none" | "null" | "inf" | "0" => Ok(None),
        other => other
            .parse::<usize>()
            .map(Some)
            .map_err(|_| anyhow!("Time exit must be a day count or none (value: {})", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExitPolicyConfig;

    fn patterns(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn default_grid_has_sixteen_runs_per_pattern() {
        let grid = StrategyGrid::from_settings(&HashMap::new(), &patterns(&["cup", "htf", "vcp"]))
            .unwrap();
        let runs = grid.runs().unwrap();
        assert_eq!(runs.len(), 48);
        assert_eq!(runs[0].id, "cup_fixed_r2_t10");
        assert_eq!(runs[3].exit_policy, ExitPolicyConfig::fixed_target(2.0, None));
        assert_eq!(runs[12].id, "cup_trailing_trig1.5_ma20");
        assert_eq!(runs[16].pattern, "htf");

        let ids: BTreeSet<&str> = runs.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids.len(), runs.len());
    }

    #[test]
    fn settings_override_grid_axes() {
        let mut settings = HashMap::new();
        settings.insert("GRID_PATTERNS".to_string(), "VCP".to_string());
        settings.insert("GRID_R_MULTIPLES".to_string(), "1.5, 2.5".to_string());
        settings.insert("GRID_TIME_EXIT_DAYS".to_string(), "5 none".to_string());
        settings.insert("GRID_TRIGGER_R_MULTIPLES".to_string(), "3".to_string());
        settings.insert("GRID_TRAILING_REFERENCES".to_string(), "ma10,ema21".to_string());

        let grid = StrategyGrid::from_settings(&settings, &patterns(&["cup"])).unwrap();
        assert_eq!(grid.patterns, vec!["vcp"]);
        assert_eq!(grid.time_exit_days, vec![Some(5), None]);
        assert_eq!(
            grid.trailing_references,
            vec![
                TrailingReference::MovingAverage(10),
                TrailingReference::Named("ema21".to_string())
            ]
        );
        assert_eq!(grid.runs().unwrap().len(), 2 * 2 + 2);
    }

    #[test]
    fn invalid_axis_values_are_rejected() {
        let mut settings = HashMap::new();
        settings.insert("GRID_R_MULTIPLES".to_string(), "two".to_string());
        assert!(StrategyGrid::from_settings(&settings, &patterns(&["vcp"])).is_err());

        let mut settings = HashMap::new();
        settings.insert("GRID_R_MULTIPLES".to_string(), "-1".to_string());
        let grid = StrategyGrid::from_settings(&settings, &patterns(&["vcp"])).unwrap();
        assert!(grid.runs().is_err());
    }

    #[test]
    fn restricts_patterns() {
        let mut grid = StrategyGrid::with_defaults(vec!["cup".into(), "vcp".into()]);
        grid.restrict_patterns(&["VCP".to_string()]);
        assert_eq!(grid.patterns, vec!["vcp"]);
    }
}
