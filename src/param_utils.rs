use crate::errors::SimulationError;
use crate::models::{ExitPolicyConfig, TrailingReference};
use std::collections::HashMap;

pub const R_MULTIPLE: &str = "rMultiple";
pub const TIME_EXIT_DAYS: &str = "timeExitDays";
pub const TRIGGER_R_MULTIPLE: &str = "triggerRMultiple";
pub const BREAKEVEN_ON_TRIGGER: &str = "breakevenOnTrigger";
pub const LADDER: &str = "ladder";

/// Get a parameter value with a default fallback
pub fn get_param(params: &HashMap<String, f64>, key: &str, default: f64) -> f64 {
    params.get(key).copied().unwrap_or(default)
}

/// Get a finite parameter value, returns None if not found or not finite
pub fn finite_param(params: &HashMap<String, f64>, key: &str) -> Option<f64> {
    params.get(key).copied().filter(|v| v.is_finite())
}

pub fn coerce_binary_param(value: f64, default: f64) -> f64 {
    if !value.is_finite() {
        return default;
    }

    if value >= 0.5 {
        1.0
    } else {
        0.0
    }
}

pub fn get_flag_param(params: &HashMap<String, f64>, key: &str) -> bool {
    coerce_binary_param(get_param(params, key, 0.0), 0.0) >= 0.5
}

/// Rounded positive day count; zero, negative or missing values mean "no limit".
pub fn optional_day_count(params: &HashMap<String, f64>, key: &str) -> Option<usize> {
    finite_param(params, key)
        .map(|v| v.round())
        .filter(|v| *v >= 1.0)
        .map(|v| v as usize)
}

/// Build an exit policy from a mode name and its numeric parameters.
///
/// Recognized modes are `fixed` (aliases `fixed_target`, `fixed-target`) and
/// `trailing` (aliases `trailing_stop`, `trailing-stop`). Missing parameters use
/// the defaults of the standard grid: 2R target without time limit, 1.5R trigger.
pub fn exit_policy_from_parameters(
    mode: &str,
    params: &HashMap<String, f64>,
    reference: Option<TrailingReference>,
) -> Result<ExitPolicyConfig, SimulationError> {
    let policy = match mode.trim().to_ascii_lowercase().as_str() {
        "fixed" | "fixed_target" | "fixed-target" => ExitPolicyConfig::FixedTarget {
            r_multiple: get_param(params, R_MULTIPLE, 2.0),
            time_exit_days: optional_day_count(params, TIME_EXIT_DAYS),
        },
        "trailing" | "trailing_stop" | "trailing-stop" => ExitPolicyConfig::TrailingStop {
            trigger_r_multiple: get_param(params, TRIGGER_R_MULTIPLE, 1.5),
            trailing_reference: reference.unwrap_or(TrailingReference::MovingAverage(20)),
            breakeven_on_trigger: get_flag_param(params, BREAKEVEN_ON_TRIGGER),
            ladder: get_flag_param(params, LADDER),
        },
        other => return Err(SimulationError::UnknownExitPolicy(other.to_string())),
    };
    policy.validate()?;
    Ok(policy)
}
