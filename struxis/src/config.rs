use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::base_range::BaseConfig;
use crate::big_move::MoveConfig;
use crate::confluence::ConfluenceConfig;
use crate::error::StructureError;
use crate::swing::SwingConfig;
use crate::zone::ZoneConfig;
use crate::zone_state::StateConfig;

#[derive(Debug, Clone)]
pub struct FractalConfig {
    pub pivot_n: usize,
    pub atr_period: usize,
}

impl Default for FractalConfig {
    fn default() -> Self {
        Self {
            pivot_n: 5,
            atr_period: 14,
        }
    }
}

/// Full analyzer configuration, resolved once at facade construction and
/// never mutated at runtime.
#[derive(Debug, Clone, Default)]
pub struct AnalyzerConfig {
    pub fractal: FractalConfig,
    pub swing: SwingConfig,
    pub base: BaseConfig,
    pub r#move: MoveConfig,
    pub zone: ZoneConfig,
    pub state: StateConfig,
    pub confluence: ConfluenceConfig,
}

impl AnalyzerConfig {
    pub fn validate(&self) -> Result<(), StructureError> {
        if self.fractal.pivot_n < 3 || self.fractal.pivot_n % 2 == 0 {
            return Err(StructureError::ConfigurationError(format!(
                "fractal.pivot_n must be odd and >= 3, got {}",
                self.fractal.pivot_n
            )));
        }
        if self.base.max_base < self.base.min_base {
            return Err(StructureError::ConfigurationError(
                "base.max_base must be >= base.min_base".into(),
            ));
        }
        self.state.validate()?;
        let weight_sum =
            self.confluence.weight_strength + self.confluence.weight_freshness + self.confluence.weight_history;
        if (weight_sum - 1.0).abs() > 1e-6 {
            return Err(StructureError::ConfigurationError(format!(
                "confluence weights must sum to 1, got {weight_sum}"
            )));
        }
        Ok(())
    }
}

/// All-`Option<T>` mirror of the per-component config groups, merged over
/// `AnalyzerConfig::default()` to express partial overrides. Resolution
/// order for a given (symbol, timeframe): exact key, then the symbol's
/// wildcard ("*") entry, then the default unmodified.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigPatch {
    pub pivot_n: Option<usize>,
    pub atr_period: Option<usize>,
    pub lookback_bars: Option<u64>,
    pub min_swing_points: Option<f64>,
    pub invalidation_buffer_atr: Option<f64>,
    pub consolidation_threshold: Option<f64>,
    pub body_size_threshold: Option<f64>,
    pub min_base: Option<usize>,
    pub max_base: Option<usize>,
    pub move_threshold: Option<f64>,
    pub min_move_candles: Option<usize>,
    pub momentum_threshold: Option<f64>,
    pub volume_multiplier: Option<f64>,
    pub require_breakout: Option<bool>,
    pub overlap_tolerance: Option<f64>,
    pub max_zones_per_timeframe: Option<usize>,
    pub zone_expiry_hours: Option<f64>,
    pub test_penetration_threshold: Option<f64>,
    pub break_threshold: Option<f64>,
    pub flip_confirmation_bars: Option<usize>,
    pub reaction_window: Option<usize>,
    pub reaction_strength_threshold: Option<f64>,
    pub proximity_threshold_pips: Option<f64>,
    pub cache_timeout_minutes: Option<u64>,
    pub pip_size: Option<f64>,
}

impl ConfigPatch {
    pub fn apply_to(&self, base: &mut AnalyzerConfig) {
        macro_rules! patch {
            ($field:expr, $patch:expr) => {
                if let Some(v) = $patch {
                    $field = v;
                }
            };
        }
        patch!(base.fractal.pivot_n, self.pivot_n);
        patch!(base.fractal.atr_period, self.atr_period);
        patch!(base.swing.lookback_bars, self.lookback_bars);
        patch!(base.swing.min_swing_points, self.min_swing_points);
        patch!(base.swing.invalidation_buffer_atr, self.invalidation_buffer_atr);
        patch!(base.base.consolidation_threshold, self.consolidation_threshold);
        patch!(base.base.body_size_threshold, self.body_size_threshold);
        patch!(base.base.min_base, self.min_base);
        patch!(base.base.max_base, self.max_base);
        patch!(base.r#move.move_threshold, self.move_threshold);
        patch!(base.r#move.min_move_candles, self.min_move_candles);
        patch!(base.r#move.momentum_threshold, self.momentum_threshold);
        patch!(base.r#move.volume_multiplier, self.volume_multiplier);
        patch!(base.r#move.require_breakout, self.require_breakout);
        patch!(base.zone.overlap_tolerance, self.overlap_tolerance);
        patch!(base.zone.max_zones_per_timeframe, self.max_zones_per_timeframe);
        patch!(base.zone.zone_expiry_hours, self.zone_expiry_hours);
        patch!(base.state.test_penetration_threshold, self.test_penetration_threshold);
        patch!(base.state.break_threshold, self.break_threshold);
        patch!(base.state.flip_confirmation_bars, self.flip_confirmation_bars);
        patch!(base.state.reaction_window, self.reaction_window);
        patch!(
            base.state.reaction_strength_threshold,
            self.reaction_strength_threshold
        );
        patch!(base.confluence.proximity_threshold_pips, self.proximity_threshold_pips);
        patch!(base.confluence.cache_timeout_minutes, self.cache_timeout_minutes);
        patch!(base.confluence.pip_size, self.pip_size);
    }
}

/// Resolves per-(symbol, timeframe) overrides over a shared default,
/// following this corpus's profile-override convention: exact key, then
/// symbol wildcard, then default.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnalyzerProfile {
    pub default: ConfigPatch,
    #[serde(default)]
    pub overrides: std::collections::HashMap<String, ConfigPatch>,
}

impl AnalyzerProfile {
    /// Deserializes a profile from a YAML document (the wrapper's config
    /// loader, not the core, is expected to own *finding* the file — see
    /// spec.md §1's "configuration loading" non-goal).
    pub fn from_yaml_str(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let raw = fs::read_to_string(path)?;
        Ok(Self::from_yaml_str(&raw)?)
    }

    pub fn resolve_for(&self, symbol: &str, timeframe: &str) -> Result<AnalyzerConfig, StructureError> {
        let mut config = AnalyzerConfig::default();
        self.default.apply_to(&mut config);

        let exact_key = format!("{symbol}:{timeframe}");
        let symbol_wildcard = format!("{symbol}:*");

        if let Some(patch) = self.overrides.get(&symbol_wildcard) {
            patch.apply_to(&mut config);
        }
        if let Some(patch) = self.overrides.get(&exact_key) {
            patch.apply_to(&mut config);
        }

        config.validate()?;
        Ok(config)
    }
}
