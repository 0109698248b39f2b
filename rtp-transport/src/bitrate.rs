//! Bitrate constraint merging
//!
//! Two sources set bitrate bounds: signaling (the SDP baseline) and the
//! application (a sparse mask of client preferences). The effective
//! constraints are the mask laid over the baseline, field by field.

/// Start bitrate used when nothing else was configured
pub const DEFAULT_START_BITRATE_BPS: u32 = 300_000;

/// Bounds for bandwidth estimation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BitrateConstraints {
    /// Lower bound
    pub min_bitrate_bps: u32,
    /// Rate estimation (re)starts from; must be positive when used
    pub start_bitrate_bps: u32,
    /// Upper bound, `None` for no ceiling
    pub max_bitrate_bps: Option<u32>,
}

impl BitrateConstraints {
    /// Create constraints from all three values
    pub fn new(min_bitrate_bps: u32, start_bitrate_bps: u32, max_bitrate_bps: Option<u32>) -> Self {
        BitrateConstraints {
            min_bitrate_bps,
            start_bitrate_bps,
            max_bitrate_bps,
        }
    }

    /// Lay `mask` over these constraints
    pub fn overlaid_with(&self, mask: &BitrateConstraintsMask) -> BitrateConstraints {
        BitrateConstraints {
            min_bitrate_bps: mask.min_bitrate_bps.unwrap_or(self.min_bitrate_bps),
            start_bitrate_bps: mask.start_bitrate_bps.unwrap_or(self.start_bitrate_bps),
            max_bitrate_bps: mask.max_bitrate_bps.or(self.max_bitrate_bps),
        }
    }
}

impl Default for BitrateConstraints {
    fn default() -> Self {
        BitrateConstraints {
            min_bitrate_bps: 0,
            start_bitrate_bps: DEFAULT_START_BITRATE_BPS,
            max_bitrate_bps: None,
        }
    }
}

/// Client bitrate preferences; `None` fields keep the baseline value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct BitrateConstraintsMask {
    pub min_bitrate_bps: Option<u32>,
    pub start_bitrate_bps: Option<u32>,
    pub max_bitrate_bps: Option<u32>,
}

/// Outcome of a configurator update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintsUpdate {
    /// The effective constraints changed to the carried value
    Changed(BitrateConstraints),
    /// The effective constraints are exactly what they were
    NoChange,
}

impl ConstraintsUpdate {
    /// The new constraints, if they changed
    pub fn changed(self) -> Option<BitrateConstraints> {
        match self {
            ConstraintsUpdate::Changed(constraints) => Some(constraints),
            ConstraintsUpdate::NoChange => None,
        }
    }

    /// Whether the update changed anything
    pub fn is_changed(&self) -> bool {
        matches!(self, ConstraintsUpdate::Changed(_))
    }
}

/// Keeps the SDP baseline, the client mask and the merged result
///
/// Bounds are taken as given: `max < min` or a zero start rate are the
/// caller's business.
#[derive(Debug, Clone)]
pub struct BitrateConfigurator {
    effective: BitrateConstraints,
    sdp_baseline: BitrateConstraints,
    client_mask: BitrateConstraintsMask,
}

impl BitrateConfigurator {
    /// Start from `initial` as both baseline and effective constraints
    pub fn new(initial: BitrateConstraints) -> Self {
        BitrateConfigurator {
            effective: initial,
            sdp_baseline: initial,
            client_mask: BitrateConstraintsMask::default(),
        }
    }

    /// Effective constraints
    pub fn current(&self) -> BitrateConstraints {
        self.effective
    }

    /// Baseline last received through signaling
    pub fn sdp_baseline(&self) -> BitrateConstraints {
        self.sdp_baseline
    }

    /// Client preferences last applied
    pub fn client_mask(&self) -> BitrateConstraintsMask {
        self.client_mask
    }

    /// Replace the signaling baseline
    pub fn update_with_sdp_parameters(
        &mut self,
        constraints: BitrateConstraints,
    ) -> ConstraintsUpdate {
        self.sdp_baseline = constraints;
        self.apply()
    }

    /// Replace the client preferences
    pub fn update_with_client_preferences(
        &mut self,
        mask: BitrateConstraintsMask,
    ) -> ConstraintsUpdate {
        self.client_mask = mask;
        self.apply()
    }

    fn apply(&mut self) -> ConstraintsUpdate {
        let merged = self.sdp_baseline.overlaid_with(&self.client_mask);
        if merged == self.effective {
            return ConstraintsUpdate::NoChange;
        }
        self.effective = merged;
        ConstraintsUpdate::Changed(merged)
    }
}

impl Default for BitrateConfigurator {
    fn default() -> Self {
        Self::new(BitrateConstraints::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_constraints_are_effective() {
        let initial = BitrateConstraints::new(30_000, 300_000, Some(2_000_000));
        let configurator = BitrateConfigurator::new(initial);

        assert_eq!(configurator.current(), initial);
        assert_eq!(configurator.sdp_baseline(), initial);
        assert_eq!(configurator.client_mask(), BitrateConstraintsMask::default());
    }

    #[test]
    fn test_sdp_update_reports_change_once() {
        let mut configurator = BitrateConfigurator::default();
        let sdp = BitrateConstraints::new(100_000, 500_000, Some(1_000_000));

        assert_eq!(
            configurator.update_with_sdp_parameters(sdp),
            ConstraintsUpdate::Changed(sdp)
        );
        assert_eq!(
            configurator.update_with_sdp_parameters(sdp),
            ConstraintsUpdate::NoChange
        );
    }

    #[test]
    fn test_unchanged_initial_sdp_is_no_change() {
        let mut configurator = BitrateConfigurator::default();
        let update = configurator.update_with_sdp_parameters(BitrateConstraints::default());
        assert!(!update.is_changed());
        assert_eq!(update.changed(), None);
    }

    #[test]
    fn test_mask_fields_override_baseline() {
        let mut configurator =
            BitrateConfigurator::new(BitrateConstraints::new(100, 300, Some(1_000)));

        let update = configurator.update_with_client_preferences(BitrateConstraintsMask {
            min_bitrate_bps: None,
            start_bitrate_bps: Some(400),
            max_bitrate_bps: Some(800),
        });
        assert_eq!(
            update,
            ConstraintsUpdate::Changed(BitrateConstraints::new(100, 400, Some(800)))
        );
    }

    #[test]
    fn test_mask_survives_new_sdp_baseline() {
        let mut configurator = BitrateConfigurator::default();
        configurator.update_with_client_preferences(BitrateConstraintsMask {
            max_bitrate_bps: Some(800_000),
            ..Default::default()
        });

        let update = configurator
            .update_with_sdp_parameters(BitrateConstraints::new(50_000, 200_000, Some(5_000_000)));
        assert_eq!(
            update.changed(),
            Some(BitrateConstraints::new(50_000, 200_000, Some(800_000)))
        );
    }

    #[test]
    fn test_sdp_change_hidden_by_mask_is_no_change() {
        let mut configurator =
            BitrateConfigurator::new(BitrateConstraints::new(100, 300, Some(1_000)));
        configurator.update_with_client_preferences(BitrateConstraintsMask {
            max_bitrate_bps: Some(900),
            ..Default::default()
        });

        // Only the max moves, and the mask pins the max.
        let update =
            configurator.update_with_sdp_parameters(BitrateConstraints::new(100, 300, Some(2_000)));
        assert_eq!(update, ConstraintsUpdate::NoChange);
        assert_eq!(configurator.sdp_baseline().max_bitrate_bps, Some(2_000));
    }

    #[test]
    fn test_clearing_mask_restores_baseline() {
        let baseline = BitrateConstraints::new(100, 300, None);
        let mut configurator = BitrateConfigurator::new(baseline);
        configurator.update_with_client_preferences(BitrateConstraintsMask {
            min_bitrate_bps: Some(200),
            ..Default::default()
        });

        let update = configurator.update_with_client_preferences(BitrateConstraintsMask::default());
        assert_eq!(update, ConstraintsUpdate::Changed(baseline));
    }

    #[test]
    fn test_degenerate_bounds_accepted() {
        let mut configurator = BitrateConfigurator::default();
        let inverted = BitrateConstraints::new(2_000, 1_000, Some(500));

        assert_eq!(
            configurator.update_with_sdp_parameters(inverted),
            ConstraintsUpdate::Changed(inverted)
        );
        assert_eq!(configurator.current(), inverted);
    }
}
