#[derive(Debug, Clone)]
pub struct ForwardConfig {
    /// Relative pruning beam: states below `best alpha * beam` are dropped.
    pub beam: f64,
    /// Record Viterbi backpointers alongside alpha.
    pub backpointers: bool,
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            beam: 1e-100,
            backpointers: false,
        }
    }
}

impl ForwardConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides("BW_");
        config
    }

    /// Beam clamped into `(0, 1]`.
    pub fn effective_beam(&self) -> f64 {
        if self.beam > 0.0 {
            self.beam.min(1.0)
        } else {
            f64::MIN_POSITIVE
        }
    }

    fn apply_env_overrides(&mut self, prefix: &str) {
        let parse_env = |suffix: &str| std::env::var(format!("{prefix}{suffix}")).ok();

        if let Some(v) = parse_env("BEAM").and_then(|s| s.parse().ok()) {
            self.beam = v;
        }
        if let Some(v) = parse_env("BACKPOINTERS") {
            self.backpointers = matches!(v.trim(), "1" | "true" | "yes");
        }
    }
}

#[derive(Debug, Clone)]
pub struct DensityConfig {
    /// Densities evaluated per codebook and frame.
    pub n_top: usize,
    /// Variance floor applied before precomputation.
    pub var_floor: f32,
}

impl Default for DensityConfig {
    fn default() -> Self {
        Self {
            n_top: 4,
            var_floor: 1e-4,
        }
    }
}

impl DensityConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides("BW_");
        config
    }

    fn apply_env_overrides(&mut self, prefix: &str) {
        let parse_env = |suffix: &str| std::env::var(format!("{prefix}{suffix}")).ok();

        if let Some(v) = parse_env("TOPN").and_then(|s| s.parse::<usize>().ok()) {
            self.n_top = v.max(1);
        }
        if let Some(v) = parse_env("VARFLOOR").and_then(|s| s.parse().ok()) {
            self.var_floor = v;
        }
    }
}
