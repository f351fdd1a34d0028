// Plackett-Luce model constants (openskill defaults)
pub const MU: f64 = 25.0;
pub const SIGMA: f64 = MU / 3.0;
pub const BETA: f64 = SIGMA / 2.0;
pub const KAPPA: f64 = 0.0001;
