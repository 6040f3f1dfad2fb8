/// One polar-alignment error measurement reported by the plate solver.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentError {
    /// Time of day as printed by the solver.
    pub timestamp: String,
    pub alt_error_arcsec: f64,
    pub az_error_arcsec: f64,
    /// Always finite and non-negative.
    pub total_error_arcsec: f64,
}

impl AlignmentError {
    /// Reading whose total is the Euclidean norm of its components.
    pub fn from_components(timestamp: impl Into<String>, alt: f64, az: f64) -> Self {
        Self {
            timestamp: timestamp.into(),
            alt_error_arcsec: alt,
            az_error_arcsec: az,
            total_error_arcsec: alt.hypot(az),
        }
    }
}
