//! Plate-solve results and position-angle arithmetic.
//!
//! A rotator's position angle is only meaningful modulo 180°, so every PA
//! entering the system is folded into `[0, 180)` and every comparison uses
//! the circular distance on that range.

use serde::{Deserialize, Serialize};

/// Raw PA the align subsystem reports when it has no solution.
pub const NO_SOLUTION: f64 = -1_000_000.0;

/// Fold a raw position angle into `[0, 180)`, rounded to 0.01°.
pub fn normalize_pa(raw: f64) -> f64 {
    if raw == NO_SOLUTION || !raw.is_finite() {
        return 0.0;
    }
    let folded = (raw.rem_euclid(180.0) * 100.0).round() / 100.0;
    if folded >= 180.0 { 0.0 } else { folded }
}

/// Circular distance between two position angles, in `[0, 90]`.
pub fn pa_distance(a: f64, b: f64) -> f64 {
    let delta = (normalize_pa(a) - normalize_pa(b)).abs();
    delta.min(180.0 - delta)
}

/// Whether `current` is within `tolerance` degrees of `target`.
pub fn pa_in_range(current: f64, target: f64, tolerance: f64) -> bool {
    pa_distance(current, target) <= tolerance
}

/// Position angle, right ascension and declination from a plate-solve.
///
/// `ra` and `dec` are in degrees; the mount and align subsystems take RA in
/// hours, see [`ra_hours`](Self::ra_hours).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlignmentSolution {
    pub position_angle: f64,
    pub ra: f64,
    pub dec: f64,
}

impl AlignmentSolution {
    pub fn new(position_angle: f64, ra: f64, dec: f64) -> Self {
        Self {
            position_angle: normalize_pa(position_angle),
            ra,
            dec,
        }
    }

    /// Build from the align subsystem's `getSolutionResult` triple.
    ///
    /// Returns `None` for short results and for the "no solution" sentinel.
    pub fn from_raw(values: &[f64]) -> Option<Self> {
        match values {
            [pa, ra, dec, ..] if *pa != NO_SOLUTION => Some(Self::new(*pa, *ra, *dec)),
            _ => None,
        }
    }

    pub fn ra_hours(&self) -> f64 {
        self.ra / 15.0
    }

    /// Angular separation from another solution in arc-seconds (flat-sky
    /// approximation, adequate for the few-arcminute checks it serves).
    pub fn separation_arcsec(&self, other: &AlignmentSolution) -> f64 {
        let dra = (self.ra - other.ra) * self.dec.to_radians().cos();
        let ddec = self.dec - other.dec;
        (dra * dra + ddec * ddec).sqrt() * 3600.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_into_half_circle() {
        assert_eq!(normalize_pa(182.4), 2.4);
        assert_eq!(normalize_pa(-10.0), 170.0);
        assert_eq!(normalize_pa(180.0), 0.0);
        assert_eq!(normalize_pa(359.999), 0.0);
        assert_eq!(normalize_pa(90.0), 90.0);
    }

    #[test]
    fn sentinel_normalizes_to_zero() {
        assert_eq!(normalize_pa(NO_SOLUTION), 0.0);
        assert_eq!(normalize_pa(f64::NAN), 0.0);
    }

    #[test]
    fn normalization_is_idempotent_and_bounded() {
        let mut x = -720.0;
        while x < 720.0 {
            let once = normalize_pa(x);
            assert!((0.0..180.0).contains(&once), "{x} -> {once}");
            assert_eq!(normalize_pa(once), once, "not idempotent for {x}");
            x += 0.37;
        }
    }

    #[test]
    fn pa_range_boundaries() {
        assert!(pa_in_range(12.0, 10.0, 2.0));
        assert!(!pa_in_range(12.01, 10.0, 2.0));
        assert!(pa_in_range(8.0, 10.0, 2.0));
        assert!(!pa_in_range(7.99, 10.0, 2.0));
    }

    #[test]
    fn pa_range_wraps_at_180() {
        assert!(pa_in_range(179.0, 1.0, 2.0));
        assert!(pa_in_range(1.0, 179.0, 2.0));
        assert!(!pa_in_range(177.0, 1.0, 2.0));
        assert!(pa_in_range(182.0, 1.0, 1.0));
    }

    #[test]
    fn from_raw_rejects_sentinel_and_short_input() {
        assert!(AlignmentSolution::from_raw(&[NO_SOLUTION, 10.0, 5.0]).is_none());
        assert!(AlignmentSolution::from_raw(&[1.0, 2.0]).is_none());
        let s = AlignmentSolution::from_raw(&[182.4, 150.0, -5.0]).unwrap();
        assert_eq!(s.position_angle, 2.4);
        assert_eq!(s.ra_hours(), 10.0);
    }

    #[test]
    fn separation_of_identical_solutions_is_zero() {
        let a = AlignmentSolution::new(0.0, 10.0, 20.0);
        assert_eq!(a.separation_arcsec(&a), 0.0);
        let b = AlignmentSolution::new(0.0, 10.0, 20.01);
        assert!((a.separation_arcsec(&b) - 36.0).abs() < 0.01);
    }
}
