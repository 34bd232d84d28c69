//! Four-vector kinematics.

use std::f64::consts::PI;
use std::ops::Add;

use crate::error::{NanoEventsError, Result};

/// How a record encodes its kinematics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VectorKind {
    /// `pt, eta, phi, mass` (mass defaults to 0 when absent).
    PtEtaPhiM,
    /// `pt, eta, phi, energy`.
    PtEtaPhiE,
    /// `px, py, pz, energy`.
    PxPyPzE,
    /// Transverse-only `pt, phi` (missing transverse energy).
    Polar2,
    /// Spatial `x, y, z` (vertices); treated as a massless vector.
    Cartesian3,
    /// Track parameters `qOverP, theta, phi`; treated as massless.
    QOverPThetaPhi,
    /// No kinematics.
    None,
}

pub(crate) const PT: &[&str] = &["pt", "PT", "ET", "MET"];
pub(crate) const ETA: &[&str] = &["eta", "Eta"];
pub(crate) const PHI: &[&str] = &["phi", "Phi"];
pub(crate) const MASS: &[&str] = &["mass", "Mass", "m"];
pub(crate) const ENERGY: &[&str] = &["energy", "E", "e"];
pub(crate) const PX: &[&str] = &["px", "Px"];
pub(crate) const PY: &[&str] = &["py", "Py"];
pub(crate) const PZ: &[&str] = &["pz", "Pz"];
pub(crate) const X: &[&str] = &["x", "X"];
pub(crate) const Y: &[&str] = &["y", "Y"];
pub(crate) const Z: &[&str] = &["z", "Z"];
pub(crate) const QOVERP: &[&str] = &["qOverP"];
pub(crate) const THETA: &[&str] = &["theta"];

impl VectorKind {
    /// Build one vector per element from flat component columns.
    ///
    /// `column` returns the values of the first present alias, or `None`.
    pub fn build<F>(self, n: usize, column: F) -> Result<Vec<LorentzVector>>
    where
        F: Fn(&[&str]) -> Result<Option<Vec<f64>>>,
    {
        let need = |aliases: &[&str]| -> Result<Vec<f64>> {
            let values = column(aliases)?.ok_or_else(|| {
                NanoEventsError::FieldNotFound(format!("kinematic field {}", aliases.join("|")))
            })?;
            if values.len() != n {
                return Err(NanoEventsError::Validation(format!(
                    "kinematic field {} has {} values, expected {n}",
                    aliases[0],
                    values.len()
                )));
            }
            Ok(values)
        };
        let out = match self {
            VectorKind::PtEtaPhiM => {
                let (pt, eta, phi) = (need(PT)?, need(ETA)?, need(PHI)?);
                let mass = match column(MASS)? {
                    Some(m) if m.len() == n => m,
                    _ => vec![0.0; n],
                };
                (0..n).map(|i| LorentzVector::from_pt_eta_phi_m(pt[i], eta[i], phi[i], mass[i])).collect()
            }
            VectorKind::PtEtaPhiE => {
                let (pt, eta, phi, e) = (need(PT)?, need(ETA)?, need(PHI)?, need(ENERGY)?);
                (0..n).map(|i| LorentzVector::from_pt_eta_phi_e(pt[i], eta[i], phi[i], e[i])).collect()
            }
            VectorKind::PxPyPzE => {
                let (px, py, pz, e) = (need(PX)?, need(PY)?, need(PZ)?, need(ENERGY)?);
                (0..n).map(|i| LorentzVector::new(px[i], py[i], pz[i], e[i])).collect()
            }
            VectorKind::Polar2 => {
                let (pt, phi) = (need(PT)?, need(PHI)?);
                (0..n).map(|i| LorentzVector::from_pt_eta_phi_m(pt[i], 0.0, phi[i], 0.0)).collect()
            }
            VectorKind::Cartesian3 => {
                let (x, y, z) = (need(X)?, need(Y)?, need(Z)?);
                (0..n).map(|i| LorentzVector::massless(x[i], y[i], z[i])).collect()
            }
            VectorKind::QOverPThetaPhi => {
                let (q, theta, phi) = (need(QOVERP)?, need(THETA)?, need(PHI)?);
                (0..n)
                    .map(|i| {
                        let p = if q[i] == 0.0 { 0.0 } else { 1.0 / q[i].abs() };
                        let (s, c) = theta[i].sin_cos();
                        LorentzVector::massless(p * s * phi[i].cos(), p * s * phi[i].sin(), p * c)
                    })
                    .collect()
            }
            VectorKind::None => {
                return Err(NanoEventsError::TypeMismatch(
                    "collection has no kinematic behavior".into(),
                ));
            }
        };
        Ok(out)
    }
}

/// Cartesian four-vector `(px, py, pz, E)`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LorentzVector {
    /// x momentum.
    pub px: f64,
    /// y momentum.
    pub py: f64,
    /// z momentum.
    pub pz: f64,
    /// Energy.
    pub e: f64,
}

impl LorentzVector {
    /// Vector from Cartesian momentum and energy.
    pub fn new(px: f64, py: f64, pz: f64, e: f64) -> Self {
        Self { px, py, pz, e }
    }

    /// Massless vector: energy is `|p|`.
    pub fn massless(px: f64, py: f64, pz: f64) -> Self {
        let e = (px * px + py * py + pz * pz).sqrt();
        Self { px, py, pz, e }
    }

    /// From transverse momentum, pseudorapidity, azimuth and mass.
    pub fn from_pt_eta_phi_m(pt: f64, eta: f64, phi: f64, mass: f64) -> Self {
        let (px, py, pz) = (pt * phi.cos(), pt * phi.sin(), pt * eta.sinh());
        let e = (px * px + py * py + pz * pz + mass * mass).sqrt();
        Self { px, py, pz, e }
    }

    /// From transverse momentum, pseudorapidity, azimuth and energy.
    pub fn from_pt_eta_phi_e(pt: f64, eta: f64, phi: f64, e: f64) -> Self {
        Self { px: pt * phi.cos(), py: pt * phi.sin(), pz: pt * eta.sinh(), e }
    }

    /// Transverse momentum.
    pub fn pt(&self) -> f64 {
        self.px.hypot(self.py)
    }

    /// Momentum magnitude.
    pub fn p(&self) -> f64 {
        (self.px * self.px + self.py * self.py + self.pz * self.pz).sqrt()
    }

    /// Energy.
    pub fn energy(&self) -> f64 {
        self.e
    }

    /// Pseudorapidity; `0` for a null vector, `±inf` along the beam axis.
    pub fn eta(&self) -> f64 {
        let pt = self.pt();
        if pt == 0.0 {
            return if self.pz == 0.0 { 0.0 } else { f64::INFINITY.copysign(self.pz) };
        }
        (self.pz / pt).asinh()
    }

    /// Azimuth in `(-pi, pi]`; `0` for a vector along the beam axis.
    pub fn phi(&self) -> f64 {
        if self.px == 0.0 && self.py == 0.0 { 0.0 } else { self.py.atan2(self.px) }
    }

    /// Invariant mass; negative for space-like vectors.
    pub fn mass(&self) -> f64 {
        let m2 = self.e * self.e - self.p().powi(2);
        if m2 >= 0.0 { m2.sqrt() } else { -(-m2).sqrt() }
    }

    /// `phi` difference wrapped to `[-pi, pi)`.
    pub fn delta_phi(&self, other: &LorentzVector) -> f64 {
        wrap_phi(self.phi() - other.phi())
    }

    /// `sqrt(deta^2 + dphi^2)`.
    pub fn delta_r(&self, other: &LorentzVector) -> f64 {
        let deta = self.eta() - other.eta();
        deta.hypot(self.delta_phi(other))
    }
}

/// Wrap an angle to `[-pi, pi)`.
pub fn wrap_phi(dphi: f64) -> f64 {
    (dphi + PI).rem_euclid(2.0 * PI) - PI
}

impl Add for LorentzVector {
    type Output = LorentzVector;

    fn add(self, rhs: LorentzVector) -> LorentzVector {
        LorentzVector::new(self.px + rhs.px, self.py + rhs.py, self.pz + rhs.pz, self.e + rhs.e)
    }
}

impl std::iter::Sum for LorentzVector {
    fn sum<I: Iterator<Item = LorentzVector>>(iter: I) -> Self {
        iter.fold(LorentzVector::default(), Add::add)
    }
}
