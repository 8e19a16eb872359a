//! Exponential families and link functions understood by the GLM stage.
//!
//! Names follow the R conventions (`"gaussian"`, `"inverse.gaussian"`, `"logit"`, ...)
//! because the calling environment passes them through verbatim.

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FamilyError {
    #[error("Unknown GLM family '{0}'. Expected one of gaussian, binomial, poisson, gamma, inverse.gaussian, tweedie.")]
    UnknownFamily(String),
    #[error("Unknown link function '{0}'. Expected one of identity, log, logit, probit, cloglog, inverse, sqrt.")]
    UnknownLink(String),
}

/// The assumed distribution of the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    Gaussian,
    Binomial,
    Poisson,
    Gamma,
    #[serde(rename = "inverse.gaussian")]
    InverseGaussian,
    Tweedie,
}

impl Family {
    /// The canonical link for this family.
    ///
    /// `variance_power` is only consulted for `Tweedie`, whose canonical link is
    /// `mu^(1 - p)`.
    pub fn canonical_link(self, variance_power: f64) -> Link {
        match self {
            Family::Gaussian => Link::Identity,
            Family::Binomial => Link::Logit,
            Family::Poisson => Link::Log,
            Family::Gamma => Link::Inverse,
            Family::InverseGaussian => Link::Power(-2.0),
            Family::Tweedie => Link::Power(1.0 - variance_power),
        }
    }

    pub fn is_binomial(self) -> bool {
        matches!(self, Family::Binomial)
    }

    pub fn name(self) -> &'static str {
        match self {
            Family::Gaussian => "gaussian",
            Family::Binomial => "binomial",
            Family::Poisson => "poisson",
            Family::Gamma => "gamma",
            Family::InverseGaussian => "inverse.gaussian",
            Family::Tweedie => "tweedie",
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Family {
    type Err = FamilyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "gaussian" => Ok(Family::Gaussian),
            "binomial" => Ok(Family::Binomial),
            "poisson" => Ok(Family::Poisson),
            "gamma" => Ok(Family::Gamma),
            "inverse.gaussian" | "inversegaussian" => Ok(Family::InverseGaussian),
            "tweedie" => Ok(Family::Tweedie),
            _ => Err(FamilyError::UnknownFamily(s.to_string())),
        }
    }
}

/// Maps the linear predictor to the mean response.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Link {
    Identity,
    Log,
    Logit,
    Probit,
    Cloglog,
    Inverse,
    Sqrt,
    /// `eta = mu^p`; a power of zero is the log link.
    Power(f64),
}

impl Link {
    /// Applies the inverse link `g^-1(eta)`.
    pub fn inverse(self, eta: f64) -> f64 {
        match self {
            Link::Identity => eta,
            Link::Log => eta.exp(),
            Link::Logit => 1.0 / (1.0 + (-eta).exp()),
            Link::Probit => Normal::new(0.0, 1.0)
                .map(|normal| normal.cdf(eta))
                .unwrap_or(f64::NAN),
            Link::Cloglog => 1.0 - (-eta.exp()).exp(),
            Link::Inverse => 1.0 / eta,
            Link::Sqrt => eta * eta,
            Link::Power(p) if p == 0.0 => eta.exp(),
            Link::Power(p) => eta.powf(1.0 / p),
        }
    }

    /// The link for a Tweedie model given an explicit `link_power`.
    pub fn from_power(link_power: f64) -> Link {
        if link_power == 0.0 {
            Link::Log
        } else if link_power == 1.0 {
            Link::Identity
        } else {
            Link::Power(link_power)
        }
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Link::Identity => f.write_str("identity"),
            Link::Log => f.write_str("log"),
            Link::Logit => f.write_str("logit"),
            Link::Probit => f.write_str("probit"),
            Link::Cloglog => f.write_str("cloglog"),
            Link::Inverse => f.write_str("inverse"),
            Link::Sqrt => f.write_str("sqrt"),
            Link::Power(p) => write!(f, "mu^{p}"),
        }
    }
}

impl FromStr for Link {
    type Err = FamilyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "identity" => Ok(Link::Identity),
            "log" => Ok(Link::Log),
            "logit" => Ok(Link::Logit),
            "probit" => Ok(Link::Probit),
            "cloglog" => Ok(Link::Cloglog),
            "inverse" => Ok(Link::Inverse),
            "sqrt" => Ok(Link::Sqrt),
            _ => Err(FamilyError::UnknownLink(s.to_string())),
        }
    }
}
