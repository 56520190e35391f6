//! Wireless analog-aggregation channel.
//!
//! Participants transmit only when their Rayleigh-faded channel gain clears a
//! threshold. The receiver adds Gaussian noise scaled by the power-control
//! factor `alpha_t = P / max_i ||delta_i||^2`.

use crate::config::ChannelConfig;
use crate::core::{Error, Result, RoundIndex};
use crate::model::ModelParams;
use rand::Rng;
use rand_distr::{Distribution, Normal, Weibull};
use std::f64::consts::SQRT_2;

/// Rayleigh distribution with scale `sigma`.
#[derive(Clone, Debug)]
pub struct Rayleigh {
    sigma: f64,
    inner: Weibull<f64>,
}

impl Rayleigh {
    /// Create a Rayleigh distribution.
    pub fn new(sigma: f64) -> Result<Self> {
        if !(sigma > 0.0 && sigma.is_finite()) {
            return Err(Error::Distribution(format!(
                "Rayleigh scale must be positive, got {}",
                sigma
            )));
        }
        // Rayleigh(sigma) is Weibull(scale = sigma * sqrt(2), shape = 2).
        Ok(Self {
            sigma,
            inner: Weibull::new(sigma * SQRT_2, 2.0)?,
        })
    }

    /// `P(X <= x)`.
    pub fn cdf(&self, x: f64) -> f64 {
        if x <= 0.0 {
            return 0.0;
        }
        1.0 - (-x * x / (2.0 * self.sigma * self.sigma)).exp()
    }

    /// Quantile function; infinite at `p = 1`.
    pub fn inverse_cdf(&self, p: f64) -> Result<f64> {
        if !(0.0..=1.0).contains(&p) {
            return Err(Error::Distribution(format!(
                "probability must be in [0, 1], got {}",
                p
            )));
        }
        Ok(self.sigma * (-2.0 * (1.0 - p).ln()).sqrt())
    }
}

impl Distribution<f64> for Rayleigh {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        self.inner.sample(rng)
    }
}

/// Channel state fixed for a whole run.
#[derive(Clone, Debug)]
pub struct ChannelModel {
    /// Minimum channel gain to transmit (h_min)
    pub threshold: f64,
    /// Receiver noise standard deviation
    pub sigma: f64,
    /// Transmit power budget
    pub power_control: f64,
    fading: Rayleigh,
}

impl ChannelModel {
    /// Compute the threshold so that `users_per_round / total_users` of the
    /// population transmits on average.
    pub fn new(users_per_round: usize, total_users: usize, config: &ChannelConfig) -> Result<Self> {
        if total_users == 0 {
            return Err(Error::EmptyPool);
        }
        if users_per_round > total_users {
            return Err(Error::InvalidConfig(format!(
                "users_per_round {} exceeds population {}",
                users_per_round, total_users
            )));
        }
        if config.power_control <= 0.0 {
            return Err(Error::InvalidConfig(
                "power_control must be positive".to_string(),
            ));
        }

        let fading = Rayleigh::new(1.0)?;
        let threshold =
            fading.inverse_cdf(1.0 - users_per_round as f64 / total_users as f64)?;
        if !(threshold > 0.0 && threshold.is_finite()) {
            return Err(Error::DegenerateThreshold(threshold));
        }

        Ok(Self {
            threshold,
            sigma: config.sigma,
            power_control: config.power_control,
            fading,
        })
    }

    /// Draw a fresh channel gain.
    pub fn draw_quality<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        self.fading.sample(rng)
    }

    /// Power-control factor for the largest delta norm of a round.
    pub fn alpha_t(&self, max_delta_norm: f64, round: RoundIndex) -> Result<f64> {
        if !(max_delta_norm > 0.0 && max_delta_norm.is_finite()) {
            return Err(Error::ZeroDeltaNorm(round));
        }
        Ok(self.power_control / (max_delta_norm * max_delta_norm))
    }

    /// Standard deviation of the noise added to each global parameter.
    pub fn noise_scale(
        &self,
        max_delta_norm: f64,
        num_selected: usize,
        round: RoundIndex,
    ) -> Result<f64> {
        if num_selected == 0 {
            return Err(Error::ZeroSampleWeight(round));
        }
        let alpha_t = self.alpha_t(max_delta_norm, round)?;
        Ok(self.sigma / (alpha_t.sqrt() * num_selected as f64 * self.threshold))
    }

    /// Add `scale * N(0, 1)` to every parameter.
    pub fn inject<R: Rng + ?Sized>(&self, params: &mut ModelParams, scale: f64, rng: &mut R) -> Result<()> {
        let normal = Normal::new(0.0, scale)?;
        for value in params.values_mut() {
            *value += normal.sample(rng) as f32;
        }
        Ok(())
    }
}
