//! No-U-Turn sampler with multinomial trajectory sampling and a diagonal Euclidean metric

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

use super::args::WorkerConfig;
use super::model::LogDensity;

/// Energy error beyond which a trajectory is flagged divergent
const MAX_DELTA_H: f64 = 1000.0;

/// Random initialisation attempts before giving up
pub(crate) const MAX_INIT_ATTEMPTS: u32 = 100;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SamplerError {
    #[error("Initialization failed after {attempts} attempts: {reason}")]
    Initialization { attempts: u32, reason: String },

    #[error("Posterior is improper. Please check your model.")]
    ImproperPosterior,

    #[error("No acceptably small step size could be found. Perhaps the posterior is not continuous?")]
    NoAcceptableStepsize,
}

/// Position, momentum and cached density evaluation
#[derive(Debug, Clone)]
struct PhasePoint {
    q: Vec<f64>,
    p: Vec<f64>,
    grad: Vec<f64>,
    lp: f64,
}

/// Momenta at one end of a trajectory segment
#[derive(Debug, Clone)]
struct Edge {
    p: Vec<f64>,
    p_sharp: Vec<f64>,
}

/// Summed momentum of a contiguous trajectory segment plus its two ends, in travel order
#[derive(Debug, Clone)]
struct Span {
    rho: Vec<f64>,
    first: Edge,
    last: Edge,
}

impl Span {
    fn point(p: Vec<f64>, p_sharp: Vec<f64>) -> Self {
        let edge = Edge { p: p.clone(), p_sharp };
        Self {
            rho: p,
            first: edge.clone(),
            last: edge,
        }
    }

    fn reversed(self) -> Self {
        Self {
            rho: self.rho,
            first: self.last,
            last: self.first,
        }
    }

    /// `a` followed by `b` has not turned back on itself, including across the seam
    fn no_uturn(a: &Span, b: &Span) -> bool {
        let rho = add(&a.rho, &b.rho);
        criterion(&a.first.p_sharp, &b.last.p_sharp, &rho)
            && criterion(&a.first.p_sharp, &b.first.p_sharp, &add(&a.rho, &b.first.p))
            && criterion(&a.last.p_sharp, &b.last.p_sharp, &add(&b.rho, &a.last.p))
    }

    fn join(a: Span, b: Span) -> Span {
        Span {
            rho: add(&a.rho, &b.rho),
            first: a.first,
            last: b.last,
        }
    }
}

struct Subtree {
    span: Span,
    log_sum_weight: f64,
    proposal: PhasePoint,
}

#[derive(Debug, Default)]
struct TreeStats {
    n_leapfrog: u64,
    sum_metro_prob: f64,
    divergent: bool,
}

/// Diagnostics of a single transition
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Transition {
    pub lp: f64,
    pub accept_stat: f64,
    pub stepsize: f64,
    pub treedepth: u32,
    pub n_leapfrog: u64,
    pub divergent: bool,
    pub energy: f64,
}

pub(crate) struct Nuts<'a> {
    model: &'a dyn LogDensity,
    rng: StdRng,
    z: PhasePoint,
    inv_metric: Vec<f64>,
    nominal_stepsize: f64,
    stepsize: f64,
    jitter: f64,
    max_depth: u32,
}

impl<'a> Nuts<'a> {
    /// Draw a random starting point in `(-init_radius, init_radius)` with a finite density and
    /// gradient
    pub(crate) fn initialize(
        model: &'a dyn LogDensity,
        config: &WorkerConfig,
    ) -> Result<Self, SamplerError> {
        let dim = model.dim();
        let seed = u64::from(config.seed).wrapping_add(u64::from(config.chain) << 32);
        let mut rng = StdRng::seed_from_u64(seed);

        let attempts = if config.init_radius == 0.0 {
            1
        } else {
            MAX_INIT_ATTEMPTS
        };

        let mut reason = String::from("no attempt made");
        for attempt in 1..=attempts {
            let q: Vec<f64> = if config.init_radius == 0.0 {
                vec![0.0; dim]
            } else {
                (0..dim)
                    .map(|_| rng.random_range(-config.init_radius..config.init_radius))
                    .collect()
            };

            let mut grad = vec![0.0; dim];
            match model.log_density_gradient(&q, &mut grad) {
                Ok(lp) if !lp.is_finite() => {
                    reason = format!("log density evaluates to {lp}");
                }
                Ok(_) if grad.iter().any(|g| !g.is_finite()) => {
                    reason = String::from("gradient is not finite");
                }
                Ok(lp) => {
                    tracing::debug!(attempt, lp, "Initial values accepted");
                    return Ok(Self {
                        model,
                        rng,
                        z: PhasePoint {
                            q,
                            p: vec![0.0; dim],
                            grad,
                            lp,
                        },
                        inv_metric: vec![1.0; dim],
                        nominal_stepsize: config.stepsize,
                        stepsize: config.stepsize,
                        jitter: config.stepsize_jitter,
                        max_depth: config.max_depth,
                    });
                }
                Err(err) => reason = err.0,
            }
            tracing::debug!(attempt, %reason, "Rejecting initial values");
        }

        Err(SamplerError::Initialization { attempts, reason })
    }

    pub(crate) fn position(&self) -> &[f64] {
        &self.z.q
    }

    pub(crate) fn inv_metric(&self) -> &[f64] {
        &self.inv_metric
    }

    pub(crate) fn set_inv_metric(&mut self, inv_metric: Vec<f64>) {
        self.inv_metric = inv_metric;
    }

    pub(crate) fn nominal_stepsize(&self) -> f64 {
        self.nominal_stepsize
    }

    pub(crate) fn nominal_stepsize_mut(&mut self) -> &mut f64 {
        &mut self.nominal_stepsize
    }

    pub(crate) fn set_nominal_stepsize(&mut self, stepsize: f64) {
        self.nominal_stepsize = stepsize;
    }

    /// Heuristic search for a step size whose single leapfrog acceptance crosses 0.8
    pub(crate) fn init_stepsize(&mut self) -> Result<(), SamplerError> {
        if self.nominal_stepsize == 0.0
            || self.nominal_stepsize > 1e7
            || self.nominal_stepsize.is_nan()
        {
            return Ok(());
        }

        let z_init = self.z.clone();
        let target = 0.8f64.ln();

        let delta_h = self.trial_step(&z_init);
        let growing = delta_h > target;

        loop {
            let delta_h = self.trial_step(&z_init);
            let keep_searching = if growing {
                delta_h > target
            } else {
                delta_h < target
            };
            if !keep_searching {
                break;
            }

            if growing {
                self.nominal_stepsize *= 2.0;
            } else {
                self.nominal_stepsize /= 2.0;
            }

            if self.nominal_stepsize > 1e7 {
                self.z = z_init;
                return Err(SamplerError::ImproperPosterior);
            }
            if self.nominal_stepsize == 0.0 {
                self.z = z_init;
                return Err(SamplerError::NoAcceptableStepsize);
            }
        }

        self.z = z_init;
        Ok(())
    }

    /// Energy change of one leapfrog step at the nominal step size from a fresh momentum
    fn trial_step(&mut self, start: &PhasePoint) -> f64 {
        self.z = start.clone();
        self.sample_momentum();
        let h0 = self.hamiltonian(&self.z);

        let mut z = self.z.clone();
        self.leapfrog(&mut z, self.nominal_stepsize);
        let mut h = self.hamiltonian(&z);
        if h.is_nan() {
            h = f64::INFINITY;
        }
        self.z = z;
        h0 - h
    }

    pub(crate) fn transition(&mut self) -> Transition {
        self.sample_stepsize();
        self.sample_momentum();

        let h0 = self.hamiltonian(&self.z);
        let mut forward_end = self.z.clone();
        let mut backward_end = self.z.clone();
        let mut sample = self.z.clone();

        let p_sharp = self.dtau_dp(&self.z.p);
        let mut span = Span::point(self.z.p.clone(), p_sharp);
        let mut log_sum_weight = 0.0;
        let mut stats = TreeStats::default();
        let mut depth = 0;

        while depth < self.max_depth {
            let forward = self.rng.random::<f64>() > 0.5;
            let subtree = if forward {
                self.build_tree(depth, &mut forward_end, h0, 1.0, &mut stats)
            } else {
                self.build_tree(depth, &mut backward_end, h0, -1.0, &mut stats)
            };
            let Some(subtree) = subtree else {
                break;
            };
            depth += 1;

            if subtree.log_sum_weight > log_sum_weight {
                sample = subtree.proposal;
            } else {
                let accept_prob = (subtree.log_sum_weight - log_sum_weight).exp();
                if self.rng.random::<f64>() < accept_prob {
                    sample = subtree.proposal;
                }
            }
            log_sum_weight = log_sum_exp(log_sum_weight, subtree.log_sum_weight);

            // Compare in travel order, then restore forward orientation
            let old = if forward { span } else { span.reversed() };
            let keep_going = Span::no_uturn(&old, &subtree.span);
            span = Span::join(old, subtree.span);
            if !forward {
                span = span.reversed();
            }

            if !keep_going {
                break;
            }
        }

        let accept_stat = if stats.n_leapfrog > 0 {
            stats.sum_metro_prob / stats.n_leapfrog as f64
        } else {
            0.0
        };
        let energy = self.hamiltonian(&sample);
        self.z = sample;

        Transition {
            lp: self.z.lp,
            accept_stat,
            stepsize: self.stepsize,
            treedepth: depth,
            n_leapfrog: stats.n_leapfrog,
            divergent: stats.divergent,
            energy,
        }
    }

    /// Grow `2^depth` leapfrog steps from `z` in `direction`; `None` when the subtree diverges
    /// or makes a U-turn
    fn build_tree(
        &mut self,
        depth: u32,
        z: &mut PhasePoint,
        h0: f64,
        direction: f64,
        stats: &mut TreeStats,
    ) -> Option<Subtree> {
        if depth == 0 {
            self.leapfrog(z, direction * self.stepsize);
            stats.n_leapfrog += 1;

            let mut h = self.hamiltonian(z);
            if h.is_nan() {
                h = f64::INFINITY;
            }

            let log_weight = h0 - h;
            stats.sum_metro_prob += if log_weight > 0.0 {
                1.0
            } else {
                log_weight.exp()
            };

            if h - h0 > MAX_DELTA_H {
                stats.divergent = true;
                return None;
            }

            let p_sharp = self.dtau_dp(&z.p);
            return Some(Subtree {
                span: Span::point(z.p.clone(), p_sharp),
                log_sum_weight: log_weight,
                proposal: z.clone(),
            });
        }

        let init = self.build_tree(depth - 1, z, h0, direction, stats)?;
        let last = self.build_tree(depth - 1, z, h0, direction, stats)?;

        let log_sum_weight = log_sum_exp(init.log_sum_weight, last.log_sum_weight);
        let accept_prob = (last.log_sum_weight - log_sum_weight).exp();
        let proposal = if self.rng.random::<f64>() < accept_prob {
            last.proposal
        } else {
            init.proposal
        };

        if !Span::no_uturn(&init.span, &last.span) {
            return None;
        }

        Some(Subtree {
            span: Span::join(init.span, last.span),
            log_sum_weight,
            proposal,
        })
    }

    fn leapfrog(&self, z: &mut PhasePoint, epsilon: f64) {
        let half = 0.5 * epsilon;
        for (p, g) in z.p.iter_mut().zip(&z.grad) {
            *p += half * g;
        }
        for ((q, p), m) in z.q.iter_mut().zip(&z.p).zip(&self.inv_metric) {
            *q += epsilon * m * p;
        }

        z.lp = match self.model.log_density_gradient(&z.q, &mut z.grad) {
            Ok(lp) => lp,
            Err(err) => {
                tracing::debug!(error = %err, "Model error during leapfrog, treating as divergent");
                f64::NEG_INFINITY
            }
        };
        if !z.lp.is_finite() {
            return;
        }

        for (p, g) in z.p.iter_mut().zip(&z.grad) {
            *p += half * g;
        }
    }

    fn hamiltonian(&self, z: &PhasePoint) -> f64 {
        let kinetic: f64 = z
            .p
            .iter()
            .zip(&self.inv_metric)
            .map(|(p, m)| m * p * p)
            .sum();
        0.5 * kinetic - z.lp
    }

    fn dtau_dp(&self, p: &[f64]) -> Vec<f64> {
        p.iter().zip(&self.inv_metric).map(|(p, m)| m * p).collect()
    }

    fn sample_momentum(&mut self) {
        for (p, m) in self.z.p.iter_mut().zip(&self.inv_metric) {
            *p = standard_normal(&mut self.rng) / m.sqrt();
        }
    }

    fn sample_stepsize(&mut self) {
        self.stepsize = self.nominal_stepsize;
        if self.jitter > 0.0 {
            self.stepsize *= 1.0 + self.jitter * (2.0 * self.rng.random::<f64>() - 1.0);
        }
    }
}

fn criterion(p_sharp_minus: &[f64], p_sharp_plus: &[f64], rho: &[f64]) -> bool {
    dot(p_sharp_plus, rho) > 0.0 && dot(p_sharp_minus, rho) > 0.0
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn add(a: &[f64], b: &[f64]) -> Vec<f64> {
    a.iter().zip(b).map(|(x, y)| x + y).collect()
}

fn log_sum_exp(a: f64, b: f64) -> f64 {
    if a == f64::NEG_INFINITY {
        return b;
    }
    if b == f64::NEG_INFINITY {
        return a;
    }
    let max = a.max(b);
    max + ((a - max).exp() + (b - max).exp()).ln()
}

/// Box-Muller transform
fn standard_normal(rng: &mut StdRng) -> f64 {
    let u1 = 1.0 - rng.random::<f64>();
    let u2 = rng.random::<f64>();
    (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}
