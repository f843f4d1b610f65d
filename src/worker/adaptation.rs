//! Warmup adaptation: dual-averaging step size and windowed diagonal metric

use super::args::WorkerConfig;

/// Warmup shorter than this performs no metric estimation
const MIN_METRIC_WARMUP: u64 = 20;

/// Dual averaging of the log step size towards a target acceptance statistic
#[derive(Debug, Clone)]
pub(crate) struct StepsizeAdaptation {
    mu: f64,
    delta: f64,
    gamma: f64,
    kappa: f64,
    t0: f64,
    counter: f64,
    s_bar: f64,
    x_bar: f64,
}

impl StepsizeAdaptation {
    pub(crate) fn new(delta: f64, gamma: f64, kappa: f64, t0: f64) -> Self {
        Self {
            mu: 0.5,
            delta,
            gamma,
            kappa,
            t0,
            counter: 0.0,
            s_bar: 0.0,
            x_bar: 0.0,
        }
    }

    /// Restart averaging, shrinking towards ten times the given step size
    pub(crate) fn restart(&mut self, epsilon: f64) {
        self.mu = (10.0 * epsilon).ln();
        self.counter = 0.0;
        self.s_bar = 0.0;
        self.x_bar = 0.0;
    }

    pub(crate) fn learn(&mut self, epsilon: &mut f64, accept_stat: f64) {
        self.counter += 1.0;
        let accept_stat = accept_stat.min(1.0);

        let eta = 1.0 / (self.counter + self.t0);
        self.s_bar = (1.0 - eta) * self.s_bar + eta * (self.delta - accept_stat);

        let x = self.mu - self.s_bar * self.counter.sqrt() / self.gamma;
        let x_eta = self.counter.powf(-self.kappa);
        self.x_bar = (1.0 - x_eta) * self.x_bar + x_eta * x;

        *epsilon = x.exp();
    }

    /// Final step size once warmup is over
    pub(crate) fn complete(&self) -> f64 {
        self.x_bar.exp()
    }
}

/// Running mean and variance (Welford)
#[derive(Debug, Clone)]
pub(crate) struct VarianceEstimator {
    count: u64,
    mean: Vec<f64>,
    m2: Vec<f64>,
}

impl VarianceEstimator {
    pub(crate) fn new(dim: usize) -> Self {
        Self {
            count: 0,
            mean: vec![0.0; dim],
            m2: vec![0.0; dim],
        }
    }

    pub(crate) fn restart(&mut self) {
        self.count = 0;
        self.mean.iter_mut().for_each(|v| *v = 0.0);
        self.m2.iter_mut().for_each(|v| *v = 0.0);
    }

    pub(crate) fn add_sample(&mut self, q: &[f64]) {
        self.count += 1;
        let n = self.count as f64;
        for ((mean, m2), &x) in self.mean.iter_mut().zip(self.m2.iter_mut()).zip(q) {
            let delta = x - *mean;
            *mean += delta / n;
            *m2 += (x - *mean) * delta;
        }
    }

    pub(crate) fn count(&self) -> u64 {
        self.count
    }

    pub(crate) fn sample_variance(&self) -> Vec<f64> {
        let denom = self.count.saturating_sub(1).max(1) as f64;
        self.m2.iter().map(|m2| m2 / denom).collect()
    }
}

/// Slow-adaptation schedule: an initial fast buffer, doubling metric windows, a final fast
/// buffer
#[derive(Debug, Clone)]
pub(crate) struct WindowSchedule {
    num_warmup: u64,
    init_buffer: u64,
    term_buffer: u64,
    base_window: u64,
    enabled: bool,
    counter: u64,
    window_size: u64,
    next_window: u64,
}

impl WindowSchedule {
    pub(crate) fn new(num_warmup: u64, init_buffer: u64, term_buffer: u64, base_window: u64) -> Self {
        let mut schedule = Self {
            num_warmup,
            init_buffer,
            term_buffer,
            base_window,
            enabled: num_warmup >= MIN_METRIC_WARMUP,
            counter: 0,
            window_size: base_window,
            next_window: 0,
        };

        if !schedule.enabled {
            if num_warmup > 0 {
                tracing::info!(
                    num_warmup,
                    "No metric estimation is performed for num_warmup < {MIN_METRIC_WARMUP}"
                );
            }
        } else if init_buffer
            .saturating_add(base_window)
            .saturating_add(term_buffer)
            > num_warmup
        {
            schedule.init_buffer = (0.15 * num_warmup as f64) as u64;
            schedule.term_buffer = (0.1 * num_warmup as f64) as u64;
            schedule.base_window = num_warmup - (schedule.init_buffer + schedule.term_buffer);
            tracing::warn!(
                num_warmup,
                init_buffer = schedule.init_buffer,
                window = schedule.base_window,
                term_buffer = schedule.term_buffer,
                "Adaptation windows do not fit into warmup, rescaled to 15%/75%/10%"
            );
        }

        schedule.restart();
        schedule
    }

    fn restart(&mut self) {
        self.counter = 0;
        self.window_size = self.base_window;
        self.next_window = self.init_buffer.saturating_add(self.window_size).saturating_sub(1);
    }

    fn last_window_end(&self) -> u64 {
        self.num_warmup.saturating_sub(self.term_buffer.saturating_add(1))
    }

    fn in_window(&self) -> bool {
        self.enabled
            && self.counter >= self.init_buffer
            && self.counter < self.num_warmup.saturating_sub(self.term_buffer)
            && self.counter != self.num_warmup
    }

    fn at_window_end(&self) -> bool {
        self.enabled && self.counter == self.next_window && self.counter != self.num_warmup
    }

    fn compute_next_window(&mut self) {
        if self.next_window == self.last_window_end() {
            return;
        }

        self.window_size = self.window_size.saturating_mul(2);
        self.next_window = self.counter.saturating_add(self.window_size);

        if self.next_window != self.last_window_end() {
            let next_boundary = self
                .next_window
                .saturating_add(self.window_size.saturating_mul(2));
            if next_boundary >= self.num_warmup.saturating_sub(self.term_buffer) {
                self.next_window = self.last_window_end();
            }
        }
    }
}

/// Everything tuned during warmup
#[derive(Debug, Clone)]
pub(crate) struct Adaptation {
    pub(crate) stepsize: StepsizeAdaptation,
    schedule: WindowSchedule,
    estimator: VarianceEstimator,
}

impl Adaptation {
    pub(crate) fn new(config: &WorkerConfig, dim: usize) -> Self {
        Self {
            stepsize: StepsizeAdaptation::new(config.delta, config.gamma, config.kappa, config.t0),
            schedule: WindowSchedule::new(
                config.num_warmup,
                config.init_buffer,
                config.term_buffer,
                config.window,
            ),
            estimator: VarianceEstimator::new(dim),
        }
    }

    /// Record one warmup position; returns a new inverse metric when a window closes
    pub(crate) fn learn_metric(&mut self, q: &[f64]) -> Option<Vec<f64>> {
        if self.schedule.in_window() {
            self.estimator.add_sample(q);
        }

        let update = if self.schedule.at_window_end() {
            self.schedule.compute_next_window();

            // Regularise towards the unit metric
            let n = self.estimator.count() as f64;
            let inv_metric = self
                .estimator
                .sample_variance()
                .into_iter()
                .map(|var| (n / (n + 5.0)) * var + 1e-3 * (5.0 / (n + 5.0)))
                .collect();

            self.estimator.restart();
            Some(inv_metric)
        } else {
            None
        };

        self.schedule.counter += 1;
        update
    }
}
