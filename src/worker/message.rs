use serde::Serialize;

/// Stage of a sampling run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Warmup,
    Sampling,
}

/// One retained iteration with its sampler diagnostics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Draw {
    /// 1-based iteration over warmup and sampling
    pub iteration: u64,
    pub phase: Phase,
    #[serde(rename = "lp__")]
    pub lp: f64,
    #[serde(rename = "accept_stat__")]
    pub accept_stat: f64,
    #[serde(rename = "stepsize__")]
    pub stepsize: f64,
    #[serde(rename = "treedepth__")]
    pub treedepth: u32,
    #[serde(rename = "n_leapfrog__")]
    pub n_leapfrog: u64,
    #[serde(rename = "divergent__")]
    pub divergent: bool,
    #[serde(rename = "energy__")]
    pub energy: f64,
    pub values: Vec<f64>,
}

/// Unit of output streamed from a worker to its consumer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "topic", rename_all = "lowercase")]
pub enum Message {
    Progress {
        iteration: u64,
        total: u64,
        phase: Phase,
    },
    Draw(Box<Draw>),
    /// Tuned sampler parameters, sent once when warmup ends
    Adaptation {
        step_size: f64,
        inv_metric: Vec<f64>,
    },
}

impl Message {
    pub fn topic(&self) -> &'static str {
        match self {
            Message::Progress { .. } => "progress",
            Message::Draw(_) => "draw",
            Message::Adaptation { .. } => "adaptation",
        }
    }

    pub fn as_draw(&self) -> Option<&Draw> {
        match self {
            Message::Draw(draw) => Some(draw),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_serializes_with_topic() {
        let message = Message::Progress {
            iteration: 10,
            total: 200,
            phase: Phase::Warmup,
        };
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["topic"], "progress");
        assert_eq!(json["phase"], "warmup");
        assert_eq!(json["iteration"], 10);
    }

    #[test]
    fn test_draw_uses_diagnostic_names() {
        let message = Message::Draw(Box::new(Draw {
            iteration: 101,
            phase: Phase::Sampling,
            lp: -0.5,
            accept_stat: 0.9,
            stepsize: 0.8,
            treedepth: 2,
            n_leapfrog: 3,
            divergent: false,
            energy: 1.0,
            values: vec![1.0],
        }));
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["topic"], "draw");
        assert_eq!(json["lp__"], -0.5);
        assert_eq!(json["treedepth__"], 2);
        assert_eq!(message.topic(), "draw");
        assert_eq!(message.as_draw().unwrap().iteration, 101);
    }
}
