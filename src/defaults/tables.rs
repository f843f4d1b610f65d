//! Built-in argument defaults, following the CmdStan argument tree

use super::types::{Method, ParamValue};

/// Arguments shared by every method
fn common() -> Vec<(&'static str, ParamValue)> {
    vec![
        // -1: derive the seed from entropy
        ("random_seed", ParamValue::Int(-1)),
        ("chain", ParamValue::Int(1)),
        ("init_radius", ParamValue::Float(2.0)),
        ("refresh", ParamValue::Int(100)),
    ]
}

fn sample() -> Vec<(&'static str, ParamValue)> {
    let mut table = common();
    table.extend([
        ("num_warmup", ParamValue::Int(1000)),
        ("num_samples", ParamValue::Int(1000)),
        ("num_thin", ParamValue::Int(1)),
        ("save_warmup", ParamValue::Bool(false)),
        ("stepsize", ParamValue::Float(1.0)),
        ("stepsize_jitter", ParamValue::Float(0.0)),
        ("max_depth", ParamValue::Int(10)),
        ("delta", ParamValue::Float(0.8)),
        ("gamma", ParamValue::Float(0.05)),
        ("kappa", ParamValue::Float(0.75)),
        ("t0", ParamValue::Float(10.0)),
        ("init_buffer", ParamValue::Int(75)),
        ("term_buffer", ParamValue::Int(50)),
        ("window", ParamValue::Int(25)),
    ]);
    table
}

fn optimize() -> Vec<(&'static str, ParamValue)> {
    let mut table = common();
    table.extend([
        ("algorithm", ParamValue::Text("lbfgs".to_string())),
        ("iter", ParamValue::Int(2000)),
        ("jacobian", ParamValue::Bool(false)),
        ("save_iterations", ParamValue::Bool(false)),
        ("init_alpha", ParamValue::Float(0.001)),
        ("tol_obj", ParamValue::Float(1e-12)),
        ("tol_rel_obj", ParamValue::Float(1e4)),
        ("tol_grad", ParamValue::Float(1e-8)),
        ("tol_rel_grad", ParamValue::Float(1e7)),
        ("tol_param", ParamValue::Float(1e-8)),
        ("history_size", ParamValue::Int(5)),
    ]);
    table
}

fn variational() -> Vec<(&'static str, ParamValue)> {
    let mut table = common();
    table.extend([
        ("algorithm", ParamValue::Text("meanfield".to_string())),
        ("iter", ParamValue::Int(10000)),
        ("grad_samples", ParamValue::Int(1)),
        ("elbo_samples", ParamValue::Int(100)),
        ("eta", ParamValue::Float(1.0)),
        ("adapt_engaged", ParamValue::Bool(true)),
        ("adapt_iter", ParamValue::Int(50)),
        ("tol_rel_obj", ParamValue::Float(0.01)),
        ("eval_elbo", ParamValue::Int(100)),
        ("output_samples", ParamValue::Int(1000)),
    ]);
    table
}

pub(super) fn builtin() -> Vec<(Method, Vec<(&'static str, ParamValue)>)> {
    vec![
        (Method::Sample, sample()),
        (Method::Optimize, optimize()),
        (Method::Variational, variational()),
    ]
}
