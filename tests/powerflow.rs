use approx::assert_abs_diff_eq;
use powerdae::prelude::*;
use serde_json::{Value, json};

fn config(method: &str) -> PowerFlowConfig {
    PowerFlowConfig {
        method: method.to_string(),
        tol: 1e-10,
        max_iter: 30,
        ..Default::default()
    }
}

fn case(data: Value) -> System {
    let mut sys = power_flow_system().unwrap();
    sys.load_json(&data).unwrap();
    sys
}

/// Slack at bus 1 feeding a 50 MW load over a lossless line.
fn two_bus_load() -> System {
    case(json!({
        "Bus": [{"idx": 1}, {"idx": 2}],
        "Slack": [{"idx": 1, "bus": 1}],
        "PQ": [{"idx": 1, "bus": 2, "p0": 0.5, "q0": 0.0}],
        "Line": [{"idx": 1, "bus1": 1, "bus2": 2, "r": 0.0, "x": 0.2}],
    }))
}

fn three_bus() -> System {
    case(json!({
        "Bus": [{"idx": 1}, {"idx": 2}, {"idx": 3}],
        "Slack": [{"idx": 1, "bus": 1, "v0": 1.02}],
        "PV": [{"idx": 1, "bus": 2, "p0": 0.4, "v0": 1.01}],
        "PQ": [{"idx": 1, "bus": 3, "p0": 0.8, "q0": 0.3}],
        "Line": [
            {"idx": 1, "bus1": 1, "bus2": 2, "r": 0.01, "x": 0.1},
            {"idx": 2, "bus1": 2, "bus2": 3, "r": 0.01, "x": 0.1},
            {"idx": 3, "bus1": 1, "bus2": 3, "r": 0.02, "x": 0.15, "b": 0.02},
        ],
    }))
}

fn single_var(e_str: &str, v_str: &str) -> System {
    let mut sys = System::new();
    sys.add_model(Model::new("Probe", "Test").with(Var::algeb("x").v_str(v_str).e_str(e_str)))
        .unwrap();
    sys.add("Probe", &json!({})).unwrap();
    sys
}

#[test]
fn two_bus_newton_matches_closed_form() {
    let mut sys = two_bus_load();
    let res = run_powerflow(&mut sys, &config("NR")).unwrap();
    assert!(res.converged);
    assert_eq!(res.status, SolveStatus::Converged);
    assert!(res.iterations > 0);

    let (b1, b2) = (&res.buses[0], &res.buses[1]);
    assert_abs_diff_eq!(b1.vm, 1.0, epsilon = 1e-10);
    assert_abs_diff_eq!(b1.va, 0.0, epsilon = 1e-10);
    let expected = (0.5 * 0.2 / (b1.vm * b2.vm)).asin().to_degrees();
    assert_abs_diff_eq!(b2.va, -expected, epsilon = 1e-6);
    // lossless line: no reactive load, so v2 = v1 cos(a2)
    assert_abs_diff_eq!(b2.vm, b2.va.to_radians().cos(), epsilon = 1e-8);

    assert_abs_diff_eq!(b2.p_load, 50.0, epsilon = 1e-8);
    assert_abs_diff_eq!(b1.p_gen, 50.0, epsilon = 1e-6);
    assert_abs_diff_eq!(b1.p_load, 0.0);
}

#[test]
fn pv_bus_holds_voltage() {
    let mut sys = case(json!({
        "Bus": [{"idx": 1}, {"idx": 2}],
        "Slack": [{"idx": 1, "bus": 1}],
        "PV": [{"idx": 1, "bus": 2, "p0": 0.5, "v0": 1.0}],
        "Line": [{"idx": 1, "bus1": 1, "bus2": 2, "r": 0.0, "x": 0.2}],
    }));
    let res = run_powerflow(&mut sys, &config("NR")).unwrap();
    assert!(res.converged);
    let b2 = &res.buses[1];
    assert_abs_diff_eq!(b2.vm, 1.0, epsilon = 1e-10);
    assert_abs_diff_eq!(b2.va, (0.5f64 * 0.2).asin().to_degrees(), epsilon = 1e-6);
    assert_abs_diff_eq!(b2.p_gen, 50.0, epsilon = 1e-8);
    assert_abs_diff_eq!(res.buses[0].p_gen, -50.0, epsilon = 1e-6);
}

#[test]
fn three_bus_has_positive_losses() {
    let mut sys = three_bus();
    let res = run_powerflow(&mut sys, &config("NR")).unwrap();
    assert!(res.converged);
    let gen_total: f64 = res.buses.iter().map(|b| b.p_gen).sum();
    let load_total: f64 = res.buses.iter().map(|b| b.p_load).sum();
    let losses = gen_total - load_total;
    assert!(losses > 0.0 && losses < 5.0, "losses {losses}");
    assert_abs_diff_eq!(res.buses[0].vm, 1.02, epsilon = 1e-10);
    assert_abs_diff_eq!(res.buses[1].vm, 1.01, epsilon = 1e-10);
    assert_abs_diff_eq!(res.buses[1].p_gen, 40.0, epsilon = 1e-8);
    assert!(res.buses[2].vm < 1.01);
}

#[test]
fn fast_decoupled_agrees_with_newton() {
    let mut nr = three_bus();
    let nr_res = run_powerflow(&mut nr, &config("NR")).unwrap();
    let mut fd = three_bus();
    let fd_res = run_powerflow(&mut fd, &config("FDPF")).unwrap();

    assert_eq!(fd_res.method, SolverMethod::FastDecoupled);
    assert!(fd_res.converged, "{:?}", fd_res.mismatches);
    for (a, b) in nr_res.buses.iter().zip(&fd_res.buses) {
        assert_abs_diff_eq!(a.vm, b.vm, epsilon = 1e-7);
        assert_abs_diff_eq!(a.va, b.va, epsilon = 1e-6);
        // slack powers and PV reactive power come from the follow-up solve
        assert_abs_diff_eq!(a.p_gen, b.p_gen, epsilon = 1e-5);
        assert_abs_diff_eq!(a.q_gen, b.q_gen, epsilon = 1e-5);
    }
}

#[test]
fn fast_decoupled_repairs_isolated_bus() {
    let isolated = || {
        case(json!({
            "Bus": [{"idx": 1}, {"idx": 2}, {"idx": 3}],
            "Slack": [{"idx": 1, "bus": 1}],
            "PQ": [{"idx": 1, "bus": 2, "p0": 0.5, "q0": 0.1}],
            "Line": [{"idx": 1, "bus1": 1, "bus2": 2, "r": 0.01, "x": 0.2}],
        }))
    };
    let mut nr = isolated();
    let nr_res = run_powerflow(&mut nr, &config("NR")).unwrap();
    let mut fd = isolated();
    let fd_res = run_powerflow(&mut fd, &config("FDPF")).unwrap();

    assert!(nr_res.converged);
    assert!(fd_res.converged, "{:?}", fd_res.mismatches);
    assert!(fd_res.iterations > 0);
    assert_abs_diff_eq!(fd_res.buses[1].vm, nr_res.buses[1].vm, epsilon = 1e-7);
    assert_abs_diff_eq!(fd_res.buses[1].va, nr_res.buses[1].va, epsilon = 1e-6);
    // the isolated bus keeps its starting point
    assert_abs_diff_eq!(fd_res.buses[2].vm, 1.0);
    assert_abs_diff_eq!(fd_res.buses[2].va, 0.0);
}

#[test]
fn fast_decoupled_iteration_limit() {
    let mut sys = three_bus();
    let cfg = PowerFlowConfig {
        max_iter: 1,
        tol: 1e-14,
        ..config("FDPF")
    };
    let res = run_powerflow(&mut sys, &cfg).unwrap();
    assert_eq!(res.status, SolveStatus::MaxIterExceeded);
    assert_eq!(res.iterations, 1);
    assert_eq!(res.mismatches.len(), 2);
}

#[test]
fn fast_decoupled_needs_buses() {
    let mut sys = single_var("x - 1", "0");
    assert!(matches!(
        run_powerflow(&mut sys, &config("FDXB")),
        Err(DaeError::UnknownModel(_))
    ));
}

#[test]
fn unknown_method_falls_back_to_newton() {
    let mut sys = two_bus_load();
    let res = run_powerflow(&mut sys, &config("GaussSeidel")).unwrap();
    assert_eq!(res.method, SolverMethod::Newton);
    assert!(res.converged);
}

#[test]
fn invalid_sparse_library_is_fatal() {
    let mut sys = two_bus_load();
    let cfg = PowerFlowConfig {
        sparselib: "umfpack".to_string(),
        ..config("NR")
    };
    assert!(matches!(
        run_powerflow(&mut sys, &cfg),
        Err(DaeError::Config(ConfigError::InvalidSparseLib(_)))
    ));
    // nothing was touched
    assert!(!sys.is_setup());
}

#[test]
fn iteration_limit_is_reported() {
    let mut sys = two_bus_load();
    let cfg = PowerFlowConfig {
        max_iter: 1,
        tol: 1e-14,
        ..config("NR")
    };
    let res = run_powerflow(&mut sys, &cfg).unwrap();
    assert_eq!(res.status, SolveStatus::MaxIterExceeded);
    assert!(!res.converged);
    assert_eq!(res.iterations, 1);
    assert_eq!(res.mismatches.len(), 2);
    assert!(res.mismatches[1] < res.mismatches[0]);
}

#[test]
fn growing_mismatch_is_divergence() {
    // the Newton step maps x to -2x, so |F| grows by 2^(1/3) per iteration
    let mut sys = single_var("sign(x) * abs(x)**(1/3)", "1");
    let cfg = PowerFlowConfig {
        max_iter: 100,
        ..config("NR")
    };
    let res = run_powerflow(&mut sys, &cfg).unwrap();
    assert_eq!(res.status, SolveStatus::Diverged);
    assert_eq!(res.iterations, 30);
    assert!(res.buses.is_empty());
}

#[test]
fn singular_jacobian_is_patched() {
    // the derivative 2x vanishes at the starting point
    let mut sys = single_var("x**2 - 1", "0");
    let res = run_powerflow(&mut sys, &config("NR")).unwrap();
    assert!(res.converged);
    assert_eq!(res.iterations, 1);
    assert_abs_diff_eq!(sys.dae.y[0], 1.0, epsilon = 1e-12);
}

#[test]
fn flat_start_keeps_set_points() {
    let mut sys = case(json!({
        "Bus": [{"idx": 1, "v0": 1.03, "a0": 0.1}, {"idx": 2, "v0": 0.95, "a0": -0.2}],
        "Slack": [{"idx": 1, "bus": 1, "v0": 1.05}],
        "PQ": [{"idx": 1, "bus": 2, "p0": 0.2}],
        "Line": [{"idx": 1, "bus1": 1, "bus2": 2, "x": 0.1}],
    }));
    sys.init().unwrap();
    let bus = sys.model("Bus").unwrap();
    let (a, v) = (bus.vars["a"].a.clone(), bus.vars["v"].a.clone());
    assert_abs_diff_eq!(sys.dae.y[a[1]], -0.2);
    assert_abs_diff_eq!(sys.dae.y[v[1]], 0.95);
    sys.flat_start();
    assert_abs_diff_eq!(sys.dae.y[a[1]], 0.0);
    assert_abs_diff_eq!(sys.dae.y[v[1]], 1.0);
    assert_abs_diff_eq!(sys.dae.y[a[0]], 0.0);
    // slack voltage set point survives
    assert_abs_diff_eq!(sys.dae.y[v[0]], 1.05);

    let cfg = PowerFlowConfig {
        flat_start: true,
        ..config("NR")
    };
    let flat = run_powerflow(&mut sys, &cfg).unwrap();
    let mut warm = case(json!({
        "Bus": [{"idx": 1}, {"idx": 2}],
        "Slack": [{"idx": 1, "bus": 1, "v0": 1.05}],
        "PQ": [{"idx": 1, "bus": 2, "p0": 0.2}],
        "Line": [{"idx": 1, "bus1": 1, "bus2": 2, "x": 0.1}],
    }));
    let warm = run_powerflow(&mut warm, &config("NR")).unwrap();
    assert_abs_diff_eq!(flat.buses[1].vm, warm.buses[1].vm, epsilon = 1e-8);
    assert_abs_diff_eq!(flat.buses[1].va, warm.buses[1].va, epsilon = 1e-6);
}

#[test]
fn results_render_as_table_and_csv() {
    let mut sys = two_bus_load();
    let res = run_powerflow(&mut sys, &config("NR")).unwrap();

    let report = res.report();
    assert!(report.starts_with("NR power flow: Converged"));
    assert!(report.contains("| Bus"));
    assert!(report.contains("50.000"));

    let mut buf = Vec::new();
    res.write_bus_csv(&mut buf).unwrap();
    let text = String::from_utf8(buf).unwrap();
    let mut lines = text.lines();
    assert_eq!(
        lines.next(),
        Some("idx,vm,va,p_load,q_load,p_gen,q_gen")
    );
    assert_eq!(lines.count(), 2);

    let json = serde_json::to_value(&res).unwrap();
    assert_eq!(json["status"], "Converged");
    assert_eq!(json["buses"][1]["idx"], "2");
}

#[test]
fn repeated_runs_reuse_setup() {
    let mut sys = two_bus_load();
    let first = run_powerflow(&mut sys, &config("NR")).unwrap();
    assert!(sys.is_setup());
    let second = run_powerflow(&mut sys, &config("NR")).unwrap();
    assert_abs_diff_eq!(first.buses[1].va, second.buses[1].va, epsilon = 1e-10);
}

#[test]
fn setter_residual_overrides_sum() {
    let mut sys = System::new();
    sys.add_model(Model::new("Node", "Test").with(Var::algeb("x").e_str("x - 1")))
        .unwrap();
    sys.add_model(
        Model::new("Fix", "Test")
            .with(IdxParam::new("node").model("Node").mandatory())
            .with(Var::ext_algeb("x", "Node", "x", "node").e_str("x - 3").e_setter()),
    )
    .unwrap();
    sys.add("Node", &json!({"idx": 1})).unwrap();
    sys.add("Fix", &json!({"idx": 1, "node": 1})).unwrap();

    sys.init().unwrap();
    sys.dae.y[0] = 5.0;
    sys.update_equations();
    // assigned, not added to x - 1
    assert_abs_diff_eq!(sys.dae.g[0], 2.0);
    assert_abs_diff_eq!(sys.model("Node").unwrap().vars["x"].e[0], 4.0);
}

#[test]
fn block_jacobians_reach_the_system() {
    let mut sys = System::new();
    let block = Block::new("b")
        .var(Var::algeb("z").e_str("b_z - 2"))
        .jac(JacBlock::Gy, "b_z", "b_z", NumericValue::Const(0.5));
    sys.add_model(Model::new("Holder", "Test").with(block)).unwrap();
    sys.add("Holder", &json!({})).unwrap();
    sys.add("Holder", &json!({})).unwrap();
    sys.setup().unwrap();
    sys.update_equations();
    sys.j_update();

    let gy = sys.dae.build(JacBlock::Gy).unwrap();
    let entries: Vec<_> = gy.triplet_iter().map(|(r, c, v)| (r, c, *v)).collect();
    // symbolic 1 plus the block's 0.5 on each device
    assert_eq!(entries, vec![(0, 0, 1.5), (1, 1, 1.5)]);
}

#[test]
fn adding_devices_resets_addresses() {
    let mut sys = two_bus_load();
    run_powerflow(&mut sys, &config("NR")).unwrap();
    assert!(sys.model("Bus").unwrap().flags.address);

    sys.add("Bus", &json!({"idx": 3})).unwrap();
    assert!(!sys.is_setup());
    for model in sys.models.values() {
        assert!(!model.flags.address);
        assert!(model.vars.values().all(|v| v.a.is_empty()));
    }

    sys.add("PQ", &json!({"idx": 2, "bus": 3, "p0": 0.2})).unwrap();
    sys.add("Line", &json!({"idx": 2, "bus1": 2, "bus2": 3, "x": 0.1}))
        .unwrap();
    let res = run_powerflow(&mut sys, &config("NR")).unwrap();
    assert!(res.converged);
    assert_eq!(res.buses.len(), 3);
    assert_abs_diff_eq!(res.buses[2].p_load, 20.0, epsilon = 1e-8);
}
