use bw_core::forward::ALPHA_FLOOR;
use bw_core::{
    forward, AcousticModel, AlphaTable, FeatureSeq, ForwardConfig, ForwardError, ForwardWorkspace,
    GaudenError, GaussianMixtureSet, GraphError, MixtureWeights, PhoneModel, PhoneSegment,
    SentenceHmm, SentenceHmmBuilder, StateLabel,
};
use ndarray::{arr2, Array2, Array3};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Model whose single codebook has one density evaluating to exactly 1 at
/// the origin, so output probabilities equal the mixture weights.
fn unit_model(weights: Array3<f32>) -> AcousticModel {
    let n_feat = weights.dim().1;
    let var = (1.0 / (2.0 * std::f64::consts::PI)) as f32;
    let mean = vec![Array3::zeros((1, 1, 1)); n_feat];
    let vars = vec![Array3::from_elem((1, 1, 1), var); n_feat];
    let g = GaussianMixtureSet::from_params(mean, vars, 1).unwrap();
    let mut model = AcousticModel::new(g, MixtureWeights::new(weights)).unwrap();
    model.prepare(0.0).unwrap();
    model
}

fn origin_frames(n_frames: usize, n_feat: usize) -> FeatureSeq {
    FeatureSeq::new(vec![Array2::zeros((n_frames, 1)); n_feat]).unwrap()
}

fn one_phone(tmat: Array2<f32>, senones: &[u32], codebooks: &[u32]) -> SentenceHmm {
    let mut b = SentenceHmmBuilder::new();
    b.append_phone(&PhoneModel {
        phone: 0,
        tmat_id: 0,
        tmat: tmat.view(),
        senones,
        codebooks,
    })
    .unwrap();
    b.build().unwrap()
}

fn unscaled(table: &AlphaTable, t: usize, state: u32) -> f64 {
    let i = table
        .find(t, state)
        .unwrap_or_else(|| panic!("state {state} not active at frame {t}"));
    table.unscaled_log_alpha(t, i).exp()
}

fn run(
    model: &AcousticModel,
    hmm: &SentenceHmm,
    features: &FeatureSeq,
    config: &ForwardConfig,
) -> Result<AlphaTable, ForwardError> {
    let mut ws = ForwardWorkspace::new();
    forward(model, hmm, features, config, &mut ws, None)
}

fn log_gauss(x: f64, mean: f64, var: f64) -> f64 {
    -0.5 * ((2.0 * std::f64::consts::PI * var).ln() + (x - mean) * (x - mean) / var)
}

#[test]
fn two_state_toy_conserves_probability() {
    init_logging();
    let model = unit_model(Array3::ones((2, 1, 1)));
    let mut b = SentenceHmmBuilder::new();
    let s0 = b.emitting(0, 0);
    let s1 = b.emitting(0, 1);
    b.transition(s0, s0, 0.5)
        .transition(s0, s1, 0.5)
        .transition(s1, s1, 1.0);
    let hmm = b.build().unwrap();

    let table = run(&model, &hmm, &origin_frames(6, 1), &ForwardConfig::default()).unwrap();
    assert_eq!(table.n_frames(), 6);
    for t in 0..6 {
        let total: f64 = (0..table.n_active(t))
            .map(|i| table.unscaled_log_alpha(t, i).exp())
            .sum();
        assert!((total - 1.0).abs() < 1e-6, "frame {t}: {total}");
    }
    assert!((unscaled(&table, 5, s0) - 0.5f64.powi(5)).abs() < 1e-6);
}

#[test]
fn phone_with_exit_state_matches_hand_computation() {
    let model = unit_model(Array3::ones((2, 1, 1)));
    let hmm = one_phone(arr2(&[[0.5, 0.5, 0.0], [0.0, 0.5, 0.5]]), &[0, 1], &[0, 0]);
    let table = run(&model, &hmm, &origin_frames(3, 1), &ForwardConfig::default()).unwrap();

    assert_eq!(table.states(0), &[0]);
    assert_eq!(table.alpha(0), &[1.0]);

    let expected = [
        vec![(0, 1.0)],
        vec![(0, 0.5), (1, 0.5), (2, 0.25)],
        vec![(0, 0.25), (1, 0.5), (2, 0.25)],
    ];
    for (t, frame) in expected.iter().enumerate() {
        assert_eq!(table.n_active(t), frame.len());
        for &(state, alpha) in frame {
            let got = unscaled(&table, t, state);
            assert!((got - alpha).abs() < 1e-6, "t={t} state={state}: {got}");
        }
    }

    let ll = table.log_likelihood(2).unwrap();
    assert!((ll - 0.25f64.ln()).abs() < 1e-6);
    assert!(table.log_likelihood(7).is_none());
}

#[test]
fn scaled_alpha_peaks_at_one_every_frame() {
    let model = unit_model(Array3::ones((2, 1, 1)));
    let hmm = one_phone(arr2(&[[0.3, 0.7, 0.0], [0.0, 0.6, 0.4]]), &[0, 1], &[0, 0]);
    let table = run(&model, &hmm, &origin_frames(5, 1), &ForwardConfig::default()).unwrap();

    for t in 0..5 {
        let best = table.alpha(t).iter().copied().fold(0.0, f64::max);
        assert!((best - 1.0).abs() < 1e-12, "frame {t}: {best}");
    }
    // Scaled densities peak at e^10, so the frame-1 best alpha is 0.7 * e^10.
    assert!((table.scale()[1] * 10f64.exp() - 1.0 / 0.7).abs() < 1e-6);
}

#[test]
fn three_frames_with_real_densities() {
    init_logging();
    let mean = Array3::from_shape_vec((1, 2, 1), vec![-1.0f32, 1.0]).unwrap();
    let var = Array3::from_shape_vec((1, 2, 1), vec![1.0f32, 0.5]).unwrap();
    let g = GaussianMixtureSet::from_params(vec![mean], vec![var], 2).unwrap();
    let mut model = AcousticModel::new(g, MixtureWeights::uniform(2, 1, 2)).unwrap();
    model.prepare(1e-4).unwrap();

    let obs = [0.2f32, -0.7, 1.3];
    let features =
        FeatureSeq::single_stream(Array2::from_shape_vec((3, 1), obs.to_vec()).unwrap());
    let hmm = one_phone(arr2(&[[0.5, 0.5, 0.0], [0.0, 0.5, 0.5]]), &[0, 1], &[0, 0]);
    let table = run(&model, &hmm, &features, &ForwardConfig::default()).unwrap();

    let b = |o: f32| {
        let o = o as f64;
        0.5 * log_gauss(o, -1.0, 1.0).exp() + 0.5 * log_gauss(o, 1.0, 0.5).exp()
    };
    let mut a = [b(obs[0]), 0.0];
    let mut exit = 0.0;
    assert!((unscaled(&table, 0, 0) - a[0]).abs() < 1e-6);
    for (t, &o) in obs.iter().enumerate().skip(1) {
        a = [a[0] * 0.5 * b(o), (a[0] * 0.5 + a[1] * 0.5) * b(o)];
        exit = a[1] * 0.5;
        assert!((unscaled(&table, t, 0) - a[0]).abs() < 1e-6);
        assert!((unscaled(&table, t, 1) - a[1]).abs() < 1e-6);
        assert!((unscaled(&table, t, 2) - exit).abs() < 1e-6);
    }
    let ll = table.log_likelihood(2).unwrap();
    assert!((ll - exit.ln()).abs() < 1e-5);
}

#[test]
fn separate_codebooks_share_one_density_scale() {
    let mean = Array3::from_shape_vec((2, 1, 1), vec![-1.0f32, 2.0]).unwrap();
    let var = Array3::from_shape_vec((2, 1, 1), vec![1.0f32, 0.5]).unwrap();
    let g = GaussianMixtureSet::from_params(vec![mean], vec![var], 1).unwrap();
    let mut model = AcousticModel::new(g, MixtureWeights::new(Array3::ones((2, 1, 1)))).unwrap();
    model.prepare(0.0).unwrap();

    let hmm = one_phone(arr2(&[[0.5, 0.5, 0.0], [0.0, 0.5, 0.5]]), &[0, 1], &[1, 0]);
    assert_eq!(hmm.local_codebooks(), &[1, 0]);

    let obs = [1.5f32, 0.0, -0.5, -1.0];
    let features =
        FeatureSeq::single_stream(Array2::from_shape_vec((4, 1), obs.to_vec()).unwrap());
    let table = run(&model, &hmm, &features, &ForwardConfig::default()).unwrap();

    let b0 = |o: f32| log_gauss(o as f64, 2.0, 0.5).exp();
    let b1 = |o: f32| log_gauss(o as f64, -1.0, 1.0).exp();
    let mut a = [b0(obs[0]), 0.0];
    for &o in &obs[1..] {
        a = [a[0] * 0.5 * b0(o), (a[0] * 0.5 + a[1] * 0.5) * b1(o)];
    }
    let ll = table.log_likelihood(2).unwrap();
    assert!((ll - (a[1] * 0.5).ln()).abs() < 1e-5, "{ll}");
}

#[test]
fn top_n_never_exceeds_full_evaluation() {
    let n_density = 8;
    let mean = Array3::from_shape_fn((1, n_density, 2), |(_, k, d)| k as f32 * 0.5 - d as f32);
    let var = Array3::from_elem((1, n_density, 2), 0.7f32);
    let frames = Array2::from_shape_fn((6, 2), |(t, d)| t as f32 * 0.4 - d as f32 * 0.3);
    let hmm = one_phone(arr2(&[[0.6, 0.4, 0.0], [0.0, 0.5, 0.5]]), &[0, 1], &[0, 0]);

    let mut lls = Vec::new();
    for n_top in [n_density, 3] {
        let g = GaussianMixtureSet::from_params(vec![mean.clone()], vec![var.clone()], n_top).unwrap();
        let mut model = AcousticModel::new(g, MixtureWeights::uniform(2, 1, n_density)).unwrap();
        model.prepare(1e-4).unwrap();
        let features = FeatureSeq::single_stream(frames.clone());
        let table = run(&model, &hmm, &features, &ForwardConfig::default()).unwrap();
        lls.push(table.log_likelihood(2).unwrap());
    }
    assert!(lls[1] <= lls[0] + 1e-9, "{lls:?}");
    assert!(lls[1].is_finite());
}

#[test]
fn tight_beam_keeps_the_best_state() {
    let model = unit_model(Array3::from_shape_vec((3, 1, 1), vec![1.0, 0.8, 0.3]).unwrap());
    let hmm = one_phone(
        arr2(&[[0.4, 0.4, 0.2, 0.0], [0.0, 0.5, 0.3, 0.2], [0.0, 0.0, 0.6, 0.4]]),
        &[0, 1, 2],
        &[0, 0, 0],
    );
    let config = ForwardConfig {
        beam: 1.0,
        ..ForwardConfig::default()
    };
    let table = run(&model, &hmm, &origin_frames(8, 1), &config).unwrap();

    for t in 0..table.n_frames() {
        assert!(table.n_active(t) >= 1);
        for &a in table.alpha(t) {
            assert!(a >= 1.0 - 1e-12, "frame {t} kept alpha {a}");
        }
    }

    let wide = run(&model, &hmm, &origin_frames(8, 1), &ForwardConfig::default()).unwrap();
    assert!(table.total_active() < wide.total_active());
    assert!(table.avg_active() >= 1.0);
}

#[test]
fn non_emitting_chain_is_resolved_within_the_frame() {
    let model = unit_model(Array3::ones((1, 1, 1)));
    let mut b = SentenceHmmBuilder::new();
    let s0 = b.emitting(0, 0);
    let n_b = b.non_emitting(0, 1);
    let n_a = b.non_emitting(0, 2);
    let n_c = b.non_emitting(0, 3);
    let s4 = b.emitting(0, 0);
    b.transition(s0, s0, 0.5)
        .transition(s0, n_b, 0.25)
        .transition(s0, n_a, 0.25)
        .transition(n_a, n_b, 1.0)
        .transition(n_b, n_c, 1.0)
        .transition(n_c, s4, 1.0)
        .transition(s4, s4, 1.0);
    let hmm = b.build().unwrap();
    assert!(hmm.state(n_a).rank() < hmm.state(n_b).rank());
    assert!(hmm.state(n_b).rank() < hmm.state(n_c).rank());

    let table = run(&model, &hmm, &origin_frames(3, 1), &ForwardConfig::default()).unwrap();

    assert!((unscaled(&table, 1, n_a) - 0.125).abs() < 1e-6);
    assert!((unscaled(&table, 1, n_b) - 0.25).abs() < 1e-6);
    assert!((unscaled(&table, 1, n_c) - 0.25).abs() < 1e-6);
    assert!(table.find(1, s4).is_none());
    assert!((unscaled(&table, 2, s4) - 0.25).abs() < 1e-6);
    assert!((unscaled(&table, 2, n_c) - 0.125).abs() < 1e-6);
}

#[test]
fn backtrace_follows_best_predecessors() {
    let model = unit_model(Array3::ones((2, 1, 1)));
    let hmm = one_phone(arr2(&[[0.6, 0.4, 0.0], [0.0, 0.7, 0.3]]), &[0, 1], &[0, 0]);
    let config = ForwardConfig {
        backpointers: true,
        ..ForwardConfig::default()
    };
    let table = run(&model, &hmm, &origin_frames(3, 1), &config).unwrap();

    let exit_bp = table.backpointers(2).unwrap()[table.find(2, 2).unwrap()];
    assert_eq!(exit_bp, 1);
    assert_eq!(table.backtrace(&hmm, 2).unwrap(), vec![0, 1, 1]);
    assert_eq!(table.backtrace(&hmm, 0).unwrap(), vec![0, 0, 0]);

    let plain = run(&model, &hmm, &origin_frames(3, 1), &ForwardConfig::default()).unwrap();
    assert!(plain.backpointers(1).is_none());
    assert!(matches!(
        plain.backtrace(&hmm, 2),
        Err(ForwardError::BackpointersDisabled)
    ));
}

#[test]
fn backtrace_from_inactive_state_fails() {
    let model = unit_model(Array3::ones((2, 1, 1)));
    let hmm = one_phone(arr2(&[[0.5, 0.5, 0.0], [0.0, 0.5, 0.5]]), &[0, 1], &[0, 0]);
    let config = ForwardConfig {
        backpointers: true,
        ..ForwardConfig::default()
    };
    let table = run(&model, &hmm, &origin_frames(1, 1), &config).unwrap();
    assert!(matches!(
        table.backtrace(&hmm, 1),
        Err(ForwardError::BrokenBacktrace { frame: 0, state: 1 })
    ));
}

fn two_phones() -> SentenceHmm {
    let tmat = arr2(&[[0.5f32, 0.5]]);
    let mut b = SentenceHmmBuilder::new();
    for phone in 0..2 {
        b.append_phone(&PhoneModel {
            phone,
            tmat_id: phone,
            tmat: tmat.view(),
            senones: &[0],
            codebooks: &[0],
        })
        .unwrap();
    }
    b.build().unwrap()
}

#[test]
fn phone_segmentation_restricts_active_states() {
    let model = unit_model(Array3::ones((1, 1, 1)));
    let hmm = two_phones();
    let features = origin_frames(4, 1);
    let segments = [
        PhoneSegment {
            phone: 0,
            start: 0,
            end: 1,
        },
        PhoneSegment {
            phone: 1,
            start: 2,
            end: 3,
        },
    ];

    let mut ws = ForwardWorkspace::new();
    let table = forward(
        &model,
        &hmm,
        &features,
        &ForwardConfig::default(),
        &mut ws,
        Some(&segments),
    )
    .unwrap();

    assert_eq!(table.states(1), &[0, 1]);
    for t in 2..4 {
        assert!(!table.states(t).is_empty());
        for &s in table.states(t) {
            assert_eq!(hmm.state(s).phone(), Some(1), "frame {t} state {s}");
        }
    }

    let free = run(&model, &hmm, &features, &ForwardConfig::default()).unwrap();
    assert!(free.find(3, 0).is_some());
}

#[test]
fn exhausted_segmentation_falls_back_to_beam() {
    let model = unit_model(Array3::ones((1, 1, 1)));
    let hmm = two_phones();
    let segments = [PhoneSegment {
        phone: 0,
        start: 0,
        end: 1,
    }];
    let mut ws = ForwardWorkspace::new();
    let table = forward(
        &model,
        &hmm,
        &origin_frames(4, 1),
        &ForwardConfig::default(),
        &mut ws,
        Some(&segments),
    )
    .unwrap();
    assert!(table.find(3, 0).is_some());
    assert!(table.find(3, 2).is_some());
}

#[test]
fn segment_phone_without_active_states_falls_back_to_beam() {
    let model = unit_model(Array3::ones((1, 1, 1)));
    let hmm = two_phones();
    let segments = [PhoneSegment {
        phone: 1,
        start: 0,
        end: 1,
    }];
    let mut ws = ForwardWorkspace::new();
    let table = forward(
        &model,
        &hmm,
        &origin_frames(3, 1),
        &ForwardConfig::default(),
        &mut ws,
        Some(&segments),
    )
    .unwrap();

    // Only phone 0 is reachable at frame 1, so the segment cannot be honoured.
    assert_eq!(table.states(1), &[0, 1]);
    assert!(table.find(2, 2).is_some());
}

#[test]
fn beam_threshold_is_floored_when_it_would_underflow() {
    // Nine streams, each density scaled to e^10. Frame-1 alphas are
    // 1/3 * e^90 * prod(weights):
    //   state 1: ~4.1e-35 (best)
    //   state 2: ~4.1e-302, above best * beam (~4.1e-305) but below 1e-300
    //   state 3: ~4.1e-300
    let n_feat = 9;
    let mut weights = Array3::<f32>::ones((4, n_feat, 1));
    weights[[1, 0, 0]] = 1e-36;
    weights[[1, 1, 0]] = 1e-37;
    for f in 0..8 {
        weights[[2, f, 0]] = 1e-38;
        weights[[3, f, 0]] = 1e-38;
    }
    weights[[2, 8, 0]] = 1e-36;
    weights[[3, 8, 0]] = 1e-34;
    let model = unit_model(weights);

    let mut b = SentenceHmmBuilder::new();
    let s0 = b.emitting(0, 0);
    let s1 = b.emitting(0, 1);
    let s2 = b.emitting(0, 2);
    let s3 = b.emitting(0, 3);
    b.transition(s0, s1, 1.0 / 3.0)
        .transition(s0, s2, 1.0 / 3.0)
        .transition(s0, s3, 1.0 / 3.0);
    let hmm = b.build().unwrap();

    let config = ForwardConfig {
        beam: 1e-270,
        ..ForwardConfig::default()
    };
    let table = run(&model, &hmm, &origin_frames(2, n_feat), &config).unwrap();

    assert_eq!(table.states(1), &[s1, s3]);
    assert_eq!(table.alpha(1)[0], 1.0);
    let kept = table.alpha(1)[1];
    assert!((kept / 1e-265 - 1.0).abs() < 1e-5, "{kept}");

    // Without density scaling the best alpha is 1/3 * 1e-73.
    let best = unscaled(&table, 1, s1);
    assert!((best / (1e-73 / 3.0) - 1.0).abs() < 1e-5, "{best}");
}

#[test]
fn zero_initial_output_probability_fails_the_utterance() {
    init_logging();
    let model = unit_model(Array3::from_shape_vec((2, 1, 1), vec![0.0, 1.0]).unwrap());
    let hmm = one_phone(arr2(&[[0.5, 0.5, 0.0], [0.0, 0.5, 0.5]]), &[0, 1], &[0, 0]);

    let mut ws = ForwardWorkspace::new();
    let err = forward(
        &model,
        &hmm,
        &origin_frames(3, 1),
        &ForwardConfig::default(),
        &mut ws,
        None,
    )
    .unwrap_err();
    assert!(matches!(err, ForwardError::InitialUnderflow { prob } if prob == 0.0));
    assert!(err.is_utterance_fatal());
    assert!(ws.active().is_released());
}

#[test]
fn all_zero_alphas_name_the_active_states() {
    let model = unit_model(Array3::from_shape_vec((2, 1, 1), vec![0.0, 1.0]).unwrap());
    let mut b = SentenceHmmBuilder::new();
    let s0 = b.emitting(0, 1);
    let s1 = b.emitting(0, 0);
    b.transition(s0, s1, 1.0).transition(s1, s1, 1.0);
    let hmm = b.build().unwrap();

    let mut ws = ForwardWorkspace::new();
    let err = forward(
        &model,
        &hmm,
        &origin_frames(3, 1),
        &ForwardConfig::default(),
        &mut ws,
        None,
    )
    .unwrap_err();
    match &err {
        ForwardError::AllAlphasZero { frame, states } => {
            assert_eq!(*frame, 1);
            assert_eq!(states, &[StateLabel::Emitting(0)]);
        }
        other => panic!("expected AllAlphasZero, got {other:?}"),
    }
    assert!(err.to_string().contains("zero at time 1"));
    assert!(ws.active().is_released());
}

#[test]
fn dead_end_graph_runs_out_of_states() {
    let model = unit_model(Array3::ones((1, 1, 1)));
    let mut b = SentenceHmmBuilder::new();
    b.emitting(0, 0);
    let hmm = b.build().unwrap();
    let err = run(&model, &hmm, &origin_frames(2, 1), &ForwardConfig::default()).unwrap_err();
    assert!(matches!(err, ForwardError::NoActiveStates { frame: 1 }));

    let single = run(&model, &hmm, &origin_frames(1, 1), &ForwardConfig::default()).unwrap();
    assert_eq!(single.n_frames(), 1);
}

#[test]
fn vanishing_best_alpha_fails_the_utterance() {
    // Nine streams with weight 1e-38 each put the frame's best alpha near
    // 1e-303 even after density scaling.
    let n_feat = 9;
    let weights = Array3::from_shape_fn((2, n_feat, 1), |(m, _, _)| if m == 0 { 1.0 } else { 1e-38 });
    let model = unit_model(weights);
    let mut b = SentenceHmmBuilder::new();
    let s0 = b.emitting(0, 0);
    let s1 = b.emitting(0, 1);
    b.transition(s0, s1, 1.0).transition(s1, s1, 1.0);
    let hmm = b.build().unwrap();

    let err = run(&model, &hmm, &origin_frames(2, n_feat), &ForwardConfig::default()).unwrap_err();
    match err {
        ForwardError::BestAlphaUnderflow { frame, balpha } => {
            assert_eq!(frame, 1);
            assert!(balpha > 0.0 && balpha < ALPHA_FLOOR);
        }
        other => panic!("expected BestAlphaUnderflow, got {other:?}"),
    }
}

#[test]
fn workspace_is_reusable_after_a_failure() {
    let good = unit_model(Array3::from_shape_vec((2, 1, 1), vec![1.0, 0.5]).unwrap());
    let bad = unit_model(Array3::from_shape_vec((2, 1, 1), vec![1.0, 0.0]).unwrap());
    let hmm = one_phone(arr2(&[[0.0, 1.0, 0.0], [0.0, 0.5, 0.5]]), &[0, 1], &[0, 0]);
    let features = origin_frames(4, 1);
    let config = ForwardConfig::default();

    let mut ws = ForwardWorkspace::new();
    let err = forward(&bad, &hmm, &features, &config, &mut ws, None).unwrap_err();
    assert!(matches!(err, ForwardError::AllAlphasZero { frame: 1, .. }));

    let reused = forward(&good, &hmm, &features, &config, &mut ws, None).unwrap();
    let fresh = run(&good, &hmm, &features, &config).unwrap();
    for t in 0..4 {
        assert_eq!(reused.states(t), fresh.states(t));
        assert_eq!(reused.alpha(t), fresh.alpha(t));
    }
    assert_eq!(reused.scale(), fresh.scale());
    assert!(ws.active().is_released());
}

#[test]
fn inputs_are_checked_before_the_pass() {
    let model = unit_model(Array3::ones((2, 1, 1)));
    let hmm = one_phone(arr2(&[[0.5, 0.5, 0.0], [0.0, 0.5, 0.5]]), &[0, 1], &[0, 0]);
    let config = ForwardConfig::default();

    assert!(matches!(
        run(&model, &hmm, &origin_frames(0, 1), &config),
        Err(ForwardError::EmptyUtterance)
    ));
    assert!(matches!(
        run(&model, &hmm, &origin_frames(3, 2), &config),
        Err(ForwardError::StreamMismatch {
            expected: 1,
            actual: 2
        })
    ));
    let wide = FeatureSeq::single_stream(Array2::zeros((3, 4)));
    assert!(matches!(
        run(&model, &hmm, &wide, &config),
        Err(ForwardError::VeclenMismatch {
            stream: 0,
            expected: 1,
            actual: 4
        })
    ));

    let foreign = one_phone(arr2(&[[0.5, 0.5]]), &[5], &[0]);
    let err = run(&model, &foreign, &origin_frames(2, 1), &config).unwrap_err();
    assert!(matches!(
        err,
        ForwardError::Graph(GraphError::MixtureOutOfRange { mixw: 5, .. })
    ));
    assert!(err.is_utterance_fatal());
}

#[test]
fn unprepared_model_stops_the_run() {
    let mean = vec![Array3::zeros((1, 1, 1))];
    let var = vec![Array3::ones((1, 1, 1))];
    let g = GaussianMixtureSet::from_params(mean, var, 1).unwrap();
    let model = AcousticModel::new(g, MixtureWeights::uniform(1, 1, 1)).unwrap();
    let hmm = one_phone(arr2(&[[0.5, 0.5]]), &[0], &[0]);

    let err = run(&model, &hmm, &origin_frames(2, 1), &ForwardConfig::default()).unwrap_err();
    assert!(matches!(err, ForwardError::Model(GaudenError::NotPrecomputed)));
    assert!(!err.is_utterance_fatal());
}

#[test]
fn feature_streams_must_agree_on_frame_count() {
    let err = FeatureSeq::new(vec![Array2::zeros((3, 2)), Array2::zeros((4, 1))]).unwrap_err();
    assert!(matches!(
        err,
        ForwardError::FrameCountMismatch {
            stream: 1,
            expected: 3,
            actual: 4
        }
    ));
}

#[test]
fn alpha_table_hands_over_its_buffers() {
    let model = unit_model(Array3::ones((2, 1, 1)));
    let hmm = one_phone(arr2(&[[0.5, 0.5, 0.0], [0.0, 0.5, 0.5]]), &[0, 1], &[0, 0]);
    let table = run(&model, &hmm, &origin_frames(3, 1), &ForwardConfig::default()).unwrap();
    let total = table.total_active();

    let (alpha, states, scale, dscale) = table.into_parts();
    assert_eq!(alpha.len(), 3);
    assert_eq!(states.iter().map(Vec::len).sum::<usize>(), total);
    assert_eq!(scale.len(), 3);
    assert!(dscale.iter().all(|d| d.len() == 1));
}
