use bw_core::gauden::GaussianMixtureSet;
use bw_core::state_seq::StateKind;
use bw_core::{
    AcousticModel, BwError, ForwardError, GaudenError, GraphError, MixtureWeights, PhoneModel,
    SentenceHmmBuilder, StateLabel,
};
use ndarray::{arr2, Array2, Array3};

fn phone<'a>(phone: u32, tmat: &'a Array2<f32>, senones: &'a [u32], codebooks: &'a [u32]) -> PhoneModel<'a> {
    PhoneModel {
        phone,
        tmat_id: phone + 10,
        tmat: tmat.view(),
        senones,
        codebooks,
    }
}

#[test]
fn append_phone_adds_emitting_states_and_exit() {
    let tmat = arr2(&[[0.6f32, 0.4, 0.0], [0.0, 0.7, 0.3]]);
    let mut b = SentenceHmmBuilder::new();
    let ids = b.append_phone(&phone(3, &tmat, &[20, 21], &[4, 4])).unwrap();
    assert_eq!(ids, 0..3);
    let hmm = b.build().unwrap();

    assert_eq!(hmm.n_state(), 3);
    assert_eq!(hmm.state(0).kind(), StateKind::Emitting { mixw: 20, cb: 4 });
    assert_eq!(hmm.state(1).mixw(), Some(21));
    assert!(!hmm.state(2).is_emitting());
    assert_eq!(hmm.state(2).cb(), None);
    for s in 0..3 {
        assert_eq!(hmm.state(s).phone(), Some(3));
        assert_eq!(hmm.state(s).tmat(), 13);
        assert_eq!(hmm.state(s).m_state(), s);
    }

    // Zero-probability arcs are dropped.
    let next: Vec<(u32, f32)> = hmm.state(0).next().iter().map(|t| (t.state, t.prob)).collect();
    assert_eq!(next, vec![(0, 0.6), (1, 0.4)]);
    let prior: Vec<u32> = hmm.state(1).prior().iter().map(|t| t.state).collect();
    assert_eq!(prior, vec![0, 1]);
    assert_eq!(hmm.state(2).prior().len(), 1);
}

#[test]
fn consecutive_phones_are_linked_through_the_exit() {
    let tmat = arr2(&[[0.5f32, 0.5]]);
    let mut b = SentenceHmmBuilder::new();
    let first = b.append_phone(&phone(0, &tmat, &[0], &[0])).unwrap();
    let second = b.append_phone(&phone(1, &tmat, &[1], &[2])).unwrap();
    assert_eq!(first, 0..2);
    assert_eq!(second, 2..4);
    let hmm = b.build().unwrap();

    let link = hmm.state(1).next();
    assert_eq!(link.len(), 1);
    assert_eq!(link[0].state, 2);
    assert_eq!(link[0].prob, 1.0);
    assert!(hmm.state(3).next().is_empty());
}

#[test]
fn malformed_phone_models_are_rejected() {
    let square = Array2::<f32>::zeros((2, 2));
    let mut b = SentenceHmmBuilder::new();
    assert!(matches!(
        b.append_phone(&phone(0, &square, &[0, 1], &[0, 0])),
        Err(GraphError::PhoneModel(_))
    ));

    let tmat = arr2(&[[0.5f32, 0.5]]);
    assert!(matches!(
        b.append_phone(&phone(0, &tmat, &[0, 1], &[0])),
        Err(GraphError::PhoneModel(_))
    ));
    assert!(matches!(b.build(), Err(GraphError::Empty)));
}

#[test]
fn local_codebooks_follow_first_appearance() {
    let mut b = SentenceHmmBuilder::new();
    let a = b.emitting(7, 0);
    let c = b.emitting(2, 1);
    let d = b.emitting(7, 2);
    let e = b.emitting(5, 3);
    b.transition(a, c, 1.0).transition(c, d, 1.0).transition(d, e, 1.0);
    let hmm = b.build().unwrap();

    assert_eq!(hmm.n_local_cb(), 3);
    assert_eq!(hmm.local_codebooks(), &[7, 2, 5]);
    let l_cb: Vec<u32> = hmm.states().iter().map(|s| s.l_cb()).collect();
    assert_eq!(l_cb, vec![0, 1, 0, 2]);
}

#[test]
fn non_emitting_states_are_ranked_topologically() {
    let mut b = SentenceHmmBuilder::new();
    let s0 = b.emitting(0, 0);
    let late = b.non_emitting(0, 1);
    let mid = b.non_emitting(0, 2);
    let early = b.non_emitting(0, 3);
    b.transition(s0, early, 1.0)
        .transition(early, mid, 0.5)
        .transition(early, late, 0.5)
        .transition(mid, late, 1.0);
    let hmm = b.build().unwrap();

    let rank = |s: u32| hmm.state(s).rank();
    assert!(rank(early) < rank(mid));
    assert!(rank(mid) < rank(late));
}

#[test]
fn structural_errors_are_reported() {
    let mut b = SentenceHmmBuilder::new();
    b.non_emitting(0, 0);
    assert!(matches!(b.build(), Err(GraphError::InitialNonEmitting)));

    let mut b = SentenceHmmBuilder::new();
    let s0 = b.emitting(0, 0);
    b.transition(s0, 4, 1.0);
    assert!(matches!(
        b.build(),
        Err(GraphError::DanglingTransition {
            from: 0,
            to: 4,
            n_state: 1
        })
    ));

    let mut b = SentenceHmmBuilder::new();
    let s0 = b.emitting(0, 0);
    b.transition(s0, s0, 1.5);
    assert!(matches!(
        b.build(),
        Err(GraphError::InvalidTransitionProb { from: 0, to: 0, .. })
    ));

    let mut b = SentenceHmmBuilder::new();
    let s0 = b.emitting(0, 0);
    let n1 = b.non_emitting(0, 1);
    let n2 = b.non_emitting(0, 2);
    b.transition(s0, n1, 1.0)
        .transition(n1, n2, 1.0)
        .transition(n2, n1, 1.0);
    assert!(matches!(b.build(), Err(GraphError::NonEmittingCycle(_))));
}

#[test]
fn emitting_self_loops_are_not_cycles() {
    let mut b = SentenceHmmBuilder::new();
    let s0 = b.emitting(0, 0);
    let n1 = b.non_emitting(0, 1);
    b.transition(s0, s0, 0.5)
        .transition(s0, n1, 0.5)
        .transition(n1, s0, 1.0);
    assert!(b.build().is_ok());
}

#[test]
fn labels_identify_states() {
    let mut b = SentenceHmmBuilder::new();
    let s0 = b.emitting(1, 42);
    let n = b.non_emitting(6, 3);
    b.set_phone(n, 9).transition(s0, n, 1.0);
    let hmm = b.build().unwrap();

    assert_eq!(hmm.state(s0).label(), StateLabel::Emitting(42));
    assert_eq!(hmm.state(s0).label().to_string(), "42");
    assert_eq!(hmm.state(n).label().to_string(), "N(6,3)");
    assert_eq!(hmm.state(n).phone(), Some(9));
}

#[test]
fn check_model_rejects_unknown_codebooks() {
    let g = GaussianMixtureSet::new(&[1], 2, 1, 1).unwrap();
    let model = AcousticModel::new(g, MixtureWeights::uniform(3, 1, 1)).unwrap();

    let mut b = SentenceHmmBuilder::new();
    b.emitting(2, 0);
    let hmm = b.build().unwrap();
    assert!(matches!(
        hmm.check_model(&model),
        Err(GraphError::CodebookOutOfRange {
            state: 0,
            cb: 2,
            n_mgau: 2
        })
    ));

    let mut b = SentenceHmmBuilder::new();
    b.emitting(1, 2);
    assert!(b.build().unwrap().check_model(&model).is_ok());
}

#[test]
fn acoustic_model_checks_weight_shape() {
    let g = GaussianMixtureSet::new(&[2, 3], 1, 4, 2).unwrap();
    assert!(matches!(
        AcousticModel::new(g.clone(), MixtureWeights::uniform(1, 1, 4)),
        Err(GaudenError::MixtureWeights(_))
    ));
    assert!(matches!(
        AcousticModel::new(g.clone(), MixtureWeights::uniform(1, 2, 3)),
        Err(GaudenError::MixtureWeights(_))
    ));
    assert!(AcousticModel::new(g, MixtureWeights::uniform(1, 2, 4)).is_ok());
}

#[test]
fn mixture_weights_normalize_rows() {
    let mut w = MixtureWeights::new(
        Array3::from_shape_vec((2, 1, 2), vec![1.0f32, 3.0, 0.0, 0.0]).unwrap(),
    );
    assert_eq!(w.normalize(), 1);
    assert_eq!(w.get(0).row(0).to_vec(), vec![0.25, 0.75]);
    assert_eq!(w.get(1).row(0).to_vec(), vec![0.0, 0.0]);
}

#[test]
fn error_classification_separates_model_from_utterance() {
    let model_err: BwError = GaudenError::NotPrecomputed.into();
    assert!(!model_err.is_utterance_fatal());

    let graph_err: BwError = GraphError::Empty.into();
    assert!(graph_err.is_utterance_fatal());

    let forward_err: BwError = ForwardError::NoActiveStates { frame: 3 }.into();
    assert!(forward_err.is_utterance_fatal());

    let wrapped: BwError = ForwardError::from(GaudenError::AlreadyPrecomputed).into();
    assert!(!wrapped.is_utterance_fatal());

    for err in [model_err, graph_err, forward_err, wrapped] {
        assert!(!err.to_string().is_empty());
    }
}
