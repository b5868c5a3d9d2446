use std::sync::Arc;

use hyperibis::{
    AssessmentKind, AssessmentTarget, AssessorId, CancellationToken, IbisError, IbisModel,
    IssueKind, Polarity, PropagationConfig, PropagationEngine, PropagationError, PropagationQuery,
    ResourceId, SiteId, SiteRole, Status,
};

fn engine(model: &Arc<IbisModel>) -> PropagationEngine {
    PropagationEngine::new(Arc::clone(model), PropagationConfig::default()).unwrap()
}

fn set(model: &IbisModel, who: &AssessorId, target: AssessmentTarget, kind: AssessmentKind, value: f64) {
    model.set_assessment(who, target, kind, value).unwrap();
}

#[test]
fn alice_hazard_scenario() {
    let model = Arc::new(IbisModel::in_memory());
    let problem = model.create_problem("Site safety").unwrap();
    let issue = model
        .add_issue(problem, "Is X hazardous?", IssueKind::Hypothesis)
        .unwrap();
    let position = model.add_position(issue, "X is hazardous").unwrap();
    let a1 = model
        .add_argument(position, Polarity::Support, "Readings exceed limits", None)
        .unwrap();
    let evidence = model
        .add_evidence(problem, "sensor reading > threshold", Some("sensor log"))
        .unwrap();
    model.cite(evidence, a1, Polarity::Support).unwrap();

    let alice = AssessorId::user("alice");
    let conclusion = model.site_of(a1, SiteRole::Conclusion).unwrap();
    let plus = model.site_of(position, SiteRole::CPlus).unwrap();
    let link = model.link_between(conclusion, plus).unwrap().unwrap();
    set(&model, &alice, AssessmentTarget::Emitter(conclusion), AssessmentKind::Belief, 0.9);
    set(&model, &alice, AssessmentTarget::Link(link.id), AssessmentKind::Strength, 1.0);

    let engine = engine(&model);
    let value = engine
        .aggregate(plus, &PropagationQuery::belief(alice), &CancellationToken::new())
        .unwrap();
    assert_eq!(value.status, Status::Converged);
    assert!((value.value.unwrap() - 0.9).abs() < 1e-12);
}

#[test]
fn supporting_and_falsifying_stay_separate() {
    let model = Arc::new(IbisModel::in_memory());
    let problem = model.create_problem("p").unwrap();
    let issue = model.add_issue(problem, "q", IssueKind::Regular).unwrap();
    let position = model.add_position(issue, "a").unwrap();
    let pro = model.add_argument(position, Polarity::Support, "pro", None).unwrap();
    let con = model.add_argument(position, Polarity::Rebut, "con", None).unwrap();

    let bob = AssessorId::user("bob");
    for (arg, value) in [(pro, 0.8), (con, 0.6)] {
        let site = model.site_of(arg, SiteRole::Conclusion).unwrap();
        set(&model, &bob, AssessmentTarget::Emitter(site), AssessmentKind::Belief, value);
    }
    let con_link = model
        .link_between(
            model.site_of(con, SiteRole::Conclusion).unwrap(),
            model.site_of(position, SiteRole::CMinus).unwrap(),
        )
        .unwrap()
        .unwrap();
    set(&model, &bob, AssessmentTarget::Link(con_link.id), AssessmentKind::Strength, 0.5);

    let report = engine(&model)
        .propagate(&PropagationQuery::belief(bob), &CancellationToken::new())
        .unwrap();
    let agg = report.position(position).unwrap();
    assert!((agg.supporting.unwrap() - 0.8).abs() < 1e-12);
    assert!((agg.falsifying.unwrap() - 0.3).abs() < 1e-12);
}

#[test]
fn repeated_queries_are_identical() {
    let model = Arc::new(IbisModel::in_memory());
    let problem = model.create_problem("p").unwrap();
    let alice = AssessorId::user("alice");
    for i in 0..5 {
        let issue = model.add_issue(problem, &format!("q{i}"), IssueKind::Regular).unwrap();
        let position = model.add_position(issue, "a").unwrap();
        for j in 0..3 {
            let polarity = if j % 2 == 0 { Polarity::Support } else { Polarity::Rebut };
            let arg = model.add_argument(position, polarity, &format!("arg{j}"), None).unwrap();
            let site = model.site_of(arg, SiteRole::Conclusion).unwrap();
            set(
                &model,
                &alice,
                AssessmentTarget::Emitter(site),
                AssessmentKind::Belief,
                0.1 * f64::from(i + j),
            );
        }
    }

    let query = PropagationQuery::belief(alice);
    let first = engine(&model).propagate(&query, &CancellationToken::new()).unwrap();
    let second = engine(&model).propagate(&query, &CancellationToken::new()).unwrap();
    assert_eq!(*first, *second);
}

/// Position P is supported by argument A, and P's own `EPlus` is cited into
/// A's support with the given strength, closing a loop. Evidence E anchors
/// the loop with belief 1.
fn loop_model(strength: f64) -> (Arc<IbisModel>, ResourceId, AssessorId) {
    loop_model_with(strength, true)
}

fn loop_model_with(strength: f64, anchored: bool) -> (Arc<IbisModel>, ResourceId, AssessorId) {
    let model = Arc::new(IbisModel::in_memory());
    let problem = model.create_problem("p").unwrap();
    let issue = model.add_issue(problem, "q", IssueKind::Regular).unwrap();
    let position = model.add_position(issue, "a").unwrap();
    let argument = model.add_argument(position, Polarity::Support, "self-reinforcing", None).unwrap();
    let evidence = model.add_evidence(problem, "anchor", None).unwrap();
    model.cite(evidence, argument, Polarity::Support).unwrap();

    let e_plus = model.site_of(position, SiteRole::EPlus).unwrap();
    let support = model.site_of(argument, SiteRole::Support).unwrap();
    let back = model.link(e_plus, support).unwrap().link;

    let carol = AssessorId::user("carol");
    let anchor: SiteId = model.site_of(evidence, SiteRole::Evidence).unwrap();
    if anchored {
        set(&model, &carol, AssessmentTarget::Emitter(anchor), AssessmentKind::Belief, 1.0);
    }
    set(&model, &carol, AssessmentTarget::Link(back.id), AssessmentKind::Strength, strength);
    (model, position, carol)
}

#[test]
fn damped_cycle_converges() {
    let (model, position, carol) = loop_model(0.5);
    let report = engine(&model)
        .propagate(&PropagationQuery::belief(carol), &CancellationToken::new())
        .unwrap();
    assert_eq!(report.outcome, Status::Converged);
    assert_eq!(report.cycles.len(), 1);
    assert!(report.cycles[0].iterations <= PropagationConfig::default().max_iterations);
    // x = 1 + 0.5 x
    let supporting = report.position(position).unwrap().supporting.unwrap();
    assert!((supporting - 2.0).abs() < 1e-6, "{supporting}");
}

#[test]
fn undamped_cycle_is_non_convergent() {
    let (model, position, carol) = loop_model(1.0);
    let report = engine(&model)
        .propagate(&PropagationQuery::belief(carol), &CancellationToken::new())
        .unwrap();
    assert_eq!(report.outcome, Status::NonConvergent);
    assert_eq!(report.position(position).unwrap().status, Status::NonConvergent);
    let plus = model.site_of(position, SiteRole::CPlus).unwrap();
    assert!(report.non_convergent().contains(&plus));

    let err = (*report).clone().into_converged().unwrap_err();
    assert!(matches!(err, PropagationError::NonConvergent { .. }));
}

#[test]
fn unfed_undamped_cycle_is_non_convergent() {
    for strength in [1.0, 2.0] {
        let (model, position, carol) = loop_model_with(strength, false);
        let report = engine(&model)
            .propagate(&PropagationQuery::belief(carol), &CancellationToken::new())
            .unwrap();
        assert_eq!(report.outcome, Status::NonConvergent, "strength {strength}");
        assert_eq!(report.cycles.len(), 1);
        assert!(report.cycles[0].loop_gain >= 1.0);
        assert_eq!(report.position(position).unwrap().status, Status::NonConvergent);
    }
}

#[test]
fn unfed_damped_cycle_converges_to_zero() {
    let (model, position, carol) = loop_model_with(0.5, false);
    let report = engine(&model)
        .propagate(&PropagationQuery::belief(carol), &CancellationToken::new())
        .unwrap();
    assert_eq!(report.outcome, Status::Converged);
    assert!(report.cycles[0].loop_gain < 1.0);
    assert_eq!(report.position(position).unwrap().supporting, Some(0.0));
}

#[test]
fn world_assumption_excludes_alternatives_and_dependents() {
    let model = Arc::new(IbisModel::in_memory());
    let problem = model.create_problem("Flood planning").unwrap();
    let world = model.add_issue(problem, "Which season?", IssueKind::World).unwrap();
    let wet = model.add_position(world, "Wet season").unwrap();
    let dry = model.add_position(world, "Dry season").unwrap();

    let issue = model.add_issue(problem, "Open the dam?", IssueKind::Regular).unwrap();
    let open = model.add_position(issue, "Open it").unwrap();
    let wet_arg = model.add_argument(open, Polarity::Support, "Reservoir is full", None).unwrap();
    let dry_arg = model.add_argument(open, Polarity::Support, "Farms need water", None).unwrap();
    model.declare_dependency(wet_arg, wet).unwrap();
    model.declare_dependency(dry_arg, dry).unwrap();

    let dan = AssessorId::user("dan");
    for (arg, value) in [(wet_arg, 0.7), (dry_arg, 0.4)] {
        let site = model.site_of(arg, SiteRole::Conclusion).unwrap();
        set(&model, &dan, AssessmentTarget::Emitter(site), AssessmentKind::Belief, value);
    }

    let engine = engine(&model);
    let cancel = CancellationToken::new();
    let everything = engine.propagate(&PropagationQuery::belief(dan.clone()), &cancel).unwrap();
    assert!((everything.position(open).unwrap().supporting.unwrap() - 1.1).abs() < 1e-12);

    let wet_world = engine
        .propagate(&PropagationQuery::belief(dan.clone()).assuming(wet), &cancel)
        .unwrap();
    assert!((wet_world.position(open).unwrap().supporting.unwrap() - 0.7).abs() < 1e-12);
    assert!(wet_world.excluded.contains(&dry));
    assert!(wet_world.excluded.contains(&dry_arg));
    assert_eq!(wet_world.position(dry).unwrap().status, Status::Inactive);

    let err = engine
        .propagate(&PropagationQuery::belief(dan).assuming(open), &cancel)
        .unwrap_err();
    assert!(matches!(err, IbisError::Propagation(PropagationError::InvalidWorld { .. })));
}

#[test]
fn cancelled_run_reports_cancellation_and_is_not_cached() {
    let (model, position, carol) = loop_model(0.5);
    let engine = engine(&model);
    let query = PropagationQuery::belief(carol);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = engine.propagate(&query, &cancel).unwrap();
    assert_eq!(report.outcome, Status::Cancelled);
    assert_eq!(report.position(position).unwrap().supporting, None);
    assert!(matches!(
        (*report).clone().into_converged(),
        Err(PropagationError::Cancelled { .. })
    ));

    let fresh = engine.propagate(&query, &CancellationToken::new()).unwrap();
    assert_eq!(fresh.outcome, Status::Converged);
}

#[test]
fn retraction_removes_contribution() {
    let model = Arc::new(IbisModel::in_memory());
    let problem = model.create_problem("p").unwrap();
    let issue = model.add_issue(problem, "q", IssueKind::Regular).unwrap();
    let position = model.add_position(issue, "a").unwrap();
    let arg = model.add_argument(position, Polarity::Support, "because", None).unwrap();
    let alice = AssessorId::user("alice");
    let site = model.site_of(arg, SiteRole::Conclusion).unwrap();
    set(&model, &alice, AssessmentTarget::Emitter(site), AssessmentKind::Belief, 0.9);

    let engine = engine(&model);
    let query = PropagationQuery::belief(alice);
    let before = engine.propagate(&query, &CancellationToken::new()).unwrap();
    assert!((before.position(position).unwrap().supporting.unwrap() - 0.9).abs() < 1e-12);

    let outcome = model.retract(arg).unwrap();
    assert_eq!(outcome.links_retracted, 1);
    let after = engine.propagate(&query, &CancellationToken::new()).unwrap();
    assert_eq!(after.position(position).unwrap().supporting, Some(0.0));
    assert_eq!(after.emitters[&site].status, Status::Inactive);
}
