use std::collections::BTreeSet;

use hyperibis::{
    AssessmentKind, AssessmentTarget, AssessorId, IbisError, IbisModel, IssueKind, ModelError,
    Polarity, ResourceBody, ResourceKind, SiteRole,
};

#[test]
fn hypothesis_accepts_a_single_position() {
    let model = IbisModel::in_memory();
    let problem = model.create_problem("Site safety").unwrap();
    let issue = model
        .add_issue(problem, "Is X hazardous?", IssueKind::Hypothesis)
        .unwrap();
    model.add_position(issue, "X is hazardous").unwrap();

    let err = model.add_position(issue, "X is safe").unwrap_err();
    assert!(matches!(
        err,
        IbisError::Model(ModelError::CardinalityViolation { owner, .. }) if owner == issue
    ));
    assert_eq!(model.positions(issue).unwrap().len(), 1);
}

#[test]
fn mutex_positions_coexist_at_write_time() {
    let model = IbisModel::in_memory();
    let problem = model.create_problem("Procurement").unwrap();
    let issue = model.add_issue(problem, "Which supplier?", IssueKind::Mutex).unwrap();
    for name in ["A", "B", "C"] {
        model.add_position(issue, name).unwrap();
    }
    assert_eq!(model.positions(issue).unwrap().len(), 3);
}

#[test]
fn position_site_set_is_fixed() {
    let model = IbisModel::in_memory();
    let problem = model.create_problem("p").unwrap();
    let issue = model.add_issue(problem, "q", IssueKind::Regular).unwrap();
    let position = model.add_position(issue, "a").unwrap();

    let roles: BTreeSet<SiteRole> = model
        .graph()
        .sites_of(position)
        .unwrap()
        .into_iter()
        .map(|s| s.role)
        .collect();
    assert_eq!(
        roles,
        [SiteRole::CPlus, SiteRole::CMinus, SiteRole::EPlus, SiteRole::EMinus]
            .into_iter()
            .collect()
    );

    for role in [SiteRole::Evidence, SiteRole::CPlus, SiteRole::Support] {
        let err = model.attach_site(position, role).unwrap_err();
        assert!(
            matches!(err, IbisError::Model(ModelError::InvalidSiteConfiguration { .. })),
            "{role}: {err}"
        );
    }
    assert_eq!(model.graph().sites_of(position).unwrap().len(), 4);
}

#[test]
fn argument_is_wired_to_its_position() {
    let model = IbisModel::in_memory();
    let problem = model.create_problem("p").unwrap();
    let issue = model.add_issue(problem, "q", IssueKind::Regular).unwrap();
    let position = model.add_position(issue, "a").unwrap();
    let pro = model.add_argument(position, Polarity::Support, "pro", None).unwrap();
    let con = model.add_argument(position, Polarity::Rebut, "con", None).unwrap();

    let plus = model.site_of(position, SiteRole::CPlus).unwrap();
    let minus = model.site_of(position, SiteRole::CMinus).unwrap();
    let pro_conclusion = model.site_of(pro, SiteRole::Conclusion).unwrap();
    let con_conclusion = model.site_of(con, SiteRole::Conclusion).unwrap();

    assert!(model.link_between(pro_conclusion, plus).unwrap().unwrap().is_live());
    assert!(model.link_between(con_conclusion, minus).unwrap().unwrap().is_live());
    assert!(model.link_between(pro_conclusion, minus).unwrap().is_none());
    assert_eq!(model.arguments_for(position).unwrap().len(), 2);
}

#[test]
fn every_position_has_exactly_one_issue() {
    let model = IbisModel::in_memory();
    let problem = model.create_problem("p").unwrap();
    let issues: Vec<_> = (0..3)
        .map(|i| model.add_issue(problem, &format!("q{i}"), IssueKind::Regular).unwrap())
        .collect();
    for (i, issue) in issues.iter().enumerate() {
        for j in 0..=i {
            model.add_position(*issue, &format!("a{i}{j}")).unwrap();
        }
    }

    let snapshot = model.export().unwrap();
    for resource in snapshot.resources.iter().filter(|r| r.kind() == ResourceKind::Position) {
        let owners: Vec<_> = issues
            .iter()
            .filter(|issue| {
                model
                    .positions(**issue)
                    .unwrap()
                    .iter()
                    .any(|p| p.id == resource.id)
            })
            .collect();
        assert_eq!(owners.len(), 1);
        assert_eq!(*owners[0], model.issue_of(resource.id).unwrap());
    }
}

#[test]
fn assessors_do_not_overwrite_each_other() {
    let model = IbisModel::in_memory();
    let problem = model.create_problem("p").unwrap();
    let issue = model.add_issue(problem, "q", IssueKind::Regular).unwrap();
    let position = model.add_position(issue, "a").unwrap();
    let argument = model.add_argument(position, Polarity::Support, "because", None).unwrap();
    let target = AssessmentTarget::Emitter(model.site_of(argument, SiteRole::Conclusion).unwrap());

    let alice = AssessorId::user("alice");
    let bob = AssessorId::user("bob");
    model.set_assessment(&alice, target, AssessmentKind::Belief, 0.9).unwrap();
    model.set_assessment(&bob, target, AssessmentKind::Belief, 0.2).unwrap();

    let divergence = model.divergence(target, AssessmentKind::Belief).unwrap();
    assert_eq!(divergence.len(), 2);
    assert_eq!(divergence[&alice], 0.9);
    assert_eq!(divergence[&bob], 0.2);

    let summary = model.disagreement(target, AssessmentKind::Belief).unwrap().unwrap();
    assert!((summary.spread - 0.7).abs() < 1e-12);

    let previous = model.set_assessment(&alice, target, AssessmentKind::Belief, 0.5).unwrap();
    assert_eq!(previous, Some(0.9));
    assert_eq!(
        model.get_assessment(&bob, target, AssessmentKind::Belief).unwrap(),
        Some(0.2)
    );
}

#[test]
fn assessment_values_are_not_normalized() {
    let model = IbisModel::in_memory();
    let problem = model.create_problem("p").unwrap();
    let evidence = model.add_evidence(problem, "cost estimate", Some("ledger")).unwrap();
    let target = AssessmentTarget::Emitter(model.site_of(evidence, SiteRole::Evidence).unwrap());
    let who = AssessorId::group("finance");

    model.set_assessment(&who, target, AssessmentKind::ExpectedValue, -1250.0).unwrap();
    assert_eq!(
        model.get_assessment(&who, target, AssessmentKind::ExpectedValue).unwrap(),
        Some(-1250.0)
    );

    let err = model
        .set_assessment(&who, target, AssessmentKind::Belief, f64::NAN)
        .unwrap_err();
    assert!(err.is_validation());

    let err = model
        .set_assessment(&who, target, AssessmentKind::Strength, 1.0)
        .unwrap_err();
    assert!(matches!(err, IbisError::Model(ModelError::InvalidAssessmentTarget { .. })));
}

#[test]
fn retraction_cascades_and_counts_links() {
    let model = IbisModel::in_memory();
    let problem = model.create_problem("p").unwrap();
    let issue = model.add_issue(problem, "q", IssueKind::Regular).unwrap();
    let position = model.add_position(issue, "a").unwrap();
    let argument = model.add_argument(position, Polarity::Support, "because", None).unwrap();
    let evidence = model.add_evidence(problem, "reading", None).unwrap();
    model.cite(evidence, argument, Polarity::Support).unwrap();

    let outcome = model.retract(position).unwrap();
    assert_eq!(outcome.retracted, vec![position, argument]);
    assert_eq!(outcome.links_retracted, 2);

    assert!(model.positions(issue).unwrap().is_empty());
    assert!(model.resource(evidence).unwrap().is_live());
    let err = model.add_argument(position, Polarity::Support, "late", None).unwrap_err();
    assert!(matches!(err, IbisError::Model(ModelError::Retracted { .. })));

    let again = model.retract(position).unwrap();
    assert!(again.retracted.is_empty());
    assert_eq!(again.links_retracted, 0);
}

#[test]
fn export_serializes_the_whole_model() {
    let model = IbisModel::in_memory();
    let problem = model.create_problem("p").unwrap();
    let issue = model.add_issue(problem, "q", IssueKind::World).unwrap();
    let position = model.add_position(issue, "a").unwrap();
    model
        .set_assessment(
            &AssessorId::user("alice"),
            AssessmentTarget::Emitter(model.site_of(position, SiteRole::EPlus).unwrap()),
            AssessmentKind::Belief,
            0.4,
        )
        .unwrap();

    let snapshot = model.export().unwrap();
    assert_eq!(snapshot.resources.len(), 3);
    assert_eq!(snapshot.sites.len(), 4);
    assert_eq!(snapshot.assessments.len(), 1);

    let json = serde_json::to_string(&snapshot).unwrap();
    let back: hyperibis::ModelSnapshot = serde_json::from_str(&json).unwrap();
    assert_eq!(back.resources.len(), 3);
    assert!(matches!(
        back.resources.iter().find(|r| r.id == issue).unwrap().body,
        ResourceBody::Issue { issue_kind: IssueKind::World, .. }
    ));
}
