use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use hyperibis::{
    AssessmentKind, AssessmentTarget, AssessorId, CancellationToken, IbisModel, IssueKind,
    Polarity, PropagationConfig, PropagationEngine, PropagationQuery, SiteRole,
};

/// Builds `issues` issues with four positions each and three arguments per
/// position. Every argument cites one evidence resource; every tenth
/// argument also feeds its position back into its own support, so the graph
/// carries damped cycles.
fn build_model(issues: usize, alice: &AssessorId) -> Arc<IbisModel> {
    let model = Arc::new(IbisModel::in_memory());
    let problem = model.create_problem("bench").unwrap();
    let mut n = 0u32;
    for i in 0..issues {
        let issue = model
            .add_issue(problem, &format!("issue {i}"), IssueKind::Regular)
            .unwrap();
        for p in 0..4 {
            let position = model.add_position(issue, &format!("position {i}.{p}")).unwrap();
            for a in 0..3 {
                n += 1;
                let polarity = if a == 2 { Polarity::Rebut } else { Polarity::Support };
                let argument = model
                    .add_argument(position, polarity, &format!("argument {i}.{p}.{a}"), None)
                    .unwrap();
                let evidence = model
                    .add_evidence(problem, &format!("evidence {i}.{p}.{a}"), None)
                    .unwrap();
                model.cite(evidence, argument, Polarity::Support).unwrap();
                let anchor = model.site_of(evidence, SiteRole::Evidence).unwrap();
                model
                    .set_assessment(
                        alice,
                        AssessmentTarget::Emitter(anchor),
                        AssessmentKind::Belief,
                        f64::from(n % 10) / 10.0,
                    )
                    .unwrap();

                if n % 10 == 0 {
                    let back = model
                        .link(
                            model.site_of(position, SiteRole::EPlus).unwrap(),
                            model.site_of(argument, SiteRole::Support).unwrap(),
                        )
                        .unwrap()
                        .link;
                    model
                        .set_assessment(alice, AssessmentTarget::Link(back.id), AssessmentKind::Strength, 0.5)
                        .unwrap();
                }
            }
        }
    }
    model
}

fn bench_propagate(c: &mut Criterion) {
    let alice = AssessorId::user("alice");
    let query = PropagationQuery::belief(alice.clone());
    let mut group = c.benchmark_group("propagation/full");

    for issues in [10usize, 100] {
        let model = build_model(issues, &alice);
        let sites = model.export().unwrap().sites.len();
        group.throughput(Throughput::Elements(sites as u64));
        group.bench_with_input(BenchmarkId::from_parameter(issues), &issues, |b, _| {
            b.iter_batched(
                // Fresh engine per batch so the cache never answers.
                || PropagationEngine::new(Arc::clone(&model), PropagationConfig::default()).unwrap(),
                |engine| {
                    let report = engine.propagate(&query, &CancellationToken::new()).unwrap();
                    assert!(!report.positions.is_empty());
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_cached(c: &mut Criterion) {
    let alice = AssessorId::user("alice");
    let model = build_model(100, &alice);
    let engine = PropagationEngine::new(Arc::clone(&model), PropagationConfig::default()).unwrap();
    let query = PropagationQuery::belief(alice);
    engine.propagate(&query, &CancellationToken::new()).unwrap();

    c.bench_function("propagation/cached", |b| {
        b.iter(|| engine.propagate(&query, &CancellationToken::new()).unwrap());
    });
}

criterion_group!(benches, bench_propagate, bench_cached);
criterion_main!(benches);
