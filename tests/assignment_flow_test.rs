// End-to-end assignment flow tests.
//
// These run against a real PostgreSQL database:
//   DATABASE_URL=postgres://localhost/experiments_test cargo test -- --ignored
//
// Each test seeds its own admin/project so tests can run concurrently
// against a shared database.

use sqlx::PgPool;
use uuid::Uuid;

use experiment_service::db::{self, admin_repo, experiment_repo, project_repo, variant_repo};
use experiment_service::models::user::IdentifyPayload;
use experiment_service::models::{Experiment, ExperimentKind, ExperimentStatus, Project};
use experiment_service::services::{distribution, experiments, identity};

async fn test_pool() -> PgPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for DB tests");
    db::init_pool(&url).await.expect("connect test database")
}

async fn seed_project(pool: &PgPool) -> Project {
    let suffix = Uuid::new_v4().simple().to_string();
    let admin = admin_repo::insert(
        pool,
        &format!("admin-{suffix}@example.test"),
        "unused-hash",
        false,
    )
    .await
    .expect("create admin");

    project_repo::insert(
        pool,
        admin.id,
        &suffix[..32],
        &format!("Test project {suffix}"),
        None,
    )
    .await
    .expect("create project")
}

async fn running_experiment(
    pool: &PgPool,
    project: &Project,
    kind: ExperimentKind,
) -> Experiment {
    let suffix = Uuid::new_v4().simple().to_string();
    let (experiment, _) = experiments::create_experiment(
        pool,
        project.id,
        &format!("exp-{suffix}"),
        "Test experiment",
        "",
        kind,
    )
    .await
    .expect("create experiment");

    experiment_repo::update(
        pool,
        experiment.id,
        &experiment.key,
        &experiment.name,
        &experiment.description,
        ExperimentStatus::Running,
    )
    .await
    .expect("move experiment to running")
}

async fn identify_device(pool: &PgPool, project: &Project, device_id: &str) -> Uuid {
    identity::identify(
        pool,
        project.id,
        IdentifyPayload {
            device_id: Some(device_id.to_string()),
            ..Default::default()
        },
    )
    .await
    .expect("identify user")
    .id
}

async fn assigned_variant_key(pool: &PgPool, project: &Project, experiment: &Experiment, payload: IdentifyPayload) -> String {
    let mut tx = pool.begin().await.expect("begin");
    let user = identity::resolve(&mut tx, project.id, payload)
        .await
        .expect("resolve user");
    let assignment = distribution::get_or_create(&mut tx, &user, experiment)
        .await
        .expect("get or create distribution");
    tx.commit().await.expect("commit");
    assignment.variant.key
}

#[tokio::test]
#[ignore] // Needs DATABASE_URL
async fn assignment_is_persistent_across_requests() {
    let pool = test_pool().await;
    let project = seed_project(&pool).await;
    let experiment = running_experiment(&pool, &project, ExperimentKind::Multi).await;
    variant_repo::insert(&pool, experiment.id, "a", None, 0.5)
        .await
        .unwrap();
    variant_repo::insert(&pool, experiment.id, "b", None, 0.5)
        .await
        .unwrap();

    let device = format!("device-{}", Uuid::new_v4().simple());
    let payload = IdentifyPayload {
        device_id: Some(device.clone()),
        ..Default::default()
    };

    let first = assigned_variant_key(&pool, &project, &experiment, payload.clone()).await;
    for _ in 0..10 {
        let again = assigned_variant_key(&pool, &project, &experiment, payload.clone()).await;
        assert_eq!(again, first, "assignment must not drift between requests");
    }
}

#[tokio::test]
#[ignore] // Needs DATABASE_URL
async fn single_live_variant_takes_the_whole_population() {
    let pool = test_pool().await;
    let project = seed_project(&pool).await;
    let experiment = running_experiment(&pool, &project, ExperimentKind::Multi).await;
    variant_repo::insert(&pool, experiment.id, "a", None, 1.0)
        .await
        .unwrap();
    variant_repo::insert(&pool, experiment.id, "b", None, 0.0)
        .await
        .unwrap();

    for i in 0..25 {
        let payload = IdentifyPayload {
            device_id: Some(format!("device-{i}-{}", Uuid::new_v4().simple())),
            ..Default::default()
        };
        let key = assigned_variant_key(&pool, &project, &experiment, payload).await;
        assert_eq!(key, "a");
    }
}

#[tokio::test]
#[ignore] // Needs DATABASE_URL
async fn recalculation_moves_exactly_the_users_off_the_drained_variant() {
    let pool = test_pool().await;
    let project = seed_project(&pool).await;
    let experiment = running_experiment(&pool, &project, ExperimentKind::Multi).await;
    let variant_a = variant_repo::insert(&pool, experiment.id, "a", None, 0.5)
        .await
        .unwrap();
    let variant_b = variant_repo::insert(&pool, experiment.id, "b", None, 0.5)
        .await
        .unwrap();

    let mut on_b = 0;
    for i in 0..100 {
        let payload = IdentifyPayload {
            device_id: Some(format!("device-{i}-{}", Uuid::new_v4().simple())),
            ..Default::default()
        };
        if assigned_variant_key(&pool, &project, &experiment, payload).await == "b" {
            on_b += 1;
        }
    }
    assert!(on_b > 0, "an even split should put someone on b");

    // Drain b, give a the full population.
    variant_repo::update(&pool, variant_a.id, "a", None, 1.0)
        .await
        .unwrap();
    variant_repo::update(&pool, variant_b.id, "b", None, 0.0)
        .await
        .unwrap();

    let (changed, _) = distribution::recalculate(&pool, &experiment).await.unwrap();
    assert_eq!(changed, on_b);

    let stats = distribution::stats(&pool, experiment.id).await.unwrap();
    assert_eq!(stats.get("a"), Some(&100.0));
    assert_eq!(stats.get("b"), Some(&0.0));

    // Unchanged configuration: a second sweep is a no-op.
    let (changed, events) = distribution::recalculate(&pool, &experiment).await.unwrap();
    assert_eq!(changed, 0);
    assert!(events.is_empty());
}

#[tokio::test]
#[ignore] // Needs DATABASE_URL
async fn identify_merges_users_when_identifiers_overlap() {
    let pool = test_pool().await;
    let project = seed_project(&pool).await;
    let experiment = running_experiment(&pool, &project, ExperimentKind::Multi).await;
    variant_repo::insert(&pool, experiment.id, "a", None, 0.5)
        .await
        .unwrap();
    variant_repo::insert(&pool, experiment.id, "b", None, 0.5)
        .await
        .unwrap();

    let device = format!("device-{}", Uuid::new_v4().simple());
    let email = format!("user-{}@example.test", Uuid::new_v4().simple());

    let by_device = identify_device(&pool, &project, &device).await;
    let by_email = identity::identify(
        &pool,
        project.id,
        IdentifyPayload {
            email: Some(email.clone()),
            ..Default::default()
        },
    )
    .await
    .unwrap()
    .id;
    assert_ne!(by_device, by_email);

    // Supplying both identifiers collapses the two records into one.
    let merged = identity::identify(
        &pool,
        project.id,
        IdentifyPayload {
            device_id: Some(device.clone()),
            email: Some(email.clone()),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(merged.device_id.as_deref(), Some(device.as_str()));
    assert_eq!(merged.email.as_deref(), Some(email.as_str()));
    assert!(merged.id == by_device || merged.id == by_email);

    // Both identifiers now resolve to the same assignment.
    let via_device = assigned_variant_key(
        &pool,
        &project,
        &experiment,
        IdentifyPayload {
            device_id: Some(device),
            ..Default::default()
        },
    )
    .await;
    let via_email = assigned_variant_key(
        &pool,
        &project,
        &experiment,
        IdentifyPayload {
            email: Some(email),
            ..Default::default()
        },
    )
    .await;
    assert_eq!(via_device, via_email);
}

#[tokio::test]
#[ignore] // Needs DATABASE_URL
async fn toggle_experiments_are_seeded_with_their_fixed_pair() {
    let pool = test_pool().await;
    let project = seed_project(&pool).await;

    let suffix = Uuid::new_v4().simple().to_string();
    let (experiment, seeded) = experiments::create_experiment(
        &pool,
        project.id,
        &format!("toggle-{suffix}"),
        "Toggle experiment",
        "",
        ExperimentKind::Toggle,
    )
    .await
    .unwrap();

    assert_eq!(experiment.status, ExperimentStatus::Draft);
    assert_eq!(seeded.len(), 2);

    let variants = variant_repo::list_for_experiment(&pool, experiment.id)
        .await
        .unwrap();
    let mut keys: Vec<&str> = variants.iter().map(|v| v.key.as_str()).collect();
    keys.sort_unstable();
    assert_eq!(keys, ["control", "enabled"]);
    for variant in &variants {
        assert_eq!(variant.rollout, 0.5);
        assert_eq!(variant.payload, Some(serde_json::json!({})));
    }
}

#[tokio::test]
#[ignore] // Needs DATABASE_URL
async fn concurrent_first_requests_resolve_to_one_assignment() {
    let pool = test_pool().await;
    let project = seed_project(&pool).await;
    let experiment = running_experiment(&pool, &project, ExperimentKind::Multi).await;
    variant_repo::insert(&pool, experiment.id, "a", None, 0.5)
        .await
        .unwrap();
    variant_repo::insert(&pool, experiment.id, "b", None, 0.5)
        .await
        .unwrap();

    let device = format!("device-{}", Uuid::new_v4().simple());
    let user_id = identify_device(&pool, &project, &device).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let pool = pool.clone();
        let project = project.clone();
        let experiment = experiment.clone();
        let device = device.clone();
        handles.push(tokio::spawn(async move {
            let payload = IdentifyPayload {
                device_id: Some(device),
                ..Default::default()
            };
            let mut tx = pool.begin().await.unwrap();
            let user = identity::resolve(&mut tx, project.id, payload).await.unwrap();
            let assignment = distribution::get_or_create(&mut tx, &user, &experiment)
                .await
                .unwrap();
            tx.commit().await.unwrap();
            assignment.distribution.id
        }));
    }

    let mut distribution_ids = Vec::new();
    for handle in handles {
        distribution_ids.push(handle.await.unwrap());
    }
    distribution_ids.sort_unstable();
    distribution_ids.dedup();
    assert_eq!(
        distribution_ids.len(),
        1,
        "every concurrent request must observe the same distribution row"
    );

    let rows = experiment_service::db::distribution_repo::find(&pool, user_id, experiment.id)
        .await
        .unwrap();
    assert!(rows.is_some());
}
