//! Benchmarks for permission derivation and the authorization gate.
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use taskgate_core::rbac::{
    derive, AuthorizationGate, PermissionCatalog, PermissionDeriver, PermissionName, Principal,
    RolePermissionGraph, Seeder, User, Verb,
};
use taskgate_core::store::{InMemoryStore, RbacStore};

const PATHS: [(&str, &str, Verb); 5] = [
    ("collection", "/api/v1/tasks", Verb::Get),
    ("item", "/api/v1/tasks/8f14e45f-ceea-467f-a0a6-1e5b3c1d2a11", Verb::Delete),
    ("create", "/api/v1/projects", Verb::Post),
    ("nested", "/api/v1/projects/42/tasks", Verb::Get),
    ("trailing_slash", "/api/v1/roles/", Verb::Put),
];

fn bench_derive(c: &mut Criterion) {
    let mut group = c.benchmark_group("derive");
    for (label, path, verb) in PATHS {
        group.bench_with_input(BenchmarkId::from_parameter(label), &(path, verb), |b, &(p, v)| {
            b.iter(|| black_box(derive(p, v)));
        });
    }
    group.finish();
}

fn bench_try_derive(c: &mut Criterion) {
    let mut group = c.benchmark_group("try_derive");
    let deriver = PermissionDeriver::default();
    for (label, path, verb) in PATHS {
        group.bench_with_input(BenchmarkId::from_parameter(label), &(path, verb), |b, &(p, v)| {
            b.iter(|| black_box(deriver.try_derive(p, v)));
        });
    }
    group.finish();
}

fn seeded_gate(rt: &tokio::runtime::Runtime) -> (AuthorizationGate, Principal, Principal) {
    rt.block_on(async {
        let store = Arc::new(InMemoryStore::new());
        Seeder::new(store.clone(), PermissionCatalog::builtin())
            .seed()
            .await
            .expect("seed");

        let owner_role = store.find_role_by_name("OWNER").await.unwrap().unwrap();
        let user_role = store.find_role_by_name("USER").await.unwrap().unwrap();
        let owner = User::new("owner", "Owner", "owner@example.com", owner_role.id);
        let user = User::new("user", "User", "user@example.com", user_role.id);

        let ttl = chrono::Duration::hours(1);
        let gate = AuthorizationGate::new(RolePermissionGraph::new(store));
        (gate, Principal::for_user(&owner, ttl), Principal::for_user(&user, ttl))
    })
}

fn bench_gate_authorize(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("runtime");
    let (gate, owner, user) = seeded_gate(&rt);
    let get_tasks = PermissionName::from("GET_TASKS");
    let get_logs = PermissionName::from("GET_LOGS");
    let edit_role = PermissionName::from("EDIT_USER_ROLE");

    let cases: [(&str, Option<&Principal>, &PermissionName, bool); 5] = [
        ("anonymous", None, &get_tasks, false),
        ("user_allow", Some(&user), &get_tasks, false),
        ("user_deny", Some(&user), &get_logs, false),
        ("owner_allow", Some(&owner), &get_logs, false),
        ("owner_only", Some(&owner), &edit_role, true),
    ];

    let gate = &gate;
    let mut group = c.benchmark_group("gate_authorize");
    for (label, principal, permission, owner_only) in cases {
        group.bench_function(BenchmarkId::from_parameter(label), |b| {
            b.to_async(&rt)
                .iter(|| async move { black_box(gate.authorize(principal, permission, owner_only).await) });
        });
    }
    group.finish();
}

fn bench_gate_batch(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("runtime");
    let (gate, _, user) = seeded_gate(&rt);
    let permissions: Vec<PermissionName> = PermissionCatalog::builtin().permissions;

    let (gate, user, permissions) = (&gate, &user, &permissions);
    let mut group = c.benchmark_group("gate_batch");
    group.throughput(Throughput::Elements(permissions.len() as u64));
    group.bench_function("all_permissions", |b| {
        b.to_async(&rt).iter(|| async move {
            for permission in permissions {
                black_box(gate.authorize(Some(user), permission, false).await);
            }
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_derive,
    bench_try_derive,
    bench_gate_authorize,
    bench_gate_batch,
);
criterion_main!(benches);
