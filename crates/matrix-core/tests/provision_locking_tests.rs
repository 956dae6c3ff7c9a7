//! Concurrent provisioning of the same context

use std::sync::Arc;

use matrix_core::deps::resolve;
use matrix_core::provision::{ContextCache, Provisioner};
use matrix_core::testing::FakeBackend;
use matrix_core::{ProvisionAction, Registry};
use matrix_fs::NormalizedPath;
use matrix_fs::config::Format;
use tempfile::TempDir;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_provisioners_build_once() {
    let dir = TempDir::new().unwrap();
    let registry = Arc::new(
        Registry::parse(
            "[[env]]\nname = \"unit\"\ninterpreter = \"3.6\"\ncommands = [[\"x\"]]\ndeps = [\"pytest\"]\n",
            Format::Toml,
            NormalizedPath::new(dir.path()),
        )
        .unwrap(),
    );
    let backend = Arc::new(FakeBackend::new().with_interpreter("3.6"));
    let work_dir = NormalizedPath::new(dir.path().join("work"));

    let mut tasks = Vec::new();
    for _ in 0..4 {
        // Separate caches stand in for separate invocations
        let cache = ContextCache::open(&work_dir).unwrap();
        let provisioner = Provisioner::new(backend.clone(), cache);
        let registry = registry.clone();
        tasks.push(tokio::spawn(async move {
            let env = registry.get("unit").unwrap();
            let deps = resolve(env, &registry).unwrap();
            provisioner.provision(env, &deps).await.unwrap().action
        }));
    }

    let mut actions = Vec::new();
    for task in tasks {
        actions.push(task.await.unwrap());
    }

    assert_eq!(backend.creates(), 1);
    assert_eq!(
        actions
            .iter()
            .filter(|a| **a == ProvisionAction::Created)
            .count(),
        1
    );
    assert_eq!(
        actions
            .iter()
            .filter(|a| **a == ProvisionAction::Reused)
            .count(),
        3
    );
}
