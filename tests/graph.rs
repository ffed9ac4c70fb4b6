//! Part Graph Integration Tests
//!
//! Construction failures and dependency ordering through the lifecycle
//! manager.

use partline::{LifecycleManager, LifecycleOptions, PartsError};
use tempfile::TempDir;

fn options(temp: &TempDir) -> LifecycleOptions {
    LifecycleOptions::new("test_demo", temp.path().join("cache"))
        .with_work_dir(temp.path().join("work"))
        .with_arch("amd64")
}

async fn manager(temp: &TempDir, yaml: &str) -> Result<LifecycleManager, PartsError> {
    let project: serde_yaml::Value = serde_yaml::from_str(yaml).unwrap();
    LifecycleManager::new(&project, options(temp)).await
}

fn order(manager: &LifecycleManager) -> Vec<String> {
    manager
        .graph()
        .topological_order()
        .iter()
        .map(|p| p.name.clone())
        .collect()
}

#[tokio::test]
async fn test_order_respects_after() {
    let temp = TempDir::new().unwrap();
    let manager = manager(
        &temp,
        r#"
parts:
  app:
    plugin: nil
    after: [lib, tools]
  tools:
    plugin: nil
    after: [lib]
  lib:
    plugin: nil
  docs:
    plugin: nil
"#,
    )
    .await
    .unwrap();

    let order = order(&manager);
    let position = |name: &str| order.iter().position(|p| p == name).unwrap();

    assert_eq!(order.len(), 4);
    assert!(position("lib") < position("tools"));
    assert!(position("tools") < position("app"));
    assert_eq!(order, vec!["lib", "tools", "app", "docs"]);
}

#[tokio::test]
async fn test_cycle_fails_construction() {
    let temp = TempDir::new().unwrap();
    let result = manager(
        &temp,
        r#"
parts:
  a: {plugin: nil, after: [b]}
  b: {plugin: nil, after: [a]}
"#,
    )
    .await;

    match result {
        Err(PartsError::DependencyCycle { parts }) => assert_eq!(parts, vec!["a", "b"]),
        Err(other) => panic!("expected cycle error, got {}", other),
        Ok(_) => panic!("expected cycle error"),
    }
    assert!(!temp.path().join("work").exists());
}

#[tokio::test]
async fn test_invalid_application_name_fails_first() {
    let temp = TempDir::new().unwrap();
    let project: serde_yaml::Value = serde_yaml::from_str("parts: {foo: {}}").unwrap();
    let options = LifecycleOptions::new("1bad", temp.path().join("cache")).with_work_dir(temp.path().join("work"));

    let result = LifecycleManager::new(&project, options).await;

    assert!(matches!(result, Err(PartsError::InvalidApplicationName { name }) if name == "1bad"));
    assert!(!temp.path().join("work").exists());
}

#[tokio::test]
async fn test_undefined_plugin_names_part() {
    let temp = TempDir::new().unwrap();
    let result = manager(&temp, "parts: {foo: {source: .}}").await;

    match result {
        Err(err @ PartsError::UndefinedPlugin { .. }) => assert!(err.to_string().contains("\"foo\"")),
        Err(other) => panic!("expected undefined plugin, got {}", other),
        Ok(_) => panic!("expected undefined plugin"),
    }
}

#[tokio::test]
async fn test_schema_errors_are_field_level() {
    let temp = TempDir::new().unwrap();
    let result = manager(&temp, "parts: {foo: {plugin: nil, after: lib, bogus: 1}}").await;

    match result {
        Err(PartsError::PartSpecification(err)) => {
            assert_eq!(err.part_name, "foo");
            let fields: Vec<&str> = err.field_errors().iter().map(|f| f.field.as_str()).collect();
            assert!(fields.contains(&"after"));
            assert!(fields.contains(&"bogus"));
        }
        Err(other) => panic!("expected specification error, got {}", other),
        Ok(_) => panic!("expected specification error"),
    }
}

#[tokio::test]
async fn test_unknown_dependency() {
    let temp = TempDir::new().unwrap();
    let result = manager(&temp, "parts: {foo: {plugin: nil, after: [ghost]}}").await;

    assert!(matches!(
        result,
        Err(PartsError::UnknownDependency { part_name, dependency }) if part_name == "foo" && dependency == "ghost"
    ));
}

#[tokio::test]
async fn test_part_name_outside_work_dir_rejected() {
    let temp = TempDir::new().unwrap();
    let victim = temp.path().join("victim");
    std::fs::create_dir_all(victim.join("src")).unwrap();
    std::fs::write(victim.join("src/precious"), "keep me").unwrap();

    let mut parts = serde_yaml::Mapping::new();
    let spec: serde_yaml::Value = serde_yaml::from_str("{plugin: nil}").unwrap();
    parts.insert(victim.display().to_string().into(), spec);
    let mut project = serde_yaml::Mapping::new();
    project.insert("parts".into(), serde_yaml::Value::Mapping(parts));
    let project = serde_yaml::Value::Mapping(project);

    let result = LifecycleManager::new(&project, options(&temp)).await;

    assert!(matches!(result, Err(PartsError::InvalidPartName { part_name }) if part_name == victim.display().to_string()));
    assert!(victim.join("src/precious").exists());
}
