use repokit_core::{
    Database, DatabaseConfig, DatabaseLocation, DbError, LogSettings, RepoError, ScopeBehavior,
};
use std::path::PathBuf;
use std::time::Duration;

#[test]
fn partial_documents_fill_in_defaults() {
    let config: DatabaseConfig = serde_json::from_str(
        r#"{
            "location": { "kind": "file", "path": "/var/lib/app/store.db" },
            "statement_timeout_ms": 250
        }"#,
    )
    .unwrap();

    assert_eq!(
        config.location,
        DatabaseLocation::File {
            path: PathBuf::from("/var/lib/app/store.db")
        }
    );
    assert_eq!(config.statement_timeout_ms, Some(250));
    assert_eq!(config.max_connections, DatabaseConfig::default().max_connections);
    assert_eq!(config.scope_behavior, ScopeBehavior::Deferred);

    let empty: DatabaseConfig = serde_json::from_str("{}").unwrap();
    assert_eq!(empty, DatabaseConfig::in_memory());
}

#[test]
fn unknown_fields_are_rejected() {
    assert!(serde_json::from_str::<DatabaseConfig>(r#"{ "pool": 3 }"#).is_err());
    assert!(serde_json::from_str::<DatabaseConfig>(r#"{ "scope_behavior": "eager" }"#).is_err());
    assert!(serde_json::from_str::<LogSettings>(r#"{ "colour": true }"#).is_err());
}

#[test]
fn builders_and_serde_agree() {
    let built = DatabaseConfig::in_memory()
        .with_statement_timeout(Duration::from_millis(75))
        .with_max_connections(2)
        .with_scope_behavior(ScopeBehavior::Immediate);
    let json = serde_json::to_string(&built).unwrap();
    let parsed: DatabaseConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, built);
    assert!(json.contains(r#""scope_behavior":"immediate""#));
}

#[test]
fn out_of_range_values_fail_validation_and_open() {
    let mut no_connections = DatabaseConfig::in_memory();
    no_connections.max_connections = 0;
    let mut no_wait = DatabaseConfig::in_memory();
    no_wait.acquire_timeout_ms = 0;
    let mut no_statement_time = DatabaseConfig::in_memory();
    no_statement_time.statement_timeout_ms = Some(0);

    for config in [no_connections, no_wait, no_statement_time] {
        assert!(matches!(config.validate(), Err(DbError::InvalidConfig(_))));
        assert!(matches!(
            Database::open(config),
            Err(RepoError::Store(DbError::InvalidConfig(_)))
        ));
    }

    assert!(DatabaseConfig::in_memory().validate().is_ok());
}
