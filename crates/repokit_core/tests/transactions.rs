mod common;

use common::{account, seed_tweets, tweet, tweet_db, tweet_repo, Account};
use repokit_core::{
    repo_params, Database, DatabaseConfig, RepoError, Repository, ScopeSource, ScopeState,
};
use std::time::Duration;

fn account_db() -> (Repository<Account>, Database) {
    let repo = Repository::<Account>::new().unwrap();
    let db = Database::open_in_memory().unwrap();
    repo.ensure_schema(&db).unwrap();
    (repo, db)
}

#[test]
fn save_all_is_all_or_nothing_and_restores_entities() {
    let (repo, db) = account_db();
    let mut batch = vec![account("ana"), account("bob"), account("ana")];
    let before = batch.clone();

    let err = repo.save_all(&db, &mut batch).unwrap_err();
    assert!(err.is_constraint_violation(), "unexpected error: {err}");
    assert_eq!(batch, before);
    assert_eq!(repo.count(&db).unwrap(), 0);

    batch.pop();
    repo.save_all(&db, &mut batch).unwrap();
    assert!(batch.iter().all(|account| account.id.is_some()));
    assert_eq!(repo.count(&db).unwrap(), 2);
}

#[test]
fn operations_joining_a_scope_commit_with_the_caller() {
    let repo = tweet_repo();
    let db = tweet_db(&repo);

    let scope = db.begin().unwrap();
    let mut first = tweet("one", 1, "ana");
    let mut second = tweet("two", 2, "ana");
    repo.save(&scope, &mut first).unwrap();
    repo.save(&scope, &mut second).unwrap();
    assert_eq!(repo.count(&scope).unwrap(), 2);
    assert!(scope.is_active());
    scope.commit().unwrap();

    assert_eq!(repo.count(&db).unwrap(), 2);
}

#[test]
fn caller_rollback_discards_joined_operations() {
    let repo = tweet_repo();
    let db = tweet_db(&repo);
    seed_tweets(&repo, &db, 2);

    let scope = db.begin().unwrap();
    repo.delete_all(&scope).unwrap();
    assert_eq!(repo.count(&scope).unwrap(), 0);
    scope.rollback().unwrap();

    assert_eq!(repo.count(&db).unwrap(), 2);
}

#[test]
fn failing_operation_rolls_back_the_joined_scope() {
    let (repo, db) = account_db();

    let scope = db.begin().unwrap();
    let mut ana = account("ana");
    repo.save(&scope, &mut ana).unwrap();
    let mut duplicate = account("ana");
    assert!(repo
        .save(&scope, &mut duplicate)
        .unwrap_err()
        .is_constraint_violation());
    assert_eq!(scope.state(), ScopeState::RolledBack);

    assert!(matches!(
        repo.count(&scope),
        Err(RepoError::InactiveScope(ScopeState::RolledBack))
    ));
    assert!(matches!(
        scope.commit(),
        Err(RepoError::InactiveScope(ScopeState::RolledBack))
    ));
    assert_eq!(repo.count(&db).unwrap(), 0);
}

#[test]
fn invalid_arguments_leave_the_scope_active() {
    let repo = tweet_repo();
    let db = tweet_db(&repo);

    let scope = db.begin().unwrap();
    let mut kept = tweet("kept", 1, "ana");
    repo.save(&scope, &mut kept).unwrap();
    assert!(matches!(
        repo.find_by(&scope, "findByAuthorHandle", &repo_params![]),
        Err(RepoError::InvalidArgument(_))
    ));
    assert!(scope.is_active());
    scope.commit().unwrap();

    assert_eq!(repo.count(&db).unwrap(), 1);
}

#[test]
fn closure_scopes_commit_on_ok_and_roll_back_on_err() {
    let repo = tweet_repo();
    let db = tweet_db(&repo);

    db.transaction(|scope| {
        let mut kept = tweet("kept", 1, "ana");
        repo.save(scope, &mut kept)
    })
    .unwrap();

    let result: Result<(), RepoError> = db.within(|scope| {
        let mut dropped = tweet("dropped", 2, "ana");
        repo.save(scope, &mut dropped)?;
        Err(RepoError::InvalidArgument("caller aborted".to_string()))
    });
    assert!(result.is_err());

    let remaining = repo.find_all(&db).unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].content, "kept");
}

#[test]
fn long_statements_time_out_and_roll_back() {
    let config = DatabaseConfig::in_memory().with_statement_timeout(Duration::from_millis(50));
    let db = Database::open(config).unwrap();

    let scope = db.begin().unwrap();
    let err = scope
        .query_scalar::<i64, _>(
            "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c) SELECT count(*) FROM c;",
            [],
        )
        .unwrap_err();
    assert!(matches!(err, RepoError::Timeout(_)), "unexpected error: {err}");
    assert_eq!(scope.state(), ScopeState::RolledBack);
}

#[test]
fn acquiring_a_connection_times_out_when_the_pool_is_exhausted() {
    let mut config = DatabaseConfig::in_memory();
    config.acquire_timeout_ms = 250;
    let db = Database::open(config).unwrap();

    let held = db.begin().unwrap();
    assert!(matches!(db.begin(), Err(RepoError::Timeout(_))));
    held.rollback().unwrap();
    assert!(db.begin().is_ok());
}
