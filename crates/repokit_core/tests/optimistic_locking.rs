mod common;

use common::{tweet, tweet_db, tweet_repo, Tweet};
use repokit_core::{Database, DatabaseConfig, RepoError, Repository, ScopeBehavior};
use std::sync::Barrier;

#[test]
fn stale_update_is_rejected_and_leaves_the_row_unchanged() {
    let repo = tweet_repo();
    let db = tweet_db(&repo);
    let mut original = tweet("v0", 1, "ana");
    repo.save(&db, &mut original).unwrap();

    let mut first = original.clone();
    let mut stale = original.clone();
    first.content = "first writer".to_string();
    repo.save(&db, &mut first).unwrap();
    assert_eq!(first.version, Some(1));

    stale.content = "second writer".to_string();
    match repo.save(&db, &mut stale).unwrap_err() {
        RepoError::OptimisticLock { entity, id } => {
            assert_eq!(entity, "Tweet");
            assert_eq!(id, "1");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(stale.version, Some(0));

    let stored = repo.get_by_id(&db, &1).unwrap();
    assert_eq!(stored.content, "first writer");
    assert_eq!(stored.version, Some(1));
}

#[test]
fn stale_delete_is_rejected_but_missing_rows_are_ignored() {
    let repo = tweet_repo();
    let db = tweet_db(&repo);
    let mut original = tweet("v0", 1, "ana");
    repo.save(&db, &mut original).unwrap();

    let stale = original.clone();
    original.likes = 2;
    repo.save(&db, &mut original).unwrap();

    assert!(matches!(
        repo.delete(&db, &stale),
        Err(RepoError::OptimisticLock { .. })
    ));
    assert!(repo.exists_by_id(&db, &1).unwrap());

    assert_eq!(repo.delete(&db, &original).unwrap(), 1);
    assert_eq!(repo.delete(&db, &original).unwrap(), 0);
}

#[test]
fn versioned_entity_with_id_but_no_version_is_rejected() {
    let repo = tweet_repo();
    let db = tweet_db(&repo);
    let mut stored = tweet("v0", 1, "ana");
    repo.save(&db, &mut stored).unwrap();

    let detached = Tweet {
        version: None,
        ..stored.clone()
    };
    assert!(matches!(
        repo.delete(&db, &detached),
        Err(RepoError::InvalidArgument(_))
    ));
}

#[test]
fn concurrent_writers_of_one_version_have_exactly_one_winner() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(DatabaseConfig::file(dir.path().join("tweets.db"))).unwrap();
    let repo: Repository<Tweet> = tweet_repo();
    repo.ensure_schema(&db).unwrap();

    let mut original = tweet("shared", 0, "ana");
    repo.save(&db, &mut original).unwrap();

    let barrier = Barrier::new(2);
    let outcomes: Vec<Result<(), RepoError>> = std::thread::scope(|threads| {
        let handles: Vec<_> = (0..2)
            .map(|writer| {
                let mut copy = original.clone();
                let (repo, db, barrier) = (&repo, &db, &barrier);
                threads.spawn(move || {
                    copy.likes = writer + 1;
                    barrier.wait();
                    repo.save(db, &mut copy)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("writer thread panicked"))
            .collect()
    });

    let winners = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
    let losers = outcomes
        .iter()
        .filter(|outcome| matches!(outcome, Err(RepoError::OptimisticLock { .. })))
        .count();
    assert_eq!((winners, losers), (1, 1), "outcomes: {outcomes:?}");
    assert_eq!(repo.get_by_id(&db, &1).unwrap().version, Some(1));
}

fn shared_tweet_db(behavior: ScopeBehavior) -> (tempfile::TempDir, Repository<Tweet>, Database) {
    let dir = tempfile::tempdir().unwrap();
    let config = DatabaseConfig::file(dir.path().join("tweets.db")).with_scope_behavior(behavior);
    let db = Database::open(config).unwrap();
    let repo = tweet_repo();
    repo.ensure_schema(&db).unwrap();
    let mut original = tweet("shared", 0, "ana");
    repo.save(&db, &mut original).unwrap();
    (dir, repo, db)
}

#[test]
fn concurrent_scopes_that_read_before_writing_have_exactly_one_winner() {
    let (_dir, repo, db) = shared_tweet_db(ScopeBehavior::Deferred);

    let barrier = Barrier::new(2);
    let outcomes: Vec<Result<(), RepoError>> = std::thread::scope(|threads| {
        let handles: Vec<_> = (0..2)
            .map(|writer| {
                let (repo, db, barrier) = (&repo, &db, &barrier);
                threads.spawn(move || {
                    let opened = db.begin().and_then(|scope| {
                        let read = repo.get_by_id(&scope, &1)?;
                        Ok((scope, read))
                    });
                    barrier.wait();
                    let (scope, mut current) = opened?;
                    current.likes = writer + 1;
                    repo.save(&scope, &mut current)?;
                    scope.commit()
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("writer thread panicked"))
            .collect()
    });

    let winners = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
    let losers = outcomes
        .iter()
        .filter(|outcome| matches!(outcome, Err(RepoError::OptimisticLock { .. })))
        .count();
    assert_eq!((winners, losers), (1, 1), "outcomes: {outcomes:?}");

    let stored = repo.get_by_id(&db, &1).unwrap();
    assert_eq!(stored.version, Some(1));
    assert!(stored.likes == 1 || stored.likes == 2);
}

#[test]
fn immediate_scopes_serialize_read_then_write_cycles() {
    let (_dir, repo, db) = shared_tweet_db(ScopeBehavior::Immediate);

    let first = db.begin().unwrap();
    let mut held = repo.get_by_id(&first, &1).unwrap();

    std::thread::scope(|threads| {
        let second = threads.spawn(|| {
            db.transaction(|scope| {
                let mut current = repo.get_by_id(scope, &1)?;
                current.likes += 10;
                repo.save(scope, &mut current)?;
                Ok(current)
            })
        });

        held.likes = 1;
        repo.save(&first, &mut held).unwrap();
        first.commit().unwrap();

        let second = second.join().expect("second writer panicked").unwrap();
        assert_eq!(second.version, Some(2));
        assert_eq!(second.likes, 11);
    });

    assert_eq!(repo.get_by_id(&db, &1).unwrap().version, Some(2));
}
