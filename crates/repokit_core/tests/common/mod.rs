#![allow(dead_code)]

use repokit_core::{
    Database, DescriptorBuilder, Entity, EntityDescriptor, FieldType, GenerationStrategy,
    Record, RepoResult, Repository, RowWriter,
};
use uuid::Uuid;

pub const TWEET_QUERIES: &[&str] = &[
    "findByAuthorHandle",
    "findByAuthorHandleAndLikesGreaterThan",
    "findByAuthor_HandleOrderByLikesDesc",
    "findByAuthorHandleOrLikesGreaterThan",
    "findByContentContainingIgnoreCase",
    "findByContentStartingWith",
    "findByContent",
    "findByLikesIn",
    "findByLikesBetween",
    "findByAuthorDisplayNameIsNull",
    "findByPinnedTrue",
    "findTop2ByOrderByLikesDesc",
    "findByLikesGreaterThanEqual",
    "countByAuthorHandle",
    "existsByContentStartingWith",
    "deleteByAuthorHandle",
];

#[derive(Debug, Clone, PartialEq)]
pub struct Author {
    pub handle: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tweet {
    pub id: Option<i64>,
    pub version: Option<i64>,
    pub content: String,
    pub likes: i64,
    pub pinned: bool,
    pub author: Author,
}

impl Entity for Tweet {
    type Id = i64;

    fn describe() -> DescriptorBuilder {
        EntityDescriptor::builder("Tweet")
            .table("tweets")
            .id("id", FieldType::Integer, GenerationStrategy::Sequence)
            .version("version")
            .attribute("content", FieldType::Text)
            .attribute("likes", FieldType::Integer)
            .attribute("pinned", FieldType::Boolean)
            .embedded("author", |author| {
                author
                    .attribute("handle", FieldType::Text)
                    .nullable("displayName", FieldType::Text)
            })
    }

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    fn version(&self) -> Option<i64> {
        self.version
    }

    fn set_version(&mut self, version: i64) {
        self.version = Some(version);
    }

    fn write(&self, row: &mut RowWriter<'_>) {
        row.set("content", &self.content)
            .set("likes", self.likes)
            .set("pinned", self.pinned)
            .set("author.handle", &self.author.handle)
            .set("author.displayName", &self.author.display_name);
    }

    fn read(record: &Record<'_>) -> RepoResult<Self> {
        Ok(Self {
            id: Some(record.id()?),
            version: record.version()?,
            content: record.get("content")?,
            likes: record.get("likes")?,
            pinned: record.get("pinned")?,
            author: Author {
                handle: record.get("author.handle")?,
                display_name: record.get("author.displayName")?,
            },
        })
    }
}

pub fn tweet(content: &str, likes: i64, handle: &str) -> Tweet {
    Tweet {
        id: None,
        version: None,
        content: content.to_string(),
        likes,
        pinned: false,
        author: Author {
            handle: handle.to_string(),
            display_name: None,
        },
    }
}

/// Unversioned entity with client-generated UUID identifiers.
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub id: Option<Uuid>,
    pub handle: String,
    pub email: Option<String>,
    pub active: bool,
}

impl Entity for Account {
    type Id = Uuid;

    fn describe() -> DescriptorBuilder {
        EntityDescriptor::builder("Account")
            .id("id", FieldType::Uuid, GenerationStrategy::Uuid)
            .attribute("handle", FieldType::Text)
            .nullable("email", FieldType::Text)
            .attribute("active", FieldType::Boolean)
            .unique("handle")
    }

    fn id(&self) -> Option<Uuid> {
        self.id
    }

    fn set_id(&mut self, id: Uuid) {
        self.id = Some(id);
    }

    fn write(&self, row: &mut RowWriter<'_>) {
        row.set("handle", &self.handle)
            .set("email", &self.email)
            .set("active", self.active);
    }

    fn read(record: &Record<'_>) -> RepoResult<Self> {
        Ok(Self {
            id: Some(record.id()?),
            handle: record.get("handle")?,
            email: record.get("email")?,
            active: record.get("active")?,
        })
    }
}

pub fn account(handle: &str) -> Account {
    Account {
        id: None,
        handle: handle.to_string(),
        email: None,
        active: true,
    }
}

/// Unversioned entity whose identifier the caller assigns.
#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    pub name: Option<String>,
    pub color: String,
}

impl Entity for Tag {
    type Id = String;

    fn describe() -> DescriptorBuilder {
        EntityDescriptor::builder("Tag")
            .id("name", FieldType::Text, GenerationStrategy::Assigned)
            .attribute("color", FieldType::Text)
    }

    fn id(&self) -> Option<String> {
        self.name.clone()
    }

    fn set_id(&mut self, id: String) {
        self.name = Some(id);
    }

    fn write(&self, row: &mut RowWriter<'_>) {
        row.set("color", &self.color);
    }

    fn read(record: &Record<'_>) -> RepoResult<Self> {
        Ok(Self {
            name: Some(record.id()?),
            color: record.get("color")?,
        })
    }
}

pub fn tweet_repo() -> Repository<Tweet> {
    TWEET_QUERIES
        .iter()
        .fold(Repository::<Tweet>::builder(), |builder, name| builder.derived(*name))
        .build()
        .expect("tweet repository should build")
}

/// In-memory database with the tweet table created.
pub fn tweet_db(repo: &Repository<Tweet>) -> Database {
    let db = Database::open_in_memory().expect("open in-memory database");
    repo.ensure_schema(&db).expect("create tweet table");
    db
}

/// Saves `count` tweets `tweet-1..=count` with likes equal to their index.
pub fn seed_tweets(repo: &Repository<Tweet>, db: &Database, count: i64) -> Vec<Tweet> {
    let mut tweets: Vec<Tweet> = (1..=count)
        .map(|index| tweet(&format!("tweet-{index}"), index, "ana"))
        .collect();
    repo.save_all(db, &mut tweets).expect("seed tweets");
    tweets
}
