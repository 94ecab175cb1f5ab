use std::{io, path::*, time::Duration};

use async_trait::async_trait;
use log::*;
use sea_orm::{prelude::*, *};
use thiserror::Error;

use crate::{
	common::Token,
	entity::*,
	trace::{self, Traceable, Traced},
};


#[derive(Clone)]
pub struct Database {
	path: PathBuf,
	orm: DatabaseConnection,
}

pub struct Transaction(pub(crate) sea_orm::DatabaseTransaction);

#[derive(Debug, Error)]
pub enum Error {
	#[error("{0}")]
	OrmError(sea_orm::DbErr),
	#[error("io error: {0}")]
	Io(io::Error),
	/// A record refers to a user that doesn't exist (anymore).
	#[error("user {0} is missing")]
	MissingUser(i64),
}

pub type Result<T> = trace::Result<T, self::Error>;


/// Read access to the blog's tables, available both on the database itself and
/// inside a transaction.
#[async_trait]
pub trait PersistenceHandle {
	type Inner: ConnectionTrait;

	fn inner(&self) -> &Self::Inner;

	fn backend(&self) -> DatabaseBackend { self.inner().get_database_backend() }

	async fn find_user_by_username(&self, username: &str) -> Result<Option<user::Model>> {
		let result = user::Entity::find()
			.filter(user::Column::Username.eq(username))
			.one(self.inner())
			.await?;
		Ok(result)
	}

	/// Finds the user that the session with the given token belongs to.
	async fn find_user_by_session(&self, token: &Token) -> Result<Option<user::Model>> {
		let result = user::Entity::find()
			.filter(
				user::Column::Id.in_subquery(
					session::Entity::find()
						.select_only()
						.column(session::Column::UserId)
						.filter(session::Column::Token.eq(token))
						.into_query(),
				),
			)
			.one(self.inner())
			.await?;
		Ok(result)
	}

	async fn find_group_by_id(&self, id: i64) -> Result<Option<group::Model>> {
		Ok(group::Entity::find_by_id(id).one(self.inner()).await?)
	}

	async fn find_group_by_slug(&self, slug: &str) -> Result<Option<group::Model>> {
		let result = group::Entity::find()
			.filter(group::Column::Slug.eq(slug))
			.one(self.inner())
			.await?;
		Ok(result)
	}

	async fn load_groups(&self) -> Result<Vec<group::Model>> {
		let groups = group::Entity::find()
			.order_by_asc(group::Column::Title)
			.all(self.inner())
			.await?;
		Ok(groups)
	}

	/// Finds a post by its id, but only if it was written by the user with the
	/// given username.
	async fn find_post(
		&self, username: &str, post_id: i64,
	) -> Result<Option<(post::Model, user::Model)>> {
		let result = post::Entity::find_by_id(post_id)
			.find_also_related(user::Entity)
			.filter(user::Column::Username.eq(username))
			.one(self.inner())
			.await?;
		Ok(match result {
			Some((post, Some(author))) => Some((post, author)),
			_ => None,
		})
	}

	async fn count_posts_by_author(&self, author_id: i64) -> Result<u64> {
		let count = post::Entity::find()
			.filter(post::Column::AuthorId.eq(author_id))
			.count(self.inner())
			.await?;
		Ok(count)
	}

	async fn count_comments(&self, post_id: i64) -> Result<u64> {
		let count = comment::Entity::find()
			.filter(comment::Column::PostId.eq(post_id))
			.count(self.inner())
			.await?;
		Ok(count)
	}

	/// Loads the comments of a post, together with their authors, oldest first.
	async fn load_comments(&self, post_id: i64) -> Result<Vec<(comment::Model, user::Model)>> {
		let results = comment::Entity::find()
			.find_also_related(user::Entity)
			.filter(comment::Column::PostId.eq(post_id))
			.order_by_asc(comment::Column::Created)
			.order_by_asc(comment::Column::Id)
			.all(self.inner())
			.await?;

		let mut comments = Vec::with_capacity(results.len());
		for (comment, author_opt) in results {
			match author_opt {
				Some(author) => comments.push((comment, author)),
				None => Err(Error::MissingUser(comment.author_id))?,
			}
		}
		Ok(comments)
	}

	/// The number of users following the given author.
	async fn count_followers(&self, author_id: i64) -> Result<u64> {
		let count = follow::Entity::find()
			.filter(follow::Column::AuthorId.eq(author_id))
			.count(self.inner())
			.await?;
		Ok(count)
	}

	/// The number of authors the given user follows.
	async fn count_following(&self, user_id: i64) -> Result<u64> {
		let count = follow::Entity::find()
			.filter(follow::Column::UserId.eq(user_id))
			.count(self.inner())
			.await?;
		Ok(count)
	}

	async fn find_follow(&self, user_id: i64, author_id: i64) -> Result<Option<follow::Model>> {
		let result = follow::Entity::find()
			.filter(follow::Column::UserId.eq(user_id))
			.filter(follow::Column::AuthorId.eq(author_id))
			.one(self.inner())
			.await?;
		Ok(result)
	}

	async fn is_following(&self, user_id: i64, author_id: i64) -> Result<bool> {
		Ok(self.find_follow(user_id, author_id).await?.is_some())
	}
}


impl Database {
	pub async fn load(path: PathBuf) -> Result<Self> {
		let mut opts = ConnectOptions::new(format!("sqlite://{}?mode=rwc", path.display()));
		opts.idle_timeout(Duration::from_secs(10));
		opts.acquire_timeout(Duration::from_secs(5));
		opts.sqlx_logging(false);
		let orm = sea_orm::Database::connect(opts).await?;

		let this = Self { path, orm };
		this.install().await?;
		Ok(this)
	}

	/// Makes sure the version table exists, so that migrations know where to
	/// start from.
	async fn install(&self) -> Result<()> {
		self.orm
			.execute_unprepared(
				"CREATE TABLE IF NOT EXISTS version (major INTEGER NOT NULL, minor INTEGER NOT \
				 NULL)",
			)
			.await?;

		let stat = Statement::from_string(
			self.backend(),
			"SELECT COUNT(*) FROM version".to_owned(),
		);
		let rows: i64 = match self.orm.query_one(stat).await? {
			Some(result) => result.try_get_by_index(0)?,
			None => 0,
		};
		if rows == 0 {
			debug!("Installing version table in database {}", self.path.display());
			self.orm
				.execute_unprepared("INSERT INTO version (major, minor) VALUES (0, 0)")
				.await?;
		}
		Ok(())
	}

	pub async fn transaction(&self) -> Result<Transaction> {
		let tx = self.orm.begin().await?;
		Ok(Transaction(tx))
	}
}

impl PersistenceHandle for Database {
	type Inner = sea_orm::DatabaseConnection;

	fn inner(&self) -> &Self::Inner { &self.orm }
}

impl PersistenceHandle for Transaction {
	type Inner = sea_orm::DatabaseTransaction;

	fn inner(&self) -> &Self::Inner { &self.0 }
}

impl Transaction {
	pub async fn commit(self) -> Result<()> {
		self.0.commit().await?;
		Ok(())
	}
}

impl From<sea_orm::DbErr> for Error {
	fn from(other: sea_orm::DbErr) -> Self { Self::OrmError(other) }
}

impl From<sea_orm::DbErr> for Traced<Error> {
	fn from(other: sea_orm::DbErr) -> Self { Error::OrmError(other).trace() }
}

impl From<io::Error> for Error {
	fn from(other: io::Error) -> Self { Self::Io(other) }
}

impl From<io::Error> for Traced<Error> {
	fn from(other: io::Error) -> Self { Error::Io(other).trace() }
}
