//! The module for migrating the database.
use std::fmt::{self, Display};

use async_trait::async_trait;
use log::info;
use sea_orm::{
	prelude::*, sea_query::*, DatabaseBackend, DatabaseTransaction, Statement, TransactionTrait,
};

use crate::db::{self, Database, PersistenceHandle};

mod v0_1;


/// The latest database version.
pub const LATEST_VERSION: Version = Version { major: 0, minor: 1 };


#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct Version {
	major: u32,
	minor: u32,
}

pub struct Migrations {
	/// A list of available migrations, ordered by version
	list: Vec<(Version, Box<dyn MigrationTrait + Send + Sync>)>,
}

#[async_trait]
trait MigrationTrait {
	async fn run(&self, tx: &DatabaseTransaction) -> db::Result<()>;
}


impl Migrations {
	pub fn load() -> Self {
		Self {
			list: vec![(Version::new(0, 1), Box::new(v0_1::Migration))],
		}
	}

	async fn load_version(&self, db: &Database) -> db::Result<Version> {
		let q = Query::select()
			.from(Alias::new("version"))
			.column(Alias::new("major"))
			.column(Alias::new("minor"))
			.to_owned();
		let (sql, values) = q.build(SqliteQueryBuilder);
		let r = db
			.inner()
			.query_one(Statement::from_sql_and_values(
				DatabaseBackend::Sqlite,
				sql,
				values,
			))
			.await?;
		match r {
			Some(result) => {
				let major: u32 = result.try_get_by_index(0)?;
				let minor: u32 = result.try_get_by_index(1)?;
				Ok(Version::new(major, minor))
			}
			None => Ok(Version::new(0, 0)),
		}
	}

	async fn store_version(&self, tx: &DatabaseTransaction, version: &Version) -> db::Result<()> {
		let q = Query::update()
			.table(Alias::new("version"))
			.values([
				(Alias::new("major"), version.major.into()),
				(Alias::new("minor"), version.minor.into()),
			])
			.to_owned();
		let (sql, values) = q.build(SqliteQueryBuilder);
		tx.execute(Statement::from_sql_and_values(
			DatabaseBackend::Sqlite,
			sql,
			values,
		))
		.await?;
		Ok(())
	}

	/// Runs every migration newer than the version found in the database, each
	/// in its own transaction.
	pub async fn run(&self, db: &Database) -> db::Result<Version> {
		let mut current_version = self.load_version(db).await?;

		for (new_version, migration) in &self.list {
			if new_version > &current_version {
				let tx = db.inner().begin().await?;
				info!(
					"Running database migration from {} to {}...",
					current_version, new_version
				);
				migration.run(&tx).await?;
				self.store_version(&tx, new_version).await?;
				tx.commit().await?;
				info!("Migrated database to {}.", new_version);
				current_version = new_version.clone();
			}
		}
		Ok(current_version)
	}
}

impl Version {
	pub fn new(major: u32, minor: u32) -> Self { Self { major, minor } }
}

impl Display for Version {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "v{}.{}", self.major, self.minor)
	}
}


#[cfg(test)]
mod tests {
	use super::*;
	use crate::test;

	#[tokio::test]
	async fn test_migrations_are_idempotent() {
		let db = test::load_database("migration").await;
		// Already migrated by the test loader
		let version = Migrations::load().run(&db).await.unwrap();
		assert_eq!(version, LATEST_VERSION);
	}

	#[test]
	fn test_version_order() {
		assert!(Version::new(0, 1) > Version::new(0, 0));
		assert!(Version::new(1, 0) > Version::new(0, 9));
		assert_eq!(LATEST_VERSION.to_string(), "v0.1");
	}
}
