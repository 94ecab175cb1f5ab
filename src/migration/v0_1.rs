use async_trait::async_trait;
use sea_orm::{
	prelude::*, sea_query::*, ConnectionTrait, DatabaseBackend, DatabaseTransaction, Schema,
};

use super::MigrationTrait;
use crate::{db, entity::*};


/// Installs the initial schema.
pub struct Migration;


async fn create_table<E>(tx: &DatabaseTransaction, schema: &Schema, entity: E) -> db::Result<()>
where
	E: EntityTrait,
{
	let stat = schema.create_table_from_entity(entity);
	tx.execute_unprepared(&stat.build(SqliteQueryBuilder))
		.await?;
	Ok(())
}

async fn create_index(tx: &DatabaseTransaction, stat: IndexCreateStatement) -> db::Result<()> {
	tx.execute_unprepared(&stat.build(SqliteQueryBuilder))
		.await?;
	Ok(())
}


#[async_trait]
impl MigrationTrait for Migration {
	async fn run(&self, tx: &DatabaseTransaction) -> db::Result<()> {
		let schema = Schema::new(DatabaseBackend::Sqlite);

		// Referenced tables go first
		create_table(tx, &schema, user::Entity).await?;
		create_table(tx, &schema, session::Entity).await?;
		create_table(tx, &schema, group::Entity).await?;
		create_table(tx, &schema, post::Entity).await?;
		create_table(tx, &schema, comment::Entity).await?;
		create_table(tx, &schema, follow::Entity).await?;

		// A user may follow a given author only once
		create_index(
			tx,
			Index::create()
				.name("follow_user_author")
				.table(follow::Entity)
				.col(follow::Column::UserId)
				.col(follow::Column::AuthorId)
				.unique()
				.to_owned(),
		)
		.await?;
		create_index(
			tx,
			Index::create()
				.name("post_pub_date")
				.table(post::Entity)
				.col(post::Column::PubDate)
				.to_owned(),
		)
		.await?;
		create_index(
			tx,
			Index::create()
				.name("comment_post")
				.table(comment::Entity)
				.col(comment::Column::PostId)
				.to_owned(),
		)
		.await?;
		Ok(())
	}
}
