use std::sync::Arc;

use log::*;
use rand::rngs::OsRng;
use sea_orm::{prelude::*, NotSet, Set};

use crate::{
	common::*,
	db::{self, Database, PersistenceHandle},
	entity::*,
	page_cache::PageCache,
	policy,
};


/// The operations that change the state of the blog.
#[derive(Clone)]
pub struct Api {
	pub db: Database,
	pub cache: Arc<PageCache>,
}


impl Api {
	pub fn new(db: Database, cache: Arc<PageCache>) -> Self { Self { db, cache } }

	pub async fn register_user(&self, username: &str, password: &str) -> db::Result<user::Model> {
		let password_salt = Token::random(&mut OsRng);
		let password_hash = Token::hash_salted(&password_salt, password.as_bytes());
		let date_joined = current_timestamp();

		let result = user::Entity::insert(user::ActiveModel {
			id: NotSet,
			username: Set(username.to_string()),
			password_salt: Set(password_salt.clone()),
			password_hash: Set(password_hash.clone()),
			date_joined: Set(date_joined),
		})
		.exec(self.db.inner())
		.await?;
		info!("Registered user {}.", username);

		Ok(user::Model {
			id: result.last_insert_id,
			username: username.to_string(),
			password_salt,
			password_hash,
			date_joined,
		})
	}

	/// Returns the user with the given username if the password matches.
	pub async fn authenticate(
		&self, username: &str, password: &str,
	) -> db::Result<Option<user::Model>> {
		let user = match self.db.find_user_by_username(username).await? {
			Some(u) => u,
			None => return Ok(None),
		};
		if Token::hash_salted(&user.password_salt, password.as_bytes()) == user.password_hash {
			Ok(Some(user))
		} else {
			Ok(None)
		}
	}

	/// Starts a new session for the user and returns its token.
	pub async fn login(&self, user: &user::Model) -> db::Result<Token> {
		let token = Token::random(&mut OsRng);
		session::Entity::insert(session::ActiveModel {
			id: NotSet,
			token: Set(token.clone()),
			user_id: Set(user.id),
			created: Set(current_timestamp()),
		})
		.exec(self.db.inner())
		.await?;
		debug!("Started new session for user {}.", user.username);
		Ok(token)
	}

	pub async fn logout(&self, token: &Token) -> db::Result<()> {
		session::Entity::delete_many()
			.filter(session::Column::Token.eq(token))
			.exec(self.db.inner())
			.await?;
		Ok(())
	}

	/// Creates the group if no group with the same slug exists yet.
	pub async fn ensure_group(
		&self, slug: &str, title: &str, description: &str,
	) -> db::Result<group::Model> {
		if let Some(group) = self.db.find_group_by_slug(slug).await? {
			return Ok(group);
		}

		let result = group::Entity::insert(group::ActiveModel {
			id: NotSet,
			slug: Set(slug.to_string()),
			title: Set(title.to_string()),
			description: Set(description.to_string()),
		})
		.exec(self.db.inner())
		.await?;
		info!("Created group {}.", slug);

		Ok(group::Model {
			id: result.last_insert_id,
			slug: slug.to_string(),
			title: title.to_string(),
			description: description.to_string(),
		})
	}

	/// Publishes a new post. `image` is the path of an already stored image,
	/// relative to the media directory.
	pub async fn create_post(
		&self, author: &user::Model, text: &str, group_id: Option<i64>, image: Option<String>,
	) -> db::Result<post::Model> {
		let pub_date = current_timestamp();
		let result = post::Entity::insert(post::ActiveModel {
			id: NotSet,
			text: Set(text.to_string()),
			pub_date: Set(pub_date),
			author_id: Set(author.id),
			group_id: Set(group_id),
			image: Set(image.clone()),
		})
		.exec(self.db.inner())
		.await?;

		Ok(post::Model {
			id: result.last_insert_id,
			text: text.to_string(),
			pub_date,
			author_id: author.id,
			group_id,
			image,
		})
	}

	/// Changes the contents of a post. The author and the publication date
	/// never change. Returns `None` without touching the post if `editor` isn't
	/// allowed to edit it.
	pub async fn update_post(
		&self, editor: &user::Model, post: &post::Model, text: &str, group_id: Option<i64>,
		image: Option<String>,
	) -> db::Result<Option<post::Model>> {
		if !policy::can_edit(Some(editor), post) {
			warn!(
				"User {} attempted to edit post {} of someone else.",
				editor.username, post.id
			);
			return Ok(None);
		}

		let updated = post::Entity::update(post::ActiveModel {
			id: Set(post.id),
			text: Set(text.to_string()),
			pub_date: NotSet,
			author_id: Set(editor.id),
			group_id: Set(group_id),
			image: Set(image),
		})
		.exec(self.db.inner())
		.await?;
		Ok(Some(updated))
	}

	pub async fn add_comment(
		&self, author: &user::Model, post: &post::Model, text: &str,
	) -> db::Result<comment::Model> {
		let created = current_timestamp();
		let result = comment::Entity::insert(comment::ActiveModel {
			id: NotSet,
			text: Set(text.to_string()),
			created: Set(created),
			author_id: Set(author.id),
			post_id: Set(post.id),
		})
		.exec(self.db.inner())
		.await?;

		Ok(comment::Model {
			id: result.last_insert_id,
			text: text.to_string(),
			created,
			author_id: author.id,
			post_id: post.id,
		})
	}

	/// Makes `user` follow `author`. Following yourself or an author you
	/// already follow does nothing. Returns whether a new relation was made.
	pub async fn follow(&self, user: &user::Model, author: &user::Model) -> db::Result<bool> {
		if !policy::can_follow(user, author) {
			debug!("User {} tried to follow themselves.", user.username);
			return Ok(false);
		}

		let tx = self.db.transaction().await?;
		if tx.is_following(user.id, author.id).await? {
			return Ok(false);
		}
		follow::Entity::insert(follow::ActiveModel {
			id: NotSet,
			user_id: Set(user.id),
			author_id: Set(author.id),
		})
		.exec(tx.inner())
		.await?;
		tx.commit().await?;
		Ok(true)
	}

	/// Returns whether `user` was following `author` before.
	pub async fn unfollow(&self, user: &user::Model, author: &user::Model) -> db::Result<bool> {
		let result = follow::Entity::delete_many()
			.filter(follow::Column::UserId.eq(user.id))
			.filter(follow::Column::AuthorId.eq(author.id))
			.exec(self.db.inner())
			.await?;
		Ok(result.rows_affected > 0)
	}
}
