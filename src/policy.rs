//! Authorization rules, kept free of any HTTP concerns.

use crate::entity::{post, user};


/// Whether the given user, if any, may change the given post. Only the author
/// of a post may edit it.
pub fn can_edit(user: Option<&user::Model>, post: &post::Model) -> bool {
	match user {
		Some(u) => u.id == post.author_id,
		None => false,
	}
}

/// Whether `user` is allowed to start following `author`. Nobody can follow
/// themselves.
pub fn can_follow(user: &user::Model, author: &user::Model) -> bool { user.id != author.id }


#[cfg(test)]
mod tests {
	use super::*;
	use crate::common::Token;

	fn user(id: i64, username: &str) -> user::Model {
		user::Model {
			id,
			username: username.to_string(),
			password_salt: Token::default(),
			password_hash: Token::default(),
			date_joined: 0,
		}
	}

	fn post(author_id: i64) -> post::Model {
		post::Model {
			id: 1,
			text: "Post number 1".to_string(),
			pub_date: 0,
			author_id,
			group_id: None,
			image: None,
		}
	}

	#[test]
	fn test_can_edit() {
		let author = user(1, "author");
		let visitor = user(2, "visitor");
		let post = post(author.id);
		assert!(can_edit(Some(&author), &post));
		assert!(!can_edit(Some(&visitor), &post));
		assert!(!can_edit(None, &post));
	}

	#[test]
	fn test_can_follow() {
		let a = user(1, "a");
		let b = user(2, "b");
		assert!(can_follow(&a, &b));
		assert!(!can_follow(&a, &a));
	}
}
