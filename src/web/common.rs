use std::fmt::{Debug, Display};

use ::serde::Serialize;
use axum::{body::Body, http::Uri, response::Response};
use chrono::*;
use log::*;

use crate::{
	entity::*,
	feed::{FeedItem, Page},
	policy,
};


/// Shown when something went wrong on our end. It doesn't go through the
/// template engine, because the template engine may be what failed.
const SERVER_ERROR_PAGE: &str = include_str!("../../templates/misc/500.html");


#[derive(Debug, Serialize)]
pub struct PostDisplayInfo {
	pub id: i64,
	pub text: String,
	pub author: String,
	pub group: Option<GroupDisplayInfo>,
	pub image_url: Option<String>,
	pub comment_count: u64,
	pub created: String,
	pub time_ago: String,
	pub can_edit: bool,
}

#[derive(Debug, Serialize)]
pub struct GroupDisplayInfo {
	pub slug: String,
	pub title: String,
	pub description: String,
}

#[derive(Debug, Serialize)]
pub struct CommentDisplayInfo {
	pub text: String,
	pub author: String,
	pub created: String,
	pub time_ago: String,
}

#[derive(Debug, Serialize)]
pub struct UserDisplayInfo {
	pub username: String,
	pub date_joined: String,
}

#[derive(Debug, Serialize)]
pub struct PageDisplayInfo {
	pub number: u64,
	pub num_pages: u64,
	pub count: u64,
	pub has_previous: bool,
	pub has_next: bool,
	pub previous_page_number: Option<u64>,
	pub next_page_number: Option<u64>,
}


pub fn into_post_display_info(
	post: post::Model, author: &user::Model, group: Option<&group::Model>, comment_count: u64,
	viewer: Option<&user::Model>,
) -> PostDisplayInfo {
	let (created, time_ago) = format_timestamp(post.pub_date);
	PostDisplayInfo {
		id: post.id,
		can_edit: policy::can_edit(viewer, &post),
		text: post.text,
		author: author.username.clone(),
		group: group.map(into_group_display_info),
		image_url: post.image.map(|path| format!("/media/{}", path)),
		comment_count,
		created,
		time_ago,
	}
}

pub fn into_feed_display_info(item: FeedItem, viewer: Option<&user::Model>) -> PostDisplayInfo {
	into_post_display_info(
		item.post,
		&item.author,
		item.group.as_ref(),
		item.comment_count,
		viewer,
	)
}

pub fn into_group_display_info(group: &group::Model) -> GroupDisplayInfo {
	GroupDisplayInfo {
		slug: group.slug.clone(),
		title: group.title.clone(),
		description: group.description.clone(),
	}
}

pub fn into_comment_display_info(comment: comment::Model, author: &user::Model) -> CommentDisplayInfo {
	let (created, time_ago) = format_timestamp(comment.created);
	CommentDisplayInfo {
		text: comment.text,
		author: author.username.clone(),
		created,
		time_ago,
	}
}

pub fn into_user_display_info(user: &user::Model) -> UserDisplayInfo {
	UserDisplayInfo {
		username: user.username.clone(),
		date_joined: format_timestamp(user.date_joined).0,
	}
}

/// Splits a page into the page info and the posts on it, ready for rendering.
pub fn into_page_display_info(
	page: Page<FeedItem>, viewer: Option<&user::Model>,
) -> (PageDisplayInfo, Vec<PostDisplayInfo>) {
	let info = PageDisplayInfo {
		number: page.number,
		num_pages: page.num_pages,
		count: page.count,
		has_previous: page.has_previous(),
		has_next: page.has_next(),
		previous_page_number: page.previous_page_number(),
		next_page_number: page.next_page_number(),
	};
	let posts = page
		.items
		.into_iter()
		.map(|item| into_feed_display_info(item, viewer))
		.collect();
	(info, posts)
}

/// Formats a millisecond timestamp as a date, and as the time that has passed
/// since then.
pub fn format_timestamp(timestamp: i64) -> (String, String) {
	match Utc.timestamp_millis_opt(timestamp).single() {
		Some(moment) => (
			moment.format("%Y-%m-%d %H:%M").to_string(),
			human_readable_duration(&Utc::now().signed_duration_since(moment)),
		),
		None => (String::new(), String::new()),
	}
}

pub fn human_readable_duration(duration: &Duration) -> String {
	fn plural(amount: i64, unit: &str) -> String {
		if amount == 1 {
			format!("{} {}", amount, unit)
		} else {
			format!("{} {}s", amount, unit)
		}
	}

	if duration.num_weeks() > 0 {
		plural(duration.num_weeks(), "week")
	} else if duration.num_days() > 0 {
		plural(duration.num_days(), "day")
	} else if duration.num_hours() > 0 {
		plural(duration.num_hours(), "hour")
	} else if duration.num_minutes() > 0 {
		plural(duration.num_minutes(), "minute")
	} else {
		plural(duration.num_seconds().max(0), "second")
	}
}

pub fn redirect_response(location: &str) -> Response {
	Response::builder()
		.status(302)
		.header("Location", location)
		.body(Body::empty())
		.unwrap()
}

/// The URL of the login page, which returns to `uri` after logging in.
pub fn login_url(uri: &Uri) -> String {
	let next = uri
		.path_and_query()
		.map(|pq| pq.as_str())
		.unwrap_or("/");
	format!(
		"/auth/login/?next={}",
		urlencoding::encode(next).replace("%2F", "/")
	)
}

pub fn error_response<S>(status_code: u16, message: S) -> Response
where
	S: Into<String>,
{
	let string: String = message.into();
	if status_code >= 400 {
		warn!("HTTP {} error: {}", status_code, &string);
	}
	Response::builder()
		.status(status_code)
		.header("Content-Type", "text/plain")
		.body(Body::from(string))
		.unwrap()
}

pub fn server_error_response<E>(e: E, message: &str) -> Response
where
	E: Debug + Display,
{
	error!("{}: {:?}", message, e);
	Response::builder()
		.status(500)
		.header("Content-Type", "text/html")
		.body(Body::from(SERVER_ERROR_PAGE))
		.unwrap()
}


#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_login_url() {
		let uri: Uri = "/SomeAuthor/4/comment/".parse().unwrap();
		assert_eq!(login_url(&uri), "/auth/login/?next=/SomeAuthor/4/comment/");

		let uri: Uri = "/follow/?page=2".parse().unwrap();
		assert_eq!(login_url(&uri), "/auth/login/?next=/follow/%3Fpage%3D2");
	}

	#[test]
	fn test_human_readable_duration() {
		assert_eq!(human_readable_duration(&Duration::seconds(1)), "1 second");
		assert_eq!(human_readable_duration(&Duration::seconds(42)), "42 seconds");
		assert_eq!(human_readable_duration(&Duration::minutes(1)), "1 minute");
		assert_eq!(human_readable_duration(&Duration::hours(5)), "5 hours");
		assert_eq!(human_readable_duration(&Duration::days(8)), "1 week");
		assert_eq!(human_readable_duration(&Duration::seconds(-3)), "0 seconds");
	}

	#[test]
	fn test_format_timestamp() {
		let (created, _) = format_timestamp(0);
		assert_eq!(created, "1970-01-01 00:00");
	}
}
