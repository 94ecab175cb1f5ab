//! Feed composition: newest-first, paginated lists of posts with an optional
//! filter.

use std::{collections::HashMap, num::IntErrorKind};

use sea_orm::{prelude::*, Condition, PaginatorTrait, QueryOrder, QuerySelect, QueryTrait};

use crate::{
	db::{self, Error, PersistenceHandle},
	entity::*,
};


/// The number of posts on a single page of any feed.
pub const PAGE_SIZE: u64 = 10;


#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FeedFilter {
	/// Every post
	All,
	/// Posts in the group with the given id
	Group(i64),
	/// Posts written by the user with the given id
	Author(i64),
	/// Posts written by any author that the user with the given id follows
	FollowedBy(i64),
}

/// One slice of a larger list.
#[derive(Debug)]
pub struct Page<T> {
	/// The 1-based page number
	pub number: u64,
	pub num_pages: u64,
	/// The total amount of items over all pages
	pub count: u64,
	pub items: Vec<T>,
}

#[derive(Debug)]
pub struct FeedItem {
	pub post: post::Model,
	pub author: user::Model,
	pub group: Option<group::Model>,
	pub comment_count: u64,
}


/// The number of pages needed to show `count` items. An empty list still has
/// one (empty) page.
pub fn page_count(count: u64, page_size: u64) -> u64 {
	if count == 0 {
		1
	} else {
		(count + page_size - 1) / page_size
	}
}

/// Turns the raw `page` query parameter into a page number within
/// `1..=num_pages`. Anything that isn't a number yields the first page, any
/// number out of range yields the last page, no matter how many digits it has.
pub fn resolve_page_number(requested: Option<&str>, num_pages: u64) -> u64 {
	let number = match requested.map(|s| s.trim().parse::<i64>()) {
		Some(Ok(n)) => n,
		Some(Err(e))
			if matches!(e.kind(), IntErrorKind::PosOverflow | IntErrorKind::NegOverflow) =>
			return num_pages,
		_ => return 1,
	};
	if number < 1 || number as u64 > num_pages {
		num_pages
	} else {
		number as u64
	}
}

fn filter_condition(filter: FeedFilter) -> Option<Condition> {
	let expr = match filter {
		FeedFilter::All => return None,
		FeedFilter::Group(group_id) => post::Column::GroupId.eq(group_id),
		FeedFilter::Author(author_id) => post::Column::AuthorId.eq(author_id),
		FeedFilter::FollowedBy(user_id) => post::Column::AuthorId.in_subquery(
			follow::Entity::find()
				.select_only()
				.column(follow::Column::AuthorId)
				.filter(follow::Column::UserId.eq(user_id))
				.into_query(),
		),
	};
	Some(Condition::all().add(expr))
}

/// Loads the requested page of a feed.
pub async fn load_feed<H>(
	db: &H, filter: FeedFilter, requested_page: Option<&str>,
) -> db::Result<Page<FeedItem>>
where
	H: PersistenceHandle + Sync,
{
	let base = post::Entity::find().apply_if(filter_condition(filter), |query, condition| {
		query.filter(condition)
	});

	let count = base.clone().count(db.inner()).await?;
	let num_pages = page_count(count, PAGE_SIZE);
	let number = resolve_page_number(requested_page, num_pages);

	let results = base
		.find_also_related(user::Entity)
		.order_by_desc(post::Column::PubDate)
		.order_by_desc(post::Column::Id)
		.offset((number - 1) * PAGE_SIZE)
		.limit(PAGE_SIZE)
		.all(db.inner())
		.await?;

	let items = complete_feed_items(db, results).await?;
	Ok(Page {
		number,
		num_pages,
		count,
		items,
	})
}

/// Loads the newest posts without any pagination, used for syndication.
pub async fn load_latest<H>(db: &H, limit: u64) -> db::Result<Vec<FeedItem>>
where
	H: PersistenceHandle + Sync,
{
	let results = post::Entity::find()
		.find_also_related(user::Entity)
		.order_by_desc(post::Column::PubDate)
		.order_by_desc(post::Column::Id)
		.limit(limit)
		.all(db.inner())
		.await?;
	complete_feed_items(db, results).await
}

/// Attaches the group and the comment count to every post.
async fn complete_feed_items<H>(
	db: &H, results: Vec<(post::Model, Option<user::Model>)>,
) -> db::Result<Vec<FeedItem>>
where
	H: PersistenceHandle + Sync,
{
	let post_ids: Vec<i64> = results.iter().map(|(p, _)| p.id).collect();
	let group_ids: Vec<i64> = results.iter().filter_map(|(p, _)| p.group_id).collect();

	let groups: HashMap<i64, group::Model> = if group_ids.len() > 0 {
		group::Entity::find()
			.filter(group::Column::Id.is_in(group_ids))
			.all(db.inner())
			.await?
			.into_iter()
			.map(|g| (g.id, g))
			.collect()
	} else {
		HashMap::new()
	};

	let comment_counts: HashMap<i64, i64> = if post_ids.len() > 0 {
		comment::Entity::find()
			.select_only()
			.column(comment::Column::PostId)
			.column_as(comment::Column::Id.count(), "count")
			.filter(comment::Column::PostId.is_in(post_ids))
			.group_by(comment::Column::PostId)
			.into_tuple::<(i64, i64)>()
			.all(db.inner())
			.await?
			.into_iter()
			.collect()
	} else {
		HashMap::new()
	};

	let mut items = Vec::with_capacity(results.len());
	for (post, author_opt) in results {
		let author = match author_opt {
			Some(a) => a,
			None => Err(Error::MissingUser(post.author_id))?,
		};
		let group = post.group_id.and_then(|id| groups.get(&id).cloned());
		let comment_count = comment_counts.get(&post.id).cloned().unwrap_or(0) as u64;
		items.push(FeedItem {
			post,
			author,
			group,
			comment_count,
		});
	}
	Ok(items)
}

impl<T> Page<T> {
	pub fn has_previous(&self) -> bool { self.number > 1 }

	pub fn has_next(&self) -> bool { self.number < self.num_pages }

	pub fn previous_page_number(&self) -> Option<u64> {
		if self.has_previous() {
			Some(self.number - 1)
		} else {
			None
		}
	}

	pub fn next_page_number(&self) -> Option<u64> {
		if self.has_next() {
			Some(self.number + 1)
		} else {
			None
		}
	}
}
