use std::sync::Arc;

use axum::{
	extract::*,
	http::{header, HeaderMap, Uri},
	middleware::from_fn,
	response::Response,
	routing::*,
};
use log::*;

use super::{
	common::*,
	login_required,
	posts::PaginationQuery,
	viewer_context, CurrentUser, Global,
};
use crate::{
	db::PersistenceHandle,
	entity::*,
	feed::{self, FeedFilter},
	forms::is_local_path,
};


pub fn router() -> Router<Arc<Global>> {
	let protected_routes = Router::new()
		.route("/:username/follow/", post(follow))
		.route("/:username/unfollow/", post(unfollow))
		.route_layer(from_fn(login_required));

	Router::new()
		.route("/:username/", get(profile))
		.merge(protected_routes)
}

async fn profile(
	State(g): State<Arc<Global>>, Extension(current): Extension<CurrentUser>,
	Path(username): Path<String>, Query(query): Query<PaginationQuery>, uri: Uri,
) -> Response {
	let viewer = current.0.as_ref();
	let author = match g.api.db.find_user_by_username(&username).await {
		Ok(Some(a)) => a,
		Ok(None) => return g.not_found(uri.path(), viewer),
		Err(e) => return server_error_response(e, "Unable to load author"),
	};

	let page = match feed::load_feed(&g.api.db, FeedFilter::Author(author.id), query.page()).await
	{
		Ok(p) => p,
		Err(e) => return server_error_response(e, "Unable to load profile feed"),
	};
	let follower_count = match g.api.db.count_followers(author.id).await {
		Ok(c) => c,
		Err(e) => return server_error_response(e, "Unable to count followers"),
	};
	let following_count = match g.api.db.count_following(author.id).await {
		Ok(c) => c,
		Err(e) => return server_error_response(e, "Unable to count followed authors"),
	};
	// Nobody follows themselves
	let following = match viewer {
		Some(v) if v.id != author.id => match g.api.db.is_following(v.id, author.id).await {
			Ok(f) => f,
			Err(e) => return server_error_response(e, "Unable to load follow status"),
		},
		_ => false,
	};

	let post_count = page.count;
	let (page_info, posts) = into_page_display_info(page, viewer);
	let mut context = viewer_context(viewer);
	context.insert("author", &into_user_display_info(&author));
	context.insert("is_self", &viewer.map(|v| v.id == author.id).unwrap_or(false));
	context.insert("page", &page_info);
	context.insert("posts", &posts);
	context.insert("post_count", &post_count);
	context.insert("follower_count", &follower_count);
	context.insert("following_count", &following_count);
	context.insert("following", &following);
	g.render("profile.html.tera", context)
}

async fn follow(
	State(g): State<Arc<Global>>, Extension(user): Extension<user::Model>,
	Path(username): Path<String>, headers: HeaderMap, uri: Uri,
) -> Response {
	let author = match find_author(&g, &user, &username, &uri).await {
		Ok(a) => a,
		Err(r) => return r,
	};
	match g.api.follow(&user, &author).await {
		Ok(true) => info!("User {} now follows {}.", &user.username, &author.username),
		Ok(false) => {}
		Err(e) => return server_error_response(e, "Unable to follow author"),
	}
	redirect_back(&headers, &author)
}

async fn unfollow(
	State(g): State<Arc<Global>>, Extension(user): Extension<user::Model>,
	Path(username): Path<String>, headers: HeaderMap, uri: Uri,
) -> Response {
	let author = match find_author(&g, &user, &username, &uri).await {
		Ok(a) => a,
		Err(r) => return r,
	};
	match g.api.unfollow(&user, &author).await {
		Ok(true) => info!("User {} unfollowed {}.", &user.username, &author.username),
		Ok(false) => {}
		Err(e) => return server_error_response(e, "Unable to unfollow author"),
	}
	redirect_back(&headers, &author)
}

async fn find_author(
	g: &Global, user: &user::Model, username: &str, uri: &Uri,
) -> Result<user::Model, Response> {
	match g.api.db.find_user_by_username(username).await {
		Ok(Some(author)) => Ok(author),
		Ok(None) => Err(g.not_found(uri.path(), Some(user))),
		Err(e) => Err(server_error_response(e, "Unable to load author")),
	}
}

/// Goes back to the page the request came from if it is on this site, or
/// otherwise to the author's profile.
fn redirect_back(headers: &HeaderMap, author: &user::Model) -> Response {
	let host = headers.get(header::HOST).and_then(|value| value.to_str().ok());
	let location = headers
		.get(header::REFERER)
		.and_then(|value| value.to_str().ok())
		.and_then(|referer| local_referer(referer, host))
		.unwrap_or_else(|| format!("/{}/", &author.username));
	redirect_response(&location)
}

/// The path of the referring page, but only if it is served by this host.
fn local_referer(referer: &str, host: Option<&str>) -> Option<String> {
	if is_local_path(referer) {
		return Some(referer.to_string());
	}

	let uri: Uri = referer.parse().ok()?;
	let authority = uri.authority()?;
	if Some(authority.as_str()) != host {
		debug!("Not redirecting to foreign referer {}", referer);
		return None;
	}
	let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
	if is_local_path(path) {
		Some(path.to_string())
	} else {
		None
	}
}


#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_local_referer() {
		let host = Some("blog.example:8000");
		assert_eq!(local_referer("/follow/", host), Some("/follow/".to_string()));
		assert_eq!(
			local_referer("http://blog.example:8000/author/?page=2", host),
			Some("/author/?page=2".to_string())
		);
		assert_eq!(local_referer("https://evil.example/author/", host), None);
		assert_eq!(local_referer("http://blog.example:8000/author/", None), None);
		assert_eq!(local_referer("//evil.example/", host), None);
		assert_eq!(local_referer("", host), None);
	}
}
