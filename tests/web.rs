use std::sync::Arc;

use axum::{
	body::{to_bytes, Body, Bytes},
	http::{header, Request, StatusCode},
	response::Response,
};
use inkpost::{
	common::Token,
	db::PersistenceHandle,
	entity::*,
	test::*,
	web::{self, Global},
};
use sea_orm::{prelude::*, PaginatorTrait};
use tower::ServiceExt;


#[ctor::ctor]
fn initialize() {
	env_logger::init();
}

const BOUNDARY: &str = "inkpost-test-boundary";


async fn send(g: &Arc<Global>, request: Request<Body>) -> Response {
	web::router(g.clone()).oneshot(request).await.unwrap()
}

async fn get(g: &Arc<Global>, uri: &str, session: Option<&Token>) -> Response {
	let mut builder = Request::builder().uri(uri);
	if let Some(token) = session {
		builder = builder.header(header::COOKIE, format!("sessionid={}", token));
	}
	send(g, builder.body(Body::empty()).unwrap()).await
}

async fn post_form(g: &Arc<Global>, uri: &str, body: &str, session: Option<&Token>) -> Response {
	let mut builder = Request::builder()
		.method("POST")
		.uri(uri)
		.header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
	if let Some(token) = session {
		builder = builder.header(header::COOKIE, format!("sessionid={}", token));
	}
	send(g, builder.body(Body::from(body.to_string())).unwrap()).await
}

async fn post_multipart(
	g: &Arc<Global>, uri: &str, fields: &[(&str, &str)], session: Option<&Token>,
) -> Response {
	let mut body = String::new();
	for (name, value) in fields {
		body += &format!(
			"--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
			BOUNDARY, name, value
		);
	}
	body += &format!("--{}--\r\n", BOUNDARY);

	let mut builder = Request::builder().method("POST").uri(uri).header(
		header::CONTENT_TYPE,
		format!("multipart/form-data; boundary={}", BOUNDARY),
	);
	if let Some(token) = session {
		builder = builder.header(header::COOKIE, format!("sessionid={}", token));
	}
	send(g, builder.body(Body::from(body)).unwrap()).await
}

async fn body_bytes(response: Response) -> Bytes {
	to_bytes(response.into_body(), usize::MAX).await.unwrap()
}

async fn body_text(response: Response) -> String {
	String::from_utf8(body_bytes(response).await.to_vec()).unwrap()
}

fn location(response: &Response) -> &str {
	response
		.headers()
		.get(header::LOCATION)
		.expect("no location header")
		.to_str()
		.unwrap()
}

fn count_posts_in(html: &str) -> usize { html.matches("<article class=\"post\">").count() }

async fn login(g: &Arc<Global>, username: &str) -> (user::Model, Token) {
	let user = create_user(&g.api, username).await;
	let token = g.api.login(&user).await.unwrap();
	(user, token)
}


#[tokio::test]
async fn test_feed_pagination() {
	let g = load_global("web-pagination").await;
	let author = create_user(&g.api, "TestTestov").await;
	for i in 0..13 {
		create_post(&g.api, &author, &format!("Number {}", i)).await;
	}

	for path in ["/", "/TestTestov/"] {
		let response = get(&g, path, None).await;
		assert_eq!(response.status(), StatusCode::OK);
		let html = body_text(response).await;
		assert_eq!(count_posts_in(&html), 10, "first page of {}", path);
		assert!(html.contains("Page 1 of 2"));

		let response = get(&g, &format!("{}?page=2", path), None).await;
		let html = body_text(response).await;
		assert_eq!(count_posts_in(&html), 3, "second page of {}", path);

		let response = get(&g, &format!("{}?page=last", path), None).await;
		let html = body_text(response).await;
		assert_eq!(count_posts_in(&html), 10, "non-numeric page of {}", path);

		let response = get(&g, &format!("{}?page=99999999999999999999999", path), None).await;
		let html = body_text(response).await;
		assert_eq!(count_posts_in(&html), 3, "huge page number of {}", path);
		assert!(html.contains("Page 2 of 2"));
	}
}

#[tokio::test]
async fn test_group_page() {
	let g = load_global("web-group").await;
	let author = create_user(&g.api, "author").await;
	let group = g.api.ensure_group("cats", "All about cats", "").await.unwrap();
	g.api
		.create_post(&author, "Meow", Some(group.id), None)
		.await
		.unwrap();
	create_post(&g.api, &author, "Woof").await;

	let html = body_text(get(&g, "/group/cats/", None).await).await;
	assert!(html.contains("All about cats"));
	assert!(html.contains("Meow"));
	assert!(!html.contains("Woof"));
	assert_eq!(count_posts_in(&html), 1);

	let response = get(&g, "/group/dogs/", None).await;
	assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_non_owner_cannot_edit() {
	let g = load_global("web-edit").await;
	let author = create_user(&g.api, "author").await;
	let (_, token) = login(&g, "intruder").await;
	let post = create_post(&g.api, &author, "Original text").await;
	let post_url = format!("/author/{}/", post.id);
	let edit_url = format!("/author/{}/edit/", post.id);

	let response = get(&g, &edit_url, Some(&token)).await;
	assert_eq!(response.status(), StatusCode::FOUND);
	assert_eq!(location(&response), post_url);

	let response = post_multipart(&g, &edit_url, &[("text", "Changed")], Some(&token)).await;
	assert_eq!(response.status(), StatusCode::FOUND);
	assert_eq!(location(&response), post_url);

	let (stored, _) = g.api.db.find_post("author", post.id).await.unwrap().unwrap();
	assert_eq!(stored.text, "Original text");
}

#[tokio::test]
async fn test_owner_edits_post() {
	let g = load_global("web-edit-owner").await;
	let (author, token) = login(&g, "author").await;
	let post = create_post(&g.api, &author, "Original text").await;
	let edit_url = format!("/author/{}/edit/", post.id);

	let response = get(&g, &edit_url, Some(&token)).await;
	assert_eq!(response.status(), StatusCode::OK);
	assert!(body_text(response).await.contains("Original text"));

	let response = post_multipart(&g, &edit_url, &[("text", "Edited text")], Some(&token)).await;
	assert_eq!(response.status(), StatusCode::FOUND);
	assert_eq!(location(&response), format!("/author/{}/", post.id));

	let (stored, _) = g.api.db.find_post("author", post.id).await.unwrap().unwrap();
	assert_eq!(stored.text, "Edited text");
	assert_eq!(stored.author_id, author.id);
	assert_eq!(stored.pub_date, post.pub_date);
}

#[tokio::test]
async fn test_anonymous_comment_redirects_to_login() {
	let g = load_global("web-anonymous-comment").await;
	let author = create_user(&g.api, "SomeAuthor").await;
	let mut post = create_post(&g.api, &author, "Number 1").await;
	for i in 2..=4 {
		post = create_post(&g.api, &author, &format!("Number {}", i)).await;
	}
	assert_eq!(post.id, 4);

	let response = post_form(&g, "/SomeAuthor/4/comment/", "text=Hello", None).await;
	assert_eq!(response.status(), StatusCode::FOUND);
	assert_eq!(
		location(&response),
		"/auth/login/?next=/SomeAuthor/4/comment/"
	);
	assert_eq!(g.api.db.count_comments(4).await.unwrap(), 0);
}

#[tokio::test]
async fn test_comment() {
	let g = load_global("web-comment").await;
	let author = create_user(&g.api, "author").await;
	let (_, token) = login(&g, "reader").await;
	let post = create_post(&g.api, &author, "Discuss this").await;
	let comment_url = format!("/author/{}/comment/", post.id);

	let response = post_form(&g, &comment_url, "text=Great+post", Some(&token)).await;
	assert_eq!(response.status(), StatusCode::FOUND);
	assert_eq!(location(&response), format!("/author/{}/", post.id));
	assert_eq!(g.api.db.count_comments(post.id).await.unwrap(), 1);

	// Empty comments are dropped, but still lead back to the post
	let response = post_form(&g, &comment_url, "text=++", Some(&token)).await;
	assert_eq!(response.status(), StatusCode::FOUND);
	assert_eq!(g.api.db.count_comments(post.id).await.unwrap(), 1);

	// Without a form body the comment is dropped as well
	let request = Request::builder()
		.method("POST")
		.uri(&comment_url)
		.header(header::COOKIE, format!("sessionid={}", token))
		.body(Body::from("text=Sneaky"))
		.unwrap();
	let response = send(&g, request).await;
	assert_eq!(response.status(), StatusCode::FOUND);
	assert_eq!(location(&response), format!("/author/{}/", post.id));
	assert_eq!(g.api.db.count_comments(post.id).await.unwrap(), 1);

	// The pair of author and post has to match
	let response = post_form(
		&g,
		&format!("/reader/{}/comment/", post.id),
		"text=Hi",
		Some(&token),
	)
	.await;
	assert_eq!(response.status(), StatusCode::NOT_FOUND);

	let html = body_text(get(&g, &format!("/author/{}/", post.id), None).await).await;
	assert!(html.contains("Great post"));
}

#[tokio::test]
async fn test_index_cache() {
	let g = load_global("web-cache").await;
	let author = create_user(&g.api, "author").await;
	let post = create_post(&g.api, &author, "Before the edit").await;

	let first = body_bytes(get(&g, "/", None).await).await;
	g.api
		.update_post(&author, &post, "After the edit", None, None)
		.await
		.unwrap();
	let second = body_bytes(get(&g, "/", None).await).await;
	assert_eq!(first, second);

	g.api.cache.invalidate().await;
	let third = body_bytes(get(&g, "/", None).await).await;
	assert_ne!(first, third);
	assert!(String::from_utf8_lossy(&third).contains("After the edit"));
}

#[tokio::test]
async fn test_protected_pages_redirect() {
	let g = load_global("web-protected").await;

	let response = get(&g, "/new/", None).await;
	assert_eq!(response.status(), StatusCode::FOUND);
	assert_eq!(location(&response), "/auth/login/?next=/new/");

	let response = get(&g, "/follow/", None).await;
	assert_eq!(response.status(), StatusCode::FOUND);
	assert_eq!(location(&response), "/auth/login/?next=/follow/");

	let author = create_user(&g.api, "author").await;
	let post = create_post(&g.api, &author, "Mine").await;
	let edit_url = format!("/author/{}/edit/", post.id);
	let response = get(&g, &edit_url, None).await;
	assert_eq!(response.status(), StatusCode::FOUND);
	assert_eq!(
		location(&response),
		format!("/auth/login/?next={}", edit_url)
	);
	let response = post_multipart(&g, &edit_url, &[("text", "Hijacked")], None).await;
	assert_eq!(response.status(), StatusCode::FOUND);
	let (stored, _) = g.api.db.find_post("author", post.id).await.unwrap().unwrap();
	assert_eq!(stored.text, "Mine");

	for path in ["/author/follow/", "/author/unfollow/"] {
		let response = post_form(&g, path, "", None).await;
		assert_eq!(response.status(), StatusCode::FOUND, "{}", path);
		assert_eq!(location(&response), format!("/auth/login/?next={}", path));
	}
	assert_eq!(follow::Entity::find().count(g.api.db.inner()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_not_found() {
	let g = load_global("web-not-found").await;
	let author = create_user(&g.api, "author").await;
	let post = create_post(&g.api, &author, "Text").await;

	for path in [
		"/no/such/page/here/".to_string(),
		"/nobody/".to_string(),
		format!("/author/{}/", post.id + 1),
		"/author/first/".to_string(),
	] {
		let response = get(&g, &path, None).await;
		assert_eq!(response.status(), StatusCode::NOT_FOUND, "{}", path);
	}
	let response = get(&g, &format!("/author/{}/", post.id), None).await;
	assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_new_post() {
	let g = load_global("web-new-post").await;
	let (author, token) = login(&g, "author").await;
	let group = g.api.ensure_group("cats", "Cats", "").await.unwrap();

	let response = get(&g, "/new/", Some(&token)).await;
	assert_eq!(response.status(), StatusCode::OK);

	let response = post_multipart(&g, "/new/", &[("text", "  "), ("group", "")], Some(&token)).await;
	assert_eq!(response.status(), StatusCode::OK);
	assert!(body_text(response).await.contains("This field is required."));
	assert_eq!(g.api.db.count_posts_by_author(author.id).await.unwrap(), 0);

	let group_id = group.id.to_string();
	let response = post_multipart(
		&g,
		"/new/",
		&[("text", "Hello cats"), ("group", &group_id)],
		Some(&token),
	)
	.await;
	assert_eq!(response.status(), StatusCode::FOUND);
	assert_eq!(location(&response), "/");
	assert_eq!(g.api.db.count_posts_by_author(author.id).await.unwrap(), 1);

	let stored = post::Entity::find().one(g.api.db.inner()).await.unwrap().unwrap();
	assert_eq!(stored.text, "Hello cats");
	assert_eq!(stored.group_id, Some(group.id));
	assert_eq!(stored.author_id, author.id);
}

#[tokio::test]
async fn test_follow_and_unfollow() {
	let g = load_global("web-follow").await;
	let author = create_user(&g.api, "author").await;
	let (reader, token) = login(&g, "reader").await;
	create_post(&g.api, &author, "For my followers").await;

	let response = post_form(&g, "/author/follow/", "", Some(&token)).await;
	assert_eq!(response.status(), StatusCode::FOUND);
	assert_eq!(location(&response), "/author/");
	post_form(&g, "/author/follow/", "", Some(&token)).await;
	assert_eq!(follow::Entity::find().count(g.api.db.inner()).await.unwrap(), 1);
	assert!(g.api.db.is_following(reader.id, author.id).await.unwrap());

	let html = body_text(get(&g, "/follow/", Some(&token)).await).await;
	assert!(html.contains("For my followers"));

	let html = body_text(get(&g, "/author/", Some(&token)).await).await;
	assert!(html.contains("Followers: 1"));
	assert!(html.contains("/author/unfollow/"));

	let request = Request::builder()
		.method("POST")
		.uri("/author/unfollow/")
		.header(header::COOKIE, format!("sessionid={}", token))
		.header(header::REFERER, "/follow/")
		.body(Body::empty())
		.unwrap();
	let response = send(&g, request).await;
	assert_eq!(response.status(), StatusCode::FOUND);
	assert_eq!(location(&response), "/follow/");
	assert_eq!(follow::Entity::find().count(g.api.db.inner()).await.unwrap(), 0);

	// A referer from another site leads to the profile instead
	let request = Request::builder()
		.method("POST")
		.uri("/author/follow/")
		.header(header::COOKIE, format!("sessionid={}", token))
		.header(header::REFERER, "https://evil.example/phish/")
		.body(Body::empty())
		.unwrap();
	let response = send(&g, request).await;
	assert_eq!(response.status(), StatusCode::FOUND);
	assert_eq!(location(&response), "/author/");
	post_form(&g, "/author/unfollow/", "", Some(&token)).await;

	let response = post_form(&g, "/nobody/follow/", "", Some(&token)).await;
	assert_eq!(response.status(), StatusCode::NOT_FOUND);

	// Following yourself does nothing
	post_form(&g, "/reader/follow/", "", Some(&token)).await;
	assert_eq!(follow::Entity::find().count(g.api.db.inner()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_signup_and_login() {
	let g = load_global("web-auth").await;

	let response = post_form(
		&g,
		"/auth/signup/",
		"username=newcomer&password1=long+password&password2=long+password",
		None,
	)
	.await;
	assert_eq!(response.status(), StatusCode::FOUND);
	assert_eq!(location(&response), "/auth/login/");

	// The username is taken now
	let response = post_form(
		&g,
		"/auth/signup/",
		"username=newcomer&password1=long+password&password2=long+password",
		None,
	)
	.await;
	assert_eq!(response.status(), StatusCode::OK);
	assert!(body_text(response).await.contains("already exists"));

	let response = post_form(
		&g,
		"/auth/login/",
		"username=newcomer&password=wrong+password&next=%2Fnew%2F",
		None,
	)
	.await;
	assert_eq!(response.status(), StatusCode::OK);
	assert!(body_text(response)
		.await
		.contains("Please enter a correct username and password"));

	let response = post_form(
		&g,
		"/auth/login/",
		"username=newcomer&password=long+password&next=%2Fnew%2F",
		None,
	)
	.await;
	assert_eq!(response.status(), StatusCode::FOUND);
	assert_eq!(location(&response), "/new/");
	let cookie = response
		.headers()
		.get(header::SET_COOKIE)
		.unwrap()
		.to_str()
		.unwrap()
		.to_string();
	assert!(cookie.starts_with("sessionid="));
	assert!(cookie.contains("HttpOnly"));

	let token_text = cookie["sessionid=".len()..]
		.split(';')
		.next()
		.unwrap()
		.to_string();
	let token = Token::from_base58(&token_text).unwrap();
	let response = get(&g, "/new/", Some(&token)).await;
	assert_eq!(response.status(), StatusCode::OK);

	let response = post_form(&g, "/auth/logout/", "", Some(&token)).await;
	assert_eq!(response.status(), StatusCode::OK);
	let response = get(&g, "/new/", Some(&token)).await;
	assert_eq!(response.status(), StatusCode::FOUND);
}

#[tokio::test]
async fn test_rss() {
	let g = load_global("web-rss").await;
	let author = create_user(&g.api, "author").await;
	create_post(&g.api, &author, "Syndicated").await;

	let response = get(&g, "/rss", None).await;
	assert_eq!(response.status(), StatusCode::OK);
	assert_eq!(
		response.headers().get(header::CONTENT_TYPE).unwrap(),
		"application/rss+xml"
	);
	let xml = body_text(response).await;
	assert!(xml.contains("<rss"));
	assert!(xml.contains("Syndicated"));
}

#[tokio::test]
async fn test_about_pages() {
	let g = load_global("web-about").await;
	for path in ["/about/author/", "/about/tech/"] {
		let response = get(&g, path, None).await;
		assert_eq!(response.status(), StatusCode::OK, "{}", path);
	}
}
