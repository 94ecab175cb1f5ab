use std::{collections::HashMap, io, path::Path as FsPath, sync::Arc};

use axum::{
	body::{Body, Bytes},
	extract::{multipart::MultipartError, *},
	http::Uri,
	middleware::{from_fn, from_fn_with_state, Next},
	response::Response,
	routing::*,
	RequestExt,
};
use log::*;
use rand::rngs::OsRng;
use serde::Deserialize;
use tera::Context;

use super::{common::*, login_required, viewer_context, CurrentUser, Global};
use crate::{
	common::Token,
	db::PersistenceHandle,
	entity::*,
	feed::{self, FeedFilter},
	forms::*,
	policy,
};


#[derive(Default, Deserialize)]
pub struct PaginationQuery {
	page: Option<String>,
}

impl PaginationQuery {
	pub fn page(&self) -> Option<&str> { self.page.as_deref() }
}

/// The post addressed by the `username` and `post_id` path parameters, which
/// exists and was written by that user.
#[derive(Clone)]
struct PostTarget {
	post: post::Model,
	author: user::Model,
}


pub fn router(g: Arc<Global>) -> Router<Arc<Global>> {
	let post_routes = Router::new()
		.route("/:username/:post_id/", get(post_view))
		.route_layer(from_fn_with_state(g.clone(), post_middleware));
	let protected_post_routes = Router::new()
		.route("/:username/:post_id/edit/", get(edit).post(edit_post))
		.route(
			"/:username/:post_id/comment/",
			get(comment_get).post(comment_post),
		)
		.route_layer(from_fn_with_state(g, post_middleware))
		.route_layer(from_fn(login_required));
	let protected_routes = Router::new()
		.route("/new/", get(new).post(new_post))
		.route("/follow/", get(follow_index))
		.route_layer(from_fn(login_required));

	Router::new()
		.route("/group/:slug/", get(group_posts))
		.merge(post_routes)
		.merge(protected_post_routes)
		.merge(protected_routes)
}

async fn post_middleware(
	State(g): State<Arc<Global>>, mut request: Request, next: Next,
) -> Response {
	let params = match request
		.extract_parts::<Path<HashMap<String, String>>>()
		.await
	{
		Ok(p) => p.0,
		Err(e) => return server_error_response(e, "Unable to read path parameters"),
	};
	let viewer = request
		.extensions()
		.get::<CurrentUser>()
		.and_then(|c| c.0.clone());
	let username = params.get("username").map(|s| s.as_str()).unwrap_or("");
	let post_id = match params.get("post_id").and_then(|s| s.parse::<i64>().ok()) {
		Some(id) => id,
		None => return g.not_found(request.uri().path(), viewer.as_ref()),
	};

	match g.api.db.find_post(username, post_id).await {
		Err(e) => return server_error_response(e, "Unable to load post"),
		Ok(None) => return g.not_found(request.uri().path(), viewer.as_ref()),
		Ok(Some((post, author))) => {
			request
				.extensions_mut()
				.insert(PostTarget { post, author });
		}
	}

	next.run(request).await
}

fn post_url(target: &PostTarget) -> String {
	format!("/{}/{}/", &target.author.username, target.post.id)
}

fn html_response(body: Bytes) -> Response {
	Response::builder()
		.header("Content-Type", "text/html")
		.body(Body::from(body))
		.unwrap()
}

/// Renders a feed page into the given template. The feed is always found in
/// the `posts` and `page` variables.
async fn render_feed(
	g: &Global, template_name: &str, filter: FeedFilter, query: &PaginationQuery,
	viewer: Option<&user::Model>, mut context: Context,
) -> Result<String, Response> {
	let page = match feed::load_feed(&g.api.db, filter, query.page()).await {
		Ok(p) => p,
		Err(e) => return Err(server_error_response(e, "Unable to load feed")),
	};
	let (page_info, posts) = into_page_display_info(page, viewer);
	context.insert("page", &page_info);
	context.insert("posts", &posts);

	g.render_html(template_name, context).map_err(|e| {
		server_error_response(
			e,
			&format!("Unable to render template \"{}\"", template_name),
		)
	})
}

/// The index page is served from the page cache while it is fresh. Each
/// visitor gets their own copy, because the page shows who is logged in.
pub async fn index(
	State(g): State<Arc<Global>>, Extension(current): Extension<CurrentUser>,
	Query(query): Query<PaginationQuery>, uri: Uri,
) -> Response {
	let viewer = current.0.as_ref();
	let key = format!(
		"{}#{}",
		uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/"),
		viewer.map(|u| u.username.as_str()).unwrap_or("")
	);
	if let Some(body) = g.api.cache.get(&key).await {
		return html_response(body);
	}

	let html = match render_feed(
		&g,
		"index.html.tera",
		FeedFilter::All,
		&query,
		viewer,
		viewer_context(viewer),
	)
	.await
	{
		Ok(h) => h,
		Err(r) => return r,
	};
	let body = Bytes::from(html);
	g.api.cache.insert(key, body.clone()).await;
	html_response(body)
}

async fn group_posts(
	State(g): State<Arc<Global>>, Extension(current): Extension<CurrentUser>,
	Path(slug): Path<String>, Query(query): Query<PaginationQuery>, uri: Uri,
) -> Response {
	let viewer = current.0.as_ref();
	let group = match g.api.db.find_group_by_slug(&slug).await {
		Ok(Some(group)) => group,
		Ok(None) => return g.not_found(uri.path(), viewer),
		Err(e) => return server_error_response(e, "Unable to load group"),
	};

	let mut context = viewer_context(viewer);
	context.insert("group", &into_group_display_info(&group));
	match render_feed(
		&g,
		"group.html.tera",
		FeedFilter::Group(group.id),
		&query,
		viewer,
		context,
	)
	.await
	{
		Ok(html) => html_response(html.into()),
		Err(r) => r,
	}
}

async fn follow_index(
	State(g): State<Arc<Global>>, Extension(user): Extension<user::Model>,
	Query(query): Query<PaginationQuery>,
) -> Response {
	let viewer = Some(&user);
	match render_feed(
		&g,
		"follow.html.tera",
		FeedFilter::FollowedBy(user.id),
		&query,
		viewer,
		viewer_context(viewer),
	)
	.await
	{
		Ok(html) => html_response(html.into()),
		Err(r) => r,
	}
}

async fn post_view(
	State(g): State<Arc<Global>>, Extension(current): Extension<CurrentUser>,
	Extension(target): Extension<PostTarget>,
) -> Response {
	let viewer = current.0.as_ref();
	let post_count = match g.api.db.count_posts_by_author(target.author.id).await {
		Ok(c) => c,
		Err(e) => return server_error_response(e, "Unable to count posts"),
	};
	let comments = match g.api.db.load_comments(target.post.id).await {
		Ok(c) => c,
		Err(e) => return server_error_response(e, "Unable to load comments"),
	};
	let group = match target.post.group_id {
		Some(id) => match g.api.db.find_group_by_id(id).await {
			Ok(group) => group,
			Err(e) => return server_error_response(e, "Unable to load group"),
		},
		None => None,
	};

	let comment_count = comments.len() as u64;
	let comments: Vec<CommentDisplayInfo> = comments
		.into_iter()
		.map(|(comment, author)| into_comment_display_info(comment, &author))
		.collect();
	let post = into_post_display_info(
		target.post,
		&target.author,
		group.as_ref(),
		comment_count,
		viewer,
	);

	let mut context = viewer_context(viewer);
	context.insert("post", &post);
	context.insert("author", &into_user_display_info(&target.author));
	context.insert("post_count", &post_count);
	context.insert("comments", &comments);
	context.insert("form", &CommentForm::default());
	g.render("post.html.tera", context)
}

async fn new(State(g): State<Arc<Global>>, Extension(user): Extension<user::Model>) -> Response {
	render_post_form(&g, &user, None, &PostForm::default(), &ValidationErrors::default()).await
}

async fn new_post(
	State(g): State<Arc<Global>>, Extension(user): Extension<user::Model>, multipart: Multipart,
) -> Response {
	let form = match read_post_form(multipart).await {
		Ok(f) => f,
		Err(e) => return error_response(400, format!("Invalid post form: {}", e)),
	};
	let groups = match g.api.db.load_groups().await {
		Ok(groups) => groups,
		Err(e) => return server_error_response(e, "Unable to load groups"),
	};
	let valid = match form.validate(&groups) {
		Ok(v) => v,
		Err(errors) => return render_post_form(&g, &user, None, &form, &errors).await,
	};

	let image = match valid.image {
		ImageChange::Replace(file) => match store_image(&g.config.media_dir, &file).await {
			Ok(path) => Some(path),
			Err(e) => return server_error_response(e, "Unable to store image"),
		},
		ImageChange::Keep | ImageChange::Clear => None,
	};
	match g
		.api
		.create_post(&user, &valid.text, valid.group_id, image)
		.await
	{
		Ok(post) => {
			info!("User {} published post {}.", &user.username, post.id);
			redirect_response("/")
		}
		Err(e) => server_error_response(e, "Unable to publish post"),
	}
}

async fn edit(
	State(g): State<Arc<Global>>, Extension(user): Extension<user::Model>,
	Extension(target): Extension<PostTarget>,
) -> Response {
	if !policy::can_edit(Some(&user), &target.post) {
		return redirect_response(&post_url(&target));
	}

	let form = PostForm::from_post(&target.post.text, target.post.group_id);
	render_post_form(&g, &user, Some(&target), &form, &ValidationErrors::default()).await
}

async fn edit_post(
	State(g): State<Arc<Global>>, Extension(user): Extension<user::Model>,
	Extension(target): Extension<PostTarget>, multipart: Multipart,
) -> Response {
	if !policy::can_edit(Some(&user), &target.post) {
		return redirect_response(&post_url(&target));
	}

	let form = match read_post_form(multipart).await {
		Ok(f) => f,
		Err(e) => return error_response(400, format!("Invalid post form: {}", e)),
	};
	let groups = match g.api.db.load_groups().await {
		Ok(groups) => groups,
		Err(e) => return server_error_response(e, "Unable to load groups"),
	};
	let valid = match form.validate(&groups) {
		Ok(v) => v,
		Err(errors) => return render_post_form(&g, &user, Some(&target), &form, &errors).await,
	};

	let image = match valid.image {
		ImageChange::Keep => target.post.image.clone(),
		ImageChange::Clear => None,
		ImageChange::Replace(file) => match store_image(&g.config.media_dir, &file).await {
			Ok(path) => Some(path),
			Err(e) => return server_error_response(e, "Unable to store image"),
		},
	};
	if let Err(e) = g
		.api
		.update_post(&user, &target.post, &valid.text, valid.group_id, image)
		.await
	{
		return server_error_response(e, "Unable to update post");
	}
	redirect_response(&post_url(&target))
}

async fn render_post_form(
	g: &Global, user: &user::Model, target: Option<&PostTarget>, form: &PostForm,
	errors: &ValidationErrors,
) -> Response {
	let groups = match g.api.db.load_groups().await {
		Ok(groups) => groups,
		Err(e) => return server_error_response(e, "Unable to load groups"),
	};
	let groups: Vec<GroupOption> = groups
		.into_iter()
		.map(|group| GroupOption {
			selected: form.group == group.id.to_string(),
			id: group.id,
			title: group.title,
		})
		.collect();

	let mut context = viewer_context(Some(user));
	context.insert("form", form);
	context.insert("errors", errors);
	context.insert("groups", &groups);
	if let Some(t) = target {
		context.insert("post_id", &t.post.id);
		context.insert(
			"image_url",
			&t.post.image.as_ref().map(|path| format!("/media/{}", path)),
		);
	}
	g.render("new_post.html.tera", context)
}

#[derive(serde::Serialize)]
struct GroupOption {
	id: i64,
	title: String,
	selected: bool,
}

/// Comments are only posted, but following a comment link just leads back to
/// the post.
async fn comment_get(Extension(target): Extension<PostTarget>) -> Response {
	redirect_response(&post_url(&target))
}

async fn comment_post(
	State(g): State<Arc<Global>>, Extension(user): Extension<user::Model>,
	Extension(target): Extension<PostTarget>, form: Option<Form<CommentForm>>,
) -> Response {
	// A body that isn't a form counts as an empty comment
	let form = form.map(|Form(f)| f).unwrap_or_default();
	match form.validate() {
		Ok(text) =>
			if let Err(e) = g.api.add_comment(&user, &target.post, &text).await {
				return server_error_response(e, "Unable to store comment");
			},
		Err(errors) => warn!(
			"Dropped invalid comment of user {} on post {}: {:?}",
			&user.username, target.post.id, errors
		),
	}
	redirect_response(&post_url(&target))
}

async fn read_post_form(mut multipart: Multipart) -> Result<PostForm, MultipartError> {
	let mut form = PostForm::default();
	while let Some(field) = multipart.next_field().await? {
		let name = field.name().unwrap_or_default().to_string();

		match name.as_str() {
			"text" => form.text = field.text().await?,
			"group" => form.group = field.text().await?,
			"image" => {
				let has_file_name = field.file_name().map(|n| n.len() > 0).unwrap_or(false);
				let mime_type = field.content_type().map(|s| s.to_string());
				let data = field.bytes().await?;
				// Browsers send an empty, nameless file when nothing was chosen
				if has_file_name || data.len() > 0 {
					form.image = Some(UploadedFile {
						mime_type,
						data: data.to_vec(),
					});
				}
			}
			"image-clear" => form.clear_image = true,
			other => warn!("Unrecognized post form field: {}", other),
		}
	}
	Ok(form)
}

/// Saves the image in the media directory and returns its path relative to
/// that directory.
async fn store_image(media_dir: &str, file: &UploadedFile) -> io::Result<String> {
	let extension = file.image_extension().unwrap_or("img");
	let name = format!("posts/{}.{}", Token::random(&mut OsRng), extension);
	let path = FsPath::new(media_dir).join(&name);
	if let Some(parent) = path.parent() {
		tokio::fs::create_dir_all(parent).await?;
	}
	tokio::fs::write(&path, &file.data).await?;
	debug!("Stored image {}", path.display());
	Ok(name)
}
