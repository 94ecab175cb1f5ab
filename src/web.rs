mod about;
mod auth;
pub mod common;
mod posts;
mod profile;

use std::{
	io,
	sync::{atomic::*, Arc},
	time::Duration,
};

use ::serde::*;
use axum::{
	body::Body,
	extract::*,
	http::Uri,
	middleware::{from_fn_with_state, Next},
	response::Response,
	routing::get,
	Router,
};
use axum_extra::extract::CookieJar;
use chrono::{TimeZone, Utc};
use log::*;
#[cfg(debug_assertions)]
use rss::validation::Validate;
use rss::{ChannelBuilder, ItemBuilder};
use tera::{Context, Tera};
use tokio::time::sleep;
use tower_http::services::ServeDir;

use self::common::*;
use crate::{
	api::Api,
	common::Token,
	config::Config,
	db::PersistenceHandle,
	entity::user,
	feed,
};


/// The name of the cookie that holds the session token.
pub const SESSION_COOKIE: &str = "sessionid";
/// The number of posts in the RSS feed.
const RSS_FEED_SIZE: u64 = 20;


pub struct Global {
	pub config: Config,
	pub server_info: ServerInfo,
	pub api: Api,
	pub template_engine: Tera,
}

#[derive(Clone, Serialize)]
pub struct ServerInfo {
	pub url_base: String,
	pub version: &'static str,
}

/// The logged in user making the request, if any. Every request carries this
/// extension.
#[derive(Clone)]
pub struct CurrentUser(pub Option<user::Model>);


impl Global {
	pub fn new(config: Config, api: Api) -> tera::Result<Self> {
		let mut template_engine = Tera::new(&format!("{}/**/*.tera", config.template_dir))?;
		// Everything that ends up in HTML is user supplied text
		template_engine.autoescape_on(vec![".html.tera", ".html"]);
		Ok(Self {
			server_info: ServerInfo {
				url_base: config.url_base(),
				version: env!("CARGO_PKG_VERSION"),
			},
			config,
			api,
			template_engine,
		})
	}

	pub fn render_html(&self, template_name: &str, context: Context) -> tera::Result<String> {
		let mut complete_context = Context::new();
		complete_context.insert("server", &self.server_info);
		complete_context.extend(context);
		self.template_engine
			.render(template_name, &complete_context)
	}

	pub fn render(&self, template_name: &str, context: Context) -> Response {
		self.render_with_status(200, template_name, context)
	}

	pub fn render_with_status(
		&self, status_code: u16, template_name: &str, context: Context,
	) -> Response {
		match self.render_html(template_name, context) {
			Err(e) => server_error_response(
				e,
				&format!("Unable to render template \"{}\"", template_name),
			),
			Ok(html) => Response::builder()
				.status(status_code)
				.header("Content-Type", "text/html")
				.body(Body::from(html))
				.unwrap(),
		}
	}

	pub fn not_found(&self, path: &str, viewer: Option<&user::Model>) -> Response {
		debug!("Page not found: {}", path);
		let mut context = viewer_context(viewer);
		context.insert("path", path);
		self.render_with_status(404, "misc/404.html.tera", context)
	}
}

/// A template context that already contains the logged in user.
pub fn viewer_context(viewer: Option<&user::Model>) -> Context {
	let mut context = Context::new();
	context.insert("user", &viewer.map(into_user_display_info));
	context
}

pub fn router(global: Arc<Global>) -> Router {
	Router::new()
		.route("/", get(posts::index))
		.route("/rss", get(rss_feed))
		.nest("/auth", auth::router())
		.nest("/about", about::router())
		.merge(posts::router(global.clone()))
		.merge(profile::router())
		.nest_service("/static", ServeDir::new(&global.config.static_dir))
		.nest_service("/media", ServeDir::new(&global.config.media_dir))
		.fallback(page_not_found)
		.layer(from_fn_with_state(global.clone(), session_middleware))
		.with_state(global)
}

pub async fn serve(stop_flag: Arc<AtomicBool>, global: Arc<Global>) -> io::Result<()> {
	let addr = format!(
		"{}:{}",
		&global.config.bind_address, global.config.web_interface_port
	);
	let listener = tokio::net::TcpListener::bind(&addr).await?;
	info!("Serving on http://{}", &addr);

	axum::serve(listener, router(global))
		.with_graceful_shutdown(async move {
			while !stop_flag.load(Ordering::Relaxed) {
				sleep(Duration::from_secs(1)).await;
			}
		})
		.await
}

/// Loads the user that the session cookie belongs to.
async fn session_middleware(
	State(g): State<Arc<Global>>, jar: CookieJar, mut request: Request, next: Next,
) -> Response {
	let token = jar
		.get(SESSION_COOKIE)
		.and_then(|cookie| Token::from_base58(cookie.value()).ok());

	let user = match token {
		None => None,
		Some(t) => match g.api.db.find_user_by_session(&t).await {
			Ok(u) => u,
			Err(e) => return server_error_response(e, "Unable to load session"),
		},
	};
	if user.is_none() && jar.get(SESSION_COOKIE).is_some() {
		debug!("Ignoring unknown session cookie.");
	}

	request.extensions_mut().insert(CurrentUser(user));
	next.run(request).await
}

/// Sends anonymous visitors to the login page, and makes the logged in user
/// available as a `user::Model` extension.
async fn login_required(mut request: Request, next: Next) -> Response {
	let user = request
		.extensions()
		.get::<CurrentUser>()
		.and_then(|current| current.0.clone());
	match user {
		Some(u) => {
			request.extensions_mut().insert(u);
			next.run(request).await
		}
		None => redirect_response(&login_url(request.uri())),
	}
}

async fn page_not_found(
	State(g): State<Arc<Global>>, Extension(current): Extension<CurrentUser>, uri: Uri,
) -> Response {
	g.not_found(uri.path(), current.0.as_ref())
}

async fn rss_feed(State(g): State<Arc<Global>>) -> Response {
	let items = match feed::load_latest(&g.api.db, RSS_FEED_SIZE).await {
		Ok(f) => f,
		Err(e) => return server_error_response(e, "Unable to load latest posts"),
	};

	let mut channel_builder = ChannelBuilder::default();
	channel_builder
		.title("inkpost")
		.link(&g.server_info.url_base)
		.description("The newest posts on this blog.");

	let mut rss_items = Vec::with_capacity(items.len());
	for item in items {
		let pub_date = Utc
			.timestamp_millis_opt(item.post.pub_date)
			.single()
			.map(|moment| moment.to_rfc2822());
		let rss_item = ItemBuilder::default()
			.title(format!(
				"{}: {}",
				&item.author.username,
				item.post.text.chars().take(15).collect::<String>()
			))
			.link(format!(
				"{}/{}/{}/",
				&g.server_info.url_base, &item.author.username, item.post.id
			))
			.description(item.post.text)
			.pub_date(pub_date)
			.build();
		rss_items.push(rss_item);
	}
	channel_builder.items(rss_items);
	let channel = channel_builder.build();

	#[cfg(debug_assertions)]
	if let Err(e) = channel.validate() {
		warn!("RSS feed validation error: {}", e);
	}

	Response::builder()
		.header("Content-Type", "application/rss+xml")
		.body(Body::from(channel.to_string()))
		.unwrap()
}
