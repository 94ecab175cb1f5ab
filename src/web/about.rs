use std::sync::Arc;

use axum::{extract::*, response::Response, routing::*};

use super::{viewer_context, CurrentUser, Global};


pub fn router() -> Router<Arc<Global>> {
	Router::new()
		.route("/author/", get(author))
		.route("/tech/", get(tech))
}

async fn author(
	State(g): State<Arc<Global>>, Extension(current): Extension<CurrentUser>,
) -> Response {
	g.render("about/author.html.tera", viewer_context(current.0.as_ref()))
}

async fn tech(
	State(g): State<Arc<Global>>, Extension(current): Extension<CurrentUser>,
) -> Response {
	g.render("about/tech.html.tera", viewer_context(current.0.as_ref()))
}
