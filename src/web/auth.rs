use std::sync::Arc;

use axum::{extract::*, response::Response, routing::*};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use log::*;
use serde::Deserialize;

use super::{common::*, viewer_context, CurrentUser, Global, SESSION_COOKIE};
use crate::{common::Token, db::PersistenceHandle, forms::*};


#[derive(Deserialize)]
struct LoginQuery {
	#[serde(default)]
	next: String,
}


pub fn router() -> Router<Arc<Global>> {
	Router::new()
		.route("/login/", get(login).post(login_post))
		.route("/logout/", get(logout).post(logout))
		.route("/signup/", get(signup).post(signup_post))
}

fn render_login(
	g: &Global, current: &CurrentUser, form: &LoginForm, errors: &ValidationErrors,
) -> Response {
	let mut context = viewer_context(current.0.as_ref());
	context.insert("form", form);
	context.insert("errors", errors);
	g.render("auth/login.html.tera", context)
}

async fn login(
	State(g): State<Arc<Global>>, Extension(current): Extension<CurrentUser>,
	Query(query): Query<LoginQuery>,
) -> Response {
	let form = LoginForm {
		next: query.next,
		..Default::default()
	};
	render_login(&g, &current, &form, &ValidationErrors::default())
}

async fn login_post(
	State(g): State<Arc<Global>>, Extension(current): Extension<CurrentUser>, jar: CookieJar,
	Form(form): Form<LoginForm>,
) -> Result<(CookieJar, Response), Response> {
	if let Err(errors) = form.validate() {
		return Err(render_login(&g, &current, &form, &errors));
	}

	let user = match g.api.authenticate(form.username.trim(), &form.password).await {
		Ok(Some(u)) => u,
		Ok(None) => {
			info!("Failed login attempt for user {}.", form.username.trim());
			let errors = ValidationErrors::from(
				"non_field",
				"Please enter a correct username and password. Note that both fields may be \
				 case-sensitive.",
			);
			return Err(render_login(&g, &current, &form, &errors));
		}
		Err(e) => return Err(server_error_response(e, "Unable to authenticate")),
	};
	let token = match g.api.login(&user).await {
		Ok(t) => t,
		Err(e) => return Err(server_error_response(e, "Unable to start session")),
	};

	let cookie = Cookie::build((SESSION_COOKIE, token.to_string()))
		.path("/")
		.http_only(true)
		.same_site(SameSite::Lax);
	Ok((jar.add(cookie), redirect_response(form.redirect_target())))
}

async fn logout(State(g): State<Arc<Global>>, jar: CookieJar) -> (CookieJar, Response) {
	let token = jar
		.get(SESSION_COOKIE)
		.and_then(|cookie| Token::from_base58(cookie.value()).ok());
	if let Some(t) = token {
		if let Err(e) = g.api.logout(&t).await {
			return (jar, server_error_response(e, "Unable to end session"));
		}
	}

	let jar = jar.remove(Cookie::build(SESSION_COOKIE).path("/"));
	// The session is gone, so nobody is logged in on this page anymore
	let response = g.render("auth/logged_out.html.tera", viewer_context(None));
	(jar, response)
}

fn render_signup(
	g: &Global, current: &CurrentUser, form: &SignupForm, errors: &ValidationErrors,
) -> Response {
	let mut context = viewer_context(current.0.as_ref());
	context.insert("form", form);
	context.insert("errors", errors);
	g.render("auth/signup.html.tera", context)
}

async fn signup(
	State(g): State<Arc<Global>>, Extension(current): Extension<CurrentUser>,
) -> Response {
	render_signup(
		&g,
		&current,
		&SignupForm::default(),
		&ValidationErrors::default(),
	)
}

async fn signup_post(
	State(g): State<Arc<Global>>, Extension(current): Extension<CurrentUser>,
	Form(form): Form<SignupForm>,
) -> Response {
	if let Err(errors) = form.validate() {
		return render_signup(&g, &current, &form, &errors);
	}
	match g.api.db.find_user_by_username(&form.username).await {
		Ok(None) => {}
		Ok(Some(_)) => {
			let errors =
				ValidationErrors::from("username", "A user with that username already exists.");
			return render_signup(&g, &current, &form, &errors);
		}
		Err(e) => return server_error_response(e, "Unable to check username"),
	}

	match g.api.register_user(&form.username, &form.password1).await {
		Ok(_) => redirect_response("/auth/login/"),
		Err(e) => server_error_response(e, "Unable to register user"),
	}
}
