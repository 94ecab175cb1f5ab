//! Validation of the data submitted through the HTML forms.
//!
//! Every form validates into either a cleaned value or a set of field errors
//! that can be shown next to the fields when the form is rendered again.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::entity::group;


/// The maximum length of a username, in characters.
pub const USERNAME_MAX_LENGTH: usize = 150;
/// The minimum length of a password, in characters.
pub const PASSWORD_MIN_LENGTH: usize = 8;

const REQUIRED: &str = "This field is required.";


/// Error messages, grouped per form field.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ValidationErrors(HashMap<String, Vec<String>>);

/// A file that was uploaded along with a form.
#[derive(Clone, Debug)]
pub struct UploadedFile {
	pub mime_type: Option<String>,
	pub data: Vec<u8>,
}

/// The fields of the form used to write and edit posts.
#[derive(Clone, Debug, Default, Serialize)]
pub struct PostForm {
	pub text: String,
	/// The id of the selected group, or empty when no group is selected.
	pub group: String,
	#[serde(skip)]
	pub image: Option<UploadedFile>,
	pub clear_image: bool,
}

#[derive(Debug)]
pub struct ValidPost {
	pub text: String,
	pub group_id: Option<i64>,
	pub image: ImageChange,
}

/// What to do with the image of a post.
#[derive(Debug)]
pub enum ImageChange {
	Keep,
	Clear,
	Replace(UploadedFile),
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct CommentForm {
	#[serde(default)]
	pub text: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct LoginForm {
	#[serde(default)]
	pub username: String,
	#[serde(default, skip_serializing)]
	pub password: String,
	#[serde(default)]
	pub next: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct SignupForm {
	#[serde(default)]
	pub username: String,
	#[serde(default, skip_serializing)]
	pub password1: String,
	#[serde(default, skip_serializing)]
	pub password2: String,
}


impl ValidationErrors {
	pub fn add_error<K: Into<String>, V: Into<String>>(&mut self, key: K, val: V) {
		self.0.entry(key.into()).or_default().push(val.into());
	}

	pub fn from<K: Into<String>, V: Into<String>>(key: K, val: V) -> Self {
		let mut errors = Self::default();
		errors.add_error(key, val);
		errors
	}

	pub fn get(&self, key: &str) -> &[String] {
		self.0.get(key).map(|v| v.as_slice()).unwrap_or(&[])
	}

	pub fn is_empty(&self) -> bool { self.0.is_empty() }

	pub fn len(&self) -> usize { self.0.len() }

	fn into_result<T>(self, value: T) -> Result<T, Self> {
		if self.is_empty() {
			Ok(value)
		} else {
			Err(self)
		}
	}
}

impl UploadedFile {
	/// The file extension to store the image with, if it is an image at all.
	pub fn image_extension(&self) -> Option<&'static str> {
		let mime_type = self.mime_type.as_deref()?;
		let subtype = mime_type.strip_prefix("image/")?;
		Some(match subtype {
			"jpeg" | "pjpeg" => "jpg",
			"png" => "png",
			"gif" => "gif",
			"webp" => "webp",
			"bmp" => "bmp",
			"svg+xml" => "svg",
			_ => "img",
		})
	}
}

impl PostForm {
	/// The form prefilled with the current values of an existing post.
	pub fn from_post(text: &str, group_id: Option<i64>) -> Self {
		Self {
			text: text.to_string(),
			group: group_id.map(|id| id.to_string()).unwrap_or_default(),
			image: None,
			clear_image: false,
		}
	}

	/// Checks the form against the groups that can be selected.
	pub fn validate(&self, groups: &[group::Model]) -> Result<ValidPost, ValidationErrors> {
		let mut errors = ValidationErrors::default();

		let text = self.text.trim();
		if text.is_empty() {
			errors.add_error("text", REQUIRED);
		}

		let group = self.group.trim();
		let group_id = if group.is_empty() {
			None
		} else {
			match group.parse::<i64>() {
				Ok(id) if groups.iter().any(|g| g.id == id) => Some(id),
				_ => {
					errors.add_error(
						"group",
						"Select a valid choice. That choice is not one of the available choices.",
					);
					None
				}
			}
		};

		let image = match &self.image {
			Some(file) =>
				if file.data.len() == 0 {
					errors.add_error("image", "The submitted file is empty.");
					ImageChange::Keep
				} else if file.image_extension().is_none() {
					errors.add_error(
						"image",
						"Upload a valid image. The file you uploaded was either not an image or a \
						 corrupted image.",
					);
					ImageChange::Keep
				} else {
					ImageChange::Replace(file.clone())
				},
			None if self.clear_image => ImageChange::Clear,
			None => ImageChange::Keep,
		};

		errors.into_result(ValidPost {
			text: text.to_string(),
			group_id,
			image,
		})
	}
}

impl CommentForm {
	pub fn validate(&self) -> Result<String, ValidationErrors> {
		let text = self.text.trim();
		if text.is_empty() {
			Err(ValidationErrors::from("text", REQUIRED))
		} else {
			Ok(text.to_string())
		}
	}
}

impl LoginForm {
	pub fn validate(&self) -> Result<(), ValidationErrors> {
		let mut errors = ValidationErrors::default();
		if self.username.trim().is_empty() {
			errors.add_error("username", REQUIRED);
		}
		if self.password.is_empty() {
			errors.add_error("password", REQUIRED);
		}
		errors.into_result(())
	}

	/// The path to go to after logging in. Only paths on this site are
	/// allowed.
	pub fn redirect_target(&self) -> &str {
		if is_local_path(&self.next) {
			&self.next
		} else {
			"/"
		}
	}
}

impl SignupForm {
	/// Checks everything except whether the username is still available.
	pub fn validate(&self) -> Result<(), ValidationErrors> {
		let mut errors = ValidationErrors::default();

		if self.username.is_empty() {
			errors.add_error("username", REQUIRED);
		} else {
			if self.username.chars().count() > USERNAME_MAX_LENGTH {
				errors.add_error(
					"username",
					format!(
						"Ensure this value has at most {} characters.",
						USERNAME_MAX_LENGTH
					),
				);
			}
			if !self.username.chars().all(is_username_char) {
				errors.add_error(
					"username",
					"Enter a valid username. This value may contain only letters, numbers, and \
					 @/./+/-/_ characters.",
				);
			}
		}

		if self.password1.is_empty() {
			errors.add_error("password1", REQUIRED);
		} else if self.password1.chars().count() < PASSWORD_MIN_LENGTH {
			errors.add_error(
				"password1",
				format!(
					"This password is too short. It must contain at least {} characters.",
					PASSWORD_MIN_LENGTH
				),
			);
		}
		if self.password2.is_empty() {
			errors.add_error("password2", REQUIRED);
		} else if self.password1 != self.password2 {
			errors.add_error("password2", "The two password fields didn't match.");
		}

		errors.into_result(())
	}
}


fn is_username_char(c: char) -> bool { c.is_alphanumeric() || "@.+-_".contains(c) }

/// Whether the given redirect target stays on this site.
/// Whether the path stays on this site. Browsers treat `//` and `/\` as the
/// start of another host.
pub fn is_local_path(path: &str) -> bool {
	path.starts_with('/') && !path.starts_with("//") && !path.starts_with("/\\")
}
