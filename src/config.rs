use std::{
	fmt,
	fs::File,
	io::{self, prelude::*},
	path::Path,
};

use log::*;
use serde::*;


/// The file path of the system-wide configuration file
pub const CONFIG_FILE_PATH: &str = "/etc/inkpost/config.toml";
/// A configuration file in the working directory takes precedence over the
/// system-wide one.
pub const CONFIG_FILE_LOCAL_PATH: &str = "inkpost.toml";

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
	pub database_path: String,
	pub bind_address: String,
	pub web_interface_port: u16,
	/// Used to build absolute links, like the ones in the RSS feed.
	pub url_base: Option<String>,

	pub template_dir: String,
	pub static_dir: String,
	pub media_dir: String,

	/// Amount of seconds a rendered index page stays in the page cache.
	pub page_cache_ttl: u64,
	/// The maximum number of rendered pages kept in the page cache.
	pub page_cache_limit: usize,

	/// Groups that are created at startup if they don't exist yet.
	pub groups: Vec<GroupConfig>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct GroupConfig {
	pub slug: String,
	pub title: String,
	#[serde(default)]
	pub description: String,
}


impl Default for Config {
	fn default() -> Self {
		Self {
			database_path: "/var/lib/inkpost/db.sqlite".to_string(),
			bind_address: "127.0.0.1".to_string(),
			web_interface_port: 8000,
			url_base: None,
			template_dir: "templates".to_string(),
			static_dir: "static".to_string(),
			media_dir: "media".to_string(),
			page_cache_ttl: 20,
			page_cache_limit: 256,
			groups: Vec::new(),
		}
	}
}

impl Config {
	pub fn url_base(&self) -> String {
		self.url_base
			.clone()
			.unwrap_or_else(|| format!("http://localhost:{}", self.web_interface_port))
	}
}


pub fn load_config<P>(path: P) -> Option<Config>
where
	P: AsRef<Path> + fmt::Debug,
{
	let mut file = match File::open(&path) {
		Err(e) => match e.kind() {
			io::ErrorKind::NotFound => {
				error!("Config file {:?} not found!", path);
				return None;
			}
			_ => {
				error!("Unable to open config file {:?}: {}", path, e);
				return None;
			}
		},
		Ok(f) => f,
	};

	let mut content = String::new();
	if let Err(e) = file.read_to_string(&mut content) {
		error!("Unable to read config file {:?}: {}", path, e);
		return None;
	}

	match toml::from_str(&content) {
		Err(e) => {
			error!("Unable to parse config file {:?}: {}", path, e);
			None
		}
		Ok(c) => Some(c),
	}
}


#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_partial_config() {
		let config: Config = toml::from_str(
			r#"
			database_path = "/tmp/inkpost.sqlite"
			page_cache_ttl = 5

			[[groups]]
			slug = "cats"
			title = "Cats"
			"#,
		)
		.unwrap();
		assert_eq!(config.database_path, "/tmp/inkpost.sqlite");
		assert_eq!(config.page_cache_ttl, 5);
		assert_eq!(config.page_cache_limit, 256);
		assert_eq!(config.web_interface_port, 8000);
		assert_eq!(
			config.groups,
			vec![GroupConfig {
				slug: "cats".to_string(),
				title: "Cats".to_string(),
				description: String::new(),
			}]
		);
		assert_eq!(config.url_base(), "http://localhost:8000");
	}
}
