use std::{
	env, io,
	path::PathBuf,
	process,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
};

use inkpost::{
	api::Api,
	config::{self, Config},
	db::{self, Database},
	migration::Migrations,
	page_cache::PageCache,
	web::{self, Global},
};
use log::*;
use signal_hook::flag;


/// The config file given on the command line, or else the local one if it
/// exists, or else the system-wide one.
fn config_path() -> PathBuf {
	if let Some(arg) = env::args_os().nth(1) {
		return PathBuf::from(arg);
	}
	let local_path = PathBuf::from(config::CONFIG_FILE_LOCAL_PATH);
	if local_path.exists() {
		return local_path;
	}
	PathBuf::from(config::CONFIG_FILE_PATH)
}

fn initialize_logging() {
	if let Some(filename) = env::var_os("SYSTEM_LOG_FILE").map(PathBuf::from) {
		if let Err(e) = simple_logging::log_to_file(&filename, LevelFilter::Debug) {
			eprintln!("Unable to log to {}: {}", filename.display(), e);
			process::exit(1);
		}
	} else {
		env_logger::init()
	}
}

async fn load_database(config: &Config) -> io::Result<Database> {
	// If the folder doesn't exist yet, create it
	let db_path = PathBuf::from(&config.database_path);
	if let Some(parent) = db_path.parent() {
		if !parent.as_os_str().is_empty() {
			tokio::fs::create_dir_all(parent).await?;
		}
	}

	let db = Database::load(db_path)
		.await
		.map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
	Ok(db)
}

async fn load_configured_groups(api: &Api, config: &Config) -> db::Result<()> {
	for group in &config.groups {
		api.ensure_group(&group.slug, &group.title, &group.description)
			.await?;
	}
	Ok(())
}

#[tokio::main]
async fn main() {
	initialize_logging();

	// Load config
	let config_path = config_path();
	let config = match config::load_config(&config_path) {
		Some(c) => c,
		None => process::exit(1),
	};
	info!("Loaded config file {}", config_path.display());

	// Catch signals
	let stop_flag = Arc::new(AtomicBool::new(false));
	for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
		if let Err(e) = flag::register(signal, stop_flag.clone()) {
			error!("Unable to register signal handler: {}", e);
			process::exit(1);
		}
	}
	let stop_flag2 = stop_flag.clone();
	if let Err(e) = ctrlc::set_handler(move || {
		stop_flag2.store(true, Ordering::Relaxed);
	}) {
		warn!("Unable to set Ctrl-C handler: {}", e);
	}

	// Load database
	let db = match load_database(&config).await {
		Ok(db) => db,
		Err(e) => {
			error!("Unable to load database: {}", e);
			process::exit(1);
		}
	};

	// Run migrations (does nothing if there is nothing to migrate)
	match Migrations::load().run(&db).await {
		Ok(version) => info!("Database schema is at {}", version),
		Err(e) => {
			error!("Unable to migrate database: {:?}", e);
			process::exit(1);
		}
	}

	let api = Api::new(db, Arc::new(PageCache::from_config(&config)));
	if let Err(e) = load_configured_groups(&api, &config).await {
		error!("Unable to load the configured groups: {:?}", e);
		process::exit(1);
	}

	let global = match Global::new(config, api) {
		Ok(g) => Arc::new(g),
		Err(e) => {
			error!("Unable to load templates: {:?}", e);
			process::exit(1);
		}
	};
	if let Err(e) = web::serve(stop_flag, global).await {
		error!("Web server stopped with an error: {}", e);
		process::exit(1);
	}
	info!("Exiting...");
}
