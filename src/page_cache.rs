//! A small cache for fully rendered pages.
//!
//! Entries live for a fixed amount of time and are never invalidated by
//! writes, so a page may be stale for at most the configured TTL. The whole
//! cache can be cleared explicitly with [`PageCache::invalidate`].

use std::{collections::VecDeque, time::Duration};

use axum::body::Bytes;
use log::*;
use tokio::{sync::Mutex, time::Instant};

use crate::config::Config;


pub struct PageCache {
	ttl: Duration,
	store: Mutex<LimitedMap<String, CachedPage>>,
}

#[derive(Clone)]
struct CachedPage {
	stored_at: Instant,
	body: Bytes,
}

/// A map that keeps at most `limit` entries, newest first. When full, the
/// oldest entry is dropped.
struct LimitedMap<K, V> {
	store: VecDeque<(K, V)>,
	limit: usize,
}


impl PageCache {
	pub fn new(ttl: Duration, limit: usize) -> Self {
		Self {
			ttl,
			store: Mutex::new(LimitedMap::new(limit.max(1))),
		}
	}

	pub fn from_config(config: &Config) -> Self {
		Self::new(
			Duration::from_secs(config.page_cache_ttl),
			config.page_cache_limit,
		)
	}

	/// Returns the cached page for the given key, if it hasn't expired yet.
	pub async fn get(&self, key: &str) -> Option<Bytes> {
		let mut store = self.store.lock().await;
		let page = store.find(key)?.clone();
		if page.stored_at.elapsed() < self.ttl {
			Some(page.body)
		} else {
			store.remove(key);
			None
		}
	}

	pub async fn insert(&self, key: String, body: Bytes) {
		let page = CachedPage {
			stored_at: Instant::now(),
			body,
		};
		self.store.lock().await.insert(key, page);
	}

	/// Drops every cached page, so that the next request renders a fresh one.
	pub async fn invalidate(&self) {
		let mut store = self.store.lock().await;
		debug!("Invalidating {} cached pages.", store.len());
		store.clear();
	}

	pub async fn len(&self) -> usize { self.store.lock().await.len() }
}

impl<K, V> LimitedMap<K, V> {
	fn new(limit: usize) -> Self {
		Self {
			store: VecDeque::new(),
			limit,
		}
	}

	fn clear(&mut self) { self.store.clear(); }

	fn len(&self) -> usize { self.store.len() }
}

impl<V> LimitedMap<String, V> {
	fn index_of(&self, key: &str) -> Option<usize> {
		self.store.iter().position(|(k, _)| k == key)
	}

	fn find(&self, key: &str) -> Option<&V> { self.index_of(key).map(|i| &self.store[i].1) }

	/// Adds or replaces the value, moving it to the front.
	fn insert(&mut self, key: String, value: V) {
		if let Some(i) = self.index_of(&key) {
			self.store.remove(i);
		}
		while self.store.len() >= self.limit {
			self.store.pop_back();
		}
		self.store.push_front((key, value));
	}

	fn remove(&mut self, key: &str) -> Option<V> {
		let i = self.index_of(key)?;
		self.store.remove(i).map(|(_, v)| v)
	}
}
