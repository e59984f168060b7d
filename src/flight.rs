//! Per-key single-flight coordination.
//!
//! [`SingleFlight::run`] collapses concurrent calls for the same key into one execution of the
//! supplied closure. Every caller that joins while the call is outstanding receives a clone of
//! the same result. Keys never block each other; the only shared lock guards the call table and
//! is never held across an `.await`.
//!
//! The call itself runs on a detached Tokio task. Dropping any caller, including the one that
//! started the call, only stops that caller from waiting; the call still completes once and its
//! result still reaches every other waiter.

// self
use crate::_prelude::*;

type Call<T> = Arc<OnceCell<Option<T>>>;
type Calls<K, T> = Arc<Mutex<HashMap<K, Call<T>>>>;

/// Deduplicates concurrent work per key.
pub struct SingleFlight<K, T> {
	calls: Calls<K, T>,
}
impl<K, T> SingleFlight<K, T>
where
	K: 'static + Send + Clone + Eq + Hash,
	T: 'static + Send + Sync + Clone,
{
	/// Runs `f` for `key` unless a call for `key` is already in flight, in which case the
	/// caller waits for and shares that call's result.
	///
	/// # Panics
	///
	/// Panics when called outside a Tokio runtime, and in every caller sharing a call whose
	/// future panicked.
	pub async fn run<F, Fut>(&self, key: K, f: F) -> T
	where
		F: FnOnce() -> Fut,
		Fut: 'static + Send + Future<Output = T>,
	{
		let (call, leader) = self.join(&key);

		if leader {
			let publisher =
				Publisher { calls: self.calls.clone(), key, call: call.clone(), published: false };
			let fut = f();

			tokio::spawn(async move {
				let value = fut.await;

				publisher.publish(value).await;
			});
		}

		match call.wait().await {
			Some(value) => value.clone(),
			None => panic!("single-flight call panicked before publishing a result"),
		}
	}

	/// Returns `true` while a call for `key` is outstanding.
	pub fn in_flight(&self, key: &K) -> bool {
		self.calls.lock().get(key).is_some_and(|call| !call.is_initialized())
	}

	/// Number of keys with an outstanding call.
	pub fn len(&self) -> usize {
		self.calls.lock().len()
	}

	/// Returns `true` when no call is outstanding.
	pub fn is_empty(&self) -> bool {
		self.calls.lock().is_empty()
	}

	fn join(&self, key: &K) -> (Call<T>, bool) {
		let mut calls = self.calls.lock();

		if let Some(call) = calls.get(key) {
			return (call.clone(), false);
		}

		let call = Arc::new(OnceCell::new());

		calls.insert(key.clone(), call.clone());

		(call, true)
	}
}
impl<K, T> Default for SingleFlight<K, T> {
	fn default() -> Self {
		Self { calls: Arc::new(Mutex::new(HashMap::new())) }
	}
}
impl<K, T> Debug for SingleFlight<K, T> {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("SingleFlight").field("in_flight", &self.calls.lock().len()).finish()
	}
}

/// Owns the publication of one call's result.
///
/// Dropping it unpublished (the call's future panicked or the runtime shut down) retires the
/// call and wakes every waiter with `None`.
struct Publisher<K, T>
where
	K: Eq + Hash,
{
	calls: Calls<K, T>,
	key: K,
	call: Call<T>,
	published: bool,
}
impl<K, T> Publisher<K, T>
where
	K: Eq + Hash,
{
	async fn publish(mut self, value: T) {
		// Retire the call before publishing so later callers start a fresh one.
		self.retire();
		self.published = true;

		let _ = self.call.set(Some(value)).await;
	}

	fn retire(&self) {
		let mut calls = self.calls.lock();

		if calls.get(&self.key).is_some_and(|current| Arc::ptr_eq(current, &self.call)) {
			calls.remove(&self.key);
		}
	}
}
impl<K, T> Drop for Publisher<K, T>
where
	K: Eq + Hash,
{
	fn drop(&mut self) {
		if !self.published {
			self.retire();

			let _ = self.call.set_blocking(None);
		}
	}
}
