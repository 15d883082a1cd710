//! Filter session
//!
//! [`AiFilter`] ties a [`TableAdapter`] to the translation pipeline: it keeps
//! the query, error and explanation a UI shows, applies successful results,
//! and falls back to a global text filter when translation fails.
//!
//! Every call to [`AiFilter::process_query`] takes a sequence number. Only the
//! most recently issued call may touch the table; results that resolve after
//! a newer call started are returned flagged `stale` and otherwise dropped.

use crate::adapter::TableAdapter;
use crate::provider::ProviderRegistry;
use crate::types::{FilterCondition, ParseResult};
use crate::{ParseOptions, parse_with_registry};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, info};

/// Error shown when a failed result carries no message
pub const DEFAULT_ERROR_MESSAGE: &str = "Failed to understand the query";

/// Explanation shown while the global text filter stands in
pub const FALLBACK_EXPLANATION: &str = "Using simple text search across all columns.";

pub type SuccessCallback = Arc<dyn Fn(&ParseResult) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Snapshot of what the UI displays
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterState {
    pub query: String,
    pub is_processing: bool,
    pub error: Option<String>,
    pub explanation: Option<String>,
}

/// What one `process_query` call did
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOutcome {
    /// Translation result; `None` when a blank query cleared the table
    pub result: Option<ParseResult>,
    /// Column filters were replaced by the result's filters
    pub applied: bool,
    /// A blank query removed every filter
    pub cleared: bool,
    /// The raw query went to the adapter's global filter
    pub fallback_applied: bool,
    /// A newer call superseded this one; nothing was changed
    pub stale: bool,
}

impl QueryOutcome {
    fn translated(result: ParseResult) -> Self {
        Self {
            result: Some(result),
            applied: false,
            cleared: false,
            fallback_applied: false,
            stale: false,
        }
    }
}

#[derive(Debug, Default)]
struct SessionState {
    query: String,
    error: Option<String>,
    explanation: Option<String>,
    active: Vec<FilterCondition>,
    fallback_active: bool,
}

/// Counts a query as in flight for as long as it lives
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct Shared<A> {
    adapter: Mutex<A>,
    state: Mutex<SessionState>,
    seq: AtomicU64,
    in_flight: AtomicUsize,
}

/// Natural-language filtering for one table
pub struct AiFilter<A> {
    shared: Arc<Shared<A>>,
    options: ParseOptions,
    registry: Option<Arc<ProviderRegistry>>,
    enable_global_filter_fallback: bool,
    on_success: Option<SuccessCallback>,
    on_error: Option<ErrorCallback>,
}

impl<A> Clone for AiFilter<A> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            options: self.options.clone(),
            registry: self.registry.clone(),
            enable_global_filter_fallback: self.enable_global_filter_fallback,
            on_success: self.on_success.clone(),
            on_error: self.on_error.clone(),
        }
    }
}

impl<A: TableAdapter + Send + 'static> AiFilter<A> {
    pub fn new(adapter: A) -> Self {
        Self {
            shared: Arc::new(Shared {
                adapter: Mutex::new(adapter),
                state: Mutex::new(SessionState::default()),
                seq: AtomicU64::new(0),
                in_flight: AtomicUsize::new(0),
            }),
            options: ParseOptions::default(),
            registry: None,
            enable_global_filter_fallback: true,
            on_success: None,
            on_error: None,
        }
    }

    /// Provider selection and parser hooks used for every query
    pub fn with_options(mut self, options: ParseOptions) -> Self {
        self.options = options;
        self
    }

    /// Resolve providers from this registry instead of the global one
    pub fn with_registry(mut self, registry: Arc<ProviderRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Enable or disable the global text filter fallback (on by default)
    pub fn global_filter_fallback(mut self, enabled: bool) -> Self {
        self.enable_global_filter_fallback = enabled;
        self
    }

    pub fn on_success<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ParseResult) + Send + Sync + 'static,
    {
        self.on_success = Some(Arc::new(callback));
        self
    }

    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(callback));
        self
    }

    /// Current UI state
    pub fn state(&self) -> FilterState {
        let state = self.shared.state.lock();
        FilterState {
            query: state.query.clone(),
            is_processing: self.is_processing(),
            error: state.error.clone(),
            explanation: state.explanation.clone(),
        }
    }

    pub fn query(&self) -> String {
        self.shared.state.lock().query.clone()
    }

    pub fn set_query(&self, query: impl Into<String>) {
        self.shared.state.lock().query = query.into();
    }

    pub fn is_processing(&self) -> bool {
        self.shared.in_flight.load(Ordering::SeqCst) > 0
    }

    pub fn error(&self) -> Option<String> {
        self.shared.state.lock().error.clone()
    }

    pub fn explanation(&self) -> Option<String> {
        self.shared.state.lock().explanation.clone()
    }

    /// Conditions most recently applied to the table
    pub fn active_filters(&self) -> Vec<FilterCondition> {
        self.shared.state.lock().active.clone()
    }

    pub fn clear_error(&self) {
        self.shared.state.lock().error = None;
    }

    /// Drop all table filters and the explanation
    ///
    /// Also supersedes any query still in flight.
    pub fn clear_filters(&self) {
        self.shared.seq.fetch_add(1, Ordering::SeqCst);
        self.shared.adapter.lock().clear_filters();

        let mut state = self.shared.state.lock();
        state.explanation = None;
        state.active.clear();
        state.fallback_active = false;
    }

    /// Run `f` against the adapter
    pub fn with_adapter<R>(&self, f: impl FnOnce(&mut A) -> R) -> R {
        f(&mut self.shared.adapter.lock())
    }

    /// Translate a query and apply the result
    ///
    /// Uses `explicit` when given, else the stored query. A blank query
    /// clears every filter. On failure the error is recorded and, when
    /// enabled and supported, the raw query becomes a global text filter.
    pub async fn process_query(&self, explicit: Option<&str>) -> QueryOutcome {
        let query = match explicit {
            Some(query) => query.to_string(),
            None => self.query(),
        };

        if query.trim().is_empty() {
            self.clear_filters();
            return QueryOutcome {
                result: None,
                applied: false,
                cleared: true,
                fallback_applied: false,
                stale: false,
            };
        }

        let seq = self.shared.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let in_flight = InFlight::enter(&self.shared.in_flight);

        let current = {
            let mut state = self.shared.state.lock();
            state.error = None;
            state.explanation = None;
            state.active.clone()
        };
        let columns = self.shared.adapter.lock().column_metadata();

        let registry = match self.registry.as_deref() {
            Some(registry) => registry,
            None => ProviderRegistry::global(),
        };
        let result =
            parse_with_registry(registry, &query, &columns, &current, Some(self.options.clone()))
                .await;

        drop(in_flight);

        if self.shared.seq.load(Ordering::SeqCst) != seq {
            debug!(seq, success = result.success, "discarding stale filter result");
            return QueryOutcome {
                stale: true,
                ..QueryOutcome::translated(result)
            };
        }

        if result.success {
            self.apply_success(&result);
            QueryOutcome {
                applied: true,
                ..QueryOutcome::translated(result)
            }
        } else {
            let fallback_applied = self.apply_failure(&query, &result);
            QueryOutcome {
                fallback_applied,
                ..QueryOutcome::translated(result)
            }
        }
    }

    fn apply_success(&self, result: &ParseResult) {
        let fallback_was_active = self.shared.state.lock().fallback_active;
        {
            let mut adapter = self.shared.adapter.lock();
            if fallback_was_active {
                adapter.apply_global_filter("");
            }
            let native = adapter.convert_to_library_filters(&result.filters);
            adapter.apply_filters(native);
        }

        {
            let mut state = self.shared.state.lock();
            state.active = result.filters.clone();
            state.fallback_active = false;
            if result.explanation.is_some() {
                state.explanation = result.explanation.clone();
            }
        }

        info!(filters = result.filters.len(), "applied filters");
        if let Some(callback) = &self.on_success {
            callback(result);
        }
    }

    fn apply_failure(&self, query: &str, result: &ParseResult) -> bool {
        let message = result
            .error
            .clone()
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| DEFAULT_ERROR_MESSAGE.to_string());

        let fallback_applied = self.enable_global_filter_fallback && {
            let mut adapter = self.shared.adapter.lock();
            let supported = adapter.supports_global_filter();
            if supported {
                adapter.apply_global_filter(query);
            }
            supported
        };

        {
            let mut state = self.shared.state.lock();
            if fallback_applied {
                state.explanation = Some(FALLBACK_EXPLANATION.to_string());
                state.fallback_active = true;
            }
            state.error = Some(message.clone());
        }

        if fallback_applied {
            info!(error = %message, "translation failed, using global text filter");
        } else {
            debug!(error = %message, "translation failed");
        }
        if let Some(callback) = &self.on_error {
            callback(&message);
        }
        fallback_applied
    }
}
