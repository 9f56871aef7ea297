//! Cacheability decisions and the headers that express them.
//!
//! Rules are evaluated in a fixed order and the first match wins:
//! search page, password-protected page, authenticated session, POST body,
//! excluded cookie, excluded path, disallowed status code. A request that
//! passes all of them gets a header set chosen by the active driver's kind.

use axum::http::header::{CACHE_CONTROL, EXPIRES, LAST_MODIFIED, VARY};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use metrics::counter;
use regex::Regex;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{Duration, OffsetDateTime, UtcOffset};
use tracing::debug;

use super::driver::DriverKind;
use super::policy::PolicyConfig;

const METRIC_DECISION_TOTAL: &str = "cachegate_decision_total";

/// A date in the past, so intermediaries treat the page as already stale.
const NO_CACHE_EXPIRES: &str = "Wed, 11 Jan 1984 05:00:00 GMT";
const NO_CACHE_CONTROL: &str = "no-cache, must-revalidate, max-age=0";
const IMMEDIATE_REVALIDATE: &str = "public, max-age=0, must-revalidate";

pub const HTTP_DATE_FORMAT: &[FormatItem<'static>] = format_description!(
    "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
);

/// What the host knows about the request being answered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestFacts {
    pub is_search: bool,
    pub password_required: bool,
    pub authenticated: bool,
    pub has_post_body: bool,
    pub cookie_names: Vec<String>,
    /// Path plus query string as requested.
    pub request_uri: String,
}

impl RequestFacts {
    /// Cookie names from every `Cookie` header.
    pub fn cookie_names_from(headers: &HeaderMap) -> Vec<String> {
        headers
            .get_all(axum::http::header::COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(';'))
            .filter_map(|pair| {
                let name = pair.split_once('=').map_or(pair, |(name, _)| name).trim();
                (!name.is_empty()).then(|| name.to_string())
            })
            .collect()
    }
}

/// Which rule settled the decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Search,
    PasswordProtected,
    Authenticated,
    PostBody,
    ExcludedCookie,
    ExcludedPath,
    DisallowedStatus,
    Cacheable,
}

impl Verdict {
    pub fn is_cacheable(self) -> bool {
        self == Verdict::Cacheable
    }

    pub fn label(self) -> &'static str {
        match self {
            Verdict::Search => "search",
            Verdict::PasswordProtected => "password",
            Verdict::Authenticated => "authenticated",
            Verdict::PostBody => "post",
            Verdict::ExcludedCookie => "cookie",
            Verdict::ExcludedPath => "path",
            Verdict::DisallowedStatus => "status",
            Verdict::Cacheable => "cacheable",
        }
    }
}

/// Terminal header set of a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheDirective {
    NoCache,
    /// Cached by the proxy; `Vary: Cookie` keeps browsers caching per cookie.
    ProxyCacheable { ttl: u64 },
    OriginRevalidate { ttl: u64 },
    ImmediateRevalidate,
}

impl CacheDirective {
    /// Write this directive's headers, overwriting earlier values.
    pub fn apply(&self, headers: &mut HeaderMap, now: OffsetDateTime) {
        match *self {
            CacheDirective::NoCache => {
                set_header(headers, EXPIRES, NO_CACHE_EXPIRES);
                set_header(headers, CACHE_CONTROL, NO_CACHE_CONTROL);
                headers.remove(LAST_MODIFIED);
            }
            CacheDirective::ProxyCacheable { ttl } => {
                apply_max_age(headers, ttl, now);
                set_header(headers, VARY, "Cookie");
            }
            CacheDirective::OriginRevalidate { ttl } => apply_max_age(headers, ttl, now),
            CacheDirective::ImmediateRevalidate => {
                set_header(headers, CACHE_CONTROL, IMMEDIATE_REVALIDATE);
            }
        }
    }
}

fn apply_max_age(headers: &mut HeaderMap, ttl: u64, now: OffsetDateTime) {
    set_header(
        headers,
        CACHE_CONTROL,
        &format!("public, max-age={ttl}, must-revalidate"),
    );
    if let Some(expires) = http_date_after(now, ttl) {
        set_header(headers, EXPIRES, &expires);
    }
}

/// `now + ttl` in IMF-fixdate form; `None` when it would overflow.
pub fn http_date_after(now: OffsetDateTime, ttl: u64) -> Option<String> {
    let seconds = i64::try_from(ttl).ok()?;
    now.to_offset(UtcOffset::UTC)
        .checked_add(Duration::seconds(seconds))?
        .format(HTTP_DATE_FORMAT)
        .ok()
}

fn set_header(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(name, value);
    }
}

/// Exclusion list matched by exact value or by unanchored regex.
///
/// Entries that do not compile as a regex are matched as literal text.
#[derive(Debug, Clone, Default)]
pub struct PatternList {
    literals: Vec<String>,
    patterns: Vec<Regex>,
}

impl PatternList {
    pub fn new(items: Vec<String>) -> Self {
        let patterns = items
            .iter()
            .filter_map(|item| {
                Regex::new(item)
                    .or_else(|_| Regex::new(&regex::escape(item)))
                    .ok()
            })
            .collect();
        Self {
            literals: items,
            patterns,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.literals.is_empty()
    }

    pub fn matches(&self, candidate: &str) -> bool {
        self.literals.iter().any(|literal| literal == candidate)
            || self.patterns.iter().any(|regex| regex.is_match(candidate))
    }

    pub fn matches_any<'a>(&self, candidates: impl IntoIterator<Item = &'a str>) -> bool {
        !self.is_empty() && candidates.into_iter().any(|candidate| self.matches(candidate))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub verdict: Verdict,
    pub directive: CacheDirective,
}

/// Policy snapshot compiled for one request.
#[derive(Debug, Clone)]
pub struct DecisionEngine {
    cookies: PatternList,
    paths: PatternList,
    allowed_status: Vec<u16>,
    driver_kind: DriverKind,
    ttl: u64,
    always_revalidate: bool,
}

impl DecisionEngine {
    pub fn new(config: &PolicyConfig, driver_kind: DriverKind) -> Self {
        Self {
            cookies: PatternList::new(config.excluded_cookies()),
            paths: PatternList::new(config.excluded_paths()),
            allowed_status: config.allowed_status_codes(),
            driver_kind,
            ttl: config.ttl(),
            always_revalidate: config.always_revalidate(),
        }
    }

    /// An empty allow-list lets every status through.
    pub fn status_allowed(&self, status: u16) -> bool {
        self.allowed_status.is_empty() || self.allowed_status.contains(&status)
    }

    pub fn evaluate(&self, facts: &RequestFacts, status: u16) -> Verdict {
        if facts.is_search {
            Verdict::Search
        } else if facts.password_required {
            Verdict::PasswordProtected
        } else if facts.authenticated {
            Verdict::Authenticated
        } else if facts.has_post_body {
            Verdict::PostBody
        } else if self
            .cookies
            .matches_any(facts.cookie_names.iter().map(String::as_str))
        {
            Verdict::ExcludedCookie
        } else if self.paths.matches_any([facts.request_uri.as_str()]) {
            Verdict::ExcludedPath
        } else if !self.status_allowed(status) {
            Verdict::DisallowedStatus
        } else {
            Verdict::Cacheable
        }
    }

    pub fn decide(&self, facts: &RequestFacts, status: u16) -> Decision {
        let verdict = self.evaluate(facts, status);
        let directive = if verdict.is_cacheable() {
            self.cacheable_directive()
        } else {
            CacheDirective::NoCache
        };
        counter!(METRIC_DECISION_TOTAL, "verdict" => verdict.label()).increment(1);
        Decision { verdict, directive }
    }

    fn cacheable_directive(&self) -> CacheDirective {
        if self.driver_kind == DriverKind::ProxyCache {
            CacheDirective::ProxyCacheable { ttl: self.ttl }
        } else if !self.always_revalidate {
            CacheDirective::OriginRevalidate { ttl: self.ttl }
        } else {
            CacheDirective::ImmediateRevalidate
        }
    }
}

/// Per-response state: the engine, the request facts and the last status.
#[derive(Debug, Clone)]
pub struct ResponseCycle {
    engine: DecisionEngine,
    facts: RequestFacts,
    status: u16,
}

impl ResponseCycle {
    pub fn new(engine: DecisionEngine, facts: RequestFacts, status: u16) -> Self {
        Self {
            engine,
            facts,
            status,
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn facts(&self) -> &RequestFacts {
        &self.facts
    }

    pub fn facts_mut(&mut self) -> &mut RequestFacts {
        &mut self.facts
    }

    /// Decide against the latest status and write the resulting headers.
    pub fn decide_and_emit(&self, headers: &mut HeaderMap) -> Decision {
        let decision = self.engine.decide(&self.facts, self.status);
        decision.directive.apply(headers, OffsetDateTime::now_utc());
        debug!(
            verdict = decision.verdict.label(),
            status = self.status,
            "Cache headers emitted"
        );
        decision
    }

    /// Track a status transition; headers are recomputed when it changes.
    pub fn change_status(&mut self, status: u16, headers: &mut HeaderMap) -> Option<Decision> {
        if status == self.status {
            return None;
        }
        self.status = status;
        Some(self.decide_and_emit(headers))
    }

    /// Redirects to a disallowed status are never cacheable.
    pub fn intercept_redirect(
        &self,
        status: u16,
        location: Option<&str>,
        headers: &mut HeaderMap,
    ) -> u16 {
        let has_location = location.is_some_and(|location| !location.is_empty());
        if has_location && !self.engine.status_allowed(status) {
            CacheDirective::NoCache.apply(headers, OffsetDateTime::now_utc());
        }
        status
    }
}
