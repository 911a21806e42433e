//! Per-target fixed-window rate limiting.
//!
//! Each key (normally a host, see [`RateLimiter::key_for_url`]) gets its own
//! window. Windows are aligned to multiples of the rule's window length since
//! the UNIX epoch, so two limiters with the same rules agree on boundaries.
//!
//! Rules are matched by host pattern: a pattern applies to the host itself and
//! to any subdomain of it. When several rules match, the longest pattern wins;
//! when none does, the default rule applies.
//!
//! A key can also be put on cooldown, normally after the target answered
//! HTTP 429. Nothing is allowed for that key until the cooldown ends,
//! whatever its window says.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use url::Url;

pub const DEFAULT_MAX_REQUESTS: u32 = 30;
pub const DEFAULT_WINDOW_SECS: u64 = 60;
pub const DEFAULT_COOLDOWN_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRule {
    pub pattern: String,
    pub max_requests: u32,
    pub window_secs: u64,
    /// Cooldown applied after a 429 that carried no usable `Retry-After`
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

fn default_cooldown_secs() -> u64 {
    DEFAULT_COOLDOWN_SECS
}

impl RateLimitRule {
    pub fn new(pattern: impl Into<String>, max_requests: u32, window_secs: u64) -> Self {
        Self {
            pattern: pattern.into().to_lowercase(),
            max_requests,
            window_secs: window_secs.max(1),
            cooldown_secs: DEFAULT_COOLDOWN_SECS,
        }
    }

    pub fn with_cooldown(mut self, cooldown_secs: u64) -> Self {
        self.cooldown_secs = cooldown_secs;
        self
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    /// A rule that admits nothing, ever.
    pub fn blocks_all(&self) -> bool {
        self.max_requests == 0
    }

    fn matches(&self, key: &str) -> bool {
        key == self.pattern
            || key
                .strip_suffix(self.pattern.as_str())
                .is_some_and(|prefix| prefix.ends_with('.'))
    }

    fn window_start(&self, now_secs: u64) -> u64 {
        now_secs - now_secs % self.window_secs
    }
}

#[derive(Debug, Clone, Copy)]
struct KeyState {
    window_start: u64,
    count: u32,
    cooldown_until: u64,
}

impl KeyState {
    fn fresh(window_start: u64) -> Self {
        Self {
            window_start,
            count: 0,
            cooldown_until: 0,
        }
    }

    fn allows(state: Option<&KeyState>, rule: &RateLimitRule, now_secs: u64) -> bool {
        match state {
            Some(s) if s.cooldown_until > now_secs => false,
            Some(s) if s.window_start == rule.window_start(now_secs) => s.count < rule.max_requests,
            _ => rule.max_requests > 0,
        }
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    default_rule: RateLimitRule,
    rules: Vec<RateLimitRule>,
    windows: Mutex<HashMap<String, KeyState>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW_SECS)
    }
}

impl RateLimiter {
    pub fn new(default_max_requests: u32, default_window_secs: u64) -> Self {
        Self {
            default_rule: RateLimitRule::new("*", default_max_requests, default_window_secs),
            rules: Vec::new(),
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_default_cooldown(mut self, cooldown_secs: u64) -> Self {
        self.default_rule.cooldown_secs = cooldown_secs;
        self
    }

    pub fn with_rule(mut self, rule: RateLimitRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_rules(mut self, rules: impl IntoIterator<Item = RateLimitRule>) -> Self {
        self.rules.extend(rules.into_iter().map(|r| {
            RateLimitRule::new(r.pattern, r.max_requests, r.window_secs).with_cooldown(r.cooldown_secs)
        }));
        self
    }

    /// Host of `url`, lowercased and without a leading `www.`.
    pub fn key_for_url(url: &str) -> Option<String> {
        let parsed = Url::parse(url).ok()?;
        let host = parsed.host_str()?.to_lowercase();
        Some(host.strip_prefix("www.").map(str::to_string).unwrap_or(host))
    }

    pub fn rule_for(&self, key: &str) -> &RateLimitRule {
        let key = key.to_lowercase();
        self.rules
            .iter()
            .filter(|rule| rule.matches(&key))
            .max_by_key(|rule| rule.pattern.len())
            .unwrap_or(&self.default_rule)
    }

    /// Whether another request for `key` fits in the current window.
    pub fn check(&self, key: &str) -> bool {
        self.check_at(key, now_secs())
    }

    pub fn check_at(&self, key: &str, now_secs: u64) -> bool {
        let rule = self.rule_for(key);
        KeyState::allows(self.lock().get(key), rule, now_secs)
    }

    pub fn record(&self, key: &str) {
        self.record_at(key, now_secs())
    }

    pub fn record_at(&self, key: &str, now_secs: u64) {
        let mut windows = self.lock();
        self.bump(&mut windows, key, now_secs);
    }

    /// Checks and records in one step. Returns false, recording nothing, when
    /// the window is full or the key is cooling down.
    pub fn try_acquire(&self, key: &str) -> bool {
        self.try_acquire_at(key, now_secs())
    }

    pub fn try_acquire_at(&self, key: &str, now_secs: u64) -> bool {
        let rule = self.rule_for(key);
        let mut windows = self.lock();
        let allowed = KeyState::allows(windows.get(key), rule, now_secs);
        if allowed {
            self.bump(&mut windows, key, now_secs);
        }
        allowed
    }

    /// Refuse every request for `key` during `duration`. An existing longer
    /// cooldown is kept.
    pub fn cooldown(&self, key: &str, duration: Duration) {
        self.cooldown_at(key, duration, now_secs())
    }

    pub fn cooldown_at(&self, key: &str, duration: Duration, now_secs: u64) {
        let rule = self.rule_for(key);
        let secs = duration.as_secs() + u64::from(duration.subsec_nanos() > 0);
        let until = now_secs.saturating_add(secs);

        let mut windows = self.lock();
        if !windows.contains_key(key) {
            self.sweep(&mut windows, now_secs);
        }
        let state = windows
            .entry(key.to_string())
            .or_insert_with(|| KeyState::fresh(rule.window_start(now_secs)));
        state.cooldown_until = state.cooldown_until.max(until);
    }

    pub fn in_cooldown_at(&self, key: &str, now_secs: u64) -> bool {
        self.lock()
            .get(key)
            .is_some_and(|s| s.cooldown_until > now_secs)
    }

    /// Time until a request for `key` may be allowed again. Zero when one
    /// would currently be allowed.
    pub fn time_until_reset(&self, key: &str) -> Duration {
        self.time_until_reset_at(key, now_secs())
    }

    pub fn time_until_reset_at(&self, key: &str, now_secs: u64) -> Duration {
        let rule = self.rule_for(key);
        let windows = self.lock();
        let state = windows.get(key);
        if KeyState::allows(state, rule, now_secs) {
            return Duration::ZERO;
        }
        let until = match state {
            Some(s) if s.cooldown_until > now_secs => s.cooldown_until,
            _ => rule.window_start(now_secs) + rule.window_secs,
        };
        Duration::from_secs(until - now_secs)
    }

    pub fn reset(&self, key: &str) {
        self.lock().remove(key);
    }

    pub fn reset_all(&self) {
        self.lock().clear();
    }

    pub fn tracked_keys(&self) -> usize {
        self.lock().len()
    }

    fn bump(&self, windows: &mut HashMap<String, KeyState>, key: &str, now_secs: u64) {
        let rule = self.rule_for(key);
        let window_start = rule.window_start(now_secs);
        if !windows.contains_key(key) {
            self.sweep(windows, now_secs);
        }
        let state = windows
            .entry(key.to_string())
            .or_insert_with(|| KeyState::fresh(window_start));
        if state.window_start != window_start {
            state.window_start = window_start;
            state.count = 0;
        }
        state.count = state.count.saturating_add(1);
    }

    /// Drop keys whose window has ended and that are not cooling down.
    /// Such entries behave exactly like absent ones.
    fn sweep(&self, windows: &mut HashMap<String, KeyState>, now_secs: u64) {
        windows.retain(|key, state| {
            state.cooldown_until > now_secs
                || state.window_start + self.rule_for(key).window_secs > now_secs
        });
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, KeyState>> {
        self.windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
