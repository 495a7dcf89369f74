use std::collections::HashMap;

/// Environment variables the proxy reads at startup. Tests clear all of them
/// before applying their own values so one binary's tests never bleed into
/// another's.
pub const PROXY_VARS: &[&str] = &[
    "N8N_WEBHOOK_BASE_URL",
    "WEBHOOK_PATH_PRIMARY",
    "WEBHOOK_PATH_FALLBACK",
    "MAX_FILE_SIZE_MB",
    "MAX_FILES_PER_REQUEST",
    "MAX_CONCURRENT_CONNECTIONS",
    "REQUEST_TIMEOUT_SECONDS",
    "ALLOWED_ORIGINS",
    "HOUSEKEEPING_INTERVAL_SECONDS",
    "PORT",
    "HOST",
];

/// Tracks environment variable mutations and restores originals on drop.
pub struct EnvGuard {
    originals: HashMap<String, Option<String>>,
}

impl EnvGuard {
    pub fn new() -> Self {
        let mut guard = Self {
            originals: HashMap::new(),
        };
        for var in PROXY_VARS {
            guard.remove(var);
        }
        guard
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.capture(key);
        std::env::set_var(key, value);
    }

    pub fn set_many(&mut self, entries: &[(&str, &str)]) {
        for (key, value) in entries {
            self.set(key, value);
        }
    }

    pub fn remove(&mut self, key: &str) {
        self.capture(key);
        std::env::remove_var(key);
    }

    fn capture(&mut self, key: &str) {
        if self.originals.contains_key(key) {
            return;
        }
        let original = std::env::var(key).ok();
        self.originals.insert(key.to_string(), original);
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, original) in self.originals.drain() {
            match original {
                Some(value) => std::env::set_var(&key, value),
                None => std::env::remove_var(&key),
            }
        }
    }
}
