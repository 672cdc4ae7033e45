//! Application-wide constants.

/// Application name.
pub const APP_NAME: &str = "Huddle";

/// Application version.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// REST API version prefix.
pub const API_VERSION: &str = "v1";

/// Default API request timeout in milliseconds.
pub const DEFAULT_API_TIMEOUT_MS: u64 = 30_000;

/// Timeout for the narrow health-check probe.
pub const HEALTH_CHECK_TIMEOUT_MS: u64 = 5_000;

/// Durable storage keys shared across crates.
pub mod storage_keys {
    /// The auth bearer token.
    pub const AUTH_TOKEN: &str = "auth_token";
    /// Serialized analytics queue snapshot.
    pub const ANALYTICS_QUEUE: &str = "analytics_queue";
    /// Analytics consent flag ("true"/"false"; absent means allowed).
    pub const ANALYTICS_CONSENT: &str = "analytics_consent";
    /// Last known navigation path, written by the host app shell.
    pub const NAV_PATH: &str = "nav_path";
}

/// Realtime event names emitted to / received from the backend.
pub mod socket_events {
    pub const JOIN_ROOM: &str = "join-room";
    pub const LEAVE_ROOM: &str = "leave-room";
    pub const ROOM_UPDATED: &str = "room-updated";
    pub const VOTE_EXTENSION: &str = "vote-extension";
    pub const MATCHING_JOIN: &str = "matching-join";
    pub const MATCHING_LEAVE: &str = "matching-leave";
    pub const MATCH_FOUND: &str = "match-found";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_keys_distinct() {
        let keys = [
            storage_keys::AUTH_TOKEN,
            storage_keys::ANALYTICS_QUEUE,
            storage_keys::ANALYTICS_CONSENT,
            storage_keys::NAV_PATH,
        ];
        for (i, a) in keys.iter().enumerate() {
            for b in &keys[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
