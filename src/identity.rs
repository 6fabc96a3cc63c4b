use tracing::info;
use url::Url;

pub const DEFAULT_SESSION_ID: &str = "default";
pub const UNKNOWN_SESSION_ID: &str = "unknown";

const CONVERSATION_SEGMENT: &str = "c";

/// Extracts the conversation id from a location such as
/// `https://chatgpt.com/c/<id>`. Landing pages and unsaved chats map to
/// `"default"`; anything unparsable maps to `"unknown"`.
pub fn session_id_from_location(location: &str) -> String {
    let parsed = match Url::parse(location.trim()) {
        Ok(url) => url,
        Err(_) => return UNKNOWN_SESSION_ID.to_string(),
    };
    let Some(segments) = parsed.path_segments() else {
        return DEFAULT_SESSION_ID.to_string();
    };

    let segments: Vec<&str> = segments.collect();
    segments
        .iter()
        .position(|segment| *segment == CONVERSATION_SEGMENT)
        .and_then(|index| segments.get(index + 1))
        .filter(|id| !id.is_empty())
        .map(|id| id.to_string())
        .unwrap_or_else(|| DEFAULT_SESSION_ID.to_string())
}

/// Tracks the current location across scans and switches the session id when
/// the user navigates to another conversation.
#[derive(Debug, Clone)]
pub struct SessionResolver {
    last_location: String,
    current_session_id: String,
}

impl SessionResolver {
    pub fn new(initial_location: &str) -> Self {
        Self {
            last_location: initial_location.to_string(),
            current_session_id: session_id_from_location(initial_location),
        }
    }

    pub fn current_session_id(&self) -> &str {
        &self.current_session_id
    }

    /// Returns `true` when the location changed since the previous call.
    pub fn observe(&mut self, location: &str) -> bool {
        if location == self.last_location {
            return false;
        }
        self.last_location = location.to_string();
        let next = session_id_from_location(location);
        if next != self.current_session_id {
            info!(
                from = %self.current_session_id,
                to = %next,
                "location changed, switching session"
            );
        }
        self.current_session_id = next;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_path_yields_id() {
        assert_eq!(
            session_id_from_location("https://chatgpt.com/c/6790-abcd"),
            "6790-abcd"
        );
        assert_eq!(
            session_id_from_location("https://chatgpt.com/g/g-xyz/c/abc?model=gpt-4"),
            "abc"
        );
    }

    #[test]
    fn landing_pages_use_default() {
        assert_eq!(session_id_from_location("https://chatgpt.com/"), "default");
        assert_eq!(session_id_from_location("https://chatgpt.com/c/"), "default");
        assert_eq!(session_id_from_location("https://chatgpt.com/c"), "default");
        assert_eq!(
            session_id_from_location("https://chatgpt.com/gpts/c-model"),
            "default"
        );
    }

    #[test]
    fn unparsable_location_is_unknown() {
        assert_eq!(session_id_from_location("not a url"), "unknown");
        assert_eq!(session_id_from_location(""), "unknown");
    }

    #[test]
    fn non_hierarchical_url_is_default() {
        assert_eq!(session_id_from_location("about:blank"), "default");
    }

    #[test]
    fn resolver_switches_on_navigation() {
        let mut resolver = SessionResolver::new("https://chatgpt.com/c/first");
        assert_eq!(resolver.current_session_id(), "first");
        assert!(!resolver.observe("https://chatgpt.com/c/first"));

        assert!(resolver.observe("https://chatgpt.com/c/second"));
        assert_eq!(resolver.current_session_id(), "second");

        assert!(resolver.observe("https://chatgpt.com/c/second?model=o1"));
        assert_eq!(resolver.current_session_id(), "second");
    }
}
