use serde::{Deserialize, Serialize};

use super::client::ProviderEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleSignal {
    Started,
    Ended,
    Failed,
}

/// Maps provider event names onto lifecycle signals.
///
/// Provider SDK releases have renamed their lifecycle events more than once,
/// so the default vocabulary listens for every name seen so far. When the
/// provider's contract is pinned down, configure a strict vocabulary in the
/// settings file instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventVocabulary {
    #[serde(default)]
    pub started: Vec<String>,
    #[serde(default)]
    pub ended: Vec<String>,
    #[serde(default)]
    pub failed: Vec<String>,
}

impl Default for EventVocabulary {
    fn default() -> Self {
        fn names(list: &[&str]) -> Vec<String> {
            list.iter().map(|name| name.to_string()).collect()
        }

        Self {
            started: names(&[
                "call_started",
                "callStarted",
                "conversation_started",
                "conversationStarted",
                "call_ready",
            ]),
            ended: names(&[
                "call_ended",
                "callEnded",
                "conversation_ended",
                "conversationEnded",
                "disconnect",
            ]),
            failed: names(&["error", "call_error", "callError"]),
        }
    }
}

impl EventVocabulary {
    pub fn strict(
        started: impl Into<String>,
        ended: impl Into<String>,
        failed: impl Into<String>,
    ) -> Self {
        Self {
            started: vec![started.into()],
            ended: vec![ended.into()],
            failed: vec![failed.into()],
        }
    }

    /// Failure names win over end names, which win over start names, should a
    /// misconfigured vocabulary list one name twice.
    pub fn classify(&self, event: &ProviderEvent) -> Option<LifecycleSignal> {
        let name = event.name.as_str();
        let listed = |names: &[String]| names.iter().any(|candidate| candidate == name);

        if listed(&self.failed) {
            Some(LifecycleSignal::Failed)
        } else if listed(&self.ended) {
            Some(LifecycleSignal::Ended)
        } else if listed(&self.started) {
            Some(LifecycleSignal::Started)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_vocabulary_covers_sdk_spellings() {
        let vocabulary = EventVocabulary::default();
        for name in ["call_started", "callStarted", "conversationStarted"] {
            assert_eq!(
                vocabulary.classify(&ProviderEvent::new(name)),
                Some(LifecycleSignal::Started),
                "{name}"
            );
        }
        assert_eq!(
            vocabulary.classify(&ProviderEvent::new("callEnded")),
            Some(LifecycleSignal::Ended)
        );
        assert_eq!(
            vocabulary.classify(&ProviderEvent::new("error")),
            Some(LifecycleSignal::Failed)
        );
        assert_eq!(vocabulary.classify(&ProviderEvent::new("update")), None);
    }

    #[test]
    fn strict_vocabulary_ignores_other_names() {
        let vocabulary = EventVocabulary::strict("call_started", "call_ended", "error");
        assert_eq!(vocabulary.classify(&ProviderEvent::new("conversationStarted")), None);
        assert_eq!(
            vocabulary.classify(&ProviderEvent::new("call_started")),
            Some(LifecycleSignal::Started)
        );
    }

    #[test]
    fn failure_names_take_precedence() {
        let vocabulary = EventVocabulary {
            started: vec!["x".into()],
            ended: vec!["x".into()],
            failed: vec!["x".into()],
        };
        assert_eq!(
            vocabulary.classify(&ProviderEvent::new("x")),
            Some(LifecycleSignal::Failed)
        );
    }
}
