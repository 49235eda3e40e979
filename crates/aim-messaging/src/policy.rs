//! Inbound admission policy.
//!
//! A pure decision function over `(is_blocked, is_known_contact,
//! privacy_mode)` with precedence blocklist > known contact > privacy
//! mode. An unparseable privacy mode behaves like `contacts_only`.

use serde::{Deserialize, Serialize};

/// Who may start a conversation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrivacyMode {
    ContactsOnly,
    Requests,
    Everyone,
}

impl PrivacyMode {
    /// Parse a mode string; unknown values yield `None`.
    pub fn parse(s: &str) -> Option<PrivacyMode> {
        match s {
            "contacts_only" => Some(PrivacyMode::ContactsOnly),
            "requests" => Some(PrivacyMode::Requests),
            "everyone" => Some(PrivacyMode::Everyone),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PrivacyMode::ContactsOnly => "contacts_only",
            PrivacyMode::Requests => "requests",
            PrivacyMode::Everyone => "everyone",
        }
    }
}

impl Default for PrivacyMode {
    fn default() -> Self {
        PrivacyMode::ContactsOnly
    }
}

/// Inputs to the decision.
#[derive(Clone, Copy, Debug)]
pub struct PolicyInput {
    pub is_known_contact: bool,
    pub is_blocked: bool,
    /// `None` models an invalid persisted mode.
    pub privacy_mode: Option<PrivacyMode>,
}

/// What to do with the inbound wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PolicyAction {
    AcceptChat,
    QueueRequest,
    Reject,
}

/// The decision plus its reason tag (logged and counted).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PolicyDecision {
    pub action: PolicyAction,
    pub reason: &'static str,
}

/// Evaluate the admission table.
pub fn evaluate(input: PolicyInput) -> PolicyDecision {
    if input.is_blocked {
        return PolicyDecision {
            action: PolicyAction::Reject,
            reason: "blocked_sender",
        };
    }
    if input.is_known_contact {
        return PolicyDecision {
            action: PolicyAction::AcceptChat,
            reason: "trusted_contact",
        };
    }
    match input.privacy_mode {
        Some(PrivacyMode::Everyone) => PolicyDecision {
            action: PolicyAction::AcceptChat,
            reason: "unknown_everyone_mode",
        },
        Some(PrivacyMode::Requests) => PolicyDecision {
            action: PolicyAction::QueueRequest,
            reason: "unknown_requests_mode",
        },
        Some(PrivacyMode::ContactsOnly) | None => PolicyDecision {
            action: PolicyAction::Reject,
            reason: "unknown_contacts_only",
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decide(blocked: bool, known: bool, mode: Option<PrivacyMode>) -> PolicyDecision {
        evaluate(PolicyInput {
            is_known_contact: known,
            is_blocked: blocked,
            privacy_mode: mode,
        })
    }

    #[test]
    fn full_decision_table() {
        let modes = [
            Some(PrivacyMode::ContactsOnly),
            Some(PrivacyMode::Requests),
            Some(PrivacyMode::Everyone),
            None,
        ];

        for mode in modes {
            // Blocklist wins over everything.
            for known in [true, false] {
                let decision = decide(true, known, mode);
                assert_eq!(decision.action, PolicyAction::Reject);
                assert_eq!(decision.reason, "blocked_sender");
            }

            // Known contacts always land in chat.
            let decision = decide(false, true, mode);
            assert_eq!(decision.action, PolicyAction::AcceptChat);
            assert_eq!(decision.reason, "trusted_contact");
        }

        // Unknown senders fall through to the mode.
        assert_eq!(
            decide(false, false, Some(PrivacyMode::ContactsOnly)),
            PolicyDecision {
                action: PolicyAction::Reject,
                reason: "unknown_contacts_only",
            }
        );
        assert_eq!(
            decide(false, false, Some(PrivacyMode::Requests)),
            PolicyDecision {
                action: PolicyAction::QueueRequest,
                reason: "unknown_requests_mode",
            }
        );
        assert_eq!(
            decide(false, false, Some(PrivacyMode::Everyone)),
            PolicyDecision {
                action: PolicyAction::AcceptChat,
                reason: "unknown_everyone_mode",
            }
        );
        assert_eq!(
            decide(false, false, None),
            PolicyDecision {
                action: PolicyAction::Reject,
                reason: "unknown_contacts_only",
            }
        );
    }

    #[test]
    fn mode_parsing() {
        assert_eq!(PrivacyMode::parse("requests"), Some(PrivacyMode::Requests));
        assert_eq!(PrivacyMode::parse("EVERYONE"), None);
        assert_eq!(PrivacyMode::parse("open"), None);
        assert_eq!(PrivacyMode::default(), PrivacyMode::ContactsOnly);
    }
}
