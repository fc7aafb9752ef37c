//! Admin commands accepted by the DLQ.

use serde::{Deserialize, Serialize};

/// An operator request, as sent by the admin surface.
///
/// ```json
/// {"action": "retry_one", "index": 3}
/// {"action": "retry_all"}
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DlqCommand {
    /// Republish the entry at `index` (0 = oldest).
    RetryOne {
        /// Position in the DLQ.
        index: usize,
    },
    /// Republish every entry, oldest first.
    RetryAll,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_wire_shapes() {
        let one: DlqCommand = serde_json::from_str(r#"{"action":"retry_one","index":3}"#).unwrap();
        assert_eq!(one, DlqCommand::RetryOne { index: 3 });

        let all: DlqCommand = serde_json::from_str(r#"{"action":"retry_all"}"#).unwrap();
        assert_eq!(all, DlqCommand::RetryAll);

        assert!(serde_json::from_str::<DlqCommand>(r#"{"action":"purge"}"#).is_err());
        assert!(serde_json::from_str::<DlqCommand>(r#"{"action":"retry_one"}"#).is_err());
    }
}
