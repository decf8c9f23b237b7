//! Contacts from the `u`, `ipc` and `opc` arrays of a node fetch.

use serde_json::Value;

/// Relationship with a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContactState {
    Pending,
    Accepted,
    Blocked,
}

/// Rights granted to the recipient of a folder share.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessLevel {
    ReadOnly = 0,
    ReadWrite = 1,
    Full = 2,
}

/// Read-only view of a contact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    /// User handle, or the request id for pending invitations.
    pub handle: String,
    pub email: String,
    pub display_name: String,
    pub state: ContactState,
}

/// Collect contacts from an `f` response. Visibility 1 is an accepted
/// contact, 3 a blocked one; hidden and self entries are skipped.
pub(crate) fn parse_contacts(response: &Value, own_handle: &str) -> Vec<Contact> {
    let mut contacts = Vec::new();

    for user in response.get("u").and_then(Value::as_array).into_iter().flatten() {
        let (Some(handle), Some(email)) = (
            user.get("u").and_then(Value::as_str),
            user.get("m").and_then(Value::as_str),
        ) else {
            continue;
        };
        if handle == own_handle {
            continue;
        }
        let state = match user.get("c").and_then(Value::as_i64) {
            Some(1) => ContactState::Accepted,
            Some(3) => ContactState::Blocked,
            _ => continue,
        };
        contacts.push(Contact {
            handle: handle.to_string(),
            email: email.to_string(),
            display_name: email.to_string(),
            state,
        });
    }

    // Incoming requests carry the sender in `m`, outgoing ones the recipient in `e`.
    for (array, email_field) in [("ipc", "m"), ("opc", "e")] {
        for request in response.get(array).and_then(Value::as_array).into_iter().flatten() {
            let (Some(id), Some(email)) = (
                request.get("p").and_then(Value::as_str),
                request.get(email_field).and_then(Value::as_str),
            ) else {
                continue;
            };
            contacts.push(Contact {
                handle: id.to_string(),
                email: email.to_string(),
                display_name: email.to_string(),
                state: ContactState::Pending,
            });
        }
    }

    contacts.sort_by(|a, b| a.email.cmp(&b.email).then_with(|| a.handle.cmp(&b.handle)));
    contacts
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_contacts() {
        let response = json!({
            "u": [
                {"u": "ME", "m": "me@example.com", "c": 2},
                {"u": "AAA", "m": "bob@example.com", "c": 1},
                {"u": "BBB", "m": "eve@example.com", "c": 3},
                {"u": "CCC", "m": "gone@example.com", "c": 0}
            ],
            "ipc": [{"p": "REQ1", "m": "carol@example.com"}],
            "opc": [{"p": "REQ2", "e": "dave@example.com"}]
        });
        let contacts = parse_contacts(&response, "ME");
        let summary: Vec<_> = contacts
            .iter()
            .map(|c| (c.email.as_str(), c.state))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("bob@example.com", ContactState::Accepted),
                ("carol@example.com", ContactState::Pending),
                ("dave@example.com", ContactState::Pending),
                ("eve@example.com", ContactState::Blocked),
            ]
        );
    }

    #[test]
    fn test_missing_arrays() {
        assert!(parse_contacts(&json!({"f": []}), "ME").is_empty());
    }
}
