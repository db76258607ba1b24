//! Client-side reconciliation of the message stream.
//!
//! Merges the history fetch, the `previous-messages` replay, live
//! `receive-message`/`message-read` events and locally optimistic sends into
//! one ordered, deduplicated sequence. Pure state, no I/O.

use std::collections::BTreeSet;

use crate::models::message::{Message, NewMessage};
use crate::websocket::ServerEvent;

/// Timestamp tolerance when matching messages without a shared id.
pub const DEDUP_WINDOW_MS: i64 = 1_000;

/// Gap after which a message from the same sender starts a new group.
pub const GROUP_GAP_MS: i64 = 5 * 60 * 1_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageView {
    pub message: Message,
    /// Sent under the local identity
    pub is_self: bool,
    /// Optimistic copy not yet confirmed by the relay
    pub pending: bool,
}

/// Ordered local view of the room for one identity
#[derive(Debug, Clone)]
pub struct Timeline {
    local_identity: String,
    entries: Vec<MessageView>,
}

fn attachment_url(message: &Message) -> Option<&str> {
    message.attachment.as_ref().map(|a| a.url.as_str())
}

/// Id when both sides have one, otherwise sender, text and attachment with a
/// timestamp inside [`DEDUP_WINDOW_MS`].
fn same_message(known: &Message, incoming: &Message) -> bool {
    if let (Some(a), Some(b)) = (&known.id, &incoming.id) {
        return a == b;
    }
    known.sender == incoming.sender
        && known.text == incoming.text
        && attachment_url(known) == attachment_url(incoming)
        && (known.timestamp - incoming.timestamp).abs() < DEDUP_WINDOW_MS
}

impl Timeline {
    pub fn new(local_identity: impl Into<String>) -> Self {
        Self {
            local_identity: local_identity.into(),
            entries: Vec::new(),
        }
    }

    pub fn entries(&self) -> &[MessageView] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn view(&self, message: Message, pending: bool) -> MessageView {
        MessageView {
            is_self: message.sender == self.local_identity,
            message,
            pending,
        }
    }

    fn position(&self, message: &Message) -> Option<usize> {
        self.entries.iter().position(|v| same_message(&v.message, message))
    }

    /// Fold a server copy into a known entry: adopt a missing id and union
    /// the read set. Position never changes.
    fn adopt(&mut self, index: usize, incoming: Message) {
        let entry = &mut self.entries[index];
        if entry.message.id.is_none() && incoming.id.is_some() {
            entry.message.id = incoming.id;
            if entry.message.created_at.is_none() {
                entry.message.created_at = incoming.created_at;
            }
            entry.pending = false;
        }
        for reader in incoming.read_by {
            entry.message.mark_read_by(&reader);
        }
    }

    /// Initial history fetch. Same merge policy as the join replay.
    pub fn load_history(&mut self, messages: Vec<Message>) {
        self.apply_previous(messages);
    }

    /// Merge a `previous-messages` batch (oldest first). Unknown messages are
    /// prepended in batch order; known ones stay where they are.
    pub fn apply_previous(&mut self, messages: Vec<Message>) {
        let mut older: Vec<MessageView> = Vec::new();
        for message in messages {
            if let Some(index) = self.position(&message) {
                self.adopt(index, message);
            } else if let Some(dup) = older.iter_mut().find(|v| same_message(&v.message, &message)) {
                for reader in message.read_by {
                    dup.message.mark_read_by(&reader);
                }
            } else {
                older.push(self.view(message, false));
            }
        }
        self.entries.splice(0..0, older);
    }

    /// Live `receive-message`. Returns whether a new entry was appended.
    pub fn apply_received(&mut self, message: Message) -> bool {
        match self.position(&message) {
            Some(index) => {
                self.adopt(index, message);
                false
            }
            None => {
                let view = self.view(message, false);
                self.entries.push(view);
                true
            }
        }
    }

    /// Optimistically show a message this client just sent. Returns its index.
    pub fn push_local(&mut self, draft: NewMessage) -> usize {
        let message = Message::from_new(draft, None, None);
        self.entries.push(MessageView {
            message,
            is_self: true,
            pending: true,
        });
        self.entries.len() - 1
    }

    /// `message-confirmed` for one of our own sends.
    pub fn apply_confirmation(&mut self, message: Message) {
        match self.position(&message) {
            Some(index) => {
                let timestamp = message.timestamp;
                self.adopt(index, message);
                let entry = &mut self.entries[index];
                entry.message.timestamp = timestamp;
                entry.pending = false;
            }
            None => {
                let view = self.view(message, false);
                self.entries.push(view);
            }
        }
    }

    /// `message-read`. No-op for ids not loaded yet. Returns whether the read
    /// set changed.
    pub fn apply_read(&mut self, message_id: &str, identity: &str) -> bool {
        self.entries
            .iter_mut()
            .find(|v| v.message.id.as_deref() == Some(message_id))
            .map(|v| v.message.mark_read_by(identity))
            .unwrap_or(false)
    }

    /// Dispatch a decoded server event.
    pub fn apply(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::PreviousMessages(messages) => self.apply_previous(messages),
            ServerEvent::ReceiveMessage(message) => {
                self.apply_received(message);
            }
            ServerEvent::MessageConfirmed(message) => self.apply_confirmation(message),
            ServerEvent::MessageRead(receipt) => {
                self.apply_read(&receipt.message_id, &receipt.read_by);
            }
        }
    }

    /// Every identity seen as a sender or a reader.
    pub fn roster(&self) -> BTreeSet<&str> {
        let mut roster = BTreeSet::new();
        for view in &self.entries {
            roster.insert(view.message.sender.as_str());
            roster.extend(view.message.read_by.iter().map(String::as_str));
        }
        roster
    }

    /// Whether every other known identity has read the entry at `index`.
    pub fn is_fully_read(&self, index: usize) -> bool {
        let Some(view) = self.entries.get(index) else {
            return false;
        };
        if view.message.id.is_none() {
            return false;
        }
        let others: Vec<&str> = self
            .roster()
            .into_iter()
            .filter(|identity| *identity != view.message.sender)
            .collect();
        !others.is_empty() && others.iter().all(|identity| view.message.read_by.contains(*identity))
    }

    /// Per entry, whether it opens a display group (avatar and timestamp
    /// shown).
    pub fn display_groups(&self) -> Vec<bool> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, view)| match i.checked_sub(1).map(|p| &self.entries[p].message) {
                None => true,
                Some(prev) => {
                    prev.sender != view.message.sender
                        || view.message.timestamp - prev.timestamp > GROUP_GAP_MS
                }
            })
            .collect()
    }

    /// Ids of persisted messages from others that the local identity has not
    /// acknowledged yet.
    pub fn unread_from_others(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|v| v.message.sender != self.local_identity)
            .filter(|v| !v.message.read_by.contains(&self.local_identity))
            .filter_map(|v| v.message.id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: Option<&str>, sender: &str, text: &str, ts: i64) -> Message {
        Message {
            id: id.map(str::to_string),
            sender: sender.into(),
            text: text.into(),
            timestamp: ts,
            created_at: None,
            attachment: None,
            read_by: BTreeSet::new(),
        }
    }

    fn draft(sender: &str, text: &str, ts: i64) -> NewMessage {
        NewMessage {
            sender: sender.into(),
            text: text.into(),
            timestamp: ts,
            attachment: None,
        }
    }

    #[test]
    fn composite_key_absorbs_skew_inside_window() {
        let mut t = Timeline::new("alice");
        t.push_local(draft("alice", "hi", 1000));

        assert!(!t.apply_received(msg(None, "alice", "hi", 1050)));
        assert_eq!(t.len(), 1);

        assert!(t.apply_received(msg(None, "alice", "hi", 2500)));
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn echo_with_id_settles_pending_entry() {
        let mut t = Timeline::new("alice");
        t.push_local(draft("alice", "hi", 1000));
        assert!(t.entries()[0].pending);

        assert!(!t.apply_received(msg(Some("x"), "alice", "hi", 1050)));
        assert_eq!(t.len(), 1);
        let entry = &t.entries()[0];
        assert_eq!(entry.message.id.as_deref(), Some("x"));
        assert_eq!(entry.message.timestamp, 1000);
        assert!(!entry.pending);

        // the adopted id now wins over the composite key
        assert!(t.apply_received(msg(Some("y"), "alice", "hi", 1100)));
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn distinct_ids_never_collapse() {
        let mut t = Timeline::new("alice");
        t.apply_received(msg(Some("m1"), "bob", "ok", 1000));
        assert!(t.apply_received(msg(Some("m2"), "bob", "ok", 1000)));
        assert!(!t.apply_received(msg(Some("m1"), "bob", "ok", 1000)));
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn previous_messages_prepend_without_reordering() {
        let mut t = Timeline::new("carol");
        t.apply_received(msg(Some("m3"), "bob", "live", 3000));
        t.apply_previous(vec![
            msg(Some("m1"), "alice", "one", 1000),
            msg(Some("m2"), "bob", "two", 2000),
            msg(Some("m3"), "bob", "live", 3000),
        ]);

        let ids: Vec<_> = t.entries().iter().map(|v| v.message.id.clone().unwrap()).collect();
        assert_eq!(ids, vec!["m1", "m2", "m3"]);

        t.apply_previous(vec![msg(Some("m1"), "alice", "one", 1000)]);
        assert_eq!(t.len(), 3);
    }

    #[test]
    fn confirmation_adopts_id_and_clears_pending() {
        let mut t = Timeline::new("alice");
        let index = t.push_local(draft("alice", "hello", 1000));
        assert!(t.entries()[index].pending);
        assert!(!t.apply_read("m1", "bob"));

        t.apply_confirmation(msg(Some("m1"), "alice", "hello", 1000));
        let view = &t.entries()[index];
        assert!(!view.pending);
        assert!(view.is_self);
        assert_eq!(view.message.id.as_deref(), Some("m1"));

        assert!(t.apply_read("m1", "bob"));
        assert!(!t.apply_read("m1", "bob"));
        assert!(!t.apply_read("m1", "alice"));
    }

    #[test]
    fn replay_backfills_id_for_unconfirmed_send() {
        let mut t = Timeline::new("alice");
        t.push_local(draft("alice", "offline", 5000));
        t.apply_previous(vec![msg(Some("m9"), "alice", "offline", 5000)]);
        assert_eq!(t.len(), 1);
        assert_eq!(t.entries()[0].message.id.as_deref(), Some("m9"));
    }

    #[test]
    fn fully_read_needs_id_and_other_identities() {
        let mut t = Timeline::new("alice");
        t.push_local(draft("alice", "solo", 1000));
        assert!(!t.is_fully_read(0));

        t.apply_confirmation(msg(Some("m1"), "alice", "solo", 1000));
        assert!(!t.is_fully_read(0), "nobody else is known yet");

        t.apply_received(msg(Some("m2"), "bob", "yo", 2000));
        assert!(!t.is_fully_read(0));
        t.apply_read("m1", "bob");
        assert!(t.is_fully_read(0));
        assert!(!t.is_fully_read(7));
    }

    #[test]
    fn reader_who_never_sent_joins_roster() {
        let mut t = Timeline::new("alice");
        t.push_local(draft("alice", "hello", 1000));
        t.apply_confirmation(msg(Some("m1"), "alice", "hello", 1000));
        assert_eq!(t.roster().into_iter().collect::<Vec<_>>(), vec!["alice"]);

        t.apply_read("m1", "bob");
        assert_eq!(t.roster().into_iter().collect::<Vec<_>>(), vec!["alice", "bob"]);
        assert!(t.is_fully_read(0));
    }

    #[test]
    fn groups_break_on_sender_change_and_gap() {
        let mut t = Timeline::new("alice");
        t.apply_previous(vec![
            msg(Some("1"), "alice", "a", 0),
            msg(Some("2"), "alice", "b", 60_000),
            msg(Some("3"), "bob", "c", 61_000),
            msg(Some("4"), "bob", "d", 61_000 + GROUP_GAP_MS + 1),
            msg(Some("5"), "bob", "e", 61_000 + GROUP_GAP_MS + 2),
        ]);
        let groups = t.display_groups();
        assert_eq!(groups, vec![true, false, true, true, false]);
        assert_eq!(groups, t.display_groups());
    }

    #[test]
    fn unread_lists_only_persisted_messages_from_others() {
        let mut t = Timeline::new("bob");
        t.apply_previous(vec![
            msg(Some("m1"), "alice", "a", 1000),
            msg(None, "alice", "b", 2000),
            msg(Some("m3"), "bob", "c", 3000),
        ]);
        assert_eq!(t.unread_from_others(), vec!["m1".to_string()]);
        t.apply_read("m1", "bob");
        assert!(t.unread_from_others().is_empty());
    }
}
