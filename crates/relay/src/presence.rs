//! Room membership tracking.
//!
//! The registry answers one question: which peers are currently in a
//! room. It says nothing about calls; call state lives entirely in the
//! clients. Membership changes are reported back to the caller so the
//! connection handler can decide which notifications to fan out.

use std::collections::{HashMap, HashSet};

use tokio::sync::RwLock;

use peercall_core::{PeerId, RoomId};

/// Tracks which peers are present in which rooms.
///
/// All methods take `&self`; interior locking keeps the handler code
/// free of lock plumbing.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    rooms: RwLock<HashMap<RoomId, HashSet<PeerId>>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a peer to a room. Returns `true` if the peer was not
    /// already a member, `false` for a repeated join.
    pub async fn join(&self, room_id: &RoomId, peer_id: &PeerId) -> bool {
        let mut rooms = self.rooms.write().await;
        rooms
            .entry(room_id.clone())
            .or_default()
            .insert(peer_id.clone())
    }

    /// Remove a peer from a room. Returns `true` if the peer was a
    /// member. Empty rooms are pruned.
    pub async fn leave(&self, room_id: &RoomId, peer_id: &PeerId) -> bool {
        let mut rooms = self.rooms.write().await;
        let Some(members) = rooms.get_mut(room_id) else {
            return false;
        };
        let removed = members.remove(peer_id);
        if members.is_empty() {
            rooms.remove(room_id);
        }
        removed
    }

    /// Current members of a room, sorted for deterministic responses.
    /// An unknown room is just an empty room.
    pub async fn members_of(&self, room_id: &RoomId) -> Vec<PeerId> {
        let rooms = self.rooms.read().await;
        let mut members: Vec<PeerId> = rooms
            .get(room_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        members.sort();
        members
    }

    /// Remove a peer from every room it is in, returning the rooms it
    /// left. Called when a connection closes.
    pub async fn remove_peer(&self, peer_id: &PeerId) -> Vec<RoomId> {
        let mut rooms = self.rooms.write().await;
        let mut left = Vec::new();
        rooms.retain(|room_id, members| {
            if members.remove(peer_id) {
                left.push(room_id.clone());
            }
            !members.is_empty()
        });
        left
    }

    /// Number of rooms with at least one member.
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(name: &str) -> PeerId {
        PeerId::from(name)
    }

    fn room(name: &str) -> RoomId {
        RoomId::from(name)
    }

    #[tokio::test]
    async fn test_join_and_members() {
        let registry = PresenceRegistry::new();
        assert!(registry.join(&room("general"), &peer("alice")).await);
        assert!(registry.join(&room("general"), &peer("bob")).await);

        let members = registry.members_of(&room("general")).await;
        assert_eq!(members, vec![peer("alice"), peer("bob")]);
    }

    #[tokio::test]
    async fn test_repeated_join_reports_false() {
        let registry = PresenceRegistry::new();
        assert!(registry.join(&room("general"), &peer("alice")).await);
        assert!(!registry.join(&room("general"), &peer("alice")).await);
        assert_eq!(registry.members_of(&room("general")).await.len(), 1);
    }

    #[tokio::test]
    async fn test_leave_prunes_empty_room() {
        let registry = PresenceRegistry::new();
        registry.join(&room("general"), &peer("alice")).await;
        assert!(registry.leave(&room("general"), &peer("alice")).await);
        assert_eq!(registry.room_count().await, 0);
    }

    #[tokio::test]
    async fn test_leave_unknown_room_is_noop() {
        let registry = PresenceRegistry::new();
        assert!(!registry.leave(&room("nowhere"), &peer("alice")).await);
    }

    #[tokio::test]
    async fn test_remove_peer_reports_rooms_left() {
        let registry = PresenceRegistry::new();
        registry.join(&room("general"), &peer("alice")).await;
        registry.join(&room("gaming"), &peer("alice")).await;
        registry.join(&room("general"), &peer("bob")).await;

        let mut left = registry.remove_peer(&peer("alice")).await;
        left.sort();
        assert_eq!(left, vec![room("gaming"), room("general")]);

        // bob keeps the room alive, gaming is pruned
        assert_eq!(registry.room_count().await, 1);
        assert_eq!(
            registry.members_of(&room("general")).await,
            vec![peer("bob")]
        );
    }

    #[tokio::test]
    async fn test_members_of_unknown_room_is_empty() {
        let registry = PresenceRegistry::new();
        assert!(registry.members_of(&room("ghost")).await.is_empty());
    }
}
