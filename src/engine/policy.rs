use crate::model::Room;

/// Decides whether a newly created booking starts `pending` or `approved`.
///
/// Kept behind a trait so future rules (capacity thresholds, requester role,
/// time of day) can be swapped in without touching the workflow's transition
/// logic.
pub trait ApprovalGate: Send + Sync {
    fn requires_approval(&self, room: &Room) -> bool;
}

/// Default policy: the room's own flag.
pub struct RoomFlagGate;

impl ApprovalGate for RoomFlagGate {
    fn requires_approval(&self, room: &Room) -> bool {
        room.requires_approval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RoomType;
    use ulid::Ulid;

    fn room(requires_approval: bool) -> Room {
        Room {
            id: Ulid::new(),
            floor_id: Ulid::new(),
            name: "VIP-1".into(),
            capacity: 4,
            room_type: RoomType::Vip,
            equipment: vec![],
            requires_approval,
            position: None,
            active: true,
        }
    }

    #[test]
    fn room_flag_gate_follows_flag() {
        let gate = RoomFlagGate;
        assert!(gate.requires_approval(&room(true)));
        assert!(!gate.requires_approval(&room(false)));
    }

    /// A policy that additionally flags large rooms, as a template for
    /// host-specific rules.
    struct CapacityGate {
        threshold: u32,
    }

    impl ApprovalGate for CapacityGate {
        fn requires_approval(&self, room: &Room) -> bool {
            room.requires_approval || room.capacity >= self.threshold
        }
    }

    #[test]
    fn custom_gate_is_additive() {
        let gate = CapacityGate { threshold: 4 };
        assert!(gate.requires_approval(&room(false)));
    }
}
