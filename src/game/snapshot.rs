//! Snapshot building for network transmission

use crate::ws::protocol::{PlayerSnapshot, RoomSnapshot};

use super::state::{PlayerState, RoomState};

/// Builds full room snapshots. Rooms always send the complete world, never deltas.
pub struct SnapshotBuilder;

impl SnapshotBuilder {
    pub fn build(state: &RoomState) -> RoomSnapshot {
        let mut players: Vec<&PlayerState> = state.players.values().collect();
        players.sort_by_key(|p| p.join_order);

        RoomSnapshot {
            room_id: state.id.clone(),
            tick: state.tick,
            started: state.started,
            host_id: state.host_id,
            players: players.into_iter().map(Self::player).collect(),
            pipes: state.lane.pipes().iter().map(|p| p.snapshot()).collect(),
        }
    }

    fn player(p: &PlayerState) -> PlayerSnapshot {
        PlayerSnapshot {
            participant_id: p.participant_id,
            display_name: p.display_name.clone(),
            x: p.x,
            y: p.y,
            vel_y: p.vel_y,
            score: p.score,
            alive: p.alive,
            invincible_until: p.invincible_until,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::lane::Pipe;
    use crate::ws::protocol::RoomId;
    use uuid::Uuid;

    #[test]
    fn snapshot_lists_players_in_join_order() {
        let mut state = RoomState::new(RoomId::parse("SNAP1").unwrap(), 3);
        let ids: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        for (i, id) in ids.iter().enumerate() {
            state.add_player(*id, format!("p{}", i), 0);
        }
        state.lane.push_pipe(Pipe::new(1, 500.0, 250.0, 140.0));

        let snapshot = SnapshotBuilder::build(&state);
        let order: Vec<Uuid> = snapshot.players.iter().map(|p| p.participant_id).collect();
        assert_eq!(order, ids);
        assert_eq!(snapshot.host_id, Some(ids[0]));
        assert_eq!(snapshot.room_id.as_str(), "SNAP1");
        assert!(!snapshot.started);
        assert_eq!(snapshot.pipes.len(), 1);
        assert_eq!(snapshot.pipes[0].gap_height, 140.0);
        assert_eq!(snapshot.player(ids[2]).map(|p| p.display_name.as_str()), Some("p2"));
    }
}
