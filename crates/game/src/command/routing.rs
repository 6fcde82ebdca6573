use crate::ghost::{EntityId, GhostWorld, SpawnedGhostId};
use crate::net::Connection;
use crate::tick::NetworkTick;

/// Maps a payload's routing fields to a live entity.
///
/// Ghost id 0 selects the connection's explicit command target. Any other id
/// must resolve through the spawned-ghost map to an entity owned by this
/// connection with the auto-target capability enabled; otherwise the payload
/// is discarded.
pub fn resolve_command_target(
    world: &GhostWorld,
    ghost_id: i32,
    spawn_tick: NetworkTick,
    conn: &Connection,
) -> Option<EntityId> {
    if ghost_id == 0 {
        return conn.command_target;
    }

    let entity = world.resolve_ghost(SpawnedGhostId {
        ghost_id,
        spawn_tick,
    })?;
    let ghost = world.get(entity)?;
    if ghost.owner == Some(conn.network_id) && ghost.auto_command_target {
        Some(entity)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::NetworkId;

    fn test_conn(network_id: u32) -> Connection {
        Connection::new(
            "127.0.0.1:9999".parse().unwrap(),
            NetworkId::new(network_id),
            0,
        )
    }

    #[test]
    fn ghost_id_zero_uses_explicit_target() {
        let world = GhostWorld::new();
        let mut conn = test_conn(1);
        assert_eq!(
            resolve_command_target(&world, 0, NetworkTick::INVALID, &conn),
            None
        );

        conn.command_target = Some(77);
        assert_eq!(
            resolve_command_target(&world, 0, NetworkTick::INVALID, &conn),
            Some(77)
        );
    }

    #[test]
    fn owned_auto_target_resolves() {
        let mut world = GhostWorld::new();
        let conn = test_conn(1);
        let (entity, ghost) =
            world.spawn_ghost(0, NetworkTick::new(5), Some(conn.network_id));
        world.get_mut(entity).unwrap().auto_command_target = true;

        assert_eq!(
            resolve_command_target(&world, ghost.ghost_id, ghost.spawn_tick, &conn),
            Some(entity)
        );
    }

    #[test]
    fn wrong_owner_or_capability_is_discarded() {
        let mut world = GhostWorld::new();
        let conn = test_conn(1);
        let other = NetworkId::new(2);

        let (not_mine, theirs) = world.spawn_ghost(0, NetworkTick::new(5), Some(other));
        world.get_mut(not_mine).unwrap().auto_command_target = true;
        assert_eq!(
            resolve_command_target(&world, theirs.ghost_id, theirs.spawn_tick, &conn),
            None
        );

        let (mine, ghost) = world.spawn_ghost(0, NetworkTick::new(6), Some(conn.network_id));
        // Capability left disabled.
        let _ = mine;
        assert_eq!(
            resolve_command_target(&world, ghost.ghost_id, ghost.spawn_tick, &conn),
            None
        );
    }

    #[test]
    fn wrong_spawn_tick_misses_the_map() {
        let mut world = GhostWorld::new();
        let conn = test_conn(1);
        let (entity, ghost) =
            world.spawn_ghost(0, NetworkTick::new(5), Some(conn.network_id));
        world.get_mut(entity).unwrap().auto_command_target = true;

        assert_eq!(
            resolve_command_target(&world, ghost.ghost_id, NetworkTick::new(6), &conn),
            None
        );
    }
}
