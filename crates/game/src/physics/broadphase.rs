use super::components::Aabb;
use super::world::RigidBody;

const AABB_MARGIN: f32 = 0.05;

#[derive(Debug, Clone, Copy)]
pub struct BroadphaseEntry {
    pub body_index: i32,
    pub aabb: Aabb,
}

/// Spatial index over the body arrays, split so the static half can be kept
/// across ticks when no static body changed.
#[derive(Debug, Default)]
pub struct Broadphase {
    static_entries: Vec<BroadphaseEntry>,
    dynamic_entries: Vec<BroadphaseEntry>,
}

impl Broadphase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds the index from the packed body arrays. The static set is
    /// only rebuilt when `rebuild_static` is set; the dynamic set always is.
    pub fn build(&mut self, bodies: &[RigidBody], num_dynamic: usize, rebuild_static: bool) {
        self.dynamic_entries.clear();
        for (i, body) in bodies[..num_dynamic].iter().enumerate() {
            if let Some(aabb) = body_aabb(body) {
                self.dynamic_entries.push(BroadphaseEntry {
                    body_index: i as i32,
                    aabb,
                });
            }
        }

        if rebuild_static {
            self.static_entries.clear();
            for (i, body) in bodies[num_dynamic..].iter().enumerate() {
                if let Some(aabb) = body_aabb(body) {
                    self.static_entries.push(BroadphaseEntry {
                        body_index: (num_dynamic + i) as i32,
                        aabb,
                    });
                }
            }
        }
    }

    /// Re-derives the dynamic set only; the post-step refresh when
    /// `synchronize_collision_world` is requested.
    pub fn refresh_dynamic(&mut self, bodies: &[RigidBody], num_dynamic: usize) {
        self.build(bodies, num_dynamic, false);
    }

    pub fn clear(&mut self) {
        self.static_entries.clear();
        self.dynamic_entries.clear();
    }

    pub fn static_entries(&self) -> &[BroadphaseEntry] {
        &self.static_entries
    }

    pub fn dynamic_entries(&self) -> &[BroadphaseEntry] {
        &self.dynamic_entries
    }

    /// Body indices whose bounds overlap the query box.
    pub fn overlap(&self, aabb: &Aabb) -> Vec<i32> {
        let mut hits = Vec::new();
        for entry in self.dynamic_entries.iter().chain(&self.static_entries) {
            if entry.aabb.overlaps(aabb) {
                hits.push(entry.body_index);
            }
        }
        hits
    }
}

fn body_aabb(body: &RigidBody) -> Option<Aabb> {
    let collider = body.collider.as_ref()?;
    Some(
        collider
            .shape
            .world_aabb(&body.world_from_body, body.scale)
            .expanded(AABB_MARGIN),
    )
}
