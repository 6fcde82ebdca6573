use ghostwire::LinkConditioner;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub tick_rate: u32,
    pub max_clients: usize,
    pub move_speed: f32,
    pub prop_count: usize,
    pub debug_stats_port: u16,
    pub link_conditioner: Option<LinkConditioner>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tick_rate: 60,
            max_clients: 32,
            move_speed: 5.0,
            prop_count: 8,
            debug_stats_port: ghostwire::DEBUG_STATS_PORT,
            link_conditioner: None,
        }
    }
}
