pub const MAX_SEG_DATA_SIZE: usize = 1400;

// declared unresponsive and torn down after this many attempts at the same segment
pub const MAX_NUM_XMITS: u32 = 5;

// kept short so demo binaries and tests don't sit in TIME_WAIT for minutes like real TCP
pub const MSL_MS: u64 = 2_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub recv_window: u16,
    pub send_window: u16,
    pub tick_period_ms: u64,
    pub rt_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            recv_window: 3200,
            send_window: 3200,
            tick_period_ms: 100,
            rt_timeout_ms: 1000,
        }
    }
}
