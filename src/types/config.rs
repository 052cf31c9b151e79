use std::time::Duration;

/// Reconnection policy used after an unexpected connection loss
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Whether to reconnect automatically at all (default: true)
    pub enabled: bool,
    /// First backoff delay (default: 300ms)
    pub initial_delay: Duration,
    /// Upper bound for a single delay (default: 10 seconds)
    pub max_delay: Duration,
    /// Growth factor applied after each failed attempt (default: 1.3)
    pub multiplier: f64,
    /// Give up after this many attempts (default: 20)
    pub max_attempts: Option<u32>,
    /// Give up once this much time has passed since the loss (default: 60 seconds)
    pub max_elapsed: Option<Duration>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay: Duration::from_millis(300),
            max_delay: Duration::from_secs(10),
            multiplier: 1.3,
            max_attempts: Some(20),
            max_elapsed: Some(Duration::from_secs(60)),
        }
    }
}

impl ReconnectPolicy {
    /// Policy that never reconnects
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

/// Heartbeat and liveness settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Interval between outbound heartbeats (default: 5 seconds)
    pub interval: Duration,
    /// Silence after which the connection is declared dead (default: 15 seconds)
    pub timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(15),
        }
    }
}

/// Per-type payload ceilings and desync tolerance for the stream transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadLimits {
    /// Largest accepted control payload in bytes (default: `100_000`)
    pub max_control: u32,
    /// Largest accepted audio payload in bytes (default: `500_000`)
    pub max_audio: u32,
    /// Consecutive bad-magic headers tolerated before tearing down (default: 3)
    pub max_magic_errors: u32,
}

impl Default for PayloadLimits {
    fn default() -> Self {
        Self {
            max_control: 100_000,
            max_audio: 500_000,
            max_magic_errors: 3,
        }
    }
}

/// How decoded audio is laid out on the output side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderMode {
    /// One stereo stream per logical channel
    #[default]
    PerChannel,
    /// All channels panned into a single stereo master stream
    MixedStereo,
}

/// Render engine settings
#[derive(Debug, Clone, PartialEq)]
pub struct RenderConfig {
    /// Output layout (default: per channel)
    pub mode: RenderMode,
    /// Output sample rate (default: 48000)
    pub sample_rate: u32,
    /// Maximum concurrently open output streams (default: 32)
    pub max_streams: usize,
    /// Ring buffer capacity per stream in frames (default: 8192)
    pub ring_frames: usize,
    /// Buffers kept per size in the interleave pool (default: 2)
    pub pool_per_size: usize,
    /// Level above which the soft clipper starts bending (default: 0.8)
    pub soft_clip_knee: f32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            mode: RenderMode::PerChannel,
            sample_rate: 48_000,
            max_streams: 32,
            ring_frames: 8192,
            pool_per_size: 2,
            soft_clip_knee: 0.8,
        }
    }
}

/// Outbound mix synchronisation (debounce) settings
#[derive(Debug, Clone, PartialEq)]
pub struct MixSyncConfig {
    /// Minimum spacing between outbound mix updates (default: 100ms)
    pub interval: Duration,
    /// Smallest gain change worth sending, in dB (default: 0.5)
    pub min_gain_delta_db: f32,
    /// Smallest pan change worth sending (default: 0.02)
    pub min_pan_delta: f32,
}

impl Default for MixSyncConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            min_gain_delta_db: 0.5,
            min_pan_delta: 0.02,
        }
    }
}

/// Configuration for the monitoring client
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Timeout for the TCP connect (default: 5 seconds)
    pub connect_timeout: Duration,

    /// Timeout for waiting on `handshake_response` (default: 5 seconds)
    pub handshake_timeout: Duration,

    /// Timeout for a single outbound frame write (default: 500ms)
    pub write_timeout: Duration,

    /// Heartbeat settings
    pub heartbeat: HeartbeatConfig,

    /// Reconnection policy
    pub reconnect: ReconnectPolicy,

    /// Payload ceilings for the stream transport
    pub limits: PayloadLimits,

    /// Render engine settings
    pub render: RenderConfig,

    /// Outbound mix debounce settings
    pub mix_sync: MixSyncConfig,

    /// Jitter buffer capacity for the datagram transport (default: 10)
    pub jitter_capacity: usize,

    /// Forward probe window of the jitter buffer (default: 5)
    pub jitter_window: u32,

    /// Longest a datagram waits in the jitter buffer for a missing
    /// predecessor before the gap is skipped (default: 40ms)
    pub jitter_max_hold: Duration,

    /// Decoded packets queued between reader and renderer (default: 64)
    pub audio_queue_depth: usize,

    /// Silence after which the stream is reported idle (default: 2 seconds)
    pub idle_timeout: Duration,

    /// Minimum spacing between audio meter events (default: 100ms)
    pub meter_interval: Duration,

    /// Advertise RF (persistent) mode in the handshake (default: true)
    pub rf_mode: bool,

    /// Optional stable device identifier sent with handshake and mix updates
    pub device_uuid: Option<String>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_millis(500),
            heartbeat: HeartbeatConfig::default(),
            reconnect: ReconnectPolicy::default(),
            limits: PayloadLimits::default(),
            render: RenderConfig::default(),
            mix_sync: MixSyncConfig::default(),
            jitter_capacity: 10,
            jitter_window: 5,
            jitter_max_hold: Duration::from_millis(40),
            audio_queue_depth: 64,
            idle_timeout: Duration::from_secs(2),
            meter_interval: Duration::from_millis(100),
            rf_mode: true,
            device_uuid: None,
        }
    }
}

impl LinkConfig {
    /// Create a new config builder
    #[must_use]
    pub fn builder() -> LinkConfigBuilder {
        LinkConfigBuilder::default()
    }
}

/// Builder for `LinkConfig`
#[derive(Debug, Clone, Default)]
pub struct LinkConfigBuilder {
    config: LinkConfig,
}

impl LinkConfigBuilder {
    /// Set TCP connect timeout
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set handshake response timeout
    #[must_use]
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    /// Set per-frame write timeout
    #[must_use]
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.config.write_timeout = timeout;
        self
    }

    /// Set heartbeat interval and liveness timeout
    #[must_use]
    pub fn heartbeat(mut self, interval: Duration, timeout: Duration) -> Self {
        self.config.heartbeat = HeartbeatConfig { interval, timeout };
        self
    }

    /// Set the reconnection policy
    #[must_use]
    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.config.reconnect = policy;
        self
    }

    /// Set payload limits
    #[must_use]
    pub fn limits(mut self, limits: PayloadLimits) -> Self {
        self.config.limits = limits;
        self
    }

    /// Set render engine settings
    #[must_use]
    pub fn render(mut self, render: RenderConfig) -> Self {
        self.config.render = render;
        self
    }

    /// Set the render layout
    #[must_use]
    pub fn render_mode(mut self, mode: RenderMode) -> Self {
        self.config.render.mode = mode;
        self
    }

    /// Set outbound mix debounce settings
    #[must_use]
    pub fn mix_sync(mut self, mix_sync: MixSyncConfig) -> Self {
        self.config.mix_sync = mix_sync;
        self
    }

    /// Set jitter buffer capacity and probe window
    #[must_use]
    pub fn jitter(mut self, capacity: usize, window: u32) -> Self {
        self.config.jitter_capacity = capacity;
        self.config.jitter_window = window;
        self
    }

    /// Set how long a datagram may wait for a missing predecessor
    #[must_use]
    pub fn jitter_max_hold(mut self, hold: Duration) -> Self {
        self.config.jitter_max_hold = hold;
        self
    }

    /// Set the idle timeout used for keep-alive events
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    /// Set the meter event interval
    #[must_use]
    pub fn meter_interval(mut self, interval: Duration) -> Self {
        self.config.meter_interval = interval;
        self
    }

    /// Enable or disable RF (persistent) mode
    #[must_use]
    pub fn rf_mode(mut self, enabled: bool) -> Self {
        self.config.rf_mode = enabled;
        self
    }

    /// Set the device identifier
    #[must_use]
    pub fn device_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.config.device_uuid = Some(uuid.into());
        self
    }

    /// Build the configuration
    #[must_use]
    pub fn build(self) -> LinkConfig {
        self.config
    }
}
