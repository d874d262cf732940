use clap::Parser;

#[derive(Parser)]
#[command(name = "agyproxy")]
pub(crate) struct Cli {
    #[arg(long, default_value = "127.0.0.1")]
    pub(crate) host: String,
    #[arg(long, default_value_t = 8317)]
    pub(crate) port: u16,
    /// JSON file with the credential records to pool.
    #[arg(long, default_value = "credentials.json")]
    pub(crate) credentials: String,
    /// Credential class served by this listener.
    #[arg(long, value_enum, default_value_t = ModeArg::Antigravity)]
    pub(crate) mode: ModeArg,
    /// Outbound proxy for upstream and token traffic.
    #[arg(long)]
    pub(crate) proxy: Option<String>,
    #[arg(long, default_value_t = 3)]
    pub(crate) max_attempts: usize,
    /// Pause between synthetic stream chunks.
    #[arg(long, default_value_t = 30)]
    pub(crate) fake_stream_delay_ms: u64,
    /// Minutes an expired token stays usable when refresh fails.
    #[arg(long, default_value_t = 15)]
    pub(crate) stale_grace_minutes: i64,
}

#[derive(Clone, Copy, clap::ValueEnum)]
pub(crate) enum ModeArg {
    Antigravity,
    Geminicli,
}

impl From<ModeArg> for agyproxy_common::Mode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Antigravity => agyproxy_common::Mode::Antigravity,
            ModeArg::Geminicli => agyproxy_common::Mode::GeminiCli,
        }
    }
}
