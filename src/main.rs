use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use d7phy::logging::init_logger_with_level;
use d7phy::radio::hal::{SimController, SimTransceiver};
use d7phy::util::hex::{decode_hex, format_hex_compact};
use d7phy::{
    event_channel, log_info, run_event_loop, BufferPool, ChannelBand, ChannelClass,
    ChannelCoding, ChannelId, PacketBuffer, RadioCallbacks, RadioDriver, RadioSettings,
    RssiReading, RxConfig, TxConfig,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(name = "d7phy-sim")]
#[command(about = "Drive the radio HAL against a simulated transceiver")]
struct Cli {
    /// JSON settings file for the driver and the simulator
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Center frequency index of the 868 MHz channel to use
    #[arg(long, global = true, default_value = "0")]
    channel: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Listen, receive a packet, answer it and return to RX
    Scenario,
    /// Transmit one packet
    Send {
        #[arg(long, default_value = "10", allow_hyphen_values = true)]
        eirp: i8,
        #[arg(long)]
        payload: String,
    },
    /// Arm RX and print the first valid RSSI reading
    Rssi,
    /// Print the effective settings as JSON
    Config,
}

/// What the radio callbacks report back to the command
enum Notice {
    RssiValid(RssiReading),
    Received(PacketBuffer),
    Transmitted(PacketBuffer),
}

struct Session {
    radio: Arc<RadioDriver<SimTransceiver>>,
    air: SimController,
    pool: BufferPool,
    notices: mpsc::UnboundedReceiver<Notice>,
    shutdown: oneshot::Sender<()>,
    event_loop: JoinHandle<()>,
}

impl Session {
    fn start(settings: &RadioSettings) -> Result<Self> {
        let (irq, queue) = event_channel(settings.driver.event_queue_capacity);
        let (sim, air) = SimTransceiver::new(settings.simulator.clone(), irq.clone());
        let radio = Arc::new(RadioDriver::with_config(sim, irq, queue, &settings.driver));

        let pool = BufferPool::new(4, settings.driver.max_packet_len);
        let (notify, notices) = mpsc::unbounded_channel();
        let (alloc_pool, release_pool) = (pool.clone(), pool.clone());
        let (rx_notify, tx_notify) = (notify.clone(), notify.clone());
        radio
            .init(
                RadioCallbacks::new()
                    .on_alloc(move |len| alloc_pool.allocate(len))
                    .on_release(move |buf| release_pool.recycle(buf))
                    .on_rx(move |buf| {
                        let _ = rx_notify.send(Notice::Received(buf));
                    })
                    .on_tx(move |buf| {
                        let _ = tx_notify.send(Notice::Transmitted(buf));
                    })
                    .on_rssi_valid(move |reading| {
                        let _ = notify.send(Notice::RssiValid(reading));
                    }),
            )
            .context("failed to initialise the radio")?;

        let (shutdown, shutdown_rx) = oneshot::channel();
        let event_loop = tokio::spawn(run_event_loop(Arc::clone(&radio), shutdown_rx));

        Ok(Self {
            radio,
            air,
            pool,
            notices,
            shutdown,
            event_loop,
        })
    }

    async fn next_notice(&mut self) -> Result<Notice> {
        tokio::time::timeout(EVENT_TIMEOUT, self.notices.recv())
            .await
            .context("timed out waiting for the radio")?
            .ok_or_else(|| anyhow!("radio callbacks dropped"))
    }

    async fn wait_rssi(&mut self) -> Result<RssiReading> {
        loop {
            if let Notice::RssiValid(reading) = self.next_notice().await? {
                return Ok(reading);
            }
        }
    }

    async fn wait_received(&mut self) -> Result<PacketBuffer> {
        loop {
            if let Notice::Received(packet) = self.next_notice().await? {
                return Ok(packet);
            }
        }
    }

    async fn wait_transmitted(&mut self) -> Result<PacketBuffer> {
        loop {
            if let Notice::Transmitted(packet) = self.next_notice().await? {
                return Ok(packet);
            }
        }
    }

    async fn send(&mut self, cfg: TxConfig, payload: &[u8]) -> Result<PacketBuffer> {
        self.radio
            .send_packet(PacketBuffer::outbound(cfg, payload))
            .context("send_packet rejected")?;
        self.wait_transmitted().await
    }

    async fn stop(self) -> Result<()> {
        let stats = self.radio.stats();
        log_info(&format!("Radio stats: {stats:?}"));
        let _ = self.shutdown.send(());
        self.event_loop.await.context("event loop panicked")?;
        Ok(())
    }
}

fn channel(index: u8) -> ChannelId {
    ChannelId::new(ChannelCoding::Pn9, ChannelClass::NormalRate, ChannelBand::Band868, index)
}

async fn scenario(session: &mut Session, channel_id: ChannelId) -> Result<()> {
    let rx_cfg = RxConfig::new(channel_id, 0);
    session.radio.set_rx(rx_cfg)?;
    let rssi = session.wait_rssi().await?;
    println!("RX armed on header 0x{:02X}, channel RSSI {:?} dBm", channel_id.header(), rssi.dbm());

    if !session.air.inject(&[0xD7, 0x01, 0x02, 0x03], -68.0) {
        bail!("simulated receiver is not listening");
    }
    let request = session.wait_received().await?;
    let meta = request
        .rx_meta()
        .copied()
        .ok_or_else(|| anyhow!("received packet without RX metadata"))?;
    println!(
        "Received [{}] rssi {} dBm lqi {} crc {:?}",
        format_hex_compact(request.payload()),
        meta.rssi,
        meta.lqi,
        meta.crc_status
    );
    session.pool.recycle(request);

    let sent = session.send(TxConfig::new(channel_id, 0, 0), &[0xD7, 0x81]).await?;
    println!("Answered [{}]", format_hex_compact(sent.payload()));

    if session.radio.rx_config() != Some(rx_cfg) {
        bail!("radio did not return to RX after transmitting");
    }
    session.wait_rssi().await?;
    println!("Back in RX, RSSI {:?} dBm", session.radio.measure_rssi().dbm());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logger_with_level("info");

    let cli = Cli::parse();
    let settings = match &cli.config {
        Some(path) => RadioSettings::load(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => RadioSettings::default(),
    };

    if let Commands::Config = cli.command {
        println!("{}", settings.to_json_pretty()?);
        return Ok(());
    }

    let channel_id = channel(cli.channel);
    let mut session = Session::start(&settings)?;

    match cli.command {
        Commands::Scenario => scenario(&mut session, channel_id).await?,
        Commands::Send { eirp, payload } => {
            let payload = decode_hex(&payload).context("invalid --payload")?;
            let sent = session.send(TxConfig::new(channel_id, 0, eirp), &payload).await?;
            let applied = sent.tx_meta().map(|meta| meta.tx_cfg.eirp);
            println!(
                "Sent {} bytes, requested {eirp} dBm, applied {:?} dBm",
                sent.len(),
                applied
            );
        }
        Commands::Rssi => {
            session.radio.set_rx(RxConfig::new(channel_id, 0))?;
            session.wait_rssi().await?;
            println!("RSSI {:?} dBm", session.radio.measure_rssi().dbm());
        }
        Commands::Config => {}
    }

    session.stop().await
}
